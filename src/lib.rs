//! Client-side connection pool management for RPC transports.
//!
//! This crate keeps a pool of live TCP connections to a dynamic set of RPC
//! server endpoints. Hand the [`ConnectionManager`] the current address
//! list whenever it changes; the manager connects to new endpoints
//! asynchronously on a bounded worker pool, drops connections to removed
//! ones, and re-establishes failed or lost connections on a fixed-delay
//! timer until the endpoint is removed from the desired set.
//!
//! What this crate deliberately does not do: RPC message framing and
//! encoding, name resolution of the address list, and picking which live
//! connection a request should use. Those belong to the protocol and
//! dispatch layers above; this crate hands them a stable
//! [`snapshot`](ConnectionManager::snapshot) of the live pool.
//!
//! # Example
//!
//! ```no_run
//! use rpc_pool::{ConnectionManager, ManagerConfig};
//! use bytes::Bytes;
//!
//! # async fn run() -> rpc_pool::Result<()> {
//! let manager = ConnectionManager::new(ManagerConfig::default());
//!
//! // Feed in the server list from the discovery layer.
//! let report = manager.reconcile(["10.0.0.1:9000", "10.0.0.2:9000"])?;
//! assert!(report.rejected.is_empty());
//!
//! // Connects are asynchronous; wait for the first live handle.
//! manager.wait_for_available().await;
//!
//! let handle = manager.snapshot().remove(0);
//! handle.send(Bytes::from_static(b"framed-rpc-request")).await?;
//!
//! manager.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod endpoint;
pub mod error;

// Re-export commonly used types at the crate root
pub use connection::{
    ConnectionHandle, ConnectionManager, ConnectionRegistry, HandleState, ManagerConfig,
    PoolStats, ReconcileReport, WaiterSignal,
};
pub use endpoint::Endpoint;
pub use error::{PoolError, Result};
