//! Connection management for RPC clients.
//!
//! This module provides:
//! - A registry of live connections, one per endpoint
//! - A manager that reconciles the registry against a desired endpoint list
//! - Asynchronous connect dispatch on a bounded worker pool
//! - Automatic fixed-delay reconnection after connect failure or loss
//!
//! # Example
//!
//! ```no_run
//! use rpc_pool::{ConnectionManager, ManagerConfig};
//!
//! # async fn run() -> rpc_pool::Result<()> {
//! let manager = ConnectionManager::new(ManagerConfig::default());
//!
//! // Hand the manager the current server list; it connects to new
//! // endpoints and drops connections to removed ones.
//! manager.reconcile(["10.0.0.1:9000", "10.0.0.2:9000"])?;
//!
//! // Block until at least one connection is usable.
//! manager.wait_for_available().await;
//!
//! for handle in manager.snapshot() {
//!     println!("connected to {}", handle.endpoint());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The manager keeps retrying a desired endpoint forever, at a fixed delay,
//! until a later [`ConnectionManager::reconcile`] call removes it from the
//! desired set.

mod config;
mod handle;
mod manager;
mod registry;
mod signal;

pub use config::ManagerConfig;
pub use handle::{ConnectionHandle, HandleState};
pub use manager::{ConnectionManager, PoolStats, ReconcileReport};
pub use registry::ConnectionRegistry;
pub use signal::WaiterSignal;
