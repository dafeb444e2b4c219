//! Concurrency-safe store of live connections.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tracing::debug;

use crate::endpoint::Endpoint;

use super::handle::ConnectionHandle;
use super::signal::WaiterSignal;

/// Registry of live connections, one handle per endpoint.
///
/// The registry keeps a map from endpoint to handle and an ordered vector
/// mirroring the map's values for snapshot iteration. Both are guarded by
/// one mutex, so every mutation is atomic as observed from outside and the
/// two structures never disagree. The lock is only held for brief in-memory
/// mutations; handle teardown I/O runs detached.
///
/// Consumers that need a connection but find the registry empty can suspend
/// on [`wait_for_available`](Self::wait_for_available); every successful
/// [`upsert`](Self::upsert) wakes all such waiters.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
    signal: WaiterSignal,
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_endpoint: HashMap<Endpoint, ConnectionHandle>,
    ordered: Vec<ConnectionHandle>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a handle, replacing any existing handle for the endpoint.
    ///
    /// A replaced handle is closed. Waiters blocked on
    /// [`wait_for_available`](Self::wait_for_available) are woken.
    pub fn upsert(&self, endpoint: Endpoint, handle: ConnectionHandle) {
        let replaced = {
            let mut inner = self.inner.lock().unwrap();
            match inner.by_endpoint.insert(endpoint.clone(), handle.clone()) {
                Some(old) => {
                    let slot = inner
                        .ordered
                        .iter_mut()
                        .find(|h| *h.endpoint() == endpoint)
                        .expect("ordered list out of sync with endpoint map");
                    *slot = handle;
                    Some(old)
                }
                None => {
                    inner.ordered.push(handle);
                    None
                }
            }
        };

        if let Some(old) = replaced {
            debug!("replacing existing connection to {}", endpoint);
            old.close_detached();
        }
        self.signal.signal_available();
    }

    /// Close and evict the handle for an endpoint. Returns false if absent.
    pub fn remove(&self, endpoint: &Endpoint) -> bool {
        let removed = {
            let mut inner = self.inner.lock().unwrap();
            let removed = inner.by_endpoint.remove(endpoint);
            if removed.is_some() {
                inner.ordered.retain(|h| h.endpoint() != endpoint);
            }
            removed
        };

        match removed {
            Some(handle) => {
                handle.close_detached();
                true
            }
            None => false,
        }
    }

    /// Evict only if the stored handle is the given generation.
    ///
    /// Used by connection monitors: a monitor observing the death of an
    /// already-replaced handle must not evict the replacement.
    pub(crate) fn remove_if(&self, endpoint: &Endpoint, handle_id: u64) -> bool {
        let removed = {
            let mut inner = self.inner.lock().unwrap();
            if inner.by_endpoint.get(endpoint).map(ConnectionHandle::id) != Some(handle_id) {
                return false;
            }
            inner.ordered.retain(|h| h.endpoint() != endpoint);
            inner.by_endpoint.remove(endpoint)
        };

        if let Some(handle) = removed {
            handle.close_detached();
        }
        true
    }

    /// Close and evict every live handle, returning the evicted endpoints.
    pub fn clear(&self) -> Vec<Endpoint> {
        let handles = {
            let mut inner = self.inner.lock().unwrap();
            inner.by_endpoint.clear();
            std::mem::take(&mut inner.ordered)
        };

        let mut endpoints = Vec::with_capacity(handles.len());
        for handle in handles {
            endpoints.push(handle.endpoint().clone());
            handle.close_detached();
        }
        endpoints
    }

    /// Check whether a live handle exists for the endpoint.
    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.inner.lock().unwrap().by_endpoint.contains_key(endpoint)
    }

    /// A stable copy of the currently live handles, in insertion order.
    ///
    /// The snapshot never reflects a half-applied mutation and is safe to
    /// iterate while the registry keeps changing.
    pub fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.inner.lock().unwrap().ordered.clone()
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().ordered.len()
    }

    /// Check if no handles are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Suspend until at least one live handle exists.
    pub async fn wait_for_available(&self) {
        self.signal.wait_until(|| !self.is_empty()).await;
    }

    /// Like [`wait_for_available`](Self::wait_for_available), bounded by a
    /// timeout. Returns false if the timeout elapsed first.
    pub async fn wait_for_available_timeout(&self, duration: Duration) -> bool {
        tokio::time::timeout(duration, self.wait_for_available())
            .await
            .is_ok()
    }
}
