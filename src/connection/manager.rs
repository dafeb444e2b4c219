//! Connection manager: reconciliation, async connect dispatch, and retry.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::runtime::Handle as RuntimeHandle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::endpoint::Endpoint;
use crate::error::{PoolError, Result};

use super::config::ManagerConfig;
use super::handle::ConnectionHandle;
use super::registry::ConnectionRegistry;

/// Counters describing the pool's connection churn.
#[derive(Debug, Default)]
pub struct PoolStats {
    established: AtomicU64,
    connect_failures: AtomicU64,
    connections_lost: AtomicU64,
    retries_scheduled: AtomicU64,
}

impl PoolStats {
    /// Connections successfully established and registered.
    pub fn established(&self) -> u64 {
        self.established.load(Ordering::Relaxed)
    }

    /// Connect attempts that failed or timed out.
    pub fn connect_failures(&self) -> u64 {
        self.connect_failures.load(Ordering::Relaxed)
    }

    /// Established connections that closed unexpectedly.
    pub fn connections_lost(&self) -> u64 {
        self.connections_lost.load(Ordering::Relaxed)
    }

    /// Retries placed on the timer.
    pub fn retries_scheduled(&self) -> u64 {
        self.retries_scheduled.load(Ordering::Relaxed)
    }

    fn record_established(&self) {
        self.established.fetch_add(1, Ordering::Relaxed);
    }

    fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
    }

    fn record_retry_scheduled(&self) {
        self.retries_scheduled.fetch_add(1, Ordering::Relaxed);
    }
}

/// Outcome of one [`ConnectionManager::reconcile`] call.
///
/// Reconcile is fire-and-reconcile-eventually: endpoints in `connecting`
/// have had a connect dispatched but are not necessarily live yet by the
/// time the call returns.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Endpoints for which a connect was dispatched.
    pub connecting: Vec<Endpoint>,
    /// Endpoints whose connections were closed and evicted.
    pub removed: Vec<Endpoint>,
    /// Address entries that did not parse, verbatim.
    pub skipped: Vec<String>,
    /// Endpoints whose connect dispatch was rejected because the queue
    /// was full. Never silently dropped; re-issue via a later reconcile.
    pub rejected: Vec<Endpoint>,
}

/// Driver reconciling the live connection pool against a desired
/// endpoint list.
///
/// The manager owns the shared resources of the pool: the registry of live
/// handles, a bounded worker pool for connect dispatch, and the retry
/// timers. It is cheap to clone; clones share one pool.
///
/// Lifecycle is explicit: [`new`](Self::new) spawns the workers (and must
/// run inside a tokio runtime), [`shutdown`](Self::shutdown) stops them,
/// cancels pending retries, and drops every connection. There is no global
/// instance; construct one and pass it to consumers.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: ManagerConfig,
    registry: ConnectionRegistry,
    stats: PoolStats,
    state: Mutex<ManagerState>,
    dispatch_tx: mpsc::Sender<Endpoint>,
    shutdown_tx: broadcast::Sender<()>,
    runtime: RuntimeHandle,
}

#[derive(Default)]
struct ManagerState {
    desired: HashSet<Endpoint>,
    retries: HashMap<Endpoint, JoinHandle<()>>,
    shut_down: bool,
}

impl ConnectionManager {
    /// Create a manager and spawn its connect workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: ManagerConfig) -> Self {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.queue_capacity);
        let (shutdown_tx, _) = broadcast::channel(1);
        let runtime = RuntimeHandle::current();

        let inner = Arc::new(ManagerInner {
            config,
            registry: ConnectionRegistry::new(),
            stats: PoolStats::default(),
            state: Mutex::new(ManagerState::default()),
            dispatch_tx,
            shutdown_tx: shutdown_tx.clone(),
            runtime: runtime.clone(),
        });

        let dispatch_rx = Arc::new(tokio::sync::Mutex::new(dispatch_rx));
        for _ in 0..inner.config.worker_count {
            runtime.spawn(worker_loop(
                Arc::clone(&inner),
                Arc::clone(&dispatch_rx),
                shutdown_tx.subscribe(),
            ));
        }

        Self { inner }
    }

    /// Convenience wrapper around [`reconcile`](Self::reconcile).
    pub fn connect<I, S>(&self, addresses: I) -> Result<ReconcileReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.reconcile(addresses)
    }

    /// Reconcile the pool against a list of `"host:port"` strings.
    ///
    /// Entries that do not parse are skipped and reported, not fatal. An
    /// address list yielding no usable endpoint drops every connection. New
    /// endpoints get an async connect dispatched (additions before
    /// removals); endpoints no longer listed are closed and evicted, and
    /// their pending retries are cancelled.
    ///
    /// Never blocks and performs no I/O on the calling thread. By the time
    /// it returns, new endpoints are typically still connecting; use
    /// [`wait_for_available`](Self::wait_for_available) or poll
    /// [`snapshot`](Self::snapshot) to observe convergence.
    pub fn reconcile<I, S>(&self, addresses: I) -> Result<ReconcileReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let inner = &self.inner;
        let mut report = ReconcileReport::default();

        let mut desired = HashSet::new();
        let mut ordered = Vec::new();
        for raw in addresses {
            let raw = raw.as_ref();
            match raw.parse::<Endpoint>() {
                Ok(endpoint) => {
                    if desired.insert(endpoint.clone()) {
                        ordered.push(endpoint);
                    }
                }
                Err(err) => {
                    warn!("skipping address entry: {}", err);
                    report.skipped.push(raw.to_string());
                }
            }
        }

        {
            let mut state = inner.state.lock().unwrap();
            if state.shut_down {
                return Err(PoolError::Shutdown);
            }

            if desired.is_empty() {
                warn!("no usable endpoints in address list, dropping every connection");
                state.desired.clear();
                for (_, task) in state.retries.drain() {
                    task.abort();
                }
                drop(state);
                report.removed = inner.registry.clear();
                return Ok(report);
            }

            state.desired = desired.clone();
            state.retries.retain(|endpoint, task| {
                if desired.contains(endpoint) {
                    true
                } else {
                    debug!("cancelling pending retry for dropped endpoint {}", endpoint);
                    task.abort();
                    false
                }
            });
        }

        // Additions are dispatched before removals.
        for endpoint in ordered {
            if inner.registry.contains(&endpoint) {
                continue;
            }
            match inner.dispatch_tx.try_send(endpoint.clone()) {
                Ok(()) => {
                    debug!("dispatched connect to {}", endpoint);
                    report.connecting.push(endpoint);
                }
                Err(TrySendError::Full(endpoint)) => {
                    warn!("{}", PoolError::DispatchQueueFull(endpoint.clone()));
                    report.rejected.push(endpoint);
                }
                Err(TrySendError::Closed(_)) => return Err(PoolError::Shutdown),
            }
        }

        for handle in inner.registry.snapshot() {
            if !desired.contains(handle.endpoint()) {
                info!("dropping connection to {}, no longer desired", handle.endpoint());
                inner.registry.remove(handle.endpoint());
                report.removed.push(handle.endpoint().clone());
            }
        }

        Ok(report)
    }

    /// The registry of live connections.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    /// A stable copy of the currently live handles.
    pub fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.inner.registry.snapshot()
    }

    /// Pool churn counters.
    pub fn stats(&self) -> &PoolStats {
        &self.inner.stats
    }

    /// Suspend until at least one live handle exists.
    pub async fn wait_for_available(&self) {
        self.inner.registry.wait_for_available().await;
    }

    /// Like [`wait_for_available`](Self::wait_for_available), bounded by a
    /// timeout. Returns false if the timeout elapsed first.
    pub async fn wait_for_available_timeout(&self, duration: Duration) -> bool {
        self.inner
            .registry
            .wait_for_available_timeout(duration)
            .await
    }

    /// Check whether the manager has been shut down.
    pub fn is_shut_down(&self) -> bool {
        self.inner.state.lock().unwrap().shut_down
    }

    /// Stop the workers, cancel pending retries, and drop every connection.
    ///
    /// Idempotent. Subsequent `reconcile` calls return
    /// [`PoolError::Shutdown`].
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            state.desired.clear();
            for (_, task) in state.retries.drain() {
                task.abort();
            }
        }
        let _ = self.inner.shutdown_tx.send(());
        let evicted = self.inner.registry.clear();
        info!("connection manager shut down, dropped {} connections", evicted.len());
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("live", &self.inner.registry.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl ManagerInner {
    fn is_desired(&self, endpoint: &Endpoint) -> bool {
        self.state.lock().unwrap().desired.contains(endpoint)
    }

    /// Unified failure path: connect failures and lost connections both
    /// evict the failing endpoint and put it on the retry timer.
    fn handle_connection_failure(self: &Arc<Self>, endpoint: &Endpoint, err: &PoolError) {
        self.stats.record_connect_failure();
        warn!("connect to {} failed: {}", endpoint, err);
        self.registry.remove(endpoint);
        self.schedule_retry(endpoint);
    }

    fn handle_connection_lost(self: &Arc<Self>, handle: &ConnectionHandle) {
        self.stats.record_connection_lost();
        warn!("connection to {} lost", handle.endpoint());
        self.registry.remove_if(handle.endpoint(), handle.id());
        self.schedule_retry(handle.endpoint());
    }

    /// Put an endpoint on the retry timer, unless it has been dropped from
    /// the desired set or already has a retry pending.
    fn schedule_retry(self: &Arc<Self>, endpoint: &Endpoint) {
        let mut state = self.state.lock().unwrap();
        if state.shut_down || !state.desired.contains(endpoint) {
            debug!("not retrying {}, endpoint no longer desired", endpoint);
            return;
        }
        if state.retries.contains_key(endpoint) {
            return;
        }

        let inner = Arc::clone(self);
        let retry_endpoint = endpoint.clone();
        let delay = self.config.retry_delay;
        let task = self.runtime.spawn(async move {
            sleep(delay).await;
            inner.fire_retry(retry_endpoint);
        });
        state.retries.insert(endpoint.clone(), task);
        drop(state);

        self.stats.record_retry_scheduled();
        debug!("scheduled retry for {} in {:?}", endpoint, delay);
    }

    fn fire_retry(self: &Arc<Self>, endpoint: Endpoint) {
        {
            let mut state = self.state.lock().unwrap();
            state.retries.remove(&endpoint);
            // Membership is re-checked at fire time, so an endpoint dropped
            // while its retry was pending is never retried.
            if state.shut_down || !state.desired.contains(&endpoint) {
                debug!("dropping retry for {}, endpoint no longer desired", endpoint);
                return;
            }
        }
        if self.registry.contains(&endpoint) {
            return;
        }

        match self.dispatch_tx.try_send(endpoint.clone()) {
            Ok(()) => debug!("retrying connect to {}", endpoint),
            Err(TrySendError::Full(endpoint)) => {
                warn!("dispatch queue full, deferring retry for {}", endpoint);
                self.schedule_retry(&endpoint);
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// One connect worker: drains the bounded dispatch queue until shutdown.
async fn worker_loop(
    inner: Arc<ManagerInner>,
    dispatch_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Endpoint>>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        let endpoint = tokio::select! {
            _ = shutdown_rx.recv() => break,
            received = async { dispatch_rx.lock().await.recv().await } => {
                match received {
                    Some(endpoint) => endpoint,
                    None => break,
                }
            }
        };
        connect_endpoint(&inner, endpoint).await;
    }
}

async fn connect_endpoint(inner: &Arc<ManagerInner>, endpoint: Endpoint) {
    if !inner.is_desired(&endpoint) {
        debug!("dropping queued connect to {}, endpoint no longer desired", endpoint);
        return;
    }
    if inner.registry.contains(&endpoint) {
        return;
    }

    debug!("connecting to {}", endpoint);
    let attempt = timeout(
        inner.config.connect_timeout,
        TcpStream::connect((endpoint.host(), endpoint.port())),
    )
    .await;

    match attempt {
        Ok(Ok(stream)) => match register_connection(inner, endpoint.clone(), stream) {
            Ok(()) => {}
            Err(err) => inner.handle_connection_failure(&endpoint, &err),
        },
        Ok(Err(err)) => inner.handle_connection_failure(&endpoint, &err.into()),
        Err(_) => inner.handle_connection_failure(&endpoint, &PoolError::ConnectTimeout),
    }
}

fn register_connection(
    inner: &Arc<ManagerInner>,
    endpoint: Endpoint,
    stream: TcpStream,
) -> Result<()> {
    let remote_addr = stream.peer_addr()?;
    let (handle, read_half) = ConnectionHandle::establish(endpoint.clone(), stream)?;
    handle.activate(remote_addr);

    if !inner.is_desired(&endpoint) {
        // Dropped from the desired set while the connect was in flight.
        debug!("discarding fresh connection to {}, endpoint dropped", endpoint);
        handle.close_detached();
        return Ok(());
    }

    inner.stats.record_established();
    info!("connected to {} ({})", endpoint, remote_addr);
    inner.registry.upsert(endpoint, handle.clone());

    inner
        .runtime
        .spawn(monitor_connection(Arc::clone(inner), handle, read_half));
    Ok(())
}

/// Watch an established connection for loss.
///
/// Inbound bytes are not interpreted here; framing belongs to the protocol
/// layer. The read side is drained only to learn when the peer goes away.
async fn monitor_connection(
    inner: Arc<ManagerInner>,
    handle: ConnectionHandle,
    mut read_half: OwnedReadHalf,
) {
    let mut buf = [0u8; 1024];
    loop {
        tokio::select! {
            _ = handle.closed() => return,
            read = read_half.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    }
    if handle.is_closed() {
        // Deliberate close racing the peer's FIN, not a loss.
        return;
    }
    inner.handle_connection_lost(&handle);
}
