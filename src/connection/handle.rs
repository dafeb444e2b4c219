//! Handle to a single live RPC connection.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use bytes::Bytes;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::{PoolError, Result};

use super::signal::WaiterSignal;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a [`ConnectionHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Transport-level connect succeeded, remote address not yet resolved.
    Registered,
    /// Remote address resolved, usable for sends.
    Active,
    /// Terminal. Closing again is a no-op.
    Closed,
}

/// A handle to one live transport connection to one endpoint.
///
/// Handles are cheap to clone; clones share the underlying connection, so a
/// handle can sit in the registry and in any number of snapshots at the same
/// time. Exactly one live handle exists per endpoint (the registry enforces
/// this).
///
/// Writes go through [`send`](Self::send); [`close`](Self::close) flushes
/// pending writes before tearing the socket down and is idempotent.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    id: u64,
    endpoint: Endpoint,
    remote_addr: OnceLock<SocketAddr>,
    state: Mutex<HandleState>,
    writer: tokio::sync::Mutex<Option<BufWriter<OwnedWriteHalf>>>,
    closed_signal: WaiterSignal,
    runtime: tokio::runtime::Handle,
}

impl ConnectionHandle {
    /// Wrap a freshly connected stream.
    ///
    /// Returns the handle in the `Registered` state together with the read
    /// half of the stream, which the caller is expected to monitor for
    /// connection loss. Must be called from within a tokio runtime.
    pub fn establish(
        endpoint: Endpoint,
        stream: TcpStream,
    ) -> io::Result<(Self, OwnedReadHalf)> {
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        let inner = HandleInner {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            endpoint,
            remote_addr: OnceLock::new(),
            state: Mutex::new(HandleState::Registered),
            writer: tokio::sync::Mutex::new(Some(BufWriter::new(write_half))),
            closed_signal: WaiterSignal::new(),
            runtime: tokio::runtime::Handle::current(),
        };
        Ok((
            Self {
                inner: Arc::new(inner),
            },
            read_half,
        ))
    }

    /// Resolve the remote address and transition to `Active`.
    ///
    /// The address is recorded once and immutable thereafter. Activating a
    /// closed handle is a no-op.
    pub fn activate(&self, remote_addr: SocketAddr) {
        let _ = self.inner.remote_addr.set(remote_addr);
        let mut state = self.inner.state.lock().unwrap();
        if *state == HandleState::Registered {
            *state = HandleState::Active;
        }
    }

    /// The endpoint this handle is connected to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// The resolved remote address, if the handle has been activated.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr.get().copied()
    }

    /// The current lifecycle state.
    pub fn state(&self) -> HandleState {
        *self.inner.state.lock().unwrap()
    }

    /// Check if the handle is usable for sends.
    pub fn is_active(&self) -> bool {
        self.state() == HandleState::Active
    }

    /// Check if the handle has been closed.
    pub fn is_closed(&self) -> bool {
        self.state() == HandleState::Closed
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    /// Suspend until the handle reaches the `Closed` state.
    pub(crate) async fn closed(&self) {
        self.inner
            .closed_signal
            .wait_until(|| self.is_closed())
            .await;
    }

    /// Write a payload to the connection and flush it.
    ///
    /// Framing is the protocol layer's concern; the bytes are written as
    /// given.
    pub async fn send(&self, payload: Bytes) -> Result<()> {
        match self.state() {
            HandleState::Active => {}
            HandleState::Registered => {
                return Err(PoolError::NotActive(self.inner.endpoint.clone()));
            }
            HandleState::Closed => {
                return Err(PoolError::ConnectionClosed(self.inner.endpoint.clone()));
            }
        }

        let mut guard = self.inner.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| PoolError::ConnectionClosed(self.inner.endpoint.clone()))?;
        writer.write_all(&payload).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Flush pending writes and tear down the connection.
    ///
    /// Closing an already-closed handle is a no-op.
    pub async fn close(&self) {
        if self.begin_close() {
            self.finish_close().await;
        }
    }

    /// Close without waiting for the teardown I/O to complete.
    ///
    /// The state transition to `Closed` happens synchronously; the flush and
    /// socket shutdown run on a background task.
    pub(crate) fn close_detached(&self) {
        if self.begin_close() {
            let handle = self.clone();
            self.inner
                .runtime
                .spawn(async move { handle.finish_close().await });
        }
    }

    /// Transition to `Closed`. Returns false if already closed.
    fn begin_close(&self) -> bool {
        let mut state = self.inner.state.lock().unwrap();
        if *state == HandleState::Closed {
            return false;
        }
        *state = HandleState::Closed;
        drop(state);
        debug!("closing connection to {}", self.inner.endpoint);
        self.inner.closed_signal.signal_available();
        true
    }

    async fn finish_close(&self) {
        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            // Teardown errors are uninteresting; the peer may already be gone.
            let _ = writer.flush().await;
            let _ = writer.shutdown().await;
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("endpoint", &self.inner.endpoint)
            .field("remote_addr", &self.remote_addr())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn loopback_handle() -> (ConnectionHandle, OwnedReadHalf, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        let peer = client.peer_addr().unwrap();
        let endpoint = Endpoint::new("127.0.0.1", addr.port());
        let (handle, read_half) = ConnectionHandle::establish(endpoint, client).unwrap();
        (handle, read_half, server, peer)
    }

    #[tokio::test]
    async fn test_establish_then_activate() {
        let (handle, _read, _server, peer) = loopback_handle().await;

        assert_eq!(handle.state(), HandleState::Registered);
        assert_eq!(handle.remote_addr(), None);

        handle.activate(peer);
        assert_eq!(handle.state(), HandleState::Active);
        assert_eq!(handle.remote_addr(), Some(peer));
        assert!(handle.is_active());
    }

    #[tokio::test]
    async fn test_send_before_activation_fails() {
        let (handle, _read, _server, _peer) = loopback_handle().await;

        let err = handle.send(Bytes::from_static(b"ping")).await.unwrap_err();
        assert!(matches!(err, PoolError::NotActive(_)));
    }

    #[tokio::test]
    async fn test_send_delivers_bytes() {
        let (handle, _read, mut server, peer) = loopback_handle().await;
        handle.activate(peer);

        handle.send(Bytes::from_static(b"ping")).await.unwrap();

        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (handle, _read, _server, peer) = loopback_handle().await;
        handle.activate(peer);

        handle.close().await;
        assert!(handle.is_closed());
        handle.close().await;
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (handle, _read, _server, peer) = loopback_handle().await;
        handle.activate(peer);
        handle.close().await;

        let err = handle.send(Bytes::from_static(b"ping")).await.unwrap_err();
        assert!(matches!(err, PoolError::ConnectionClosed(_)));
    }

    #[tokio::test]
    async fn test_activate_after_close_stays_closed() {
        let (handle, _read, _server, peer) = loopback_handle().await;
        handle.close().await;
        handle.activate(peer);
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let (handle, _read, _server, peer) = loopback_handle().await;
        let clone = handle.clone();

        handle.activate(peer);
        assert!(clone.is_active());
        assert_eq!(clone.id(), handle.id());

        clone.close().await;
        assert!(handle.is_closed());
    }
}
