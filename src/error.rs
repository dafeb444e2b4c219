//! Error types for connection pool operations.

use crate::endpoint::Endpoint;
use std::io;
use thiserror::Error;

/// Errors that can occur while managing pooled connections.
#[derive(Error, Debug)]
pub enum PoolError {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An address string that could not be parsed into an endpoint.
    #[error("malformed endpoint {input:?}: {reason}")]
    MalformedEndpoint {
        input: String,
        reason: &'static str,
    },

    /// The bounded connect dispatch queue is saturated.
    #[error("connect dispatch queue is full, rejected {0}")]
    DispatchQueueFull(Endpoint),

    /// The handle has not been activated yet.
    #[error("connection to {0} is not active")]
    NotActive(Endpoint),

    /// The handle has been closed.
    #[error("connection to {0} is closed")]
    ConnectionClosed(Endpoint),

    /// Connect attempt timed out.
    #[error("connect attempt timed out")]
    ConnectTimeout,

    /// The manager has been shut down.
    #[error("connection manager is shut down")]
    Shutdown,
}

/// Result type alias for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PoolError::MalformedEndpoint {
            input: "bad-entry".to_string(),
            reason: "missing ':' separator",
        };
        assert_eq!(
            format!("{err}"),
            "malformed endpoint \"bad-entry\": missing ':' separator"
        );

        let err = PoolError::DispatchQueueFull(Endpoint::new("10.0.0.1", 9000));
        assert_eq!(
            format!("{err}"),
            "connect dispatch queue is full, rejected 10.0.0.1:9000"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "test");
        let err: PoolError = io_err.into();
        assert!(matches!(err, PoolError::Io(_)));
    }
}
