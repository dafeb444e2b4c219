//! Connection manager configuration.

use std::time::Duration;

/// Configuration for a [`ConnectionManager`](super::ConnectionManager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Number of worker tasks performing connect dispatch.
    pub worker_count: usize,
    /// Capacity of the connect dispatch queue. A full queue rejects
    /// further dispatches instead of blocking.
    pub queue_capacity: usize,
    /// Fixed delay before retrying a failed or lost connection.
    pub retry_delay: Duration,
    /// Timeout for a single connect attempt.
    pub connect_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            worker_count: 16,
            queue_capacity: 1024,
            retry_delay: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ManagerConfig {
    /// Set the worker task count.
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    /// Set the dispatch queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.worker_count, 16);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.retry_delay, Duration::from_secs(3));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_builder() {
        let config = ManagerConfig::default()
            .with_worker_count(2)
            .with_queue_capacity(8)
            .with_retry_delay(Duration::from_millis(50))
            .with_connect_timeout(Duration::from_secs(1));

        assert_eq!(config.worker_count, 2);
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.retry_delay, Duration::from_millis(50));
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_builder_floors_zero() {
        let config = ManagerConfig::default()
            .with_worker_count(0)
            .with_queue_capacity(0);
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.queue_capacity, 1);
    }
}
