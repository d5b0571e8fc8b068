//! Queue configuration

use std::time::Duration;

use ember_core::{Error, Result};

/// Command queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Wait between attempts to enqueue into a full completion FIFO
    pub notify_retry_interval: Duration,
    /// Attempts before the completion worker is declared unresponsive
    pub notify_max_retries: u32,
    /// Timeout of a single device wait; timeouts are retried
    pub device_wait_timeout: Duration,
    /// Finish after every enqueued operation
    pub serialized_execution: bool,
    /// Completion worker thread name
    pub worker_name: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            notify_retry_interval: Duration::from_millis(500),
            notify_max_retries: 20,
            device_wait_timeout: Duration::from_secs(1),
            serialized_execution: false,
            worker_name: None,
        }
    }
}

impl QueueConfig {
    /// Longest a producer blocks on a full completion FIFO
    pub fn notify_budget(&self) -> Duration {
        self.notify_retry_interval * self.notify_max_retries
    }

    /// Reject configurations the queue cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.notify_retry_interval.is_zero() || self.device_wait_timeout.is_zero() {
            return Err(Error::InvalidParameter);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budget() {
        let config = QueueConfig::default();
        assert_eq!(config.notify_budget(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_intervals_rejected() {
        let config = QueueConfig {
            device_wait_timeout: Duration::ZERO,
            ..QueueConfig::default()
        };
        assert_eq!(config.validate(), Err(Error::InvalidParameter));
    }
}
