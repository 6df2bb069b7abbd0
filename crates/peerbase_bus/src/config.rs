//! Event bus configuration.

use crate::error::{BusError, BusResult};
use std::time::Duration;

/// Configuration for an [`EventBus`](crate::EventBus).
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Ring buffer capacity. Must be a power of two so index wraparound
    /// stays a bitmask operation.
    pub ring_capacity: usize,

    /// Number of dispatch worker tasks.
    pub worker_count: usize,

    /// Capacity of the shared broadcast stream. Lagging subscribers lose
    /// the oldest events rather than blocking the dispatch workers.
    pub stream_capacity: usize,

    /// Fixed backoff between insertion retries while the ring is full.
    pub publish_retry: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 1024,
            worker_count: 4,
            stream_capacity: 1024,
            publish_retry: Duration::from_millis(1),
        }
    }
}

impl BusConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the ring buffer capacity.
    #[must_use]
    pub const fn ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity;
        self
    }

    /// Sets the number of dispatch workers.
    #[must_use]
    pub const fn worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    /// Sets the shared stream capacity.
    #[must_use]
    pub const fn stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity;
        self
    }

    /// Sets the publish retry backoff.
    #[must_use]
    pub const fn publish_retry(mut self, backoff: Duration) -> Self {
        self.publish_retry = backoff;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the ring capacity is zero or not a power of
    /// two, or if any pool/stream size is zero.
    pub fn validate(&self) -> BusResult<()> {
        if self.ring_capacity == 0 || !self.ring_capacity.is_power_of_two() {
            return Err(BusError::invalid_config(format!(
                "ring capacity must be a non-zero power of two, got {}",
                self.ring_capacity
            )));
        }
        if self.worker_count == 0 {
            return Err(BusError::invalid_config("worker count must be at least 1"));
        }
        if self.stream_capacity == 0 {
            return Err(BusError::invalid_config(
                "stream capacity must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = BusConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ring_capacity, 1024);
        assert_eq!(config.worker_count, 4);
    }

    #[test]
    fn builder_pattern() {
        let config = BusConfig::new()
            .ring_capacity(256)
            .worker_count(2)
            .stream_capacity(64);

        assert!(config.validate().is_ok());
        assert_eq!(config.ring_capacity, 256);
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.stream_capacity, 64);
    }

    #[test]
    fn rejects_non_power_of_two_capacity() {
        let config = BusConfig::new().ring_capacity(1000);
        assert!(matches!(
            config.validate(),
            Err(BusError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn rejects_zero_workers() {
        let config = BusConfig::new().worker_count(0);
        assert!(config.validate().is_err());
    }
}
