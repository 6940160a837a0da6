//! Coordinator tuning knobs.

use std::time::Duration;

/// Timing and retry settings shared by the workers. The defaults suit an
/// in-process deployment; tests shrink the intervals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// How often the outbox worker scans for pending rows.
    pub drain_interval: Duration,
    /// How long a writer waits on a contended auction before giving up
    /// with a conflict.
    pub lock_timeout: Duration,
    /// Deliveries per message before the inbox dead-letters it.
    pub max_delivery_attempts: u32,
    /// Pause after a nack before the consumer polls again.
    pub redelivery_delay: Duration,
    /// How often the lifecycle driver looks for due auctions.
    pub lifecycle_tick: Duration,
    /// Pause between catch-up retries while the source is unreachable.
    pub catch_up_backoff: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            drain_interval: Duration::from_millis(100),
            lock_timeout: Duration::from_secs(5),
            max_delivery_attempts: 5,
            redelivery_delay: Duration::from_millis(100),
            lifecycle_tick: Duration::from_secs(1),
            catch_up_backoff: Duration::from_secs(1),
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval = interval;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_max_delivery_attempts(mut self, attempts: u32) -> Self {
        self.max_delivery_attempts = attempts;
        self
    }

    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }

    pub fn with_lifecycle_tick(mut self, tick: Duration) -> Self {
        self.lifecycle_tick = tick;
        self
    }

    pub fn with_catch_up_backoff(mut self, backoff: Duration) -> Self {
        self.catch_up_backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = CoordinatorConfig::new()
            .with_drain_interval(Duration::from_millis(10))
            .with_max_delivery_attempts(3);

        assert_eq!(config.drain_interval, Duration::from_millis(10));
        assert_eq!(config.max_delivery_attempts, 3);
        assert_eq!(config.lock_timeout, CoordinatorConfig::default().lock_timeout);
    }
}
