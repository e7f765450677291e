//! Dispatcher configuration with builder-style construction and
//! validation.

use std::time::Duration;

use crate::DispatchError;

/// Configuration for a [`Dispatcher`](crate::Dispatcher).
///
/// Construct through [`DispatchConfig::builder`]; `build` validates the
/// full set before any threads are spawned.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of page-replay workers to spawn.
    pub page_workers: usize,
    /// Per-worker queue capacity. Must be a power of two.
    pub queue_capacity: usize,
    /// Pool sizing multiplier: capacity is
    /// `(page_workers + 1) * queue_capacity * fanout_ratio`.
    pub fanout_ratio: usize,
    /// Records dispatched before pending buffers are flushed to the
    /// worker queues.
    pub pending_max: u32,
    /// Hot-standby mode: queries run during replay, so batching drops to
    /// the minimum and snapshot-changing records force full syncs.
    pub hot_standby: bool,
    /// Route by individual block when true, by whole relation otherwise.
    pub page_level_routing: bool,
    /// How long startup waits for workers to report ready.
    pub ready_timeout: Duration,
    /// Poll interval of the readiness barrier.
    pub ready_poll_interval: Duration,
    /// How long shutdown waits for workers to exit.
    pub shutdown_timeout: Duration,
    /// Blocking waits log a warning every this many backoff iterations.
    pub stall_warn_every: u64,
}

impl DispatchConfig {
    /// Starts building a configuration.
    #[must_use]
    pub fn builder() -> DispatchConfigBuilder {
        DispatchConfigBuilder::default()
    }

    /// Item pool capacity implied by this configuration.
    #[must_use]
    pub fn pool_capacity(&self) -> u32 {
        ((self.page_workers + 1) * self.queue_capacity * self.fanout_ratio) as u32
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidConfig`] naming the first violated
    /// constraint.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.page_workers == 0 {
            return Err(DispatchError::InvalidConfig(
                "page_workers must be at least 1".into(),
            ));
        }
        if self.queue_capacity < 2 || !self.queue_capacity.is_power_of_two() {
            return Err(DispatchError::InvalidConfig(format!(
                "queue_capacity must be a power of two >= 2, got {}",
                self.queue_capacity
            )));
        }
        if self.fanout_ratio == 0 {
            return Err(DispatchError::InvalidConfig(
                "fanout_ratio must be at least 1".into(),
            ));
        }
        if self.pending_max == 0 {
            return Err(DispatchError::InvalidConfig(
                "pending_max must be at least 1".into(),
            ));
        }
        if self.ready_timeout.is_zero() {
            return Err(DispatchError::InvalidConfig(
                "ready_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            page_workers: num_cpus::get().max(1),
            queue_capacity: 1024,
            fanout_ratio: 10,
            pending_max: 8,
            hot_standby: false,
            page_level_routing: true,
            ready_timeout: Duration::from_secs(10),
            ready_poll_interval: Duration::from_millis(1),
            shutdown_timeout: Duration::from_secs(30),
            stall_warn_every: 8192,
        }
    }
}

/// Builder for [`DispatchConfig`].
#[derive(Debug, Default)]
pub struct DispatchConfigBuilder {
    page_workers: Option<usize>,
    queue_capacity: Option<usize>,
    fanout_ratio: Option<usize>,
    pending_max: Option<u32>,
    hot_standby: bool,
    page_level_routing: Option<bool>,
    ready_timeout: Option<Duration>,
    ready_poll_interval: Option<Duration>,
    shutdown_timeout: Option<Duration>,
    stall_warn_every: Option<u64>,
}

impl DispatchConfigBuilder {
    /// Sets the number of page-replay workers.
    #[must_use]
    pub fn page_workers(mut self, n: usize) -> Self {
        self.page_workers = Some(n);
        self
    }

    /// Sets the per-worker queue capacity (power of two).
    #[must_use]
    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = Some(n);
        self
    }

    /// Sets the pool fan-out ratio.
    #[must_use]
    pub fn fanout_ratio(mut self, n: usize) -> Self {
        self.fanout_ratio = Some(n);
        self
    }

    /// Sets the pending-record flush threshold.
    #[must_use]
    pub fn pending_max(mut self, n: u32) -> Self {
        self.pending_max = Some(n);
        self
    }

    /// Enables hot-standby mode. Unless overridden, this also drops the
    /// pending threshold to 1 so standby queries never lag behind.
    #[must_use]
    pub fn hot_standby(mut self, on: bool) -> Self {
        self.hot_standby = on;
        self
    }

    /// Chooses block-level (true) or relation-level (false) routing.
    #[must_use]
    pub fn page_level_routing(mut self, on: bool) -> Self {
        self.page_level_routing = Some(on);
        self
    }

    /// Sets the readiness timeout.
    #[must_use]
    pub fn ready_timeout(mut self, t: Duration) -> Self {
        self.ready_timeout = Some(t);
        self
    }

    /// Sets the readiness poll interval.
    #[must_use]
    pub fn ready_poll_interval(mut self, t: Duration) -> Self {
        self.ready_poll_interval = Some(t);
        self
    }

    /// Sets the shutdown timeout.
    #[must_use]
    pub fn shutdown_timeout(mut self, t: Duration) -> Self {
        self.shutdown_timeout = Some(t);
        self
    }

    /// Sets the stall-warning cadence (backoff iterations per warning).
    #[must_use]
    pub fn stall_warn_every(mut self, n: u64) -> Self {
        self.stall_warn_every = Some(n);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidConfig`] when any constraint is
    /// violated.
    pub fn build(self) -> Result<DispatchConfig, DispatchError> {
        let defaults = DispatchConfig::default();
        let config = DispatchConfig {
            page_workers: self.page_workers.unwrap_or(defaults.page_workers),
            queue_capacity: self.queue_capacity.unwrap_or(defaults.queue_capacity),
            fanout_ratio: self.fanout_ratio.unwrap_or(defaults.fanout_ratio),
            pending_max: self
                .pending_max
                .unwrap_or(if self.hot_standby { 1 } else { defaults.pending_max }),
            hot_standby: self.hot_standby,
            page_level_routing: self.page_level_routing.unwrap_or(defaults.page_level_routing),
            ready_timeout: self.ready_timeout.unwrap_or(defaults.ready_timeout),
            ready_poll_interval: self
                .ready_poll_interval
                .unwrap_or(defaults.ready_poll_interval),
            shutdown_timeout: self.shutdown_timeout.unwrap_or(defaults.shutdown_timeout),
            stall_warn_every: self.stall_warn_every.unwrap_or(defaults.stall_warn_every),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(DispatchConfig::default().validate().is_ok());
    }

    #[test]
    fn builder_applies_overrides() {
        let config = DispatchConfig::builder()
            .page_workers(4)
            .queue_capacity(256)
            .fanout_ratio(2)
            .build()
            .unwrap();
        assert_eq!(config.page_workers, 4);
        assert_eq!(config.pool_capacity(), (4 + 1) * 256 * 2);
    }

    #[test]
    fn hot_standby_defaults_pending_to_one() {
        let config = DispatchConfig::builder().hot_standby(true).build().unwrap();
        assert_eq!(config.pending_max, 1);
        let config = DispatchConfig::builder()
            .hot_standby(true)
            .pending_max(4)
            .build()
            .unwrap();
        assert_eq!(config.pending_max, 4);
    }

    #[test]
    fn rejects_non_power_of_two_queue() {
        let err = DispatchConfig::builder().queue_capacity(100).build();
        assert!(matches!(err, Err(DispatchError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_zero_workers() {
        let err = DispatchConfig::builder().page_workers(0).build();
        assert!(matches!(err, Err(DispatchError::InvalidConfig(_))));
    }
}
