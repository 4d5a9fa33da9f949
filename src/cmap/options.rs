//! Connection pool configuration.

use std::time::Duration;

use crate::error::{Error, Result};

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// Connections the maintenance worker keeps open.
    pub min_size: usize,
    /// Upper bound on open connections, idle and checked out.
    pub max_size: usize,
    /// How many threads may wait for a connection at once.
    pub wait_queue_size: usize,
    /// How long an acquire waits before failing.
    pub wait_queue_timeout: Duration,
    /// Connections older than this are retired.
    pub max_connection_lifetime: Duration,
    /// Idle connections unused for this long are retired while the pool is above its minimum.
    pub max_idle_time: Duration,
    /// Period of the maintenance worker.
    pub maintenance_interval: Duration,
    /// Pause after a failed warm-up attempt.
    pub warm_up_backoff: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 100,
            wait_queue_size: 500,
            wait_queue_timeout: Duration::from_secs(120),
            max_connection_lifetime: Duration::from_secs(30 * 60),
            max_idle_time: Duration::from_secs(10 * 60),
            maintenance_interval: Duration::from_secs(10),
            warm_up_backoff: Duration::from_secs(1),
        }
    }
}

impl PoolSettings {
    pub fn builder() -> PoolSettingsBuilder {
        PoolSettingsBuilder::new()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::invalid_argument("max pool size must be positive"));
        }
        if self.min_size > self.max_size {
            return Err(Error::invalid_argument(format!(
                "min pool size {} exceeds max pool size {}",
                self.min_size, self.max_size
            )));
        }
        if self.maintenance_interval.is_zero() {
            return Err(Error::invalid_argument(
                "maintenance interval must be positive",
            ));
        }
        Ok(())
    }
}

/// Builder for [`PoolSettings`].
#[derive(Debug, Default)]
pub struct PoolSettingsBuilder {
    settings: PoolSettings,
}

impl PoolSettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_size(mut self, size: usize) -> Self {
        self.settings.min_size = size;
        self
    }

    pub fn max_size(mut self, size: usize) -> Self {
        self.settings.max_size = size;
        self
    }

    pub fn wait_queue_size(mut self, size: usize) -> Self {
        self.settings.wait_queue_size = size;
        self
    }

    /// Sets the wait queue size to `multiple` times the current max size.
    pub fn wait_queue_multiple(mut self, multiple: f64) -> Self {
        self.settings.wait_queue_size = (multiple * self.settings.max_size as f64) as usize;
        self
    }

    pub fn wait_queue_timeout(mut self, timeout: Duration) -> Self {
        self.settings.wait_queue_timeout = timeout;
        self
    }

    pub fn max_connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.settings.max_connection_lifetime = lifetime;
        self
    }

    pub fn max_idle_time(mut self, idle: Duration) -> Self {
        self.settings.max_idle_time = idle;
        self
    }

    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.settings.maintenance_interval = interval;
        self
    }

    pub fn warm_up_backoff(mut self, backoff: Duration) -> Self {
        self.settings.warm_up_backoff = backoff;
        self
    }

    /// Validates and returns the settings.
    pub fn build(self) -> Result<PoolSettings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}
