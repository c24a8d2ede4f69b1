//! Validated pool sizing and lifetime limits.

use std::time::Duration;

use vaultpool_core::ConfigError;
use vaultpool_core::config::PoolSection;

pub const DEFAULT_MAX_SIZE: usize = 10;
pub const DEFAULT_MIN_IDLE: usize = 5;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(1800);
pub const DEFAULT_LEAK_DETECTION_THRESHOLD: Duration = Duration::from_secs(60);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);

/// Pool configuration.
///
/// Only constructible through [`PoolConfigBuilder::build`] or
/// [`PoolConfig::from_section`], both of which reject invalid combinations
/// instead of clamping them. A zero `idle_timeout`, `max_lifetime` or
/// `leak_detection_threshold` disables that feature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    max_size: usize,
    min_idle: usize,
    connect_timeout: Duration,
    idle_timeout: Duration,
    max_lifetime: Duration,
    leak_detection_threshold: Duration,
    drain_timeout: Duration,
    maintenance_interval: Duration,
}

impl PoolConfig {
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }

    /// Build from the `[pool]` section, applying defaults for absent fields.
    pub fn from_section(section: Option<&PoolSection>) -> Result<Self, ConfigError> {
        let mut builder = Self::builder();
        let Some(section) = section else {
            return builder.build();
        };
        if let Some(v) = section.max_size {
            builder = builder.max_size(v);
        }
        if let Some(v) = section.min_idle {
            builder = builder.min_idle(v);
        }
        if let Some(ms) = section.connect_timeout_ms {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = section.idle_timeout_ms {
            builder = builder.idle_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = section.max_lifetime_ms {
            builder = builder.max_lifetime(Duration::from_millis(ms));
        }
        if let Some(ms) = section.leak_detection_threshold_ms {
            builder = builder.leak_detection_threshold(Duration::from_millis(ms));
        }
        if let Some(ms) = section.drain_timeout_ms {
            builder = builder.drain_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = section.maintenance_interval_ms {
            builder = builder.maintenance_interval(Duration::from_millis(ms));
        }
        builder.build()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn min_idle(&self) -> usize {
        self.min_idle
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn max_lifetime(&self) -> Duration {
        self.max_lifetime
    }

    pub fn leak_detection_threshold(&self) -> Duration {
        self.leak_detection_threshold
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    pub fn maintenance_interval(&self) -> Duration {
        self.maintenance_interval
    }

    /// A builder seeded with this configuration, for deriving a variant.
    pub fn to_builder(&self) -> PoolConfigBuilder {
        PoolConfigBuilder {
            config: self.clone(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            min_idle: DEFAULT_MIN_IDLE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_lifetime: DEFAULT_MAX_LIFETIME,
            leak_detection_threshold: DEFAULT_LEAK_DETECTION_THRESHOLD,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            maintenance_interval: DEFAULT_MAINTENANCE_INTERVAL,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.config.max_size = max_size;
        self
    }

    pub fn min_idle(mut self, min_idle: usize) -> Self {
        self.config.min_idle = min_idle;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.max_lifetime = lifetime;
        self
    }

    pub fn leak_detection_threshold(mut self, threshold: Duration) -> Self {
        self.config.leak_detection_threshold = threshold;
        self
    }

    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.config.maintenance_interval = interval;
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> Result<PoolConfig, ConfigError> {
        let c = self.config;
        if c.max_size == 0 {
            return Err(ConfigError::invalid("pool.max_size", "must be at least 1"));
        }
        if c.min_idle > c.max_size {
            return Err(ConfigError::invalid(
                "pool.min_idle",
                format!("{} exceeds max_size {}", c.min_idle, c.max_size),
            ));
        }
        if !c.max_lifetime.is_zero() && !c.idle_timeout.is_zero() && c.max_lifetime < c.idle_timeout
        {
            return Err(ConfigError::invalid(
                "pool.max_lifetime",
                format!(
                    "{:?} is shorter than idle_timeout {:?}",
                    c.max_lifetime, c.idle_timeout
                ),
            ));
        }
        if c.maintenance_interval.is_zero() {
            return Err(ConfigError::invalid(
                "pool.maintenance_interval",
                "must be greater than zero",
            ));
        }
        Ok(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_profile() {
        let config = PoolConfig::from_section(None).unwrap();
        assert_eq!(config.max_size(), 10);
        assert_eq!(config.min_idle(), 5);
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.idle_timeout(), Duration::from_secs(600));
        assert_eq!(config.max_lifetime(), Duration::from_secs(1800));
        assert_eq!(config.leak_detection_threshold(), Duration::from_secs(60));
    }

    #[test]
    fn rejects_zero_max_size() {
        let err = PoolConfig::builder().max_size(0).min_idle(0).build().unwrap_err();
        assert!(err.to_string().contains("pool.max_size"));
    }

    #[test]
    fn rejects_min_idle_above_max() {
        let err = PoolConfig::builder().max_size(2).min_idle(3).build().unwrap_err();
        assert!(err.to_string().contains("pool.min_idle"));
    }

    #[test]
    fn rejects_lifetime_shorter_than_idle_timeout() {
        let err = PoolConfig::builder()
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(60))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("pool.max_lifetime"));
    }

    #[test]
    fn zero_lifetime_disables_the_check() {
        let config = PoolConfig::builder()
            .max_lifetime(Duration::ZERO)
            .build()
            .unwrap();
        assert!(config.max_lifetime().is_zero());
    }

    #[test]
    fn from_section_overrides_fields() {
        let section = PoolSection {
            max_size: Some(4),
            min_idle: Some(1),
            connect_timeout_ms: Some(250),
            ..Default::default()
        };
        let config = PoolConfig::from_section(Some(&section)).unwrap();
        assert_eq!(config.max_size(), 4);
        assert_eq!(config.min_idle(), 1);
        assert_eq!(config.connect_timeout(), Duration::from_millis(250));
        assert_eq!(config.drain_timeout(), DEFAULT_DRAIN_TIMEOUT);
    }

    #[test]
    fn from_section_rejects_zero_maintenance_interval() {
        let section = PoolSection {
            maintenance_interval_ms: Some(0),
            ..Default::default()
        };
        assert!(PoolConfig::from_section(Some(&section)).is_err());
    }
}
