//! Sampler settings and the live control handle.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

use vaultpool_core::config::SamplerSection;

/// Shortest accepted sampling interval.
pub const MIN_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_UTILIZATION_THRESHOLD: f64 = 0.80;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SamplerError {
    #[error("sampling interval must be at least {min_secs}s (got {requested_secs}s)")]
    IntervalTooShort { requested_secs: u64, min_secs: u64 },

    #[error("utilization threshold must be within (0, 1] (got {0})")]
    InvalidThreshold(f64),
}

/// What the sampler reads at the top of every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SamplerSettings {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl SamplerSettings {
    pub fn new(enabled: bool, interval_secs: u64) -> Result<Self, SamplerError> {
        validate_interval(interval_secs)?;
        Ok(Self {
            enabled,
            interval_secs,
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: DEFAULT_INTERVAL_SECS,
        }
    }
}

fn validate_interval(secs: u64) -> Result<(), SamplerError> {
    if secs < MIN_INTERVAL_SECS {
        return Err(SamplerError::IntervalTooShort {
            requested_secs: secs,
            min_secs: MIN_INTERVAL_SECS,
        });
    }
    Ok(())
}

/// Sampler construction parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerConfig {
    pub settings: SamplerSettings,
    /// Fraction of `max_size` in use above which a warning is logged.
    pub utilization_threshold: f64,
}

impl SamplerConfig {
    /// Build from the `[sampler]` section, applying defaults.
    pub fn from_section(section: Option<&SamplerSection>) -> Result<Self, SamplerError> {
        let section = section.cloned().unwrap_or_default();
        let settings = SamplerSettings::new(
            section.enabled.unwrap_or(true),
            section.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS),
        )?;
        let utilization_threshold = section
            .utilization_threshold
            .unwrap_or(DEFAULT_UTILIZATION_THRESHOLD);
        if !(utilization_threshold > 0.0 && utilization_threshold <= 1.0) {
            return Err(SamplerError::InvalidThreshold(utilization_threshold));
        }
        Ok(Self {
            settings,
            utilization_threshold,
        })
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            settings: SamplerSettings::default(),
            utilization_threshold: DEFAULT_UTILIZATION_THRESHOLD,
        }
    }
}

/// Cloneable handle for changing sampler settings while it runs.
///
/// Changes are published on a `watch` channel; the sampler picks them up
/// before its next scheduled tick without being restarted. Writing the value
/// already in effect publishes nothing.
#[derive(Clone, Debug)]
pub struct SamplerControl {
    tx: Arc<watch::Sender<SamplerSettings>>,
}

impl SamplerControl {
    pub fn new(settings: SamplerSettings) -> Self {
        let (tx, _) = watch::channel(settings);
        Self { tx: Arc::new(tx) }
    }

    pub fn settings(&self) -> SamplerSettings {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SamplerSettings> {
        self.tx.subscribe()
    }

    /// Enable or disable sampling. Returns the settings now in effect.
    pub fn set_enabled(&self, enabled: bool) -> SamplerSettings {
        let changed = self.tx.send_if_modified(|s| {
            if s.enabled == enabled {
                return false;
            }
            s.enabled = enabled;
            true
        });
        if changed {
            info!(enabled, "pool health sampler toggled");
        } else {
            debug!(enabled, "pool health sampler already in requested state");
        }
        self.settings()
    }

    /// Change the sampling period. Intervals below the floor are rejected.
    pub fn set_interval_secs(&self, secs: u64) -> Result<SamplerSettings, SamplerError> {
        validate_interval(secs)?;
        let changed = self.tx.send_if_modified(|s| {
            if s.interval_secs == secs {
                return false;
            }
            s.interval_secs = secs;
            true
        });
        if changed {
            info!(interval_secs = secs, "pool health sampler interval changed");
        }
        Ok(self.settings())
    }
}
