//! vaultpool-health: periodic, read-only sampling of pool metrics.
//!
//! ```text
//! PoolHealthSampler::run (every interval_secs, while enabled)
//!   ├── MetricsSource::snapshot()      (PoolHandle: whatever pool is current)
//!   ├── info:  pool_id, state, total, active, idle, waiting
//!   ├── debug: pending, limits, utilization
//!   └── checks::evaluate → warn per finding (error if the pool is closed)
//!
//! SamplerControl ── watch ──► sampler   (enable/disable, interval >= 5s)
//! ```

pub mod checks;
pub mod sampler;
pub mod settings;

pub use checks::{HealthFinding, evaluate};
pub use sampler::{MetricsSource, PoolHealthSampler, Sample};
pub use settings::{
    DEFAULT_INTERVAL_SECS, DEFAULT_UTILIZATION_THRESHOLD, MIN_INTERVAL_SECS, SamplerConfig,
    SamplerControl, SamplerError, SamplerSettings,
};
