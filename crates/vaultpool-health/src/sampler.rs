//! Periodic pool health sampler.
//!
//! The sampler is read-only with respect to the pool. Each tick takes one
//! snapshot from its [`MetricsSource`], logs a summary line, and logs a
//! warning per threshold breach. Failures are logged and absorbed; the next
//! tick runs on schedule.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use vaultpool_pool::{PoolHandle, PoolMetricsSnapshot};

use crate::checks::{HealthFinding, evaluate};
use crate::settings::{SamplerConfig, SamplerControl, SamplerSettings};

/// Where the sampler reads metrics from.
pub trait MetricsSource: Send + Sync {
    fn snapshot(&self) -> Result<PoolMetricsSnapshot, String>;
}

/// Always samples the pool instance installed in the handle right now.
impl MetricsSource for PoolHandle {
    fn snapshot(&self) -> Result<PoolMetricsSnapshot, String> {
        Ok(self.current().metrics())
    }
}

/// One completed sample.
#[derive(Debug, Clone)]
pub struct Sample {
    pub snapshot: PoolMetricsSnapshot,
    pub findings: Vec<HealthFinding>,
}

pub struct PoolHealthSampler {
    source: Arc<dyn MetricsSource>,
    control: SamplerControl,
    settings_rx: watch::Receiver<SamplerSettings>,
    utilization_threshold: f64,
}

impl PoolHealthSampler {
    pub fn new(source: Arc<dyn MetricsSource>, config: SamplerConfig) -> Self {
        let control = SamplerControl::new(config.settings);
        let settings_rx = control.subscribe();
        Self {
            source,
            control,
            settings_rx,
            utilization_threshold: config.utilization_threshold,
        }
    }

    /// Handle for changing settings while the sampler runs.
    pub fn control(&self) -> SamplerControl {
        self.control.clone()
    }

    /// Take one sample and log it. Returns `None` if sampling failed.
    pub fn tick(&self) -> Option<Sample> {
        let snapshot = match self.source.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "failed to sample pool metrics");
                return None;
            }
        };

        info!(
            pool_id = snapshot.pool_id,
            state = %snapshot.state,
            total = snapshot.total,
            active = snapshot.active,
            idle = snapshot.idle,
            waiting = snapshot.waiting,
            "pool health"
        );
        debug!(
            pool_id = snapshot.pool_id,
            pending = snapshot.pending,
            max_size = snapshot.limits.max_size,
            min_idle = snapshot.limits.min_idle,
            utilization_pct = format_args!("{:.1}", snapshot.utilization() * 100.0),
            connect_timeout_ms = snapshot.limits.connect_timeout_ms,
            idle_timeout_ms = snapshot.limits.idle_timeout_ms,
            max_lifetime_ms = snapshot.limits.max_lifetime_ms,
            leak_detection_threshold_ms = snapshot.limits.leak_detection_threshold_ms,
            "pool health detail"
        );

        let findings = evaluate(&snapshot, self.utilization_threshold);
        for finding in &findings {
            if finding.is_critical() {
                error!(pool_id = snapshot.pool_id, finding = %finding, "pool health check failed");
            } else {
                warn!(pool_id = snapshot.pool_id, finding = %finding, "pool health warning");
            }
        }

        Some(Sample { snapshot, findings })
    }

    /// Run until `shutdown` flips (or its sender is dropped).
    ///
    /// Settings are re-read at the top of every iteration, so toggles and
    /// interval changes apply before the next scheduled tick. The next tick
    /// is due one interval after the previous one (or after start or
    /// re-enable), so an interval change moves the pending deadline instead
    /// of restarting the wait. A tick that has started always completes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let initial = *self.settings_rx.borrow();
        info!(
            enabled = initial.enabled,
            interval_secs = initial.interval_secs,
            "pool health sampler started"
        );

        let mut last_tick = Instant::now();
        let mut paused = false;

        loop {
            let settings = *self.settings_rx.borrow_and_update();

            if !settings.enabled {
                paused = true;
                tokio::select! {
                    changed = self.settings_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    _ = shutdown.changed() => break,
                }
            }
            if paused {
                paused = false;
                last_tick = Instant::now();
            }

            // Already past when the interval shrank below the time elapsed.
            let deadline = last_tick + settings.interval();
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    last_tick = Instant::now();
                    self.tick();
                }
                changed = self.settings_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    debug!("sampler settings changed, rescheduling");
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("pool health sampler stopped");
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

impl std::fmt::Debug for PoolHealthSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHealthSampler")
            .field("settings", &*self.settings_rx.borrow())
            .field("utilization_threshold", &self.utilization_threshold)
            .finish_non_exhaustive()
    }
}
