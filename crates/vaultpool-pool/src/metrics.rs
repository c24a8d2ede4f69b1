//! Point-in-time views of a pool: metrics snapshots, connection listings, and
//! reports returned by maintenance and shutdown operations.

use std::time::Duration;

use serde::Serialize;

use crate::config::PoolConfig;
use crate::pool::PoolState;

pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Configured limits, echoed in every snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PoolLimits {
    pub max_size: usize,
    pub min_idle: usize,
    pub connect_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub max_lifetime_ms: u64,
    pub leak_detection_threshold_ms: u64,
}

impl From<&PoolConfig> for PoolLimits {
    fn from(config: &PoolConfig) -> Self {
        Self {
            max_size: config.max_size(),
            min_idle: config.min_idle(),
            connect_timeout_ms: millis(config.connect_timeout()),
            idle_timeout_ms: millis(config.idle_timeout()),
            max_lifetime_ms: millis(config.max_lifetime()),
            leak_detection_threshold_ms: millis(config.leak_detection_threshold()),
        }
    }
}

/// Immutable read of pool accounting, taken under the pool lock.
///
/// `total` counts idle and in-use connections plus establishments still in
/// flight, so `active + idle <= total <= limits.max_size` always holds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PoolMetricsSnapshot {
    pub pool_id: u64,
    pub state: PoolState,
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub pending: usize,
    pub waiting: usize,
    pub limits: PoolLimits,
}

impl PoolMetricsSnapshot {
    /// Fraction of `max_size` currently leased out.
    pub fn utilization(&self) -> f64 {
        if self.limits.max_size == 0 {
            return 0.0;
        }
        self.active as f64 / self.limits.max_size as f64
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Idle,
    InUse,
    /// Leased, and will be closed instead of returned to idle on release.
    Retiring,
}

/// One connection as seen by [`ConnectionPool::connections`](crate::ConnectionPool::connections).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub id: u64,
    pub status: ConnectionStatus,
    pub age_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub held_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_id: Option<u64>,
    pub leak_suspected: bool,
}

/// Result of a successful [`ConnectionPool::test_connection`](crate::ConnectionPool::test_connection).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConnectionTest {
    pub pool_id: u64,
    pub connection_id: u64,
    pub elapsed_ms: u64,
}

/// What one maintenance pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub idle_expired: usize,
    pub lifetime_expired: usize,
    pub marked_retiring: usize,
    pub leaks_detected: usize,
    pub replenished: usize,
}

impl SweepReport {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EvictReport {
    pub idle_closed: usize,
    pub marked_retiring: usize,
}

/// Outcome of waiting for leased connections after close.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Connections still leased when the drain timeout expired. They stay
    /// valid and are closed when their holders release them.
    pub abandoned: usize,
    pub waited_ms: u64,
}
