//! Threshold predicates over a pool metrics snapshot.

use serde::Serialize;

use vaultpool_pool::{PoolMetricsSnapshot, PoolState};

/// A threshold breach found in one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HealthFinding {
    /// Every slot is taken: new callers wait or time out.
    Exhausted { total: usize, max_size: usize },
    HighUtilization {
        active: usize,
        max_size: usize,
        percent: f64,
    },
    /// Callers are currently blocked in `acquire`.
    Contention { waiting: usize },
    Closed,
}

impl HealthFinding {
    /// Whether this finding is logged at error rather than warn level.
    pub fn is_critical(&self) -> bool {
        matches!(self, HealthFinding::Closed)
    }
}

impl std::fmt::Display for HealthFinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthFinding::Exhausted { total, max_size } => {
                write!(f, "pool exhausted ({total}/{max_size} connections)")
            }
            HealthFinding::HighUtilization {
                active,
                max_size,
                percent,
            } => write!(
                f,
                "high pool utilization: {percent:.1}% ({active}/{max_size} in use)"
            ),
            HealthFinding::Contention { waiting } => {
                write!(f, "{waiting} caller(s) waiting for a connection")
            }
            HealthFinding::Closed => write!(f, "pool is closed"),
        }
    }
}

/// Evaluate all predicates against `snapshot`.
///
/// `utilization_threshold` is a fraction of `max_size`; utilization must be
/// strictly above it to warn.
pub fn evaluate(snapshot: &PoolMetricsSnapshot, utilization_threshold: f64) -> Vec<HealthFinding> {
    let max_size = snapshot.limits.max_size;
    let mut findings = Vec::new();

    if snapshot.state == PoolState::Closed {
        findings.push(HealthFinding::Closed);
    }
    if snapshot.total >= max_size {
        findings.push(HealthFinding::Exhausted {
            total: snapshot.total,
            max_size,
        });
    }
    let utilization = snapshot.utilization();
    if utilization > utilization_threshold {
        findings.push(HealthFinding::HighUtilization {
            active: snapshot.active,
            max_size,
            percent: utilization * 100.0,
        });
    }
    if snapshot.waiting > 0 {
        findings.push(HealthFinding::Contention {
            waiting: snapshot.waiting,
        });
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultpool_pool::PoolLimits;

    fn snapshot(total: usize, active: usize, waiting: usize, state: PoolState) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            pool_id: 1,
            state,
            total,
            active,
            idle: total - active,
            pending: 0,
            waiting,
            limits: PoolLimits {
                max_size: 10,
                min_idle: 5,
                connect_timeout_ms: 30_000,
                idle_timeout_ms: 600_000,
                max_lifetime_ms: 1_800_000,
                leak_detection_threshold_ms: 60_000,
            },
        }
    }

    #[test]
    fn nine_of_ten_active_warns_high_utilization() {
        let findings = evaluate(&snapshot(9, 9, 0, PoolState::Running), 0.80);
        assert_eq!(findings.len(), 1);
        match &findings[0] {
            HealthFinding::HighUtilization { active, percent, .. } => {
                assert_eq!(*active, 9);
                assert!((percent - 90.0).abs() < 1e-9);
            }
            other => panic!("unexpected finding {other:?}"),
        }
    }

    #[test]
    fn seven_of_ten_active_is_quiet() {
        assert!(evaluate(&snapshot(7, 7, 0, PoolState::Running), 0.80).is_empty());
    }

    #[test]
    fn exactly_at_threshold_is_quiet() {
        assert!(evaluate(&snapshot(8, 8, 0, PoolState::Running), 0.80).is_empty());
    }

    #[test]
    fn full_pool_with_waiters_reports_everything() {
        let findings = evaluate(&snapshot(10, 10, 3, PoolState::Running), 0.80);
        assert!(findings.contains(&HealthFinding::Exhausted {
            total: 10,
            max_size: 10
        }));
        assert!(findings.contains(&HealthFinding::Contention { waiting: 3 }));
        assert!(
            findings
                .iter()
                .any(|f| matches!(f, HealthFinding::HighUtilization { .. }))
        );
    }

    #[test]
    fn closed_pool_is_critical() {
        let findings = evaluate(&snapshot(0, 0, 0, PoolState::Closed), 0.80);
        assert_eq!(findings, vec![HealthFinding::Closed]);
        assert!(findings[0].is_critical());
    }

    #[test]
    fn display_is_human_readable() {
        let finding = HealthFinding::HighUtilization {
            active: 9,
            max_size: 10,
            percent: 90.0,
        };
        assert_eq!(
            finding.to_string(),
            "high pool utilization: 90.0% (9/10 in use)"
        );
    }
}
