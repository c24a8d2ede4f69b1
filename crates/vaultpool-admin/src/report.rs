//! Aggregate health report.

use serde::Serialize;

use vaultpool_credentials::SecretStoreStatus;
use vaultpool_pool::{PoolMetricsSnapshot, PoolState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    Up,
    Degraded,
    Down,
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverallStatus::Up => write!(f, "UP"),
            OverallStatus::Degraded => write!(f, "DEGRADED"),
            OverallStatus::Down => write!(f, "DOWN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub pool: PoolMetricsSnapshot,
    pub secret_store: SecretStoreStatus,
    pub status: OverallStatus,
}

impl HealthReport {
    pub fn new(pool: PoolMetricsSnapshot, secret_store: SecretStoreStatus) -> Self {
        let status = overall_status(pool.state, &secret_store);
        Self {
            pool,
            secret_store,
            status,
        }
    }
}

/// A closed pool is down. A suspended pool, or a running one whose enabled
/// secret store cannot be read, is degraded. A disabled store counts as up.
pub fn overall_status(state: PoolState, secret_store: &SecretStoreStatus) -> OverallStatus {
    match state {
        PoolState::Closed => OverallStatus::Down,
        PoolState::Suspended => OverallStatus::Degraded,
        PoolState::Running if secret_store.enabled && !secret_store.accessible => {
            OverallStatus::Degraded
        }
        PoolState::Running => OverallStatus::Up,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(enabled: bool, accessible: bool) -> SecretStoreStatus {
        SecretStoreStatus {
            enabled,
            accessible,
            path: "secret/postgres-db".to_string(),
        }
    }

    #[test]
    fn status_table() {
        let cases = [
            (PoolState::Running, store(true, true), OverallStatus::Up),
            (PoolState::Running, store(false, false), OverallStatus::Up),
            (PoolState::Running, store(true, false), OverallStatus::Degraded),
            (PoolState::Suspended, store(true, true), OverallStatus::Degraded),
            (PoolState::Closed, store(true, true), OverallStatus::Down),
            (PoolState::Closed, store(true, false), OverallStatus::Down),
        ];
        for (state, secret_store, expected) in cases {
            assert_eq!(
                overall_status(state, &secret_store),
                expected,
                "{state} with {secret_store:?}"
            );
        }
    }

    #[test]
    fn status_serializes_upper_case() {
        assert_eq!(
            serde_json::to_string(&OverallStatus::Degraded).unwrap(),
            "\"DEGRADED\""
        );
    }
}
