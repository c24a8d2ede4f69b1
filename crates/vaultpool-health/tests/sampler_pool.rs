//! The sampler against a real pool behind a `PoolHandle`.

use std::sync::Arc;
use std::time::Duration;

use vaultpool_credentials::Credentials;
use vaultpool_health::{HealthFinding, MetricsSource, PoolHealthSampler, SamplerConfig};
use vaultpool_pool::{
    ConnectionBackend, ConnectionFactory, ConnectionPool, PoolConfig, PoolHandle, PoolState,
};

#[derive(Debug)]
struct NullBackend;

impl ConnectionBackend for NullBackend {
    fn ping(&mut self) -> bool {
        true
    }

    fn close(&mut self) {}
}

struct NullFactory;

impl ConnectionFactory for NullFactory {
    fn connect(
        &self,
        _credentials: &Credentials,
        _timeout: Duration,
    ) -> Result<Box<dyn ConnectionBackend>, String> {
        Ok(Box::new(NullBackend))
    }
}

async fn open(max_size: usize) -> Arc<ConnectionPool> {
    let config = PoolConfig::builder()
        .max_size(max_size)
        .min_idle(0)
        .drain_timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    ConnectionPool::open(
        config,
        Credentials::new("postgresql://db.internal:5432/app", "app", "pw", "postgresql"),
        Arc::new(NullFactory),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn sampler_follows_the_current_pool_after_swap() {
    let first = open(10).await;
    let handle = PoolHandle::new(Arc::clone(&first));
    let sampler = PoolHealthSampler::new(Arc::new(handle.clone()), SamplerConfig::default());

    assert_eq!(sampler.tick().unwrap().snapshot.pool_id, first.id());

    let second = open(10).await;
    let second_id = second.id();
    handle.swap(second);
    first.close().await;

    let sample = sampler.tick().unwrap();
    assert_eq!(sample.snapshot.pool_id, second_id);
    assert_eq!(sample.snapshot.state, PoolState::Running);
}

#[tokio::test]
async fn high_utilization_is_reported_from_live_counts() {
    let pool = open(10).await;
    let handle = PoolHandle::new(Arc::clone(&pool));

    let mut leases = Vec::new();
    for _ in 0..9 {
        leases.push(handle.lease(Duration::from_millis(200)).await.unwrap());
    }
    let snapshot = handle.snapshot().unwrap();
    assert_eq!(snapshot.active, 9);

    let sampler = PoolHealthSampler::new(Arc::new(handle.clone()), SamplerConfig::default());
    let findings = sampler.tick().unwrap().findings;
    assert!(
        findings
            .iter()
            .any(|f| matches!(f, HealthFinding::HighUtilization { active: 9, .. }))
    );

    leases.truncate(7);
    let findings = sampler.tick().unwrap().findings;
    assert!(
        !findings
            .iter()
            .any(|f| matches!(f, HealthFinding::HighUtilization { .. })),
        "unexpected findings {findings:?}"
    );
}

#[tokio::test]
async fn closed_pool_is_reported_as_critical() {
    let pool = open(2).await;
    let handle = PoolHandle::new(Arc::clone(&pool));
    pool.close().await;

    let sampler = PoolHealthSampler::new(Arc::new(handle), SamplerConfig::default());
    let findings = sampler.tick().unwrap().findings;
    assert_eq!(findings, vec![HealthFinding::Closed]);
}
