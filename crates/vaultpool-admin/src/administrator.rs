//! Serialized administrative control over the live pool.
//!
//! Every mutation takes the administrator's ordering lock first. The lock
//! is a `tokio::sync::Mutex`, which grants access in FIFO order, so
//! concurrent commands observe one total order. Nothing here waits for a
//! connection to become available while holding that lock.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use vaultpool_credentials::{CredentialResolver, CredentialSource, Credentials};
use vaultpool_health::{SamplerControl, SamplerSettings};
use vaultpool_pool::{
    ConnectionFactory, ConnectionInfo, ConnectionPool, ConnectionTest, DrainReport, EvictReport,
    PoolConfig, PoolError, PoolHandle, PoolMetricsSnapshot, PoolState,
};

use crate::error::{AdminError, AdminResult};
use crate::report::HealthReport;
use crate::schema::{SchemaRunner, SchemaStatistics};

/// Where the replacement pool's credentials come from.
#[derive(Debug, Clone, Default)]
pub enum CredentialChange {
    /// Reuse the current pool's credentials.
    #[default]
    Keep,
    /// Resolve again (secret store at the current path, then fallback).
    Resolve,
    Replace(Credentials),
}

/// A request to rebuild the pool.
#[derive(Debug, Clone, Default)]
pub struct Reconfigure {
    /// New limits; `None` keeps the current ones.
    pub pool: Option<PoolConfig>,
    pub credentials: CredentialChange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconfigureReport {
    pub old_pool_id: u64,
    pub new_pool_id: u64,
    /// Set when credentials were resolved again.
    pub credential_source: Option<CredentialSource>,
    pub drain: DrainReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretPathChange {
    pub old_path: String,
    pub new_path: String,
}

pub struct PoolAdministrator {
    pool: PoolHandle,
    resolver: Arc<CredentialResolver>,
    factory: Arc<dyn ConnectionFactory>,
    sampler: SamplerControl,
    schema: Option<Arc<dyn SchemaRunner>>,
    ordering: Mutex<()>,
}

impl PoolAdministrator {
    pub fn new(
        pool: PoolHandle,
        resolver: Arc<CredentialResolver>,
        factory: Arc<dyn ConnectionFactory>,
        sampler: SamplerControl,
        schema: Option<Arc<dyn SchemaRunner>>,
    ) -> Self {
        Self {
            pool,
            resolver,
            factory,
            sampler,
            schema,
            ordering: Mutex::new(()),
        }
    }

    pub fn pool_handle(&self) -> &PoolHandle {
        &self.pool
    }

    // ── Read-only ───────────────────────────────────────────────────

    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.pool.current().metrics()
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.pool.current().connections()
    }

    /// Pool metrics plus secret store reachability, folded into one status.
    pub async fn health(&self) -> HealthReport {
        let secret_store = self.resolver.probe().await;
        HealthReport::new(self.metrics(), secret_store)
    }

    /// Lease, ping and release one connection.
    ///
    /// Runs outside the ordering lock because it may wait for a connection.
    pub async fn test_connection(&self) -> AdminResult<ConnectionTest> {
        let pool = self.pool.current();
        Ok(pool.test_connection().await?)
    }

    pub fn sampler_settings(&self) -> SamplerSettings {
        self.sampler.settings()
    }

    pub fn secret_path(&self) -> String {
        self.resolver.secret_path()
    }

    // ── Pool state ──────────────────────────────────────────────────

    pub async fn suspend(&self) -> AdminResult<()> {
        let _order = self.ordering.lock().await;
        self.pool.current().suspend()?;
        Ok(())
    }

    pub async fn resume(&self) -> AdminResult<()> {
        let _order = self.ordering.lock().await;
        self.pool.current().resume()?;
        Ok(())
    }

    pub async fn soft_evict(&self) -> AdminResult<EvictReport> {
        let _order = self.ordering.lock().await;
        let pool = self.pool.current();
        if pool.state() == PoolState::Closed {
            return Err(PoolError::Closed.into());
        }
        Ok(pool.soft_evict())
    }

    // ── Sampler ─────────────────────────────────────────────────────

    pub async fn set_sampler_enabled(&self, enabled: bool) -> AdminResult<SamplerSettings> {
        let _order = self.ordering.lock().await;
        Ok(self.sampler.set_enabled(enabled))
    }

    pub async fn set_sampler_interval_secs(&self, secs: u64) -> AdminResult<SamplerSettings> {
        let _order = self.ordering.lock().await;
        Ok(self.sampler.set_interval_secs(secs)?)
    }

    // ── Credentials ─────────────────────────────────────────────────

    /// Change the secret path used by later resolutions.
    ///
    /// The running pool keeps its credentials until a reconfigure with
    /// [`CredentialChange::Resolve`].
    pub async fn set_secret_path(&self, path: &str) -> AdminResult<SecretPathChange> {
        let new_path = path.trim();
        if new_path.is_empty() {
            return Err(AdminError::InvalidArgument(
                "secret path must not be empty".to_string(),
            ));
        }
        let _order = self.ordering.lock().await;
        let old_path = self.resolver.update_path(new_path);
        Ok(SecretPathChange {
            old_path,
            new_path: new_path.to_string(),
        })
    }

    /// Build a replacement pool and swap it in.
    ///
    /// The old instance is closed before the swap so lease attempts in
    /// between see `Closed` and retry against the new one. Leases still
    /// held on the old instance are honored up to its drain timeout; the
    /// ordering lock is released before that wait, so later commands act on
    /// the new instance right away. A suspended pool is replaced by a
    /// suspended pool. If the replacement cannot be built, the current pool
    /// is left as it was. A pool that has been shut down is not rebuilt.
    pub async fn reconfigure(&self, request: Reconfigure) -> AdminResult<ReconfigureReport> {
        if let CredentialChange::Replace(credentials) = &request.credentials {
            validate_credentials(credentials)?;
        }

        let order = self.ordering.lock().await;
        let old = self.pool.current();
        if old.state() == PoolState::Closed {
            return Err(AdminError::Conflict(
                "pool has been shut down and cannot be reconfigured".to_string(),
            ));
        }
        let config = request.pool.unwrap_or_else(|| old.config().clone());

        let (credentials, credential_source) = match request.credentials {
            CredentialChange::Keep => (old.credentials().clone(), None),
            CredentialChange::Resolve => {
                let resolution = self.resolver.resolve().await?;
                (resolution.credentials, Some(resolution.source))
            }
            CredentialChange::Replace(credentials) => (credentials, None),
        };

        let replacement =
            match ConnectionPool::open(config, credentials, Arc::clone(&self.factory)).await {
                Ok(pool) => pool,
                Err(e) => {
                    warn!(
                        pool_id = old.id(),
                        error = %e,
                        "failed to build replacement pool, keeping current pool"
                    );
                    return Err(e.into());
                }
            };
        let new_pool_id = replacement.id();

        let suspended = old.state() == PoolState::Suspended;
        if suspended {
            replacement.suspend()?;
        }

        old.begin_close();
        self.pool.swap(replacement);
        info!(
            old_pool_id = old.id(),
            new_pool_id,
            suspended,
            "pool replaced, draining previous instance"
        );
        drop(order);

        let drain = old.drain(old.config().drain_timeout()).await;

        Ok(ReconfigureReport {
            old_pool_id: old.id(),
            new_pool_id,
            credential_source,
            drain,
        })
    }

    // ── Schema ──────────────────────────────────────────────────────

    pub async fn create_schema(&self) -> AdminResult<()> {
        let runner = self.schema_runner()?;
        let _order = self.ordering.lock().await;
        runner.create_schema().await?;
        info!("schema created");
        Ok(())
    }

    pub async fn drop_schema(&self) -> AdminResult<()> {
        let runner = self.schema_runner()?;
        let _order = self.ordering.lock().await;
        runner.drop_schema().await?;
        info!("schema dropped");
        Ok(())
    }

    pub async fn recreate_schema(&self) -> AdminResult<()> {
        let runner = self.schema_runner()?;
        let _order = self.ordering.lock().await;
        runner.recreate_schema().await?;
        info!("schema recreated");
        Ok(())
    }

    pub async fn schema_exists(&self) -> AdminResult<bool> {
        let runner = self.schema_runner()?;
        let _order = self.ordering.lock().await;
        Ok(runner.schema_exists().await?)
    }

    /// `false` when the live schema does not match what the application
    /// expects.
    pub async fn validate_schema(&self) -> AdminResult<bool> {
        let runner = self.schema_runner()?;
        let _order = self.ordering.lock().await;
        let valid = runner.validate_schema().await?;
        if !valid {
            warn!("schema validation found a mismatch");
        }
        Ok(valid)
    }

    pub async fn schema_statistics(&self) -> AdminResult<SchemaStatistics> {
        let runner = self.schema_runner()?;
        let _order = self.ordering.lock().await;
        Ok(runner.statistics().await?)
    }

    fn schema_runner(&self) -> AdminResult<&Arc<dyn SchemaRunner>> {
        self.schema
            .as_ref()
            .ok_or_else(|| AdminError::Conflict("no schema runner is configured".to_string()))
    }

    // ── Shutdown ────────────────────────────────────────────────────

    /// Close whichever pool is current, after any in-flight command.
    pub(crate) async fn close_current(&self) -> DrainReport {
        let _order = self.ordering.lock().await;
        self.pool.current().close().await
    }
}

impl std::fmt::Debug for PoolAdministrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolAdministrator")
            .field("pool", &self.pool)
            .field("resolver", &self.resolver)
            .field("sampler", &self.sampler.settings())
            .field("schema_runner", &self.schema.is_some())
            .finish_non_exhaustive()
    }
}

fn validate_credentials(credentials: &Credentials) -> AdminResult<()> {
    let missing: Vec<&str> = [
        ("endpoint", credentials.endpoint()),
        ("username", credentials.username()),
        ("password", credentials.password()),
    ]
    .into_iter()
    .filter(|(_, value)| value.trim().is_empty())
    .map(|(name, _)| name)
    .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(AdminError::InvalidArgument(format!(
            "replacement credentials missing {}",
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacement_credentials_must_be_complete() {
        let ok = Credentials::new("postgresql://db:5432/app", "app", "pw", "postgresql");
        assert!(validate_credentials(&ok).is_ok());

        let partial = Credentials::new("postgresql://db:5432/app", "", " ", "postgresql");
        match validate_credentials(&partial) {
            Err(AdminError::InvalidArgument(msg)) => {
                assert_eq!(msg, "replacement credentials missing username, password");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
