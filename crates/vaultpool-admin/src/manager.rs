//! Composition root: resolves credentials, opens the pool, and wires the
//! health sampler and administrator to a shared [`PoolHandle`].

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use vaultpool_core::VaultpoolConfig;
use vaultpool_credentials::resolver::DEFAULT_SECRET_PATH;
use vaultpool_credentials::{CredentialResolver, FallbackCredentials, SecretStore};
use vaultpool_health::{PoolHealthSampler, SamplerConfig};
use vaultpool_pool::{ConnectionFactory, ConnectionPool, DrainReport, PoolConfig, PoolHandle};

use crate::administrator::PoolAdministrator;
use crate::error::AdminResult;
use crate::schema::SchemaRunner;

pub struct PoolManager {
    pool: PoolHandle,
    administrator: Arc<PoolAdministrator>,
    shutdown_tx: watch::Sender<bool>,
    sampler_task: JoinHandle<()>,
}

impl PoolManager {
    /// Validate configuration, resolve credentials, open the pool, run
    /// schema bootstrap if configured, and start the health sampler.
    ///
    /// `store` is the secret store transport; `None` disables it. Startup
    /// fails if neither the store nor the fallback yields credentials.
    pub async fn start(
        config: &VaultpoolConfig,
        store: Option<Arc<dyn SecretStore>>,
        factory: Arc<dyn ConnectionFactory>,
        schema: Option<Arc<dyn SchemaRunner>>,
    ) -> AdminResult<Self> {
        let pool_config = PoolConfig::from_section(config.pool.as_ref())?;
        let sampler_config = SamplerConfig::from_section(config.sampler.as_ref())?;

        let resolver = Arc::new(CredentialResolver::new(
            store,
            config.secret_path().unwrap_or(DEFAULT_SECRET_PATH),
            FallbackCredentials::from_section(config.fallback.as_ref()),
        ));
        let resolution = resolver.resolve().await?;

        let pool = ConnectionPool::open(
            pool_config,
            resolution.credentials,
            Arc::clone(&factory),
        )
        .await?;
        let handle = PoolHandle::new(Arc::clone(&pool));

        if let Err(e) = bootstrap_schema(config, schema.as_deref()).await {
            error!(error = %e, "schema bootstrap failed, closing pool");
            pool.close().await;
            return Err(e);
        }

        let sampler = PoolHealthSampler::new(Arc::new(handle.clone()), sampler_config);
        let sampler_control = sampler.control();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sampler_task = sampler.spawn(shutdown_rx);

        let administrator = Arc::new(PoolAdministrator::new(
            handle.clone(),
            resolver,
            factory,
            sampler_control,
            schema,
        ));

        info!(
            pool_id = pool.id(),
            source = %resolution.source,
            max_size = pool.config().max_size(),
            min_idle = pool.config().min_idle(),
            "pool manager started"
        );

        Ok(Self {
            pool: handle,
            administrator,
            shutdown_tx,
            sampler_task,
        })
    }

    pub fn pool_handle(&self) -> &PoolHandle {
        &self.pool
    }

    pub fn administrator(&self) -> Arc<PoolAdministrator> {
        Arc::clone(&self.administrator)
    }

    /// Stop the sampler, then close and drain the current pool.
    pub async fn shutdown(self) -> DrainReport {
        self.shutdown_tx.send_replace(true);
        if let Err(e) = self.sampler_task.await {
            warn!(error = %e, "health sampler task ended abnormally");
        }
        let report = self.administrator.close_current().await;
        info!(abandoned = report.abandoned, "pool manager stopped");
        report
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

async fn bootstrap_schema(
    config: &VaultpoolConfig,
    schema: Option<&dyn SchemaRunner>,
) -> AdminResult<()> {
    let drop_existing = config.schema_drop_existing();
    if !config.schema_auto_create() {
        if drop_existing {
            warn!("schema.drop_existing has no effect without schema.auto_create, ignoring");
        }
        return Ok(());
    }
    let Some(runner) = schema else {
        warn!("schema bootstrap requested but no schema runner is configured, skipping");
        return Ok(());
    };

    if drop_existing {
        runner.recreate_schema().await?;
    } else {
        runner.create_schema().await?;
    }
    info!(drop_existing, "schema bootstrap complete");
    Ok(())
}
