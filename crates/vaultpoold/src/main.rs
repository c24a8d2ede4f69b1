//! vaultpoold: the vaultpool daemon.
//!
//! Resolves database credentials (Vault KV, then static fallback), opens the
//! connection pool against the configured endpoint over TCP, and runs the
//! health sampler until interrupted.
//!
//! # Usage
//!
//! ```text
//! vaultpoold run --config /etc/vaultpool/vaultpool.toml
//! vaultpoold check --config /etc/vaultpool/vaultpool.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use vaultpool_admin::PoolManager;
use vaultpool_core::VaultpoolConfig;
use vaultpool_credentials::{FallbackCredentials, SecretStore, VaultClient};
use vaultpool_health::SamplerConfig;
use vaultpool_pool::{PoolConfig, PoolLimits, TcpConnectionFactory};

#[derive(Parser)]
#[command(name = "vaultpoold", about = "Credential-aware connection pool daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the pool manager and run until Ctrl-C.
    Run {
        #[arg(long, default_value = "vaultpool.toml")]
        config: PathBuf,
    },
    /// Validate configuration and print it with secrets masked.
    Check {
        #[arg(long, default_value = "vaultpool.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Run { config } => run(&config).await,
        Command::Check { config } => check(&config),
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,vaultpool=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<VaultpoolConfig> {
    let mut config = VaultpoolConfig::from_file(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    config.apply_env_overrides();
    Ok(config)
}

/// The secret store transport, or `None` when it is disabled.
fn build_store(config: &VaultpoolConfig) -> anyhow::Result<Option<Arc<dyn SecretStore>>> {
    if !config.secret_store_enabled() {
        return Ok(None);
    }
    let section = config.secret_store.clone().unwrap_or_default();
    let client = VaultClient::from_section(&section)?;
    info!(address = %client.address(), "using Vault secret store");
    Ok(Some(Arc::new(client)))
}

/// Validated view of a configuration file, as printed by `check`.
#[derive(Debug)]
struct CheckSummary {
    limits: PoolLimits,
    sampler: SamplerConfig,
    secret_store_enabled: bool,
    fallback_missing: Vec<&'static str>,
}

fn validate(config: &VaultpoolConfig) -> anyhow::Result<CheckSummary> {
    let pool = PoolConfig::from_section(config.pool.as_ref())?;
    let sampler = SamplerConfig::from_section(config.sampler.as_ref())?;
    build_store(config)?;
    let fallback = FallbackCredentials::from_section(config.fallback.as_ref());
    Ok(CheckSummary {
        limits: PoolLimits::from(&pool),
        sampler,
        secret_store_enabled: config.secret_store_enabled(),
        fallback_missing: fallback.missing_fields(),
    })
}

fn check(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let summary = validate(&config)?;

    println!("{}", config.redacted().to_toml_string()?);
    println!("# effective pool limits");
    println!("{}", serde_json::to_string_pretty(&summary.limits)?);
    println!(
        "# sampler: enabled={} interval={}s utilization_threshold={}",
        summary.sampler.settings.enabled,
        summary.sampler.settings.interval_secs,
        summary.sampler.utilization_threshold
    );
    if !summary.fallback_missing.is_empty() {
        if summary.secret_store_enabled {
            warn!(
                missing = ?summary.fallback_missing,
                "fallback credentials incomplete, startup depends on the secret store"
            );
        } else {
            anyhow::bail!(
                "secret store disabled and fallback credentials incomplete (missing {})",
                summary.fallback_missing.join(", ")
            );
        }
    }
    println!("configuration OK");
    Ok(())
}

async fn run(path: &Path) -> anyhow::Result<()> {
    info!(config = %path.display(), "vaultpool daemon starting");

    let config = load_config(path)?;
    let store = build_store(&config)?;
    let factory = Arc::new(TcpConnectionFactory::new());
    let manager = PoolManager::start(&config, store, factory, None).await?;

    let metrics = manager.administrator().metrics();
    info!(
        snapshot = %serde_json::to_string(&metrics)?,
        "pool ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to install Ctrl-C handler")?;
    info!("shutdown signal received");

    let report = manager.shutdown().await;
    info!(
        abandoned = report.abandoned,
        waited_ms = report.waited_ms,
        "vaultpool daemon stopped"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn disabled_store_builds_nothing() {
        let config =
            VaultpoolConfig::from_toml_str("[secret_store]\nenabled = false\n").unwrap();
        assert!(build_store(&config).unwrap().is_none());
    }

    #[test]
    fn enabled_store_without_token_is_rejected() {
        let config = VaultpoolConfig::from_toml_str("[secret_store]\nhost = \"vault\"\n").unwrap();
        let err = build_store(&config).err().unwrap();
        assert!(err.to_string().contains("secret_store.token"));
    }

    #[test]
    fn validate_reports_effective_limits() {
        let config = VaultpoolConfig::from_toml_str(
            r#"
[secret_store]
enabled = false

[pool]
max_size = 20
min_idle = 4

[fallback]
endpoint = "postgresql://db:5432/app"
username = "app"
password = "pw"
"#,
        )
        .unwrap();
        let summary = validate(&config).unwrap();
        assert_eq!(summary.limits.max_size, 20);
        assert_eq!(summary.limits.min_idle, 4);
        assert_eq!(summary.limits.connect_timeout_ms, 30_000);
        assert!(summary.fallback_missing.is_empty());
        assert!(!summary.secret_store_enabled);
    }

    #[test]
    fn check_rejects_unusable_configuration() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[secret_store]\nenabled = false\n").unwrap();
        assert!(check(file.path()).is_err());
    }

    #[test]
    fn check_rejects_invalid_sampler_interval() {
        let config = VaultpoolConfig::from_toml_str(
            "[secret_store]\nenabled = false\n[sampler]\ninterval_secs = 1\n",
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }
}
