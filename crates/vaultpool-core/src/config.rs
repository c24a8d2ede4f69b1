//! vaultpool.toml configuration parser.
//!
//! Every section is optional and every field inside a section is optional;
//! the crates that consume a section (`vaultpool-pool`, `vaultpool-health`,
//! `vaultpool-credentials`) apply defaults and validation when converting
//! it into their runtime types.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigResult;
use crate::redact::redact_uri;

/// Placeholder written in place of secrets by [`VaultpoolConfig::redacted`].
pub const REDACTED: &str = "***";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultpoolConfig {
    pub secret_store: Option<SecretStoreSection>,
    pub pool: Option<PoolSection>,
    pub sampler: Option<SamplerSection>,
    pub fallback: Option<FallbackSection>,
    pub schema: Option<SchemaSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretStoreSection {
    pub enabled: Option<bool>,
    pub scheme: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub token: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolSection {
    pub max_size: Option<usize>,
    pub min_idle: Option<usize>,
    pub connect_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
    pub max_lifetime_ms: Option<u64>,
    pub leak_detection_threshold_ms: Option<u64>,
    pub drain_timeout_ms: Option<u64>,
    pub maintenance_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SamplerSection {
    pub enabled: Option<bool>,
    pub interval_secs: Option<u64>,
    pub utilization_threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FallbackSection {
    pub endpoint: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub driver: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaSection {
    pub auto_create: Option<bool>,
    pub drop_existing: Option<bool>,
}

impl VaultpoolConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: VaultpoolConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply `VAULTPOOL_*` environment overrides on top of the parsed file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    ///
    /// Empty values are ignored so an exported-but-blank variable does not
    /// wipe a value from the file.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let store = self.secret_store.get_or_insert_with(Default::default);
        if let Some(token) = get("VAULTPOOL_SECRET_STORE_TOKEN") {
            store.token = Some(token);
        }
        if let Some(path) = get("VAULTPOOL_SECRET_STORE_PATH") {
            store.path = Some(path);
        }
        if let Some(enabled) = get("VAULTPOOL_SECRET_STORE_ENABLED") {
            match enabled.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => store.enabled = Some(true),
                "0" | "false" | "no" | "off" => store.enabled = Some(false),
                _ => {}
            }
        }

        let fallback = self.fallback.get_or_insert_with(Default::default);
        if let Some(endpoint) = get("VAULTPOOL_FALLBACK_ENDPOINT") {
            fallback.endpoint = Some(endpoint);
        }
        if let Some(username) = get("VAULTPOOL_FALLBACK_USERNAME") {
            fallback.username = Some(username);
        }
        if let Some(password) = get("VAULTPOOL_FALLBACK_PASSWORD") {
            fallback.password = Some(password);
        }
    }

    /// A copy with the secret-store token, the fallback password and any
    /// credentials embedded in the fallback endpoint masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if let Some(store) = copy.secret_store.as_mut() {
            if store.token.is_some() {
                store.token = Some(REDACTED.to_string());
            }
        }
        if let Some(fallback) = copy.fallback.as_mut() {
            if fallback.password.is_some() {
                fallback.password = Some(REDACTED.to_string());
            }
            if let Some(endpoint) = fallback.endpoint.as_mut() {
                *endpoint = redact_uri(endpoint);
            }
        }
        copy
    }

    /// The secret store is on unless `[secret_store] enabled = false`.
    pub fn secret_store_enabled(&self) -> bool {
        self.secret_store
            .as_ref()
            .and_then(|s| s.enabled)
            .unwrap_or(true)
    }

    /// Configured secret path, if any.
    pub fn secret_path(&self) -> Option<&str> {
        self.secret_store
            .as_ref()
            .and_then(|s| s.path.as_deref())
            .filter(|p| !p.trim().is_empty())
    }

    pub fn schema_auto_create(&self) -> bool {
        self.schema
            .as_ref()
            .and_then(|s| s.auto_create)
            .unwrap_or(false)
    }

    pub fn schema_drop_existing(&self) -> bool {
        self.schema
            .as_ref()
            .and_then(|s| s.drop_existing)
            .unwrap_or(false)
    }
}
