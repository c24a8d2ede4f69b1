//! Credential resolver: secret store first, static fallback second.
//!
//! Resolution is split in two steps so the fallback policy is testable on
//! its own: [`CredentialResolver::read_primary`] turns the secret store
//! read into a typed [`PrimaryOutcome`], and [`decide`] is a pure function
//! that picks the winning source.

use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::credentials::{Credentials, FallbackCredentials};
use crate::error::CredentialError;
use crate::store::SecretStore;

/// Default secret path when none is configured.
pub const DEFAULT_SECRET_PATH: &str = "secret/postgres-db";

/// Outcome of the secret store attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryOutcome {
    /// No secret store is configured.
    Disabled,
    /// The store returned usable credentials.
    Resolved(Credentials),
    /// The store was asked and failed.
    Failed(CredentialError),
}

/// Which source supplied the credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CredentialSource {
    SecretStore,
    Fallback,
}

impl std::fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialSource::SecretStore => write!(f, "secret-store"),
            CredentialSource::Fallback => write!(f, "fallback"),
        }
    }
}

/// Successful resolution result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub credentials: Credentials,
    pub source: CredentialSource,
    /// Why the secret store lost, when the fallback won after a failure.
    pub primary_failure: Option<CredentialError>,
}

/// Pick the winning credential source.
///
/// Secret store credentials win when present. Otherwise a complete
/// fallback wins. If the fallback is incomplete too, the error carries
/// the primary failure kind (`NotFound` when the store is disabled) and
/// the missing fallback fields.
pub fn decide(
    primary: PrimaryOutcome,
    fallback: &FallbackCredentials,
) -> Result<Resolution, CredentialError> {
    let failure = match primary {
        PrimaryOutcome::Resolved(credentials) => {
            return Ok(Resolution {
                credentials,
                source: CredentialSource::SecretStore,
                primary_failure: None,
            });
        }
        PrimaryOutcome::Disabled => None,
        PrimaryOutcome::Failed(err) => Some(err),
    };

    if let Some(credentials) = fallback.to_credentials() {
        return Ok(Resolution {
            credentials,
            source: CredentialSource::Fallback,
            primary_failure: failure,
        });
    }

    let missing = fallback.missing_fields().join(", ");
    Err(match failure {
        Some(err) => CredentialError::new(
            err.kind,
            format!(
                "{}; fallback configuration incomplete (missing {missing})",
                err.message
            ),
        ),
        None => CredentialError::not_found(format!(
            "secret store disabled and fallback configuration incomplete (missing {missing})"
        )),
    })
}

/// Reachability of the secret store at the current path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretStoreStatus {
    pub enabled: bool,
    pub accessible: bool,
    pub path: String,
}

/// Resolves connection credentials from a secret store with static fallback.
pub struct CredentialResolver {
    store: Option<Arc<dyn SecretStore>>,
    path: RwLock<String>,
    fallback: FallbackCredentials,
}

impl CredentialResolver {
    /// Create a resolver. Passing `None` for `store` disables the secret store.
    pub fn new(
        store: Option<Arc<dyn SecretStore>>,
        path: impl Into<String>,
        fallback: FallbackCredentials,
    ) -> Self {
        Self {
            store,
            path: RwLock::new(path.into()),
            fallback,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn secret_path(&self) -> String {
        self.path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Point subsequent resolutions at `new_path`. Returns the previous path.
    ///
    /// Does not re-resolve; the caller decides whether to rebuild the pool.
    pub fn update_path(&self, new_path: impl Into<String>) -> String {
        let new_path = new_path.into();
        let old = {
            let mut path = self.path.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *path, new_path.clone())
        };
        info!(old_path = %old, %new_path, "secret path updated");
        old
    }

    /// Read the secret store and classify the outcome.
    pub async fn read_primary(&self) -> PrimaryOutcome {
        let Some(store) = self.store.as_ref() else {
            return PrimaryOutcome::Disabled;
        };
        let path = self.secret_path();
        debug!(%path, "reading credentials from secret store");

        match store.read(&path).await {
            Ok(Some(data)) => match Credentials::from_secret_data(&data) {
                Ok(credentials) => PrimaryOutcome::Resolved(credentials),
                Err(err) => PrimaryOutcome::Failed(CredentialError::new(
                    err.kind,
                    format!("{} at {path}", err.message),
                )),
            },
            Ok(None) => PrimaryOutcome::Failed(CredentialError::not_found(format!(
                "no data at {path}"
            ))),
            Err(err) => PrimaryOutcome::Failed(err.into()),
        }
    }

    /// Resolve credentials, falling back to static configuration when needed.
    pub async fn resolve(&self) -> Result<Resolution, CredentialError> {
        let primary = self.read_primary().await;
        match &primary {
            PrimaryOutcome::Disabled => {
                warn!("secret store disabled, using fallback configuration");
            }
            PrimaryOutcome::Failed(err) => {
                error!(
                    kind = %err.kind,
                    error = %err,
                    "failed to read credentials from secret store, falling back to static configuration"
                );
            }
            PrimaryOutcome::Resolved(_) => {}
        }

        let resolution = decide(primary, &self.fallback)?;
        info!(
            source = %resolution.source,
            endpoint = %resolution.credentials.redacted_endpoint(),
            user = %resolution.credentials.username(),
            "database credentials resolved"
        );
        Ok(resolution)
    }

    /// Check whether the secret store currently serves data at the path.
    pub async fn probe(&self) -> SecretStoreStatus {
        let path = self.secret_path();
        let Some(store) = self.store.as_ref() else {
            return SecretStoreStatus {
                enabled: false,
                accessible: false,
                path,
            };
        };
        let accessible = match store.read(&path).await {
            Ok(data) => data.is_some(),
            Err(err) => {
                warn!(%path, error = %err, "secret store is not accessible");
                false
            }
        };
        SecretStoreStatus {
            enabled: true,
            accessible,
            path,
        }
    }
}

impl std::fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialResolver")
            .field("enabled", &self.is_enabled())
            .field("path", &self.secret_path())
            .field("fallback", &self.fallback)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CredentialErrorKind;
    use crate::store::{MemorySecretStore, SecretData};
    use serde_json::json;

    fn complete_fallback() -> FallbackCredentials {
        FallbackCredentials {
            endpoint: "postgresql://fallback:5432/app".into(),
            username: "fallback_user".into(),
            password: "fallback_pw".into(),
            driver: String::new(),
        }
    }

    fn incomplete_fallback() -> FallbackCredentials {
        FallbackCredentials {
            endpoint: "postgresql://fallback:5432/app".into(),
            username: "fallback_user".into(),
            password: String::new(),
            driver: String::new(),
        }
    }

    fn vault_payload() -> SecretData {
        match json!({
            "url": "postgresql://vault-db:5432/app",
            "username": "vault_user",
            "password": "vault_pw",
        }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn resolver_with(
        store: Arc<MemorySecretStore>,
        fallback: FallbackCredentials,
    ) -> CredentialResolver {
        CredentialResolver::new(Some(store), "secret/app", fallback)
    }

    // ── decide ──────────────────────────────────────────────────────

    #[test]
    fn decide_prefers_secret_store() {
        let creds = Credentials::new("postgresql://vault/app", "u", "p", "postgresql");
        let res = decide(PrimaryOutcome::Resolved(creds.clone()), &complete_fallback()).unwrap();
        assert_eq!(res.source, CredentialSource::SecretStore);
        assert_eq!(res.credentials, creds);
        assert!(res.primary_failure.is_none());
    }

    #[test]
    fn decide_failure_with_complete_fallback_uses_fallback() {
        for kind in [
            CredentialErrorKind::NotFound,
            CredentialErrorKind::Unreachable,
            CredentialErrorKind::Malformed,
        ] {
            let failure = CredentialError::new(kind, "boom");
            let res = decide(PrimaryOutcome::Failed(failure.clone()), &complete_fallback()).unwrap();
            assert_eq!(res.source, CredentialSource::Fallback);
            assert_eq!(res.credentials.username(), "fallback_user");
            assert_eq!(res.primary_failure, Some(failure));
        }
    }

    #[test]
    fn decide_failure_with_incomplete_fallback_fails_with_primary_kind() {
        let failure = CredentialError::unreachable("connection refused");
        let err = decide(PrimaryOutcome::Failed(failure), &incomplete_fallback()).unwrap_err();
        assert_eq!(err.kind, CredentialErrorKind::Unreachable);
        assert!(err.message.contains("missing password"));
    }

    #[test]
    fn decide_disabled_with_incomplete_fallback_is_not_found() {
        let err = decide(PrimaryOutcome::Disabled, &FallbackCredentials::default()).unwrap_err();
        assert_eq!(err.kind, CredentialErrorKind::NotFound);
        assert!(err.message.contains("endpoint"));
    }

    #[test]
    fn decide_error_never_contains_secrets() {
        let fallback = FallbackCredentials {
            password: String::new(),
            ..complete_fallback()
        };
        let err = decide(
            PrimaryOutcome::Failed(CredentialError::not_found("no data")),
            &fallback,
        )
        .unwrap_err();
        assert!(!err.to_string().contains("fallback_pw"));
    }

    // ── resolve ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn resolve_from_secret_store() {
        let store = Arc::new(MemorySecretStore::new());
        store.insert("secret/app", vault_payload());
        let resolver = resolver_with(store, complete_fallback());

        let res = resolver.resolve().await.unwrap();
        assert_eq!(res.source, CredentialSource::SecretStore);
        assert_eq!(res.credentials.username(), "vault_user");
    }

    #[tokio::test]
    async fn resolve_unreachable_store_falls_back() {
        let store = Arc::new(MemorySecretStore::new());
        store.set_unreachable(true);
        let resolver = resolver_with(store, complete_fallback());

        let res = resolver.resolve().await.unwrap();
        assert_eq!(res.source, CredentialSource::Fallback);
        assert_eq!(
            res.primary_failure.map(|e| e.kind),
            Some(CredentialErrorKind::Unreachable)
        );
    }

    #[tokio::test]
    async fn resolve_missing_path_falls_back() {
        let store = Arc::new(MemorySecretStore::new());
        let resolver = resolver_with(store, complete_fallback());

        let res = resolver.resolve().await.unwrap();
        assert_eq!(res.source, CredentialSource::Fallback);
        assert_eq!(
            res.primary_failure.map(|e| e.kind),
            Some(CredentialErrorKind::NotFound)
        );
    }

    #[tokio::test]
    async fn resolve_malformed_payload_falls_back() {
        let store = Arc::new(MemorySecretStore::new());
        let mut payload = vault_payload();
        payload.remove("password");
        store.insert("secret/app", payload);
        let resolver = resolver_with(store, complete_fallback());

        let res = resolver.resolve().await.unwrap();
        assert_eq!(res.source, CredentialSource::Fallback);
        assert_eq!(
            res.primary_failure.map(|e| e.kind),
            Some(CredentialErrorKind::Malformed)
        );
    }

    #[tokio::test]
    async fn resolve_fails_when_both_sources_unusable() {
        let store = Arc::new(MemorySecretStore::new());
        store.set_unreachable(true);
        let resolver = resolver_with(store, incomplete_fallback());

        let err = resolver.resolve().await.unwrap_err();
        assert_eq!(err.kind, CredentialErrorKind::Unreachable);
    }

    #[tokio::test]
    async fn resolve_disabled_uses_fallback() {
        let resolver = CredentialResolver::new(None, DEFAULT_SECRET_PATH, complete_fallback());
        assert!(!resolver.is_enabled());
        let res = resolver.resolve().await.unwrap();
        assert_eq!(res.source, CredentialSource::Fallback);
        assert!(res.primary_failure.is_none());
    }

    // ── path management ─────────────────────────────────────────────

    #[tokio::test]
    async fn update_path_redirects_next_resolve_only() {
        let store = Arc::new(MemorySecretStore::new());
        store.insert("secret/other", vault_payload());
        let resolver = resolver_with(store.clone(), complete_fallback());

        let reads_before = store.reads();
        let old = resolver.update_path("secret/other");
        assert_eq!(old, "secret/app");
        assert_eq!(resolver.secret_path(), "secret/other");
        // Changing the path does not itself read the store.
        assert_eq!(store.reads(), reads_before);

        let res = resolver.resolve().await.unwrap();
        assert_eq!(res.source, CredentialSource::SecretStore);
    }

    #[tokio::test]
    async fn probe_reports_accessibility() {
        let store = Arc::new(MemorySecretStore::new());
        store.insert("secret/app", vault_payload());
        let resolver = resolver_with(store.clone(), complete_fallback());

        let status = resolver.probe().await;
        assert!(status.enabled);
        assert!(status.accessible);
        assert_eq!(status.path, "secret/app");

        store.set_unreachable(true);
        assert!(!resolver.probe().await.accessible);
    }

    #[tokio::test]
    async fn probe_disabled_store() {
        let resolver = CredentialResolver::new(None, DEFAULT_SECRET_PATH, complete_fallback());
        let status = resolver.probe().await;
        assert!(!status.enabled);
        assert!(!status.accessible);
    }
}
