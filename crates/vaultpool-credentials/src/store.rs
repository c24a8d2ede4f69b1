//! Secret store abstraction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use crate::error::SecretStoreError;

/// Raw key/value payload stored at a secret path.
pub type SecretData = serde_json::Map<String, serde_json::Value>;

/// Boxed future returned by [`SecretStore::read`].
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Transport to an external secret store.
///
/// `Ok(None)` means the store answered but holds nothing at `path`;
/// `Err` means the store could not be asked or its answer was unreadable.
pub trait SecretStore: Send + Sync {
    fn read<'a>(
        &'a self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<Option<SecretData>, SecretStoreError>>;
}

/// In-process secret store, for tests and local development.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<String, SecretData>>,
    unreachable: AtomicBool,
    reads: AtomicU64,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, data: SecretData) {
        let mut secrets = self
            .secrets
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        secrets.insert(path.into(), data);
    }

    pub fn remove(&self, path: &str) {
        let mut secrets = self
            .secrets
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        secrets.remove(path);
    }

    /// Make every subsequent read fail as unreachable (or recover).
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::Relaxed);
    }

    /// Number of reads served so far, including failed ones.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

impl SecretStore for MemorySecretStore {
    fn read<'a>(
        &'a self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<Option<SecretData>, SecretStoreError>> {
        Box::pin(async move {
            self.reads.fetch_add(1, Ordering::Relaxed);
            if self.unreachable.load(Ordering::Relaxed) {
                return Err(SecretStoreError::Unreachable(
                    "memory store marked unreachable".to_string(),
                ));
            }
            let secrets = self
                .secrets
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            Ok(secrets.get(path).cloned())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemorySecretStore::new();
        let mut data = SecretData::new();
        data.insert("username".into(), "app".into());
        store.insert("secret/app", data.clone());

        assert_eq!(store.read("secret/app").await.unwrap(), Some(data));
        assert_eq!(store.read("secret/other").await.unwrap(), None);
        assert_eq!(store.reads(), 2);
    }

    #[tokio::test]
    async fn memory_store_unreachable_toggle() {
        let store = MemorySecretStore::new();
        store.set_unreachable(true);
        assert!(matches!(
            store.read("secret/app").await,
            Err(SecretStoreError::Unreachable(_))
        ));
        store.set_unreachable(false);
        assert!(store.read("secret/app").await.unwrap().is_none());
    }
}
