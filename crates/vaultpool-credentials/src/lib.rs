//! vaultpool-credentials: credential resolution for the connection pool.
//!
//! Credentials are read from an external secret store (HashiCorp Vault KV in
//! production) and fall back to static configuration when the store is
//! disabled, unreachable, or returns an unusable payload.
//!
//! # Resolution
//!
//! ```text
//! CredentialResolver::resolve()
//!   ├── read_primary()  → PrimaryOutcome (Disabled | Resolved | Failed)
//!   └── decide(primary, fallback)
//!         ├── Resolved            → secret store credentials
//!         ├── fallback complete   → fallback credentials (+ primary failure)
//!         └── fallback incomplete → CredentialError
//! ```
//!
//! Passwords never reach `Debug`/`Display` output and credentials embedded
//! in endpoint URIs are masked by [`redact_uri`] before logging.

pub mod credentials;
pub mod error;
pub mod resolver;
pub mod store;
pub mod vault;

pub use credentials::{Credentials, FallbackCredentials, redact_uri};
pub use error::{CredentialError, CredentialErrorKind, SecretStoreError};
pub use resolver::{
    CredentialResolver, CredentialSource, PrimaryOutcome, Resolution, SecretStoreStatus, decide,
};
pub use store::{BoxFuture, MemorySecretStore, SecretData, SecretStore};
pub use vault::VaultClient;
