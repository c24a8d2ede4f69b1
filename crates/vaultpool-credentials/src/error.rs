//! Credential resolution error types.

use serde::Serialize;
use thiserror::Error;

/// Classification of a failed credential read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CredentialErrorKind {
    /// Nothing stored at the configured path (or the store is disabled).
    NotFound,
    /// The store could not be reached or refused the request.
    Unreachable,
    /// The store answered, but the payload is unusable.
    Malformed,
}

impl std::fmt::Display for CredentialErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialErrorKind::NotFound => write!(f, "not found"),
            CredentialErrorKind::Unreachable => write!(f, "unreachable"),
            CredentialErrorKind::Malformed => write!(f, "malformed"),
        }
    }
}

/// A credential read or resolution failure.
///
/// Messages carry paths, statuses and missing field names only; secret
/// values never appear in them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("credentials {kind}: {message}")]
pub struct CredentialError {
    pub kind: CredentialErrorKind,
    pub message: String,
}

impl CredentialError {
    pub fn new(kind: CredentialErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(CredentialErrorKind::NotFound, message)
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(CredentialErrorKind::Unreachable, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(CredentialErrorKind::Malformed, message)
    }
}

/// Transport-level failure reported by a [`SecretStore`](crate::SecretStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretStoreError {
    #[error("secret store unreachable: {0}")]
    Unreachable(String),

    #[error("malformed secret store response: {0}")]
    Malformed(String),
}

impl From<SecretStoreError> for CredentialError {
    fn from(err: SecretStoreError) -> Self {
        match err {
            SecretStoreError::Unreachable(msg) => CredentialError::unreachable(msg),
            SecretStoreError::Malformed(msg) => CredentialError::malformed(msg),
        }
    }
}
