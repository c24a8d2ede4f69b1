//! Schema bootstrap collaborator.
//!
//! The pool manager does not run SQL itself. A [`SchemaRunner`] supplied by
//! the embedding application performs schema creation and inspection; the
//! administrator only serializes calls into it.

use serde::Serialize;
use thiserror::Error;

use vaultpool_credentials::BoxFuture;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("schema operation failed: {0}")]
    Failed(String),

    #[error("schema validation failed: {0}")]
    Invalid(String),
}

/// Object counts in the managed schema.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchemaStatistics {
    pub tables: u64,
    pub sequences: u64,
    pub indexes: u64,
    pub views: u64,
    pub functions: u64,
}

pub trait SchemaRunner: Send + Sync {
    fn create_schema(&self) -> BoxFuture<'_, Result<(), SchemaError>>;

    fn drop_schema(&self) -> BoxFuture<'_, Result<(), SchemaError>>;

    /// Drop then create.
    fn recreate_schema(&self) -> BoxFuture<'_, Result<(), SchemaError>> {
        Box::pin(async move {
            self.drop_schema().await?;
            self.create_schema().await
        })
    }

    /// Whether the managed schema is present at all.
    fn schema_exists(&self) -> BoxFuture<'_, Result<bool, SchemaError>>;

    /// Check the live schema against what the application expects.
    ///
    /// `Ok(false)` means the check ran and found a mismatch; `Err` means it
    /// could not run.
    fn validate_schema(&self) -> BoxFuture<'_, Result<bool, SchemaError>>;

    fn statistics(&self) -> BoxFuture<'_, Result<SchemaStatistics, SchemaError>>;
}
