use thiserror::Error;

use vaultpool_core::ConfigError;
use vaultpool_credentials::CredentialError;
use vaultpool_health::SamplerError;
use vaultpool_pool::PoolError;

use crate::schema::SchemaError;

pub type AdminResult<T> = Result<T, AdminError>;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<SamplerError> for AdminError {
    fn from(err: SamplerError) -> Self {
        AdminError::InvalidArgument(err.to_string())
    }
}
