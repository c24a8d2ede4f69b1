pub mod config;
pub mod error;
pub mod redact;

pub use config::VaultpoolConfig;
pub use error::{ConfigError, ConfigResult};
pub use redact::redact_uri;
