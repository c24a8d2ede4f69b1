//! vaultpool-admin: administrative control and the pool manager.
//!
//! ```text
//! PoolManager::start
//!   ├── CredentialResolver::resolve()        (secret store, then fallback)
//!   ├── ConnectionPool::open()  → PoolHandle  (shared, swappable)
//!   ├── SchemaRunner bootstrap               (optional)
//!   ├── PoolHealthSampler::spawn(handle)
//!   └── PoolAdministrator(handle, resolver, sampler control, schema)
//!         suspend | resume | soft_evict | sampler toggle/interval
//!         secret path | reconfigure | schema ops     (FIFO ordering lock)
//! ```

pub mod administrator;
pub mod error;
pub mod manager;
pub mod report;
pub mod schema;

pub use administrator::{
    CredentialChange, PoolAdministrator, Reconfigure, ReconfigureReport, SecretPathChange,
};
pub use error::{AdminError, AdminResult};
pub use manager::PoolManager;
pub use report::{HealthReport, OverallStatus, overall_status};
pub use schema::{SchemaError, SchemaRunner, SchemaStatistics};
