//! vaultpool-pool: a bounded pool of leasable connections.
//!
//! # Architecture
//!
//! ```text
//! caller ── acquire(timeout) ──► ConnectionPool
//!                                  ├── idle connection available → lease it
//!                                  ├── total < max_size → reserve slot, connect outside the lock
//!                                  └── exhausted → wait for release (until timeout)
//!
//! maintenance task (every maintenance_interval)
//!   ├── retire idle past idle_timeout (never below min_idle)
//!   ├── retire idle past max_lifetime, flag leased ones to retire on release
//!   ├── report leases held past leak_detection_threshold (once each)
//!   └── replenish idle toward min_idle while RUNNING
//! ```
//!
//! A connection is opaque to the pool: it only needs to answer a ping and
//! close itself. [`ConnectionFactory`] establishes them from [`Credentials`].

pub mod config;
pub mod error;
pub mod lease;
pub mod metrics;
pub mod pool;
pub mod tcp;

use std::time::Duration;

use vaultpool_credentials::Credentials;

pub use config::{PoolConfig, PoolConfigBuilder};
pub use error::{PoolError, PoolResult};
pub use lease::{Lease, PoolHandle};
pub use metrics::{
    ConnectionInfo, ConnectionStatus, ConnectionTest, DrainReport, EvictReport, PoolLimits,
    PoolMetricsSnapshot, SweepReport,
};
pub use pool::{ConnectionHandle, ConnectionPool, PoolState};
pub use tcp::{Endpoint, TcpBackend, TcpConnectionFactory};

/// Trait abstracting the underlying transport for testability.
pub trait ConnectionBackend: Send + std::fmt::Debug {
    /// Health-check ping. Returns `true` if the connection is alive.
    fn ping(&mut self) -> bool;
    /// Close the underlying transport.
    fn close(&mut self);
}

/// Factory for creating new connections, injected for testability.
///
/// Called on a blocking thread; implementations may block up to `timeout`.
pub trait ConnectionFactory: Send + Sync {
    fn connect(
        &self,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Box<dyn ConnectionBackend>, String>;
}
