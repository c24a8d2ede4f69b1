//! RAII leases and the swappable pool reference.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, warn};

use crate::ConnectionBackend;
use crate::error::{PoolError, PoolResult};
use crate::pool::{ConnectionHandle, ConnectionPool, lock_backend};

const SWAP_GRACE: Duration = Duration::from_millis(250);
const SWAP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A leased connection that is released back to its pool when dropped.
pub struct Lease {
    pool: Arc<ConnectionPool>,
    handle: ConnectionHandle,
    released: bool,
}

impl Lease {
    pub(crate) fn new(pool: Arc<ConnectionPool>, handle: ConnectionHandle) -> Self {
        Self {
            pool,
            handle,
            released: false,
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    /// The pool instance this lease was taken from.
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Run `f` against the leased backend.
    pub fn with_backend<R>(&self, f: impl FnOnce(&mut dyn ConnectionBackend) -> R) -> PoolResult<R> {
        let backend = self.pool.backend_of(self.handle)?;
        let mut guard = lock_backend(&backend);
        Ok(f(&mut **guard))
    }

    /// Close the connection on release instead of returning it to idle.
    pub fn mark_broken(&self) {
        if let Err(e) = self.pool.mark_retiring(self.handle) {
            debug!(handle = %self.handle, error = %e, "could not mark lease broken");
        }
    }

    /// Release explicitly and observe the result.
    pub fn release(mut self) -> PoolResult<()> {
        self.released = true;
        self.pool.release(self.handle)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.pool.release(self.handle) {
            warn!(handle = %self.handle, error = %e, "failed to release lease on drop");
        }
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("handle", &self.handle)
            .field("released", &self.released)
            .finish()
    }
}

/// Shared, swappable reference to the current pool instance.
///
/// Cloned into the sampler, the administrator and request paths. A
/// reconfigure swaps in a new instance; holders of the old one keep their
/// `Arc` until they are done with it.
#[derive(Clone)]
pub struct PoolHandle {
    current: Arc<RwLock<Arc<ConnectionPool>>>,
}

impl PoolHandle {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            current: Arc::new(RwLock::new(pool)),
        }
    }

    /// The pool instance installed right now.
    pub fn current(&self) -> Arc<ConnectionPool> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Install `pool` and return the previous instance.
    pub fn swap(&self, pool: Arc<ConnectionPool>) -> Arc<ConnectionPool> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, pool)
    }

    /// Lease from the current pool.
    ///
    /// A caller that races a reconfigure and hits the closed old instance
    /// retries against the replacement within the same overall timeout. If
    /// no replacement shows up within a short grace period the pool is
    /// considered shut down and `Closed` is returned.
    pub async fn lease(&self, timeout: Duration) -> PoolResult<Lease> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut closed_since: Option<tokio::time::Instant> = None;
        loop {
            let pool = self.current();
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match pool.lease(remaining).await {
                Err(PoolError::Closed) => {}
                other => return other,
            }

            let now = tokio::time::Instant::now();
            let replacement = self.current();
            if !Arc::ptr_eq(&pool, &replacement) {
                debug!(
                    old_pool = pool.id(),
                    new_pool = replacement.id(),
                    "pool replaced while leasing, retrying"
                );
                closed_since = None;
                continue;
            }
            let since = *closed_since.get_or_insert(now);
            if now >= deadline || now.duration_since(since) >= SWAP_GRACE {
                return Err(PoolError::Closed);
            }
            tokio::time::sleep(SWAP_POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("pool_id", &self.current().id())
            .finish()
    }
}
