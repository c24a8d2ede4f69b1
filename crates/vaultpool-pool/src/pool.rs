//! The connection pool.
//!
//! All accounting lives in one [`PoolInner`] behind a `std::sync::Mutex`
//! that is never held across an `.await`. Establishing a connection happens
//! outside the lock on a blocking thread, against a slot reserved by
//! bumping `pending`, so `total` never exceeds `max_size` even while
//! connects are in flight.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{Notify, watch};
use tracing::{debug, info, warn};

use vaultpool_credentials::Credentials;

use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::lease::Lease;
use crate::metrics::{
    ConnectionInfo, ConnectionStatus, ConnectionTest, DrainReport, EvictReport, PoolLimits,
    PoolMetricsSnapshot, SweepReport, millis,
};
use crate::{ConnectionBackend, ConnectionFactory};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);
const RETRY_BACKOFF_INITIAL: Duration = Duration::from_millis(50);
const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(1);

pub(crate) type SharedBackend = Arc<Mutex<Box<dyn ConnectionBackend>>>;

pub(crate) fn lock_backend(backend: &SharedBackend) -> MutexGuard<'_, Box<dyn ConnectionBackend>> {
    backend.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lifecycle state of a pool instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolState {
    Running,
    /// New leases are refused; existing leases stay valid.
    Suspended,
    /// Terminal.
    Closed,
}

impl std::fmt::Display for PoolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolState::Running => write!(f, "RUNNING"),
            PoolState::Suspended => write!(f, "SUSPENDED"),
            PoolState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Opaque reference to a leased connection.
///
/// Every checkout gets a fresh lease id, so a stale handle kept after
/// release can never release somebody else's lease of the same connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    pool_id: u64,
    lease_id: u64,
    connection_id: u64,
}

impl ConnectionHandle {
    pub fn pool_id(&self) -> u64 {
        self.pool_id
    }

    pub fn lease_id(&self) -> u64 {
        self.lease_id
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }
}

impl std::fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pool {} lease {} (connection {})",
            self.pool_id, self.lease_id, self.connection_id
        )
    }
}

/// A pooled connection with tracking metadata.
struct PooledConnection {
    id: u64,
    created_at: Instant,
    /// When the connection last went idle.
    last_used: Instant,
    checked_out_at: Option<Instant>,
    /// Close on release instead of returning to idle.
    retiring: bool,
    leak_reported: bool,
    backend: SharedBackend,
}

impl PooledConnection {
    fn new(id: u64, backend: Box<dyn ConnectionBackend>) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_used: now,
            checked_out_at: None,
            retiring: false,
            leak_reported: false,
            backend: Arc::new(Mutex::new(backend)),
        }
    }

    fn lifetime_exceeded(&self, max_lifetime: Duration, now: Instant) -> bool {
        !max_lifetime.is_zero() && now.saturating_duration_since(self.created_at) >= max_lifetime
    }

    fn close(&self) {
        lock_backend(&self.backend).close();
    }
}

struct PoolInner {
    state: PoolState,
    /// Oldest `last_used` at the front; checkouts pop from the back.
    idle: VecDeque<PooledConnection>,
    /// Leased connections keyed by lease id.
    in_use: HashMap<u64, PooledConnection>,
    pending: usize,
    waiting: usize,
    next_id: u64,
}

impl PoolInner {
    fn total(&self) -> usize {
        self.idle.len() + self.in_use.len() + self.pending
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// A bounded pool of leasable connections built from one set of credentials.
///
/// Construct with [`ConnectionPool::open`]; the returned `Arc` also drives a
/// background maintenance task that stops once the pool is closed or dropped.
pub struct ConnectionPool {
    id: u64,
    config: PoolConfig,
    credentials: Credentials,
    factory: Arc<dyn ConnectionFactory>,
    inner: Mutex<PoolInner>,
    /// Signalled when a connection or a slot frees up, and on state changes.
    available: Notify,
    closed_tx: watch::Sender<bool>,
}

impl ConnectionPool {
    /// Create a pool, establish `min_idle` connections, and start maintenance.
    ///
    /// Warm-up is best-effort: individual failures are logged. If `min_idle`
    /// is non-zero and every attempt fails, the pool is not created.
    pub async fn open(
        config: PoolConfig,
        credentials: Credentials,
        factory: Arc<dyn ConnectionFactory>,
    ) -> PoolResult<Arc<Self>> {
        let (closed_tx, _) = watch::channel(false);
        let pool = Arc::new(Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            config,
            credentials,
            factory,
            inner: Mutex::new(PoolInner {
                state: PoolState::Running,
                idle: VecDeque::new(),
                in_use: HashMap::new(),
                pending: 0,
                waiting: 0,
                next_id: 1,
            }),
            available: Notify::new(),
            closed_tx,
        });

        info!(
            pool_id = pool.id,
            max_size = pool.config.max_size(),
            min_idle = pool.config.min_idle(),
            endpoint = %pool.credentials.redacted_endpoint(),
            user = %pool.credentials.username(),
            "opening connection pool"
        );

        pool.warm_up().await?;
        Self::spawn_maintenance(&pool);
        Ok(pool)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn state(&self) -> PoolState {
        self.lock().state
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Acquire / release ───────────────────────────────────────────

    /// Lease a connection, waiting up to `timeout`.
    ///
    /// Idle connections are reused first; otherwise a new one is established
    /// if the pool is below `max_size`, or the caller waits for a release.
    /// Establishment failures are retried until the deadline. Dropping the
    /// returned future gives up cleanly: no slot or handle is left behind.
    pub async fn acquire(&self, timeout: Duration) -> PoolResult<ConnectionHandle> {
        let started = tokio::time::Instant::now();
        let deadline = started + timeout;
        let mut attempts = 0u32;
        let mut last_error: Option<String> = None;
        let mut backoff = RETRY_BACKOFF_INITIAL;

        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let step = {
                let mut inner = self.lock();
                match inner.state {
                    PoolState::Suspended => return Err(PoolError::Suspended),
                    PoolState::Closed => return Err(PoolError::Closed),
                    PoolState::Running => {}
                }
                if let Some(handle) = self.checkout_idle(&mut inner) {
                    return Ok(handle);
                }
                if inner.total() < self.config.max_size() {
                    Step::Establish(self.reserve(&mut inner))
                } else {
                    inner.waiting += 1;
                    Step::Wait(WaitGuard { pool: self })
                }
            };

            match step {
                Step::Establish(slot) => {
                    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                    let connect_timeout = self.config.connect_timeout().min(remaining);
                    match tokio::time::timeout_at(deadline, self.connect(connect_timeout)).await {
                        Ok(Ok(backend)) => return slot.checkout(backend),
                        Ok(Err(e)) => {
                            attempts += 1;
                            warn!(
                                pool_id = self.id,
                                attempt = attempts,
                                error = %e,
                                "failed to establish connection"
                            );
                            last_error = Some(e);
                            drop(slot);
                        }
                        Err(_) => {
                            drop(slot);
                            return Err(self.deadline_error(started, attempts, last_error));
                        }
                    }

                    let now = tokio::time::Instant::now();
                    if now >= deadline {
                        return Err(self.deadline_error(started, attempts, last_error));
                    }
                    tokio::time::sleep(backoff.min(deadline - now)).await;
                    backoff = (backoff * 2).min(RETRY_BACKOFF_MAX);
                }
                Step::Wait(_waiting) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(self.deadline_error(started, attempts, last_error));
                    }
                }
            }
        }
    }

    /// Lease a connection wrapped in a guard that releases it on drop.
    pub async fn lease(self: &Arc<Self>, timeout: Duration) -> PoolResult<Lease> {
        let handle = self.acquire(timeout).await?;
        Ok(Lease::new(Arc::clone(self), handle))
    }

    /// Return a leased connection.
    ///
    /// The connection goes back to idle unless it is marked to retire, has
    /// outlived `max_lifetime`, or the pool is closed, in which case it is
    /// closed. Never blocks on capacity.
    pub fn release(&self, handle: ConnectionHandle) -> PoolResult<()> {
        if handle.pool_id != self.id {
            return Err(PoolError::InvalidHandle(format!(
                "{handle} does not belong to pool {}",
                self.id
            )));
        }

        let now = Instant::now();
        let retired = {
            let mut inner = self.lock();
            let mut conn = inner
                .in_use
                .remove(&handle.lease_id)
                .ok_or_else(|| PoolError::InvalidHandle(format!("{handle} is not leased")))?;

            let held = conn
                .checked_out_at
                .take()
                .map(|at| now.saturating_duration_since(at))
                .unwrap_or_default();
            if conn.leak_reported {
                info!(
                    pool_id = self.id,
                    connection = conn.id,
                    held_ms = millis(held),
                    "previously reported leaked connection returned"
                );
            }

            if inner.state == PoolState::Closed
                || conn.retiring
                || conn.lifetime_exceeded(self.config.max_lifetime(), now)
            {
                Some(conn)
            } else {
                conn.last_used = now;
                conn.leak_reported = false;
                inner.idle.push_back(conn);
                None
            }
        };

        match retired {
            Some(conn) => {
                conn.close();
                debug!(
                    pool_id = self.id,
                    connection = conn.id,
                    lease = handle.lease_id,
                    "closed connection on release"
                );
            }
            None => {
                debug!(
                    pool_id = self.id,
                    connection = handle.connection_id,
                    lease = handle.lease_id,
                    "returned connection to pool"
                );
            }
        }
        // Either a connection went idle or a slot freed up.
        self.available.notify_one();
        Ok(())
    }

    /// Run `f` against the backend of a leased connection.
    pub fn with_connection<R>(
        &self,
        handle: ConnectionHandle,
        f: impl FnOnce(&mut dyn ConnectionBackend) -> R,
    ) -> PoolResult<R> {
        let backend = self.backend_of(handle)?;
        let mut guard = lock_backend(&backend);
        Ok(f(&mut **guard))
    }

    pub(crate) fn backend_of(&self, handle: ConnectionHandle) -> PoolResult<SharedBackend> {
        if handle.pool_id != self.id {
            return Err(PoolError::InvalidHandle(format!(
                "{handle} does not belong to pool {}",
                self.id
            )));
        }
        let inner = self.lock();
        inner
            .in_use
            .get(&handle.lease_id)
            .map(|conn| Arc::clone(&conn.backend))
            .ok_or_else(|| PoolError::InvalidHandle(format!("{handle} is not leased")))
    }

    /// Close the connection behind `handle` when it is released.
    pub fn mark_retiring(&self, handle: ConnectionHandle) -> PoolResult<()> {
        if handle.pool_id != self.id {
            return Err(PoolError::InvalidHandle(format!(
                "{handle} does not belong to pool {}",
                self.id
            )));
        }
        let mut inner = self.lock();
        let conn = inner
            .in_use
            .get_mut(&handle.lease_id)
            .ok_or_else(|| PoolError::InvalidHandle(format!("{handle} is not leased")))?;
        conn.retiring = true;
        Ok(())
    }

    fn checkout_idle(&self, inner: &mut PoolInner) -> Option<ConnectionHandle> {
        let mut conn = inner.idle.pop_back()?;
        let lease_id = inner.allocate_id();
        conn.checked_out_at = Some(Instant::now());
        let handle = ConnectionHandle {
            pool_id: self.id,
            lease_id,
            connection_id: conn.id,
        };
        inner.in_use.insert(lease_id, conn);
        debug!(
            pool_id = self.id,
            connection = handle.connection_id,
            lease = lease_id,
            "reused idle connection from pool"
        );
        Some(handle)
    }

    fn reserve(&self, inner: &mut PoolInner) -> PendingSlot<'_> {
        inner.pending += 1;
        PendingSlot {
            pool: self,
            armed: true,
        }
    }

    async fn connect(&self, timeout: Duration) -> Result<Box<dyn ConnectionBackend>, String> {
        let factory = Arc::clone(&self.factory);
        let credentials = self.credentials.clone();
        match tokio::task::spawn_blocking(move || factory.connect(&credentials, timeout)).await {
            Ok(result) => result,
            Err(e) => Err(format!("connection task failed: {e}")),
        }
    }

    fn deadline_error(
        &self,
        started: tokio::time::Instant,
        attempts: u32,
        last_error: Option<String>,
    ) -> PoolError {
        match last_error {
            Some(last_error) if attempts > 0 => PoolError::ExhaustedRetries {
                attempts,
                last_error,
            },
            _ => PoolError::Timeout {
                waited: started.elapsed(),
                max_size: self.config.max_size(),
            },
        }
    }

    // ── State transitions ───────────────────────────────────────────

    /// Stop granting new leases. Idempotent; waiters fail with `Suspended`.
    pub fn suspend(&self) -> PoolResult<()> {
        {
            let mut inner = self.lock();
            match inner.state {
                PoolState::Closed => return Err(PoolError::Closed),
                PoolState::Suspended => {
                    debug!(pool_id = self.id, "pool already suspended");
                    return Ok(());
                }
                PoolState::Running => inner.state = PoolState::Suspended,
            }
        }
        self.available.notify_waiters();
        info!(pool_id = self.id, "pool suspended");
        Ok(())
    }

    /// Resume granting leases. Idempotent.
    pub fn resume(&self) -> PoolResult<()> {
        {
            let mut inner = self.lock();
            match inner.state {
                PoolState::Closed => return Err(PoolError::Closed),
                PoolState::Running => {
                    debug!(pool_id = self.id, "pool already running");
                    return Ok(());
                }
                PoolState::Suspended => inner.state = PoolState::Running,
            }
        }
        self.available.notify_waiters();
        info!(pool_id = self.id, "pool resumed");
        Ok(())
    }

    /// Close every idle connection now and retire every leased one on release.
    ///
    /// The pool is not refilled here; the next maintenance pass replenishes
    /// idle connections toward `min_idle`.
    pub fn soft_evict(&self) -> EvictReport {
        let (idle, marked) = {
            let mut inner = self.lock();
            let idle: Vec<PooledConnection> = inner.idle.drain(..).collect();
            let mut marked = 0;
            for conn in inner.in_use.values_mut() {
                if !conn.retiring {
                    conn.retiring = true;
                    marked += 1;
                }
            }
            (idle, marked)
        };
        for conn in &idle {
            conn.close();
        }
        // Freed slots may unblock waiters.
        self.available.notify_waiters();
        info!(
            pool_id = self.id,
            idle_closed = idle.len(),
            marked_retiring = marked,
            "soft eviction complete"
        );
        EvictReport {
            idle_closed: idle.len(),
            marked_retiring: marked,
        }
    }

    /// Move to `Closed`: refuse new leases, wake waiters, close idle
    /// connections. Leased connections are closed as they are released.
    ///
    /// Returns `false` if the pool was already closed.
    pub fn begin_close(&self) -> bool {
        let (idle, in_use) = {
            let mut inner = self.lock();
            if inner.state == PoolState::Closed {
                return false;
            }
            inner.state = PoolState::Closed;
            let idle: Vec<PooledConnection> = inner.idle.drain(..).collect();
            (idle, inner.in_use.len())
        };
        self.closed_tx.send_replace(true);
        self.available.notify_waiters();
        for conn in &idle {
            conn.close();
        }
        info!(
            pool_id = self.id,
            idle_closed = idle.len(),
            in_use,
            "pool closed to new leases"
        );
        true
    }

    /// Wait up to `timeout` for leased connections to come back.
    ///
    /// Connections still leased at the deadline are abandoned: they are
    /// logged and left valid, never severed underneath their holders.
    pub async fn drain(&self, timeout: Duration) -> DrainReport {
        let started = tokio::time::Instant::now();
        let deadline = started + timeout;

        loop {
            let active = self.lock().in_use.len();
            if active == 0 {
                info!(pool_id = self.id, "all leases returned, pool drained");
                return DrainReport {
                    abandoned: 0,
                    waited_ms: millis(started.elapsed()),
                };
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                warn!(
                    pool_id = self.id,
                    abandoned = active,
                    drain_timeout = ?timeout,
                    "drain timeout expired, abandoning connections still leased"
                );
                return DrainReport {
                    abandoned: active,
                    waited_ms: millis(started.elapsed()),
                };
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Close the pool and drain it with the configured drain timeout.
    pub async fn close(&self) -> DrainReport {
        self.begin_close();
        self.drain(self.config.drain_timeout()).await
    }

    // ── Maintenance ─────────────────────────────────────────────────

    async fn warm_up(&self) -> PoolResult<()> {
        let target = self.config.min_idle();
        let mut established = 0usize;
        let mut attempts = 0u32;
        let mut last_error = None;

        for _ in 0..target {
            let slot = {
                let mut inner = self.lock();
                self.reserve(&mut inner)
            };
            attempts += 1;
            match self.connect(self.config.connect_timeout()).await {
                Ok(backend) => {
                    if slot.into_idle(backend) {
                        established += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        pool_id = self.id,
                        attempt = attempts,
                        error = %e,
                        "failed to establish warm-up connection"
                    );
                    last_error = Some(e);
                }
            }
        }

        if target > 0 && established == 0 {
            return Err(PoolError::ExhaustedRetries {
                attempts,
                last_error: last_error.unwrap_or_default(),
            });
        }
        if established < target {
            warn!(
                pool_id = self.id,
                established,
                min_idle = target,
                "pool started below min_idle, maintenance will replenish"
            );
        }
        info!(pool_id = self.id, idle = established, "connection pool ready");
        Ok(())
    }

    fn spawn_maintenance(pool: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(pool);
        let interval = pool.config.maintenance_interval();
        let mut closed_rx = pool.closed_tx.subscribe();
        let pool_id = pool.id;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = closed_rx.changed() => {
                        debug!(pool_id, "maintenance task stopped");
                        return;
                    }
                }
                let Some(pool) = weak.upgrade() else {
                    return;
                };
                if pool.state() == PoolState::Closed {
                    return;
                }
                let report = pool.maintain().await;
                if !report.is_noop() {
                    debug!(pool_id, ?report, "maintenance pass complete");
                }
            }
        });
    }

    /// One maintenance pass: evict expired connections, flag leaks, then
    /// replenish idle connections toward `min_idle` while running.
    pub async fn maintain(&self) -> SweepReport {
        let mut report = self.sweep_at(Instant::now());
        if self.state() == PoolState::Running {
            report.replenished = self.replenish().await;
        }
        report
    }

    fn sweep_at(&self, now: Instant) -> SweepReport {
        let idle_timeout = self.config.idle_timeout();
        let max_lifetime = self.config.max_lifetime();
        let leak_threshold = self.config.leak_detection_threshold();
        let min_idle = self.config.min_idle();

        let mut report = SweepReport::default();
        let mut retired = Vec::new();
        {
            let mut inner = self.lock();

            let mut survivors = VecDeque::with_capacity(inner.idle.len());
            for conn in inner.idle.drain(..) {
                if conn.lifetime_exceeded(max_lifetime, now) {
                    report.lifetime_expired += 1;
                    retired.push(conn);
                } else {
                    survivors.push_back(conn);
                }
            }

            if !idle_timeout.is_zero() {
                let mut remaining = survivors.len();
                let mut kept = VecDeque::with_capacity(remaining);
                for conn in survivors {
                    if remaining > min_idle
                        && now.saturating_duration_since(conn.last_used) > idle_timeout
                    {
                        remaining -= 1;
                        report.idle_expired += 1;
                        retired.push(conn);
                    } else {
                        kept.push_back(conn);
                    }
                }
                survivors = kept;
            }
            inner.idle = survivors;

            for (lease, conn) in inner.in_use.iter_mut() {
                if !conn.retiring && conn.lifetime_exceeded(max_lifetime, now) {
                    conn.retiring = true;
                    report.marked_retiring += 1;
                }
                if leak_threshold.is_zero() || conn.leak_reported {
                    continue;
                }
                let Some(at) = conn.checked_out_at else {
                    continue;
                };
                let held = now.saturating_duration_since(at);
                if held > leak_threshold {
                    conn.leak_reported = true;
                    report.leaks_detected += 1;
                    warn!(
                        pool_id = self.id,
                        connection = conn.id,
                        lease = *lease,
                        held_ms = millis(held),
                        threshold_ms = millis(leak_threshold),
                        "possible connection leak: lease held longer than leak detection threshold"
                    );
                }
            }
        }

        for conn in &retired {
            conn.close();
        }
        if !retired.is_empty() {
            info!(
                pool_id = self.id,
                idle_expired = report.idle_expired,
                lifetime_expired = report.lifetime_expired,
                "retired expired idle connections"
            );
            self.available.notify_waiters();
        }
        report
    }

    async fn replenish(&self) -> usize {
        let mut established = 0;
        loop {
            let slot = {
                let mut inner = self.lock();
                if inner.state != PoolState::Running
                    || inner.idle.len() + inner.pending >= self.config.min_idle()
                    || inner.total() >= self.config.max_size()
                {
                    break;
                }
                self.reserve(&mut inner)
            };
            match self.connect(self.config.connect_timeout()).await {
                Ok(backend) => {
                    if !slot.into_idle(backend) {
                        break;
                    }
                    established += 1;
                }
                Err(e) => {
                    warn!(pool_id = self.id, error = %e, "failed to replenish idle connections");
                    break;
                }
            }
        }
        if established > 0 {
            debug!(pool_id = self.id, established, "replenished idle connections");
        }
        established
    }

    // ── Introspection ───────────────────────────────────────────────

    /// A fresh, self-consistent snapshot of pool accounting.
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        let inner = self.lock();
        PoolMetricsSnapshot {
            pool_id: self.id,
            state: inner.state,
            total: inner.total(),
            active: inner.in_use.len(),
            idle: inner.idle.len(),
            pending: inner.pending,
            waiting: inner.waiting,
            limits: PoolLimits::from(&self.config),
        }
    }

    /// Every idle and leased connection, ordered by id.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let now = Instant::now();
        let inner = self.lock();
        let mut list: Vec<ConnectionInfo> = inner
            .idle
            .iter()
            .map(|conn| ConnectionInfo {
                id: conn.id,
                status: ConnectionStatus::Idle,
                age_ms: millis(now.saturating_duration_since(conn.created_at)),
                idle_ms: Some(millis(now.saturating_duration_since(conn.last_used))),
                held_ms: None,
                lease_id: None,
                leak_suspected: false,
            })
            .chain(inner.in_use.iter().map(|(lease, conn)| ConnectionInfo {
                id: conn.id,
                status: if conn.retiring {
                    ConnectionStatus::Retiring
                } else {
                    ConnectionStatus::InUse
                },
                age_ms: millis(now.saturating_duration_since(conn.created_at)),
                idle_ms: None,
                held_ms: conn
                    .checked_out_at
                    .map(|at| millis(now.saturating_duration_since(at))),
                lease_id: Some(*lease),
                leak_suspected: conn.leak_reported,
            }))
            .collect();
        list.sort_by_key(|info| info.id);
        list
    }

    /// Lease a connection within `connect_timeout`, ping it, and release it.
    ///
    /// A failed ping retires the connection.
    pub async fn test_connection(self: &Arc<Self>) -> PoolResult<ConnectionTest> {
        let started = Instant::now();
        let lease = self.lease(self.config.connect_timeout()).await?;
        let connection_id = lease.handle().connection_id();
        let backend = self.backend_of(lease.handle())?;

        let alive = tokio::task::spawn_blocking(move || lock_backend(&backend).ping())
            .await
            .unwrap_or(false);
        let elapsed = started.elapsed();

        if !alive {
            lease.mark_broken();
            warn!(
                pool_id = self.id,
                connection = connection_id,
                "connection failed validation ping, retiring it"
            );
            return Err(PoolError::ValidationFailed(format!(
                "connection {connection_id} did not answer ping after {elapsed:?}"
            )));
        }

        drop(lease);
        debug!(
            pool_id = self.id,
            connection = connection_id,
            elapsed_ms = millis(elapsed),
            "connection test passed"
        );
        Ok(ConnectionTest {
            pool_id: self.id,
            connection_id,
            elapsed_ms: millis(elapsed),
        })
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

enum Step<'a> {
    Establish(PendingSlot<'a>),
    Wait(WaitGuard<'a>),
}

/// Counts a caller in `waiting` for as long as it is blocked.
struct WaitGuard<'a> {
    pool: &'a ConnectionPool,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.pool.lock();
        inner.waiting = inner.waiting.saturating_sub(1);
    }
}

/// A reserved slot for a connection being established.
///
/// Dropping an unused slot gives the capacity back and wakes one waiter.
struct PendingSlot<'a> {
    pool: &'a ConnectionPool,
    armed: bool,
}

impl PendingSlot<'_> {
    /// Turn the slot into a lease for the caller.
    fn checkout(mut self, backend: Box<dyn ConnectionBackend>) -> PoolResult<ConnectionHandle> {
        self.armed = false;
        let pool = self.pool;
        let outcome = {
            let mut inner = pool.lock();
            inner.pending -= 1;
            let id = inner.allocate_id();
            let mut conn = PooledConnection::new(id, backend);
            match inner.state {
                PoolState::Running => {
                    let lease_id = inner.allocate_id();
                    conn.checked_out_at = Some(Instant::now());
                    inner.in_use.insert(lease_id, conn);
                    Ok(ConnectionHandle {
                        pool_id: pool.id,
                        lease_id,
                        connection_id: id,
                    })
                }
                PoolState::Suspended => {
                    inner.idle.push_back(conn);
                    Err((None, PoolError::Suspended))
                }
                PoolState::Closed => Err((Some(conn), PoolError::Closed)),
            }
        };

        match outcome {
            Ok(handle) => {
                debug!(
                    pool_id = pool.id,
                    connection = handle.connection_id,
                    lease = handle.lease_id,
                    "created new connection"
                );
                Ok(handle)
            }
            Err((leftover, err)) => {
                if let Some(conn) = leftover {
                    conn.close();
                }
                pool.available.notify_one();
                Err(err)
            }
        }
    }

    /// Park the new connection in the idle queue. Returns `false` if the
    /// pool closed meanwhile and the connection was closed instead.
    fn into_idle(mut self, backend: Box<dyn ConnectionBackend>) -> bool {
        self.armed = false;
        let pool = self.pool;
        let leftover = {
            let mut inner = pool.lock();
            inner.pending -= 1;
            let id = inner.allocate_id();
            let conn = PooledConnection::new(id, backend);
            if inner.state == PoolState::Closed {
                Some(conn)
            } else {
                inner.idle.push_back(conn);
                None
            }
        };
        match leftover {
            Some(conn) => {
                conn.close();
                false
            }
            None => {
                pool.available.notify_one();
                true
            }
        }
    }
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut inner = self.pool.lock();
            inner.pending = inner.pending.saturating_sub(1);
        }
        self.pool.available.notify_one();
    }
}
