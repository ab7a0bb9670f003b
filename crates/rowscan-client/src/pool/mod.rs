//! Blocking connection pool.
//!
//! Connections are created on demand up to `max_open`. Callers that find
//! the pool at its limit wait on a condition variable until a connection is
//! returned or `acquire_timeout` elapses. Returned connections are kept
//! idle up to `max_idle`; expired ones are closed on the way in and out.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rowscan_core::{Connection, ExecOutcome, Executor, Provider, ScanResult, Value};

use crate::error::{ClientError, ClientResult};

/// Opens and checks connections for a [`Pool`].
pub trait ConnectionManager: Send + Sync + 'static {
    /// Connection type handed out by the pool.
    type Connection: Send;

    /// Opens a new connection.
    fn connect(&self) -> ClientResult<Self::Connection>;

    /// Returns false if an idle connection should be discarded.
    fn is_valid(&self, _conn: &mut Self::Connection) -> bool {
        true
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of open connections.
    pub max_open: usize,
    /// Maximum number of idle connections kept.
    pub max_idle: usize,
    /// How long to wait for a connection.
    pub acquire_timeout: Duration,
    /// Maximum lifetime of a connection.
    pub max_lifetime: Option<Duration>,
    /// How long a connection can be idle before being closed.
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open: 16,
            max_idle: 16,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: None,
            idle_timeout: None,
        }
    }
}

impl PoolConfig {
    /// Creates a new pool configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum open connections.
    pub fn max_open(mut self, max: usize) -> Self {
        self.max_open = max;
        self
    }

    /// Sets the maximum idle connections.
    pub fn max_idle(mut self, max: usize) -> Self {
        self.max_idle = max;
        self
    }

    /// Sets the acquire timeout.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Sets the max lifetime.
    pub fn max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Sets the idle timeout.
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ClientResult<()> {
        if self.max_open == 0 {
            return Err(ClientError::InvalidConfig(
                "max_open must be greater than 0".to_string(),
            ));
        }
        if self.max_idle > self.max_open {
            return Err(ClientError::InvalidConfig(
                "max_idle cannot be greater than max_open".to_string(),
            ));
        }
        Ok(())
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.acquire_timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total connections created.
    pub connections_created: u64,
    /// Total connections closed.
    pub connections_closed: u64,
    /// Total acquisitions.
    pub acquisitions: u64,
    /// Total releases.
    pub releases: u64,
    /// Acquisition timeouts.
    pub timeouts: u64,
    /// Connections currently open.
    pub open: usize,
    /// Connections currently idle.
    pub idle: usize,
}

impl PoolStats {
    /// Connections currently handed out.
    pub fn in_use(&self) -> usize {
        self.open.saturating_sub(self.idle)
    }
}

/// A connection plus its bookkeeping.
struct Entry<C> {
    conn: C,
    created_at: Instant,
    last_used: Instant,
    use_count: u64,
}

impl<C> Entry<C> {
    fn new(conn: C) -> Self {
        let now = Instant::now();
        Self {
            conn,
            created_at: now,
            last_used: now,
            use_count: 0,
        }
    }

    fn is_expired(&self, max_lifetime: Option<Duration>) -> bool {
        max_lifetime.is_some_and(|max| self.created_at.elapsed() >= max)
    }

    fn is_stale(&self, idle_timeout: Option<Duration>) -> bool {
        idle_timeout.is_some_and(|max| self.last_used.elapsed() >= max)
    }
}

struct PoolState<C> {
    idle: VecDeque<Entry<C>>,
    open: usize,
    closed: bool,
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    closed: AtomicU64,
    acquisitions: AtomicU64,
    releases: AtomicU64,
    timeouts: AtomicU64,
}

struct Shared<M: ConnectionManager> {
    manager: M,
    config: PoolConfig,
    state: Mutex<PoolState<M::Connection>>,
    returned: Condvar,
    counters: Counters,
}

impl<M: ConnectionManager> Shared<M> {
    fn discard(&self, state: &mut PoolState<M::Connection>, entry: Entry<M::Connection>) {
        state.open = state.open.saturating_sub(1);
        self.counters.closed.fetch_add(1, Ordering::Relaxed);
        drop(entry);
    }

    fn release(&self, mut entry: Entry<M::Connection>) {
        entry.last_used = Instant::now();
        self.counters.releases.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        let keep = !state.closed
            && state.idle.len() < self.config.max_idle
            && !entry.is_expired(self.config.max_lifetime);
        if keep {
            state.idle.push_back(entry);
        } else {
            self.discard(&mut state, entry);
        }
        drop(state);
        self.returned.notify_one();
    }
}

/// A blocking connection pool.
pub struct Pool<M: ConnectionManager> {
    shared: Arc<Shared<M>>,
}

impl<M: ConnectionManager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: ConnectionManager> Pool<M> {
    /// Creates a pool. No connection is opened until the first acquire.
    pub fn new(manager: M, config: PoolConfig) -> ClientResult<Self> {
        config.validate()?;
        tracing::info!(
            max_open = config.max_open,
            max_idle = config.max_idle,
            "connection pool created"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                manager,
                config,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    open: 0,
                    closed: false,
                }),
                returned: Condvar::new(),
                counters: Counters::default(),
            }),
        })
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Returns the connection manager.
    pub fn manager(&self) -> &M {
        &self.shared.manager
    }

    /// Takes a connection, waiting up to the acquire timeout.
    pub fn get(&self) -> ClientResult<PooledConnection<M>> {
        let shared = &self.shared;
        let deadline = Instant::now() + shared.config.acquire_timeout;
        let mut state = shared.state.lock();

        loop {
            if state.closed {
                return Err(ClientError::PoolClosed);
            }

            while let Some(mut entry) = state.idle.pop_front() {
                if entry.is_expired(shared.config.max_lifetime)
                    || entry.is_stale(shared.config.idle_timeout)
                    || !shared.manager.is_valid(&mut entry.conn)
                {
                    shared.discard(&mut state, entry);
                    continue;
                }
                drop(state);
                return Ok(self.hand_out(entry));
            }

            if state.open < shared.config.max_open {
                state.open += 1;
                drop(state);
                return self.open_new();
            }

            if shared.returned.wait_until(&mut state, deadline).timed_out() {
                shared.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    timeout_ms = shared.config.timeout_ms(),
                    "timed out waiting for a pooled connection"
                );
                return Err(ClientError::PoolTimeout(shared.config.timeout_ms()));
            }
        }
    }

    /// Opens a connection into a slot already reserved in `open`.
    fn open_new(&self) -> ClientResult<PooledConnection<M>> {
        match self.shared.manager.connect() {
            Ok(conn) => {
                self.shared.counters.created.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("opened pooled connection");
                Ok(self.hand_out(Entry::new(conn)))
            }
            Err(err) => {
                self.shared.state.lock().open -= 1;
                self.shared.returned.notify_one();
                Err(err)
            }
        }
    }

    fn hand_out(&self, mut entry: Entry<M::Connection>) -> PooledConnection<M> {
        entry.use_count += 1;
        self.shared.counters.acquisitions.fetch_add(1, Ordering::Relaxed);
        PooledConnection {
            shared: Arc::clone(&self.shared),
            entry: Some(entry),
        }
    }

    /// Returns pool statistics.
    pub fn stats(&self) -> PoolStats {
        let counters = &self.shared.counters;
        let state = self.shared.state.lock();
        PoolStats {
            connections_created: counters.created.load(Ordering::Relaxed),
            connections_closed: counters.closed.load(Ordering::Relaxed),
            acquisitions: counters.acquisitions.load(Ordering::Relaxed),
            releases: counters.releases.load(Ordering::Relaxed),
            timeouts: counters.timeouts.load(Ordering::Relaxed),
            open: state.open,
            idle: state.idle.len(),
        }
    }

    /// Closes the pool. Idle connections are closed now, connections in use
    /// when they are returned.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        let idle = std::mem::take(&mut state.idle);
        for entry in idle {
            self.shared.discard(&mut state, entry);
        }
        drop(state);
        self.shared.returned.notify_all();
        tracing::info!("connection pool closed");
    }

    /// Returns true if the pool is closed.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }
}

impl<M: ConnectionManager> std::fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("Pool")
            .field("max_open", &self.shared.config.max_open)
            .field("open", &stats.open)
            .field("idle", &stats.idle)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A connection taken from a [`Pool`].
///
/// When dropped, the connection is returned to the pool.
pub struct PooledConnection<M: ConnectionManager> {
    shared: Arc<Shared<M>>,
    entry: Option<Entry<M::Connection>>,
}

impl<M: ConnectionManager> PooledConnection<M> {
    fn entry(&self) -> &Entry<M::Connection> {
        // Only `Drop` takes the entry.
        match &self.entry {
            Some(entry) => entry,
            None => unreachable!("pooled connection used after release"),
        }
    }

    /// Returns how long the connection has been alive.
    pub fn connection_age(&self) -> Duration {
        self.entry().created_at.elapsed()
    }

    /// Returns how many times this connection has been handed out.
    pub fn use_count(&self) -> u64 {
        self.entry().use_count
    }
}

impl<M: ConnectionManager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &M::Connection {
        &self.entry().conn
    }
}

impl<M: ConnectionManager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut M::Connection {
        match &mut self.entry {
            Some(entry) => &mut entry.conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.shared.release(entry);
        }
    }
}

impl<M: ConnectionManager> std::fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection_age", &self.connection_age())
            .field("use_count", &self.use_count())
            .finish()
    }
}

impl<M> Executor for PooledConnection<M>
where
    M: ConnectionManager,
    M::Connection: Executor,
{
    type Cursor = <M::Connection as Executor>::Cursor;

    fn query(&self, sql: &str, args: &[Value]) -> ScanResult<Self::Cursor> {
        (**self).query(sql, args)
    }

    fn execute(&self, sql: &str, args: &[Value]) -> ScanResult<ExecOutcome> {
        (**self).execute(sql, args)
    }
}

impl<M> Connection for PooledConnection<M>
where
    M: ConnectionManager,
    M::Connection: Connection,
{
    fn begin(&self) -> ScanResult<()> {
        (**self).begin()
    }

    fn commit(&self) -> ScanResult<()> {
        (**self).commit()
    }

    fn rollback(&self) -> ScanResult<()> {
        (**self).rollback()
    }
}

/// Each statement runs on a connection held only for that statement.
/// Cursors must therefore own their rows.
impl<M> Executor for Pool<M>
where
    M: ConnectionManager,
    M::Connection: Executor,
{
    type Cursor = <M::Connection as Executor>::Cursor;

    fn query(&self, sql: &str, args: &[Value]) -> ScanResult<Self::Cursor> {
        self.get()?.query(sql, args)
    }

    fn execute(&self, sql: &str, args: &[Value]) -> ScanResult<ExecOutcome> {
        self.get()?.execute(sql, args)
    }
}

impl<M> Provider for Pool<M>
where
    M: ConnectionManager,
    M::Connection: Connection,
{
    type Conn = PooledConnection<M>;

    fn acquire(&self) -> ScanResult<Self::Conn> {
        Ok(self.get()?)
    }
}
