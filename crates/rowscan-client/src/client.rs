//! Pooled SQLite client.

use rowscan_core::{
    Cursor, ExecOutcome, Page, PageRequest, Row, ScanExt, ScanResult, Shaped, Slot, Transaction,
    Value,
};

use crate::config::DatabaseConfig;
use crate::error::ClientResult;
use crate::pool::{Pool, PoolConfig, PoolStats, PooledConnection};
use crate::sqlite::SqliteManager;

/// A transaction on a pooled SQLite connection.
pub type ClientTransaction = Transaction<PooledConnection<SqliteManager>>;

/// A handle to one pooled database.
///
/// Cloning is cheap; clones share the pool.
#[derive(Debug, Clone)]
pub struct Client {
    pool: Pool<SqliteManager>,
}

impl Client {
    /// Wraps an existing pool.
    pub fn from_pool(pool: Pool<SqliteManager>) -> Self {
        Self { pool }
    }

    /// Creates a client for a configured database.
    pub fn from_config(config: &DatabaseConfig) -> ClientResult<Self> {
        config.validate()?;
        let manager = SqliteManager::from_config(config)?;
        let pool = Pool::new(manager, config.pool_config())?;
        tracing::info!(keys = %config.key, path = %config.path, "client created");
        Ok(Self::from_pool(pool))
    }

    /// Creates a client for a database file with default pool settings.
    pub fn open(path: &str) -> ClientResult<Self> {
        Self::from_config(&DatabaseConfig::new("default", path))
    }

    /// Creates a client for a new in-memory database.
    pub fn open_memory() -> ClientResult<Self> {
        Self::from_config(&DatabaseConfig::in_memory("default"))
    }

    /// Returns the pool.
    pub fn pool(&self) -> &Pool<SqliteManager> {
        &self.pool
    }

    /// Returns pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Closes the pool.
    pub fn close(&self) {
        self.pool.close();
    }

    /// Runs a query and hands the whole cursor to `f`.
    pub fn scan_with<R, F>(&self, sql: &str, args: &[Value], f: F) -> ClientResult<R>
    where
        F: FnOnce(&mut dyn Cursor) -> ScanResult<R>,
    {
        Ok(self.pool.scan_with(sql, args, f)?)
    }

    /// Runs a query and decodes every row.
    pub fn scan_all<T, F>(&self, sql: &str, args: &[Value], decode: F) -> ClientResult<Vec<T>>
    where
        T: Shaped,
        F: FnMut(&dyn Row) -> ScanResult<T>,
    {
        Ok(self.pool.scan_all(sql, args, decode)?)
    }

    /// Runs a query and decodes the first row, if any.
    pub fn scan_one<T, F>(&self, sql: &str, args: &[Value], decode: F) -> ClientResult<Option<T>>
    where
        T: Shaped,
        F: FnMut(&dyn Row) -> ScanResult<T>,
    {
        Ok(self.pool.scan_one(sql, args, decode)?)
    }

    /// Binds the first row into `slots`. Returns false if there was none.
    pub fn scan_into(&self, sql: &str, args: &[Value], slots: &mut [Slot]) -> ClientResult<bool> {
        Ok(self.pool.scan_into(sql, args, slots)?)
    }

    /// Fetches `limit` rows starting at `offset`.
    pub fn scan_range<T, F>(
        &self,
        sql: &str,
        args: &[Value],
        offset: u64,
        limit: i64,
        decode: F,
    ) -> ClientResult<Vec<T>>
    where
        T: Shaped,
        F: FnMut(&dyn Row) -> ScanResult<T>,
    {
        Ok(self.pool.scan_range(sql, args, offset, limit, decode)?)
    }

    /// Fetches one page and the total number of matching rows.
    pub fn scan_page<T, F>(
        &self,
        sql: &str,
        args: &[Value],
        request: &PageRequest,
        decode: F,
    ) -> ClientResult<Page<T>>
    where
        T: Shaped,
        F: FnMut(&dyn Row) -> ScanResult<T>,
    {
        Ok(self.pool.scan_page(sql, args, request, decode)?)
    }

    /// Runs a statement that returns no rows.
    pub fn exec(&self, sql: &str, args: &[Value]) -> ClientResult<ExecOutcome> {
        Ok(rowscan_core::Executor::execute(&self.pool, sql, args)?)
    }

    /// Runs `sql` once per argument set in one transaction.
    pub fn exec_batch(&self, sql: &str, arg_sets: &[Vec<Value>]) -> ClientResult<Vec<ExecOutcome>> {
        Ok(rowscan_core::exec_batch(&self.pool, sql, arg_sets)?)
    }

    /// Starts a transaction on a dedicated connection.
    pub fn begin(&self) -> ClientResult<ClientTransaction> {
        let conn = self.pool.get()?;
        Ok(Transaction::begin(conn)?)
    }

    /// Pool settings the client was created with.
    pub fn pool_config(&self) -> &PoolConfig {
        self.pool.config()
    }
}
