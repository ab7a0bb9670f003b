//! SQLite driver.
//!
//! Result sets are read completely while the statement is borrowed and
//! handed out as a [`SqliteCursor`], so cursors outlive the pooled
//! connection they came from.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rowscan_core::{
    BufferedCursor, Connection, Cursor, ExecOutcome, Executor, Row, ScanError, ScanResult, Value,
};
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{OpenFlags, ToSql};

use crate::config::DatabaseConfig;
use crate::error::ClientResult;
use crate::pool::ConnectionManager;

/// Layout used when a timestamp argument is stored as text.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

static MEMORY_DB_ID: AtomicU64 = AtomicU64::new(0);

enum Target {
    File(PathBuf),
    Memory {
        uri: String,
        /// Keeps the shared in-memory database alive while the pool is
        /// empty.
        _keeper: Mutex<rusqlite::Connection>,
    },
}

/// Opens SQLite connections for a pool.
pub struct SqliteManager {
    target: Target,
    busy_timeout: Duration,
}

impl SqliteManager {
    /// Manager for a database file.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            target: Target::File(path.into()),
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// Manager for a fresh in-memory database shared by every connection
    /// the manager opens.
    pub fn memory() -> ClientResult<Self> {
        let id = MEMORY_DB_ID.fetch_add(1, Ordering::Relaxed);
        let uri = format!(
            "file:rowscan-mem-{}-{id}?mode=memory&cache=shared",
            std::process::id()
        );
        let keeper = rusqlite::Connection::open_with_flags(&uri, memory_flags())?;
        Ok(Self {
            target: Target::Memory {
                uri,
                _keeper: Mutex::new(keeper),
            },
            busy_timeout: Duration::from_secs(5),
        })
    }

    /// Manager for a configured database.
    pub fn from_config(config: &DatabaseConfig) -> ClientResult<Self> {
        let manager = if config.is_memory() {
            Self::memory()?
        } else {
            Self::file(&config.path)
        };
        Ok(manager.busy_timeout(config.busy_timeout_duration()))
    }

    /// Sets the busy timeout applied to each new connection.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Human-readable database location.
    pub fn location(&self) -> String {
        match &self.target {
            Target::File(path) => path.display().to_string(),
            Target::Memory { uri, .. } => uri.clone(),
        }
    }
}

fn memory_flags() -> OpenFlags {
    OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_URI
}

impl ConnectionManager for SqliteManager {
    type Connection = SqliteConnection;

    fn connect(&self) -> ClientResult<SqliteConnection> {
        let conn = match &self.target {
            Target::File(path) => rusqlite::Connection::open(path)?,
            Target::Memory { uri, .. } => rusqlite::Connection::open_with_flags(uri, memory_flags())?,
        };
        conn.busy_timeout(self.busy_timeout)?;
        tracing::trace!(location = %self.location(), "opened sqlite connection");
        Ok(SqliteConnection { conn })
    }

    fn is_valid(&self, conn: &mut SqliteConnection) -> bool {
        // A connection left inside a transaction must not be reused.
        conn.conn.is_autocommit()
    }
}

impl std::fmt::Debug for SqliteManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteManager")
            .field("location", &self.location())
            .field("busy_timeout", &self.busy_timeout)
            .finish()
    }
}

/// One SQLite connection.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    /// Opens a connection outside of any pool.
    pub fn open(path: impl Into<PathBuf>) -> ClientResult<Self> {
        SqliteManager::file(path).connect()
    }

    /// Returns the underlying rusqlite connection.
    pub fn inner(&self) -> &rusqlite::Connection {
        &self.conn
    }
}

fn query_error(err: rusqlite::Error) -> ScanError {
    ScanError::Query(err.to_string())
}

/// Positional argument adapter.
struct Param<'a>(&'a Value);

impl ToSql for Param<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.0 {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Bool(v) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*v))),
            Value::Int32(v) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*v))),
            Value::Int64(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Value::Float32(v) => ToSqlOutput::Owned(SqlValue::Real(f64::from(*v))),
            Value::Float64(v) => ToSqlOutput::Owned(SqlValue::Real(*v)),
            Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Timestamp(v) => {
                ToSqlOutput::Owned(SqlValue::Text(v.format(TIMESTAMP_FORMAT).to_string()))
            }
            Value::Bytes(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
        })
    }
}

fn params(args: &[Value]) -> impl Iterator<Item = Param<'_>> {
    args.iter().map(Param)
}

fn column_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int64(v),
        ValueRef::Real(v) => Value::Float64(v),
        ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => Value::Bytes(v.to_vec()),
    }
}

impl Executor for SqliteConnection {
    type Cursor = SqliteCursor;

    fn query(&self, sql: &str, args: &[Value]) -> ScanResult<SqliteCursor> {
        tracing::trace!(sql, args = args.len(), "sqlite query");
        let mut stmt = self.conn.prepare_cached(sql).map_err(query_error)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let mut rows = stmt
            .query(rusqlite::params_from_iter(params(args)))
            .map_err(query_error)?;
        let mut buffered = Vec::new();
        while let Some(row) = rows.next().map_err(query_error)? {
            let mut values = Vec::with_capacity(width);
            for index in 0..width {
                values.push(column_value(row.get_ref(index).map_err(query_error)?));
            }
            buffered.push(values);
        }

        Ok(SqliteCursor {
            inner: BufferedCursor::with_columns(columns, buffered),
        })
    }

    fn execute(&self, sql: &str, args: &[Value]) -> ScanResult<ExecOutcome> {
        tracing::trace!(sql, args = args.len(), "sqlite execute");
        let mut stmt = self.conn.prepare_cached(sql).map_err(query_error)?;
        // The connection keeps the rowid of its last INSERT; only a new one
        // belongs to this statement.
        let before = self.conn.last_insert_rowid();
        let changed = stmt
            .execute(rusqlite::params_from_iter(params(args)))
            .map_err(query_error)?;
        let rowid = self.conn.last_insert_rowid();
        Ok(ExecOutcome {
            rows_affected: changed as u64,
            last_insert_id: (rowid != before).then_some(rowid),
        })
    }
}

impl Connection for SqliteConnection {
    fn begin(&self) -> ScanResult<()> {
        self.conn.execute_batch("BEGIN").map_err(query_error)
    }

    fn commit(&self) -> ScanResult<()> {
        self.conn.execute_batch("COMMIT").map_err(query_error)
    }

    fn rollback(&self) -> ScanResult<()> {
        self.conn.execute_batch("ROLLBACK").map_err(query_error)
    }
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("autocommit", &self.conn.is_autocommit())
            .finish()
    }
}

/// Buffered result set of one SQLite statement.
#[derive(Debug)]
pub struct SqliteCursor {
    inner: BufferedCursor,
}

impl SqliteCursor {
    /// Column names reported by SQLite.
    pub fn columns(&self) -> &[String] {
        self.inner.columns()
    }
}

impl Row for SqliteCursor {
    fn column_count(&self) -> usize {
        self.inner.column_count()
    }

    fn value(&self, index: usize) -> ScanResult<&Value> {
        self.inner.value(index)
    }
}

impl Cursor for SqliteCursor {
    fn advance(&mut self) -> ScanResult<bool> {
        self.inner.advance()
    }

    fn close(&mut self) {
        self.inner.close();
    }
}
