//! In-memory executor used by unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ScanError, ScanResult};
use crate::meta::{COUNT_PROJECTION, LIMIT_CLAUSE};
use crate::provider::{BufferedCursor, Connection, Cursor, ExecOutcome, Executor, Provider, Row};
use crate::value::Value;

/// Rows `[id, "user-<id>"]` for ids `1..=n`.
pub fn rows_of(n: usize) -> Vec<Vec<Value>> {
    (1..=n as i64)
        .map(|i| vec![Value::Int64(i), Value::Text(format!("user-{i}"))])
        .collect()
}

/// A single table that understands just enough SQL for the scan tests.
///
/// Queries containing `COUNT(*)` return the row count, queries ending in the
/// limit clause are sliced by their last two arguments, and every other
/// query returns all rows. `INSERT` appends its arguments as a row.
#[derive(Default)]
pub struct MemoryTable {
    rows: Mutex<Vec<Vec<Value>>>,
    snapshot: Mutex<Option<Vec<Vec<Value>>>>,
    log: Mutex<Vec<(String, Vec<Value>)>>,
    open: Arc<AtomicUsize>,
    fail_counts: AtomicBool,
    empty_counts: AtomicBool,
    fail_rollback: AtomicBool,
}

impl MemoryTable {
    pub fn new(rows: Vec<Vec<Value>>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Self::default()
        }
    }

    pub fn rows(&self) -> Vec<Vec<Value>> {
        self.rows.lock().clone()
    }

    pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.log.lock().clone()
    }

    pub fn count_queries(&self) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|(sql, _)| sql.contains(COUNT_PROJECTION))
            .count()
    }

    pub fn open_cursors(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn in_transaction(&self) -> bool {
        self.snapshot.lock().is_some()
    }

    pub fn fail_counts(&self) {
        self.fail_counts.store(true, Ordering::SeqCst);
    }

    pub fn empty_counts(&self) {
        self.empty_counts.store(true, Ordering::SeqCst);
    }

    pub fn fail_rollback(&self) {
        self.fail_rollback.store(true, Ordering::SeqCst);
    }

    fn record(&self, sql: &str, args: &[Value]) {
        self.log.lock().push((sql.to_string(), args.to_vec()));
    }

    fn open_cursor(&self, rows: Vec<Vec<Value>>) -> TrackedCursor {
        self.open.fetch_add(1, Ordering::SeqCst);
        TrackedCursor {
            inner: BufferedCursor::new(rows),
            open: Arc::clone(&self.open),
        }
    }
}

fn window_arg(value: Option<&Value>) -> ScanResult<usize> {
    value
        .and_then(Value::as_i64)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| ScanError::Query("bad window argument".to_string()))
}

impl Executor for MemoryTable {
    type Cursor = TrackedCursor;

    fn query(&self, sql: &str, args: &[Value]) -> ScanResult<TrackedCursor> {
        self.record(sql, args);
        let rows = self.rows.lock().clone();

        if sql.contains(COUNT_PROJECTION) {
            if self.fail_counts.load(Ordering::SeqCst) {
                return Err(ScanError::Query("count failed".to_string()));
            }
            if self.empty_counts.load(Ordering::SeqCst) {
                return Ok(self.open_cursor(Vec::new()));
            }
            return Ok(self.open_cursor(vec![vec![Value::Int64(rows.len() as i64)]]));
        }

        if sql.ends_with(LIMIT_CLAUSE) {
            let n = args.len();
            if n < 2 {
                return Err(ScanError::Query("missing window arguments".to_string()));
            }
            let offset = window_arg(args.get(n - 2))?;
            let limit = window_arg(args.get(n - 1))?;
            let page = rows.into_iter().skip(offset).take(limit).collect();
            return Ok(self.open_cursor(page));
        }

        Ok(self.open_cursor(rows))
    }

    fn execute(&self, sql: &str, args: &[Value]) -> ScanResult<ExecOutcome> {
        self.record(sql, args);
        if args.iter().any(|v| v.as_str() == Some("fail")) {
            return Err(ScanError::Query(format!("constraint failed: {sql}")));
        }
        let mut rows = self.rows.lock();
        if sql.starts_with("INSERT") {
            rows.push(args.to_vec());
            return Ok(ExecOutcome {
                rows_affected: 1,
                last_insert_id: Some(rows.len() as i64),
            });
        }
        if sql.starts_with("DELETE") {
            let removed = rows.len() as u64;
            rows.clear();
            return Ok(ExecOutcome {
                rows_affected: removed,
                last_insert_id: None,
            });
        }
        Ok(ExecOutcome::default())
    }
}

impl Connection for MemoryTable {
    fn begin(&self) -> ScanResult<()> {
        let mut snapshot = self.snapshot.lock();
        if snapshot.is_some() {
            return Err(ScanError::Connection("transaction already open".to_string()));
        }
        *snapshot = Some(self.rows.lock().clone());
        Ok(())
    }

    fn commit(&self) -> ScanResult<()> {
        self.snapshot
            .lock()
            .take()
            .map(|_| ())
            .ok_or_else(|| ScanError::Connection("no transaction".to_string()))
    }

    fn rollback(&self) -> ScanResult<()> {
        if self.fail_rollback.load(Ordering::SeqCst) {
            return Err(ScanError::Connection("rollback failed".to_string()));
        }
        let saved = self
            .snapshot
            .lock()
            .take()
            .ok_or_else(|| ScanError::Connection("no transaction".to_string()))?;
        *self.rows.lock() = saved;
        Ok(())
    }
}

/// A provider whose every connection is the same shared table.
impl Provider for Arc<MemoryTable> {
    type Conn = Arc<MemoryTable>;

    fn acquire(&self) -> ScanResult<Self::Conn> {
        Ok(Arc::clone(self))
    }
}

/// Cursor that keeps the table's open-cursor count.
pub struct TrackedCursor {
    inner: BufferedCursor,
    open: Arc<AtomicUsize>,
}

impl Row for TrackedCursor {
    fn column_count(&self) -> usize {
        self.inner.column_count()
    }

    fn value(&self, index: usize) -> ScanResult<&Value> {
        self.inner.value(index)
    }
}

impl Cursor for TrackedCursor {
    fn advance(&mut self) -> ScanResult<bool> {
        self.inner.advance()
    }

    fn close(&mut self) {
        if !self.inner.is_closed() {
            self.inner.close();
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
