//! Page coordinator.
//!
//! A page fetch always runs the limit variant of the base statement first.
//! Only when the returned page cannot prove the total does it run the
//! count variant:
//!
//! | rows returned        | offset | total                    |
//! |----------------------|--------|--------------------------|
//! | 0                    | 0      | 0, no count query        |
//! | 0 < n < limit        | any    | offset + n, no count     |
//! | 0 (past the end)     | > 0    | count query              |
//! | n == limit           | any    | count query              |
//!
//! The two queries are not run in one snapshot, so under concurrent writes
//! a counted total may disagree with the page it accompanies.

use std::sync::Arc;

use crate::error::{ScanError, ScanResult};
use crate::meta::{order_sql, SqlMeta, SqlMetaCache};
use crate::provider::{Executor, Row};
use crate::scan::{collect_rows, first_row};
use crate::shape::Shaped;
use crate::value::Value;

/// Page size substituted when a request asks for `limit <= 0`.
pub const UNBOUNDED_LIMIT: u64 = i32::MAX as u64;

/// Which rows to fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Rows to skip.
    pub offset: u64,
    /// Page size. Zero or negative means unbounded.
    pub limit: i64,
    /// Optional sort column.
    pub sort: Option<String>,
    /// Sort descending.
    pub desc: bool,
}

impl PageRequest {
    /// Creates a request for `limit` rows starting at `offset`.
    pub fn new(offset: u64, limit: i64) -> Self {
        Self {
            offset,
            limit,
            ..Self::default()
        }
    }

    /// Creates a request for page `number` (zero-based) of `size` rows.
    pub fn page(number: u64, size: u64) -> Self {
        Self::new(
            number.saturating_mul(size),
            i64::try_from(size).unwrap_or(i64::MAX),
        )
    }

    /// Sorts by `column`.
    pub fn sort_by(mut self, column: impl Into<String>) -> Self {
        self.sort = Some(column.into());
        self
    }

    /// Sets descending order.
    pub fn descending(mut self, desc: bool) -> Self {
        self.desc = desc;
        self
    }

    /// The page size used for the query.
    pub fn effective_limit(&self) -> u64 {
        normalize_limit(self.limit)
    }
}

/// How a page's total was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalSource {
    /// Nothing matched at offset zero.
    Empty,
    /// Inferred from an under-filled page.
    Inferred,
    /// Read back from the count query.
    Counted,
}

/// One page of rows and the total number of matching rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Total matching rows.
    pub total: u64,
    /// Rows of this page, in query order.
    pub rows: Vec<T>,
    /// How `total` was obtained.
    pub source: TotalSource,
}

impl<T> Page<T> {
    /// Number of rows on this page.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the page holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Maps every row, keeping the total.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            total: self.total,
            rows: self.rows.into_iter().map(f).collect(),
            source: self.source,
        }
    }
}

fn normalize_limit(limit: i64) -> u64 {
    u64::try_from(limit)
        .ok()
        .filter(|&l| l > 0)
        .unwrap_or(UNBOUNDED_LIMIT)
}

fn window_args(args: &[Value], offset: u64, limit: u64) -> ScanResult<Vec<Value>> {
    let to_arg = |n: u64, what: &str| {
        i64::try_from(n)
            .map(Value::Int64)
            .map_err(|_| ScanError::Rewrite(format!("{what} {n} out of range")))
    };
    let mut window = Vec::with_capacity(args.len() + 2);
    window.extend_from_slice(args);
    window.push(to_arg(offset, "offset")?);
    window.push(to_arg(limit, "limit")?);
    Ok(window)
}

/// Resolves the meta entry the data query runs from.
fn data_meta(
    cache: &SqlMetaCache,
    base: &Arc<SqlMeta>,
    sort: Option<&str>,
    desc: bool,
) -> ScanResult<Arc<SqlMeta>> {
    match sort {
        Some(column) => Ok(cache.meta(&order_sql(base.base(), column, desc)?)),
        None => Ok(Arc::clone(base)),
    }
}

/// Fetches `limit` rows from `offset` without computing a total.
pub fn fetch_range<E, T, F>(
    exec: &E,
    cache: &SqlMetaCache,
    sql: &str,
    args: &[Value],
    offset: u64,
    limit: i64,
    decode: F,
) -> ScanResult<Vec<T>>
where
    E: Executor + ?Sized,
    T: Shaped,
    F: FnMut(&dyn Row) -> ScanResult<T>,
{
    let meta = cache.meta(sql);
    let limit = normalize_limit(limit);
    let data_sql = meta.derive_limit()?;
    let window = window_args(args, offset, limit)?;

    tracing::trace!(sql = data_sql, offset, limit, "range query");
    collect_rows(exec.query(data_sql, &window)?, decode, usize::try_from(limit).unwrap_or(usize::MAX))
}

/// Fetches one page and its total.
pub fn fetch_page<E, T, F>(
    exec: &E,
    cache: &SqlMetaCache,
    sql: &str,
    args: &[Value],
    request: &PageRequest,
    decode: F,
) -> ScanResult<Page<T>>
where
    E: Executor + ?Sized,
    T: Shaped,
    F: FnMut(&dyn Row) -> ScanResult<T>,
{
    let meta = cache.meta(sql);
    let offset = request.offset;
    let limit = request.effective_limit();

    let data = data_meta(cache, &meta, request.sort.as_deref(), request.desc)?;
    let data_sql = data.derive_limit()?;
    let window = window_args(args, offset, limit)?;

    tracing::trace!(sql = data_sql, offset, limit, "page query");
    let rows = collect_rows(
        exec.query(data_sql, &window)?,
        decode,
        usize::try_from(limit).unwrap_or(usize::MAX),
    )?;
    let dlen = rows.len() as u64;

    let (total, source) = if dlen == 0 && offset == 0 {
        (0, TotalSource::Empty)
    } else if dlen > 0 && dlen < limit {
        (offset + dlen, TotalSource::Inferred)
    } else {
        (count_total(exec, &meta, args)?, TotalSource::Counted)
    };

    tracing::debug!(offset, limit, dlen, total, ?source, "page fetched");
    Ok(Page {
        total,
        rows,
        source,
    })
}

/// Runs the count variant with the original arguments.
fn count_total<E>(exec: &E, meta: &SqlMeta, args: &[Value]) -> ScanResult<u64>
where
    E: Executor + ?Sized,
{
    let count_sql = meta.derive_count()?;
    tracing::trace!(sql = count_sql, "count query");
    let total = first_row(exec.query(count_sql, args)?, |row: &dyn Row| row.get::<u64>(0))?;
    Ok(total.unwrap_or(0))
}
