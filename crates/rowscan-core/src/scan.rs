//! Result materializer.
//!
//! All collecting operations share [`collect_rows`]: drive the cursor,
//! decode each row, check that every row agrees with the shape of the
//! first, and accumulate in cursor order. The cursor is closed on every
//! exit path.

use crate::codec::Slot;
use crate::error::{ScanError, ScanResult};
use crate::meta::SqlMetaCache;
use crate::page::{self, Page, PageRequest};
use crate::provider::{Cursor, Executor, Row};
use crate::shape::{Shape, Shaped};
use crate::value::Value;

/// Upper bound on the capacity reserved when the first row arrives.
pub const INITIAL_CAPACITY: usize = 256;

/// Owns a cursor and closes it when dropped.
struct CursorGuard<C: Cursor> {
    cursor: C,
}

impl<C: Cursor> CursorGuard<C> {
    fn new(cursor: C) -> Self {
        Self { cursor }
    }
}

impl<C: Cursor> Drop for CursorGuard<C> {
    fn drop(&mut self) {
        self.cursor.close();
    }
}

/// Decodes every row of `cursor` into a homogeneous `Vec`.
///
/// No rows yields an empty `Vec` without allocating. `capacity_hint` caps
/// the space reserved once the first row is known.
pub fn collect_rows<C, T, F>(cursor: C, mut decode: F, capacity_hint: usize) -> ScanResult<Vec<T>>
where
    C: Cursor,
    T: Shaped,
    F: FnMut(&dyn Row) -> ScanResult<T>,
{
    let mut guard = CursorGuard::new(cursor);
    let mut rows: Vec<T> = Vec::new();
    let mut shape: Option<Shape> = None;

    while guard.cursor.advance()? {
        let index = rows.len();
        let row = decode(&guard.cursor)?;
        let found = row.shape().ok_or(ScanError::DecodeShape { row: index })?;

        match shape.as_mut() {
            None => {
                rows.reserve(capacity_hint.clamp(1, INITIAL_CAPACITY));
                shape = Some(found);
            }
            Some(expected) => {
                if !expected.unify(&found) {
                    return Err(ScanError::HeterogeneousResult {
                        row: index,
                        expected: expected.clone(),
                        found,
                    });
                }
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Decodes the first row of `cursor`, if any.
pub fn first_row<C, T, F>(cursor: C, mut decode: F) -> ScanResult<Option<T>>
where
    C: Cursor,
    T: Shaped,
    F: FnMut(&dyn Row) -> ScanResult<T>,
{
    let mut guard = CursorGuard::new(cursor);
    if !guard.cursor.advance()? {
        return Ok(None);
    }
    let row = decode(&guard.cursor)?;
    if row.shape().is_none() {
        return Err(ScanError::DecodeShape { row: 0 });
    }
    Ok(Some(row))
}

/// Binds the first row of `cursor` into caller-provided slots.
pub fn bind_first<C: Cursor>(cursor: C, slots: &mut [Slot]) -> ScanResult<bool> {
    let mut guard = CursorGuard::new(cursor);
    if !guard.cursor.advance()? {
        return Ok(false);
    }
    guard.cursor.bind(slots)?;
    Ok(true)
}

/// Scanning operations available on every [`Executor`].
///
/// Range and page operations memoize their rewritten statements in
/// [`SqlMetaCache::global`].
pub trait ScanExt: Executor {
    /// Runs a query and hands the whole cursor to `f`.
    fn scan_with<R, F>(&self, sql: &str, args: &[Value], f: F) -> ScanResult<R>
    where
        F: FnOnce(&mut dyn Cursor) -> ScanResult<R>,
    {
        let mut guard = CursorGuard::new(self.query(sql, args)?);
        f(&mut guard.cursor)
    }

    /// Runs a query and decodes every row.
    fn scan_all<T, F>(&self, sql: &str, args: &[Value], decode: F) -> ScanResult<Vec<T>>
    where
        T: Shaped,
        F: FnMut(&dyn Row) -> ScanResult<T>,
    {
        tracing::trace!(sql, "scan all");
        collect_rows(self.query(sql, args)?, decode, INITIAL_CAPACITY)
    }

    /// Runs a query and decodes the first row, if any.
    fn scan_one<T, F>(&self, sql: &str, args: &[Value], decode: F) -> ScanResult<Option<T>>
    where
        T: Shaped,
        F: FnMut(&dyn Row) -> ScanResult<T>,
    {
        tracing::trace!(sql, "scan one");
        first_row(self.query(sql, args)?, decode)
    }

    /// Runs a query and binds the first row into `slots`.
    ///
    /// Returns false if the query produced no row; the slots are untouched.
    fn scan_into(&self, sql: &str, args: &[Value], slots: &mut [Slot]) -> ScanResult<bool> {
        tracing::trace!(sql, "scan into");
        bind_first(self.query(sql, args)?, slots)
    }

    /// Fetches `limit` rows starting at `offset`, without a total.
    fn scan_range<T, F>(
        &self,
        sql: &str,
        args: &[Value],
        offset: u64,
        limit: i64,
        decode: F,
    ) -> ScanResult<Vec<T>>
    where
        T: Shaped,
        F: FnMut(&dyn Row) -> ScanResult<T>,
    {
        page::fetch_range(self, SqlMetaCache::global(), sql, args, offset, limit, decode)
    }

    /// Fetches one page and its total, avoiding the count query when the
    /// page itself proves the total.
    fn scan_page<T, F>(
        &self,
        sql: &str,
        args: &[Value],
        request: &PageRequest,
        decode: F,
    ) -> ScanResult<Page<T>>
    where
        T: Shaped,
        F: FnMut(&dyn Row) -> ScanResult<T>,
    {
        page::fetch_page(self, SqlMetaCache::global(), sql, args, request, decode)
    }
}

impl<E: Executor + ?Sized> ScanExt for E {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{tuple_decoder, Kind};
    use crate::provider::BufferedCursor;
    use crate::testing::{rows_of, MemoryTable};

    #[derive(Debug, PartialEq)]
    struct User {
        id: i64,
        name: String,
    }

    impl Shaped for User {}

    fn decode_user(row: &dyn Row) -> ScanResult<User> {
        Ok(User {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    }

    #[test]
    fn test_collect_in_cursor_order() {
        let cursor = BufferedCursor::new(vec![
            vec![Value::Int64(2), Value::Text("b".into())],
            vec![Value::Int64(1), Value::Text("a".into())],
        ]);
        let users = collect_rows(cursor, decode_user, 10).unwrap();
        assert_eq!(
            users,
            vec![
                User { id: 2, name: "b".into() },
                User { id: 1, name: "a".into() },
            ]
        );
    }

    #[test]
    fn test_empty_cursor_does_not_allocate() {
        let rows = collect_rows(BufferedCursor::new(Vec::new()), decode_user, 10).unwrap();
        assert!(rows.is_empty());
        assert_eq!(rows.capacity(), 0);
    }

    #[test]
    fn test_absent_first_row() {
        let cursor = BufferedCursor::new(vec![vec![Value::Int64(1)]]);
        let err = collect_rows(cursor, |_: &dyn Row| Ok(None::<i64>), 1).unwrap_err();
        assert!(matches!(err, ScanError::DecodeShape { row: 0 }));
    }

    #[test]
    fn test_heterogeneous_rows_are_rejected() {
        let cursor = BufferedCursor::new(vec![
            vec![Value::Int64(1), Value::Text("a".into())],
            vec![Value::Text("b".into()), Value::Int64(2)],
        ]);
        let decode = |row: &dyn Row| -> ScanResult<Vec<Value>> {
            (0..row.column_count())
                .map(|i| row.value(i).cloned())
                .collect()
        };
        let err = collect_rows(cursor, decode, 2).unwrap_err();
        match err {
            ScanError::HeterogeneousResult { row, expected, found } => {
                assert_eq!(row, 1);
                assert_eq!(expected, Shape::Tuple(vec![Some(Kind::Int64), Some(Kind::Text)]));
                assert_eq!(found, Shape::Tuple(vec![Some(Kind::Text), Some(Kind::Int64)]));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_nulls_unify_with_later_rows() {
        let cursor = BufferedCursor::new(vec![
            vec![Value::Int64(1), Value::Null],
            vec![Value::Int64(2), Value::Text("x".into())],
        ]);
        let rows = collect_rows(cursor, tuple_decoder([Kind::Int64, Kind::Text]), 2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1], Value::Null);
    }

    #[test]
    fn test_cursor_closed_on_decode_failure() {
        let table = MemoryTable::new(rows_of(3));
        let err = table
            .scan_all("SELECT id, name FROM t", &[], |_: &dyn Row| -> ScanResult<User> {
                Err(ScanError::Decode("boom".into()))
            })
            .unwrap_err();
        assert!(matches!(err, ScanError::Decode(_)));
        assert_eq!(table.open_cursors(), 0);
    }

    #[test]
    fn test_scan_one() {
        let table = MemoryTable::new(rows_of(3));
        let first = table.scan_one("SELECT id, name FROM t", &[], decode_user).unwrap();
        assert_eq!(first.map(|u| u.id), Some(1));
        assert_eq!(table.open_cursors(), 0);

        let empty = MemoryTable::new(Vec::new());
        assert!(empty
            .scan_one("SELECT id, name FROM t", &[], decode_user)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_scan_one_absent_row() {
        let table = MemoryTable::new(rows_of(2));
        let err = table
            .scan_one("SELECT id FROM t", &[], |_: &dyn Row| Ok(None::<i64>))
            .unwrap_err();
        assert!(matches!(err, ScanError::DecodeShape { row: 0 }));
        assert_eq!(table.open_cursors(), 0);
    }

    #[test]
    fn test_scan_into() {
        let table = MemoryTable::new(rows_of(2));
        let mut slots = [Kind::Int64.alloc(), Kind::Text.alloc()];
        assert!(table.scan_into("SELECT id, name FROM t", &[], &mut slots).unwrap());
        assert_eq!(slots[0], Slot::Int64(Some(1)));
        assert_eq!(slots[1], Slot::Text(Some("user-1".into())));

        let empty = MemoryTable::new(Vec::new());
        let mut slots = [Kind::Int64.alloc(), Kind::Text.alloc()];
        assert!(!empty.scan_into("SELECT id, name FROM t", &[], &mut slots).unwrap());
        assert!(slots[0].is_null());
    }

    #[test]
    fn test_scan_with_whole_cursor() {
        let table = MemoryTable::new(rows_of(4));
        let count = table
            .scan_with("SELECT id, name FROM t", &[], |cursor| {
                let mut n = 0;
                while cursor.advance()? {
                    n += 1;
                }
                Ok(n)
            })
            .unwrap();
        assert_eq!(count, 4);
        assert_eq!(table.open_cursors(), 0);
    }
}
