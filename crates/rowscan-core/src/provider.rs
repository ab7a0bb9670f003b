//! Collaborator traits consumed by the scan and page operations.
//!
//! A driver implements [`Executor`] and [`Connection`]; a pool implements
//! [`Provider`] on top of that. Everything in this crate is written against
//! these traits only.

use std::collections::VecDeque;

use crate::codec::Slot;
use crate::error::{ScanError, ScanResult};
use crate::value::{FromValue, Value};

/// Read access to the current row of a cursor.
pub trait Row {
    /// Number of columns in the row.
    fn column_count(&self) -> usize;

    /// Returns the value of a column in the current row.
    fn value(&self, index: usize) -> ScanResult<&Value>;

    /// Binds every column of the current row into `slots`, in order.
    fn bind(&self, slots: &mut [Slot]) -> ScanResult<()> {
        let found = self.column_count();
        if slots.len() != found {
            return Err(ScanError::ColumnCount {
                expected: slots.len(),
                found,
            });
        }
        for (index, slot) in slots.iter_mut().enumerate() {
            slot.fill(index, self.value(index)?)?;
        }
        Ok(())
    }
}

impl dyn Row + '_ {
    /// Reads a column and converts it to `T`.
    pub fn get<T: FromValue>(&self, index: usize) -> ScanResult<T> {
        let value = self.value(index)?;
        T::from_value(value).ok_or_else(|| {
            ScanError::Decode(format!(
                "column {index}: cannot read {} as {}",
                value.type_name(),
                std::any::type_name::<T>()
            ))
        })
    }
}

/// A forward-only result cursor.
pub trait Cursor: Row {
    /// Moves to the next row. Returns false once the rows are exhausted.
    fn advance(&mut self) -> ScanResult<bool>;

    /// Releases the cursor. Must be idempotent.
    fn close(&mut self);
}

/// Affected-row information for a non-query statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Number of rows changed.
    pub rows_affected: u64,
    /// Row id of the last inserted row, when the driver reports one.
    pub last_insert_id: Option<i64>,
}

/// Something that can run statements.
pub trait Executor {
    /// Cursor returned by queries.
    type Cursor: Cursor;

    /// Runs a query and returns a cursor over its rows.
    fn query(&self, sql: &str, args: &[Value]) -> ScanResult<Self::Cursor>;

    /// Runs a statement that does not return rows.
    fn execute(&self, sql: &str, args: &[Value]) -> ScanResult<ExecOutcome>;
}

/// A single session that can host a transaction.
pub trait Connection: Executor {
    /// Starts a transaction.
    fn begin(&self) -> ScanResult<()>;

    /// Commits the current transaction.
    fn commit(&self) -> ScanResult<()>;

    /// Rolls back the current transaction.
    fn rollback(&self) -> ScanResult<()>;
}

/// A source of connections, typically a pool.
pub trait Provider: Executor {
    /// Exclusive connection handed out for transactions.
    type Conn: Connection;

    /// Takes one connection for exclusive use.
    fn acquire(&self) -> ScanResult<Self::Conn>;
}

impl<E: Executor + ?Sized> Executor for &E {
    type Cursor = E::Cursor;

    fn query(&self, sql: &str, args: &[Value]) -> ScanResult<Self::Cursor> {
        (**self).query(sql, args)
    }

    fn execute(&self, sql: &str, args: &[Value]) -> ScanResult<ExecOutcome> {
        (**self).execute(sql, args)
    }
}

impl<E: Executor + ?Sized> Executor for std::sync::Arc<E> {
    type Cursor = E::Cursor;

    fn query(&self, sql: &str, args: &[Value]) -> ScanResult<Self::Cursor> {
        (**self).query(sql, args)
    }

    fn execute(&self, sql: &str, args: &[Value]) -> ScanResult<ExecOutcome> {
        (**self).execute(sql, args)
    }
}

impl<C: Connection + ?Sized> Connection for &C {
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

impl<C: Connection + ?Sized> Connection for std::sync::Arc<C> {
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

/// A cursor over rows that have already been fetched.
///
/// Drivers whose native row iterators borrow the statement can collect
/// into this and hand it out as their cursor.
#[derive(Debug, Clone, Default)]
pub struct BufferedCursor {
    /// Column names, if the driver reported them.
    columns: Vec<String>,
    /// Rows not yet visited.
    pending: VecDeque<Vec<Value>>,
    /// The row the cursor is positioned on.
    current: Option<Vec<Value>>,
    /// Whether close() has been called.
    closed: bool,
}

impl BufferedCursor {
    /// Creates a cursor over the given rows.
    pub fn new(rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns: Vec::new(),
            pending: rows.into(),
            current: None,
            closed: false,
        }
    }

    /// Creates a cursor with column names.
    pub fn with_columns(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            ..Self::new(rows)
        }
    }

    /// Column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows not yet visited.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    /// Returns true once the cursor has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Row for BufferedCursor {
    fn column_count(&self) -> usize {
        self.current
            .as_ref()
            .map_or(self.columns.len(), Vec::len)
    }

    fn value(&self, index: usize) -> ScanResult<&Value> {
        let row = self
            .current
            .as_ref()
            .ok_or_else(|| ScanError::Decode("cursor is not positioned on a row".to_string()))?;
        row.get(index).ok_or(ScanError::ColumnOutOfRange {
            index,
            count: row.len(),
        })
    }
}

impl Cursor for BufferedCursor {
    fn advance(&mut self) -> ScanResult<bool> {
        if self.closed {
            self.current = None;
            return Ok(false);
        }
        self.current = self.pending.pop_front();
        Ok(self.current.is_some())
    }

    fn close(&mut self) {
        self.closed = true;
        self.current = None;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_cursor_walk() {
        let mut cursor = BufferedCursor::new(vec![
            vec![Value::Int64(1)],
            vec![Value::Int64(2)],
        ]);
        assert!(cursor.value(0).is_err());

        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.value(0).unwrap(), &Value::Int64(1));
        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.remaining(), 0);
        assert!(!cursor.advance().unwrap());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut cursor = BufferedCursor::new(vec![vec![Value::Null]]);
        cursor.close();
        cursor.close();
        assert!(cursor.is_closed());
        assert!(!cursor.advance().unwrap());
    }

    #[test]
    fn test_typed_get() {
        let mut cursor = BufferedCursor::new(vec![vec![
            Value::Int64(9),
            Value::Text("x".into()),
        ]]);
        cursor.advance().unwrap();
        let row: &dyn Row = &cursor;
        assert_eq!(row.get::<i64>(0).unwrap(), 9);
        assert_eq!(row.get::<String>(1).unwrap(), "x");
        assert!(matches!(row.get::<i64>(1), Err(ScanError::Decode(_))));
        assert!(matches!(
            row.get::<i64>(5),
            Err(ScanError::ColumnOutOfRange { index: 5, count: 2 })
        ));
    }
}
