//! Transaction scope with batch atomicity.
//!
//! A [`Transaction`] owns one connection from `begin` until it is committed,
//! rolled back, or dropped. A failing statement inside
//! [`Transaction::execute_batch`] rolls the whole batch back before the
//! error is returned, so a caller never sees a half-applied batch.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{ScanError, ScanResult};
use crate::provider::{Connection, ExecOutcome, Executor, Provider};
use crate::value::Value;

/// An open transaction on an exclusively owned connection.
pub struct Transaction<C: Connection> {
    conn: C,
    finished: AtomicBool,
}

impl<C: Connection> Transaction<C> {
    /// Issues BEGIN on `conn` and takes ownership of it.
    pub fn begin(conn: C) -> ScanResult<Self> {
        conn.begin()?;
        tracing::trace!("transaction started");
        Ok(Self {
            conn,
            finished: AtomicBool::new(false),
        })
    }

    /// Returns true until the transaction is committed or rolled back.
    pub fn is_active(&self) -> bool {
        !self.finished.load(Ordering::Acquire)
    }

    /// Commits the transaction.
    ///
    /// If COMMIT fails the transaction is rolled back and the commit error
    /// is returned.
    pub fn commit(self) -> ScanResult<()> {
        self.finish()?;
        match self.conn.commit() {
            Ok(()) => {
                tracing::trace!("transaction committed");
                Ok(())
            }
            Err(err) => {
                if let Err(rollback) = self.conn.rollback() {
                    tracing::warn!(error = %rollback, "rollback after failed commit failed");
                }
                Err(err)
            }
        }
    }

    /// Rolls the transaction back.
    pub fn rollback(self) -> ScanResult<()> {
        self.finish()?;
        self.conn.rollback()?;
        tracing::trace!("transaction rolled back");
        Ok(())
    }

    /// Runs `sql` once per argument set, in order.
    ///
    /// The first failure rolls the transaction back and finishes it; the
    /// error names the index of the failing argument set.
    pub fn execute_batch(&self, sql: &str, arg_sets: &[Vec<Value>]) -> ScanResult<Vec<ExecOutcome>> {
        self.ensure_active()?;
        let mut outcomes = Vec::with_capacity(arg_sets.len());

        for (index, args) in arg_sets.iter().enumerate() {
            match self.conn.execute(sql, args) {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => return Err(self.abort(index, err)),
            }
        }

        tracing::debug!(sql, statements = outcomes.len(), "batch executed");
        Ok(outcomes)
    }

    fn abort(&self, index: usize, source: ScanError) -> ScanError {
        self.finished.store(true, Ordering::Release);
        tracing::debug!(index, error = %source, "batch statement failed, rolling back");

        let trigger = ScanError::TransactionAbort {
            index,
            source: Box::new(source),
        };
        match self.conn.rollback() {
            Ok(()) => trigger,
            Err(rollback) => ScanError::RollbackFailed {
                trigger: Box::new(trigger),
                rollback: Box::new(rollback),
            },
        }
    }

    fn ensure_active(&self) -> ScanResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(ScanError::TransactionFinished)
        }
    }

    fn finish(&self) -> ScanResult<()> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Err(ScanError::TransactionFinished);
        }
        Ok(())
    }
}

impl<C: Connection> Executor for Transaction<C> {
    type Cursor = C::Cursor;

    fn query(&self, sql: &str, args: &[Value]) -> ScanResult<Self::Cursor> {
        self.ensure_active()?;
        self.conn.query(sql, args)
    }

    fn execute(&self, sql: &str, args: &[Value]) -> ScanResult<ExecOutcome> {
        self.ensure_active()?;
        self.conn.execute(sql, args)
    }
}

impl<C: Connection> Drop for Transaction<C> {
    fn drop(&mut self) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::warn!("transaction dropped while active, rolling back");
        if let Err(err) = self.conn.rollback() {
            tracing::warn!(error = %err, "rollback on drop failed");
        }
    }
}

impl<C: Connection> std::fmt::Debug for Transaction<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Runs a batch atomically on a connection taken from `provider`.
pub fn exec_batch<P>(provider: &P, sql: &str, arg_sets: &[Vec<Value>]) -> ScanResult<Vec<ExecOutcome>>
where
    P: Provider + ?Sized,
{
    let txn = Transaction::begin(provider.acquire()?)?;
    let outcomes = txn.execute_batch(sql, arg_sets)?;
    txn.commit()?;
    Ok(outcomes)
}
