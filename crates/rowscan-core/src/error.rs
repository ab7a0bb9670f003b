//! Error types for scanning, paging and transactions.

use thiserror::Error;

use crate::codec::Kind;
use crate::shape::Shape;

/// Scan error type.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Statement execution failed at the provider.
    #[error("query failed: {0}")]
    Query(String),

    /// The provider could not supply a connection.
    #[error("connection unavailable: {0}")]
    Connection(String),

    /// The base statement could not be rewritten.
    #[error("cannot rewrite statement: {0}")]
    Rewrite(String),

    /// A decoded row was absent, so its shape cannot be established.
    #[error("row {row} decoded to an absent value")]
    DecodeShape {
        /// Zero-based row index within the result.
        row: usize,
    },

    /// A decoded row disagreed with the shape of the rows before it.
    #[error("row {row} has shape {found:?}, expected {expected:?}")]
    HeterogeneousResult {
        /// Zero-based row index within the result.
        row: usize,
        /// Shape discovered from the earlier rows.
        expected: Shape,
        /// Shape of the offending row.
        found: Shape,
    },

    /// The codec was asked for a kind it does not know.
    #[error("unsupported kind: {0}")]
    UnsupportedKind(String),

    /// A column value could not be bound to a slot of the requested kind.
    #[error("column {index}: cannot convert {found} to {kind}")]
    Conversion {
        /// Column index.
        index: usize,
        /// Kind of the target slot.
        kind: Kind,
        /// Description of the column value.
        found: &'static str,
    },

    /// Slot count does not match the row's column count.
    #[error("expected {expected} columns, row has {found}")]
    ColumnCount {
        /// Number of slots supplied.
        expected: usize,
        /// Number of columns in the row.
        found: usize,
    },

    /// Column index past the end of the row.
    #[error("column {index} out of range ({count} columns)")]
    ColumnOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of columns in the row.
        count: usize,
    },

    /// The caller's decode function failed.
    #[error("decode failed: {0}")]
    Decode(String),

    /// A batched statement failed and the batch was rolled back.
    #[error("batch aborted at statement {index}: {source}")]
    TransactionAbort {
        /// Index of the failing argument set.
        index: usize,
        /// The statement failure.
        #[source]
        source: Box<ScanError>,
    },

    /// Rolling back after a failure failed as well.
    #[error("rollback failed ({rollback}) after: {trigger}")]
    RollbackFailed {
        /// The failure that triggered the rollback.
        trigger: Box<ScanError>,
        /// The rollback failure.
        rollback: Box<ScanError>,
    },

    /// The transaction was already committed or rolled back.
    #[error("transaction already finished")]
    TransactionFinished,
}

impl ScanError {
    /// Wraps any displayable decoder failure.
    pub fn decode(err: impl std::fmt::Display) -> Self {
        ScanError::Decode(err.to_string())
    }

    /// Returns true if this error was raised by the provider rather than
    /// by rowscan itself.
    pub fn is_provider(&self) -> bool {
        matches!(self, ScanError::Query(_) | ScanError::Connection(_))
    }
}

/// Result type for scan operations.
pub type ScanResult<T> = Result<T, ScanError>;
