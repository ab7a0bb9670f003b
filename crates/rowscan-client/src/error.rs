//! Error types for the client library.

use std::path::PathBuf;

use rowscan_core::ScanError;
use thiserror::Error;

/// Client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Scanning, paging or a transaction failed.
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// SQLite reported an error outside of statement execution.
    #[error("sqlite error: {0}")]
    Sqlite(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A configuration file could not be read or written.
    #[error("config file {}: {source}", path.display())]
    ConfigIo {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A registry key is already taken.
    #[error("client key '{0}' is already registered")]
    DuplicateKey(String),

    /// No client is registered under a name.
    #[error("no client registered as '{0}'")]
    UnknownClient(String),

    /// The process-wide registry was installed twice.
    #[error("global registry already installed")]
    RegistryInstalled,

    /// The pool has been closed.
    #[error("connection pool closed")]
    PoolClosed,

    /// Pool timeout.
    #[error("pool acquisition timeout after {0}ms")]
    PoolTimeout(u64),
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

impl From<rusqlite::Error> for ClientError {
    fn from(err: rusqlite::Error) -> Self {
        ClientError::Sqlite(err.to_string())
    }
}

impl From<ClientError> for ScanError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Scan(inner) => inner,
            other => ScanError::Connection(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_errors_pass_through() {
        let err: ClientError = ScanError::Rewrite("no FROM".into()).into();
        assert_eq!(err.to_string(), "cannot rewrite statement: no FROM");

        let back: ScanError = err.into();
        assert!(matches!(back, ScanError::Rewrite(_)));
    }

    #[test]
    fn test_pool_errors_become_connection_errors() {
        let err: ScanError = ClientError::PoolTimeout(250).into();
        match err {
            ScanError::Connection(msg) => assert!(msg.contains("250ms")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
