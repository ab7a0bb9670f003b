//! # rowscan-client
//!
//! Pooled SQLite client for rowscan.
//!
//! This crate puts the scanning and paging surface of `rowscan-core` in
//! front of real databases:
//!
//! - **SQLite Driver**: `rusqlite` connections with buffered cursors
//! - **Connection Pooling**: blocking pool with idle, open and lifetime limits
//! - **Registry**: named clients built from a TOML config file
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rowscan_client::{Client, Config, PageRequest, Registry, Row};
//!
//! let registry = Registry::from_config(&Config::from_file("rowscan.toml")?)?;
//! let db = registry.require("main")?;
//!
//! let page = db.scan_page(
//!     "SELECT id, name FROM users",
//!     &[],
//!     &PageRequest::new(0, 20).sort_by("name"),
//!     |row: &dyn Row| Ok((row.get::<i64>(0)?, row.get::<String>(1)?)),
//! )?;
//! println!("showing {} of {}", page.len(), page.total);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Error types.
pub mod error;

/// Configuration.
pub mod config;

/// Connection pool.
pub mod pool;

/// SQLite driver.
pub mod sqlite;

/// Client facade.
pub mod client;

/// Named clients.
pub mod registry;

pub use client::{Client, ClientTransaction};
pub use config::{Config, DatabaseConfig};
pub use error::{ClientError, ClientResult};
pub use pool::{ConnectionManager, Pool, PoolConfig, PoolStats, PooledConnection};
pub use registry::Registry;
pub use sqlite::{SqliteConnection, SqliteCursor, SqliteManager};

pub use rowscan_core::{
    Kind, Page, PageRequest, Record, Row, ScanError, ScanExt, Shaped, Slot, TotalSource, Value,
};
