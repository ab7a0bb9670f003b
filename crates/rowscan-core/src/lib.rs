//! Row materialization and count-avoiding pagination over SQL providers.
//!
//! This crate sits between application code and a connection provider:
//!
//! - **Codec**: primitive column kinds, bindable slots and ready-made row
//!   decoders for scalar, tuple and keyed rows
//! - **Meta Cache**: memoized `LIMIT` and `COUNT(*)` rewrites of base
//!   statements
//! - **Materializer**: drives a cursor into a homogeneous `Vec`, closing the
//!   cursor on every path
//! - **Pages**: one page plus a total, skipping the count query when the
//!   page proves the total
//! - **Transactions**: batches that apply completely or not at all
//!
//! # Example
//!
//! ```rust,ignore
//! use rowscan_core::{PageRequest, Row, ScanExt};
//!
//! let page = db.scan_page(
//!     "SELECT id, name FROM users WHERE active = ?",
//!     &[true.into()],
//!     &PageRequest::new(0, 20).sort_by("name"),
//!     |row: &dyn Row| row.get::<i64>(0),
//! )?;
//! println!("{} of {}", page.len(), page.total);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod meta;
pub mod page;
pub mod provider;
pub mod scan;
pub mod shape;
pub mod txn;
pub mod value;

#[cfg(test)]
mod testing;

pub use codec::{Kind, Record, Slot};
pub use error::{ScanError, ScanResult};
pub use meta::{CacheStats, SqlMeta, SqlMetaCache};
pub use page::{Page, PageRequest, TotalSource};
pub use provider::{BufferedCursor, Connection, Cursor, ExecOutcome, Executor, Provider, Row};
pub use scan::ScanExt;
pub use shape::{Shape, Shaped};
pub use txn::{exec_batch, Transaction};
pub use value::{FromValue, Value};
