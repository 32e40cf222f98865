//! chainsettle-storage: persistent backends for ChainSettle.
//!
//! Backends:
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence):
//!   aggregates, snapshots, applied-event ids and block pointers
//!
//! In-memory stores for tests live in `chainsettle-core`.

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
