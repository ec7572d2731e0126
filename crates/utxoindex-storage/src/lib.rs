//! utxoindex-storage — durable storage backends for utxoindex.
//!
//! Backends:
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)
//!
//! The in-memory backend lives in `utxoindex_core::memory`.

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
