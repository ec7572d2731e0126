//! SQLite [`KvStore`] backend.
//!
//! Every logical table lives in one `kv` table keyed by `(tbl, k)`. SQLite
//! compares BLOBs with `memcmp`, so `ORDER BY k` is the same byte order the
//! engine's key encoding relies on. A [`WriteBatch`] is one transaction.
//!
//! # Usage
//! ```rust,no_run
//! use utxoindex_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./utxoindex.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use utxoindex_core::store::{BatchOp, KvPair, KvStore, Table, WriteBatch};
use utxoindex_core::StoreError;

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// SQLite-backed ordered key-value store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./utxoindex.db"`) or a full
    /// SQLite URL (`"sqlite:./utxoindex.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(backend)?;
        let store = Self { pool };
        store.init_schema().await?;
        debug!(%url, "sqlite store opened");
        Ok(store)
    }

    /// Open an in-memory database. All data is lost when the store is dropped.
    pub async fn in_memory() -> Result<Self, StoreError> {
        // Pooled connections share one in-memory database; keep a single one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(backend)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv (
                tbl TEXT NOT NULL,
                k   BLOB NOT NULL,
                v   BLOB NOT NULL,
                PRIMARY KEY (tbl, k)
            ) WITHOUT ROWID;",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    /// Number of rows in `table`.
    pub async fn count(&self, table: Table) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM kv WHERE tbl = ?")
            .bind(table.name())
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        let cnt: i64 = row.try_get("cnt").map_err(backend)?;
        Ok(cnt as u64)
    }

    /// Closes the pool, flushing the WAL.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn pairs(rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<KvPair>, StoreError> {
    rows.into_iter()
        .map(|row| {
            let k: Vec<u8> = row.try_get("k").map_err(backend)?;
            let v: Vec<u8> = row.try_get("v").map_err(backend)?;
            Ok((k, v))
        })
        .collect()
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let row = sqlx::query("SELECT v FROM kv WHERE tbl = ? AND k = ?")
            .bind(table.name())
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|r| r.try_get::<Vec<u8>, _>("v").map_err(backend))
            .transpose()
    }

    async fn range(
        &self,
        table: Table,
        start: &[u8],
        end: Option<&[u8]>,
    ) -> Result<Vec<KvPair>, StoreError> {
        let rows = match end {
            Some(end) if end <= start => return Ok(vec![]),
            Some(end) => {
                sqlx::query(
                    "SELECT k, v FROM kv WHERE tbl = ? AND k >= ? AND k < ? ORDER BY k",
                )
                .bind(table.name())
                .bind(start)
                .bind(end)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT k, v FROM kv WHERE tbl = ? AND k >= ? ORDER BY k")
                    .bind(table.name())
                    .bind(start)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(backend)?;
        pairs(rows)
    }

    async fn first(&self, table: Table, start: &[u8], limit: usize) -> Result<Vec<KvPair>, StoreError> {
        let rows = sqlx::query("SELECT k, v FROM kv WHERE tbl = ? AND k >= ? ORDER BY k LIMIT ?")
            .bind(table.name())
            .bind(start)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        pairs(rows)
    }

    async fn last(&self, table: Table, limit: usize) -> Result<Vec<KvPair>, StoreError> {
        let rows = sqlx::query("SELECT k, v FROM kv WHERE tbl = ? ORDER BY k DESC LIMIT ?")
            .bind(table.name())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        pairs(rows)
    }

    async fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let ops = batch.len();
        let mut tx = self.pool.begin().await.map_err(backend)?;
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { table, key, value } => {
                    sqlx::query("INSERT OR REPLACE INTO kv (tbl, k, v) VALUES (?, ?, ?)")
                        .bind(table.name())
                        .bind(key)
                        .bind(value)
                        .execute(&mut *tx)
                        .await
                        .map_err(backend)?;
                }
                BatchOp::Delete { table, key } => {
                    sqlx::query("DELETE FROM kv WHERE tbl = ? AND k = ?")
                        .bind(table.name())
                        .bind(key)
                        .execute(&mut *tx)
                        .await
                        .map_err(backend)?;
                }
            }
        }
        // Dropping `tx` on an early return rolls the whole batch back.
        tx.commit().await.map_err(backend)?;
        debug!(ops, "batch committed");
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
