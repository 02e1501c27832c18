//! SQLite-backed key-value store.
//!
//! One `kv` table with UPSERT writes; migrations run on open inside a
//! transaction and are idempotent. Error classification maps SQLite failure
//! modes onto the shared [`StoreError`] taxonomy so callers never see a raw
//! driver error.
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};

use super::kv::{KeyValueStore, StoreError};

// ============================================================================
// SqliteStore
// ============================================================================

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) and migrate the store.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` when the file cannot be opened,
    /// another process holds the lock, or migration fails.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: wait up to 5s for a concurrent writer to release
        // its lock before reporting SQLITE_BUSY. Handles transient contention
        // from a second open view of the same store.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(classify_sqlx)?
            .pragma("busy_timeout", "5000");

        // SQLite is single-writer; a handful of connections covers the
        // preference poller plus foreground reads.
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(classify_sqlx)?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create the schema if absent. Idempotent; wrapped in a transaction so a
    /// failed migration leaves the previous state intact.
    async fn migrate(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(classify_sqlx)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(classify_sqlx)?;

        tx.commit().await.map_err(classify_sqlx)?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify_sqlx)?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO kv (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(classify_sqlx)?;

        Ok(())
    }
}

// ============================================================================
// Error Classification
// ============================================================================

/// Map a sqlx error onto the store taxonomy.
///
/// SQLITE_FULL ("database or disk is full") is a quota failure; lock and
/// open failures are unavailability. Everything else is also unavailability
/// — there is no parse failure at this layer, values are opaque strings.
fn classify_sqlx(err: sqlx::Error) -> StoreError {
    let msg = err.to_string();
    let lowered = msg.to_lowercase();

    if lowered.contains("disk is full") || lowered.contains("sqlite_full") {
        return StoreError::QuotaExceeded(msg);
    }

    StoreError::Unavailable(msg)
}

// ============================================================================
// Tests
// ============================================================================
