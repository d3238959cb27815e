//! # Durable Operation Store
//!
//! Persists pending write operations so they survive restarts.
//!
//! Every operation is one row of the `sync_operations` table. Rows carry an
//! auto-incremented sequence number next to the registration timestamp, so
//! operations registered within the same millisecond still come back in the
//! order they were stored.

use async_trait::async_trait;
use bridge_traits::HttpMethod;
use bytes::Bytes;
use chrono::DateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::operation::{SyncOperation, SyncOperationId};

/// Persistence contract for pending operations.
#[async_trait]
pub trait SyncOperationStore: Send + Sync {
    /// Persist a newly registered operation.
    async fn put(&self, operation: &SyncOperation) -> Result<()>;

    /// All pending operations, in insertion order.
    async fn get_all(&self) -> Result<Vec<SyncOperation>>;

    /// Remove an operation. Returns whether it existed.
    async fn delete(&self, id: SyncOperationId) -> Result<bool>;

    /// Persist the retry counter of an existing operation.
    async fn update(&self, operation: &SyncOperation) -> Result<()>;

    /// Remove every operation, returning how many there were.
    async fn clear(&self) -> Result<u64>;
}

/// SQLite-backed operation store
pub struct SqliteSyncOperationStore {
    pool: SqlitePool,
}

impl SqliteSyncOperationStore {
    /// Wrap an existing pool. Call [`initialize`](Self::initialize) before use.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    SyncError::Storage(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self::new(pool);
        store.initialize().await?;
        debug!(path = %path.display(), "Opened sync operation store");
        Ok(store)
    }

    /// In-memory store (for testing). Holds a single connection so every
    /// query sees the same database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self::new(pool);
        store.initialize().await?;
        Ok(store)
    }

    /// Create the schema if it does not exist yet.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_operations (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                method TEXT NOT NULL,
                url TEXT NOT NULL,
                headers TEXT NOT NULL,
                body BLOB,
                timestamp_ms INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_sync_operations_order
            ON sync_operations(timestamp_ms, seq)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn from_row(row: &SqliteRow) -> Result<SyncOperation> {
        let method: String = row.get("method");
        let method = method
            .parse::<HttpMethod>()
            .map_err(|e| SyncError::InvalidRecord(e.to_string()))?;

        let headers: String = row.get("headers");
        let headers: HashMap<String, String> = serde_json::from_str(&headers)
            .map_err(|e| SyncError::InvalidRecord(format!("Invalid headers: {}", e)))?;

        let timestamp_ms: i64 = row.get("timestamp_ms");
        let timestamp = DateTime::from_timestamp_millis(timestamp_ms).ok_or_else(|| {
            SyncError::InvalidRecord(format!("Invalid timestamp: {}", timestamp_ms))
        })?;

        Ok(SyncOperation {
            id: SyncOperationId::from_string(&row.get::<String, _>("id"))?,
            method,
            url: row.get("url"),
            headers,
            body: row.get::<Option<Vec<u8>>, _>("body").map(Bytes::from),
            timestamp,
            retry_count: row.get::<i64, _>("retry_count") as u32,
            max_retries: row.get::<i64, _>("max_retries") as u32,
        })
    }
}

#[async_trait]
impl SyncOperationStore for SqliteSyncOperationStore {
    async fn put(&self, operation: &SyncOperation) -> Result<()> {
        let headers = serde_json::to_string(&operation.headers)
            .map_err(|e| SyncError::InvalidRecord(format!("Invalid headers: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO sync_operations (
                id, method, url, headers, body, timestamp_ms, retry_count, max_retries
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(operation.id.as_str())
        .bind(operation.method.as_str())
        .bind(&operation.url)
        .bind(headers)
        .bind(operation.body.as_ref().map(|body| body.to_vec()))
        .bind(operation.timestamp.timestamp_millis())
        .bind(operation.retry_count as i64)
        .bind(operation.max_retries as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<SyncOperation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, method, url, headers, body, timestamp_ms, retry_count, max_retries
            FROM sync_operations
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn delete(&self, id: SyncOperationId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sync_operations WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update(&self, operation: &SyncOperation) -> Result<()> {
        sqlx::query("UPDATE sync_operations SET retry_count = ? WHERE id = ?")
            .bind(operation.retry_count as i64)
            .bind(operation.id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sync_operations")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
