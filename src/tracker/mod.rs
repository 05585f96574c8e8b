//! Progress/completion tracker
//!
//! Persists which remote items have been durably migrated, so a restarted run
//! neither downloads them again nor treats them as unsafe to delete.
//!
//! The log is an append-only SQLite table (`completions`): rows are inserted
//! once and triggers reject any UPDATE or DELETE. Every completed id is kept in
//! memory after [`CompletionTracker::open`], and writes are serialized through
//! a single writer.
//!
//! ## Submodules
//!
//! - [`migrations`]: open, schema migrations, close

use crate::error::DatabaseError;
use crate::types::{CompletionRecord, ItemId};
use crate::{Error, Result};
use chrono::{TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

mod migrations;

/// Completion record as stored in SQLite
#[derive(Debug, Clone, FromRow)]
struct CompletionRow {
    item_id: String,
    local_path: String,
    bytes: i64,
    sha256: String,
    /// Unix timestamp in milliseconds
    completed_at: i64,
}

impl From<CompletionRow> for CompletionRecord {
    fn from(row: CompletionRow) -> Self {
        CompletionRecord {
            item_id: ItemId(row.item_id),
            local_path: PathBuf::from(row.local_path),
            bytes: row.bytes.max(0) as u64,
            sha256: row.sha256,
            completed_at: Utc
                .timestamp_millis_opt(row.completed_at)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }
}

/// Durable record of migrated items
pub struct CompletionTracker {
    pool: SqlitePool,
    /// In-memory mirror of the `item_id` column
    completed: RwLock<HashSet<ItemId>>,
    /// Serializes writers even though fetch workers run concurrently
    writer: tokio::sync::Mutex<()>,
}

impl CompletionTracker {
    fn with_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            completed: RwLock::new(HashSet::new()),
            writer: tokio::sync::Mutex::new(()),
        }
    }

    /// Rebuild the in-memory set from the log; returns how many ids were loaded
    async fn load_completed(&self) -> Result<usize> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT item_id FROM completions")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to load completed items: {}",
                    e
                )))
            })?;

        let mut completed = self.completed.write().unwrap_or_else(PoisonError::into_inner);
        completed.extend(ids.into_iter().map(ItemId));
        Ok(completed.len())
    }

    /// Record that `item_id` is durable at `local_path`
    ///
    /// Returns once the row is committed. Recording an id twice keeps the
    /// first record and returns it.
    pub async fn record(
        &self,
        item_id: &ItemId,
        local_path: &Path,
        bytes: u64,
        sha256: &str,
    ) -> Result<CompletionRecord> {
        let _guard = self.writer.lock().await;

        let completed_at = Utc::now();
        let inserted = sqlx::query(
            r#"
            INSERT INTO completions (item_id, local_path, bytes, sha256, completed_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(item_id) DO NOTHING
            "#,
        )
        .bind(item_id.as_str())
        .bind(local_path.to_string_lossy().into_owned())
        .bind(bytes as i64)
        .bind(sha256)
        .bind(completed_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to record completion of {}: {}",
                item_id, e
            )))
        })?
        .rows_affected();

        self.completed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item_id.clone());

        if inserted == 0 {
            tracing::debug!(item_id = %item_id, "Completion already recorded");
            return self.get(item_id).await?.ok_or_else(|| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Completion of {} vanished after conflict",
                    item_id
                )))
            });
        }

        tracing::debug!(item_id = %item_id, path = %local_path.display(), "Completion recorded");

        Ok(CompletionRecord {
            item_id: item_id.clone(),
            local_path: local_path.to_path_buf(),
            bytes,
            sha256: sha256.to_string(),
            completed_at: Utc
                .timestamp_millis_opt(completed_at.timestamp_millis())
                .single()
                .unwrap_or(completed_at),
        })
    }

    /// Whether `item_id` was recorded, in this run or an earlier one
    pub fn is_completed(&self, item_id: &ItemId) -> bool {
        self.completed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(item_id)
    }

    /// Number of completed items
    pub fn len(&self) -> usize {
        self.completed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch the record for `item_id`
    pub async fn get(&self, item_id: &ItemId) -> Result<Option<CompletionRecord>> {
        let row: Option<CompletionRow> = sqlx::query_as(
            r#"
            SELECT item_id, local_path, bytes, sha256, completed_at
            FROM completions WHERE item_id = ?
            "#,
        )
        .bind(item_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get completion of {}: {}",
                item_id, e
            )))
        })?;

        Ok(row.map(CompletionRecord::from))
    }

    /// All records in the order they were written
    pub async fn records(&self) -> Result<Vec<CompletionRecord>> {
        let rows: Vec<CompletionRow> = sqlx::query_as(
            r#"
            SELECT item_id, local_path, bytes, sha256, completed_at
            FROM completions ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list completions: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(CompletionRecord::from).collect())
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
