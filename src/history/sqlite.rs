//! SQLite-backed history store.

use super::migrations;
use super::{HistoryEntry, HistoryPatch, HistoryStatus, HistoryStore, NewHistoryEntry};
use crate::error::{Result, SplitterError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Default number of entries kept by retention pruning.
pub const MAX_HISTORY_ENTRIES: i64 = 5000;

/// History persisted in the local state database.
#[derive(Debug, Clone)]
pub struct SqliteHistory {
    pool: SqlitePool,
    retention: i64,
}

#[derive(Debug, Clone, FromRow)]
struct HistoryEntryRow {
    id: i64,
    created_at: String,
    environment: String,
    job_name: String,
    sql: String,
    part: i64,
    total: i64,
    status: String,
    build_number: Option<i64>,
    build_url: Option<String>,
}

impl TryFrom<HistoryEntryRow> for HistoryEntry {
    type Error = SplitterError;

    fn try_from(row: HistoryEntryRow) -> Result<Self> {
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map_err(|e| {
                SplitterError::persistence(format!(
                    "Invalid timestamp '{}' on history entry {}: {e}",
                    row.created_at, row.id
                ))
            })?
            .with_timezone(&Utc);
        let status = HistoryStatus::parse(&row.status).ok_or_else(|| {
            SplitterError::persistence(format!(
                "Invalid status '{}' on history entry {}",
                row.status, row.id
            ))
        })?;

        Ok(Self {
            id: row.id,
            created_at,
            environment: row.environment,
            job_name: row.job_name,
            sql: row.sql,
            part: row.part as u32,
            total: row.total as u32,
            status,
            build_number: row.build_number.map(|n| n as u64),
            build_url: row.build_url,
        })
    }
}

impl SqliteHistory {
    /// Opens or creates the state database at the default platform path.
    pub async fn open_default() -> Result<Self> {
        let path = Self::default_path()?;
        Self::open(&path).await
    }

    /// Returns the default state database path for the current platform.
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            SplitterError::persistence("Could not determine config directory")
        })?;
        Ok(config_dir.join("sqlsplit").join("state.db"))
    }

    /// Opens or creates the state database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SplitterError::persistence(format!(
                    "Failed to create state directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let conn_str = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&conn_str)
            .map_err(|e| SplitterError::persistence(format!("Invalid database path: {e}")))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| {
                SplitterError::persistence(format!("Failed to connect to state database: {e}"))
            })?;

        migrations::run_migrations(&pool).await?;
        info!("State database opened at {}", path.display());
        Ok(Self {
            pool,
            retention: MAX_HISTORY_ENTRIES,
        })
    }

    /// Opens a throwaway in-memory database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| SplitterError::persistence(format!("Failed to open memory database: {e}")))?;
        migrations::run_migrations(&pool).await?;
        Ok(Self {
            pool,
            retention: MAX_HISTORY_ENTRIES,
        })
    }

    /// Keeps only the newest `entries` rows after each append.
    pub fn with_retention(mut self, entries: i64) -> Self {
        self.retention = entries.max(1);
        self
    }

    /// Returns the count of history entries.
    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunk_history")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SplitterError::persistence(format!("Failed to count history: {e}")))?;
        Ok(count)
    }

    /// Closes the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn prune(&self) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM chunk_history
            WHERE id NOT IN (
                SELECT id FROM chunk_history
                ORDER BY id DESC
                LIMIT ?
            )
            "#,
        )
        .bind(self.retention)
        .execute(&self.pool)
        .await
        .map_err(|e| SplitterError::persistence(format!("Failed to prune history: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for SqliteHistory {
    async fn append(&self, entry: NewHistoryEntry) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO chunk_history
            (created_at, environment, job_name, sql, part, total, status)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&entry.environment)
        .bind(&entry.job_name)
        .bind(&entry.sql)
        .bind(entry.part as i64)
        .bind(entry.total as i64)
        .bind(HistoryStatus::Pending.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| SplitterError::persistence(format!("Failed to record history: {e}")))?;

        // The row is committed; a pruning failure must not orphan it
        let id = result.last_insert_rowid();
        if let Err(e) = self.prune().await {
            warn!("History retention skipped: {}", e);
        }
        Ok(id)
    }

    async fn update(&self, id: i64, patch: HistoryPatch) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE chunk_history
            SET status = ?, build_number = ?, build_url = ?
            WHERE id = ?
            "#,
        )
        .bind(patch.status.as_str())
        .bind(patch.build_number.map(|n| n as i64))
        .bind(patch.build_url)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| SplitterError::persistence(format!("Failed to update history: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(SplitterError::persistence(format!(
                "History entry {id} not found"
            )));
        }
        Ok(())
    }

    async fn list(&self, limit: Option<i64>) -> Result<Vec<HistoryEntry>> {
        let rows: Vec<HistoryEntryRow> = sqlx::query_as(
            r#"
            SELECT id, created_at, environment, job_name, sql, part, total,
                   status, build_number, build_url
            FROM chunk_history
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SplitterError::persistence(format!("Failed to list history: {e}")))?;

        rows.into_iter().map(HistoryEntry::try_from).collect()
    }
}
