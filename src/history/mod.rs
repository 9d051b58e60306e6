//! Execution history.
//!
//! One entry per executed chunk. Entries are appended when a chunk starts
//! and updated once when it reaches a terminal status.

mod migrations;
mod sqlite;

pub use sqlite::{SqliteHistory, MAX_HISTORY_ENTRIES};

use crate::error::{Result, SplitterError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Outcome recorded for a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Pending,
    Success,
    Failed,
    Timeout,
    Error,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "timeout" => Some(Self::Timeout),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// A recorded chunk execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub environment: String,
    pub job_name: String,
    pub sql: String,
    /// One-based chunk position within its session.
    pub part: u32,
    pub total: u32,
    pub status: HistoryStatus,
    pub build_number: Option<u64>,
    pub build_url: Option<String>,
}

/// Data for a new, provisional entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryEntry {
    pub environment: String,
    pub job_name: String,
    pub sql: String,
    pub part: u32,
    pub total: u32,
}

/// Final details written when a chunk terminates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPatch {
    pub status: HistoryStatus,
    pub build_number: Option<u64>,
    pub build_url: Option<String>,
}

/// Storage for execution history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Appends a provisional entry and returns its id.
    async fn append(&self, entry: NewHistoryEntry) -> Result<i64>;

    /// Applies the final details to an entry.
    async fn update(&self, id: i64, patch: HistoryPatch) -> Result<()>;

    /// Lists entries, newest first.
    async fn list(&self, limit: Option<i64>) -> Result<Vec<HistoryEntry>>;
}

/// In-memory history.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries in insertion order.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<HistoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn append(&self, entry: NewHistoryEntry) -> Result<i64> {
        let mut entries = self.lock();
        let id = entries.len() as i64 + 1;
        entries.push(HistoryEntry {
            id,
            created_at: Utc::now(),
            environment: entry.environment,
            job_name: entry.job_name,
            sql: entry.sql,
            part: entry.part,
            total: entry.total,
            status: HistoryStatus::Pending,
            build_number: None,
            build_url: None,
        });
        Ok(id)
    }

    async fn update(&self, id: i64, patch: HistoryPatch) -> Result<()> {
        let mut entries = self.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| SplitterError::persistence(format!("History entry {id} not found")))?;
        entry.status = patch.status;
        entry.build_number = patch.build_number;
        entry.build_url = patch.build_url;
        Ok(())
    }

    async fn list(&self, limit: Option<i64>) -> Result<Vec<HistoryEntry>> {
        let entries = self.lock();
        let limit = limit.map_or(entries.len(), |l| l.max(0) as usize);
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }
}
