//! Integration tests for the SQLite history store.

use pretty_assertions::assert_eq;
use sqlsplit::history::{HistoryPatch, HistoryStatus, HistoryStore, NewHistoryEntry, SqliteHistory};
use sqlsplit::jobs::{JobTarget, LogBus, MockJobClient, ScriptedBuild};
use sqlsplit::orchestrator::{
    ExecutionSettings, ProgressHub, RetryPolicy, SessionState, SplitOrchestrator,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn entry(part: u32, total: u32) -> NewHistoryEntry {
    NewHistoryEntry {
        environment: "UAT".to_string(),
        job_name: "db-apply".to_string(),
        sql: format!("SET DEFINE OFF;\nINSERT INTO t VALUES ({part});"),
        part,
        total,
    }
}

#[tokio::test]
async fn test_history_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("state.db");

    let store = SqliteHistory::open(&path).await.unwrap();
    let first = store.append(entry(1, 2)).await.unwrap();
    let second = store.append(entry(2, 2)).await.unwrap();
    store
        .update(
            first,
            HistoryPatch {
                status: HistoryStatus::Success,
                build_number: Some(41),
                build_url: Some("http://ci/job/db-apply/41/".to_string()),
            },
        )
        .await
        .unwrap();
    store.close().await;

    let reopened = SqliteHistory::open(&path).await.unwrap();
    assert_eq!(reopened.count().await.unwrap(), 2);

    let entries = reopened.list(None).await.unwrap();
    assert_eq!(entries[0].id, second);
    assert_eq!(entries[0].status, HistoryStatus::Pending);
    assert_eq!(entries[1].id, first);
    assert_eq!(entries[1].status, HistoryStatus::Success);
    assert_eq!(entries[1].build_number, Some(41));
    assert_eq!(entries[1].part, 1);
    assert_eq!(entries[1].total, 2);
    reopened.close().await;
}

#[tokio::test]
async fn test_list_respects_limit() {
    let store = SqliteHistory::in_memory().await.unwrap();
    for part in 1..=5 {
        store.append(entry(part, 5)).await.unwrap();
    }

    let latest = store.list(Some(2)).await.unwrap();
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[0].part, 5);
    assert_eq!(latest[1].part, 4);
}

#[tokio::test]
async fn test_orchestrated_run_is_recorded() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteHistory::open(&dir.path().join("state.db")).await.unwrap());

    let bus = LogBus::new();
    let client = Arc::new(MockJobClient::with_scripts(
        bus.clone(),
        [ScriptedBuild::success(), ScriptedBuild::never_assigned()],
    ));
    let mut settings = ExecutionSettings::new(JobTarget {
        endpoint: "http://ci".to_string(),
        job_name: "db-apply".to_string(),
        env: "UAT".to_string(),
    });
    settings.poll = RetryPolicy::new(2, Duration::from_millis(5));
    settings.completion_timeout = Duration::from_millis(300);

    let orchestrator =
        SplitOrchestrator::new(client, store.clone(), bus, settings, ProgressHub::new());
    orchestrator
        .start_split(
            "INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2);\nINSERT INTO t VALUES (3);",
            48,
        )
        .unwrap();
    orchestrator.execute_all().unwrap();
    let session = orchestrator.wait().await.unwrap();
    assert_eq!(session.state, SessionState::Failed);

    // Chunks that never started leave no rows
    let entries = store.list(None).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].part, 1);
    assert_eq!(entries[1].total, 3);
    assert_eq!(entries[1].status, HistoryStatus::Success);
    assert_eq!(entries[1].build_number, Some(1));
    assert!(entries[1].sql.contains("INSERT INTO t VALUES (1);"));
    assert_eq!(entries[0].part, 2);
    assert_eq!(entries[0].status, HistoryStatus::Timeout);
    assert_eq!(entries[0].build_number, None);
}
