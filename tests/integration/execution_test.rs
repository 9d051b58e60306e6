//! Integration tests for session execution against the scripted job runner.

use pretty_assertions::assert_eq;
use sqlsplit::error::SplitterError;
use sqlsplit::history::{HistoryStatus, MemoryHistory};
use sqlsplit::jobs::{JobCall, JobTarget, LogBus, MockJobClient, ScriptedBuild};
use sqlsplit::orchestrator::{
    ChunkFailure, ChunkStatus, ExecutionSettings, ProgressEvent, ProgressHub, RetryPolicy,
    SessionState, SplitOrchestrator,
};
use sqlsplit::split::SplitError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

// Each statement gets its own chunk at this budget
const ONE_PER_CHUNK: usize = 64;

fn script(count: usize) -> String {
    (1..=count)
        .map(|i| format!("INSERT INTO audit VALUES ({i});\n"))
        .collect()
}

fn settings() -> ExecutionSettings {
    ExecutionSettings {
        target: JobTarget {
            endpoint: "http://jenkins.test".to_string(),
            job_name: "db-apply".to_string(),
            env: "QA".to_string(),
        },
        header: "SET DEFINE OFF;\n".to_string(),
        poll: RetryPolicy::new(4, Duration::from_millis(5)),
        completion_timeout: Duration::from_millis(300),
        oversize_marker: "Argument list too long".to_string(),
    }
}

fn setup(
    scripts: Vec<ScriptedBuild>,
) -> (SplitOrchestrator, Arc<MockJobClient>, Arc<MemoryHistory>, LogBus) {
    setup_with(settings(), scripts)
}

fn setup_with(
    settings: ExecutionSettings,
    scripts: Vec<ScriptedBuild>,
) -> (SplitOrchestrator, Arc<MockJobClient>, Arc<MemoryHistory>, LogBus) {
    let bus = LogBus::new();
    let client = Arc::new(MockJobClient::with_scripts(bus.clone(), scripts));
    let history = Arc::new(MemoryHistory::new());
    let orchestrator = SplitOrchestrator::new(
        client.clone(),
        history.clone(),
        bus.clone(),
        settings,
        ProgressHub::new(),
    );
    (orchestrator, client, history, bus)
}

async fn next_event(sub: &mut sqlsplit::orchestrator::ProgressSubscription) -> ProgressEvent {
    timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("timed out waiting for progress")
        .expect("progress hub closed")
}

#[tokio::test]
async fn test_three_chunks_with_poll_timeout_on_second() {
    let (orchestrator, client, _, _) = setup(vec![
        ScriptedBuild::success(),
        ScriptedBuild::never_assigned(),
        ScriptedBuild::success(),
    ]);

    let plan = orchestrator.start_split(&script(3), ONE_PER_CHUNK).unwrap();
    assert_eq!(plan.len(), 3);
    orchestrator.execute_all().unwrap();
    let session = orchestrator.wait().await.unwrap();

    assert_eq!(
        session.status,
        vec![ChunkStatus::Success, ChunkStatus::Timeout, ChunkStatus::Pending]
    );
    assert_ne!(session.state, SessionState::Completed);
    assert_eq!(session.state, SessionState::Failed);

    let polls = client
        .calls()
        .into_iter()
        .filter(|c| matches!(c, JobCall::Poll { .. }))
        .count();
    // One poll for the first chunk, four for the second
    assert_eq!(polls, 5);
}

#[tokio::test]
async fn test_cancel_while_first_chunk_runs() {
    let (orchestrator, client, _, _) = setup(vec![
        ScriptedBuild::success().with_event_delay(Duration::from_millis(50)),
        ScriptedBuild::success(),
    ]);
    let mut progress = orchestrator.subscribe();

    orchestrator.start_split(&script(2), ONE_PER_CHUNK).unwrap();
    orchestrator.execute_all().unwrap();

    loop {
        if let ProgressEvent::ChunkStarted { index: 0, .. } = next_event(&mut progress).await {
            break;
        }
    }
    assert!(orchestrator.snapshot().status[0] == ChunkStatus::Running);
    assert!(orchestrator.cancel());

    let session = orchestrator.wait().await.unwrap();
    assert_eq!(session.state, SessionState::CancelledPartial);
    assert_eq!(session.status, vec![ChunkStatus::Success, ChunkStatus::Pending]);
    assert_eq!(client.submissions().len(), 1);
    assert!(!client
        .calls()
        .iter()
        .any(|c| matches!(c, JobCall::StreamLogs { build_number } if *build_number == 2)));
}

#[tokio::test]
async fn test_refused_scripts_never_reach_the_runner() {
    let (orchestrator, client, history, _) = setup(vec![]);

    let oversize = format!("INSERT INTO blobs VALUES ('{}');", "z".repeat(1024));
    assert!(matches!(
        orchestrator.start_split(&oversize, ONE_PER_CHUNK),
        Err(SplitterError::Split(SplitError::Oversize(_)))
    ));
    assert!(matches!(
        orchestrator.start_split("DROP TABLE x;", ONE_PER_CHUNK),
        Err(SplitterError::Split(SplitError::Unsafe(_)))
    ));
    assert!(matches!(
        orchestrator.start_split("DELETE FROM audit;", ONE_PER_CHUNK),
        Err(SplitterError::Split(SplitError::Unsafe(_)))
    ));
    assert!(orchestrator.execute_all().is_err());

    assert!(client.calls().is_empty());
    assert!(history.entries().is_empty());
}

#[tokio::test]
async fn test_progress_event_order_for_one_chunk() {
    let (orchestrator, _, _, _) = setup(vec![ScriptedBuild::success().with_logs(["ok\n"])]);
    let mut progress = orchestrator.subscribe();

    orchestrator.start_split(&script(1), ONE_PER_CHUNK).unwrap();
    orchestrator.execute_all().unwrap();
    orchestrator.wait().await.unwrap();

    let mut kinds = Vec::new();
    loop {
        let event = next_event(&mut progress).await;
        let done = matches!(event, ProgressEvent::SessionFinished { .. });
        kinds.push(match event {
            ProgressEvent::SessionPrepared { .. } => "prepared",
            ProgressEvent::SessionStarted { .. } => "started",
            ProgressEvent::ChunkStarted { .. } => "chunk-started",
            ProgressEvent::BuildAssigned { .. } => "build-assigned",
            ProgressEvent::ChunkOutput { .. } => "output",
            ProgressEvent::ChunkFinished { .. } => "chunk-finished",
            ProgressEvent::CancelRequested { .. } => "cancel",
            ProgressEvent::MinimizedChanged { .. } => "minimized",
            ProgressEvent::SessionFinished { .. } => "finished",
        });
        if done {
            break;
        }
    }

    assert_eq!(
        kinds,
        vec![
            "prepared",
            "started",
            "chunk-started",
            "build-assigned",
            "output",
            "chunk-finished",
            "finished"
        ]
    );
}

#[tokio::test]
async fn test_views_can_detach_without_stopping_execution() {
    let (orchestrator, client, _, _) = setup(vec![
        ScriptedBuild::success().with_event_delay(Duration::from_millis(5)),
        ScriptedBuild::success().with_event_delay(Duration::from_millis(5)),
    ]);

    let view = orchestrator.subscribe();
    let observer = orchestrator.clone();
    orchestrator.start_split(&script(2), ONE_PER_CHUNK).unwrap();
    orchestrator.execute_all().unwrap();

    // The hosting view goes away mid-run
    view.unsubscribe();
    observer.set_minimized(true);
    drop(observer);

    let session = orchestrator.wait().await.unwrap();
    assert_eq!(session.state, SessionState::Completed);
    assert!(session.minimized);
    assert_eq!(client.submissions().len(), 2);
}

#[tokio::test]
async fn test_watch_observes_terminal_state() {
    let (orchestrator, _, _, _) = setup(vec![]);
    let mut watcher = orchestrator.watch();

    orchestrator.start_split(&script(2), ONE_PER_CHUNK).unwrap();
    orchestrator.execute_all().unwrap();

    let finished = timeout(
        Duration::from_secs(5),
        watcher.wait_for(|s| s.state.is_terminal()),
    )
    .await
    .expect("session did not finish")
    .unwrap()
    .clone();

    assert_eq!(finished.state, SessionState::Completed);
    assert!(finished.completed);
}

#[tokio::test]
async fn test_log_listeners_released_on_every_path() {
    let (orchestrator, _, _, bus) = setup(vec![
        ScriptedBuild::success(),
        ScriptedBuild::stream_error("lost connection"),
    ]);
    orchestrator.start_split(&script(3), ONE_PER_CHUNK).unwrap();
    orchestrator.execute_all().unwrap();
    let first = orchestrator.wait().await.unwrap();
    assert_eq!(first.state, SessionState::Failed);
    assert_eq!(bus.listener_count(), 0);

    // A repeated run leaves no stale listeners either
    orchestrator.start_split(&script(1), ONE_PER_CHUNK).unwrap();
    orchestrator.execute_all().unwrap();
    let second = orchestrator.wait().await.unwrap();
    assert_eq!(second.state, SessionState::Completed);
    assert_eq!(bus.listener_count(), 0);
}

#[tokio::test]
async fn test_remote_oversize_is_reported_distinctly() {
    let (orchestrator, _, history, _) = setup(vec![ScriptedBuild::success()
        .with_logs(["+ sqlplus @chunk.sql\n", "sh: Argument list too long\n"])]);

    orchestrator.start_split(&script(2), ONE_PER_CHUNK).unwrap();
    orchestrator.execute_all().unwrap();
    let session = orchestrator.wait().await.unwrap();

    assert_eq!(session.status, vec![ChunkStatus::Error, ChunkStatus::Pending]);
    let failure = session.failure.unwrap();
    assert_eq!(failure, ChunkFailure::RemoteOversize { index: 0 });
    assert!(failure.to_string().contains("reduce the chunk size"));
    assert_eq!(history.entries()[0].status, HistoryStatus::Error);
}

#[tokio::test]
async fn test_slow_queue_assignment_within_attempts() {
    let (orchestrator, _, history, _) =
        setup(vec![ScriptedBuild::success().with_polls_before_build(3)]);

    orchestrator.start_split(&script(1), ONE_PER_CHUNK).unwrap();
    orchestrator.execute_all().unwrap();
    let session = orchestrator.wait().await.unwrap();

    assert_eq!(session.state, SessionState::Completed);
    let build = session.builds[0].clone().unwrap();
    assert_eq!(build.build_number, Some(1));
    assert_eq!(
        build.build_url.as_deref(),
        Some("http://jenkins.test/job/db-apply/1/")
    );
    assert_eq!(history.entries()[0].environment, "QA");
}

#[tokio::test]
async fn test_oversize_marker_aborts_without_waiting_for_completion() {
    let mut slow = settings();
    slow.completion_timeout = Duration::from_secs(30);
    let (orchestrator, client, _, bus) = setup_with(
        slow,
        vec![ScriptedBuild::silent().with_logs(["sh: Argument list too long\n"])],
    );

    orchestrator.start_split(&script(2), ONE_PER_CHUNK).unwrap();
    orchestrator.execute_all().unwrap();
    let session = timeout(Duration::from_secs(5), orchestrator.wait())
        .await
        .expect("session kept waiting after the oversize marker")
        .unwrap();

    assert_eq!(session.state, SessionState::Failed);
    assert_eq!(session.status, vec![ChunkStatus::Error, ChunkStatus::Pending]);
    assert_eq!(session.failure, Some(ChunkFailure::RemoteOversize { index: 0 }));
    assert_eq!(session.output[0], "sh: Argument list too long\n");
    assert_eq!(client.submissions().len(), 1);
    assert_eq!(bus.listener_count(), 0);
}

#[tokio::test]
async fn test_unknown_env_fails_before_any_chunk_runs() {
    let bus = LogBus::new();
    let client = Arc::new(MockJobClient::new(bus.clone()).with_env_choices(["DEV", "UAT"]));
    let history = Arc::new(MemoryHistory::new());
    let orchestrator = SplitOrchestrator::new(
        client.clone(),
        history.clone(),
        bus,
        settings(),
        ProgressHub::new(),
    );

    orchestrator.start_split(&script(2), ONE_PER_CHUNK).unwrap();
    let err = orchestrator.check_target().await.unwrap_err();
    assert!(matches!(err, SplitterError::Config(_)));
    assert!(err.to_string().contains("'QA'"));

    let session = orchestrator.snapshot();
    assert_eq!(session.state, SessionState::NotStarted);
    assert_eq!(session.status, vec![ChunkStatus::Pending, ChunkStatus::Pending]);
    assert_eq!(session.failure, None);
    assert!(client.submissions().is_empty());
    assert!(history.entries().is_empty());
}
