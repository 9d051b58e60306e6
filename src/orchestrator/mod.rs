//! Execution orchestration.
//!
//! [`SplitOrchestrator`] owns at most one session at a time. `start_split`
//! prepares a session from a script, `execute_all` spawns the drive loop, and
//! views observe it through snapshots, a watch channel, or progress events.
//! Views never drive execution: hiding or dropping one leaves the loop alone.

mod progress;
mod retry;
mod runner;
mod session;

pub use progress::{ProgressEvent, ProgressHub, ProgressSubscription, DEFAULT_PROGRESS_CAPACITY};
pub use retry::{retry_fixed, RetryOutcome, RetryPolicy};
pub use session::{ChunkFailure, ChunkStatus, ExecutionSession, SessionId, SessionState};

use crate::config::Config;
use crate::error::{Result, SplitterError};
use crate::history::HistoryStore;
use crate::jobs::{BuildHandle, JobClient, JobTarget, LogBus};
use crate::split::{self, ChunkPlan};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Everything the drive loop needs besides its collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSettings {
    pub target: JobTarget,
    /// Text prepended to every chunk.
    pub header: String,
    /// Queue polling while waiting for a build.
    pub poll: RetryPolicy,
    /// How long a build may stream before it counts as timed out.
    pub completion_timeout: Duration,
    /// Console text meaning the runner refused the payload size.
    pub oversize_marker: String,
}

impl ExecutionSettings {
    /// Settings with the default timings.
    pub fn new(target: JobTarget) -> Self {
        Self::from_config(&Config::default(), target)
    }

    pub fn from_config(config: &Config, target: JobTarget) -> Self {
        let execution = &config.execution;
        Self {
            target,
            header: config.split.session_header.clone(),
            poll: RetryPolicy::new(
                execution.poll_attempts,
                Duration::from_millis(execution.poll_interval_ms),
            ),
            completion_timeout: Duration::from_secs(execution.completion_timeout_secs),
            oversize_marker: execution.oversize_marker.clone(),
        }
    }
}

struct Control {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    client: Arc<dyn JobClient>,
    history: Arc<dyn HistoryStore>,
    log_bus: LogBus,
    progress: ProgressHub,
    settings: ExecutionSettings,
    session: watch::Sender<ExecutionSession>,
    /// Serializes lifecycle transitions. Never held across an await.
    control: Mutex<Control>,
}

impl Inner {
    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn modify(&self, f: impl FnOnce(&mut ExecutionSession)) {
        self.session.send_modify(f);
    }

    fn session_info(&self) -> (SessionId, usize) {
        let session = self.session.borrow();
        (session.id, session.len())
    }

    fn chunk_text(&self, index: usize) -> String {
        self.session.borrow().chunks[index].text.clone()
    }

    fn build(&self, index: usize) -> Option<BuildHandle> {
        self.session.borrow().builds[index].clone()
    }
}

/// Prepares and drives split executions.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SplitOrchestrator {
    inner: Arc<Inner>,
}

impl SplitOrchestrator {
    /// Creates an orchestrator. `log_bus` must be the bus `client` publishes on.
    pub fn new(
        client: Arc<dyn JobClient>,
        history: Arc<dyn HistoryStore>,
        log_bus: LogBus,
        settings: ExecutionSettings,
        progress: ProgressHub,
    ) -> Self {
        let (session, _) = watch::channel(ExecutionSession::idle());
        Self {
            inner: Arc::new(Inner {
                client,
                history,
                log_bus,
                progress,
                settings,
                session,
                control: Mutex::new(Control {
                    cancel: CancellationToken::new(),
                    task: None,
                }),
            }),
        }
    }

    /// Splits `sql` into a plan and installs it as the current session.
    ///
    /// Nothing is submitted. Rejected while a session is running; a finished
    /// or unstarted session is replaced.
    pub fn start_split(&self, sql: &str, max_bytes: usize) -> Result<ChunkPlan> {
        let _control = self.inner.lock_control();
        if self.inner.session.borrow().state == SessionState::Running {
            return Err(SplitterError::session("a session is already running"));
        }

        let plan = match split::plan(sql, &self.inner.settings.header, max_bytes) {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Script rejected ({}): {}", e.category(), e);
                return Err(e.into());
            }
        };

        let session = ExecutionSession::new(plan.chunks.clone());
        let id = session.id;
        self.inner.session.send_replace(session);
        info!(
            "Session {} prepared: {} statements in {} chunks (max {} bytes)",
            id,
            plan.statement_count(),
            plan.len(),
            max_bytes
        );
        self.inner.progress.publish(ProgressEvent::SessionPrepared {
            session: id,
            chunks: plan.len(),
        });
        Ok(plan)
    }

    /// Confirms the job offers the configured environment.
    ///
    /// A job without an `ENV` choice parameter accepts any environment.
    /// Run before `execute_all`; nothing is submitted.
    pub async fn check_target(&self) -> Result<()> {
        let target = &self.inner.settings.target;
        let choices = self
            .inner
            .client
            .env_choices(&target.endpoint, &target.job_name)
            .await?;
        if choices.is_empty() || choices.iter().any(|c| c == &target.env) {
            return Ok(());
        }

        warn!(
            "Environment {} not offered by {} (choices: {})",
            target.env,
            target.job_name,
            choices.join(", ")
        );
        Err(SplitterError::config(format!(
            "environment '{}' is not offered by job '{}' (choices: {})",
            target.env,
            target.job_name,
            choices.join(", ")
        )))
    }

    /// Starts driving the prepared session in the background.
    pub fn execute_all(&self) -> Result<SessionId> {
        let mut control = self.inner.lock_control();
        let id = {
            let session = self.inner.session.borrow();
            match session.state {
                SessionState::NotStarted if !session.is_empty() => session.id,
                SessionState::NotStarted => {
                    return Err(SplitterError::session(
                        "nothing to execute; split a script first",
                    ))
                }
                SessionState::Running => {
                    return Err(SplitterError::session("a session is already running"))
                }
                _ => {
                    return Err(SplitterError::session(
                        "session has already run; split the script again",
                    ))
                }
            }
        };

        self.inner.modify(|s| {
            s.state = SessionState::Running;
            s.started = true;
        });
        let cancel = CancellationToken::new();
        control.cancel = cancel.clone();
        control.task = Some(tokio::spawn(runner::drive(Arc::clone(&self.inner), cancel)));
        Ok(id)
    }

    /// Requests cancellation at the next chunk boundary.
    ///
    /// Returns false when nothing is running or cancellation was already
    /// requested.
    pub fn cancel(&self) -> bool {
        let control = self.inner.lock_control();
        let requested = self.inner.session.send_if_modified(|s| {
            if s.state == SessionState::Running && !s.cancel_requested {
                s.cancel_requested = true;
                true
            } else {
                false
            }
        });
        if requested {
            control.cancel.cancel();
            let session = self.inner.session.borrow().id;
            info!("Session {} cancel requested", session);
            self.inner
                .progress
                .publish(ProgressEvent::CancelRequested { session });
        }
        requested
    }

    /// Records whether the view is hidden. Execution is unaffected.
    pub fn set_minimized(&self, minimized: bool) {
        let changed = self.inner.session.send_if_modified(|s| {
            let changed = s.minimized != minimized;
            s.minimized = minimized;
            changed
        });
        if changed {
            let session = self.inner.session.borrow().id;
            self.inner.progress.publish(ProgressEvent::MinimizedChanged {
                session,
                minimized,
            });
        }
    }

    /// A copy of the current session.
    pub fn snapshot(&self) -> ExecutionSession {
        self.inner.session.borrow().clone()
    }

    /// Observes every session change.
    pub fn watch(&self) -> watch::Receiver<ExecutionSession> {
        self.inner.session.subscribe()
    }

    /// Attaches to progress events. Drop or `unsubscribe` to detach.
    pub fn subscribe(&self) -> ProgressSubscription {
        self.inner.progress.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner.session.borrow().state == SessionState::Running
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.inner.settings
    }

    /// Waits for the drive loop to exit and returns the final session.
    ///
    /// Any number of callers may wait at once; only one of them joins the
    /// task, the others wait for the session to leave `Running`. Returns the
    /// current snapshot right away when nothing was started.
    pub async fn wait(&self) -> Result<ExecutionSession> {
        let task = self.inner.lock_control().task.take();
        if let Some(task) = task {
            task.await
                .map_err(|e| SplitterError::internal(format!("Drive task failed: {e}")))?;
        }

        let mut session = self.watch();
        let finished = session
            .wait_for(|s| s.state != SessionState::Running)
            .await
            .map_err(|e| SplitterError::internal(format!("Session channel closed: {e}")))?
            .clone();
        Ok(finished)
    }
}
