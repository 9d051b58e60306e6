//! Execution session data model.

use crate::history::HistoryStatus;
use crate::jobs::BuildHandle;
use crate::split::Chunk;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a prepared session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// Generates a new unique session ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-chunk execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    Running,
    Success,
    Failed,
    Timeout,
    Error,
}

impl ChunkStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Timeout | Self::Error
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ChunkStatus> for HistoryStatus {
    fn from(status: ChunkStatus) -> Self {
        match status {
            ChunkStatus::Pending | ChunkStatus::Running => HistoryStatus::Pending,
            ChunkStatus::Success => HistoryStatus::Success,
            ChunkStatus::Failed => HistoryStatus::Failed,
            ChunkStatus::Timeout => HistoryStatus::Timeout,
            ChunkStatus::Error => HistoryStatus::Error,
        }
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NotStarted,
    Running,
    Completed,
    /// Cancelled at a chunk boundary; unvisited chunks stay pending.
    CancelledPartial,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CancelledPartial | Self::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not started",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::CancelledPartial => "cancelled (partial)",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the drive loop aborted a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum ChunkFailure {
    /// The runner refused the submission.
    Submission { index: usize, message: String },
    /// No build was assigned within the poll attempts.
    PollTimeout { index: usize, attempts: u32 },
    /// Log streaming could not start or reported an error.
    Stream { index: usize, message: String },
    /// The build did not finish within the completion timeout.
    CompletionTimeout { index: usize, waited_ms: u64 },
    /// The runner reported the payload as too large.
    RemoteOversize { index: usize },
}

impl ChunkFailure {
    /// Zero-based index of the failed chunk.
    pub fn index(&self) -> usize {
        match self {
            Self::Submission { index, .. }
            | Self::PollTimeout { index, .. }
            | Self::Stream { index, .. }
            | Self::CompletionTimeout { index, .. }
            | Self::RemoteOversize { index } => *index,
        }
    }

    /// Terminal status the failed chunk ends in.
    pub fn status(&self) -> ChunkStatus {
        match self {
            Self::Submission { .. } | Self::Stream { .. } => ChunkStatus::Failed,
            Self::PollTimeout { .. } | Self::CompletionTimeout { .. } => ChunkStatus::Timeout,
            Self::RemoteOversize { .. } => ChunkStatus::Error,
        }
    }
}

impl fmt::Display for ChunkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let part = self.index() + 1;
        match self {
            Self::Submission { message, .. } => {
                write!(f, "chunk {part}: submission failed: {message}")
            }
            Self::PollTimeout { attempts, .. } => {
                write!(f, "chunk {part}: no build assigned after {attempts} polls")
            }
            Self::Stream { message, .. } => write!(f, "chunk {part}: build failed: {message}"),
            Self::CompletionTimeout { waited_ms, .. } => {
                write!(f, "chunk {part}: build did not finish within {waited_ms}ms")
            }
            Self::RemoteOversize { .. } => write!(
                f,
                "chunk {part}: the job runner rejected the payload as too large; \
                 reduce the chunk size and split again"
            ),
        }
    }
}

impl std::error::Error for ChunkFailure {}

/// A prepared or running execution of a chunk plan.
///
/// Chunk progress is written only by the drive loop. Everyone else reads
/// snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionSession {
    pub id: SessionId,
    pub chunks: Vec<Chunk>,
    /// Parallel to `chunks`.
    pub status: Vec<ChunkStatus>,
    /// Parallel to `chunks`; set once a chunk is submitted.
    pub builds: Vec<Option<BuildHandle>>,
    /// Console output received per chunk.
    pub output: Vec<String>,
    /// Index of the chunk being driven.
    pub current: Option<usize>,
    pub state: SessionState,
    pub started: bool,
    pub cancel_requested: bool,
    /// Set once the drive loop has exited, whatever the outcome.
    pub completed: bool,
    pub minimized: bool,
    pub failure: Option<ChunkFailure>,
}

impl ExecutionSession {
    /// A session with nothing to run.
    pub fn idle() -> Self {
        Self::new(Vec::new())
    }

    pub fn new(chunks: Vec<Chunk>) -> Self {
        let len = chunks.len();
        Self {
            id: SessionId::new(),
            chunks,
            status: vec![ChunkStatus::Pending; len],
            builds: vec![None; len],
            output: vec![String::new(); len],
            current: None,
            state: SessionState::NotStarted,
            started: false,
            cancel_requested: false,
            completed: false,
            minimized: false,
            failure: None,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Number of chunks currently in `status`.
    pub fn count(&self, status: ChunkStatus) -> usize {
        self.status.iter().filter(|s| **s == status).count()
    }
}
