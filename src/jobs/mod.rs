//! Remote job runner abstraction.
//!
//! The runner itself is opaque: chunks are submitted, a queue item is polled
//! until a build is assigned, and the build's console output arrives as
//! events on a [`LogBus`].

mod bus;
mod mock;

pub use bus::{LogBus, LogEvent, LogSubscription, DEFAULT_LOG_CAPACITY};
pub use mock::{JobCall, MockJobClient, ScriptedBuild, ScriptedFinish};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque reference returned on submission, before a build exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueHandle(String);

impl QueueHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of one queue poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePoll {
    /// Set once the runner has started a build for the queue item.
    pub build_number: Option<u64>,
    pub build_url: Option<String>,
}

impl QueuePoll {
    /// A poll result for a queue item that has been picked up.
    pub fn assigned(build_number: u64, build_url: impl Into<String>) -> Self {
        Self {
            build_number: Some(build_number),
            build_url: Some(build_url.into()),
        }
    }
}

/// Everything known about one chunk's remote execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildHandle {
    pub queue_handle: QueueHandle,
    pub build_number: Option<u64>,
    pub build_url: Option<String>,
}

impl BuildHandle {
    /// A handle for a submission that has no build yet.
    pub fn queued(queue_handle: QueueHandle) -> Self {
        Self {
            queue_handle,
            build_number: None,
            build_url: None,
        }
    }
}

/// Where chunks get submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTarget {
    /// Base URL of the job runner.
    pub endpoint: String,
    /// Name of the parameterized job that executes SQL.
    pub job_name: String,
    /// Target environment passed to the job.
    pub env: String,
}

/// Client for the remote job runner.
///
/// `stream_logs` only starts streaming: output is published on the log bus
/// the client was built with, scoped by build number.
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Submits one chunk as a job invocation.
    async fn submit(
        &self,
        endpoint: &str,
        job_name: &str,
        env: &str,
        chunk_text: &str,
    ) -> Result<QueueHandle>;

    /// Checks whether the queue item has been assigned a build.
    async fn poll_queue(&self, endpoint: &str, queue: &QueueHandle) -> Result<QueuePoll>;

    /// Lists the values the job's `ENV` choice parameter accepts.
    ///
    /// Empty when the job declares no such parameter.
    async fn env_choices(&self, endpoint: &str, job_name: &str) -> Result<Vec<String>>;

    /// Begins publishing the build's console output on the log bus.
    async fn stream_logs(&self, endpoint: &str, job_name: &str, build_number: u64) -> Result<()>;
}
