//! The drive loop.
//!
//! Runs the chunks of one session strictly in order. Chunk `i + 1` is never
//! submitted before chunk `i` is terminal, and cancellation is only observed
//! between chunks.

use super::retry::{retry_fixed, RetryOutcome};
use super::session::{ChunkFailure, ChunkStatus, SessionId, SessionState};
use super::{Inner, ProgressEvent};
use crate::history::{HistoryPatch, NewHistoryEntry};
use crate::jobs::{BuildHandle, LogEvent, QueuePoll};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(super) async fn drive(inner: Arc<Inner>, cancel: CancellationToken) {
    let (session, total) = inner.session_info();
    let target = &inner.settings.target;
    info!(
        "Session {} started: {} chunks for {} ({})",
        session, total, target.job_name, target.env
    );
    inner.progress.publish(ProgressEvent::SessionStarted {
        session,
        chunks: total,
    });

    let mut state = SessionState::Completed;
    for index in 0..total {
        if cancel.is_cancelled() {
            info!(
                "Session {} cancelled before chunk {}/{}",
                session,
                index + 1,
                total
            );
            state = SessionState::CancelledPartial;
            break;
        }
        if let Err(failure) = run_chunk(&inner, session, index, total).await {
            warn!("Session {} aborted: {}", session, failure);
            state = SessionState::Failed;
            break;
        }
    }

    inner.modify(|s| {
        s.state = state;
        s.completed = true;
        s.current = None;
    });
    info!("Session {} finished: {}", session, state);
    inner
        .progress
        .publish(ProgressEvent::SessionFinished { session, state });
}

async fn run_chunk(
    inner: &Inner,
    session: SessionId,
    index: usize,
    total: usize,
) -> Result<(), ChunkFailure> {
    let text = inner.chunk_text(index);
    inner.modify(|s| {
        s.current = Some(index);
        s.status[index] = ChunkStatus::Running;
    });
    inner
        .progress
        .publish(ProgressEvent::ChunkStarted { session, index });
    let entry = record_start(inner, &text, index, total).await;

    let result = execute_chunk(inner, session, index, &text).await;
    let status = match &result {
        Ok(()) => ChunkStatus::Success,
        Err(failure) => failure.status(),
    };
    let failure = result.as_ref().err().cloned();
    inner.modify(move |s| {
        s.status[index] = status;
        if failure.is_some() {
            s.failure = failure;
        }
    });

    if let Some(id) = entry {
        record_finish(inner, id, index, status).await;
    }
    inner.progress.publish(ProgressEvent::ChunkFinished {
        session,
        index,
        status,
    });
    result
}

async fn execute_chunk(
    inner: &Inner,
    session: SessionId,
    index: usize,
    text: &str,
) -> Result<(), ChunkFailure> {
    let settings = &inner.settings;
    let target = &settings.target;
    let client = inner.client.as_ref();

    let queue = client
        .submit(&target.endpoint, &target.job_name, &target.env, text)
        .await
        .map_err(|e| ChunkFailure::Submission {
            index,
            message: e.to_string(),
        })?;
    info!(
        "Chunk {} submitted ({} bytes), queued as {}",
        index + 1,
        text.len(),
        queue
    );
    let handle = BuildHandle::queued(queue.clone());
    inner.modify(move |s| s.builds[index] = Some(handle));

    let endpoint = target.endpoint.as_str();
    let queue_ref = &queue;
    let outcome = retry_fixed(settings.poll, move |attempt| async move {
        match client.poll_queue(endpoint, queue_ref).await {
            Ok(QueuePoll {
                build_number: Some(number),
                build_url,
            }) => Some((number, build_url)),
            Ok(_) => {
                debug!("Poll {} for {}: no build yet", attempt, queue_ref);
                None
            }
            Err(e) => {
                debug!("Poll {} for {} failed: {}", attempt, queue_ref, e);
                None
            }
        }
    })
    .await;

    let (build_number, build_url) = match outcome {
        RetryOutcome::Ready { value, attempts } => {
            info!(
                "Chunk {} assigned build {} after {} polls",
                index + 1,
                value.0,
                attempts
            );
            value
        }
        RetryOutcome::Exhausted { attempts } => {
            return Err(ChunkFailure::PollTimeout { index, attempts });
        }
    };
    let url = build_url.clone();
    inner.modify(move |s| {
        if let Some(build) = s.builds[index].as_mut() {
            build.build_number = Some(build_number);
            build.build_url = url;
        }
    });
    inner.progress.publish(ProgressEvent::BuildAssigned {
        session,
        index,
        build_number,
        build_url,
    });

    // Subscribed before streaming starts so no output is missed
    let mut logs = inner.log_bus.subscribe(build_number);
    client
        .stream_logs(&target.endpoint, &target.job_name, build_number)
        .await
        .map_err(|e| ChunkFailure::Stream {
            index,
            message: e.to_string(),
        })?;

    let mut marker = MarkerWatch::new(&settings.oversize_marker);
    let deadline = Instant::now() + settings.completion_timeout;
    let end = loop {
        match tokio::time::timeout_at(deadline, logs.next()).await {
            Err(_) => {
                break Err(ChunkFailure::CompletionTimeout {
                    index,
                    waited_ms: settings.completion_timeout.as_millis() as u64,
                })
            }
            Ok(None) => {
                break Err(ChunkFailure::Stream {
                    index,
                    message: "log stream closed before the build finished".to_string(),
                })
            }
            Ok(Some(LogEvent::Chunk { text, .. })) => {
                let oversize = marker.feed(&text);
                let piece = text.clone();
                inner.modify(move |s| s.output[index].push_str(&piece));
                inner.progress.publish(ProgressEvent::ChunkOutput {
                    session,
                    index,
                    text,
                });
                if oversize {
                    warn!(
                        "Chunk {} output reports an oversize payload",
                        index + 1
                    );
                    break Err(ChunkFailure::RemoteOversize { index });
                }
            }
            Ok(Some(LogEvent::Error { message, .. })) => {
                break Err(ChunkFailure::Stream { index, message })
            }
            Ok(Some(LogEvent::Complete { .. })) => break Ok(()),
        }
    };
    drop(logs);
    end
}

async fn record_start(inner: &Inner, text: &str, index: usize, total: usize) -> Option<i64> {
    let target = &inner.settings.target;
    let entry = NewHistoryEntry {
        environment: target.env.clone(),
        job_name: target.job_name.clone(),
        sql: text.to_string(),
        part: index as u32 + 1,
        total: total as u32,
    };
    match inner.history.append(entry).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("Failed to record history for chunk {}: {}", index + 1, e);
            None
        }
    }
}

async fn record_finish(inner: &Inner, id: i64, index: usize, status: ChunkStatus) {
    let build = inner.build(index);
    let patch = HistoryPatch {
        status: status.into(),
        build_number: build.as_ref().and_then(|b| b.build_number),
        build_url: build.and_then(|b| b.build_url),
    };
    if let Err(e) = inner.history.update(id, patch).await {
        warn!("Failed to finalize history for chunk {}: {}", index + 1, e);
    }
}

/// Looks for the oversize marker across streamed pieces.
///
/// Keeps just enough trailing text to catch a marker split between pieces.
struct MarkerWatch<'a> {
    marker: &'a str,
    tail: String,
    seen: bool,
}

impl<'a> MarkerWatch<'a> {
    fn new(marker: &'a str) -> Self {
        Self {
            marker,
            tail: String::new(),
            seen: false,
        }
    }

    /// Returns true when this piece completes the first sighting.
    fn feed(&mut self, text: &str) -> bool {
        if self.seen || self.marker.is_empty() {
            return false;
        }
        self.tail.push_str(text);
        if self.tail.contains(self.marker) {
            self.seen = true;
            self.tail.clear();
            return true;
        }

        let keep = self.marker.len() - 1;
        if self.tail.len() > keep {
            let mut cut = self.tail.len() - keep;
            while !self.tail.is_char_boundary(cut) {
                cut -= 1;
            }
            self.tail.drain(..cut);
        }
        false
    }

    #[cfg(test)]
    fn seen(&self) -> bool {
        self.seen
    }
}
