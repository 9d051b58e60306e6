//! Session progress publishing.
//!
//! Progress is a process-wide publish/subscribe hub. Views subscribe to it and
//! may come and go at any time; the drive loop publishes whether anyone
//! listens or not.

use super::session::{ChunkStatus, SessionId, SessionState};
use serde::Serialize;
use std::sync::OnceLock;
use tokio::sync::broadcast;
use tracing::debug;

/// Default number of buffered progress events per subscriber.
pub const DEFAULT_PROGRESS_CAPACITY: usize = 256;

/// A session lifecycle update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProgressEvent {
    /// A plan was accepted and the session is ready to run.
    SessionPrepared { session: SessionId, chunks: usize },
    SessionStarted { session: SessionId, chunks: usize },
    ChunkStarted { session: SessionId, index: usize },
    BuildAssigned {
        session: SessionId,
        index: usize,
        build_number: u64,
        build_url: Option<String>,
    },
    ChunkOutput {
        session: SessionId,
        index: usize,
        text: String,
    },
    ChunkFinished {
        session: SessionId,
        index: usize,
        status: ChunkStatus,
    },
    CancelRequested { session: SessionId },
    MinimizedChanged { session: SessionId, minimized: bool },
    SessionFinished {
        session: SessionId,
        state: SessionState,
    },
}

impl ProgressEvent {
    pub fn session(&self) -> SessionId {
        match self {
            Self::SessionPrepared { session, .. }
            | Self::SessionStarted { session, .. }
            | Self::ChunkStarted { session, .. }
            | Self::BuildAssigned { session, .. }
            | Self::ChunkOutput { session, .. }
            | Self::ChunkFinished { session, .. }
            | Self::CancelRequested { session }
            | Self::MinimizedChanged { session, .. }
            | Self::SessionFinished { session, .. } => *session,
        }
    }
}

/// Broadcast hub for progress events.
#[derive(Debug, Clone)]
pub struct ProgressHub {
    sender: broadcast::Sender<ProgressEvent>,
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_PROGRESS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// The hub shared by the whole process.
    pub fn global() -> &'static ProgressHub {
        static GLOBAL: OnceLock<ProgressHub> = OnceLock::new();
        GLOBAL.get_or_init(ProgressHub::new)
    }

    pub fn publish(&self, event: ProgressEvent) {
        if self.sender.send(event).is_err() {
            debug!("No progress subscribers");
        }
    }

    pub fn subscribe(&self) -> ProgressSubscription {
        ProgressSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// A view's attachment to the hub. Dropping it detaches.
#[derive(Debug)]
pub struct ProgressSubscription {
    receiver: broadcast::Receiver<ProgressEvent>,
}

impl ProgressSubscription {
    /// Waits for the next event, skipping any the subscriber lagged behind on.
    ///
    /// Returns `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Progress subscriber lagged, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Detaches from the hub.
    pub fn unsubscribe(self) {}
}
