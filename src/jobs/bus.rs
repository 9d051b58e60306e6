//! Build log event bus.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

/// Default number of buffered log events per subscriber.
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

/// Console output events emitted while a build streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LogEvent {
    /// A piece of console text.
    Chunk { build_number: u64, text: String },
    /// The runner reported that streaming failed.
    Error { build_number: u64, message: String },
    /// The build finished and no more output follows.
    Complete { build_number: u64 },
}

impl LogEvent {
    pub fn build_number(&self) -> u64 {
        match self {
            Self::Chunk { build_number, .. }
            | Self::Error { build_number, .. }
            | Self::Complete { build_number } => *build_number,
        }
    }
}

/// Process-wide channel for build log events.
#[derive(Debug, Clone)]
pub struct LogBus {
    sender: broadcast::Sender<LogEvent>,
}

impl Default for LogBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event, returning how many listeners received it.
    pub fn publish(&self, event: LogEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Listens for events of one build. Dropping the subscription detaches it.
    pub fn subscribe(&self, build_number: u64) -> LogSubscription {
        LogSubscription {
            build_number,
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of attached subscriptions.
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Build-scoped view of the log bus.
#[derive(Debug)]
pub struct LogSubscription {
    build_number: u64,
    receiver: broadcast::Receiver<LogEvent>,
}

impl LogSubscription {
    pub fn build_number(&self) -> u64 {
        self.build_number
    }

    /// Waits for the next event of this build.
    ///
    /// Returns `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<LogEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.build_number() == self.build_number => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Log subscriber for build {} lagged, {} events skipped",
                        self.build_number, skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscription_filters_by_build() {
        let bus = LogBus::new();
        let mut sub = bus.subscribe(7);

        bus.publish(LogEvent::Chunk {
            build_number: 6,
            text: "other".to_string(),
        });
        bus.publish(LogEvent::Chunk {
            build_number: 7,
            text: "mine".to_string(),
        });

        assert_eq!(
            sub.next().await,
            Some(LogEvent::Chunk {
                build_number: 7,
                text: "mine".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_dropping_subscription_detaches() {
        let bus = LogBus::new();
        assert_eq!(bus.listener_count(), 0);

        let sub = bus.subscribe(1);
        let other = bus.subscribe(2);
        assert_eq!(bus.listener_count(), 2);

        drop(sub);
        assert_eq!(bus.listener_count(), 1);
        drop(other);
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_without_listeners_is_harmless() {
        let bus = LogBus::new();
        assert_eq!(bus.publish(LogEvent::Complete { build_number: 1 }), 0);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_keeps_receiving() {
        let bus = LogBus::with_capacity(2);
        let mut sub = bus.subscribe(1);
        for i in 0..5 {
            bus.publish(LogEvent::Chunk {
                build_number: 1,
                text: i.to_string(),
            });
        }
        bus.publish(LogEvent::Complete { build_number: 1 });

        let mut last = None;
        while let Some(event) = sub.next().await {
            let done = matches!(event, LogEvent::Complete { .. });
            last = Some(event);
            if done {
                break;
            }
        }
        assert_eq!(last, Some(LogEvent::Complete { build_number: 1 }));
    }
}
