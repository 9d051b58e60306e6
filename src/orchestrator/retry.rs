//! Fixed-delay retry.

use std::future::Future;
use std::time::Duration;

/// How often and how patiently to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempt ceiling, including the first attempt.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(30, Duration::from_secs(2))
    }
}

/// How a retried operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Ready { value: T, attempts: u32 },
    Exhausted { attempts: u32 },
}

/// Calls `attempt` until it yields a value or the policy runs out.
///
/// The first attempt runs immediately. `attempt` receives the one-based
/// attempt number. There is no pause after the final attempt.
pub async fn retry_fixed<T, F, Fut>(policy: RetryPolicy, mut attempt: F) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let mut made = 0;
    while made < policy.max_attempts {
        made += 1;
        if let Some(value) = attempt(made).await {
            return RetryOutcome::Ready {
                value,
                attempts: made,
            };
        }
        if made < policy.max_attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }
    RetryOutcome::Exhausted { attempts: made }
}
