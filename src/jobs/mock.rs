//! Scripted job runner for testing.
//!
//! Each submission consumes the next [`ScriptedBuild`]; when the script runs
//! out every further build succeeds immediately.

use super::{JobClient, LogBus, LogEvent, QueueHandle, QueuePoll};
use crate::error::{Result, SplitterError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// How a scripted build ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedFinish {
    /// Publishes a completion event.
    Complete,
    /// Publishes a stream error with the given message.
    Error(String),
    /// Publishes nothing further; the build never completes.
    Silent,
}

/// Scripted behavior for one submission.
#[derive(Debug, Clone)]
pub struct ScriptedBuild {
    /// When set, `submit` fails with this message.
    pub submit_error: Option<String>,
    /// Pending polls before the build is assigned; `None` never assigns.
    pub polls_before_build: Option<u32>,
    /// Console lines published after streaming starts.
    pub log_lines: Vec<String>,
    pub finish: ScriptedFinish,
    /// Pause before each published event.
    pub event_delay: Duration,
}

impl Default for ScriptedBuild {
    fn default() -> Self {
        Self::success()
    }
}

impl ScriptedBuild {
    /// A build that is assigned on the first poll and completes.
    pub fn success() -> Self {
        Self {
            submit_error: None,
            polls_before_build: Some(0),
            log_lines: vec!["Started\n".to_string(), "Finished: SUCCESS\n".to_string()],
            finish: ScriptedFinish::Complete,
            event_delay: Duration::ZERO,
        }
    }

    /// A submission the runner refuses.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            submit_error: Some(message.into()),
            ..Self::success()
        }
    }

    /// A queue item that never turns into a build.
    pub fn never_assigned() -> Self {
        Self {
            polls_before_build: None,
            ..Self::success()
        }
    }

    /// A build whose log stream reports a failure.
    pub fn stream_error(message: impl Into<String>) -> Self {
        Self {
            finish: ScriptedFinish::Error(message.into()),
            ..Self::success()
        }
    }

    /// A build that streams the given lines and then goes quiet.
    pub fn silent() -> Self {
        Self {
            finish: ScriptedFinish::Silent,
            ..Self::success()
        }
    }

    pub fn with_logs<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.log_lines = lines.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_polls_before_build(mut self, polls: u32) -> Self {
        self.polls_before_build = Some(polls);
        self
    }

    pub fn with_event_delay(mut self, delay: Duration) -> Self {
        self.event_delay = delay;
        self
    }
}

/// A call received by the mock, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobCall {
    EnvChoices { job_name: String },
    Submit { job_name: String, env: String },
    Poll { queue: QueueHandle },
    StreamLogs { build_number: u64 },
}

struct QueuedItem {
    job_name: String,
    endpoint: String,
    polls_remaining: Option<u32>,
    build_number: Option<u64>,
    script: ScriptedBuild,
}

#[derive(Default)]
struct MockState {
    scripts: VecDeque<ScriptedBuild>,
    queue: HashMap<QueueHandle, QueuedItem>,
    builds: HashMap<u64, ScriptedBuild>,
    env_choices: Vec<String>,
    calls: Vec<JobCall>,
    submissions: Vec<String>,
    next_queue_id: u64,
    next_build_number: u64,
}

/// A job runner that plays back scripted builds on a log bus.
pub struct MockJobClient {
    bus: LogBus,
    state: Mutex<MockState>,
}

impl MockJobClient {
    /// Creates a mock whose builds all succeed.
    pub fn new(bus: LogBus) -> Self {
        Self {
            bus,
            state: Mutex::new(MockState {
                next_queue_id: 100,
                next_build_number: 1,
                ..Default::default()
            }),
        }
    }

    /// Creates a mock that plays back `scripts` in submission order.
    pub fn with_scripts(bus: LogBus, scripts: impl IntoIterator<Item = ScriptedBuild>) -> Self {
        let client = Self::new(bus);
        client.state().scripts.extend(scripts);
        client
    }

    /// Declares the environments the scripted job offers.
    pub fn with_env_choices<I, S>(self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state().env_choices = choices.into_iter().map(Into::into).collect();
        self
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<JobCall> {
        self.state().calls.clone()
    }

    /// Chunk texts received by `submit`, in order.
    pub fn submissions(&self) -> Vec<String> {
        self.state().submissions.clone()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl JobClient for MockJobClient {
    async fn submit(
        &self,
        endpoint: &str,
        job_name: &str,
        env: &str,
        chunk_text: &str,
    ) -> Result<QueueHandle> {
        let mut state = self.state();
        state.calls.push(JobCall::Submit {
            job_name: job_name.to_string(),
            env: env.to_string(),
        });
        state.submissions.push(chunk_text.to_string());

        let script = state.scripts.pop_front().unwrap_or_default();
        if let Some(message) = &script.submit_error {
            return Err(SplitterError::job(message.clone()));
        }

        state.next_queue_id += 1;
        let handle = QueueHandle::new(format!(
            "{}/queue/item/{}/",
            endpoint.trim_end_matches('/'),
            state.next_queue_id
        ));
        state.queue.insert(
            handle.clone(),
            QueuedItem {
                job_name: job_name.to_string(),
                endpoint: endpoint.to_string(),
                polls_remaining: script.polls_before_build,
                build_number: None,
                script,
            },
        );
        Ok(handle)
    }

    async fn env_choices(&self, _endpoint: &str, job_name: &str) -> Result<Vec<String>> {
        let mut state = self.state();
        state.calls.push(JobCall::EnvChoices {
            job_name: job_name.to_string(),
        });
        Ok(state.env_choices.clone())
    }

    async fn poll_queue(&self, _endpoint: &str, queue: &QueueHandle) -> Result<QueuePoll> {
        let mut state = self.state();
        state.calls.push(JobCall::Poll {
            queue: queue.clone(),
        });

        let mut next_build_number = state.next_build_number;
        let item = state
            .queue
            .get_mut(queue)
            .ok_or_else(|| SplitterError::job(format!("Unknown queue item {queue}")))?;

        let assignment = match item.polls_remaining {
            None => QueuePoll::default(),
            Some(remaining) if remaining > 0 => {
                item.polls_remaining = Some(remaining - 1);
                QueuePoll::default()
            }
            Some(_) => {
                let number = *item.build_number.get_or_insert_with(|| {
                    next_build_number += 1;
                    next_build_number - 1
                });
                let url = format!(
                    "{}/job/{}/{}/",
                    item.endpoint.trim_end_matches('/'),
                    item.job_name,
                    number
                );
                QueuePoll::assigned(number, url)
            }
        };

        if let Some(number) = assignment.build_number {
            if !state.builds.contains_key(&number) {
                let script = state
                    .queue
                    .get(queue)
                    .map(|item| item.script.clone())
                    .unwrap_or_default();
                state.builds.insert(number, script);
            }
        }
        state.next_build_number = next_build_number;

        Ok(assignment)
    }

    async fn stream_logs(&self, _endpoint: &str, _job_name: &str, build_number: u64) -> Result<()> {
        let script = {
            let mut state = self.state();
            state.calls.push(JobCall::StreamLogs { build_number });
            state
                .builds
                .get(&build_number)
                .cloned()
                .ok_or_else(|| SplitterError::job(format!("Unknown build {build_number}")))?
        };

        let bus = self.bus.clone();
        tokio::spawn(async move {
            for text in script.log_lines {
                tokio::time::sleep(script.event_delay).await;
                bus.publish(LogEvent::Chunk { build_number, text });
            }
            tokio::time::sleep(script.event_delay).await;
            match script.finish {
                ScriptedFinish::Complete => {
                    bus.publish(LogEvent::Complete { build_number });
                }
                ScriptedFinish::Error(message) => {
                    bus.publish(LogEvent::Error {
                        build_number,
                        message,
                    });
                }
                ScriptedFinish::Silent => {}
            }
        });

        Ok(())
    }
}
