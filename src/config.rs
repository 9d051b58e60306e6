//! Configuration management for sqlsplit.
//!
//! Handles loading configuration from TOML files and environment variables:
//! the job runner target, chunk packing limits, and execution timings.

use crate::error::{Result, SplitterError};
use crate::jobs::JobTarget;
use crate::split::{DEFAULT_MAX_CHUNK_BYTES, DEFAULT_SESSION_HEADER};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Main configuration structure for sqlsplit.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Remote job runner target.
    #[serde(default)]
    pub job: JobConfig,

    /// Chunk packing settings.
    #[serde(default)]
    pub split: SplitConfig,

    /// Drive loop timings.
    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// Remote job runner configuration.
///
/// All fields are optional in the file; `to_target` requires them.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct JobConfig {
    /// Base URL of the job runner.
    pub endpoint: Option<String>,

    /// Name of the job that executes SQL.
    pub name: Option<String>,

    /// Target environment (e.g., "DEV", "QA").
    pub env: Option<String>,
}

impl JobConfig {
    /// Merges another config into this one, with the other taking precedence.
    pub fn merge(&mut self, other: &JobConfig) {
        if other.endpoint.is_some() {
            self.endpoint = other.endpoint.clone();
        }
        if other.name.is_some() {
            self.name = other.name.clone();
        }
        if other.env.is_some() {
            self.env = other.env.clone();
        }
    }

    /// Applies environment variables (SQLSPLIT_ENDPOINT, etc.) as defaults.
    pub fn apply_env_defaults(&mut self) {
        if self.endpoint.is_none() {
            self.endpoint = std::env::var("SQLSPLIT_ENDPOINT").ok();
        }
        if self.name.is_none() {
            self.name = std::env::var("SQLSPLIT_JOB").ok();
        }
        if self.env.is_none() {
            self.env = std::env::var("SQLSPLIT_ENV").ok();
        }
    }

    /// Builds a validated job target.
    pub fn to_target(&self) -> Result<JobTarget> {
        let endpoint = self.endpoint.as_deref().ok_or_else(|| {
            SplitterError::config("No job endpoint configured (set [job].endpoint or SQLSPLIT_ENDPOINT)")
        })?;
        let url = Url::parse(endpoint)
            .map_err(|e| SplitterError::config(format!("Invalid job endpoint '{endpoint}': {e}")))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SplitterError::config(format!(
                "Invalid scheme '{}'. Expected 'http' or 'https'",
                url.scheme()
            )));
        }

        let job_name = self
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| SplitterError::config("Job name is required"))?;
        let env = self
            .env
            .clone()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| SplitterError::config("Target environment is required"))?;

        Ok(JobTarget {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            job_name,
            env,
        })
    }
}

/// Chunk packing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SplitConfig {
    /// Payload budget per chunk in bytes, header included.
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,

    /// Text prepended to every chunk.
    #[serde(default = "default_session_header")]
    pub session_header: String,
}

fn default_max_chunk_bytes() -> usize {
    DEFAULT_MAX_CHUNK_BYTES
}

fn default_session_header() -> String {
    DEFAULT_SESSION_HEADER.to_string()
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            max_chunk_bytes: default_max_chunk_bytes(),
            session_header: default_session_header(),
        }
    }
}

/// Drive loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionConfig {
    /// Queue polls before a chunk times out waiting for a build.
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,

    /// Delay between queue polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long a build may stream before the chunk times out.
    #[serde(default = "default_completion_timeout_secs")]
    pub completion_timeout_secs: u64,

    /// Console text that means the runner refused the payload size.
    #[serde(default = "default_oversize_marker")]
    pub oversize_marker: String,
}

fn default_poll_attempts() -> u32 {
    30
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_completion_timeout_secs() -> u64 {
    900
}

fn default_oversize_marker() -> String {
    "Argument list too long".to_string()
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            poll_attempts: default_poll_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            completion_timeout_secs: default_completion_timeout_secs(),
            oversize_marker: default_oversize_marker(),
        }
    }
}

impl Config {
    /// Returns the default config file path for the current platform.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sqlsplit")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| SplitterError::config(format!("Failed to read config file: {e}")))?;

        Self::parse_toml(&content, path)
    }

    /// Parses configuration from a TOML string.
    fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| {
            SplitterError::config(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if self.split.max_chunk_bytes <= self.split.session_header.len() {
            return Err(SplitterError::config(format!(
                "Configuration error in {}:\n  max_chunk_bytes ({}) must exceed the session header length ({})",
                path.display(),
                self.split.max_chunk_bytes,
                self.split.session_header.len()
            )));
        }
        if self.execution.poll_attempts == 0 {
            return Err(SplitterError::config(format!(
                "Configuration error in {}:\n  poll_attempts must be at least 1",
                path.display()
            )));
        }
        Ok(())
    }
}
