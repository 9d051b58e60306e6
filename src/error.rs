//! Error types for sqlsplit.
//!
//! Defines the main error enum used throughout the application.

use crate::split::SplitError;
use thiserror::Error;

/// Main error type for sqlsplit operations.
#[derive(Error, Debug)]
pub enum SplitterError {
    /// Configuration errors (invalid config file, bad endpoint URL, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// History store errors (cannot open state database, failed writes, etc.)
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Remote job runner errors (rejected submission, network failure, etc.)
    #[error("Job error: {0}")]
    Job(String),

    /// Script rejected before execution (unsafe, oversize, or empty)
    #[error("Validation error: {0}")]
    Split(#[from] SplitError),

    /// Session lifecycle errors (session already running, nothing to execute, etc.)
    #[error("Session error: {0}")]
    Session(String),

    /// Internal application errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SplitterError {
    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a persistence error with the given message.
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Creates a job runner error with the given message.
    pub fn job(msg: impl Into<String>) -> Self {
        Self::Job(msg.into())
    }

    /// Creates a session error with the given message.
    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "Configuration Error",
            Self::Persistence(_) => "Persistence Error",
            Self::Job(_) => "Job Error",
            Self::Split(_) => "Validation Error",
            Self::Session(_) => "Session Error",
            Self::Internal(_) => "Internal Error",
        }
    }
}

/// Result type alias using SplitterError.
pub type Result<T> = std::result::Result<T, SplitterError>;
