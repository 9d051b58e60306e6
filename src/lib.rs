//! sqlsplit - split oversized SQL scripts and run them chunk by chunk.
//!
//! This library exposes the core modules for the binary and integration tests.

pub mod cli;
pub mod config;
pub mod error;
pub mod history;
pub mod jobs;
pub mod logging;
pub mod orchestrator;
pub mod safety;
pub mod split;
pub mod sql;
