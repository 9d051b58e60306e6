//! Command-line argument parsing for sqlsplit.

use crate::config::{Config, JobConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Split oversized SQL scripts and run them chunk by chunk.
#[derive(Parser, Debug)]
#[command(name = "sqlsplit")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Write logs to the state directory instead of stderr
    #[arg(long, global = true)]
    pub log_file: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Scan, preprocess, and validate a script
    Check {
        /// SQL script to check
        file: PathBuf,
    },

    /// Print the chunk plan for a script
    Split {
        /// SQL script to split
        file: PathBuf,

        /// Payload budget per chunk in bytes (overrides config)
        #[arg(long, value_name = "N")]
        max_bytes: Option<usize>,

        /// Write chunk_001.sql, chunk_002.sql, ... into this directory
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Execute a script chunk by chunk
    Run {
        /// SQL script to run
        file: PathBuf,

        /// Use the scripted in-process job runner
        #[arg(long)]
        mock_jobs: bool,

        /// Payload budget per chunk in bytes (overrides config)
        #[arg(long, value_name = "N")]
        max_bytes: Option<usize>,

        /// Job runner base URL
        #[arg(long, value_name = "URL")]
        endpoint: Option<String>,

        /// Job that executes SQL
        #[arg(long, value_name = "NAME")]
        job: Option<String>,

        /// Target environment
        #[arg(long, value_name = "ENV")]
        env: Option<String>,
    },

    /// List recorded chunk executions
    History {
        /// Number of entries to show
        #[arg(long, value_name = "N", default_value = "20")]
        limit: i64,
    },
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the config file path to use.
    ///
    /// Uses the --config argument if provided, otherwise the default path.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_path)
    }
}

impl Command {
    /// Job settings given on the command line, if any.
    pub fn job_overrides(&self) -> JobConfig {
        match self {
            Self::Run {
                endpoint, job, env, ..
            } => JobConfig {
                endpoint: endpoint.clone(),
                name: job.clone(),
                env: env.clone(),
            },
            _ => JobConfig::default(),
        }
    }

    /// The `--max-bytes` override, if the command takes one.
    pub fn max_bytes(&self) -> Option<usize> {
        match self {
            Self::Split { max_bytes, .. } | Self::Run { max_bytes, .. } => *max_bytes,
            _ => None,
        }
    }
}
