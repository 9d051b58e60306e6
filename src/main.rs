//! sqlsplit - split oversized SQL scripts and run them chunk by chunk.

use anyhow::{bail, Context};
use sqlsplit::cli::{Cli, Command};
use sqlsplit::config::{Config, JobConfig};
use sqlsplit::error::SplitterError;
use sqlsplit::history::{HistoryStore, SqliteHistory};
use sqlsplit::jobs::{LogBus, MockJobClient};
use sqlsplit::logging::{init_file_logging, init_stderr_logging};
use sqlsplit::orchestrator::{
    ExecutionSettings, ProgressEvent, ProgressHub, SessionState, SplitOrchestrator,
};
use sqlsplit::split;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

const MOCK_ENDPOINT: &str = "http://localhost:8080";
const MOCK_JOB: &str = "run-sql";
const MOCK_ENV: &str = "DEV";
const MOCK_ENV_CHOICES: [&str; 3] = ["DEV", "QA", "UAT"];

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse_args();

    if cli.log_file {
        init_file_logging();
    } else {
        init_stderr_logging();
    }

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            match e.downcast_ref::<SplitterError>() {
                Some(err) => {
                    error!("{}: {}", err.category(), err);
                    eprintln!("{}: {}", err.category(), err);
                }
                None => {
                    error!("{e:#}");
                    eprintln!("Error: {e:#}");
                }
            }
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let config = Config::load_from_file(&config_path)?;
    let max_bytes = cli
        .command
        .max_bytes()
        .unwrap_or(config.split.max_chunk_bytes);

    match &cli.command {
        Command::Check { file } => check(file),
        Command::Split {
            file, out, json, ..
        } => split_script(&config, file, max_bytes, out.as_deref(), *json),
        Command::Run {
            file, mock_jobs, ..
        } => {
            // Precedence: CLI flags, then config file, then environment
            let mut job = config.job.clone();
            job.merge(&cli.command.job_overrides());
            job.apply_env_defaults();
            execute(&config, job, file, max_bytes, *mock_jobs).await
        }
        Command::History { limit } => history(*limit).await,
    }
}

fn read_script(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn check(file: &Path) -> anyhow::Result<i32> {
    let sql = read_script(file)?;
    let statements = split::prepare(&sql).map_err(SplitterError::from)?;
    println!(
        "{}: {} executable statements, all checks passed",
        file.display(),
        statements.len()
    );
    Ok(0)
}

fn split_script(
    config: &Config,
    file: &Path,
    max_bytes: usize,
    out: Option<&Path>,
    json: bool,
) -> anyhow::Result<i32> {
    let sql = read_script(file)?;
    let plan =
        split::plan(&sql, &config.split.session_header, max_bytes).map_err(SplitterError::from)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        println!(
            "{} statements in {} chunks (max {} bytes)",
            plan.statement_count(),
            plan.len(),
            plan.max_bytes
        );
        for chunk in &plan.chunks {
            println!(
                "  chunk {:03}: {} statements, {} bytes",
                chunk.index + 1,
                chunk.statements.len(),
                chunk.size_bytes
            );
        }
    }

    if let Some(dir) = out {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        for chunk in &plan.chunks {
            let path = dir.join(format!("chunk_{:03}.sql", chunk.index + 1));
            std::fs::write(&path, &chunk.text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        if !json {
            println!("Wrote {} files to {}", plan.len(), dir.display());
        }
    }
    Ok(0)
}

async fn execute(
    config: &Config,
    mut job: JobConfig,
    file: &Path,
    max_bytes: usize,
    mock_jobs: bool,
) -> anyhow::Result<i32> {
    if !mock_jobs {
        bail!("only the scripted job runner is available; pass --mock-jobs");
    }
    job.endpoint.get_or_insert_with(|| MOCK_ENDPOINT.to_string());
    job.name.get_or_insert_with(|| MOCK_JOB.to_string());
    job.env.get_or_insert_with(|| MOCK_ENV.to_string());
    let target = job.to_target()?;

    let sql = read_script(file)?;
    let history = SqliteHistory::open_default().await?;
    let bus = LogBus::new();
    let client = MockJobClient::new(bus.clone()).with_env_choices(MOCK_ENV_CHOICES);
    let orchestrator = SplitOrchestrator::new(
        Arc::new(client),
        Arc::new(history),
        bus,
        ExecutionSettings::from_config(config, target),
        ProgressHub::global().clone(),
    );

    let mut progress = orchestrator.subscribe();
    let plan = orchestrator.start_split(&sql, max_bytes)?;
    let total = plan.len();
    orchestrator.check_target().await?;
    println!("Executing {} chunks", total);
    orchestrator.execute_all()?;

    let canceller = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() && canceller.cancel() {
            eprintln!("Cancelling after the current chunk...");
        }
    });

    while let Some(event) = progress.recv().await {
        match event {
            ProgressEvent::ChunkFinished { index, status, .. } => {
                println!("  chunk {}/{}: {}", index + 1, total, status);
            }
            ProgressEvent::SessionFinished { .. } => break,
            _ => {}
        }
    }
    progress.unsubscribe();

    let session = orchestrator.wait().await?;
    println!("Session {}", session.state);
    if let Some(failure) = &session.failure {
        println!("  {failure}");
    }

    Ok(if session.state == SessionState::Completed {
        0
    } else {
        1
    })
}

async fn history(limit: i64) -> anyhow::Result<i32> {
    let store = SqliteHistory::open_default().await?;
    let entries = store.list(Some(limit)).await?;
    if entries.is_empty() {
        println!("No history recorded");
    }
    for entry in entries {
        let build = entry
            .build_number
            .map(|n| format!("build #{n}"))
            .unwrap_or_else(|| "no build".to_string());
        println!(
            "{}  {}/{}  part {}/{}  {:<8} {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.job_name,
            entry.environment,
            entry.part,
            entry.total,
            entry.status.as_str(),
            build
        );
    }
    store.close().await;
    Ok(0)
}
