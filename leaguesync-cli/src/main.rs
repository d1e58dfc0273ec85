//! Command-line entry point for the leaguesync pipeline.
//!
//! Configuration comes from `LEAGUESYNC_*` environment variables (see
//! [`PipelineConfig::from_env`]); the collaborator commands name the
//! external fetcher, loader, and validation gates the pipeline drives.
//!
//! Exit codes: 0 success, 1 stage failure, 2 lock contention.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use leaguesync::cancel::CancelToken;
use leaguesync::checkpoint::{Checkpoint, CheckpointLog, JsonlCheckpointLog};
use leaguesync::config::PipelineConfig;
use leaguesync::errors::PipelineError;
use leaguesync::lock::RunLock;
use leaguesync::pipeline::{PipelineController, RunMode};
use leaguesync::promote::PromotionManager;
use leaguesync::sources::{
    CommandSpec, GateTarget, ProcessFetcher, ProcessGate, ProcessLoader, ValidationGate,
};
use leaguesync::store::{DatasetStore, FsDatasetStore};

const EXIT_FAILURE: u8 = 1;
const EXIT_LOCK_CONTENTION: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "leaguesync")]
#[command(about = "Incremental ingestion and promotion pipeline for league data")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Execute a pipeline run.
    Run {
        /// Ignore the incremental marker and rebuild from a full fetch.
        #[arg(long)]
        full_refresh: bool,
        /// Abort the run after this many seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Run one validation gate without touching any managed data.
    Validate {
        /// The environment to validate: dev or prod.
        #[arg(long)]
        target: String,
    },
    /// Print the checkpoint history of one run.
    History {
        /// The run id to inspect.
        run_id: String,
    },
    /// List recorded runs, oldest first.
    Runs,
    /// Re-point production at a backup snapshot.
    Restore {
        /// Backup stamp to restore; defaults to the most recent.
        #[arg(long)]
        backup: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env();

    let result = match cli.command {
        Commands::Run {
            full_refresh,
            timeout_secs,
        } => run(config, full_refresh, timeout_secs).await,
        Commands::Validate { target } => validate(&config, &target).await,
        Commands::History { run_id } => history(&config, &run_id),
        Commands::Runs => runs(&config),
        Commands::Restore { backup } => restore(&config, backup.as_deref()),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn command_from(value: Option<&str>, name: &str) -> Result<CommandSpec> {
    let line = value.with_context(|| format!("{name} is not set"))?;
    Ok(CommandSpec::shell(line))
}

fn gate_from(config: &PipelineConfig) -> Result<ProcessGate> {
    Ok(ProcessGate::new(
        command_from(config.gate_dev_command.as_deref(), "LEAGUESYNC_GATE_DEV_CMD")?,
        command_from(
            config.gate_prod_command.as_deref(),
            "LEAGUESYNC_GATE_PROD_CMD",
        )?,
    ))
}

async fn run(
    mut config: PipelineConfig,
    full_refresh: bool,
    timeout_secs: Option<u64>,
) -> Result<ExitCode> {
    if let Some(secs) = timeout_secs {
        config.run_timeout = Some(Duration::from_secs(secs));
    }
    let mode = RunMode::resolve(
        full_refresh,
        Utc::now().weekday(),
        config.weekly_refresh_day,
    );

    let fetcher = ProcessFetcher::new(command_from(
        config.fetch_command.as_deref(),
        "LEAGUESYNC_FETCH_CMD",
    )?);
    let loader = ProcessLoader::new(command_from(
        config.load_command.as_deref(),
        "LEAGUESYNC_LOAD_CMD",
    )?);
    let gate = gate_from(&config)?;
    let store = FsDatasetStore::new(config.data_root());
    let checkpoints = JsonlCheckpointLog::new(config.checkpoint_path());

    let controller = PipelineController::new(
        config,
        Arc::new(store),
        Arc::new(fetcher),
        Arc::new(loader),
        Arc::new(gate),
        Arc::new(checkpoints),
    );

    let cancel = Arc::new(CancelToken::new());
    let signal_cancel = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel("interrupted by operator");
        }
    });

    match controller.run_with_token(mode, cancel).await {
        Ok(report) => {
            print!("{report}");
            Ok(ExitCode::from(report.exit_code()))
        }
        Err(err) if err.is_lock_contention() => {
            eprintln!("{err}");
            Ok(ExitCode::from(EXIT_LOCK_CONTENTION))
        }
        Err(err) => Err(err.into()),
    }
}

async fn validate(config: &PipelineConfig, target: &str) -> Result<ExitCode> {
    let target: GateTarget = target.parse()?;
    let gate = gate_from(config)?;

    let report = gate
        .validate(target)
        .await
        .map_err(|err| PipelineError::Validation {
            target: target.to_string(),
            diagnostic: err.to_string(),
        })?;

    if report.passed {
        println!("{target}: passed: {}", report.diagnostic);
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{target}: failed: {}", report.diagnostic);
        Ok(ExitCode::from(EXIT_FAILURE))
    }
}

fn history(config: &PipelineConfig, run_id: &str) -> Result<ExitCode> {
    let run_id: Uuid = run_id.parse().context("run id is not a UUID")?;
    let log = JsonlCheckpointLog::new(config.checkpoint_path());
    let history = log.history(run_id)?;
    if history.is_empty() {
        bail!("no checkpoints recorded for run {run_id}");
    }
    for checkpoint in &history {
        println!("{}", render_checkpoint(checkpoint));
    }
    Ok(ExitCode::SUCCESS)
}

fn runs(config: &PipelineConfig) -> Result<ExitCode> {
    let log = JsonlCheckpointLog::new(config.checkpoint_path());
    for digest in log.runs()? {
        println!("{digest}");
    }
    Ok(ExitCode::SUCCESS)
}

fn restore(config: &PipelineConfig, backup: Option<&str>) -> Result<ExitCode> {
    let lock = RunLock::new(config.lock_path(), config.lock_stale_after);
    let guard = match lock.acquire("restore") {
        Ok(guard) => guard,
        Err(err) => {
            let err: PipelineError = err.into();
            if err.is_lock_contention() {
                eprintln!("{err}");
                return Ok(ExitCode::from(EXIT_LOCK_CONTENTION));
            }
            return Err(err.into());
        }
    };

    let store: Arc<dyn DatasetStore> = Arc::new(FsDatasetStore::new(config.data_root()));
    let result = PromotionManager::new(store).restore(backup);
    if let Err(err) = guard.release() {
        tracing::warn!(error = %err, "failed to release run lock after restore");
    }
    let stamp = result?;
    println!("production restored from backup {stamp}");
    Ok(ExitCode::SUCCESS)
}

fn render_checkpoint(checkpoint: &Checkpoint) -> String {
    let mut line = format!(
        "#{} {} {} {}",
        checkpoint.sequence,
        checkpoint.recorded_at.format("%Y-%m-%d %H:%M:%S"),
        checkpoint.stage,
        checkpoint.status
    );
    for (kind, delta) in &checkpoint.counts {
        line.push_str(&format!(" {kind}: {delta}"));
    }
    if let Some(detail) = &checkpoint.detail {
        line.push_str(&format!(" ({detail})"));
    }
    if let Some(cause) = &checkpoint.cause {
        line.push_str(&format!(" cause: {cause}"));
    }
    line
}
