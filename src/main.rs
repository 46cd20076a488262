use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use conductor::config::Config;
use conductor::exec::{CommandInvoker, ExecutionMode};
use conductor::state::{GitRefRecorder, StateStore};
use conductor::{
    AsyncExecutor, CheckpointId, Error, ExecutionReport, Executor, Orchestrator, Request, Result,
    RunOutcome, SyncExecutor, TaskStatus,
};

/// Conductor - decompose development requests into task graphs and run them on agents
#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    CONDUCTOR_DEBUG=1     Enable debug logging (alternative to --debug)\n    RUST_LOG              Override the log filter"
)]
pub struct Cli {
    /// Enable debug logging (writes to ~/.conductor/conductor.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Config file (default: ~/.conductor/conductor.toml)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Decompose a request and execute it
    Run {
        /// Request kind: feature, bugfix, refactor or a configured template
        kind: String,

        /// What the request is about
        summary: String,

        /// Override the configured execution mode (sequential or concurrent)
        #[arg(long)]
        mode: Option<ExecutionMode>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Re-run tasks that did not complete in earlier runs
    Retry {
        #[arg(long)]
        mode: Option<ExecutionMode>,

        #[arg(long)]
        json: bool,
    },

    /// Snapshot the current state
    Checkpoint {
        description: String,
    },

    /// Make a checkpoint's snapshot the current state
    Restore {
        id: String,
    },

    /// List checkpoints
    Checkpoints,

    /// Show the persisted state
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    conductor::log::init_with_debug(cli.debug);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.ensure_dirs()?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match cli.command {
            Command::Run {
                kind,
                summary,
                mode,
                json,
            } => {
                let request = Request::new(kind, summary);
                run_request(&config, mode, Job::Request(request), json).await
            }
            Command::Retry { mode, json } => run_request(&config, mode, Job::Retry, json).await,
            Command::Checkpoint { description } => {
                let id = open_store(&config)?.checkpoint(&description).await?;
                println!("{}", id);
                Ok(())
            }
            Command::Restore { id } => {
                let id = CheckpointId::new(id)?;
                let state = open_store(&config)?.restore(&id).await?;
                println!("Restored {} ({} tasks)", id, state.tasks.len());
                Ok(())
            }
            Command::Checkpoints => run_checkpoints(&config).await,
            Command::Status => run_status(&config).await,
        }
    })
}

enum Job {
    Request(Request),
    Retry,
}

fn open_store(config: &Config) -> Result<StateStore> {
    let store = StateStore::new(config.state_dir()?);
    let cwd = std::env::current_dir()?;
    match GitRefRecorder::new(&cwd) {
        Ok(refs) => Ok(store.with_refs(Arc::new(refs))),
        Err(e) => {
            debug!(error = %e, "No git repository, using detached checkpoint refs");
            Ok(store)
        }
    }
}

async fn run_request(
    config: &Config,
    mode: Option<ExecutionMode>,
    job: Job,
    json: bool,
) -> Result<()> {
    let invoker = CommandInvoker::new(config.effective_command())
        .map_err(|e| Error::AgentHostNotAvailable(e.to_string()))?
        .with_cwd(std::env::current_dir()?);
    if !invoker.is_available() {
        return Err(Error::AgentHostNotAvailable(
            invoker.program().display().to_string(),
        ));
    }

    let strategy = config.selection_strategy()?;
    let invoker = Arc::new(invoker);
    let mode = mode.unwrap_or_else(|| config.effective_mode());
    info!(%mode, strategy = strategy.name(), "Starting");

    match mode {
        ExecutionMode::Sequential => {
            let executor =
                SyncExecutor::new(strategy, invoker).with_config(config.executor_config());
            drive(config, executor, job, json).await
        }
        ExecutionMode::Concurrent => {
            let executor =
                AsyncExecutor::new(strategy, invoker).with_config(config.executor_config());
            drive(config, executor, job, json).await
        }
    }
}

async fn drive<E: Executor>(config: &Config, executor: E, job: Job, json: bool) -> Result<()> {
    let orchestrator = Orchestrator::new(
        config.decomposer()?,
        executor,
        config.registry()?,
        open_store(config)?,
    );

    let cancel = orchestrator.executor().cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling pending tasks");
            eprintln!("Cancelling... in-flight tasks will finish first");
            cancel.cancel();
        }
    });

    let result = match job {
        Job::Request(request) => orchestrator.run(&request).await,
        Job::Retry => orchestrator.retry_persisted().await,
    };
    let outcome = RunOutcome::from_result(result);

    match (&outcome, json) {
        (RunOutcome::Aborted(_), _) => {}
        (_, true) => {
            if let Some(report) = outcome.report() {
                println!("{}", serde_json::to_string_pretty(report)?);
            }
        }
        (_, false) => {
            if let Some(report) = outcome.report() {
                print_report(report);
            }
        }
    }
    println!("Run {}", outcome);

    match outcome {
        RunOutcome::Aborted(err) => Err(err),
        _ => Ok(()),
    }
}

fn print_report(report: &ExecutionReport) {
    println!();
    for task in &report.tasks {
        let agent = task
            .assigned_agent
            .as_ref()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        match &task.failure {
            Some(reason) => println!(
                "  {:<28} {:<12} {:<16} {}",
                task.id.to_string(),
                task.status.to_string(),
                agent,
                reason
            ),
            None => println!(
                "  {:<28} {:<12} {}",
                task.id.to_string(),
                task.status.to_string(),
                agent
            ),
        }
    }
    println!();
    println!(
        "  completed: {}  failed: {}  blocked: {}  cancelled: {}",
        report.completed_count(),
        report.failed_count(),
        report.blocked_count(),
        report.cancelled_count()
    );
    if let Some(checkpoint) = &report.checkpoint {
        println!("  checkpoint: {}", checkpoint);
    }
    if !report.all_completed() {
        println!("  retry the failed subset with: conductor retry");
    }
    println!();
}

async fn run_checkpoints(config: &Config) -> Result<()> {
    let checkpoints = open_store(config)?.list_checkpoints().await?;
    if checkpoints.is_empty() {
        println!("No checkpoints");
        return Ok(());
    }
    for checkpoint in checkpoints {
        println!(
            "{}  {}  {}  {}",
            checkpoint.id,
            checkpoint.timestamp.format("%Y-%m-%d %H:%M:%S"),
            checkpoint.reference,
            checkpoint.description
        );
    }
    Ok(())
}

async fn run_status(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let state = store.load().await?;
    println!("State: {}", store.state_path().display());
    println!("  Agents:   {}", state.agents.len());
    println!("  Tasks:    {}", state.tasks.len());
    for status in [
        TaskStatus::Planned,
        TaskStatus::Assigned,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ] {
        let count = state.count_status(status);
        if count > 0 {
            println!("    {:<12} {}", status.to_string(), count);
        }
    }
    println!("  Messages: {}", state.messages.len());
    println!("  Retryable: {}", state.retryable_tasks().len());
    match &state.last_checkpoint {
        Some(id) => println!("  Last checkpoint: {}", id),
        None => println!("  Last checkpoint: none"),
    }
    Ok(())
}
