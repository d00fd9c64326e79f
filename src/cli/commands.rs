//! CLI command definitions for asset-forge.
//!
//! `run`/`status`/`init` work on one project directory; `batch` drives the
//! motion x character x style batch scheduler.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::collaborators::Collaborators;
use crate::pipeline::{project_status, run_project, EngineSettings, StageRegistry};
use crate::project::init_project;
use crate::runner::SubprocessInvoker;
use crate::scheduler::{
    BatchScheduler, BatchSettings, BatchStore, BatchSummary, JobExecutor, WorkerPool,
    WorkerPoolConfig,
};

/// Default profile for new projects.
const DEFAULT_PROFILE: &str = "skeletal";

/// Asset generation pipeline runner.
#[derive(Parser)]
#[command(name = "asset-forge")]
#[command(about = "Run staged asset generation pipelines and sprite batches")]
#[command(version)]
#[command(
    long_about = "asset-forge sequences the external generation stages of a project (mesh prep, textures, rigging, animation, export, sprites) and runs batches of motion x character x style sprite jobs.\n\nExample usage:\n  asset-forge init knight --profile skeletal\n  asset-forge run ./knight\n  asset-forge batch create --motions walk,run --characters knight --styles pixel --run async"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Stage table to use instead of the built-in one.
    #[arg(long, env = "ASSET_FORGE_REGISTRY", global = true)]
    pub registry: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run every due stage of a project.
    Run(RunArgs),

    /// Print the per-stage status of a project as JSON.
    Status(StatusArgs),

    /// Create a new project skeleton.
    Init(InitArgs),

    /// Create, run and inspect sprite batches.
    Batch(BatchArgs),
}

/// Arguments for `asset-forge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Project directory.
    pub project: PathBuf,

    /// Run stages even when their outputs already exist.
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for `asset-forge status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Project directory.
    pub project: PathBuf,
}

/// Arguments for `asset-forge init`.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Project name.
    pub name: String,

    /// Directory the project is created in.
    #[arg(short, long, default_value = ".")]
    pub workspace: PathBuf,

    /// Pipeline profile (skeletal, static).
    #[arg(short, long, default_value = DEFAULT_PROFILE)]
    pub profile: String,
}

/// Batch entrypoint arguments.
#[derive(Parser, Debug)]
pub struct BatchArgs {
    /// Batch subcommand to run.
    #[command(subcommand)]
    pub command: BatchSubcommand,

    /// Directory batches are stored in.
    #[arg(long, env = "ASSET_FORGE_BATCH_ROOT", global = true)]
    pub batch_root: Option<PathBuf>,

    /// Number of pool workers for asynchronous runs.
    #[arg(short = 'w', long, env = "ASSET_FORGE_WORKERS", global = true)]
    pub workers: Option<usize>,
}

/// Batch subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum BatchSubcommand {
    /// Create a batch from comma-separated dimensions.
    Create(BatchCreateArgs),

    /// Run the pending jobs of a batch.
    Run(BatchRunArgs),

    /// Print a batch summary as JSON.
    Status(BatchStatusArgs),
}

/// How a batch is executed.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    Sync,
    Async,
}

/// Arguments for `asset-forge batch create`.
#[derive(Parser, Debug)]
pub struct BatchCreateArgs {
    /// Motion descriptors.
    #[arg(long, value_delimiter = ',', required = true)]
    pub motions: Vec<String>,

    /// Character ids.
    #[arg(long, value_delimiter = ',', required = true)]
    pub characters: Vec<String>,

    /// Style preset ids.
    #[arg(long, value_delimiter = ',', required = true)]
    pub styles: Vec<String>,

    /// Run the batch right after creating it.
    #[arg(long, value_enum)]
    pub run: Option<RunMode>,
}

/// Arguments for `asset-forge batch run`.
#[derive(Parser, Debug)]
pub struct BatchRunArgs {
    /// Batch id.
    pub batch_id: String,

    /// Run the jobs on the worker pool.
    #[arg(long = "async")]
    pub background: bool,
}

/// Arguments for `asset-forge batch status`.
#[derive(Parser, Debug)]
pub struct BatchStatusArgs {
    /// Batch id.
    pub batch_id: String,
}

/// Parse CLI arguments without running any commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<ExitCode> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
///
/// Exits with 0 when the command fully succeeded and 1 otherwise.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<ExitCode> {
    let success = execute(cli).await?;
    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn execute(cli: Cli) -> anyhow::Result<bool> {
    let registry = load_registry(cli.registry.as_deref())?;

    match cli.command {
        Commands::Run(args) => run_pipeline_command(args, registry).await,
        Commands::Status(args) => run_status_command(args, registry),
        Commands::Init(args) => run_init_command(args, &registry),
        Commands::Batch(args) => run_batch_command(args).await,
    }
}

fn load_registry(path: Option<&Path>) -> anyhow::Result<Arc<StageRegistry>> {
    let registry = match path {
        Some(path) => StageRegistry::from_json_file(path)
            .with_context(|| format!("Failed to load stage registry {}", path.display()))?,
        None => StageRegistry::builtin(),
    };
    Ok(Arc::new(registry))
}

// ============================================================================
// Project Commands
// ============================================================================

async fn run_pipeline_command(args: RunArgs, registry: Arc<StageRegistry>) -> anyhow::Result<bool> {
    let settings = EngineSettings::from_env()?;
    let invoker = Arc::new(SubprocessInvoker::new());

    Ok(run_project(&args.project, args.force, registry, invoker, settings).await)
}

fn run_status_command(args: StatusArgs, registry: Arc<StageRegistry>) -> anyhow::Result<bool> {
    let status = project_status(&args.project, &registry)?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(true)
}

fn run_init_command(args: InitArgs, registry: &StageRegistry) -> anyhow::Result<bool> {
    let root = init_project(&args.workspace, &args.name, &args.profile, registry)?;
    println!("Created project at {}", root.display());
    Ok(true)
}

// ============================================================================
// Batch Commands
// ============================================================================

fn batch_settings(args: &BatchArgs) -> anyhow::Result<BatchSettings> {
    let mut settings = BatchSettings::from_env()?;
    if let Some(root) = &args.batch_root {
        settings = settings.with_batch_root(root);
    }
    if let Some(workers) = args.workers {
        settings = settings.with_num_workers(workers);
    }
    Ok(settings)
}

fn build_scheduler(settings: &BatchSettings) -> anyhow::Result<BatchScheduler> {
    let store = Arc::new(BatchStore::with_shards(
        &settings.batch_root,
        settings.lock_shards,
    ));
    let collaborators = Collaborators::from_settings(settings)?;
    let executor = Arc::new(JobExecutor::new(Arc::clone(&store), collaborators));
    let pool = Arc::new(WorkerPool::new(
        WorkerPoolConfig::new(settings.num_workers).with_name("batch-worker"),
    ));

    Ok(BatchScheduler::new(store, pool, executor))
}

async fn run_batch_command(args: BatchArgs) -> anyhow::Result<bool> {
    let settings = batch_settings(&args)?;
    let scheduler = build_scheduler(&settings)?;

    match args.command {
        BatchSubcommand::Create(create) => {
            let batch_id = scheduler.create(&create.motions, &create.characters, &create.styles)?;
            println!("{}", batch_id);

            match create.run {
                Some(RunMode::Sync) => run_batch(&scheduler, &batch_id, false).await,
                Some(RunMode::Async) => run_batch(&scheduler, &batch_id, true).await,
                None => Ok(true),
            }
        }
        BatchSubcommand::Run(run) => run_batch(&scheduler, &run.batch_id, run.background).await,
        BatchSubcommand::Status(status) => {
            print_summary(&scheduler.status(&status.batch_id)?)?;
            Ok(true)
        }
    }
}

/// Runs a batch to completion. Succeeds only if no job failed.
async fn run_batch(scheduler: &BatchScheduler, batch_id: &str, on_pool: bool) -> anyhow::Result<bool> {
    let summary = if on_pool {
        let pool = scheduler.pool();
        pool.start()?;
        let queued = scheduler.run_async(batch_id)?;
        info!(batch_id = %batch_id, queued, "Waiting for batch jobs");

        pool.wait_completion().await;
        pool.shutdown().await?;
        scheduler.status(batch_id)?
    } else {
        scheduler.run_sync(batch_id).await?
    };

    print_summary(&summary)?;
    Ok(summary.failed == 0 && summary.tally.pending == 0 && summary.tally.running == 0)
}

fn print_summary(summary: &BatchSummary) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}
