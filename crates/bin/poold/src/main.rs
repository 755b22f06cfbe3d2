//! Pool worker daemon.
//!
//! Connects to the coordination database, runs a worker instance, and turns
//! the worker's outcome into a process exit status. A supervisor (systemd,
//! a shell loop) is expected to restart the process when it exits with
//! [`RESTART_EXIT_CODE`] after a code update.

use std::{path::PathBuf, sync::Arc, time::Duration};

use pool_db::{PoolConfig, PoolDb};
use pool_worker::{
    Config, EchoHandler, HandlerRegistry, MachineCapabilities, Outcome, Updater, Worker, WorkerId,
};
use tokio_util::sync::CancellationToken;

/// Exit code asking the supervisor to restart the process with identical
/// arguments (EX_TEMPFAIL).
const RESTART_EXIT_CODE: i32 = 75;

#[derive(Debug, clap::Parser)]
#[command(version, about = "Database-coordinated job pool worker")]
struct Args {
    /// PostgreSQL connection URL for the pool coordination database.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Comma-separated job types this worker claims. Claims any type when
    /// omitted.
    #[arg(long = "job-types", value_delimiter = ',')]
    job_types: Vec<String>,

    /// Maximum number of jobs executing concurrently.
    ///
    /// Defaults to a recommendation derived from detected CPU and memory.
    #[arg(long, env = "POOL_MAX_CONCURRENT")]
    max_concurrent: Option<usize>,

    /// Maximum number of jobs claimed per poll cycle.
    #[arg(long, default_value_t = 4)]
    batch_size: i64,

    /// Seconds between queue poll cycles.
    #[arg(long, default_value_t = 5)]
    poll_interval_secs: u64,

    /// Seconds between stale-job sweeps.
    #[arg(long, default_value_t = 60)]
    stale_sweep_interval_secs: u64,

    /// Minutes a running job may go without finishing before it is
    /// considered stale, when the job carries no usable timeout of its own.
    #[arg(long, default_value_t = 60)]
    stale_timeout_mins: u64,

    /// Claim attempts after which a repeatedly stale job is failed for good.
    #[arg(long, default_value_t = 3)]
    max_attempts: i32,

    /// Publish the local managed files as the current code version on
    /// startup. Exactly one pool instance should run with this flag.
    #[arg(long)]
    publish: bool,

    /// Disable the periodic code update check.
    #[arg(long)]
    no_update_check: bool,

    /// Seconds between code update checks.
    #[arg(long, default_value_t = 300)]
    update_check_interval_secs: u64,

    /// Directory containing the managed source files.
    #[arg(long, env = "POOL_CODE_ROOT", default_value = ".")]
    code_root: PathBuf,

    /// Managed source file, relative to --code-root. Repeatable.
    #[arg(long = "managed-file")]
    managed_files: Vec<String>,

    /// Index distinguishing multiple worker processes on one host.
    #[arg(long, default_value_t = 0)]
    worker_index: u32,
}

#[tokio::main]
async fn main() {
    monitoring::init();

    match main_inner().await {
        Ok(Outcome::Shutdown) => {}
        Ok(Outcome::RestartRequested) => {
            std::process::exit(RESTART_EXIT_CODE);
        }
        Err(err) => {
            // Manually print the error so we can control the format.
            let err = error_with_causes(&err);
            eprintln!("Exiting with error: {err}");
            std::process::exit(1);
        }
    }
}

async fn main_inner() -> Result<Outcome, Error> {
    let args: Args = clap::Parser::parse();

    let worker_id = WorkerId::generate(args.worker_index);
    let capabilities = MachineCapabilities::detect();
    tracing::info!(
        worker_id = %worker_id,
        physical_cores = capabilities.physical_cores,
        available_memory_mb = capabilities.available_memory_mb,
        "starting pool worker"
    );

    let db = PoolDb::connect_with_retry(
        args.database_url.as_str(),
        &PoolConfig::default(),
        Duration::from_secs(60),
    )
    .await
    .map_err(Error::Connect)?;

    let updater = if args.managed_files.is_empty() {
        None
    } else {
        Some(Updater::new(
            db.clone(),
            args.code_root.clone(),
            args.managed_files.clone(),
            worker_id.to_string(),
        ))
    };

    if args.publish {
        let updater = updater.as_ref().ok_or(Error::NothingToPublish)?;
        updater.publish().await.map_err(Error::Publish)?;
    }

    let config = Config {
        job_types: (!args.job_types.is_empty()).then(|| args.job_types.clone()),
        max_concurrent: args
            .max_concurrent
            .unwrap_or_else(|| recommended_concurrency(&capabilities, &args.job_types)),
        batch_size: args.batch_size,
        poll_interval: Duration::from_secs(args.poll_interval_secs),
        stale_sweep_interval: Duration::from_secs(args.stale_sweep_interval_secs),
        stale_timeout: Duration::from_secs(args.stale_timeout_mins * 60),
        max_attempts: args.max_attempts,
        update_check_interval: (!args.no_update_check)
            .then(|| Duration::from_secs(args.update_check_interval_secs)),
        code_root: args.code_root,
        managed_files: args.managed_files,
    };

    let mut registry = HandlerRegistry::new();
    registry.register("echo", Arc::new(EchoHandler));

    let worker = Worker::new(worker_id, db, config, registry, updater).map_err(Error::Init)?;

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    let outcome = worker.run(shutdown).await;
    tracing::info!(?outcome, "worker stopped");
    Ok(outcome)
}

/// The concurrency ceiling when none is configured.
///
/// With a job-type filter, the most demanding filtered type wins; an
/// unfiltered worker is sized for the default job footprint.
fn recommended_concurrency(capabilities: &MachineCapabilities, job_types: &[String]) -> usize {
    job_types
        .iter()
        .map(|job_type| capabilities.recommend_concurrency(job_type))
        .min()
        .unwrap_or_else(|| capabilities.recommend_concurrency(""))
}

/// Cancels the token on SIGINT or SIGTERM.
fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        tracing::info!("shutdown signal received");
        shutdown.cancel();
    });
}

/// Errors that terminate the daemon.
#[derive(Debug, thiserror::Error)]
enum Error {
    #[error("Failed to connect to pool database: {0}")]
    Connect(#[source] pool_db::Error),

    #[error("--publish requires at least one --managed-file")]
    NothingToPublish,

    #[error("Failed to publish code version: {0}")]
    Publish(#[source] pool_worker::updater::UpdateError),

    #[error("Failed to initialize worker: {0}")]
    Init(#[source] pool_worker::InitError),
}

/// Builds an error chain string from an error and its sources.
fn error_with_causes(err: &dyn std::error::Error) -> String {
    let mut error_chain = Vec::new();
    let mut current = err;
    while let Some(source) = current.source() {
        error_chain.push(source.to_string());
        current = source;
    }

    if error_chain.is_empty() {
        err.to_string()
    } else {
        format!("{} | Caused by: {}", err, error_chain.join(" -> "))
    }
}
