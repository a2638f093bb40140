use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use trueno_trials::config::{WorkerConfig, DEFAULT_CACHE_PATH};
use trueno_trials::deadline::Budget;
use trueno_trials::shutdown::install_shutdown_handler;
use trueno_trials::store::{
    open_store, JsonFileTrialStore, RetryPolicy, RetryingStore, DEFAULT_MAX_ATTEMPTS,
};
use trueno_trials::worker::{TrialWorker, WorkerError, EXIT_APPLICATION_ESCAPE};

#[derive(Parser, Debug)]
#[command(name = "trueno-trials")]
#[command(version)]
#[command(about = "Claims benchmark trials, runs them under a deadline, reports outcomes")]
struct Args {
    /// Experiment whose trials this worker runs
    #[arg(long, env = "EXPERIMENT_ID")]
    experiment_id: String,

    /// Runner identity trials are claimed under
    #[arg(long, env = "RUNNER_ID")]
    runner_id: String,

    /// Store connection string (file://<path> or a path to a JSON store)
    #[arg(long, env = "DB_URL")]
    db_url: String,

    /// Per-trial wall-clock timeout in seconds
    #[arg(long, env = "TIMEOUT", required_unless_present = "no_timeout")]
    timeout: Option<f64>,

    /// Run trials without a deadline (overrides --timeout)
    #[arg(long)]
    no_timeout: bool,

    /// Stop after reporting the first routine failure
    #[arg(long)]
    raise_exception: bool,

    /// Log per-trial progress
    #[arg(long, short)]
    verbose: bool,

    /// Run a single trial, then exit 1 if more work may remain (caches the routine locally)
    #[arg(long)]
    return_after_one: bool,

    /// Attempts per store call before giving up
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// Routine source cache file for --return-after-one
    #[arg(long, default_value = DEFAULT_CACHE_PATH)]
    cache_path: PathBuf,
}

impl Args {
    fn budget(&self) -> anyhow::Result<Budget> {
        if self.no_timeout {
            return Ok(Budget::Unlimited);
        }
        let secs = self
            .timeout
            .context("--timeout (or TIMEOUT) is required unless --no-timeout is given")?;
        Ok(Budget::from_secs_f64(secs)?)
    }

    fn worker_config(&self) -> anyhow::Result<WorkerConfig> {
        let config = WorkerConfig::builder(&self.experiment_id, &self.runner_id)
            .budget(self.budget()?)
            .raise_on_error(self.raise_exception)
            .verbose(self.verbose)
            .single_trial(self.return_after_one)
            .cache_path(&self.cache_path)
            .build()?;
        Ok(config)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);
    tracing::info!(
        experiment_id = %args.experiment_id,
        runner_id = %args.runner_id,
        "Starting trial runner"
    );

    let mut worker = match start(&args).await {
        Ok(worker) => worker,
        Err(e) => {
            eprintln!("EXCEPTION:\n{e:#}");
            return exit_code(EXIT_APPLICATION_ESCAPE);
        }
    };

    match worker.run().await {
        Ok(summary) => {
            tracing::info!(
                trials_run = summary.trials_run,
                succeeded = summary.succeeded,
                failed = summary.failed,
                more_work = summary.more_work,
                "Worker finished"
            );
            ExitCode::from(u8::from(summary.more_work))
        }
        Err(e) => {
            report_escape(&e);
            exit_code(e.exit_code())
        }
    }
}

type Worker = TrialWorker<RetryingStore<JsonFileTrialStore>>;

async fn start(args: &Args) -> anyhow::Result<Worker> {
    let config = args.worker_config().context("invalid worker configuration")?;
    let policy = RetryPolicy::new(args.max_attempts)?;
    let store = open_store(&args.db_url)
        .await
        .with_context(|| format!("failed to open store {}", args.db_url))?;
    let shutdown = install_shutdown_handler().context("failed to install signal handlers")?;

    Ok(TrialWorker::new(RetryingStore::new(store, policy), config).with_shutdown(shutdown))
}

fn report_escape(error: &WorkerError) {
    match error.diagnostic() {
        Some(diagnostic) => eprintln!("{error}\n{diagnostic}"),
        None => eprintln!("EXCEPTION:\n{error}"),
    }
}

fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}
