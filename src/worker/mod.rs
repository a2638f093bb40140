//! Trial worker loop
//!
//! Claims trials one at a time, runs the experiment's routine on each under
//! the configured deadline, and reports every claimed trial exactly once.
//!
//! ## State machine
//!
//! ```text
//!  Bootstrapping ──► AwaitingTrial ──(none left)──► Done
//!                        ▲     │
//!                        │     ▼
//!                   Draining ◄── Reporting ◄── Executing
//!                        │
//!                        └──(single-trial mode)──► Done
//! ```
//!
//! Bootstrapping happens once per worker: the routine is fetched (or read
//! from the local cache in single-trial mode) and loaded before any claim.
//! A malformed routine therefore fails the worker without touching a trial.
//!
//! ## Outcome tiers
//!
//! | Outcome              | Reported | Propagated                    |
//! |----------------------|----------|-------------------------------|
//! | success              | `None`   | no                            |
//! | timeout              | message  | no                            |
//! | routine error        | message  | only with `raise_on_error`    |
//! | panic / shutdown     | message  | always                        |
//!
//! The report always happens before propagation.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use trueno_trials::config::WorkerConfig;
//! use trueno_trials::deadline::Budget;
//! use trueno_trials::store::MemoryTrialStore;
//! use trueno_trials::trial::TaskDescriptor;
//! use trueno_trials::worker::TrialWorker;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryTrialStore::new();
//! store.register_routine("exp", "fn run(t) { return t.method; }");
//! store.add_trial("exp", TaskDescriptor::new("openml", "iris"), "ebm");
//!
//! let config = WorkerConfig::builder("exp", "runner-0")
//!     .budget(Budget::limited(Duration::from_secs(2))?)
//!     .build()?;
//! let mut worker = TrialWorker::new(store, config);
//!
//! let summary = worker.run().await?;
//! assert_eq!(summary.succeeded, 1);
//! assert!(!summary.more_work);
//! # Ok(())
//! # }
//! ```

mod source;

use std::fmt;

use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::deadline::{DeadlineExecutor, ExecutionError, Timed};
use crate::routine::{CompiledRoutine, RoutineLoader};
use crate::store::TrialStore;
use crate::trial::{ExecutionOutcome, Trial, TrialId};
use crate::Error;

/// Exit code when a recoverable-class error escapes the worker.
pub const EXIT_APPLICATION_ESCAPE: i32 = 65;

/// Exit code when a non-recoverable failure escapes the worker.
pub const EXIT_SIGNAL_ESCAPE: i32 = 64;

/// Where the worker loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Obtaining and loading the routine.
    Bootstrapping,
    /// Claiming the next trial.
    AwaitingTrial,
    /// Running the routine on a claimed trial.
    Executing,
    /// Reporting the claimed trial's outcome.
    Reporting,
    /// Deciding whether to claim another trial.
    Draining,
    /// Finished; `run` has returned or is about to.
    Done,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bootstrapping => "bootstrapping",
            Self::AwaitingTrial => "awaiting-trial",
            Self::Executing => "executing",
            Self::Reporting => "reporting",
            Self::Draining => "draining",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// What one call to [`TrialWorker::run`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Single-trial mode returned after a report; more trials may remain.
    pub more_work: bool,
    /// Trials claimed and reported.
    pub trials_run: usize,
    /// Trials reported without an error message.
    pub succeeded: usize,
    /// Trials reported with an error message (timeouts included).
    pub failed: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &ExecutionOutcome) {
        self.trials_run += 1;
        if outcome.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Failure that ends the worker loop.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Routine could not be obtained or loaded; no trial was claimed.
    #[error(transparent)]
    Configuration(Error),

    /// A store round-trip failed.
    #[error(transparent)]
    Store(Error),

    /// Routine failed in strict mode; the failure was reported first.
    #[error("routine failed on trial {trial_id}; stopping (raise-on-error)")]
    Application {
        /// Trial the routine failed on.
        trial_id: TrialId,
        /// Diagnostic that was reported.
        diagnostic: String,
    },

    /// Panic or shutdown signal; any in-flight trial was reported first.
    #[error("non-recoverable failure; worker stopped")]
    Signal {
        /// In-flight trial, if one was claimed.
        trial_id: Option<TrialId>,
        /// Diagnostic describing the failure.
        diagnostic: String,
    },
}

impl WorkerError {
    /// Process exit code for this escape.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Signal { .. } => EXIT_SIGNAL_ESCAPE,
            Self::Configuration(_) | Self::Store(_) | Self::Application { .. } => {
                EXIT_APPLICATION_ESCAPE
            }
        }
    }

    /// Diagnostic for failures that carry one.
    #[must_use]
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Self::Application { diagnostic, .. } | Self::Signal { diagnostic, .. } => {
                Some(diagnostic)
            }
            Self::Configuration(_) | Self::Store(_) => None,
        }
    }
}

/// Claim-execute-report loop for one experiment/runner identity.
///
/// Trials run strictly one after another; the report for trial N is sent
/// before trial N+1 is claimed.
pub struct TrialWorker<S> {
    store: S,
    config: WorkerConfig,
    executor: DeadlineExecutor,
    routine: Option<CompiledRoutine>,
    shutdown: CancellationToken,
    state: LoopState,
}

impl<S: TrialStore> TrialWorker<S> {
    /// Create a worker. Nothing is fetched until [`run`](Self::run).
    #[must_use]
    pub fn new(store: S, config: WorkerConfig) -> Self {
        Self {
            store,
            executor: DeadlineExecutor::new(config.budget()),
            config,
            routine: None,
            shutdown: CancellationToken::new(),
            state: LoopState::Bootstrapping,
        }
    }

    /// Stop the loop when `token` is cancelled.
    #[must_use]
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Get the store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Current loop state.
    #[must_use]
    pub const fn state(&self) -> LoopState {
        self.state
    }

    /// The loaded routine, once bootstrapping has succeeded.
    #[must_use]
    pub const fn routine(&self) -> Option<&CompiledRoutine> {
        self.routine.as_ref()
    }

    /// Run trials until none remain, one trial has run in single-trial
    /// mode, or a failure escapes.
    ///
    /// The routine is loaded on the first call only. Calling `run` again
    /// after the store ran dry claims once more and returns an empty summary.
    ///
    /// # Errors
    ///
    /// See [`WorkerError`]. Every claimed trial has been reported when this
    /// returns, except when the report itself failed ([`WorkerError::Store`]).
    pub async fn run(&mut self) -> Result<RunSummary, WorkerError> {
        let routine = match &self.routine {
            Some(routine) => routine.clone(),
            None => {
                self.state = LoopState::Bootstrapping;
                let routine = match self.bootstrap().await {
                    Ok(routine) => routine,
                    Err(e) => return Err(self.fail(e)),
                };
                self.routine = Some(routine.clone());
                routine
            }
        };

        let mut summary = RunSummary::default();
        loop {
            self.state = LoopState::AwaitingTrial;
            if self.shutdown.is_cancelled() {
                self.state = LoopState::Done;
                return Err(WorkerError::Signal {
                    trial_id: None,
                    diagnostic: "EXCEPTION: shutdown requested before claiming a trial"
                        .to_string(),
                });
            }

            let claimed = self
                .store
                .claim_next_trial(self.config.identity())
                .await
                .map_err(|e| self.fail(WorkerError::Store(e)))?;
            let Some(trial) = claimed else {
                tracing::info!(
                    experiment_id = self.config.identity().experiment_id(),
                    runner_id = self.config.identity().runner_id(),
                    trials_run = summary.trials_run,
                    "No more work to start!"
                );
                self.state = LoopState::Done;
                return Ok(summary);
            };

            self.state = LoopState::Executing;
            let outcome = self.execute(&routine, &trial).await;

            self.state = LoopState::Reporting;
            self.store
                .report_trial_outcome(trial.id(), outcome.error_message())
                .await
                .map_err(|e| self.fail(WorkerError::Store(e)))?;
            summary.record(&outcome);

            self.state = LoopState::Draining;
            match outcome {
                ExecutionOutcome::ApplicationFailure(diagnostic)
                    if self.config.raise_on_error() =>
                {
                    return Err(self.fail(WorkerError::Application {
                        trial_id: trial.id(),
                        diagnostic,
                    }));
                }
                ExecutionOutcome::FatalSignal(diagnostic) => {
                    return Err(self.fail(WorkerError::Signal {
                        trial_id: Some(trial.id()),
                        diagnostic,
                    }));
                }
                _ => {}
            }

            if self.config.single_trial() {
                summary.more_work = true;
                self.state = LoopState::Done;
                return Ok(summary);
            }
        }
    }

    fn fail(&mut self, error: WorkerError) -> WorkerError {
        self.state = LoopState::Done;
        error
    }

    async fn bootstrap(&self) -> Result<CompiledRoutine, WorkerError> {
        let cache_path = self.config.cache_path();
        let cached = if self.config.single_trial() {
            source::read_cached(cache_path)
                .await
                .map_err(WorkerError::Configuration)?
        } else {
            None
        };
        let from_cache = cached.is_some();

        let routine_source = if let Some(cached) = cached {
            tracing::debug!(path = %cache_path.display(), "Using cached routine source");
            cached
        } else {
            let experiment_id = self.config.identity().experiment_id();
            tracing::info!(experiment_id, "Getting routine source from store");
            self.store
                .fetch_routine_source(experiment_id)
                .await
                .map_err(WorkerError::Store)?
        };

        let routine = RoutineLoader::new()
            .load(&routine_source)
            .map_err(WorkerError::Configuration)?;

        if self.config.single_trial() && !from_cache {
            if let Err(e) = source::write_cache(cache_path, &routine_source).await {
                tracing::warn!(
                    path = %cache_path.display(),
                    error = %e,
                    "Could not cache routine source; next invocation will fetch again"
                );
            }
        }

        Ok(routine)
    }

    async fn execute(&self, routine: &CompiledRoutine, trial: &Trial) -> ExecutionOutcome {
        let routine = routine.clone();
        let argument = trial.to_value();
        let execution = self.executor.run(move || routine.invoke(argument));

        let outcome = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => ExecutionOutcome::FatalSignal(
                compose_diagnostic(trial, "shutdown signal received while the routine was running"),
            ),
            result = execution => match result {
                Ok(Timed { timed_out: true, elapsed, .. }) => ExecutionOutcome::Timeout(elapsed),
                Ok(timed) => {
                    self.log_finished(trial, timed.elapsed);
                    ExecutionOutcome::Success
                }
                Err(ExecutionError::Failed(e)) => ExecutionOutcome::ApplicationFailure(
                    compose_diagnostic(trial, &e.format_trace()),
                ),
                Err(ExecutionError::Panicked(message)) => ExecutionOutcome::FatalSignal(
                    compose_diagnostic(trial, &format!("routine panicked: {message}")),
                ),
                Err(ExecutionError::Spawn(e)) => ExecutionOutcome::FatalSignal(
                    compose_diagnostic(trial, &format!("could not start routine thread: {e}")),
                ),
            },
        };

        if !outcome.is_success() {
            tracing::warn!(
                trial_id = %trial.id(),
                experiment_id = trial.experiment_id(),
                runner_id = self.config.identity().runner_id(),
                outcome = %outcome,
                "Trial failed"
            );
        }
        outcome
    }

    fn log_finished(&self, trial: &Trial, elapsed: std::time::Duration) {
        let elapsed_ms = elapsed.as_millis();
        let method = trial.method();
        if self.config.verbose() {
            tracing::info!(trial_id = %trial.id(), method, elapsed_ms, "Trial succeeded");
        } else {
            tracing::debug!(trial_id = %trial.id(), method, elapsed_ms, "Trial succeeded");
        }
    }
}

/// Single-string diagnostic reported for a failed trial: task identity and
/// shape on the first line, then the failure trace.
#[must_use]
pub fn compose_diagnostic(trial: &Trial, trace: &str) -> String {
    let task = trial.task();
    format!(
        "EXCEPTION: {}, {}, {}, {}, {}, {}, {}\n{}",
        task.origin(),
        task.name(),
        trial.method(),
        trial.meta(),
        task.n_classes(),
        task.n_features(),
        task.n_samples(),
        trace
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deadline::Budget;
    use crate::store::MemoryTrialStore;
    use crate::trial::TaskDescriptor;
    use std::time::Duration;

    fn config() -> WorkerConfig {
        WorkerConfig::builder("exp", "r0")
            .budget(Budget::limited(Duration::from_secs(2)).unwrap())
            .build()
            .unwrap()
    }

    fn store_with(routine: &str, trials: usize) -> MemoryTrialStore {
        let store = MemoryTrialStore::new();
        store.register_routine("exp", routine);
        for _ in 0..trials {
            store.add_trial(
                "exp",
                TaskDescriptor::new("openml", "iris").with_shape(150, 4, 3),
                "ebm",
            );
        }
        store
    }

    #[test]
    fn test_compose_diagnostic_layout() {
        let trial = Trial::builder(
            TrialId(3),
            "exp",
            TaskDescriptor::new("openml", "adult").with_shape(100, 14, 2),
            "xgb",
        )
        .meta(serde_json::json!({"seed": 1}))
        .build();

        let diagnostic = compose_diagnostic(&trial, "Traceback\nRoutineError: boom");
        assert_eq!(
            diagnostic,
            "EXCEPTION: openml, adult, xgb, {\"seed\":1}, 2, 14, 100\nTraceback\nRoutineError: boom"
        );
    }

    #[test]
    fn test_exit_codes() {
        let config = WorkerError::Configuration(Error::Configuration("bad".to_string()));
        assert_eq!(config.exit_code(), EXIT_APPLICATION_ESCAPE);
        let signal = WorkerError::Signal {
            trial_id: None,
            diagnostic: String::new(),
        };
        assert_eq!(signal.exit_code(), EXIT_SIGNAL_ESCAPE);
        assert_eq!(signal.diagnostic(), Some(""));
        assert!(config.diagnostic().is_none());
    }

    #[tokio::test]
    async fn test_run_drains_store() {
        let mut worker = TrialWorker::new(store_with("fn r(t) { return 1; }", 3), config());
        let summary = worker.run().await.unwrap();

        assert_eq!(summary.trials_run, 3);
        assert_eq!(summary.succeeded, 3);
        assert!(!summary.more_work);
        assert_eq!(worker.state(), LoopState::Done);
        assert_eq!(worker.store().claim_calls(), 4);
        assert!(worker.store().reports().iter().all(|(_, m)| m.is_none()));
    }

    #[tokio::test]
    async fn test_routine_loaded_once_across_runs() {
        let mut worker = TrialWorker::new(store_with("fn r(t) { }", 1), config());
        worker.run().await.unwrap();
        let again = worker.run().await.unwrap();

        assert_eq!(again, RunSummary::default());
        assert_eq!(worker.store().fetch_calls(), 1);
        assert!(worker.routine().is_some());
    }

    #[tokio::test]
    async fn test_routine_error_reported_and_loop_continues() {
        let mut worker = TrialWorker::new(
            store_with("fn r(t) { fail(\"bad input for \" + t.method); }", 2),
            config(),
        );
        let summary = worker.run().await.unwrap();

        assert_eq!(summary.failed, 2);
        let reports = worker.store().reports();
        let message = reports[0].1.as_deref().unwrap();
        assert!(message.starts_with("EXCEPTION: openml, iris, ebm, null, 3, 4, 150\n"));
        assert!(message.contains("bad input for ebm"));
    }

    #[tokio::test]
    async fn test_routine_panic_is_reported_then_escapes_as_signal() {
        let routine = r#"fn r(t) { __panic("corrupted state"); }"#;
        let mut worker = TrialWorker::new(store_with(routine, 2), config());
        let err = worker.run().await.unwrap_err();

        let WorkerError::Signal {
            trial_id,
            diagnostic,
        } = &err
        else {
            panic!("expected signal escape, got {err:?}");
        };
        assert_eq!(*trial_id, Some(TrialId(1)));
        assert!(diagnostic.contains("routine panicked"));
        assert!(diagnostic.contains("corrupted state"));
        assert_eq!(err.exit_code(), EXIT_SIGNAL_ESCAPE);

        let reports = worker.store().reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, TrialId(1));
        assert!(reports[0]
            .1
            .as_deref()
            .is_some_and(|m| m.starts_with("EXCEPTION: openml, iris, ebm")));
        assert_eq!(worker.store().pending_count(), 1);
        assert_eq!(worker.state(), LoopState::Done);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_claim() {
        let token = CancellationToken::new();
        token.cancel();
        let mut worker =
            TrialWorker::new(store_with("fn r(t) { }", 1), config()).with_shutdown(token);

        let err = worker.run().await.unwrap_err();
        assert!(matches!(err, WorkerError::Signal { trial_id: None, .. }));
        assert_eq!(worker.store().claim_calls(), 0);
        assert_eq!(worker.store().pending_count(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_on_claim_escapes() {
        let store = store_with("fn r(t) { }", 1);
        let mut worker = TrialWorker::new(store, config());
        worker.run().await.unwrap();

        worker.store().fail_next(1);
        let err = worker.run().await.unwrap_err();
        assert!(matches!(err, WorkerError::Store(_)));
        assert_eq!(err.exit_code(), EXIT_APPLICATION_ESCAPE);
    }

    #[test]
    fn test_loop_state_display() {
        assert_eq!(LoopState::AwaitingTrial.to_string(), "awaiting-trial");
    }
}
