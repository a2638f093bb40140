//! Worker configuration
//!
//! Everything a [`TrialWorker`](crate::worker::TrialWorker) needs besides
//! its store. Built through [`WorkerConfigBuilder`], which validates on
//! `build()` so a worker never starts with an unusable configuration.

use std::path::{Path, PathBuf};

use crate::deadline::Budget;
use crate::trial::TrialIdentity;
use crate::{Error, Result};

/// Local file the routine source is cached in for single-trial mode.
pub const DEFAULT_CACHE_PATH: &str = "trial_routine.rtn";

/// Validated worker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    identity: TrialIdentity,
    budget: Budget,
    raise_on_error: bool,
    verbose: bool,
    single_trial: bool,
    cache_path: PathBuf,
}

impl WorkerConfig {
    /// Create a builder with the required identity fields.
    #[must_use]
    pub fn builder(
        experiment_id: impl Into<String>,
        runner_id: impl Into<String>,
    ) -> WorkerConfigBuilder {
        WorkerConfigBuilder::new(experiment_id, runner_id)
    }

    /// Experiment/runner identity trials are claimed under.
    #[must_use]
    pub const fn identity(&self) -> &TrialIdentity {
        &self.identity
    }

    /// Per-trial wall-clock budget.
    #[must_use]
    pub const fn budget(&self) -> Budget {
        self.budget
    }

    /// Whether routine failures stop the worker after being reported.
    #[must_use]
    pub const fn raise_on_error(&self) -> bool {
        self.raise_on_error
    }

    /// Whether per-trial progress is logged at info level.
    #[must_use]
    pub const fn verbose(&self) -> bool {
        self.verbose
    }

    /// Whether the worker returns after its first report.
    #[must_use]
    pub const fn single_trial(&self) -> bool {
        self.single_trial
    }

    /// Routine source cache file (used only in single-trial mode).
    #[must_use]
    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }
}

/// Builder for `WorkerConfig`.
#[derive(Debug)]
pub struct WorkerConfigBuilder {
    experiment_id: String,
    runner_id: String,
    budget: Option<Budget>,
    raise_on_error: bool,
    verbose: bool,
    single_trial: bool,
    cache_path: PathBuf,
}

impl WorkerConfigBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(experiment_id: impl Into<String>, runner_id: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            runner_id: runner_id.into(),
            budget: None,
            raise_on_error: false,
            verbose: false,
            single_trial: false,
            cache_path: PathBuf::from(DEFAULT_CACHE_PATH),
        }
    }

    /// Set the per-trial budget. Required; there is no implicit default.
    #[must_use]
    pub const fn budget(mut self, budget: Budget) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Stop the worker after reporting a routine failure.
    #[must_use]
    pub const fn raise_on_error(mut self, enabled: bool) -> Self {
        self.raise_on_error = enabled;
        self
    }

    /// Log per-trial progress at info level.
    #[must_use]
    pub const fn verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }

    /// Return after the first report and cache the routine source locally.
    #[must_use]
    pub const fn single_trial(mut self, enabled: bool) -> Self {
        self.single_trial = enabled;
        self
    }

    /// Override the routine source cache file.
    #[must_use]
    pub fn cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = path.into();
        self
    }

    /// Validate and build the `WorkerConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if an identifier is blank, no budget
    /// was set, or the budget is a zero duration.
    pub fn build(self) -> Result<WorkerConfig> {
        if self.experiment_id.trim().is_empty() {
            return Err(Error::Configuration("experiment id is empty".to_string()));
        }
        if self.runner_id.trim().is_empty() {
            return Err(Error::Configuration("runner id is empty".to_string()));
        }

        let budget = match self.budget {
            None => {
                return Err(Error::Configuration(
                    "no execution budget set; pass a timeout or opt out explicitly".to_string(),
                ))
            }
            Some(Budget::Limited(duration)) => Budget::limited(duration)?,
            Some(Budget::Unlimited) => Budget::Unlimited,
        };

        if self.single_trial && self.cache_path.as_os_str().is_empty() {
            return Err(Error::Configuration(
                "single-trial mode needs a cache path".to_string(),
            ));
        }

        Ok(WorkerConfig {
            identity: TrialIdentity::new(self.experiment_id, self.runner_id),
            budget,
            raise_on_error: self.raise_on_error,
            verbose: self.verbose,
            single_trial: self.single_trial,
            cache_path: self.cache_path,
        })
    }
}
