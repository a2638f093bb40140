//! Trial store: the worker's external collaborator
//!
//! The store owns trials, decides which one a runner gets next, and keeps
//! the routine source per experiment. The worker only ever:
//!
//! - fetches the routine source for its experiment (once per process)
//! - claims the next trial for its experiment/runner identity
//! - reports each claimed trial's outcome exactly once
//!
//! # Example
//!
//! ```rust
//! use trueno_trials::store::{MemoryTrialStore, TrialStore};
//! use trueno_trials::trial::{TaskDescriptor, TrialIdentity};
//!
//! # async fn example() -> trueno_trials::Result<()> {
//! let store = MemoryTrialStore::new();
//! store.register_routine("exp-1", "fn run(t) { return 1; }");
//! let id = store.add_trial("exp-1", TaskDescriptor::new("openml", "iris"), "ebm");
//!
//! let identity = TrialIdentity::new("exp-1", "runner-0");
//! let trial = store.claim_next_trial(&identity).await?.expect("one pending trial");
//! assert_eq!(trial.id(), id);
//!
//! store.report_trial_outcome(trial.id(), None).await?;
//! assert!(store.claim_next_trial(&identity).await?.is_none());
//! # Ok(())
//! # }
//! ```

mod file;
mod memory;
mod retry;

pub use file::JsonFileTrialStore;
pub use memory::MemoryTrialStore;
pub use retry::{RetryPolicy, RetryingStore, DEFAULT_MAX_ATTEMPTS};

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use crate::routine::RoutineSource;
use crate::trial::{Trial, TrialId, TrialIdentity};
use crate::{Error, Result};

/// Store operations consumed by the worker loop.
///
/// Implementations must make `claim_next_trial` atomic: a trial is handed
/// to at most one claimant.
pub trait TrialStore: Send + Sync {
    /// Get the routine source registered for an experiment.
    ///
    /// Fails with [`Error::UnknownExperiment`] when none is registered.
    fn fetch_routine_source(
        &self,
        experiment_id: &str,
    ) -> impl Future<Output = Result<RoutineSource>> + Send;

    /// Atomically claim the next trial for `identity`.
    ///
    /// Returns `None` when no claimable work remains.
    fn claim_next_trial(
        &self,
        identity: &TrialIdentity,
    ) -> impl Future<Output = Result<Option<Trial>>> + Send;

    /// Report the single outcome of a claimed trial. `None` denotes success.
    fn report_trial_outcome(
        &self,
        trial_id: TrialId,
        error_message: Option<String>,
    ) -> impl Future<Output = Result<()>> + Send;
}

impl<S: TrialStore> TrialStore for Arc<S> {
    fn fetch_routine_source(
        &self,
        experiment_id: &str,
    ) -> impl Future<Output = Result<RoutineSource>> + Send {
        (**self).fetch_routine_source(experiment_id)
    }

    fn claim_next_trial(
        &self,
        identity: &TrialIdentity,
    ) -> impl Future<Output = Result<Option<Trial>>> + Send {
        (**self).claim_next_trial(identity)
    }

    fn report_trial_outcome(
        &self,
        trial_id: TrialId,
        error_message: Option<String>,
    ) -> impl Future<Output = Result<()>> + Send {
        (**self).report_trial_outcome(trial_id, error_message)
    }
}

/// Open the store named by a connection string.
///
/// Accepts `file://<path>` or a bare path to a JSON store document.
///
/// # Errors
///
/// Returns [`Error::Configuration`] for an empty string or an unsupported
/// scheme, and IO/JSON errors if the document cannot be read.
pub async fn open_store(connection: &str) -> Result<JsonFileTrialStore> {
    let connection = connection.trim();
    if connection.is_empty() {
        return Err(Error::Configuration(
            "store connection string is empty".to_string(),
        ));
    }

    let path = match connection.split_once("://") {
        Some(("file", path)) => PathBuf::from(path),
        Some((scheme, _)) => {
            return Err(Error::Configuration(format!(
                "unsupported store scheme `{scheme}` (expected file://)"
            )))
        }
        None => PathBuf::from(connection),
    };

    JsonFileTrialStore::open(path).await
}
