//! Trial store backed by a JSON document on disk.
//!
//! Document layout:
//!
//! ```text
//! {
//!   "experiments": { "<experiment id>": { "routine": "<source>" } },
//!   "trials": [ <TrialRecord>, ... ]
//! }
//! ```
//!
//! Every operation reloads the document, applies its change and writes it
//! back through a temp file + rename, all under one async mutex. That makes
//! claims atomic within a process only; workers in separate processes need
//! a real coordinating store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::TrialStore;
use crate::routine::RoutineSource;
use crate::trial::{Trial, TrialId, TrialIdentity, TrialRecord, TrialStatus};
use crate::{Error, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    experiments: BTreeMap<String, ExperimentEntry>,
    #[serde(default)]
    trials: Vec<TrialRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExperimentEntry {
    routine: RoutineSource,
}

/// File-backed trial store.
#[derive(Debug)]
pub struct JsonFileTrialStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl JsonFileTrialStore {
    /// Open an existing store document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and [`Error::Json`]
    /// if it is not a store document.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            path: path.into(),
            guard: Mutex::new(()),
        };
        let document = store.load().await?;
        tracing::debug!(
            path = %store.path.display(),
            experiments = document.experiments.len(),
            trials = document.trials.len(),
            "Opened file trial store"
        );
        Ok(store)
    }

    /// Create an empty store document, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be written.
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            path: path.into(),
            guard: Mutex::new(()),
        };
        store.save(&StoreDocument::default()).await?;
        Ok(store)
    }

    /// Path of the backing document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register (or replace) the routine source for an experiment.
    ///
    /// # Errors
    ///
    /// Returns IO/JSON errors from reading or writing the document.
    pub async fn register_routine(
        &self,
        experiment_id: &str,
        source: impl Into<RoutineSource>,
    ) -> Result<()> {
        let routine = source.into();
        self.update(|document| {
            document
                .experiments
                .insert(experiment_id.to_string(), ExperimentEntry { routine });
            Ok(())
        })
        .await
    }

    /// Append a pending trial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the ID is already taken, or
    /// IO/JSON errors from the document.
    pub async fn add_trial(&self, trial: Trial) -> Result<()> {
        self.update(|document| {
            if document.trials.iter().any(|r| r.id() == trial.id()) {
                return Err(Error::Configuration(format!(
                    "trial {} already exists",
                    trial.id()
                )));
            }
            document.trials.push(TrialRecord::new(trial));
            Ok(())
        })
        .await
    }

    /// Snapshot of every trial record.
    ///
    /// # Errors
    ///
    /// Returns IO/JSON errors from reading the document.
    pub async fn records(&self) -> Result<Vec<TrialRecord>> {
        let _guard = self.guard.lock().await;
        Ok(self.load().await?.trials)
    }

    async fn load(&self) -> Result<StoreDocument> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn save(&self, document: &StoreDocument) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(document)?;
        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        Ok(())
    }

    async fn update<T>(
        &self,
        change: impl FnOnce(&mut StoreDocument) -> Result<T> + Send,
    ) -> Result<T> {
        let _guard = self.guard.lock().await;
        let mut document = self.load().await?;
        let value = change(&mut document)?;
        self.save(&document).await?;
        Ok(value)
    }
}

impl TrialStore for JsonFileTrialStore {
    async fn fetch_routine_source(&self, experiment_id: &str) -> Result<RoutineSource> {
        let _guard = self.guard.lock().await;
        let mut document = self.load().await?;
        document
            .experiments
            .remove(experiment_id)
            .map(|entry| entry.routine)
            .ok_or_else(|| Error::UnknownExperiment(experiment_id.to_string()))
    }

    async fn claim_next_trial(&self, identity: &TrialIdentity) -> Result<Option<Trial>> {
        self.update(|document| {
            let next = document.trials.iter_mut().find(|record| {
                record.status() == TrialStatus::Pending
                    && record.trial().claimable_by(identity)
            });
            Ok(next.map(|record| {
                record.claim(identity.runner_id());
                record.trial().clone()
            }))
        })
        .await
    }

    async fn report_trial_outcome(
        &self,
        trial_id: TrialId,
        error_message: Option<String>,
    ) -> Result<()> {
        self.update(|document| {
            let record = document
                .trials
                .iter_mut()
                .find(|record| record.id() == trial_id)
                .ok_or(Error::UnknownTrial(trial_id.0))?;
            if record.status() != TrialStatus::Running {
                return Err(Error::NotRunning(trial_id.0));
            }
            record.complete(error_message);
            Ok(())
        })
        .await
    }
}
