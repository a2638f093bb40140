//! In-memory trial store using `DashMap`.
//!
//! Data is lost on process restart. Records every store round-trip so tests
//! can check the claim/report protocol, and can inject transient failures.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::TrialStore;
use crate::routine::RoutineSource;
use crate::trial::{TaskDescriptor, Trial, TrialId, TrialIdentity, TrialRecord, TrialStatus};
use crate::{Error, Result};

/// In-process trial store.
///
/// Claims are serialized through one queue lock, so a trial is never handed
/// out twice even with many concurrent workers.
///
/// # Example
///
/// ```rust
/// use trueno_trials::store::{MemoryTrialStore, TrialStore};
/// use trueno_trials::trial::{TaskDescriptor, TrialIdentity};
///
/// # async fn example() -> trueno_trials::Result<()> {
/// let store = MemoryTrialStore::new();
/// store.add_trial("exp", TaskDescriptor::new("openml", "adult"), "xgb");
///
/// let claimed = store.claim_next_trial(&TrialIdentity::new("exp", "r0")).await?;
/// assert!(claimed.is_some());
/// assert_eq!(store.pending_count(), 0);
/// # Ok(())
/// # }
/// ```
pub struct MemoryTrialStore {
    routines: DashMap<String, RoutineSource>,
    records: DashMap<TrialId, TrialRecord>,
    pending: Mutex<VecDeque<TrialId>>,
    next_id: AtomicU64,
    fetch_calls: AtomicUsize,
    claim_calls: AtomicUsize,
    reports: Mutex<Vec<(TrialId, Option<String>)>>,
    injected_failures: AtomicUsize,
}

impl MemoryTrialStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            routines: DashMap::new(),
            records: DashMap::new(),
            pending: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            fetch_calls: AtomicUsize::new(0),
            claim_calls: AtomicUsize::new(0),
            reports: Mutex::new(Vec::new()),
            injected_failures: AtomicUsize::new(0),
        }
    }

    /// Register (or replace) the routine source for an experiment.
    pub fn register_routine(&self, experiment_id: &str, source: impl Into<RoutineSource>) {
        self.routines
            .insert(experiment_id.to_string(), source.into());
    }

    /// Queue a trial with a fresh ID that any runner may claim.
    pub fn add_trial(
        &self,
        experiment_id: &str,
        task: TaskDescriptor,
        method: &str,
    ) -> TrialId {
        loop {
            let id = self.allocate_id();
            // Only collides with an explicit `insert` racing ahead of us.
            if self
                .insert(Trial::new(id, experiment_id, task.clone(), method))
                .is_ok()
            {
                return id;
            }
        }
    }

    /// Queue a prebuilt trial, keeping its ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the ID is already taken.
    pub fn insert(&self, trial: Trial) -> Result<()> {
        let id = trial.id();
        self.next_id.fetch_max(id.0 + 1, Ordering::Relaxed);
        match self.records.entry(id) {
            Entry::Occupied(_) => {
                return Err(Error::Configuration(format!("trial {id} already exists")));
            }
            Entry::Vacant(slot) => {
                slot.insert(TrialRecord::new(trial));
            }
        }
        lock(&self.pending).push_back(id);
        Ok(())
    }

    /// Allocate an unused trial ID (for building trials with [`Trial::builder`]).
    pub fn allocate_id(&self) -> TrialId {
        TrialId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Make the next `count` store calls fail with a transient [`Error::Store`].
    pub fn fail_next(&self, count: usize) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    /// Snapshot of a trial's record.
    #[must_use]
    pub fn record(&self, id: TrialId) -> Option<TrialRecord> {
        self.records.get(&id).map(|r| r.value().clone())
    }

    /// Number of trials not yet claimed.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Number of `fetch_routine_source` calls received.
    #[must_use]
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Number of `claim_next_trial` calls received.
    #[must_use]
    pub fn claim_calls(&self) -> usize {
        self.claim_calls.load(Ordering::SeqCst)
    }

    /// Every accepted report, in arrival order.
    #[must_use]
    pub fn reports(&self) -> Vec<(TrialId, Option<String>)> {
        lock(&self.reports).clone()
    }

    fn take_injected_failure(&self) -> Result<()> {
        let consumed = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(Error::Store("injected transient failure".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryTrialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TrialStore for MemoryTrialStore {
    async fn fetch_routine_source(&self, experiment_id: &str) -> Result<RoutineSource> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.take_injected_failure()?;
        self.routines
            .get(experiment_id)
            .map(|source| source.value().clone())
            .ok_or_else(|| Error::UnknownExperiment(experiment_id.to_string()))
    }

    async fn claim_next_trial(&self, identity: &TrialIdentity) -> Result<Option<Trial>> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        self.take_injected_failure()?;

        let mut pending = lock(&self.pending);
        let position = pending.iter().position(|id| {
            self.records
                .get(id)
                .is_some_and(|record| record.trial().claimable_by(identity))
        });
        let Some(id) = position.and_then(|index| pending.remove(index)) else {
            return Ok(None);
        };

        let mut record = self.records.get_mut(&id).ok_or(Error::UnknownTrial(id.0))?;
        record.claim(identity.runner_id());
        Ok(Some(record.trial().clone()))
    }

    async fn report_trial_outcome(
        &self,
        trial_id: TrialId,
        error_message: Option<String>,
    ) -> Result<()> {
        self.take_injected_failure()?;

        let mut record = self
            .records
            .get_mut(&trial_id)
            .ok_or(Error::UnknownTrial(trial_id.0))?;
        if record.status() != TrialStatus::Running {
            return Err(Error::NotRunning(trial_id.0));
        }
        record.complete(error_message.clone());
        drop(record);

        lock(&self.reports).push((trial_id, error_message));
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
