//! Trial Record - store-side lifecycle of a trial

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Trial, TrialId};

/// Status of a trial in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    /// Trial is waiting to be claimed.
    Pending,
    /// Trial is claimed by a runner and executing.
    Running,
    /// Trial was reported without an error message.
    Success,
    /// Trial was reported with an error message.
    Failed,
}

/// Trial Record tracks one trial from creation to its single report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrialRecord {
    trial: Trial,
    status: TrialStatus,
    #[serde(default)]
    claimed_by: Option<String>,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    error_message: Option<String>,
}

impl TrialRecord {
    /// Create a new record in Pending status.
    #[must_use]
    pub const fn new(trial: Trial) -> Self {
        Self {
            trial,
            status: TrialStatus::Pending,
            claimed_by: None,
            started_at: None,
            ended_at: None,
            error_message: None,
        }
    }

    /// Get the trial.
    #[must_use]
    pub const fn trial(&self) -> &Trial {
        &self.trial
    }

    /// Get the trial ID.
    #[must_use]
    pub const fn id(&self) -> TrialId {
        self.trial.id()
    }

    /// Get the current status.
    #[must_use]
    pub const fn status(&self) -> TrialStatus {
        self.status
    }

    /// Get the runner that claimed the trial, if claimed.
    #[must_use]
    pub fn claimed_by(&self) -> Option<&str> {
        self.claimed_by.as_deref()
    }

    /// Get the claim timestamp.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Get the report timestamp.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Get the reported error message (`None` for success or not yet reported).
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Mark the trial claimed by `runner_id`, transitioning Pending to Running.
    pub fn claim(&mut self, runner_id: impl Into<String>) {
        self.status = TrialStatus::Running;
        self.claimed_by = Some(runner_id.into());
        self.started_at = Some(Utc::now());
    }

    /// Record the single report for this trial.
    ///
    /// `None` denotes success.
    pub fn complete(&mut self, error_message: Option<String>) {
        self.status = if error_message.is_some() {
            TrialStatus::Failed
        } else {
            TrialStatus::Success
        };
        self.error_message = error_message;
        self.ended_at = Some(Utc::now());
    }
}
