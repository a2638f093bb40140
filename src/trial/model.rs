//! Trial model - one unit of benchmarking work handed out by the store

use std::fmt;

use serde::{Deserialize, Serialize};

/// Store-assigned trial identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrialId(pub u64);

impl fmt::Display for TrialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Experiment/runner pair a worker claims trials under.
///
/// Immutable for the lifetime of a worker process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrialIdentity {
    experiment_id: String,
    runner_id: String,
}

impl TrialIdentity {
    /// Create a new identity.
    #[must_use]
    pub fn new(experiment_id: impl Into<String>, runner_id: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            runner_id: runner_id.into(),
        }
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the runner ID.
    #[must_use]
    pub fn runner_id(&self) -> &str {
        &self.runner_id
    }
}

/// Dataset/task a trial benchmarks against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    origin: String,
    name: String,
    #[serde(default)]
    n_features: u64,
    #[serde(default)]
    n_samples: u64,
    #[serde(default)]
    n_classes: u64,
}

impl TaskDescriptor {
    /// Create a task descriptor with an empty shape.
    #[must_use]
    pub fn new(origin: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            name: name.into(),
            n_features: 0,
            n_samples: 0,
            n_classes: 0,
        }
    }

    /// Set the task shape.
    ///
    /// `n_classes` is 0 for regression tasks.
    #[must_use]
    pub const fn with_shape(mut self, n_samples: u64, n_features: u64, n_classes: u64) -> Self {
        self.n_samples = n_samples;
        self.n_features = n_features;
        self.n_classes = n_classes;
        self
    }

    /// Get the task origin (e.g. the dataset suite).
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Get the task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the feature count.
    #[must_use]
    pub const fn n_features(&self) -> u64 {
        self.n_features
    }

    /// Get the sample count.
    #[must_use]
    pub const fn n_samples(&self) -> u64 {
        self.n_samples
    }

    /// Get the class count.
    #[must_use]
    pub const fn n_classes(&self) -> u64 {
        self.n_classes
    }
}

/// A unit of work returned by the store.
///
/// The worker holds a read-only view for the duration of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    id: TrialId,
    experiment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    runner_id: Option<String>,
    task: TaskDescriptor,
    method: String,
    #[serde(default)]
    meta: serde_json::Value,
}

impl Trial {
    /// Create a trial with no metadata that any runner may claim.
    #[must_use]
    pub fn new(
        id: TrialId,
        experiment_id: impl Into<String>,
        task: TaskDescriptor,
        method: impl Into<String>,
    ) -> Self {
        Self {
            id,
            experiment_id: experiment_id.into(),
            runner_id: None,
            task,
            method: method.into(),
            meta: serde_json::Value::Null,
        }
    }

    /// Create a builder for constructing a trial with optional fields.
    #[must_use]
    pub fn builder(
        id: TrialId,
        experiment_id: impl Into<String>,
        task: TaskDescriptor,
        method: impl Into<String>,
    ) -> TrialBuilder {
        TrialBuilder {
            trial: Self::new(id, experiment_id, task, method),
        }
    }

    /// Get the trial ID.
    #[must_use]
    pub const fn id(&self) -> TrialId {
        self.id
    }

    /// Get the owning experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the runner this trial is pinned to, if any.
    #[must_use]
    pub fn runner_id(&self) -> Option<&str> {
        self.runner_id.as_deref()
    }

    /// Get the task descriptor.
    #[must_use]
    pub const fn task(&self) -> &TaskDescriptor {
        &self.task
    }

    /// Get the method name.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Get the free-form metadata.
    #[must_use]
    pub const fn meta(&self) -> &serde_json::Value {
        &self.meta
    }

    /// Whether a worker with `identity` may claim this trial.
    #[must_use]
    pub fn claimable_by(&self, identity: &TrialIdentity) -> bool {
        self.experiment_id == identity.experiment_id()
            && self
                .runner_id
                .as_deref()
                .map_or(true, |runner| runner == identity.runner_id())
    }

    /// JSON view passed to the routine as its single argument.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id.0,
            "experiment_id": self.experiment_id,
            "task": {
                "origin": self.task.origin,
                "name": self.task.name,
                "n_features": self.task.n_features,
                "n_samples": self.task.n_samples,
                "n_classes": self.task.n_classes,
            },
            "method": self.method,
            "meta": self.meta,
        })
    }
}

/// Builder for `Trial`.
#[derive(Debug)]
pub struct TrialBuilder {
    trial: Trial,
}

impl TrialBuilder {
    /// Pin the trial to a single runner.
    #[must_use]
    pub fn runner(mut self, runner_id: impl Into<String>) -> Self {
        self.trial.runner_id = Some(runner_id.into());
        self
    }

    /// Set the free-form metadata.
    #[must_use]
    pub fn meta(mut self, meta: serde_json::Value) -> Self {
        self.trial.meta = meta;
        self
    }

    /// Build the `Trial`.
    #[must_use]
    pub fn build(self) -> Trial {
        self.trial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iris() -> TaskDescriptor {
        TaskDescriptor::new("openml", "iris").with_shape(150, 4, 3)
    }

    #[test]
    fn test_trial_view_exposes_task_shape() {
        let trial = Trial::builder(TrialId(7), "exp-1", iris(), "ebm")
            .meta(serde_json::json!({"seed": 3}))
            .build();

        let view = trial.to_value();
        assert_eq!(view["id"], 7);
        assert_eq!(view["task"]["n_samples"], 150);
        assert_eq!(view["task"]["n_classes"], 3);
        assert_eq!(view["meta"]["seed"], 3);
    }

    #[test]
    fn test_claimable_by_respects_pinning() {
        let open = Trial::new(TrialId(1), "exp-1", iris(), "ebm");
        let pinned = Trial::builder(TrialId(2), "exp-1", iris(), "ebm")
            .runner("runner-a")
            .build();

        let a = TrialIdentity::new("exp-1", "runner-a");
        let b = TrialIdentity::new("exp-1", "runner-b");
        let other = TrialIdentity::new("exp-2", "runner-a");

        assert!(open.claimable_by(&a));
        assert!(open.claimable_by(&b));
        assert!(pinned.claimable_by(&a));
        assert!(!pinned.claimable_by(&b));
        assert!(!open.claimable_by(&other));
    }

    #[test]
    fn test_trial_deserializes_without_optional_fields() {
        let json = r#"{
            "id": 4,
            "experiment_id": "exp-1",
            "task": {"origin": "openml", "name": "adult"},
            "method": "xgb"
        }"#;
        let trial: Trial = serde_json::from_str(json).expect("deserialization failed");
        assert_eq!(trial.id(), TrialId(4));
        assert_eq!(trial.task().n_features(), 0);
        assert!(trial.meta().is_null());
        assert!(trial.runner_id().is_none());
    }
}
