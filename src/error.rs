//! Error types for Trueno-Trials
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Trueno-Trials error types
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid worker configuration or routine source (fatal, raised before any claim)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Store round-trip failed (claim, report, or routine fetch)
    #[error("Store error: {0}")]
    Store(String),

    /// Experiment has no registered routine
    #[error("Unknown experiment: {0}\nRegister a routine for it before starting workers.")]
    UnknownExperiment(String),

    /// Report for a trial the store never handed out
    #[error("Unknown trial: {0}")]
    UnknownTrial(u64),

    /// Second report for a trial that is not running
    #[error("Trial {0} is not running; each claimed trial is reported exactly once")]
    NotRunning(u64),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether a store wrapper may retry the failed round-trip.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Io(_))
    }
}
