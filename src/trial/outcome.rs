//! Execution Outcome - classification of one trial execution

use std::fmt;
use std::time::Duration;

/// Result of executing the routine against one trial.
///
/// Never persisted beyond the report: the store sees either no error
/// message (success) or the message from [`ExecutionOutcome::error_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Routine returned before the deadline.
    Success,
    /// Routine raised its own error; carries the composed diagnostic.
    ApplicationFailure(String),
    /// Deadline elapsed before the routine returned.
    Timeout(Duration),
    /// Process-level interruption or a panic on the routine thread; carries the diagnostic.
    FatalSignal(String),
}

impl ExecutionOutcome {
    /// Whether the trial succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Message reported to the store (`None` denotes success).
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Success => None,
            Self::Timeout(elapsed) => Some(format!("Timeout failure ({elapsed:.3?})")),
            Self::ApplicationFailure(diagnostic) | Self::FatalSignal(diagnostic) => {
                Some(diagnostic.clone())
            }
        }
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::ApplicationFailure(_) => f.write_str("application failure"),
            Self::Timeout(_) => f.write_str("timeout"),
            Self::FatalSignal(_) => f.write_str("fatal signal"),
        }
    }
}
