//! Wall-clock deadline enforcement for untrusted callables
//!
//! The callable runs on its own named OS thread and hands its result back
//! over a oneshot channel. The caller races that channel against
//! `tokio::time::timeout`; whichever finishes first decides the outcome.
//!
//! ## Abandonment
//!
//! Routines cannot be trusted to honour a cancellation flag, so on expiry
//! the thread is detached rather than stopped. It keeps running (and holding
//! whatever it allocated) until it returns on its own or the process exits.
//! A worker whose routines regularly spin forever will accumulate such
//! threads; the supported mitigation is single-trial mode, where each
//! process runs one trial and exits.
//!
//! Detached threads are plain OS threads, not tokio blocking tasks, so they
//! never hold up runtime shutdown.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::{Error, Result};

/// Wall-clock budget for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    /// Abandon the callable once this much time has elapsed.
    Limited(Duration),
    /// Wait for the callable however long it takes. Must be chosen explicitly.
    Unlimited,
}

impl Budget {
    /// Positive budget.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for a zero duration.
    pub fn limited(duration: Duration) -> Result<Self> {
        if duration.is_zero() {
            return Err(Error::Configuration(
                "execution budget must be positive; use Budget::Unlimited for no deadline"
                    .to_string(),
            ));
        }
        Ok(Self::Limited(duration))
    }

    /// Budget from a seconds value as read from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for zero, negative, or non-finite values.
    pub fn from_secs_f64(secs: f64) -> Result<Self> {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(Error::Configuration(format!(
                "timeout must be a positive number of seconds, got {secs}"
            )));
        }
        Self::limited(Duration::from_secs_f64(secs))
    }

    /// The limit, if any.
    #[must_use]
    pub const fn duration(self) -> Option<Duration> {
        match self {
            Self::Limited(duration) => Some(duration),
            Self::Unlimited => None,
        }
    }
}

impl fmt::Display for Budget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limited(duration) => write!(f, "{duration:?}"),
            Self::Unlimited => f.write_str("unlimited"),
        }
    }
}

/// Outcome of a run that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timed<T> {
    /// The callable's value; `None` when timed out.
    pub result: Option<T>,
    /// Wall-clock time from start until completion or abandonment.
    pub elapsed: Duration,
    /// Whether the budget elapsed first.
    pub timed_out: bool,
}

/// Failure of a run that completed before the deadline.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError<E> {
    /// The callable returned its own error.
    #[error("{0}")]
    Failed(E),

    /// The callable panicked.
    #[error("routine thread panicked: {0}")]
    Panicked(String),

    /// The execution thread could not be started.
    #[error("failed to spawn routine thread: {0}")]
    Spawn(std::io::Error),
}

type Delivery<T, E> = std::result::Result<std::result::Result<T, E>, String>;

/// Runs callables under a wall-clock [`Budget`].
#[derive(Debug, Clone, Copy)]
pub struct DeadlineExecutor {
    budget: Budget,
}

impl DeadlineExecutor {
    /// Create an executor with the given budget.
    #[must_use]
    pub const fn new(budget: Budget) -> Self {
        Self { budget }
    }

    /// Get the budget.
    #[must_use]
    pub const fn budget(&self) -> Budget {
        self.budget
    }

    /// Run `callable` on a dedicated thread, waiting at most the budget.
    ///
    /// - Completed with `Ok(v)`: `Ok(Timed { result: Some(v), timed_out: false, .. })`
    /// - Budget elapsed first: `Ok(Timed { result: None, timed_out: true, .. })`;
    ///   the thread is abandoned
    /// - Completed with `Err(e)`: `Err(ExecutionError::Failed(e))`
    /// - Panicked: `Err(ExecutionError::Panicked(message))`
    ///
    /// # Errors
    ///
    /// See above; the callable's own error is propagated, never swallowed.
    pub async fn run<F, T, E>(
        &self,
        callable: F,
    ) -> std::result::Result<Timed<T>, ExecutionError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<Delivery<T, E>>();
        let started = Instant::now();

        std::thread::Builder::new()
            .name("trial-routine".to_string())
            .spawn(move || {
                let delivery = panic::catch_unwind(AssertUnwindSafe(callable))
                    .map_err(|payload| panic_message(payload.as_ref()));
                // Receiver is gone when the deadline already fired.
                let _ = tx.send(delivery);
            })
            .map_err(ExecutionError::Spawn)?;

        let received = match self.budget {
            Budget::Limited(budget) => match tokio::time::timeout(budget, rx).await {
                Ok(received) => received,
                Err(_) => {
                    let elapsed = started.elapsed();
                    tracing::debug!(
                        elapsed_ms = elapsed.as_millis(),
                        budget_ms = budget.as_millis(),
                        "Deadline elapsed, abandoning routine thread"
                    );
                    return Ok(Timed {
                        result: None,
                        elapsed,
                        timed_out: true,
                    });
                }
            },
            Budget::Unlimited => rx.await,
        };
        let elapsed = started.elapsed();

        match received {
            Ok(Ok(Ok(value))) => Ok(Timed {
                result: Some(value),
                elapsed,
                timed_out: false,
            }),
            Ok(Ok(Err(e))) => Err(ExecutionError::Failed(e)),
            Ok(Err(message)) => Err(ExecutionError::Panicked(message)),
            Err(_) => Err(ExecutionError::Panicked(
                "routine thread exited without a result".to_string(),
            )),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor(millis: u64) -> DeadlineExecutor {
        DeadlineExecutor::new(Budget::limited(Duration::from_millis(millis)).unwrap())
    }

    #[test]
    fn test_zero_budget_rejected() {
        assert!(matches!(
            Budget::limited(Duration::ZERO),
            Err(Error::Configuration(_))
        ));
        assert!(Budget::from_secs_f64(0.0).is_err());
        assert!(Budget::from_secs_f64(-1.0).is_err());
        assert!(Budget::from_secs_f64(f64::NAN).is_err());
        assert_eq!(
            Budget::from_secs_f64(1.5).unwrap().duration(),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(Budget::Unlimited.duration(), None);
    }

    #[tokio::test]
    async fn test_fast_callable_returns_result() {
        let timed = executor(1_000).run(|| Ok::<_, String>(42)).await.unwrap();
        assert_eq!(timed.result, Some(42));
        assert!(!timed.timed_out);
        assert!(timed.elapsed < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_slow_callable_times_out_near_budget() {
        let started = Instant::now();
        let timed = executor(100)
            .run(|| {
                std::thread::sleep(Duration::from_secs(3));
                Ok::<_, String>(())
            })
            .await
            .unwrap();
        assert!(timed.timed_out);
        assert!(timed.result.is_none());
        assert!(timed.elapsed >= Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_runaway_loop_is_abandoned() {
        let timed = executor(50)
            .run(|| {
                let mut n: u64 = 0;
                loop {
                    n = std::hint::black_box(n.wrapping_add(1));
                    if n == 0 {
                        return Ok::<_, String>(n);
                    }
                }
            })
            .await
            .unwrap();
        assert!(timed.timed_out);
    }

    #[tokio::test]
    async fn test_error_propagates() {
        let err = executor(1_000)
            .run(|| Err::<(), _>("boom".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Failed(ref e) if e == "boom"));
    }

    #[tokio::test]
    async fn test_panic_is_captured() {
        let err = executor(1_000)
            .run(|| -> std::result::Result<(), String> { panic!("exploded") })
            .await
            .unwrap_err();
        match err {
            ExecutionError::Panicked(message) => assert_eq!(message, "exploded"),
            other => panic!("expected panic, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unlimited_waits_for_completion() {
        let timed = DeadlineExecutor::new(Budget::Unlimited)
            .run(|| {
                std::thread::sleep(Duration::from_millis(20));
                Ok::<_, String>("done")
            })
            .await
            .unwrap();
        assert_eq!(timed.result, Some("done"));
        assert!(timed.elapsed >= Duration::from_millis(20));
    }
}
