//! Retry wrapper for store round-trips.
//!
//! Only transient store errors ([`Error::is_transient`]) are retried.
//! Trials themselves are never retried; a failed trial is reported once.

use std::future::Future;
use std::time::Duration;

use super::TrialStore;
use crate::routine::RoutineSource;
use crate::trial::{Trial, TrialId, TrialIdentity};
use crate::{Error, Result};

/// Attempts allowed per store call unless configured otherwise.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// How often and how patiently to retry a store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    /// Policy allowing `max_attempts` tries with doubling backoff.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `max_attempts` is zero.
    pub fn new(max_attempts: u32) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Error::Configuration(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            ..Self::default()
        })
    }

    /// Set the first backoff delay and the cap the doubling stops at.
    #[must_use]
    pub const fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Attempts per call.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

/// Store wrapper that retries transient failures of the inner store.
#[derive(Debug)]
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: TrialStore> RetryingStore<S> {
    /// Wrap `inner` with `policy`.
    #[must_use]
    pub const fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Get the wrapped store.
    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    /// Get the policy.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    async fn retry<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Store call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

impl<S: TrialStore> TrialStore for RetryingStore<S> {
    async fn fetch_routine_source(&self, experiment_id: &str) -> Result<RoutineSource> {
        self.retry("fetch_routine_source", || {
            self.inner.fetch_routine_source(experiment_id)
        })
        .await
    }

    async fn claim_next_trial(&self, identity: &TrialIdentity) -> Result<Option<Trial>> {
        self.retry("claim_next_trial", || self.inner.claim_next_trial(identity))
            .await
    }

    async fn report_trial_outcome(
        &self,
        trial_id: TrialId,
        error_message: Option<String>,
    ) -> Result<()> {
        self.retry("report_trial_outcome", || {
            self.inner
                .report_trial_outcome(trial_id, error_message.clone())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTrialStore;
    use crate::trial::TaskDescriptor;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts)
            .unwrap()
            .with_backoff(Duration::from_millis(1), Duration::from_millis(2))
    }

    #[test]
    fn test_zero_attempts_rejected() {
        assert!(matches!(RetryPolicy::new(0), Err(Error::Configuration(_))));
        assert_eq!(RetryPolicy::default().max_attempts(), DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let policy = RetryPolicy::default()
            .with_backoff(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let memory = MemoryTrialStore::new();
        memory.add_trial("exp", TaskDescriptor::new("openml", "iris"), "ebm");
        memory.fail_next(3);
        let store = RetryingStore::new(memory, fast(5));

        let claimed = store
            .claim_next_trial(&TrialIdentity::new("exp", "r0"))
            .await
            .unwrap();
        assert!(claimed.is_some());
        assert_eq!(store.inner().claim_calls(), 4);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let memory = MemoryTrialStore::new();
        memory.register_routine("exp", "fn a(t) { }");
        memory.fail_next(10);
        let store = RetryingStore::new(memory, fast(3));

        let err = store.fetch_routine_source("exp").await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert_eq!(store.inner().fetch_calls(), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_not_retried() {
        let store = RetryingStore::new(MemoryTrialStore::new(), fast(5));
        let err = store.fetch_routine_source("missing").await.unwrap_err();
        assert!(matches!(err, Error::UnknownExperiment(_)));
        assert_eq!(store.inner().fetch_calls(), 1);
    }
}
