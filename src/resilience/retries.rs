//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether an error is retryable (policy predicate)
//! - Execute retries with exponential backoff + jitter
//! - Abort immediately when the call context ends
//!
//! # Design Decisions
//! - Only transient faults are retried by default
//! - Jittered backoff prevents thundering herd
//! - No sleep after the final attempt
//! - The backoff sleep is the only intentional suspension point

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::context::CallContext;
use crate::error::{UpstreamError, UpstreamResult};
use crate::resilience::backoff::calculate_backoff;

/// Predicate deciding whether an error is worth another attempt.
pub type RetryPredicate = Arc<dyn Fn(&UpstreamError) -> bool + Send + Sync>;

/// Immutable retry policy.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_delay: Duration,
    backoff_multiplier: f64,
    max_delay: Duration,
    jitter: bool,
    retryable: RetryPredicate,
}

impl RetryPolicy {
    /// Build a policy with the default retryable predicate.
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        backoff_multiplier: f64,
        max_delay: Duration,
        jitter: bool,
    ) -> UpstreamResult<Self> {
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(UpstreamError::Config(format!(
                "backoff multiplier must be >= 1.0, got {}",
                backoff_multiplier
            )));
        }
        Ok(Self {
            max_retries,
            initial_delay,
            backoff_multiplier,
            max_delay,
            jitter,
            retryable: Arc::new(UpstreamError::is_retryable),
        })
    }

    pub fn from_config(config: &RetryConfig) -> UpstreamResult<Self> {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.initial_delay_ms),
            config.backoff_multiplier,
            Duration::from_millis(config.max_delay_ms),
            config.jitter,
        )
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_delay: Duration::ZERO,
            jitter: false,
            retryable: Arc::new(UpstreamError::is_retryable),
        }
    }

    /// Replace the retryable predicate. `CircuitOpen` is never retried,
    /// whatever the predicate says.
    pub fn with_retryable<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&UpstreamError) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn should_retry(&self, err: &UpstreamError) -> bool {
        !err.is_circuit_open() && !err.is_cancellation() && (self.retryable)(err)
    }

    /// Delay before retry `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            self.initial_delay,
            self.backoff_multiplier,
            self.max_delay,
            self.jitter,
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let config = RetryConfig::default();
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
            retryable: Arc::new(UpstreamError::is_retryable),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

/// Result of a retried call plus what was dispatched on the way.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: UpstreamResult<T>,
    /// Attempts started.
    pub attempts: u32,
    /// Attempts that completed with an error.
    pub failures: u32,
}

/// Runs a fallible operation under a `RetryPolicy`.
#[derive(Debug, Clone, Default)]
pub struct Retryer {
    policy: RetryPolicy,
}

impl Retryer {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `f` up to `max_retries + 1` times.
    pub async fn execute<T, F, Fut>(&self, ctx: &CallContext, f: F) -> UpstreamResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = UpstreamResult<T>>,
    {
        self.execute_counted(ctx, f).await.result
    }

    /// Like `execute`, also reporting how many attempts were made.
    pub async fn execute_counted<T, F, Fut>(&self, ctx: &CallContext, mut f: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = UpstreamResult<T>>,
    {
        let mut attempts = 0;
        let mut failures = 0;

        loop {
            if let Some(err) = ctx.err() {
                return RetryOutcome { result: Err(err), attempts, failures };
            }

            attempts += 1;
            let result = tokio::select! {
                biased;
                reason = ctx.done() => {
                    return RetryOutcome { result: Err(reason), attempts, failures };
                }
                result = f() => result,
            };

            let err = match result {
                Ok(value) => return RetryOutcome { result: Ok(value), attempts, failures },
                Err(err) => err,
            };
            failures += 1;

            let retry_index = attempts - 1;
            if retry_index >= self.policy.max_retries || !self.policy.should_retry(&err) {
                if retry_index >= self.policy.max_retries && self.policy.max_retries > 0 {
                    tracing::debug!(attempts, error = %err, "Retries exhausted");
                }
                return RetryOutcome { result: Err(err), attempts, failures };
            }

            let delay = self.policy.delay_for(retry_index);
            tracing::debug!(attempt = attempts, delay = ?delay, error = %err, "Retrying after failure");

            tokio::select! {
                reason = ctx.done() => {
                    return RetryOutcome { result: Err(reason), attempts, failures };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
