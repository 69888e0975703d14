//! Circuit breaker for instance protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: instance assumed down, calls fail fast
//! - Half-Open: testing if instance recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= max_failures
//! Open → Half-Open: first call after the open timeout
//! Half-Open → Closed: probe call succeeds
//! Half-Open → Open: probe call fails
//! ```
//!
//! # Design Decisions
//! - Per-instance circuit breaker (not global)
//! - Fail fast in Open state (no waiting for timeout)
//! - Single probe in Half-Open; concurrent callers get `CircuitOpen`
//! - The lock covers bookkeeping only, never the guarded call

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use serde::Serialize;

use crate::config::CircuitBreakerConfig;
use crate::context::CallContext;
use crate::error::{UpstreamError, UpstreamResult};
use crate::observability::metrics;
use crate::resilience::notifier::{StateChangeCallback, StateNotifier, StateTransition};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

/// Construction parameters for a breaker.
#[derive(Clone)]
pub struct CircuitBreakerOptions {
    /// Consecutive failures before Closed → Open.
    pub max_failures: u32,
    /// Time in Open before a probe is allowed.
    pub timeout: Duration,
    /// Capacity of the notification queue.
    pub notification_queue: usize,
    /// Optional transition observer.
    pub on_state_change: Option<StateChangeCallback>,
}

impl CircuitBreakerOptions {
    pub fn with_state_change(mut self, callback: StateChangeCallback) -> Self {
        self.on_state_change = Some(callback);
        self
    }
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self::from(&CircuitBreakerConfig::default())
    }
}

impl From<&CircuitBreakerConfig> for CircuitBreakerOptions {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            max_failures: config.max_failures.max(1),
            timeout: config.timeout(),
            notification_queue: config.notification_queue,
            on_state_change: None,
        }
    }
}

impl fmt::Debug for CircuitBreakerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerOptions")
            .field("max_failures", &self.max_failures)
            .field("timeout", &self.timeout)
            .field("notification_queue", &self.notification_queue)
            .field("on_state_change", &self.on_state_change.is_some())
            .finish()
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

impl BreakerInner {
    fn set_state(&mut self, to: CircuitState) -> Option<(CircuitState, CircuitState)> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        Some((from, to))
    }

    fn cooled_down(&self, timeout: Duration) -> bool {
        self.last_failure.map_or(true, |at| at.elapsed() >= timeout)
    }
}

/// Per-instance circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    instance: String,
    max_failures: u32,
    timeout: Duration,
    inner: Mutex<BreakerInner>,
    notifier: Option<StateNotifier>,
}

impl CircuitBreaker {
    /// Create a closed breaker for the named instance.
    ///
    /// When a callback is configured and a Tokio runtime is present, a
    /// dispatcher task is spawned to deliver transitions.
    pub fn new(instance: impl Into<String>, options: CircuitBreakerOptions) -> Self {
        let notifier = options
            .on_state_change
            .map(|callback| StateNotifier::new(callback, options.notification_queue));
        Self {
            instance: instance.into(),
            max_failures: options.max_failures.max(1),
            timeout: options.timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
            notifier,
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
        }
    }

    /// Whether a call would currently be admitted, without changing state.
    pub fn admits_calls(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => inner.cooled_down(self.timeout),
            CircuitState::HalfOpen => !inner.probe_in_flight,
        }
    }

    /// Run `f` under the breaker.
    ///
    /// Returns `CircuitOpen` without calling `f` when the breaker rejects the
    /// call. Otherwise `f`'s result is returned unchanged after being recorded
    /// as one success or failure. Cancellations and nested `CircuitOpen`
    /// errors are not recorded.
    pub async fn execute<T, F, Fut>(&self, ctx: &CallContext, f: F) -> UpstreamResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = UpstreamResult<T>>,
    {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        let permit = self.try_acquire()?;
        let result = f().await;
        match &result {
            Ok(_) => permit.success(),
            Err(e) if e.is_cancellation() || e.is_circuit_open() => permit.release(),
            Err(_) => permit.failure(),
        }
        result
    }

    /// Ask for permission to dispatch one call.
    ///
    /// The returned permit must be settled with `success` or `failure`;
    /// dropping it unsettled records nothing.
    pub fn try_acquire(&self) -> UpstreamResult<BreakerPermit<'_>> {
        let mut inner = self.lock();
        let (probe, change) = match inner.state {
            CircuitState::Closed => (Some(false), None),
            CircuitState::Open => {
                if inner.cooled_down(self.timeout) {
                    inner.probe_in_flight = true;
                    (Some(true), inner.set_state(CircuitState::HalfOpen))
                } else {
                    (None, None)
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    (None, None)
                } else {
                    inner.probe_in_flight = true;
                    (Some(true), None)
                }
            }
        };
        self.commit(inner, change);

        match probe {
            Some(probe) => Ok(BreakerPermit {
                breaker: self,
                probe,
                settled: false,
            }),
            None => {
                tracing::debug!(instance = %self.instance, "Circuit open, rejecting call");
                Err(UpstreamError::CircuitOpen {
                    instance: self.instance.clone(),
                })
            }
        }
    }

    /// Force Closed and zero the counters.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure = None;
        inner.probe_in_flight = false;
        let change = inner.set_state(CircuitState::Closed);
        self.commit(inner, change);
    }

    fn on_success(&self, probe: bool) {
        let mut inner = self.lock();
        let change = match inner.state {
            CircuitState::HalfOpen if probe => {
                inner.failure_count = 0;
                inner.success_count = 0;
                inner.last_failure = None;
                inner.probe_in_flight = false;
                inner.set_state(CircuitState::Closed)
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.success_count = inner.success_count.saturating_add(1);
                None
            }
            // Result of a call admitted before the last trip.
            _ => None,
        };
        self.commit(inner, change);
    }

    fn on_failure(&self, probe: bool) {
        let mut inner = self.lock();
        let change = match inner.state {
            CircuitState::Closed => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                inner.success_count = 0;
                if inner.failure_count >= self.max_failures {
                    inner.last_failure = Some(Instant::now());
                    inner.set_state(CircuitState::Open)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen if probe => {
                inner.probe_in_flight = false;
                inner.last_failure = Some(Instant::now());
                inner.set_state(CircuitState::Open)
            }
            _ => None,
        };
        self.commit(inner, change);
    }

    fn on_release(&self, probe: bool) {
        if !probe {
            return;
        }
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    /// Queue the transition while `inner` is still held, then release the
    /// lock before logging and any inline callback.
    fn commit(&self, inner: MutexGuard<'_, BreakerInner>, change: Option<(CircuitState, CircuitState)>) {
        let Some((from, to)) = change else {
            return;
        };
        let inline = self.notifier.as_ref().and_then(|notifier| {
            notifier.enqueue(StateTransition {
                instance: self.instance.clone(),
                from,
                to,
            })
        });
        drop(inner);

        match to {
            CircuitState::Open => tracing::warn!(
                instance = %self.instance,
                from = %from,
                to = %to,
                "Circuit breaker opened"
            ),
            _ => tracing::info!(
                instance = %self.instance,
                from = %from,
                to = %to,
                "Circuit breaker state changed"
            ),
        }
        metrics::record_breaker_transition(&self.instance, to);

        if let (Some(notifier), Some(transition)) = (&self.notifier, inline) {
            notifier.deliver_inline(&transition);
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Permission to dispatch one call through a breaker.
#[derive(Debug)]
#[must_use = "an unsettled permit records nothing"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    /// Whether this permit is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe);
    }

    /// Give the permit back without recording an outcome.
    pub fn release(self) {}
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_release(self.probe);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn breaker(max_failures: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "b1",
            CircuitBreakerOptions {
                max_failures,
                timeout,
                ..CircuitBreakerOptions::default()
            },
        )
    }

    async fn fail(cb: &CircuitBreaker) -> UpstreamResult<()> {
        cb.execute(&CallContext::new(), || async { Err(UpstreamError::transient("boom")) })
            .await
    }

    async fn succeed(cb: &CircuitBreaker) -> UpstreamResult<()> {
        cb.execute(&CallContext::new(), || async { Ok(()) }).await
    }

    #[tokio::test]
    async fn test_initial_state_is_closed() {
        let cb = breaker(3, Duration::from_secs(1));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.admits_calls());
    }

    #[tokio::test]
    async fn test_trips_after_max_failures() {
        let cb = breaker(2, Duration::from_secs(10));
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let res = cb
                .execute(&CallContext::new(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(UpstreamError::transient("boom"))
                })
                .await;
            assert_eq!(res, Err(UpstreamError::transient("boom")));
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let res = cb
            .execute(&CallContext::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert_eq!(res, Err(UpstreamError::CircuitOpen { instance: "b1".into() }));
        assert_eq!(calls.load(Ordering::SeqCst), 2, "open breaker must not invoke fn");
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = breaker(2, Duration::from_secs(10));
        fail(&cb).await.unwrap_err();
        succeed(&cb).await.unwrap();
        assert_eq!(cb.snapshot().failure_count, 0);
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_probe_success_closes() {
        let cb = breaker(2, Duration::from_millis(100));
        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.admits_calls());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cb.admits_calls());

        let seen = Mutex::new(None);
        cb.execute(&CallContext::new(), || async {
            *seen.lock().unwrap() = Some(cb.state());
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(CircuitState::HalfOpen));
        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
    }

    #[tokio::test]
    async fn test_half_open_probe_failure_reopens() {
        let cb = breaker(2, Duration::from_millis(100));
        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();

        tokio::time::sleep(Duration::from_millis(120)).await;
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);

        // Fresh timeout after the failed probe.
        let res = succeed(&cb).await;
        assert!(matches!(res, Err(UpstreamError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn test_single_probe_in_half_open() {
        let cb = breaker(1, Duration::from_millis(50));
        fail(&cb).await.unwrap_err();
        tokio::time::sleep(Duration::from_millis(70)).await;

        let probe = cb.try_acquire().unwrap();
        assert!(probe.is_probe());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let second = cb.try_acquire();
        assert!(matches!(second, Err(UpstreamError::CircuitOpen { .. })));
        assert!(!cb.admits_calls());

        probe.success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn test_unsettled_probe_frees_slot() {
        let cb = breaker(1, Duration::from_millis(50));
        fail(&cb).await.unwrap_err();
        tokio::time::sleep(Duration::from_millis(70)).await;

        drop(cb.try_acquire().unwrap());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn test_cancellation_not_counted() {
        let cb = breaker(1, Duration::from_secs(10));
        let res = cb
            .execute(&CallContext::new(), || async { Err::<(), _>(UpstreamError::Canceled) })
            .await;
        assert_eq!(res, Err(UpstreamError::Canceled));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 0);

        let ctx = CallContext::new();
        ctx.cancel();
        let res = cb.execute(&ctx, || async { Ok(()) }).await;
        assert_eq!(res, Err(UpstreamError::Canceled));
    }

    #[tokio::test]
    async fn test_permanent_error_counts_as_failure() {
        let cb = breaker(1, Duration::from_secs(10));
        let res = cb
            .execute(&CallContext::new(), || async {
                Err::<(), _>(UpstreamError::permanent("400"))
            })
            .await;
        assert_eq!(res, Err(UpstreamError::permanent("400")));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_reset_notifies_only_on_change() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let options = CircuitBreakerOptions {
            max_failures: 1,
            timeout: Duration::from_secs(10),
            ..CircuitBreakerOptions::default()
        }
        .with_state_change(Arc::new(move |t: &StateTransition| {
            let _ = tx.send(t.clone());
        }));
        let cb = CircuitBreaker::new("b1", options);

        cb.reset();
        fail(&cb).await.unwrap_err();
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 0);

        let first = rx.recv().await.unwrap();
        assert_eq!((first.from, first.to), (CircuitState::Closed, CircuitState::Open));
        let second = rx.recv().await.unwrap();
        assert_eq!((second.from, second.to), (CircuitState::Open, CircuitState::Closed));
        assert_eq!(second.instance, "b1");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err(), "no-op reset must not notify");
    }

    #[tokio::test]
    async fn test_notifications_preserve_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let options = CircuitBreakerOptions {
            max_failures: 1,
            timeout: Duration::from_millis(20),
            ..CircuitBreakerOptions::default()
        }
        .with_state_change(Arc::new(move |t: &StateTransition| {
            let _ = tx.send((t.from, t.to));
        }));
        let cb = CircuitBreaker::new("b1", options);

        fail(&cb).await.unwrap_err();
        tokio::time::sleep(Duration::from_millis(30)).await;
        succeed(&cb).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv().await.unwrap());
        }
        assert_eq!(
            seen,
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_racing_transitions_delivered_in_lock_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let options = CircuitBreakerOptions {
            max_failures: 1,
            timeout: Duration::from_secs(60),
            notification_queue: 10_000,
            ..CircuitBreakerOptions::default()
        }
        .with_state_change(Arc::new(move |t: &StateTransition| {
            let _ = tx.send((t.from, t.to));
        }));
        let cb = CircuitBreaker::new("b1", options);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..1000 {
                    if let Ok(permit) = cb.try_acquire() {
                        permit.failure();
                    }
                }
            });
            scope.spawn(|| {
                for _ in 0..1000 {
                    cb.reset();
                }
            });
        });

        let mut seen = Vec::new();
        while let Ok(Some(change)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
            seen.push(change);
        }

        let mut current = CircuitState::Closed;
        for (from, to) in &seen {
            assert_eq!(*from, current, "transition {:?} -> {:?} delivered out of order", from, to);
            current = *to;
        }
        assert_eq!(current, cb.state());
    }

    #[test]
    fn test_inline_notification_without_runtime() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let options = CircuitBreakerOptions {
            max_failures: 1,
            ..CircuitBreakerOptions::default()
        }
        .with_state_change(Arc::new(move |_: &StateTransition| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let cb = CircuitBreaker::new("b1", options);

        cb.try_acquire().unwrap().failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
