//! Call execution through the resilience stack.
//!
//! # Data Flow
//! ```text
//! ProxyCore::execute(ctx, operation)
//!     → InstanceRegistry::select_instance (healthy + admitting)
//!     → ConnectionGuard (active connection count)
//!     → CircuitBreaker permit (one logical event per call)
//!     → Retryer (transient failures retried with backoff)
//!     → operation(instance)
//! ```
//!
//! # Design Decisions
//! - Retries run inside a single breaker permit; an exhausted retry
//!   sequence counts as one breaker failure
//! - A cancellation before any attempt failed says nothing about the
//!   instance and is not recorded by the breaker
//! - Terminal errors carry the id of the instance that served the call

pub mod http;

use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::UpstreamConfig;
use crate::context::CallContext;
use crate::error::{UpstreamError, UpstreamResult};
use crate::load_balancer::{InstanceRegistry, ServiceInstance};
use crate::observability::metrics;
use crate::resilience::{CircuitBreakerOptions, RetryPolicy, Retryer, StateChangeCallback};

pub use http::{HttpCaller, HttpReply};

/// Entry point for calls against a pool of upstream instances.
#[derive(Debug, Clone)]
pub struct ProxyCore {
    registry: Arc<InstanceRegistry>,
    retryer: Retryer,
}

impl ProxyCore {
    pub fn new(registry: Arc<InstanceRegistry>, retryer: Retryer) -> Self {
        Self { registry, retryer }
    }

    /// Build the registry, breakers and retry policy from configuration.
    pub fn from_config(config: &UpstreamConfig) -> UpstreamResult<Self> {
        Self::build(config, CircuitBreakerOptions::from(&config.circuit_breaker))
    }

    /// Like `from_config`, with `on_state_change` observing every breaker.
    pub fn from_config_with_observer(
        config: &UpstreamConfig,
        on_state_change: StateChangeCallback,
    ) -> UpstreamResult<Self> {
        let options = CircuitBreakerOptions::from(&config.circuit_breaker).with_state_change(on_state_change);
        Self::build(config, options)
    }

    fn build(config: &UpstreamConfig, breaker_options: CircuitBreakerOptions) -> UpstreamResult<Self> {
        let registry = InstanceRegistry::from_config(config, breaker_options)?;
        let policy = RetryPolicy::from_config(&config.retries)?;
        Ok(Self::new(Arc::new(registry), Retryer::new(policy)))
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn retryer(&self) -> &Retryer {
        &self.retryer
    }

    /// Run `operation` against one selected instance.
    ///
    /// `operation` may be invoked several times (once per retry attempt),
    /// always with the same instance.
    pub async fn execute<T, F, Fut>(&self, ctx: &CallContext, operation: F) -> UpstreamResult<T>
    where
        F: Fn(Arc<ServiceInstance>) -> Fut,
        Fut: Future<Output = UpstreamResult<T>>,
    {
        let call_id = Uuid::new_v4();
        let span = tracing::debug_span!("upstream_call", call_id = %call_id);
        self.dispatch(ctx, operation).instrument(span).await
    }

    async fn dispatch<T, F, Fut>(&self, ctx: &CallContext, operation: F) -> UpstreamResult<T>
    where
        F: Fn(Arc<ServiceInstance>) -> Fut,
        Fut: Future<Output = UpstreamResult<T>>,
    {
        let start = Instant::now();

        let instance = match self.registry.select_instance(ctx) {
            Ok(instance) => instance,
            Err(e) => {
                tracing::warn!(error = %e, "No instance selected");
                metrics::record_call("none", outcome_label(&e), start);
                return Err(e);
            }
        };

        let guard = instance.track_connection();
        tracing::debug!(instance = %guard.id(), active = guard.active_connections(), "Instance selected");

        // Another call may have taken the half-open probe since selection.
        let permit = match guard.breaker().try_acquire() {
            Ok(permit) => permit,
            Err(e) => {
                metrics::record_call(guard.id(), "rejected", start);
                return Err(e);
            }
        };

        let target = guard.instance().clone();
        let outcome = self
            .retryer
            .execute_counted(ctx, || operation(target.clone()))
            .await;

        match &outcome.result {
            Ok(_) => permit.success(),
            Err(e) if e.is_circuit_open() => permit.release(),
            Err(e) if e.is_cancellation() && outcome.failures == 0 => permit.release(),
            Err(_) => permit.failure(),
        }

        match outcome.result {
            Ok(value) => {
                tracing::debug!(instance = %guard.id(), attempts = outcome.attempts, "Call succeeded");
                metrics::record_call(guard.id(), "success", start);
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(
                    instance = %guard.id(),
                    attempts = outcome.attempts,
                    failures = outcome.failures,
                    error = %e,
                    "Call failed"
                );
                metrics::record_call(guard.id(), outcome_label(&e), start);
                Err(e.at_instance(guard.id()))
            }
        }
    }
}

fn outcome_label(err: &UpstreamError) -> &'static str {
    match err.root() {
        UpstreamError::Canceled | UpstreamError::DeadlineExceeded => "canceled",
        UpstreamError::NoHealthyInstance => "no_instance",
        UpstreamError::CircuitOpen { .. } => "rejected",
        _ => "failure",
    }
}
