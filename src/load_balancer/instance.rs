//! Service instance abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream instance
//! - Track active connections (for Least Connections LB)
//! - Track health state (Unknown/Healthy/Unhealthy)
//! - Own the instance's circuit breaker

use url::Url;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::ops::Deref;
use serde::Serialize;

use crate::config::InstanceConfig;
use crate::error::{UpstreamError, UpstreamResult};
use crate::health::state::{HealthState, HealthTracker};
use crate::observability::metrics;
use crate::resilience::{BreakerSnapshot, CircuitBreaker, CircuitBreakerOptions};

/// A single upstream instance.
#[derive(Debug)]
pub struct ServiceInstance {
    id: String,
    base_url: Url,
    health_url: Url,
    weight: u32,
    /// Number of currently active calls.
    active_connections: AtomicUsize,
    health: HealthTracker,
    breaker: CircuitBreaker,
}

impl ServiceInstance {
    /// Create a new instance with its own breaker.
    pub fn new(
        id: impl Into<String>,
        base_url: Url,
        health_url: Url,
        weight: u32,
        breaker: CircuitBreakerOptions,
    ) -> Self {
        let id = id.into();
        Self {
            breaker: CircuitBreaker::new(id.clone(), breaker),
            id,
            base_url,
            health_url,
            weight: weight.max(1),
            active_connections: AtomicUsize::new(0),
            health: HealthTracker::new(),
        }
    }

    /// Build from configuration. Without an explicit health URL the probe
    /// targets `base_url` joined with `health_path`.
    pub fn from_config(
        config: &InstanceConfig,
        health_path: &str,
        breaker: CircuitBreakerOptions,
    ) -> UpstreamResult<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            UpstreamError::Config(format!("instance {}: invalid base_url: {}", config.id, e))
        })?;
        let health_url = match &config.health_url {
            Some(url) => Url::parse(url),
            None => base_url.join(health_path),
        }
        .map_err(|e| {
            UpstreamError::Config(format!("instance {}: invalid health url: {}", config.id, e))
        })?;

        Ok(Self::new(config.id.clone(), base_url, health_url, config.weight, breaker))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn health_url(&self) -> &Url {
        &self.health_url
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Get the current number of active connections.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Count a dispatched call until the returned guard is dropped.
    pub fn track_connection(self: &Arc<Self>) -> ConnectionGuard {
        let active = self.active_connections.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::record_active_connections(&self.id, active);
        ConnectionGuard {
            instance: self.clone(),
        }
    }

    fn release_connection(&self) {
        // Saturating: the count never goes below zero.
        let previous = self
            .active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        metrics::record_active_connections(&self.id, previous.saturating_sub(1));
    }

    // --- Health Logic ---

    pub fn health_state(&self) -> HealthState {
        self.health.state()
    }

    /// Return true if instance is considered healthy (Healthy or Unknown).
    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy()
    }

    /// Report a successful probe.
    pub fn mark_success(&self, healthy_threshold: usize) -> Option<HealthState> {
        self.health.mark_success(healthy_threshold)
    }

    /// Report a failed probe.
    pub fn mark_failure(&self, unhealthy_threshold: usize) -> Option<HealthState> {
        self.health.mark_failure(unhealthy_threshold)
    }

    /// Same id, URLs and weight; runtime state is not compared.
    pub fn same_target(&self, other: &ServiceInstance) -> bool {
        self.id == other.id
            && self.base_url == other.base_url
            && self.health_url == other.health_url
            && self.weight == other.weight
    }

    /// Healthy and the breaker would admit a call.
    pub fn is_eligible(&self) -> bool {
        self.is_healthy() && self.breaker.admits_calls()
    }

    pub fn status(&self) -> InstanceStatus {
        InstanceStatus {
            id: self.id.clone(),
            base_url: self.base_url.to_string(),
            health_url: self.health_url.to_string(),
            weight: self.weight,
            health: self.health_state(),
            breaker: self.breaker.snapshot(),
            active_connections: self.active_connections(),
            eligible: self.is_eligible(),
        }
    }
}

/// Serializable point-in-time view of an instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    pub id: String,
    pub base_url: String,
    pub health_url: String,
    pub weight: u32,
    pub health: HealthState,
    pub breaker: BreakerSnapshot,
    pub active_connections: usize,
    pub eligible: bool,
}

/// A RAII guard that manages the active connection count.
#[derive(Debug)]
pub struct ConnectionGuard {
    instance: Arc<ServiceInstance>,
}

impl ConnectionGuard {
    pub fn instance(&self) -> &Arc<ServiceInstance> {
        &self.instance
    }
}

impl Deref for ConnectionGuard {
    type Target = ServiceInstance;
    fn deref(&self) -> &Self::Target {
        &self.instance
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.instance.release_connection();
    }
}

#[cfg(test)]
pub(crate) fn test_instance(id: &str) -> Arc<ServiceInstance> {
    let base = Url::parse(&format!("http://{}.test:8080", id)).unwrap();
    let health = base.join("/health").unwrap();
    Arc::new(ServiceInstance::new(id, base, health, 1, CircuitBreakerOptions::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitState;

    #[test]
    fn test_guard_tracks_connections() {
        let instance = test_instance("b1");
        assert_eq!(instance.active_connections(), 0);

        let g1 = instance.track_connection();
        let g2 = instance.track_connection();
        assert_eq!(instance.active_connections(), 2);

        drop(g1);
        assert_eq!(instance.active_connections(), 1);
        drop(g2);
        assert_eq!(instance.active_connections(), 0);

        // Never negative, even on a stray release.
        instance.release_connection();
        assert_eq!(instance.active_connections(), 0);
    }

    #[test]
    fn test_guard_released_on_panic() {
        let instance = test_instance("b1");
        let cloned = instance.clone();
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = cloned.track_connection();
            panic!("operation panicked");
        }));
        assert!(res.is_err());
        assert_eq!(instance.active_connections(), 0);
    }

    #[test]
    fn test_from_config_health_url() {
        let config = InstanceConfig {
            id: "a".into(),
            base_url: "http://127.0.0.1:3000/api/".into(),
            health_url: None,
            weight: 2,
        };
        let instance = ServiceInstance::from_config(&config, "/health", Default::default()).unwrap();
        assert_eq!(instance.health_url().as_str(), "http://127.0.0.1:3000/health");
        assert_eq!(instance.weight(), 2);

        let explicit = InstanceConfig {
            health_url: Some("http://127.0.0.1:3001/ready".into()),
            ..config
        };
        let instance = ServiceInstance::from_config(&explicit, "/health", Default::default()).unwrap();
        assert_eq!(instance.health_url().as_str(), "http://127.0.0.1:3001/ready");
    }

    #[test]
    fn test_eligibility_needs_health_and_closed_circuit() {
        let instance = test_instance("b1");
        assert!(instance.is_eligible());

        instance.mark_failure(1);
        assert!(!instance.is_eligible());
        instance.mark_success(1);
        assert!(instance.is_eligible());

        for _ in 0..5 {
            instance.breaker().try_acquire().unwrap().failure();
        }
        assert_eq!(instance.breaker().state(), CircuitState::Open);
        assert!(instance.is_healthy());
        assert!(!instance.is_eligible());

        let status = instance.status();
        assert_eq!(status.breaker.state, CircuitState::Open);
        assert!(!status.eligible);
    }
}
