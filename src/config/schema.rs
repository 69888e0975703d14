//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the upstream client.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::load_balancer::LoadBalanceStrategy;

/// Root configuration for the upstream client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Static instance membership.
    pub instances: Vec<InstanceConfig>,

    /// Per-instance circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry policy.
    pub retries: RetryConfig,

    /// Instance selection strategy.
    pub load_balancer: LoadBalancerConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// A single upstream instance.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct InstanceConfig {
    /// Unique instance identifier.
    pub id: String,

    /// Target address for proxied calls (e.g., "http://10.0.0.5:8080").
    pub base_url: String,

    /// Probe address. Defaults to `base_url` joined with `health_check.path`.
    #[serde(default)]
    pub health_url: Option<String>,

    /// Relative weight for weighted selection (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before Closed → Open.
    pub max_failures: u32,

    /// Time spent Open before a probe call is allowed, in milliseconds.
    pub timeout_ms: u64,

    /// Capacity of the state-change notification queue.
    pub notification_queue: usize,
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            timeout_ms: 30_000,
            notification_queue: 64,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt (total attempts = max_retries + 1).
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,

    /// Growth factor per retry (>= 1.0).
    pub backoff_multiplier: f64,

    /// Upper bound for any single delay in milliseconds.
    pub max_delay_ms: u64,

    /// Randomize each delay within [delay/2, 1.5 * delay).
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
            max_delay_ms: 2000,
            jitter: true,
        }
    }
}

/// Load balancer configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LoadBalancerConfig {
    pub strategy: LoadBalanceStrategy,
}

/// Probe transport.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// GET the health URL, 2xx is healthy.
    #[default]
    Http,
    /// TCP connect to the health URL's host and port.
    Tcp,
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in milliseconds.
    pub interval_ms: u64,

    /// Health check timeout in milliseconds.
    pub timeout_ms: u64,

    /// Path appended to `base_url` when an instance has no explicit health URL.
    pub path: String,

    /// Probe transport.
    pub probe: ProbeKind,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 10_000,
            timeout_ms: 2_000,
            path: "/health".to_string(),
            probe: ProbeKind::Http,
            unhealthy_threshold: 1,
            healthy_threshold: 1,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}
