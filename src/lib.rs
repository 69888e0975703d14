//! Resilient upstream-client library.
//!
//! Selects an instance from a pool, guards it with a per-instance circuit
//! breaker, retries transient failures with backoff and keeps instance
//! health current with background probes.

pub mod config;
pub mod context;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod proxy;
pub mod resilience;

pub use config::schema::UpstreamConfig;
pub use context::CallContext;
pub use error::{UpstreamError, UpstreamResult};
pub use health::HealthChecker;
pub use lifecycle::Shutdown;
pub use load_balancer::{InstanceRegistry, LoadBalanceStrategy, ServiceInstance};
pub use proxy::ProxyCore;
pub use resilience::{CircuitBreaker, CircuitState, RetryPolicy, Retryer};
