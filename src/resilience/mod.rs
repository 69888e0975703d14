//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to an instance:
//!     → circuit_breaker.rs (admit or fail fast, one permit per logical call)
//!     → retries.rs (retry transient failures with backoff.rs delays)
//!     → outcome recorded once on the permit
//!     → notifier.rs (state changes delivered to observers off the lock)
//! ```
//!
//! # Design Decisions
//! - Retries run inside the breaker's single logical attempt
//! - Only transient faults are retried
//! - Circuit breaker prevents cascading failures
//! - Backoff sleeps always race the call context

pub mod backoff;
pub mod circuit_breaker;
pub mod notifier;
pub mod retries;

pub use circuit_breaker::{BreakerPermit, BreakerSnapshot, CircuitBreaker, CircuitBreakerOptions, CircuitState};
pub use notifier::{StateChangeCallback, StateTransition};
pub use retries::{RetryOutcome, RetryPolicy, RetryPredicate, Retryer};
