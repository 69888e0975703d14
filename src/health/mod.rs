//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe every instance concurrently (probe.rs transport)
//!     → Update state.rs
//!
//! State machine (state.rs):
//!     Healthy ←→ Unhealthy
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - A slow probe never delays another instance's check
//! - State transitions require consecutive successes/failures
//! - Health state is per-instance, not per-registry
//! - Health checks never touch circuit breakers

pub mod active;
pub mod probe;
pub mod state;

pub use active::HealthChecker;
pub use probe::{build_probe, HealthProbe, HttpProbe, TcpProbe};
pub use state::HealthState;
