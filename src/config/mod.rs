//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → UpstreamConfig (validated, immutable)
//!     → ProxyCore / InstanceRegistry / HealthChecker built from it
//!
//! On file change:
//!     watcher.rs detects change (debounced)
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → changed instance list handed to the registry, which keeps
//!       state for instances whose definition did not change
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Only instance membership is hot-swapped; breaker, retry and
//!   strategy settings take effect on restart

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::UpstreamConfig;
pub use schema::InstanceConfig;
pub use schema::CircuitBreakerConfig;
pub use schema::RetryConfig;
pub use schema::HealthCheckConfig;
pub use schema::ObservabilityConfig;
pub use schema::ProbeKind;
