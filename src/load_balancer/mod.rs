//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! ProxyCore call
//!     → registry.rs (snapshot of instances, filter eligible)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through eligible instances)
//!         - random.rs (uniform pick)
//!         - least_conn.rs (pick instance with fewest in-flight calls)
//!         - weighted.rs (pick proportionally to weight)
//!     → instance.rs (connection guard taken by the caller)
//! ```
//!
//! # Design Decisions
//! - Algorithms only choose among instances they are handed; eligibility
//!   (healthy AND breaker admitting calls) is decided by the registry
//! - Selection and dispatch are separate steps
//! - Strategy is fixed per registry

use std::fmt::Debug;
use std::sync::Arc;
use serde::{Deserialize, Serialize};

pub mod instance;
pub mod least_conn;
pub mod random;
pub mod registry;
pub mod round_robin;
pub mod weighted;

pub use instance::{ConnectionGuard, InstanceStatus, ServiceInstance};
pub use registry::{InstanceRegistry, ReloadSummary};

/// A selection algorithm over eligible instances.
pub trait LoadBalancer: Send + Sync + Debug {
    /// Pick one of `instances`, or `None` if the slice is empty.
    fn next_instance(&self, instances: &[Arc<ServiceInstance>]) -> Option<Arc<ServiceInstance>>;
}

/// Configurable selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceStrategy {
    #[default]
    RoundRobin,
    Random,
    LeastConnections,
    Weighted,
}

impl LoadBalanceStrategy {
    pub fn build(self) -> Box<dyn LoadBalancer> {
        match self {
            LoadBalanceStrategy::RoundRobin => Box::new(round_robin::RoundRobin::new()),
            LoadBalanceStrategy::Random => Box::new(random::RandomPick::new()),
            LoadBalanceStrategy::LeastConnections => Box::new(least_conn::LeastConnections::new()),
            LoadBalanceStrategy::Weighted => Box::new(weighted::WeightedRandom::new()),
        }
    }
}
