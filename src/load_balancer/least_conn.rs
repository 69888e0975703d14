//! Least Connections load balancing strategy.

use std::sync::Arc;
use crate::load_balancer::{LoadBalancer, instance::ServiceInstance};

/// Least connections selector.
/// Selects the instance with the minimum number of active connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnections {
    fn next_instance(&self, instances: &[Arc<ServiceInstance>]) -> Option<Arc<ServiceInstance>> {
        // `min_by_key` keeps the first of equal minimums, so ties go to
        // registry order.
        instances
            .iter()
            .min_by_key(|i| i.active_connections())
            .cloned()
    }
}
