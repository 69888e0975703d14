//! Uniform random load balancing strategy.

use std::sync::Arc;
use crate::load_balancer::{LoadBalancer, instance::ServiceInstance};

/// Picks uniformly among the instances it is given.
#[derive(Debug, Default)]
pub struct RandomPick;

impl RandomPick {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for RandomPick {
    fn next_instance(&self, instances: &[Arc<ServiceInstance>]) -> Option<Arc<ServiceInstance>> {
        if instances.is_empty() {
            return None;
        }
        instances.get(fastrand::usize(..instances.len())).cloned()
    }
}
