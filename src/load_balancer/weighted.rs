//! Weighted random load balancing strategy.

use std::sync::Arc;
use crate::load_balancer::{LoadBalancer, instance::ServiceInstance};

/// Picks an instance with probability proportional to its weight.
#[derive(Debug, Default)]
pub struct WeightedRandom;

impl WeightedRandom {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for WeightedRandom {
    fn next_instance(&self, instances: &[Arc<ServiceInstance>]) -> Option<Arc<ServiceInstance>> {
        let total: u64 = instances.iter().map(|i| u64::from(i.weight())).sum();
        if total == 0 {
            return instances.first().cloned();
        }

        let mut point = fastrand::u64(..total);
        for instance in instances {
            let weight = u64::from(instance.weight());
            if point < weight {
                return Some(instance.clone());
            }
            point -= weight;
        }
        instances.last().cloned()
    }
}
