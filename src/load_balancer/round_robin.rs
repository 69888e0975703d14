//! Round-robin load balancing strategy.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use crate::load_balancer::{LoadBalancer, instance::ServiceInstance};

/// Round-robin selector.
/// Stores an internal counter to rotate through instances. The counter is
/// never reset when the eligible set changes size.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_instance(&self, instances: &[Arc<ServiceInstance>]) -> Option<Arc<ServiceInstance>> {
        if instances.is_empty() {
            return None;
        }

        let cursor = self.counter.fetch_add(1, Ordering::Relaxed);
        instances.get(cursor % instances.len()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::instance::test_instance;

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let b1 = test_instance("b1");
        let b2 = test_instance("b2");
        let instances = vec![b1.clone(), b2.clone()];

        let s1 = lb.next_instance(&instances).unwrap();
        assert_eq!(s1.id(), b1.id());

        let s2 = lb.next_instance(&instances).unwrap();
        assert_eq!(s2.id(), b2.id());

        let s3 = lb.next_instance(&instances).unwrap();
        assert_eq!(s3.id(), b1.id());
    }

    #[test]
    fn test_cursor_survives_shrinking_set() {
        let lb = RoundRobin::new();
        let all = vec![test_instance("a"), test_instance("b"), test_instance("c")];

        assert_eq!(lb.next_instance(&all).unwrap().id(), "a");
        assert_eq!(lb.next_instance(&all).unwrap().id(), "b");

        let shrunk = vec![all[0].clone(), all[2].clone()];
        // Cursor is at 2, so 2 % 2 picks index 0, then index 1.
        assert_eq!(lb.next_instance(&shrunk).unwrap().id(), "a");
        assert_eq!(lb.next_instance(&shrunk).unwrap().id(), "c");
        assert!(lb.next_instance(&[]).is_none());
    }
}
