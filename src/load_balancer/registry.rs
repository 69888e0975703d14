//! Instance registry.
//!
//! # Responsibilities
//! - Hold the current instance list; reloads keep instances whose
//!   definition is unchanged so breaker and health state survive
//! - Filter eligible instances and apply the load balancing algorithm
//! - Provide status snapshots for observability

use std::sync::Arc;
use arc_swap::ArcSwap;

use crate::config::{InstanceConfig, UpstreamConfig};
use crate::context::CallContext;
use crate::error::{UpstreamError, UpstreamResult};
use crate::load_balancer::{
    LoadBalanceStrategy, LoadBalancer,
    instance::{InstanceStatus, ServiceInstance},
};
use crate::resilience::CircuitBreakerOptions;

/// Tracks instances and selects one per call.
#[derive(Debug)]
pub struct InstanceRegistry {
    instances: ArcSwap<Vec<Arc<ServiceInstance>>>,
    balancer: Box<dyn LoadBalancer>,
    strategy: LoadBalanceStrategy,
    breaker_options: CircuitBreakerOptions,
    health_path: String,
}

impl InstanceRegistry {
    /// Create a registry over already-built instances.
    pub fn new(instances: Vec<Arc<ServiceInstance>>, strategy: LoadBalanceStrategy) -> Self {
        Self {
            instances: ArcSwap::from_pointee(instances),
            balancer: strategy.build(),
            strategy,
            breaker_options: CircuitBreakerOptions::default(),
            health_path: "/health".to_string(),
        }
    }

    /// Build instances from configuration. `breaker_options` is applied to
    /// every instance, now and on later reloads.
    pub fn from_config(
        config: &UpstreamConfig,
        breaker_options: CircuitBreakerOptions,
    ) -> UpstreamResult<Self> {
        let health_path = config.health_check.path.clone();
        let instances = build_instances(&config.instances, &health_path, &breaker_options)?;
        let strategy = config.load_balancer.strategy;

        tracing::info!(
            instances = instances.len(),
            strategy = ?strategy,
            "Instance registry configured"
        );

        Ok(Self {
            instances: ArcSwap::from_pointee(instances),
            balancer: strategy.build(),
            strategy,
            breaker_options,
            health_path,
        })
    }

    pub fn strategy(&self) -> LoadBalanceStrategy {
        self.strategy
    }

    /// Select an eligible instance under the configured strategy.
    ///
    /// The caller takes a connection guard on the returned instance.
    pub fn select_instance(&self, ctx: &CallContext) -> UpstreamResult<Arc<ServiceInstance>> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let snapshot = self.instances.load();
        let eligible: Vec<Arc<ServiceInstance>> = snapshot
            .iter()
            .filter(|i| i.is_eligible())
            .cloned()
            .collect();

        if eligible.is_empty() {
            tracing::debug!(instance_count = snapshot.len(), "No eligible instances");
            for i in snapshot.iter() {
                tracing::debug!(
                    instance = %i.id(),
                    health = ?i.health_state(),
                    circuit = %i.breaker().state(),
                    "Instance status"
                );
            }
            return Err(UpstreamError::NoHealthyInstance);
        }

        self.balancer
            .next_instance(&eligible)
            .ok_or(UpstreamError::NoHealthyInstance)
    }

    /// Return a list of all instances (for health checking).
    pub fn all_instances(&self) -> Vec<Arc<ServiceInstance>> {
        self.instances.load().iter().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<ServiceInstance>> {
        self.instances.load().iter().find(|i| i.id() == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.instances.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Swap in a new instance list. In-flight calls keep the instances
    /// they already hold.
    pub fn replace(&self, instances: Vec<Arc<ServiceInstance>>) {
        let previous = self.instances.swap(Arc::new(instances));
        tracing::info!(
            previous = previous.len(),
            current = self.len(),
            "Instance list replaced"
        );
    }

    /// Apply a reloaded instance list.
    ///
    /// Instances whose id, URLs and weight are unchanged keep their existing
    /// breaker, health and connection state; only new or edited entries get
    /// fresh ones. Nothing is swapped when the list is identical.
    pub fn replace_from_config(&self, configs: &[InstanceConfig]) -> UpstreamResult<ReloadSummary> {
        let candidates = build_instances(configs, &self.health_path, &self.breaker_options)?;
        let current = self.instances.load();

        let mut summary = ReloadSummary::default();
        let merged: Vec<Arc<ServiceInstance>> = candidates
            .into_iter()
            .map(|candidate| match current.iter().find(|i| i.same_target(&candidate)) {
                Some(existing) => {
                    summary.kept += 1;
                    existing.clone()
                }
                None => {
                    summary.added += 1;
                    candidate
                }
            })
            .collect();
        summary.removed = current
            .iter()
            .filter(|i| !merged.iter().any(|m| Arc::ptr_eq(m, i)))
            .count();

        let unchanged = merged.len() == current.len()
            && merged.iter().zip(current.iter()).all(|(m, c)| Arc::ptr_eq(m, c));
        if unchanged {
            tracing::debug!(instances = merged.len(), "Instance list unchanged, keeping state");
            return Ok(summary);
        }

        tracing::info!(
            kept = summary.kept,
            added = summary.added,
            removed = summary.removed,
            "Applying instance list change"
        );
        self.replace(merged);
        Ok(summary)
    }

    pub fn status(&self) -> Vec<InstanceStatus> {
        self.instances.load().iter().map(|i| i.status()).collect()
    }
}

/// What a reload did to the instance list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    /// Instances carried over with their state.
    pub kept: usize,
    /// New or edited instances, starting fresh.
    pub added: usize,
    /// Instances no longer configured.
    pub removed: usize,
}

impl ReloadSummary {
    pub fn changed(&self) -> bool {
        self.added > 0 || self.removed > 0
    }
}

fn build_instances(
    configs: &[InstanceConfig],
    health_path: &str,
    breaker_options: &CircuitBreakerOptions,
) -> UpstreamResult<Vec<Arc<ServiceInstance>>> {
    configs
        .iter()
        .map(|c| ServiceInstance::from_config(c, health_path, breaker_options.clone()).map(Arc::new))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use crate::health::HealthState;
    use crate::load_balancer::instance::test_instance;

    fn registry(ids: &[&str], strategy: LoadBalanceStrategy) -> InstanceRegistry {
        InstanceRegistry::new(ids.iter().map(|id| test_instance(id)).collect(), strategy)
    }

    fn trip(instance: &ServiceInstance) {
        while instance.breaker().state() != crate::resilience::CircuitState::Open {
            instance.breaker().try_acquire().unwrap().failure();
        }
    }

    #[test]
    fn test_round_robin_fairness() {
        let reg = registry(&["a", "b", "c"], LoadBalanceStrategy::RoundRobin);
        let ctx = CallContext::new();

        let picks: Vec<String> = (0..9)
            .map(|_| reg.select_instance(&ctx).unwrap().id().to_string())
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c", "a", "b", "c"]);

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for p in &picks {
            *counts.entry(p.as_str()).or_default() += 1;
        }
        assert!(counts.values().all(|&c| c == 3));
    }

    #[test]
    fn test_least_connections_selection() {
        let reg = registry(&["a", "b"], LoadBalanceStrategy::LeastConnections);
        let a = reg.get("a").unwrap();
        let b = reg.get("b").unwrap();
        let _a: Vec<_> = (0..5).map(|_| a.track_connection()).collect();
        let _b: Vec<_> = (0..2).map(|_| b.track_connection()).collect();

        let picked = reg.select_instance(&CallContext::new()).unwrap();
        assert_eq!(picked.id(), "b");
    }

    #[test]
    fn test_skips_unhealthy_and_open() {
        let reg = registry(&["a", "b", "c"], LoadBalanceStrategy::RoundRobin);
        reg.get("a").unwrap().mark_failure(1);
        trip(&reg.get("c").unwrap());

        let ctx = CallContext::new();
        for _ in 0..6 {
            assert_eq!(reg.select_instance(&ctx).unwrap().id(), "b");
        }
    }

    #[test]
    fn test_no_healthy_instance() {
        let reg = registry(&["a", "b"], LoadBalanceStrategy::Random);
        reg.get("a").unwrap().mark_failure(1);
        trip(&reg.get("b").unwrap());

        let res = reg.select_instance(&CallContext::new());
        assert_eq!(res.unwrap_err(), UpstreamError::NoHealthyInstance);

        let empty = registry(&[], LoadBalanceStrategy::RoundRobin);
        assert!(empty.is_empty());
        assert_eq!(
            empty.select_instance(&CallContext::new()).unwrap_err(),
            UpstreamError::NoHealthyInstance
        );
    }

    #[test]
    fn test_canceled_context() {
        let reg = registry(&["a"], LoadBalanceStrategy::RoundRobin);
        let ctx = CallContext::new();
        ctx.cancel();
        assert_eq!(reg.select_instance(&ctx).unwrap_err(), UpstreamError::Canceled);
    }

    #[test]
    fn test_replace_from_config() {
        let reg = registry(&["a"], LoadBalanceStrategy::RoundRobin);
        let held = reg.get("a").unwrap();

        let summary = reg.replace_from_config(&[
            InstanceConfig {
                id: "x".into(),
                base_url: "http://127.0.0.1:4000".into(),
                health_url: None,
                weight: 1,
            },
            InstanceConfig {
                id: "y".into(),
                base_url: "http://127.0.0.1:4001".into(),
                health_url: None,
                weight: 1,
            },
        ])
        .unwrap();

        assert_eq!(reg.len(), 2);
        assert!(reg.get("a").is_none());
        assert_eq!(summary, ReloadSummary { kept: 0, added: 2, removed: 1 });
        assert_eq!(held.id(), "a");
        let ids: Vec<_> = reg.status().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["x", "y"]);
    }

    fn instance_config(id: &str, weight: u32) -> InstanceConfig {
        InstanceConfig {
            id: id.into(),
            base_url: format!("http://{}.test:8080", id),
            health_url: None,
            weight,
        }
    }

    #[test]
    fn test_reload_keeps_state_of_unchanged_instances() {
        let reg = registry(&["a", "b"], LoadBalanceStrategy::RoundRobin);
        let a = reg.get("a").unwrap();
        trip(&a);
        a.mark_failure(1);

        let summary = reg
            .replace_from_config(&[instance_config("a", 1), instance_config("b", 1)])
            .unwrap();
        assert_eq!(summary, ReloadSummary { kept: 2, added: 0, removed: 0 });
        assert!(!summary.changed());

        let after = reg.get("a").unwrap();
        assert!(Arc::ptr_eq(&a, &after));
        assert_eq!(after.breaker().state(), crate::resilience::CircuitState::Open);
        assert_eq!(after.health_state(), HealthState::Unhealthy);
    }

    #[test]
    fn test_reload_replaces_only_edited_instances() {
        let reg = registry(&["a", "b"], LoadBalanceStrategy::RoundRobin);
        let a = reg.get("a").unwrap();
        let b = reg.get("b").unwrap();
        trip(&a);
        trip(&b);

        let summary = reg
            .replace_from_config(&[instance_config("a", 1), instance_config("b", 3), instance_config("c", 1)])
            .unwrap();
        assert_eq!(summary, ReloadSummary { kept: 1, added: 2, removed: 1 });
        assert!(summary.changed());

        assert!(Arc::ptr_eq(&a, &reg.get("a").unwrap()));
        let new_b = reg.get("b").unwrap();
        assert!(!Arc::ptr_eq(&b, &new_b));
        assert_eq!(new_b.weight(), 3);
        assert_eq!(new_b.breaker().state(), crate::resilience::CircuitState::Closed);
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn test_open_instance_selectable_after_cooldown() {
        let options = CircuitBreakerOptions {
            max_failures: 1,
            timeout: std::time::Duration::from_millis(50),
            ..CircuitBreakerOptions::default()
        };
        let base = url::Url::parse("http://a.test:8080").unwrap();
        let health = base.join("/health").unwrap();
        let a = Arc::new(ServiceInstance::new("a", base, health, 1, options));
        let reg = InstanceRegistry::new(vec![a.clone()], LoadBalanceStrategy::RoundRobin);
        let ctx = CallContext::new();

        trip(&a);
        assert_eq!(reg.select_instance(&ctx).unwrap_err(), UpstreamError::NoHealthyInstance);

        std::thread::sleep(std::time::Duration::from_millis(80));
        let picked = reg.select_instance(&ctx).unwrap();
        assert_eq!(picked.id(), "a");
        picked.breaker().try_acquire().unwrap().success();
        assert_eq!(a.breaker().state(), crate::resilience::CircuitState::Closed);
    }

    #[test]
    fn test_replace_rejects_bad_config() {
        let reg = registry(&["a"], LoadBalanceStrategy::RoundRobin);
        let res = reg.replace_from_config(&[InstanceConfig {
            id: "bad".into(),
            base_url: "::not a url".into(),
            health_url: None,
            weight: 1,
        }]);
        assert!(matches!(res, Err(UpstreamError::Config(_))));
        assert!(reg.get("a").is_some());
    }
}
