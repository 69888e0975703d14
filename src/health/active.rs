//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe instances
//! - Update instance health state based on results

use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time;
use tokio::sync::broadcast;

use crate::config::HealthCheckConfig;
use crate::error::UpstreamResult;
use crate::health::probe::{build_probe, HealthProbe};
use crate::health::state::HealthState;
use crate::load_balancer::{InstanceRegistry, ServiceInstance};
use crate::observability::metrics;

/// Background prober for every instance in a registry.
pub struct HealthChecker {
    registry: Arc<InstanceRegistry>,
    config: HealthCheckConfig,
    probe: Arc<dyn HealthProbe>,
}

impl HealthChecker {
    /// Create a checker using the probe transport named in `config`.
    pub fn new(registry: Arc<InstanceRegistry>, config: HealthCheckConfig) -> UpstreamResult<Self> {
        let probe = build_probe(config.probe)?;
        Ok(Self::with_probe(registry, config, probe))
    }

    pub fn with_probe(
        registry: Arc<InstanceRegistry>,
        config: HealthCheckConfig,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        Self {
            registry,
            config,
            probe,
        }
    }

    /// Run in a background task until shutdown.
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval_ms = self.config.interval_ms,
            timeout_ms = self.config.timeout_ms,
            probe = ?self.config.probe,
            "Health checker starting"
        );

        let interval = self.config.interval().max(Duration::from_millis(1));
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health checker received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every instance once, concurrently.
    pub async fn check_all(&self) {
        let mut checks = JoinSet::new();

        for instance in self.registry.all_instances() {
            let probe = self.probe.clone();
            let config = self.config.clone();
            checks.spawn(async move {
                check_instance(&instance, probe.as_ref(), &config).await;
            });
        }

        while let Some(res) = checks.join_next().await {
            if let Err(e) = res {
                tracing::error!(error = %e, "Health check task failed");
            }
        }
    }
}

async fn check_instance(instance: &ServiceInstance, probe: &dyn HealthProbe, config: &HealthCheckConfig) {
    let target = instance.health_url();
    let timeout = config.timeout();

    let healthy = match time::timeout(timeout, probe.probe(target)).await {
        Ok(Ok(())) => true,
        Ok(Err(reason)) => {
            tracing::warn!(instance = %instance.id(), target = %target, reason = %reason, "Health check failed");
            false
        }
        Err(_) => {
            tracing::warn!(instance = %instance.id(), target = %target, timeout = ?timeout, "Health check failed: timeout");
            false
        }
    };

    let transition = if healthy {
        instance.mark_success(config.healthy_threshold as usize)
    } else {
        instance.mark_failure(config.unhealthy_threshold as usize)
    };

    match transition {
        Some(HealthState::Healthy) => tracing::info!(instance = %instance.id(), "Instance is now healthy"),
        Some(HealthState::Unhealthy) => tracing::warn!(instance = %instance.id(), "Instance is now unhealthy"),
        _ => {}
    }

    metrics::record_instance_health(instance.id(), instance.is_healthy());
}
