//! Metrics recording.
//!
//! # Metrics
//! - `upstream_calls_total` (counter): calls by instance, outcome
//! - `upstream_call_duration_seconds` (histogram): latency per instance
//! - `upstream_active_connections` (gauge): in-flight calls per instance
//! - `upstream_instance_health` (gauge): 1=healthy, 0=unhealthy
//! - `upstream_breaker_transitions_total` (counter): by instance, target state
//! - `upstream_breaker_state` (gauge): 0=closed, 1=open, 2=half_open
//! - `upstream_breaker_notifications_dropped_total` (counter)
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; no exporter is installed here
//! - Labels are instance ids, never per-call values

use tokio::time::Instant;

use crate::resilience::CircuitState;

pub fn record_call(instance: &str, outcome: &'static str, start: Instant) {
    let instance = instance.to_string();
    ::metrics::counter!(
        "upstream_calls_total",
        "instance" => instance.clone(),
        "outcome" => outcome
    )
    .increment(1);
    ::metrics::histogram!("upstream_call_duration_seconds", "instance" => instance)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_active_connections(instance: &str, active: usize) {
    ::metrics::gauge!("upstream_active_connections", "instance" => instance.to_string())
        .set(active as f64);
}

pub fn record_instance_health(instance: &str, healthy: bool) {
    ::metrics::gauge!("upstream_instance_health", "instance" => instance.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_breaker_transition(instance: &str, to: CircuitState) {
    let instance = instance.to_string();
    ::metrics::counter!(
        "upstream_breaker_transitions_total",
        "instance" => instance.clone(),
        "state" => to.to_string()
    )
    .increment(1);
    let level = match to {
        CircuitState::Closed => 0.0,
        CircuitState::Open => 1.0,
        CircuitState::HalfOpen => 2.0,
    };
    ::metrics::gauge!("upstream_breaker_state", "instance" => instance).set(level);
}

pub fn record_notification_dropped(instance: &str) {
    ::metrics::counter!(
        "upstream_breaker_notifications_dropped_total",
        "instance" => instance.to_string()
    )
    .increment(1);
}
