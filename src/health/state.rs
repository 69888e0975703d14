//! Instance health state machine.
//!
//! # States
//! - Unknown: not probed yet, receives traffic
//! - Healthy: instance receives traffic
//! - Unhealthy: instance excluded from load balancing
//!
//! # State Transitions
//! ```text
//! Healthy/Unknown → Unhealthy: consecutive failures >= unhealthy_threshold
//! Unhealthy/Unknown → Healthy: consecutive successes >= healthy_threshold
//! ```
//!
//! # Design Decisions
//! - Hysteresis prevents flapping
//! - Independent of the circuit breaker; neither resets the other
//! - One writer per instance (its probe), so plain atomics suffice

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use serde::Serialize;

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// Consecutive-result tracker for one instance.
#[derive(Debug)]
pub struct HealthTracker {
    /// Current health state (0=Unknown, 1=Healthy, 2=Unhealthy).
    state: AtomicU8,
    /// Consecutive failure count.
    consecutive_failures: AtomicUsize,
    /// Consecutive success count.
    consecutive_successes: AtomicUsize,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(HealthState::Unknown as u8),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Acquire))
    }

    /// Healthy or Unknown.
    pub fn is_healthy(&self) -> bool {
        self.state() != HealthState::Unhealthy
    }

    /// Record a successful probe. Returns the new state if it changed.
    pub fn mark_success(&self, healthy_threshold: usize) -> Option<HealthState> {
        self.consecutive_failures.store(0, Ordering::Release);

        if self.state() == HealthState::Healthy {
            return None;
        }

        let successes = self.consecutive_successes.fetch_add(1, Ordering::AcqRel) + 1;
        if successes >= healthy_threshold.max(1) {
            self.consecutive_successes.store(0, Ordering::Release);
            self.state.store(HealthState::Healthy as u8, Ordering::Release);
            return Some(HealthState::Healthy);
        }
        None
    }

    /// Record a failed probe. Returns the new state if it changed.
    pub fn mark_failure(&self, unhealthy_threshold: usize) -> Option<HealthState> {
        self.consecutive_successes.store(0, Ordering::Release);

        if self.state() == HealthState::Unhealthy {
            return None;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= unhealthy_threshold.max(1) {
            self.consecutive_failures.store(0, Ordering::Release);
            self.state.store(HealthState::Unhealthy as u8, Ordering::Release);
            return Some(HealthState::Unhealthy);
        }
        None
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}
