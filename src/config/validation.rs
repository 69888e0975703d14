//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check instance identity and URLs
//! - Validate value ranges (timeouts > 0, multiplier >= 1)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: UpstreamConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use url::Url;

use crate::config::schema::UpstreamConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &UpstreamConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for (i, instance) in config.instances.iter().enumerate() {
        let field = format!("instances[{}]", i);
        if instance.id.trim().is_empty() {
            errors.push(ValidationError::new(format!("{}.id", field), "must not be empty"));
        } else if !seen.insert(instance.id.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.id", field),
                format!("duplicate instance id '{}'", instance.id),
            ));
        }
        if let Err(e) = Url::parse(&instance.base_url) {
            errors.push(ValidationError::new(format!("{}.base_url", field), e.to_string()));
        }
        if let Some(health_url) = &instance.health_url {
            if let Err(e) = Url::parse(health_url) {
                errors.push(ValidationError::new(format!("{}.health_url", field), e.to_string()));
            }
        }
        if instance.weight == 0 {
            errors.push(ValidationError::new(format!("{}.weight", field), "must be at least 1"));
        }
    }

    let breaker = &config.circuit_breaker;
    if breaker.max_failures == 0 {
        errors.push(ValidationError::new("circuit_breaker.max_failures", "must be at least 1"));
    }
    if breaker.timeout_ms == 0 {
        errors.push(ValidationError::new("circuit_breaker.timeout_ms", "must be greater than 0"));
    }
    if breaker.notification_queue == 0 {
        errors.push(ValidationError::new("circuit_breaker.notification_queue", "must be at least 1"));
    }

    let retries = &config.retries;
    if !retries.backoff_multiplier.is_finite() || retries.backoff_multiplier < 1.0 {
        errors.push(ValidationError::new("retries.backoff_multiplier", "must be a finite value >= 1.0"));
    }
    if retries.max_delay_ms < retries.initial_delay_ms {
        errors.push(ValidationError::new(
            "retries.max_delay_ms",
            "must not be smaller than retries.initial_delay_ms",
        ));
    }

    let health = &config.health_check;
    if health.enabled {
        if health.interval_ms == 0 {
            errors.push(ValidationError::new("health_check.interval_ms", "must be greater than 0"));
        }
        if health.timeout_ms == 0 {
            errors.push(ValidationError::new("health_check.timeout_ms", "must be greater than 0"));
        }
        if health.unhealthy_threshold == 0 {
            errors.push(ValidationError::new("health_check.unhealthy_threshold", "must be at least 1"));
        }
        if health.healthy_threshold == 0 {
            errors.push(ValidationError::new("health_check.healthy_threshold", "must be at least 1"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
