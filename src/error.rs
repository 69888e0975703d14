//! Error taxonomy for upstream calls.
//!
//! # Classification
//! - `CircuitOpen`: fast-fail, never retried, never re-counted by a breaker
//! - `NoHealthyInstance`: nothing eligible, surfaced immediately
//! - `Transient`: timeouts, resets, 5xx-equivalents; retryable
//! - `Permanent`: 4xx-equivalents; not retried, still a breaker failure
//! - `Canceled` / `DeadlineExceeded`: the caller's context ended

use std::fmt::Display;
use thiserror::Error;

/// Errors produced by the upstream-client layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// The instance's circuit breaker rejected the call.
    #[error("circuit open for instance {instance}")]
    CircuitOpen { instance: String },

    /// No instance is both healthy and admitting calls.
    #[error("no healthy instance available")]
    NoHealthyInstance,

    /// Retryable failure reported by the operation.
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// Failure that retrying cannot fix.
    #[error("permanent upstream failure: {0}")]
    Permanent(String),

    /// The call context was canceled.
    #[error("call canceled")]
    Canceled,

    /// The call context deadline passed.
    #[error("call deadline exceeded")]
    DeadlineExceeded,

    /// Terminal error decorated with the instance that served the call.
    #[error("instance {instance}: {source}")]
    AtInstance {
        instance: String,
        #[source]
        source: Box<UpstreamError>,
    },

    /// Invalid construction parameters.
    #[error("configuration error: {0}")]
    Config(String),
}

impl UpstreamError {
    /// Build a retryable error from any displayable cause.
    pub fn transient(cause: impl Display) -> Self {
        Self::Transient(cause.to_string())
    }

    /// Build a non-retryable error from any displayable cause.
    pub fn permanent(cause: impl Display) -> Self {
        Self::Permanent(cause.to_string())
    }

    /// Strip instance decoration.
    pub fn root(&self) -> &UpstreamError {
        match self {
            Self::AtInstance { source, .. } => source.root(),
            other => other,
        }
    }

    /// Instance that served the call, if decorated.
    pub fn instance(&self) -> Option<&str> {
        match self {
            Self::AtInstance { instance, .. } => Some(instance),
            Self::CircuitOpen { instance } => Some(instance),
            _ => None,
        }
    }

    /// Default retry classification: only transient faults are retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self.root(), Self::Transient(_))
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self.root(), Self::Canceled | Self::DeadlineExceeded)
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self.root(), Self::CircuitOpen { .. })
    }

    /// Wrap with the serving instance id. Already-decorated errors are left alone.
    pub(crate) fn at_instance(self, instance: &str) -> Self {
        match self {
            decorated @ Self::AtInstance { .. } => decorated,
            other => Self::AtInstance {
                instance: instance.to_string(),
                source: Box::new(other),
            },
        }
    }
}

/// Result type for upstream operations.
pub type UpstreamResult<T> = Result<T, UpstreamError>;
