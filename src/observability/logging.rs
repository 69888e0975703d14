//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global subscriber once
//! - Pick the log level from the environment, then configuration
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - `RUST_LOG` always wins over the configured level

use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::schema::{LogFormat, ObservabilityConfig};

static INIT: Once = Once::new();

/// Install the global subscriber. Later calls are no-ops.
pub fn init(config: &ObservabilityConfig) {
    INIT.call_once(|| {
        let filter = build_filter(config);
        let registry = tracing_subscriber::registry().with(filter);

        // try_init: an embedding application may already own the global subscriber.
        let installed = match config.log_format {
            LogFormat::Json => registry
                .with(fmt::layer().json().with_current_span(true))
                .try_init(),
            LogFormat::Pretty => registry
                .with(fmt::layer().with_target(true))
                .try_init(),
        };

        if installed.is_ok() {
            tracing::info!(level = %config.log_level, format = ?config.log_format, "Logging initialized");
        }
    });
}

fn build_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
