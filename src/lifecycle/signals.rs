//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for the interrupt signal
//! - Let the binary translate it into a `Shutdown` trigger
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Config reload comes from file watching, not SIGHUP

/// Resolve on Ctrl+C.
pub async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received, shutting down");
    Ok(())
}

