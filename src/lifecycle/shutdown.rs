//! Shutdown coordination for background tasks.

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
#[derive(Debug, Clone)]
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Get the number of active subscribers (tasks still running).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Trigger, then wait up to `grace` for `tasks` to finish.
    /// Returns how many tasks were still running at the deadline.
    pub async fn drain(&self, tasks: Vec<JoinHandle<()>>, grace: Duration) -> usize {
        self.trigger();

        let deadline = tokio::time::Instant::now() + grace;
        let mut abandoned = 0;
        for task in tasks {
            match tokio::time::timeout_at(deadline, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Background task failed during shutdown"),
                Err(_) => abandoned += 1,
            }
        }

        if abandoned > 0 {
            tracing::warn!(abandoned, grace = ?grace, "Shutdown deadline reached");
        }
        abandoned
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
