//! Instance-list hot reload.
//!
//! # Responsibilities
//! - Watch the config file's directory so editor rename-over saves are seen
//! - Coalesce bursts of file events into one reload
//! - Forward the instance list only when it differs from the last one applied
//!
//! # Design Decisions
//! - The notify callback only signals; loading happens on a Tokio task
//! - Invalid edits are logged and skipped, the current list stays live
//! - Only `instances` is forwarded; other sections apply on restart

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time;

use crate::config::loader::load_config;
use crate::config::schema::{InstanceConfig, UpstreamConfig};

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Watches the configuration file and emits changed instance lists.
pub struct ConfigWatcher {
    path: PathBuf,
    debounce: Duration,
    applied: Vec<InstanceConfig>,
    updates: mpsc::UnboundedSender<Vec<InstanceConfig>>,
}

impl ConfigWatcher {
    /// `current` is the configuration already in effect; reloads that leave
    /// its instance list untouched are not forwarded.
    pub fn new(path: &Path, current: &UpstreamConfig) -> (Self, mpsc::UnboundedReceiver<Vec<InstanceConfig>>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            debounce: DEFAULT_DEBOUNCE,
            applied: current.instances.clone(),
            updates,
        };
        (watcher, rx)
    }

    /// Quiet period after the last file event before reloading.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching. Must be called inside a Tokio runtime; the returned
    /// handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let file_name = self.path.file_name().map(|n| n.to_os_string());

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if touches_file(&event, file_name.as_ref()) => {
                    let _ = event_tx.send(());
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default(),
        )?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?self.path, debounce = ?self.debounce, "Config watcher started");

        tokio::spawn(reload_loop(self.path, self.debounce, event_rx, self.updates, self.applied));
        Ok(watcher)
    }
}

/// A write or create that names the watched file.
fn touches_file(event: &Event, file_name: Option<&OsString>) -> bool {
    if !(event.kind.is_modify() || event.kind.is_create()) {
        return false;
    }
    match file_name {
        Some(name) => event.paths.iter().any(|p| p.file_name() == Some(name.as_os_str())),
        None => false,
    }
}

async fn reload_loop(
    path: PathBuf,
    debounce: Duration,
    mut events: mpsc::UnboundedReceiver<()>,
    updates: mpsc::UnboundedSender<Vec<InstanceConfig>>,
    mut applied: Vec<InstanceConfig>,
) {
    while events.recv().await.is_some() {
        while let Ok(Some(())) = time::timeout(debounce, events.recv()).await {}

        match load_config(&path) {
            Ok(config) if config.instances == applied => {
                tracing::debug!(path = ?path, "Config file changed, instance list unchanged");
            }
            Ok(config) => {
                tracing::info!(path = ?path, instances = config.instances.len(), "Instance list change detected");
                applied = config.instances.clone();
                if updates.send(config.instances).is_err() {
                    tracing::debug!("Instance list receiver dropped, stopping reload loop");
                    break;
                }
            }
            Err(e) => {
                tracing::error!(path = ?path, error = %e, "Failed to reload config, keeping current instances");
            }
        }
    }
}
