//! Configuration file watcher for hot reload.
//!
//! Editors usually replace a file by rename, which drops a watch placed on
//! the file itself, so the parent directory is watched and events are
//! filtered by file name.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::TrustConfig;

/// Monitors the configuration file and emits validated replacements.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<TrustConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<TrustConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let directory = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name: Option<OsString> = self.path.file_name().map(|n| n.to_os_string());
        let path = self.path.clone();
        let tx = self.update_tx;

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let relevant = (event.kind.is_modify() || event.kind.is_create())
                        && event
                            .paths
                            .iter()
                            .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if !relevant {
                        return;
                    }
                    match load_config(&path) {
                        Ok(config) => {
                            tracing::info!(path = %path.display(), "configuration change detected");
                            if tx.send(config).is_err() {
                                tracing::debug!("configuration receiver dropped");
                            }
                        }
                        Err(e) => {
                            tracing::error!(
                                path = %path.display(),
                                error = %e,
                                "rejected configuration reload, keeping current policy"
                            );
                        }
                    }
                }
                Err(e) => tracing::error!(error = %e, "configuration watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&directory, RecursiveMode::NonRecursive)?;
        tracing::info!(path = %self.path.display(), "configuration watcher started");
        Ok(watcher)
    }
}
