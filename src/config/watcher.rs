//! Hot reload of the configuration file.
//!
//! Editors often emit several events per save, and a save may not change
//! anything. Only a validated config that differs from the last one applied
//! is forwarded, along with a log line naming the sections that changed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::MgmtConfig;

/// Names of the top-level sections that differ between two configs.
pub fn changed_sections(old: &MgmtConfig, new: &MgmtConfig) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if old.server != new.server {
        changed.push("server");
    }
    if old.inputs != new.inputs {
        changed.push("inputs");
    }
    if old.observability != new.observability {
        changed.push("observability");
    }
    changed
}

/// Reloads the file and decides whether the result is worth forwarding.
struct Reloader {
    path: PathBuf,
    applied: MgmtConfig,
    update_tx: mpsc::UnboundedSender<MgmtConfig>,
}

impl Reloader {
    fn on_event(&mut self, event: Event) {
        if event.kind.is_modify() || event.kind.is_create() {
            self.reload();
        }
    }

    /// Returns whether a new config was forwarded.
    fn reload(&mut self) -> bool {
        let config = match load_config(&self.path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(path = ?self.path, error = %e, "Config reload rejected, keeping current configuration");
                return false;
            }
        };

        let changed = changed_sections(&self.applied, &config);
        if changed.is_empty() {
            tracing::debug!(path = ?self.path, "Config file saved without changes");
            return false;
        }
        if config.server.port != self.applied.server.port {
            tracing::info!(
                from = self.applied.server.port,
                to = config.server.port,
                "MGMT port change requested"
            );
        }
        tracing::info!(sections = ?changed, "Config reloaded");

        self.applied = config.clone();
        self.update_tx.send(config).is_ok()
    }
}

/// Watches the configuration file and forwards changed, validated configs.
pub struct ConfigWatcher {
    reloader: Reloader,
}

impl ConfigWatcher {
    /// `applied` is the config loaded from `path` at start-up.
    ///
    /// The receiver may be polled with `try_recv` from a plain thread.
    pub fn new(path: &Path, applied: MgmtConfig) -> (Self, mpsc::UnboundedReceiver<MgmtConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let reloader = Reloader {
            path: path.to_path_buf(),
            applied,
            update_tx,
        };
        (Self { reloader }, update_rx)
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.reloader.path.clone();
        let mut reloader = self.reloader;

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => reloader.on_event(event),
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "mux-mgmt-watch-{}-{}.toml",
            name,
            std::process::id()
        ));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn lists_changed_sections() {
        let old = MgmtConfig::default();
        let mut new = old.clone();
        assert!(changed_sections(&old, &new).is_empty());

        new.server.port = 13000;
        new.observability.log_level = "debug".into();
        assert_eq!(changed_sections(&old, &new), vec!["server", "observability"]);
    }

    #[test]
    fn unchanged_save_is_not_forwarded() {
        let path = temp_config("unchanged", "");
        let (watcher, mut rx) = ConfigWatcher::new(&path, MgmtConfig::default());
        let mut reloader = watcher.reloader;

        assert!(!reloader.reload());
        assert!(rx.try_recv().is_err());
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn changed_port_is_forwarded_once() {
        let path = temp_config("port", "[server]\nport = 13001\n");
        let (watcher, mut rx) = ConfigWatcher::new(&path, MgmtConfig::default());
        let mut reloader = watcher.reloader;

        assert!(reloader.reload());
        assert_eq!(rx.try_recv().unwrap().server.port, 13001);

        // A second event for the same save.
        assert!(!reloader.reload());
        assert!(rx.try_recv().is_err());
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn invalid_file_keeps_applied_config() {
        let path = temp_config("invalid", "[inputs]\nunstable_threshold = 0\n");
        let (watcher, mut rx) = ConfigWatcher::new(&path, MgmtConfig::default());
        let mut reloader = watcher.reloader;

        assert!(!reloader.reload());
        assert!(rx.try_recv().is_err());
        assert_eq!(reloader.applied, MgmtConfig::default());
        std::fs::remove_file(path).unwrap();
    }
}
