//! Control thread of the standalone daemon.
//!
//! # Responsibilities
//! - Apply configuration documents pushed by clients (`setptree`)
//! - Answer clients waiting for the live document (`getptree`)
//! - Apply config file reloads; restart the server on a port change
//! - Restart the server when its loop exits unexpectedly
//!
//! An embedding multiplexer runs the same calls from its own main loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::config::MgmtConfig;
use crate::control::ConfigDocument;
use crate::server::ManagementServer;

/// Polling period of the control loop.
pub const TICK: Duration = Duration::from_millis(100);

/// Minimum spacing between two automatic restarts.
const RESTART_INTERVAL: Duration = Duration::from_secs(5);

pub struct Supervisor {
    server: Arc<ManagementServer>,
    live: ConfigDocument,
    config: MgmtConfig,
    updates: Option<mpsc::UnboundedReceiver<MgmtConfig>>,
    port_override: Option<u16>,
    last_restart: Option<Instant>,
    restart: Option<JoinHandle<()>>,
}

impl Supervisor {
    pub fn new(server: Arc<ManagementServer>, live: ConfigDocument, config: MgmtConfig) -> Self {
        Self {
            server,
            live,
            config,
            updates: None,
            port_override: None,
            last_restart: None,
            restart: None,
        }
    }

    /// Receive validated configuration reloads from a watcher.
    pub fn with_updates(mut self, updates: mpsc::UnboundedReceiver<MgmtConfig>) -> Self {
        self.updates = Some(updates);
        self
    }

    /// Keep this port regardless of what reloaded configs say.
    pub fn with_port_override(mut self, port: Option<u16>) -> Self {
        self.port_override = port;
        self
    }

    /// The multiplexer's live configuration document.
    pub fn live_document(&self) -> &ConfigDocument {
        &self.live
    }

    /// Run until `stop` is set.
    pub fn run(mut self, stop: Arc<AtomicBool>) {
        tracing::info!("Control loop started");
        while !stop.load(Ordering::SeqCst) {
            self.tick();
            std::thread::sleep(TICK);
        }
        if let Some(restart) = self.restart.take() {
            let _ = restart.join();
        }
        tracing::info!("Control loop stopped");
    }

    /// One pass of the control loop.
    pub fn tick(&mut self) {
        self.apply_reloads();

        let channel = Arc::clone(self.server.channel());
        if let Some(document) = channel.consume_pushed() {
            tracing::info!("Applying configuration document pushed by client");
            self.live = document;
        }
        if channel.has_pending_request() {
            channel.publish(self.live.clone());
        }

        if self.server.is_faulted() && self.restart_idle() {
            let due = self
                .last_restart
                .map_or(true, |at| at.elapsed() >= RESTART_INTERVAL);
            if due {
                tracing::warn!("MGMT server loop is down, restarting");
                self.spawn_restart();
            }
        }
    }

    fn apply_reloads(&mut self) {
        let Some(updates) = self.updates.as_mut() else {
            return;
        };
        let mut latest = None;
        while let Ok(config) = updates.try_recv() {
            latest = Some(config);
        }
        let Some(mut config) = latest else {
            return;
        };

        if let Some(port) = self.port_override {
            config.server.port = port;
        }
        if config.inputs != self.config.inputs {
            tracing::warn!("Input threshold changes take effect after a process restart");
        }
        if self.server.update_config(config.server.clone()) {
            tracing::info!(port = config.server.port, "MGMT port changed, restarting server");
            self.spawn_restart();
        }
        self.config = config;
    }

    fn restart_idle(&self) -> bool {
        self.restart.as_ref().map_or(true, JoinHandle::is_finished)
    }

    fn spawn_restart(&mut self) {
        self.last_restart = Some(Instant::now());
        match self.server.restart() {
            Ok(handle) => self.restart = Some(handle),
            Err(e) => tracing::error!(error = %e, "Failed to spawn MGMT restart"),
        }
    }
}
