//! Management server: restartable accept loop on its own thread.
//!
//! # State Machine
//! ```text
//! Stopped → Starting → Accepting ⇄ Handling → Stopping → Stopped
//!
//! restart(): (Accepting | Handling) → Stopping → Stopped → Starting → ...
//! ```
//!
//! # Design Decisions
//! - One OS thread per loop, hosting a current-thread Tokio runtime; the
//!   thread is replaced wholesale on restart
//! - At most one client is served at a time
//! - `stop()` cancels a blocked accept or session through a stop flag
//! - `faulted` is raised whenever the loop exits, for any reason

pub mod session;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use arc_swap::ArcSwap;
use thiserror::Error;
use crate::config::ServerConfig;
use crate::control::ConfigChannel;
use crate::lifecycle::shutdown::{Shutdown, StopListener};
use crate::net::connection::ConnectionId;
use crate::net::listener::{bind_loopback, Listener, ListenerError};
use crate::observability::metrics;
use crate::stats::StatRegistry;

use self::session::Session;

/// Pause after a failed accept before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("management server is already running")]
    AlreadyRunning,

    #[error("failed to spawn thread: {0}")]
    Spawn(std::io::Error),

    #[error("failed to build runtime: {0}")]
    Runtime(std::io::Error),
}

/// Lifecycle state of the accept loop.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped = 0,
    Starting = 1,
    Accepting = 2,
    Handling = 3,
    Stopping = 4,
}

impl From<u8> for ServerState {
    fn from(val: u8) -> Self {
        match val {
            1 => ServerState::Starting,
            2 => ServerState::Accepting,
            3 => ServerState::Handling,
            4 => ServerState::Stopping,
            _ => ServerState::Stopped,
        }
    }
}

/// Flags shared between the server handle and its loop thread.
#[derive(Debug, Default)]
struct ServerStatus {
    state: AtomicU8,
    running: AtomicBool,
    faulted: AtomicBool,
}

impl ServerStatus {
    fn set_state(&self, state: ServerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn state(&self) -> ServerState {
        ServerState::from(self.state.load(Ordering::SeqCst))
    }
}

struct Worker {
    shutdown: Shutdown,
    thread: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// Monitoring and control endpoint of the multiplexer.
pub struct ManagementServer {
    config: ArcSwap<ServerConfig>,
    registry: Arc<StatRegistry>,
    channel: Arc<ConfigChannel>,
    status: Arc<ServerStatus>,
    worker: Mutex<Option<Worker>>,
}

impl ManagementServer {
    pub fn new(
        config: ServerConfig,
        registry: Arc<StatRegistry>,
        channel: Arc<ConfigChannel>,
    ) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            registry,
            channel,
            status: Arc::new(ServerStatus::default()),
            worker: Mutex::new(None),
        }
    }

    /// Bind the configured port and start the accept loop.
    ///
    /// Returns the bound address (useful with port 0).
    pub fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut worker = self.worker();
        if let Some(existing) = worker.take() {
            if !existing.thread.is_finished() {
                *worker = Some(existing);
                return Err(ServerError::AlreadyRunning);
            }
            // The loop already exited on its own; reap it before rebinding.
            if existing.thread.join().is_err() {
                tracing::error!("MGMT server thread panicked");
            }
        }

        self.status.set_state(ServerState::Starting);
        let spawned = self.spawn_loop();
        match spawned {
            Ok(started) => {
                let addr = started.local_addr;
                *worker = Some(started);
                tracing::info!(address = %addr, "MGMT server started");
                Ok(addr)
            }
            Err(e) => {
                self.status.set_state(ServerState::Stopped);
                tracing::error!(error = %e, "MGMT server failed to start");
                Err(e)
            }
        }
    }

    fn spawn_loop(&self) -> Result<Worker, ServerError> {
        let config = self.config.load_full();
        let listener = bind_loopback(config.port)?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        let shutdown = Shutdown::new();
        let accept_loop = AcceptLoop {
            config,
            registry: Arc::clone(&self.registry),
            channel: Arc::clone(&self.channel),
            status: Arc::clone(&self.status),
            shutdown: shutdown.subscribe(),
        };

        // Open before the thread runs so a publish right after start() counts.
        self.status.running.store(true, Ordering::SeqCst);
        self.status.faulted.store(false, Ordering::SeqCst);
        self.channel.open();

        let thread = std::thread::Builder::new()
            .name("mgmt-server".into())
            .spawn(move || accept_loop.run(listener))
            .map_err(|e| {
                self.channel.close();
                self.status.running.store(false, Ordering::SeqCst);
                ServerError::Spawn(e)
            })?;

        Ok(Worker {
            shutdown,
            thread,
            local_addr,
        })
    }

    /// Interrupt the accept loop and wait for its thread to exit.
    pub fn stop(&self) {
        let worker = self.worker().take();
        let Some(worker) = worker else {
            tracing::debug!("MGMT server not running");
            return;
        };

        self.status.set_state(ServerState::Stopping);
        worker.shutdown.trigger();
        if worker.thread.join().is_err() {
            tracing::error!("MGMT server thread panicked");
        }
        tracing::info!(address = %worker.local_addr, "MGMT server stopped");
    }

    /// Stop the current loop (if any) and start a new one on a supervisory
    /// thread, picking up the current configuration.
    pub fn restart(self: &Arc<Self>) -> Result<JoinHandle<()>, ServerError> {
        let server = Arc::clone(self);
        std::thread::Builder::new()
            .name("mgmt-restart".into())
            .spawn(move || {
                metrics::record_server_restart();
                if server.local_addr().is_some() {
                    server.stop();
                }
                if let Err(e) = server.start() {
                    tracing::error!(error = %e, "MGMT server restart failed");
                }
            })
            .map_err(ServerError::Spawn)
    }

    /// Replace the server configuration used by the next start.
    ///
    /// Returns whether the listen port changed.
    pub fn update_config(&self, config: ServerConfig) -> bool {
        let previous = self.config.swap(Arc::new(config));
        previous.port != self.config.load().port
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.load_full()
    }

    /// Address of the active listener, if the loop is running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.worker().as_ref().map(|w| w.local_addr)
    }

    pub fn state(&self) -> ServerState {
        self.status.state()
    }

    pub fn is_running(&self) -> bool {
        self.status.running.load(Ordering::SeqCst)
    }

    /// Whether the accept loop has exited since it was last started.
    pub fn is_faulted(&self) -> bool {
        self.status.faulted.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &Arc<StatRegistry> {
        &self.registry
    }

    pub fn channel(&self) -> &Arc<ConfigChannel> {
        &self.channel
    }

    fn worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ManagementServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything the loop thread owns.
struct AcceptLoop {
    config: Arc<ServerConfig>,
    registry: Arc<StatRegistry>,
    channel: Arc<ConfigChannel>,
    status: Arc<ServerStatus>,
    shutdown: StopListener,
}

/// Marks the loop as exited even if it unwinds.
struct ExitGuard<'a> {
    status: &'a ServerStatus,
    channel: &'a ConfigChannel,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.channel.close();
        self.status.running.store(false, Ordering::SeqCst);
        self.status.faulted.store(true, Ordering::SeqCst);
        self.status.set_state(ServerState::Stopped);
        tracing::info!("MGMT server loop exited");
    }
}

impl AcceptLoop {
    fn run(self, listener: std::net::TcpListener) {
        let status = Arc::clone(&self.status);
        let channel = Arc::clone(&self.channel);
        let _exit = ExitGuard {
            status: &status,
            channel: &channel,
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ServerError::Runtime);

        let result = runtime.and_then(|rt| rt.block_on(self.accept_loop(listener)));
        if let Err(e) = result {
            tracing::error!(error = %e, "MGMT server loop failed");
        }
    }

    async fn accept_loop(mut self, listener: std::net::TcpListener) -> Result<(), ServerError> {
        let listener = Listener::from_std(listener)?;

        loop {
            self.status.set_state(ServerState::Accepting);
            tracing::debug!("MGMT: Waiting on connection");

            let accepted = tokio::select! {
                _ = self.shutdown.stopped() => break,
                accepted = listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!(error = %e, "MGMT: Error accepting connection");
                    metrics::record_session_error("accept");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            };

            self.status.set_state(ServerState::Handling);
            metrics::record_connection();

            let session = Session {
                id: ConnectionId::new(),
                peer,
                config: &self.config,
                registry: &self.registry,
                channel: &self.channel,
            };

            tokio::select! {
                _ = self.shutdown.stopped() => {
                    tracing::info!(connection_id = %session.id, "MGMT: Stop requested during session");
                    break;
                }
                result = session.run(stream) => {
                    if let Err(e) = result {
                        metrics::record_session_error(e.kind());
                        if e.is_client_side() {
                            tracing::warn!(connection_id = %session.id, error = %e, "MGMT session aborted");
                        } else {
                            tracing::error!(connection_id = %session.id, error = %e, "MGMT server caught error");
                        }
                    }
                }
            }
        }

        self.status.set_state(ServerState::Stopping);
        Ok(())
    }
}
