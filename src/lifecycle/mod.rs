//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (binary):
//!     Load config → Validate → Registry + channel → Server start → Control thread
//!
//! Stop (shutdown.rs):
//!     trigger → accept loop and session wake up → loop exits → thread joined
//!
//! Control thread (supervisor.rs):
//!     pushed documents → live document → waiting clients
//!     config reloads → port change → server restart
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → stop control thread, then server
//! ```

pub mod shutdown;
pub mod signals;
pub mod supervisor;

pub use shutdown::{Shutdown, StopListener};
pub use signals::shutdown_signal;
pub use supervisor::Supervisor;
