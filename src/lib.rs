//! Monitoring and control endpoint for a broadcast multiplexer.
//!
//! A loopback TCP service that lists registered audio inputs, serves their
//! statistics and health state, and exchanges the live configuration
//! document with the multiplexer's control thread.

pub mod config;
pub mod control;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod server;
pub mod stats;

pub use config::MgmtConfig;
pub use control::{ConfigChannel, ConfigDocument};
pub use lifecycle::Shutdown;
pub use server::{ManagementServer, ServerState};
pub use stats::{InputStat, InputState, StatRegistry};
