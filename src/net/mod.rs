//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection (127.0.0.1 only)
//!     → listener.rs (accept, one connection at a time)
//!     → connection.rs (connection id for tracing)
//!     → protocol.rs (banner, bounded line reads, command parsing)
//!     → Hand off to the server session
//! ```

pub mod connection;
pub mod listener;
pub mod protocol;
