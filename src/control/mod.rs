//! Configuration document control plane.
//!
//! # Data Flow
//! ```text
//! Management client ──setptree──▶ channel.rs ──consume_pushed──▶ control thread
//! Management client ◀─getptree── channel.rs ◀──────publish────── control thread
//! ```

pub mod channel;
pub mod document;

pub use channel::{ChannelError, ConfigChannel, PendingDocument};
pub use document::{ConfigDocument, DocumentError};
