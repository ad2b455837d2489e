//! Input statistics subsystem.
//!
//! # Data Flow
//! ```text
//! Input thread (one per audio input):
//!     → input.rs notify_* (buffer fill, peaks, underruns, overruns)
//!
//! Management server:
//!     → registry.rs render_* (registry lock)
//!         → input.rs render_* (input lock, read-and-clear)
//!         → state.rs classification
//! ```

pub mod input;
pub mod registry;
pub mod state;

pub use input::{InputStat, InputValues, StateReport, ValuesReport};
pub use registry::{ConfigListing, RegistryError, StatRegistry, StateListing, ValuesListing};
pub use state::{peak_to_db, InputState, StateThresholds};
