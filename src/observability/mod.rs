//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout log sink
//!     → optional Prometheus scrape endpoint
//! ```

pub mod logging;
pub mod metrics;
