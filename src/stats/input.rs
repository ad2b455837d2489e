//! Per-input statistics holder.
//!
//! # Responsibilities
//! - Accumulate buffer fill, peak and glitch statistics from the input thread
//! - Render them for the management server (read-and-clear)
//! - Classify input health (see `state.rs`)
//! - Register into the shared registry and leave it again on drop
//!
//! # Design Decisions
//! - One mutex per input; the registry lock is always taken first
//! - The registry only holds weak references, so a dropped input can never
//!   be rendered even if its deregistration was skipped

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;

use crate::stats::registry::StatRegistry;
use crate::stats::state::{peak_to_db, HealthWindow, InputState, StateThresholds};

/// Statistics gathered since the last render.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Accumulators {
    min_fill: Option<usize>,
    max_fill: usize,
    peak_left: u16,
    peak_right: u16,
    underruns: u64,
    overruns: u64,
}

#[derive(Debug)]
struct Counters {
    acc: Accumulators,
    window: HealthWindow,
}

/// Rendered accumulator values of one input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputValues {
    /// Lowest buffer fill seen, `-1` when nothing was reported.
    pub min_fill: i64,
    pub max_fill: u64,
    /// Left channel peak in dBFS.
    pub peak_left: i32,
    /// Right channel peak in dBFS.
    pub peak_right: i32,
    pub num_underruns: u64,
    pub num_overruns: u64,
}

/// `{"inputstat": {...}}` as served by the `values` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValuesReport {
    pub inputstat: InputValues,
}

/// `{"state": "..."}` as served by the `state` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateReport {
    pub state: InputState,
}

/// Statistics and health state of one audio input.
///
/// Created by the input pipeline, which keeps the only strong handle.
#[derive(Debug)]
pub struct InputStat {
    name: String,
    registry: Arc<StatRegistry>,
    thresholds: StateThresholds,
    registered: AtomicBool,
    last_state: AtomicU8,
    inner: Mutex<Counters>,
}

impl InputStat {
    /// Create an input without registering it.
    pub fn new(registry: &Arc<StatRegistry>, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            registry: Arc::clone(registry),
            thresholds: registry.thresholds(),
            registered: AtomicBool::new(false),
            last_state: AtomicU8::new(InputState::Unknown as u8),
            inner: Mutex::new(Counters {
                acc: Accumulators::default(),
                window: HealthWindow::new(Instant::now()),
            }),
        })
    }

    /// Create an input and register it under `name`.
    ///
    /// A duplicate name leaves the new input usable but unregistered.
    pub fn register(registry: &Arc<StatRegistry>, name: impl Into<String>) -> Arc<Self> {
        let input = Self::new(registry, name);
        input.register_self();
        input
    }

    /// Insert this input into its registry. Returns whether it is now reachable.
    pub fn register_self(self: &Arc<Self>) -> bool {
        if self.registered.load(Ordering::SeqCst) {
            return true;
        }
        let ok = self.registry.register(self).is_ok();
        self.registered.store(ok, Ordering::SeqCst);
        ok
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Report the current buffer fill level.
    pub fn notify_buffer(&self, level: usize) {
        let mut counters = self.counters();
        let acc = &mut counters.acc;
        acc.min_fill = Some(acc.min_fill.map_or(level, |min| min.min(level)));
        acc.max_fill = acc.max_fill.max(level);

        if level > 0 {
            counters.window.buffer_empty = false;
            counters.window.last_nonempty_buffer = Instant::now();
        } else {
            counters.window.buffer_empty = true;
        }
    }

    /// Report the sample peaks of the latest audio block.
    pub fn notify_peak_levels(&self, left: i16, right: i16) {
        let left = left.unsigned_abs();
        let right = right.unsigned_abs();
        let silence_level_db = self.thresholds.silence_level_db;

        let mut counters = self.counters();
        counters.acc.peak_left = counters.acc.peak_left.max(left);
        counters.acc.peak_right = counters.acc.peak_right.max(right);

        if peak_to_db(left.max(right)) < silence_level_db {
            counters.window.silence_counter = counters.window.silence_counter.saturating_add(1);
        } else {
            counters.window.silence_counter = 0;
        }
    }

    pub fn notify_underrun(&self) {
        let mut counters = self.counters();
        counters.acc.underruns += 1;
        Self::record_glitch(&mut counters.window);
    }

    pub fn notify_overrun(&self) {
        let mut counters = self.counters();
        counters.acc.overruns += 1;
        Self::record_glitch(&mut counters.window);
    }

    fn record_glitch(window: &mut HealthWindow) {
        window.glitch_counter = window.glitch_counter.saturating_add(1);
        window.last_event = Instant::now();
    }

    /// Render the accumulators and reset them.
    pub fn render_values(&self) -> ValuesReport {
        let mut counters = self.counters();
        let acc = std::mem::take(&mut counters.acc);

        ValuesReport {
            inputstat: InputValues {
                min_fill: acc
                    .min_fill
                    .map_or(-1, |v| i64::try_from(v).unwrap_or(i64::MAX)),
                max_fill: acc.max_fill as u64,
                peak_left: peak_to_db(acc.peak_left),
                peak_right: peak_to_db(acc.peak_right),
                num_underruns: acc.underruns,
                num_overruns: acc.overruns,
            },
        }
    }

    /// Render the health state and reset the accumulators.
    pub fn render_state(&self) -> StateReport {
        self.render_state_at(Instant::now())
    }

    pub fn render_state_at(&self, now: Instant) -> StateReport {
        let state = self.evaluate(now, true);
        StateReport { state }
    }

    /// Classify the input without touching the accumulators.
    pub fn determine_state(&self) -> InputState {
        self.determine_state_at(Instant::now())
    }

    pub fn determine_state_at(&self, now: Instant) -> InputState {
        self.evaluate(now, false)
    }

    /// Last classification computed, without taking the input lock.
    pub fn last_state(&self) -> InputState {
        InputState::from(self.last_state.load(Ordering::Relaxed))
    }

    fn evaluate(&self, now: Instant, reset: bool) -> InputState {
        let state = match self.inner.lock() {
            Ok(mut counters) => {
                if reset {
                    counters.acc = Accumulators::default();
                }
                counters.window.classify(now, &self.thresholds)
            }
            Err(poisoned) => {
                tracing::error!(input = %self.name, "Input statistics lock poisoned");
                if reset {
                    let mut counters = poisoned.into_inner();
                    counters.acc = Accumulators::default();
                }
                InputState::Unknown
            }
        };
        self.last_state.store(state as u8, Ordering::Relaxed);
        state
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for InputStat {
    fn drop(&mut self) {
        if *self.registered.get_mut() {
            self.registry.unregister_instance(&self.name, self as *const InputStat);
        }
    }
}
