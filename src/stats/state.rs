//! Input health state machine.
//!
//! # States
//! - NoData: the buffer has stayed empty longer than the no-data timeout
//! - Unstable: too many underruns/overruns within the reset window
//! - Silent: audio is flowing but has been below the silence level for a while
//! - Streaming: none of the above
//!
//! # Evaluation Order
//! ```text
//! quiet for longer than reset window → forgive glitches
//! empty && empty for > nodata timeout → NoData
//! glitches >= unstable threshold      → Unstable
//! quiet peaks > silence count         → Silent
//! otherwise                           → Streaming
//! ```
//!
//! The classification is recomputed on every call; no transition history
//! is kept.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::InputConfig;

/// Full scale of a signed 16-bit sample.
pub const FULL_SCALE: f64 = i16::MAX as f64;

/// Level reported for a channel with no signal at all.
pub const SILENCE_FLOOR_DB: i32 = -90;

/// Convert a raw 16-bit-scale peak magnitude into rounded dBFS.
pub fn peak_to_db(peak: u16) -> i32 {
    if peak == 0 {
        return SILENCE_FLOOR_DB;
    }
    (20.0 * (f64::from(peak) / FULL_SCALE).log10()).round() as i32
}

/// Health classification of one input.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InputState {
    Unknown = 0,
    NoData = 1,
    Unstable = 2,
    #[serde(rename = "Silent")]
    Silence = 3,
    Streaming = 4,
}

impl InputState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputState::Unknown => "Unknown",
            InputState::NoData => "NoData",
            InputState::Unstable => "Unstable",
            InputState::Silence => "Silent",
            InputState::Streaming => "Streaming",
        }
    }
}

impl From<u8> for InputState {
    fn from(val: u8) -> Self {
        match val {
            1 => InputState::NoData,
            2 => InputState::Unstable,
            3 => InputState::Silence,
            4 => InputState::Streaming,
            _ => InputState::Unknown,
        }
    }
}

impl fmt::Display for InputState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds shared by every input of a registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateThresholds {
    pub counter_reset: Duration,
    pub nodata_timeout: Duration,
    pub unstable_threshold: u32,
    pub silence_count: u32,
    pub silence_level_db: i32,
}

impl Default for StateThresholds {
    fn default() -> Self {
        Self::from(&InputConfig::default())
    }
}

impl From<&InputConfig> for StateThresholds {
    fn from(config: &InputConfig) -> Self {
        Self {
            counter_reset: Duration::from_secs(config.counter_reset_secs),
            nodata_timeout: Duration::from_secs(config.nodata_timeout_secs),
            unstable_threshold: config.unstable_threshold,
            silence_count: config.silence_count,
            silence_level_db: config.silence_level_db,
        }
    }
}

/// Producer-driven counters over a sliding time window.
///
/// Rendering never resets these; only the producer and the reset window do.
#[derive(Debug, Clone)]
pub struct HealthWindow {
    pub glitch_counter: u32,
    pub silence_counter: u32,
    pub last_event: Instant,
    pub last_nonempty_buffer: Instant,
    pub buffer_empty: bool,
}

impl HealthWindow {
    pub fn new(now: Instant) -> Self {
        Self {
            glitch_counter: 0,
            silence_counter: 0,
            last_event: now,
            last_nonempty_buffer: now,
            buffer_empty: true,
        }
    }

    /// Classify the input at `now`. Forgives glitches after a quiet period.
    pub fn classify(&mut self, now: Instant, thresholds: &StateThresholds) -> InputState {
        if now.saturating_duration_since(self.last_event) > thresholds.counter_reset {
            self.glitch_counter = 0;
        }

        if self.buffer_empty
            && now.saturating_duration_since(self.last_nonempty_buffer) > thresholds.nodata_timeout
        {
            InputState::NoData
        } else if self.glitch_counter >= thresholds.unstable_threshold {
            InputState::Unstable
        } else if self.silence_counter > thresholds.silence_count {
            InputState::Silence
        } else {
            InputState::Streaming
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> StateThresholds {
        StateThresholds::default()
    }

    #[test]
    fn peak_conversion_endpoints() {
        assert_eq!(peak_to_db(0), -90);
        assert_eq!(peak_to_db(32767), 0);
        assert_eq!(peak_to_db(32768), 0);
        assert_eq!(peak_to_db(16384), -6);
    }

    #[test]
    fn peak_conversion_is_monotonic() {
        let mut last = peak_to_db(0);
        for peak in [1u16, 10, 100, 1000, 8000, 16384, 32767] {
            let db = peak_to_db(peak);
            assert!(db >= last, "{} dB for {} below {}", db, peak, last);
            last = db;
        }
    }

    #[test]
    fn state_names() {
        assert_eq!(InputState::Silence.to_string(), "Silent");
        assert_eq!(
            serde_json::to_string(&InputState::Silence).unwrap(),
            "\"Silent\""
        );
        assert_eq!(InputState::from(0), InputState::Unknown);
        assert_eq!(InputState::from(42), InputState::Unknown);
        assert_eq!(InputState::from(InputState::Streaming as u8), InputState::Streaming);
    }

    #[test]
    fn fresh_window_streams_until_nodata_timeout() {
        let start = Instant::now();
        let mut window = HealthWindow::new(start);
        let t = thresholds();

        assert_eq!(window.classify(start, &t), InputState::Streaming);
        let later = start + t.nodata_timeout + Duration::from_secs(1);
        assert_eq!(window.classify(later, &t), InputState::NoData);
    }

    #[test]
    fn nodata_takes_priority() {
        let start = Instant::now();
        let mut window = HealthWindow::new(start);
        let t = thresholds();
        window.glitch_counter = t.unstable_threshold + 5;
        window.silence_counter = t.silence_count + 5;

        let later = start + t.nodata_timeout + Duration::from_secs(1);
        assert_eq!(window.classify(later, &t), InputState::NoData);
    }

    #[test]
    fn unstable_beats_silence() {
        let start = Instant::now();
        let mut window = HealthWindow::new(start);
        let t = thresholds();
        window.buffer_empty = false;
        window.glitch_counter = t.unstable_threshold;
        window.silence_counter = t.silence_count + 1;

        assert_eq!(window.classify(start, &t), InputState::Unstable);
    }

    #[test]
    fn silence_needs_count_exceeded() {
        let start = Instant::now();
        let mut window = HealthWindow::new(start);
        let t = thresholds();
        window.buffer_empty = false;

        window.silence_counter = t.silence_count;
        assert_eq!(window.classify(start, &t), InputState::Streaming);

        window.silence_counter = t.silence_count + 1;
        assert_eq!(window.classify(start, &t), InputState::Silence);
    }

    #[test]
    fn glitches_forgiven_after_reset_window() {
        let start = Instant::now();
        let mut window = HealthWindow::new(start);
        let t = thresholds();
        window.buffer_empty = false;
        window.last_nonempty_buffer = start + t.counter_reset;
        window.glitch_counter = t.unstable_threshold;

        let later = start + t.counter_reset + Duration::from_secs(1);
        assert_eq!(window.classify(later, &t), InputState::Streaming);
        assert_eq!(window.glitch_counter, 0);
    }
}
