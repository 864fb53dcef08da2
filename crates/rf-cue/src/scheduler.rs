//! Event Scheduler
//!
//! One [`EventInstance`] per event per playing track. An instance is armed
//! at `timestamp + jitter`, fires once the track's elapsed time reaches it,
//! and repeatable kinds re-arm `frequency + new jitter` after each fire
//! until their repeat count is spent.

use rand::Rng;

use crate::event::{EventDef, ValueCurve};

/// Random jitter in `0..=window_ms`
#[inline]
pub fn jitter(window_ms: u32, rng: &mut impl Rng) -> u64 {
    if window_ms == 0 {
        0
    } else {
        rng.random_range(0..=window_ms) as u64
    }
}

/// Runtime state of one event on one track
#[derive(Debug, Clone, PartialEq)]
pub struct EventInstance {
    /// Next fire time, relative to track start
    pub fire_at_ms: u64,
    /// Times fired so far
    pub fire_count: u32,
    /// No more fires
    pub finished: bool,
    /// Last value written (SetValue)
    pub value: f32,
    /// Track time of the most recent fire, while a ramp is running
    pub ramp_start_ms: Option<u64>,
}

impl EventInstance {
    pub fn new(def: &EventDef, rng: &mut impl Rng) -> Self {
        Self {
            fire_at_ms: def.timestamp_ms as u64 + jitter(def.random_offset_ms, rng),
            fire_count: 0,
            finished: false,
            value: 0.0,
            ramp_start_ms: None,
        }
    }

    #[inline]
    pub fn is_due(&self, elapsed_ms: u64) -> bool {
        !self.finished && elapsed_ms >= self.fire_at_ms
    }

    /// Record a fire and re-arm if repeats remain
    pub fn on_fired(&mut self, def: &EventDef, rng: &mut impl Rng) {
        self.fire_count += 1;
        match def.repeat() {
            Some(repeat) if repeat.is_infinite() || self.fire_count <= repeat.count as u32 => {
                self.fire_at_ms += repeat.frequency_ms.max(1) as u64 + jitter(def.random_offset_ms, rng);
            }
            _ => self.finished = true,
        }
    }

    /// Current ramp value, or `None` once the ramp has run its course
    /// (the final value is returned on the tick that crosses the end).
    pub fn ramp_value(&mut self, curve: &ValueCurve, elapsed_ms: u64) -> Option<f32> {
        let start = self.ramp_start_ms?;
        let since = elapsed_ms.saturating_sub(start);
        let value = curve.ramp_value(since)?;
        if let ValueCurve::Ramp { duration_ms, .. } = curve {
            if since >= *duration_ms as u64 {
                self.ramp_start_ms = None;
            }
        }
        self.value = value;
        Some(value)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
