//! Track Event Definitions
//!
//! Timestamped actions on a track timeline: play a wave, ramp or set a
//! value, post a marker, or stop. Payloads are a closed sum type so every
//! dispatch site matches exhaustively.

use serde::{Deserialize, Serialize};

use crate::variation::{VariationMode, WeightedChoice};

/// Loop count meaning "loop forever"
pub const LOOP_INFINITE: u8 = 255;

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT
// ═══════════════════════════════════════════════════════════════════════════════

/// One event on a track timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDef {
    /// Fire time relative to track start
    pub timestamp_ms: u32,
    /// Random jitter window added on arming (0..=random_offset_ms)
    #[serde(default)]
    pub random_offset_ms: u32,
    pub kind: EventKind,
}

impl EventDef {
    pub fn new(timestamp_ms: u32, kind: EventKind) -> Self {
        Self {
            timestamp_ms,
            random_offset_ms: 0,
            kind,
        }
    }

    pub fn with_random_offset(mut self, random_offset_ms: u32) -> Self {
        self.random_offset_ms = random_offset_ms;
        self
    }

    /// Repeat settings for repeatable kinds
    pub fn repeat(&self) -> Option<Repeat> {
        match &self.kind {
            EventKind::SetValue(v) => v.repeat,
            EventKind::Marker(m) => m.repeat,
            EventKind::Stop(_) | EventKind::PlayWave(_) => None,
        }
    }
}

/// Event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    Stop(StopEvent),
    PlayWave(PlayWaveEvent),
    SetValue(SetValueEvent),
    Marker(MarkerEvent),
}

/// Repeat settings (count 0 = repeat until the track stops)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repeat {
    pub count: u16,
    pub frequency_ms: u32,
}

impl Repeat {
    pub fn new(count: u16, frequency_ms: u32) -> Self {
        Self { count, frequency_ms }
    }

    #[inline]
    pub fn is_infinite(&self) -> bool {
        self.count == 0
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STOP
// ═══════════════════════════════════════════════════════════════════════════════

/// What a stop event stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopScope {
    /// Only the track carrying the event
    #[default]
    Track,
    /// The whole cue
    Cue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StopEvent {
    #[serde(default)]
    pub immediate: bool,
    #[serde(default)]
    pub scope: StopScope,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PLAY WAVE
// ═══════════════════════════════════════════════════════════════════════════════

/// Reference to a wave: index into the owning sound bank's wave-bank list
/// plus the entry index in that wave bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WaveRef {
    pub wave_bank: usize,
    pub wave: usize,
}

impl WaveRef {
    pub fn new(wave_bank: usize, wave: usize) -> Self {
        Self { wave_bank, wave }
    }
}

/// A wave candidate in a track variation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightedWave {
    pub wave: WaveRef,
    pub weight: u8,
}

impl WeightedChoice for WeightedWave {
    fn weight_range(&self) -> (f32, f32) {
        (0.0, self.weight as f32)
    }
}

/// Which wave(s) a PlayWave event can play
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrackVariation {
    Simple(WaveRef),
    /// Pick one wave per loop iteration
    Complex {
        mode: VariationMode,
        waves: Vec<WeightedWave>,
    },
}

/// Inclusive random range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f32,
    pub max: f32,
}

impl ValueRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }
}

/// Random offsets drawn when a wave starts
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EffectVariation {
    #[serde(default)]
    pub pitch_cents: Option<ValueRange>,
    #[serde(default)]
    pub volume_db: Option<ValueRange>,
    #[serde(default)]
    pub filter_frequency: Option<ValueRange>,
    #[serde(default)]
    pub filter_q: Option<ValueRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayWaveEvent {
    /// Extra plays after the first ([`LOOP_INFINITE`] = forever)
    #[serde(default)]
    pub loop_count: u8,
    /// Placement hints forwarded to the voice
    #[serde(default)]
    pub position: u16,
    #[serde(default)]
    pub angle: u16,
    pub variation: TrackVariation,
    #[serde(default)]
    pub effect_variation: Option<EffectVariation>,
}

impl PlayWaveEvent {
    pub fn simple(wave: WaveRef) -> Self {
        Self {
            loop_count: 0,
            position: 0,
            angle: 0,
            variation: TrackVariation::Simple(wave),
            effect_variation: None,
        }
    }

    pub fn complex(mode: VariationMode, waves: Vec<WeightedWave>) -> Self {
        Self {
            variation: TrackVariation::Complex { mode, waves },
            ..Self::simple(WaveRef::new(0, 0))
        }
    }

    pub fn with_loop_count(mut self, loop_count: u8) -> Self {
        self.loop_count = loop_count;
        self
    }

    pub fn with_effect_variation(mut self, effect: EffectVariation) -> Self {
        self.effect_variation = Some(effect);
        self
    }

    /// Every wave this event may play
    pub fn waves(&self) -> Vec<WaveRef> {
        match &self.variation {
            TrackVariation::Simple(wave) => vec![*wave],
            TrackVariation::Complex { waves, .. } => waves.iter().map(|w| w.wave).collect(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SET VALUE
// ═══════════════════════════════════════════════════════════════════════════════

/// Track value written by a SetValue event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueTarget {
    /// Cents
    Pitch,
    /// Decibels
    Volume,
    /// Hz
    FilterFrequency,
    FilterQ,
}

/// Equation operand
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EquationValue {
    Fixed(f32),
    Random { min: f32, max: f32 },
}

/// Whether an equation replaces or offsets the current value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EquationOp {
    #[default]
    Absolute,
    Relative,
}

/// Value shape of a SetValue event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ValueCurve {
    /// `initial + slope * t + 0.5 * slope_delta * t²` (t in seconds) for `duration_ms`
    Ramp {
        initial_value: f32,
        initial_slope: f32,
        slope_delta: f32,
        duration_ms: u32,
    },
    /// One-shot write
    Equation { op: EquationOp, value: EquationValue },
}

impl ValueCurve {
    /// Ramp value `elapsed_ms` after the ramp started (held after `duration_ms`)
    pub fn ramp_value(&self, elapsed_ms: u64) -> Option<f32> {
        match *self {
            ValueCurve::Ramp {
                initial_value,
                initial_slope,
                slope_delta,
                duration_ms,
            } => {
                let t = elapsed_ms.min(duration_ms as u64) as f32 / 1000.0;
                Some(initial_value + initial_slope * t + 0.5 * slope_delta * t * t)
            }
            ValueCurve::Equation { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SetValueEvent {
    pub target: ValueTarget,
    #[serde(default)]
    pub repeat: Option<Repeat>,
    pub curve: ValueCurve,
}

impl SetValueEvent {
    pub fn ramp(target: ValueTarget, initial_value: f32, initial_slope: f32, slope_delta: f32, duration_ms: u32) -> Self {
        Self {
            target,
            repeat: None,
            curve: ValueCurve::Ramp {
                initial_value,
                initial_slope,
                slope_delta,
                duration_ms,
            },
        }
    }

    pub fn equation(target: ValueTarget, op: EquationOp, value: EquationValue) -> Self {
        Self {
            target,
            repeat: None,
            curve: ValueCurve::Equation { op, value },
        }
    }

    pub fn with_repeat(mut self, count: u16, frequency_ms: u32) -> Self {
        self.repeat = Some(Repeat::new(count, frequency_ms));
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MARKER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerEvent {
    pub marker: u32,
    #[serde(default)]
    pub repeat: Option<Repeat>,
}

impl MarkerEvent {
    pub fn new(marker: u32) -> Self {
        Self { marker, repeat: None }
    }

    pub fn with_repeat(mut self, count: u16, frequency_ms: u32) -> Self {
        self.repeat = Some(Repeat::new(count, frequency_ms));
        self
    }
}
