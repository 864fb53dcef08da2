//! Sound and Track Instances
//!
//! Runtime state of one playing sound: one [`TrackInstance`] per track,
//! each with its event slots, RPC outputs, values written by SetValue
//! events and its current/upcoming wave.

use rand::Rng;

use crate::catalog::{FilterKind, SoundDef, TrackDef};
use crate::event::{
    EffectVariation, EquationOp, EquationValue, EventKind, StopEvent, ValueCurve, ValueRange, ValueTarget,
};
use crate::handle::WaveHandle;
use crate::mixer::{FilterParams, VoiceParams};
use crate::rpc::{RpcCombineRules, RpcOutputs, cents_to_frequency_ratio, decibel_to_amplitude, decibel_to_amplitude_with_floor};
use crate::scheduler::EventInstance;
use crate::variation::VariationState;

/// Default Q when only an RPC curve asks for filtering
const DEFAULT_FILTER_Q: f32 = 1.0;

// ═══════════════════════════════════════════════════════════════════════════════
// VALUES
// ═══════════════════════════════════════════════════════════════════════════════

/// Values written by SetValue events
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EventValues {
    pub volume_db: f32,
    pub pitch_cents: f32,
    pub filter_frequency: Option<f32>,
    pub filter_q: Option<f32>,
}

impl EventValues {
    pub fn get(&self, target: ValueTarget) -> f32 {
        match target {
            ValueTarget::Volume => self.volume_db,
            ValueTarget::Pitch => self.pitch_cents,
            ValueTarget::FilterFrequency => self.filter_frequency.unwrap_or(0.0),
            ValueTarget::FilterQ => self.filter_q.unwrap_or(0.0),
        }
    }

    pub fn set(&mut self, target: ValueTarget, value: f32) {
        match target {
            ValueTarget::Volume => self.volume_db = value,
            ValueTarget::Pitch => self.pitch_cents = value,
            ValueTarget::FilterFrequency => self.filter_frequency = Some(value),
            ValueTarget::FilterQ => self.filter_q = Some(value),
        }
    }
}

/// Random offsets drawn from a PlayWave effect variation
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EffectOffsets {
    pub pitch_cents: f32,
    pub volume_db: f32,
    pub filter_frequency: f32,
    pub filter_q: f32,
}

fn draw(range: Option<ValueRange>, rng: &mut impl Rng) -> f32 {
    match range {
        Some(r) if r.max > r.min => rng.random_range(r.min..=r.max),
        Some(r) => r.min,
        None => 0.0,
    }
}

impl EffectOffsets {
    pub fn draw(effect: &EffectVariation, rng: &mut impl Rng) -> Self {
        Self {
            pitch_cents: draw(effect.pitch_cents, rng),
            volume_db: draw(effect.volume_db, rng),
            filter_frequency: draw(effect.filter_frequency, rng),
            filter_q: draw(effect.filter_q, rng),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRACK INSTANCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Something a fired event asks the cue to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackAction {
    /// Start (or queue) a wave for event `event`
    PlayWave { event: usize },
    Marker { marker: u32 },
    Stop(StopEvent),
}

/// Wave currently driven by a PlayWave event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveWave {
    pub handle: WaveHandle,
    /// PlayWave event that started it
    pub event: usize,
}

/// Runtime state of one track
#[derive(Debug, Clone)]
pub struct TrackInstance {
    pub events: Vec<EventInstance>,
    /// Sound + track RPC outputs, refreshed every tick
    pub rpc: RpcOutputs,
    pub values: EventValues,
    pub effect: EffectOffsets,
    pub wave: Option<ActiveWave>,
    /// Prepared next wave of a looping track variation
    pub upcoming: Option<ActiveWave>,
    /// Track-variation iterations still to play ([`crate::event::LOOP_INFINITE`] = forever)
    pub variation_loops: u8,
    /// Per-event track variation state
    pub variations: Vec<VariationState>,
    pub position: u16,
    pub angle: u16,
    /// Stopped by a Stop event or teardown; no more events fire
    pub stopped: bool,
}

impl TrackInstance {
    pub fn new(def: &TrackDef, rng: &mut impl Rng) -> Self {
        Self {
            events: def.events.iter().map(|e| EventInstance::new(e, rng)).collect(),
            rpc: RpcOutputs::default(),
            values: EventValues::default(),
            effect: EffectOffsets::default(),
            wave: None,
            upcoming: None,
            variation_loops: 0,
            variations: def
                .events
                .iter()
                .map(|e| match &e.kind {
                    EventKind::PlayWave(p) => VariationState::new(p.waves().len()),
                    _ => VariationState::default(),
                })
                .collect(),
            position: 0,
            angle: 0,
            stopped: false,
        }
    }

    /// True once nothing more can happen on this track
    pub fn is_done(&self) -> bool {
        let idle = self.wave.is_none() && self.upcoming.is_none();
        idle && (self.stopped || self.events.iter().all(|e| e.finished && e.ramp_start_ms.is_none()))
    }

    /// Fire every due event at track time `elapsed_ms` and advance running ramps
    pub fn advance(&mut self, def: &TrackDef, elapsed_ms: u64, rng: &mut impl Rng) -> Vec<TrackAction> {
        let mut actions = Vec::new();
        if self.stopped {
            return actions;
        }

        for (index, (event, inst)) in def.events.iter().zip(self.events.iter_mut()).enumerate() {
            if let EventKind::SetValue(set) = &event.kind {
                if let Some(value) = inst.ramp_value(&set.curve, elapsed_ms) {
                    self.values.set(set.target, value);
                }
            }

            while inst.is_due(elapsed_ms) {
                let fired_at = inst.fire_at_ms;
                match &event.kind {
                    EventKind::SetValue(set) => match set.curve {
                        ValueCurve::Ramp { .. } => {
                            inst.ramp_start_ms = Some(fired_at);
                            if let Some(value) = inst.ramp_value(&set.curve, elapsed_ms) {
                                self.values.set(set.target, value);
                            }
                        }
                        ValueCurve::Equation { op, value } => {
                            let operand = match value {
                                EquationValue::Fixed(v) => v,
                                EquationValue::Random { min, max } if max > min => rng.random_range(min..=max),
                                EquationValue::Random { min, .. } => min,
                            };
                            let value = match op {
                                EquationOp::Absolute => operand,
                                EquationOp::Relative => self.values.get(set.target) + operand,
                            };
                            inst.value = value;
                            self.values.set(set.target, value);
                        }
                    },
                    EventKind::PlayWave(_) => actions.push(TrackAction::PlayWave { event: index }),
                    EventKind::Marker(marker) => actions.push(TrackAction::Marker { marker: marker.marker }),
                    EventKind::Stop(stop) => actions.push(TrackAction::Stop(*stop)),
                }
                inst.on_fired(event, rng);
            }
        }
        actions
    }

    /// Every wave this track holds (current first)
    pub fn waves(&self) -> impl Iterator<Item = WaveHandle> + '_ {
        self.wave.iter().chain(self.upcoming.iter()).map(|w| w.handle)
    }

    /// Voice parameters for this track's wave
    pub fn voice_params(
        &self,
        sound: &SoundDef,
        track: &TrackDef,
        gain: f32,
        rules: &RpcCombineRules,
        floor_db: f32,
    ) -> VoiceParams {
        let volume_db = sound.volume_db
            + track.volume_db
            + self.rpc.volume_db()
            + self.values.volume_db
            + self.effect.volume_db;
        let pitch_cents = sound.pitch_cents + self.rpc.pitch_cents() + self.values.pitch_cents + self.effect.pitch_cents;

        let wants_filter = track.filter.is_some()
            || self.rpc.filter_frequency.is_some()
            || self.values.filter_frequency.is_some();
        let filter = wants_filter.then(|| {
            let (kind, base_frequency, base_q) = track
                .filter
                .map_or((FilterKind::LowPass, f32::MAX, DEFAULT_FILTER_Q), |f| (f.kind, f.frequency_hz, f.q));
            let frequency = self.values.filter_frequency.unwrap_or(base_frequency) + self.effect.filter_frequency;
            let q = self.values.filter_q.unwrap_or(base_q) + self.effect.filter_q;
            FilterParams {
                kind,
                frequency_hz: match self.rpc.filter_frequency {
                    Some(rpc) => rules.filter_frequency.combine(Some(frequency), rpc),
                    None => frequency,
                },
                q: match self.rpc.filter_q {
                    Some(rpc) => rules.filter_q.combine(Some(q), rpc),
                    None => q,
                },
            }
        });

        VoiceParams {
            volume: decibel_to_amplitude_with_floor(volume_db, floor_db) * gain,
            frequency_ratio: cents_to_frequency_ratio(pitch_cents),
            filter,
            reverb_send: self.rpc.reverb_send_db.map_or(0.0, decibel_to_amplitude),
            position: self.position,
            angle: self.angle,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOUND INSTANCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Runtime state of one playing sound
#[derive(Debug, Clone)]
pub struct SoundInstance {
    /// Index into the bank's sounds
    pub sound: usize,
    pub tracks: Vec<TrackInstance>,
    /// Loudest voice volume pushed last tick
    pub last_volume: f32,
}

impl SoundInstance {
    pub fn new(sound: usize, def: &SoundDef, rng: &mut impl Rng) -> Self {
        Self {
            sound,
            tracks: def.tracks.iter().map(|t| TrackInstance::new(t, rng)).collect(),
            last_volume: 0.0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.tracks.iter().all(|t| t.is_done())
    }

    pub fn waves(&self) -> impl Iterator<Item = WaveHandle> + '_ {
        self.tracks.iter().flat_map(|t| t.waves())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FilterDef;
    use crate::event::{EventDef, MarkerEvent, PlayWaveEvent, SetValueEvent, WaveRef};
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(3)
    }

    #[test]
    fn test_events_fire_in_time() {
        let def = TrackDef::new()
            .with_event(EventDef::new(0, EventKind::PlayWave(PlayWaveEvent::simple(WaveRef::new(0, 0)))))
            .with_event(EventDef::new(100, EventKind::Marker(MarkerEvent::new(5))))
            .with_event(EventDef::new(200, EventKind::Stop(StopEvent::default())));
        let mut rng = rng();
        let mut track = TrackInstance::new(&def, &mut rng);

        assert_eq!(track.advance(&def, 0, &mut rng), vec![TrackAction::PlayWave { event: 0 }]);
        assert!(track.advance(&def, 50, &mut rng).is_empty());
        assert_eq!(track.advance(&def, 150, &mut rng), vec![TrackAction::Marker { marker: 5 }]);
        assert_eq!(track.advance(&def, 200, &mut rng), vec![TrackAction::Stop(StopEvent::default())]);
        assert!(track.is_done());
    }

    #[test]
    fn test_set_value_ramp_and_relative() {
        let def = TrackDef::new()
            .with_event(EventDef::new(
                0,
                EventKind::SetValue(SetValueEvent::ramp(ValueTarget::Volume, -12.0, 12.0, 0.0, 1000)),
            ))
            .with_event(EventDef::new(
                0,
                EventKind::SetValue(SetValueEvent::equation(
                    ValueTarget::Pitch,
                    EquationOp::Relative,
                    EquationValue::Fixed(100.0),
                )),
            ));
        let mut rng = rng();
        let mut track = TrackInstance::new(&def, &mut rng);

        track.advance(&def, 0, &mut rng);
        assert_eq!(track.values.volume_db, -12.0);
        assert_eq!(track.values.pitch_cents, 100.0);

        track.advance(&def, 500, &mut rng);
        assert_abs_diff_eq!(track.values.volume_db, -6.0, epsilon = 0.0001);
        track.advance(&def, 3000, &mut rng);
        assert_abs_diff_eq!(track.values.volume_db, 0.0, epsilon = 0.0001);
        assert!(track.is_done());
    }

    #[test]
    fn test_voice_params() {
        let sound = SoundDef::new(0).with_volume_db(-6.0).with_pitch_cents(1200.0);
        let track = TrackDef::new().with_filter(FilterDef {
            kind: FilterKind::HighPass,
            frequency_hz: 1000.0,
            q: 0.7,
        });
        let mut inst = TrackInstance::new(&track, &mut rng());
        inst.rpc.filter_frequency = Some(500.0);

        let params = inst.voice_params(&sound, &track, 0.5, &RpcCombineRules::default(), -96.0);
        assert_abs_diff_eq!(params.volume, 0.5012 * 0.5, epsilon = 0.001);
        assert_abs_diff_eq!(params.frequency_ratio, 2.0, epsilon = 0.0001);
        let filter = params.filter.unwrap();
        assert_eq!(filter.kind, FilterKind::HighPass);
        assert_eq!(filter.frequency_hz, 500.0);
        assert_eq!(params.reverb_send, 0.0);

        let silent = SoundDef::new(0).with_volume_db(-120.0);
        assert_eq!(inst.voice_params(&silent, &track, 1.0, &RpcCombineRules::default(), -96.0).volume, 0.0);
    }

    #[test]
    fn test_effect_offsets() {
        let effect = EffectVariation {
            pitch_cents: Some(ValueRange::new(-100.0, 100.0)),
            volume_db: Some(ValueRange::new(-3.0, -3.0)),
            ..EffectVariation::default()
        };
        let mut rng = rng();
        for _ in 0..50 {
            let offsets = EffectOffsets::draw(&effect, &mut rng);
            assert!((-100.0..=100.0).contains(&offsets.pitch_cents));
            assert_eq!(offsets.volume_db, -3.0);
            assert_eq!(offsets.filter_q, 0.0);
        }
    }
}
