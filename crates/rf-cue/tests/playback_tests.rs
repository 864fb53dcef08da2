//! Playback integration tests
//!
//! Drives a full engine against a recording mixer and a manual clock.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Cursor};
use std::sync::Arc;

use approx::assert_abs_diff_eq;
use parking_lot::Mutex;

use rf_cue::variable::reserved;
use rf_cue::*;

// ═══════════════════════════════════════════════════════════════════════════════
// RECORDING MIXER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct MixerLog {
    next_voice: VoiceId,
    formats: HashMap<VoiceId, WaveFormat>,
    queued: HashMap<VoiceId, VecDeque<AudioBuffer>>,
    submitted: HashMap<VoiceId, usize>,
    running: HashMap<VoiceId, bool>,
    destroyed: Vec<VoiceId>,
    params: HashMap<VoiceId, VoiceParams>,
    matrices: HashMap<VoiceId, Vec<f32>>,
    dsp: HashMap<(usize, usize), f32>,
}

impl MixerLog {
    fn live_voices(&self) -> Vec<VoiceId> {
        let mut voices: Vec<VoiceId> = self
            .formats
            .keys()
            .copied()
            .filter(|v| !self.destroyed.contains(v))
            .collect();
        voices.sort_unstable();
        voices
    }
}

#[derive(Clone, Default)]
struct RecordingMixer {
    log: Arc<Mutex<MixerLog>>,
}

impl Mixer for RecordingMixer {
    fn create_voice(&mut self, format: &WaveFormat) -> CueResult<VoiceId> {
        let mut log = self.log.lock();
        log.next_voice += 1;
        let voice = log.next_voice;
        log.formats.insert(voice, *format);
        Ok(voice)
    }

    fn destroy_voice(&mut self, voice: VoiceId) {
        let mut log = self.log.lock();
        log.queued.remove(&voice);
        log.destroyed.push(voice);
    }

    fn start_voice(&mut self, voice: VoiceId) {
        self.log.lock().running.insert(voice, true);
    }

    fn stop_voice(&mut self, voice: VoiceId) {
        self.log.lock().running.insert(voice, false);
    }

    fn exit_loop(&mut self, _voice: VoiceId) {}

    fn submit_buffer(&mut self, voice: VoiceId, buffer: AudioBuffer) -> CueResult<()> {
        let mut log = self.log.lock();
        *log.submitted.entry(voice).or_default() += 1;
        log.queued.entry(voice).or_default().push_back(buffer);
        Ok(())
    }

    fn set_voice_params(&mut self, voice: VoiceId, params: &VoiceParams) {
        self.log.lock().params.insert(voice, *params);
    }

    fn set_output_matrix(&mut self, voice: VoiceId, matrix: &[f32]) {
        self.log.lock().matrices.insert(voice, matrix.to_vec());
    }

    fn set_dsp_parameter(&mut self, preset: usize, parameter: usize, value: f32) {
        self.log.lock().dsp.insert((preset, parameter), value);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FIXTURES
// ═══════════════════════════════════════════════════════════════════════════════

const GLOBAL: usize = 0;
const MUSIC: usize = 1;
const SFX: usize = 2;
const AMBIENCE: usize = 3;
const VOICE: usize = 4;
const DIALOG: usize = 5;
const CROWD: usize = 6;

const DISTANCE: usize = 0;
const INTENSITY: usize = 1;
const INSTANCES: usize = 2;
const ROOM: usize = 3;

fn catalog() -> EngineCatalog {
    EngineCatalog {
        categories: vec![
            CategoryDef::new("Global"),
            CategoryDef::new("Music").with_parent(GLOBAL),
            CategoryDef::new("Sfx")
                .with_parent(GLOBAL)
                .with_limit(1, MaxInstanceBehavior::FailToPlay),
            CategoryDef::new("Ambience")
                .with_parent(GLOBAL)
                .with_limit(1, MaxInstanceBehavior::ReplaceOldest),
            CategoryDef::new("Voice").with_parent(GLOBAL).with_fades(200, 0),
            CategoryDef::new("Dialog")
                .with_parent(GLOBAL)
                .with_limit(2, MaxInstanceBehavior::ReplaceLowestPriority),
            CategoryDef::new("Crowd")
                .with_parent(GLOBAL)
                .with_limit(2, MaxInstanceBehavior::ReplaceQuietest),
        ],
        variables: vec![
            VariableDef::global("Distance", 0.0, 0.0, 100.0),
            VariableDef::cue_local("Intensity", 0.0, 0.0, 10.0),
            VariableDef::cue_local(reserved::NUM_CUE_INSTANCES, 0.0, 0.0, 64.0).with_access(VariableAccess::RESERVED),
            VariableDef::global("Room", 0.0, 0.0, 1.0),
        ],
        rpc_curves: vec![
            RpcCurve::new(1, DISTANCE, RpcParameter::Volume)
                .with_point(0.0, 0.0, CurveShape::Linear)
                .with_point(100.0, -20.0, CurveShape::Linear),
            RpcCurve::new(2, ROOM, RpcParameter::Dsp(0))
                .with_point(0.0, 0.0, CurveShape::Linear)
                .with_point(1.0, 2.0, CurveShape::Linear),
        ],
        dsp_presets: vec![DspPreset {
            code: 7,
            parameters: vec![DspParameter {
                value: 0.0,
                min: 0.0,
                max: 1.0,
            }],
        }],
    }
}

fn wave_bank() -> WaveBankDef {
    WaveBankDef::new("Waves")
        .with_entry(WaveEntry::new(0, 1024, WaveFormat::pcm16(2, 48000)))
        .with_entry(WaveEntry::new(1024, 1024, WaveFormat::pcm16(2, 44100)))
        .with_entry(WaveEntry::new(2048, 2048, WaveFormat::pcm16(1, 22050)))
        .with_entry(WaveEntry::new(4096, 0, WaveFormat::pcm16(1, 22050)))
}

/// Every read fails
struct FailingReader;

impl StreamReader for FailingReader {
    fn read_at(&mut self, _offset: u64, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::other("disk gone"))
    }
}

fn faulty_bank() -> WaveBankDef {
    WaveBankDef::new("Faulty").with_entry(WaveEntry::new(0, 1024, WaveFormat::pcm16(1, 22050)))
}

fn play(wave: usize) -> EventKind {
    EventKind::PlayWave(PlayWaveEvent::simple(WaveRef::new(0, wave)))
}

fn looping(wave: usize) -> EventKind {
    EventKind::PlayWave(PlayWaveEvent::simple(WaveRef::new(0, wave)).with_loop_count(LOOP_INFINITE))
}

fn loop_track() -> TrackDef {
    TrackDef::new().with_event(EventDef::new(0, looping(0)))
}

fn marker(id: u32) -> EventKind {
    EventKind::Marker(MarkerEvent::new(id))
}

fn sound_bank() -> SoundBankDef {
    SoundBankDef::new("Game")
        .with_wave_bank("Waves")
        .with_wave_bank("Absent")
        .with_wave_bank("Faulty")
        // 0: looping music, volume follows Distance
        .with_sound(
            SoundDef::new(MUSIC).with_rpc(1).with_track(TrackDef::new().with_event(EventDef::new(
                0,
                EventKind::PlayWave(PlayWaveEvent::simple(WaveRef::new(0, 0)).with_loop_count(LOOP_INFINITE)),
            ))),
        )
        // 1: one-shot effect
        .with_sound(SoundDef::new(SFX).with_track(TrackDef::new().with_event(EventDef::new(0, play(1)))))
        // 2: markers only, lives for ten seconds
        .with_sound(
            SoundDef::new(GLOBAL).with_track(
                TrackDef::new()
                    .with_event(EventDef::new(0, marker(1)))
                    .with_event(EventDef::new(100, marker(2)))
                    .with_event(EventDef::new(10_000, marker(3))),
            ),
        )
        // 3: repeating relative pitch step
        .with_sound(
            SoundDef::new(GLOBAL).with_track(
                TrackDef::new()
                    .with_event(EventDef::new(
                        0,
                        EventKind::SetValue(
                            SetValueEvent::equation(ValueTarget::Pitch, EquationOp::Relative, EquationValue::Fixed(1.0))
                                .with_repeat(3, 100),
                        ),
                    ))
                    .with_event(EventDef::new(10_000, marker(9))),
            ),
        )
        // 4: ordered track variation, two extra passes
        .with_sound(
            SoundDef::new(GLOBAL).with_track(TrackDef::new().with_event(EventDef::new(
                0,
                EventKind::PlayWave(
                    PlayWaveEvent::complex(
                        VariationMode::Ordered,
                        vec![
                            WeightedWave {
                                wave: WaveRef::new(0, 0),
                                weight: 1,
                            },
                            WeightedWave {
                                wave: WaveRef::new(0, 1),
                                weight: 1,
                            },
                        ],
                    )
                    .with_loop_count(2),
                ),
            ))),
        )
        // 5: wave bank never loaded
        .with_sound(SoundDef::new(GLOBAL).with_track(TrackDef::new().with_event(EventDef::new(
            0,
            EventKind::PlayWave(PlayWaveEvent::simple(WaveRef::new(1, 0))),
        ))))
        // 6: one-shot effect outside any limited category
        .with_sound(SoundDef::new(GLOBAL).with_track(TrackDef::new().with_event(EventDef::new(0, play(2)))))
        // 7: zero-length wave
        .with_sound(SoundDef::new(GLOBAL).with_track(TrackDef::new().with_event(EventDef::new(0, play(3)))))
        // 8-13: looping beds in the limited and faded categories
        .with_sound(SoundDef::new(AMBIENCE).with_track(loop_track()))
        .with_sound(SoundDef::new(VOICE).with_track(loop_track()))
        .with_sound(SoundDef::new(DIALOG).with_priority(5).with_track(loop_track()))
        .with_sound(SoundDef::new(DIALOG).with_priority(1).with_track(loop_track()))
        .with_sound(SoundDef::new(CROWD).with_volume_db(-20.0).with_track(loop_track()))
        .with_sound(SoundDef::new(CROWD).with_track(loop_track()))
        // 14: second track reads from a failing stream
        .with_sound(SoundDef::new(GLOBAL).with_track(loop_track()).with_track(
            TrackDef::new().with_event(EventDef::new(
                0,
                EventKind::PlayWave(PlayWaveEvent::simple(WaveRef::new(2, 0))),
            )),
        ))
        // 15: second track stops the whole cue at 100 ms
        .with_sound(SoundDef::new(GLOBAL).with_track(loop_track()).with_track(
            TrackDef::new().with_event(EventDef::new(
                100,
                EventKind::Stop(StopEvent {
                    immediate: true,
                    scope: StopScope::Cue,
                }),
            )),
        ))
        // 16: routes to DSP preset 7, lives for ten seconds
        .with_sound(
            SoundDef::new(GLOBAL)
                .with_dsp(7)
                .with_track(TrackDef::new().with_event(EventDef::new(10_000, marker(1)))),
        )
        .with_cue(CueDef::new("Music", CueTarget::Sound(0)))
        .with_cue(CueDef::new("Shot", CueTarget::Sound(1)))
        .with_cue(CueDef::new("Idle", CueTarget::Sound(2)))
        .with_cue(CueDef::new("Fade", CueTarget::Sound(2)).with_fades(0, 200))
        .with_cue(CueDef::new("Steps", CueTarget::Sound(3)))
        .with_cue(CueDef::new("Chain", CueTarget::Sound(4)))
        .with_cue(CueDef::new("Broken", CueTarget::Sound(5)))
        .with_cue(
            CueDef::new("Solo", CueTarget::Sound(2))
                .with_limit(InstanceLimit::new(1, MaxInstanceBehavior::ReplaceOldest)),
        )
        .with_cue(
            CueDef::new("Queued", CueTarget::Sound(0)).with_limit(InstanceLimit::new(1, MaxInstanceBehavior::Queue)),
        )
        .with_cue(CueDef::new("Pick", CueTarget::Variation(0)))
        .with_cue(CueDef::new("Stream", CueTarget::Sound(6)))
        .with_cue(CueDef::new("Silent", CueTarget::Sound(7)))
        .with_cue(CueDef::new("Wind", CueTarget::Sound(8)))
        .with_cue(CueDef::new("Rain", CueTarget::Sound(8)))
        .with_cue(CueDef::new("Announce", CueTarget::Sound(9)))
        .with_cue(CueDef::new("Chatter", CueTarget::Sound(10)))
        .with_cue(CueDef::new("Line", CueTarget::Sound(11)))
        .with_cue(CueDef::new("Murmur", CueTarget::Sound(12)))
        .with_cue(CueDef::new("Shout", CueTarget::Sound(13)))
        .with_cue(CueDef::new("Duet", CueTarget::Sound(14)))
        .with_cue(CueDef::new("Cutoff", CueTarget::Sound(15)))
        .with_cue(CueDef::new("Reverb", CueTarget::Sound(16)))
        .with_variation_table(VariationTable::interactive(
            INTENSITY,
            vec![
                VariationEntry::wave(WaveRef::new(0, 0), 0.0, 5.0),
                VariationEntry::wave(WaveRef::new(0, 2), 5.0, 10.0),
            ],
        ))
}

struct Rig {
    engine: AudioEngine,
    clock: ManualClock,
    mixer: RecordingMixer,
    waves: WaveBankHandle,
    bank: SoundBankHandle,
}

impl Rig {
    fn new() -> Self {
        Self::with_data(WaveData::memory(vec![0u8; 4096]), EngineConfig::default())
    }

    fn with_data(data: WaveData, config: EngineConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let clock = ManualClock::new();
        let mixer = RecordingMixer::default();
        let engine = AudioEngine::new(catalog(), config.with_seed(42), mixer.clone(), clock.clone()).unwrap();
        let waves = engine.load_wave_bank(wave_bank(), data).unwrap();
        let bank = engine.load_sound_bank(sound_bank()).unwrap();
        Self {
            engine,
            clock,
            mixer,
            waves,
            bank,
        }
    }

    fn cue(&self, name: &str) -> usize {
        self.engine.cue_index(self.bank, name).unwrap()
    }

    /// Prepare and start an unmanaged cue
    fn start(&self, name: &str) -> CueHandle {
        let cue = self.engine.prepare_cue(self.bank, self.cue(name)).unwrap();
        self.engine.cue_play(cue).unwrap();
        cue
    }

    fn tick(&self, ms: u64) {
        self.clock.advance(ms);
        self.engine.do_work();
    }

    fn live_voices(&self) -> Vec<VoiceId> {
        self.mixer.log.lock().live_voices()
    }

    /// Play out the oldest queued buffer of `voice`, as a mixer would
    fn complete_buffer(&self, voice: VoiceId) -> bool {
        let buffer = self.mixer.log.lock().queued.get_mut(&voice).and_then(|q| q.pop_front());
        let Some(buffer) = buffer else {
            return false;
        };
        let callbacks = self.engine.callbacks();
        callbacks.on_buffer_end(voice, buffer.context);
        if buffer.end_of_stream {
            callbacks.on_stream_end(voice);
        }
        true
    }

    fn voice_volume(&self, voice: VoiceId) -> f32 {
        self.mixer.log.lock().params[&voice].volume
    }

    fn is_running(&self, voice: VoiceId) -> bool {
        self.mixer.log.lock().running.get(&voice).copied().unwrap_or(false)
    }

    fn state(&self, cue: CueHandle) -> CueState {
        self.engine.cue_state(cue).unwrap()
    }

    fn playback_error_for(&self, cue: CueHandle) -> bool {
        self.engine
            .take_notifications()
            .iter()
            .any(|n| matches!(n, Notification::PlaybackError { cue: Some(c), .. } if *c == cue))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RPC & CATEGORIES
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_rpc_drives_voice_volume() {
    let rig = Rig::new();
    rig.start("Music");
    let voice = rig.live_voices()[0];
    assert_abs_diff_eq!(rig.voice_volume(voice), 1.0, epsilon = 1e-4);

    // Distance 50 → -10 dB
    rig.engine.set_global_variable(DISTANCE, 50.0).unwrap();
    rig.tick(10);
    assert_abs_diff_eq!(rig.voice_volume(voice), 0.316_23, epsilon = 1e-3);

    // Clamped to the curve's last point
    assert_eq!(rig.engine.set_global_variable(DISTANCE, 500.0).unwrap(), 100.0);
    rig.tick(10);
    assert_abs_diff_eq!(rig.voice_volume(voice), 0.1, epsilon = 1e-3);
}

#[test]
fn test_category_fade_halfway() {
    let rig = Rig::new();
    rig.start("Music");
    let voice = rig.live_voices()[0];

    rig.engine.set_category_volume(MUSIC, 0.0, 1000).unwrap();
    rig.tick(500);
    assert_abs_diff_eq!(rig.engine.category_volume(MUSIC).unwrap(), 0.5, epsilon = 1e-3);
    assert_abs_diff_eq!(rig.voice_volume(voice), 0.5, epsilon = 1e-3);

    rig.tick(500);
    assert_abs_diff_eq!(rig.voice_volume(voice), 0.0, epsilon = 1e-4);
}

#[test]
fn test_parent_category_scales_children() {
    let rig = Rig::new();
    rig.start("Music");
    let voice = rig.live_voices()[0];

    rig.engine.set_category_volume(GLOBAL, 0.5, 0).unwrap();
    rig.engine.set_category_volume(MUSIC, 0.5, 0).unwrap();
    rig.tick(1);
    assert_abs_diff_eq!(rig.engine.category_volume(MUSIC).unwrap(), 0.25, epsilon = 1e-4);
    assert_abs_diff_eq!(rig.voice_volume(voice), 0.25, epsilon = 1e-4);
}

#[test]
fn test_dsp_parameter_follows_global() {
    let rig = Rig::new();
    rig.start("Reverb");
    rig.engine.set_global_variable(ROOM, 0.25).unwrap();
    rig.tick(1);
    assert_abs_diff_eq!(rig.mixer.log.lock().dsp[&(0, 0)], 0.5, epsilon = 1e-4);

    // Clamped to the preset parameter range
    rig.engine.set_global_variable(ROOM, 0.75).unwrap();
    rig.tick(1);
    assert_eq!(rig.mixer.log.lock().dsp[&(0, 0)], 1.0);
}

#[test]
fn test_dsp_pushed_only_while_routed() {
    let rig = Rig::new();
    rig.start("Music");
    rig.engine.set_global_variable(ROOM, 0.25).unwrap();
    rig.tick(1);
    assert!(rig.mixer.log.lock().dsp.is_empty());

    let reverb = rig.start("Reverb");
    rig.tick(1);
    assert_abs_diff_eq!(rig.mixer.log.lock().dsp[&(0, 0)], 0.5, epsilon = 1e-4);

    rig.engine.cue_stop(reverb, StopMode::Immediate).unwrap();
    rig.engine.set_global_variable(ROOM, 0.1).unwrap();
    rig.tick(1);
    assert_abs_diff_eq!(rig.mixer.log.lock().dsp[&(0, 0)], 0.5, epsilon = 1e-4);

    // Routed again: the current value goes out even though the cache was cleared
    rig.start("Reverb");
    rig.tick(1);
    assert_abs_diff_eq!(rig.mixer.log.lock().dsp[&(0, 0)], 0.2, epsilon = 1e-4);
}

#[test]
fn test_category_fade_in() {
    let rig = Rig::new();
    rig.start("Announce");
    let voice = rig.live_voices()[0];
    assert_abs_diff_eq!(rig.voice_volume(voice), 0.0, epsilon = 1e-4);

    rig.tick(100);
    assert_abs_diff_eq!(rig.voice_volume(voice), 0.5, epsilon = 1e-3);
    rig.tick(100);
    assert_abs_diff_eq!(rig.voice_volume(voice), 1.0, epsilon = 1e-4);
}

#[test]
fn test_stop_category() {
    let rig = Rig::new();
    let music = rig.start("Music");
    let idle = rig.start("Idle");

    rig.engine.stop_category(MUSIC, StopMode::Immediate).unwrap();
    assert_eq!(rig.state(music), CueState::Stopped);
    assert_eq!(rig.state(idle), CueState::Playing);
    assert_eq!(rig.engine.category_instance_count(MUSIC).unwrap(), 0);
    assert!(rig.live_voices().is_empty());

    // The root reaches cues counted in itself
    rig.engine.stop_category(GLOBAL, StopMode::Release).unwrap();
    assert_eq!(rig.state(idle), CueState::Stopping);
    rig.tick(1);
    assert_eq!(rig.state(idle), CueState::Stopped);

    assert!(matches!(rig.engine.stop_category(99, StopMode::Immediate), Err(CueError::NotFound(_))));
}

#[test]
fn test_pause_category_holds_new_cues() {
    let rig = Rig::new();
    let music = rig.start("Music");
    let first_voice = rig.live_voices()[0];

    rig.engine.pause_category(GLOBAL, true).unwrap();
    assert_eq!(rig.state(music), CueState::Paused);
    assert!(!rig.is_running(first_voice));

    // Started inside the paused hierarchy: held, no voice yet
    let late = rig.start("Music");
    assert_eq!(rig.state(late), CueState::Paused);
    assert_eq!(rig.live_voices().len(), 1);

    // Neither the cue nor the child category can override the paused parent
    rig.engine.cue_play(late).unwrap();
    rig.engine.cue_pause(music, false).unwrap();
    rig.engine.pause_category(MUSIC, false).unwrap();
    rig.tick(10);
    assert_eq!(rig.state(late), CueState::Paused);
    assert_eq!(rig.state(music), CueState::Paused);
    assert!(!rig.is_running(first_voice));

    rig.engine.pause_category(GLOBAL, false).unwrap();
    assert_eq!(rig.state(music), CueState::Playing);
    assert_eq!(rig.state(late), CueState::Playing);
    let voices = rig.live_voices();
    assert_eq!(voices.len(), 2);
    assert!(voices.iter().all(|&v| rig.is_running(v)));
}

// ═══════════════════════════════════════════════════════════════════════════════
// STOP & PAUSE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_stop_immediate() {
    let rig = Rig::new();
    let cue = rig.start("Music");
    assert_eq!(rig.engine.cue_waves(cue).unwrap().len(), 1);

    rig.engine.cue_stop(cue, StopMode::Immediate).unwrap();
    assert_eq!(rig.engine.cue_state(cue).unwrap(), CueState::Stopped);
    assert!(rig.engine.cue_waves(cue).unwrap().is_empty());
    assert_eq!(rig.engine.live_wave_count(), 0);
    assert!(rig.live_voices().is_empty());
    assert_eq!(rig.engine.category_instance_count(MUSIC).unwrap(), 0);
}

#[test]
fn test_stop_release_without_fade_or_waves() {
    let rig = Rig::new();
    let cue = rig.start("Idle");

    rig.engine.cue_stop(cue, StopMode::Release).unwrap();
    assert_eq!(rig.engine.cue_state(cue).unwrap(), CueState::Stopping);
    rig.tick(1);
    assert_eq!(rig.engine.cue_state(cue).unwrap(), CueState::Stopped);
}

#[test]
fn test_stop_release_lets_loop_finish() {
    let rig = Rig::new();
    let cue = rig.start("Music");
    let voice = rig.live_voices()[0];

    rig.engine.cue_stop(cue, StopMode::Release).unwrap();
    rig.tick(10);
    assert_eq!(rig.engine.cue_state(cue).unwrap(), CueState::Stopping);

    assert!(rig.complete_buffer(voice));
    rig.tick(10);
    assert_eq!(rig.engine.cue_state(cue).unwrap(), CueState::Stopped);
    assert!(rig.live_voices().is_empty());
}

#[test]
fn test_stop_release_with_fade() {
    let rig = Rig::new();
    let cue = rig.start("Fade");

    rig.engine.cue_stop(cue, StopMode::Release).unwrap();
    rig.tick(100);
    assert_eq!(rig.engine.cue_state(cue).unwrap(), CueState::Stopping);
    rig.tick(100);
    assert_eq!(rig.engine.cue_state(cue).unwrap(), CueState::Stopped);
}

#[test]
fn test_pause_freezes_cue_time() {
    let rig = Rig::new();
    let cue = rig.start("Idle");
    rig.engine.take_notifications();

    rig.engine.cue_pause(cue, true).unwrap();
    assert_eq!(rig.engine.cue_state(cue).unwrap(), CueState::Paused);
    rig.tick(500);
    rig.engine.cue_pause(cue, false).unwrap();
    rig.tick(50);
    assert!(rig.engine.take_notifications().is_empty());

    rig.tick(50);
    let notes = rig.engine.take_notifications();
    assert_eq!(notes, vec![Notification::Marker { cue, track: 0, marker: 2 }]);
}

#[test]
fn test_destroy_invalidates_handle() {
    let rig = Rig::new();
    let cue = rig.start("Music");
    rig.engine.cue_destroy(cue).unwrap();
    assert!(matches!(rig.engine.cue_state(cue), Err(CueError::InvalidHandle(_))));
    assert!(rig.engine.cue_play(cue).is_err());
    assert!(rig.live_voices().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_repeating_set_value_fires_four_times() {
    let rig = Rig::new();
    let cue = rig.start("Steps");
    assert_eq!(rig.engine.cue_track_values(cue, 0).unwrap().pitch_cents, 1.0);

    rig.tick(100);
    rig.tick(100);
    rig.tick(100);
    assert_eq!(rig.engine.cue_track_values(cue, 0).unwrap().pitch_cents, 4.0);

    rig.tick(1000);
    assert_eq!(rig.engine.cue_track_values(cue, 0).unwrap().pitch_cents, 4.0);
}

#[test]
fn test_markers_in_order() {
    let rig = Rig::new();
    let idle = rig.cue("Idle");
    let cue = rig.engine.play_cue(rig.bank, idle).unwrap().unwrap();
    rig.tick(100);
    rig.tick(10_000);

    let markers: Vec<u32> = rig
        .engine
        .take_notifications()
        .into_iter()
        .filter_map(|n| match n {
            Notification::Marker { cue: c, marker, .. } if c == cue => Some(marker),
            _ => None,
        })
        .collect();
    assert_eq!(markers, vec![1, 2, 3]);
    assert_eq!(rig.engine.live_cue_count(), 0);
}

#[test]
fn test_track_variation_loops() {
    let rig = Rig::new();
    let cue = rig.start("Chain");

    // Current wave plus the prepared next one
    assert_eq!(rig.engine.cue_waves(cue).unwrap().len(), 2);

    for pass in 0..3 {
        let voice = rig.live_voices()[0];
        assert!(rig.complete_buffer(voice), "pass {}", pass);
        rig.tick(10);
    }
    assert_eq!(rig.mixer.log.lock().formats.len(), 3);
    assert_eq!(rig.engine.cue_state(cue).unwrap(), CueState::Stopped);
}

#[test]
fn test_missing_wave_bank_is_reported() {
    let rig = Rig::new();
    let cue = rig.start("Broken");
    let notes = rig.engine.take_notifications();
    assert!(notes.iter().any(|n| matches!(n, Notification::PlaybackError { cue: Some(c), .. } if *c == cue)));

    // Nothing left to play
    rig.tick(1);
    assert_eq!(rig.engine.cue_state(cue).unwrap(), CueState::Stopped);
}

#[test]
fn test_stop_event_stops_whole_cue() {
    let rig = Rig::new();
    let cue = rig.start("Cutoff");
    assert_eq!(rig.live_voices().len(), 1);

    rig.tick(50);
    assert_eq!(rig.state(cue), CueState::Playing);
    rig.tick(50);
    assert_eq!(rig.state(cue), CueState::Stopped);
    assert!(rig.live_voices().is_empty());
    assert!(rig
        .engine
        .take_notifications()
        .contains(&Notification::CueStopped { cue }));
}

#[test]
fn test_stream_error_spares_sibling_tracks() {
    let rig = Rig::new();
    rig.engine.load_wave_bank(faulty_bank(), WaveData::stream(FailingReader)).unwrap();
    let cue = rig.start("Duet");

    assert!(rig.playback_error_for(cue));
    assert_eq!(rig.state(cue), CueState::Playing);
    assert_eq!(rig.engine.cue_waves(cue).unwrap().len(), 1);
    assert_eq!(rig.live_voices().len(), 1);

    rig.tick(10);
    assert_eq!(rig.state(cue), CueState::Playing);
    assert!(rig.is_running(rig.live_voices()[0]));
}

// ═══════════════════════════════════════════════════════════════════════════════
// VARIATION & VARIABLES
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_interactive_variation_uses_cue_variable() {
    let rig = Rig::new();
    let pick = rig.cue("Pick");

    let cue = rig.engine.prepare_cue(rig.bank, pick).unwrap();
    rig.engine.cue_set_variable(cue, INTENSITY, 7.5).unwrap();
    rig.engine.cue_play(cue).unwrap();

    let voice = rig.live_voices()[0];
    assert_eq!(rig.mixer.log.lock().formats[&voice].sample_rate, 22050);

    let cue = rig.engine.prepare_cue(rig.bank, pick).unwrap();
    rig.engine.cue_set_variable(cue, INTENSITY, 1.0).unwrap();
    rig.engine.cue_play(cue).unwrap();
    let voice = *rig.live_voices().last().unwrap();
    assert_eq!(rig.mixer.log.lock().formats[&voice].sample_rate, 48000);
}

#[test]
fn test_num_cue_instances_is_maintained() {
    let rig = Rig::new();
    let first = rig.start("Idle");
    let second = rig.start("Idle");
    rig.tick(1);
    assert_eq!(rig.engine.cue_get_variable(first, INSTANCES).unwrap(), 2.0);
    assert_eq!(rig.engine.cue_get_variable(second, INSTANCES).unwrap(), 2.0);

    rig.engine.cue_stop(second, StopMode::Immediate).unwrap();
    rig.tick(1);
    assert_eq!(rig.engine.cue_get_variable(first, INSTANCES).unwrap(), 1.0);

    // Engine-maintained: public writes are refused
    assert!(matches!(
        rig.engine.cue_set_variable(first, INSTANCES, 9.0),
        Err(CueError::ReadOnly(_))
    ));
}

#[test]
fn test_non_finite_variable_rejected() {
    let rig = Rig::new();
    let cue = rig.start("Music");
    rig.engine.set_global_variable(DISTANCE, 50.0).unwrap();

    assert!(matches!(
        rig.engine.set_global_variable(DISTANCE, f32::NAN),
        Err(CueError::InvalidArgument(_))
    ));
    assert!(matches!(
        rig.engine.cue_set_variable(cue, INTENSITY, f32::INFINITY),
        Err(CueError::InvalidArgument(_))
    ));
    assert_eq!(rig.engine.get_global_variable(DISTANCE).unwrap(), 50.0);

    rig.tick(10);
    let voice = rig.live_voices()[0];
    assert_abs_diff_eq!(rig.voice_volume(voice), 0.316_23, epsilon = 1e-3);
}

#[test]
fn test_apply_3d_sets_matrix() {
    let rig = Rig::new();
    let cue = rig.start("Music");
    rig.engine.cue_apply_3d(cue, vec![0.25, 0.75]).unwrap();
    let voice = rig.live_voices()[0];
    assert_eq!(rig.mixer.log.lock().matrices[&voice], vec![0.25, 0.75]);
}

// ═══════════════════════════════════════════════════════════════════════════════
// INSTANCE LIMITS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_category_fail_to_play() {
    let rig = Rig::new();
    let shot = rig.cue("Shot");
    assert!(rig.engine.play_cue(rig.bank, shot).unwrap().is_some());
    assert!(rig.engine.play_cue(rig.bank, shot).unwrap().is_none());
    assert_eq!(rig.engine.category_instance_count(SFX).unwrap(), 1);

    // Unmanaged cues see the refusal as an error
    let cue = rig.engine.prepare_cue(rig.bank, shot).unwrap();
    assert!(matches!(rig.engine.cue_play(cue), Err(CueError::ResourceExhausted(_))));
    assert_eq!(rig.engine.cue_state(cue).unwrap(), CueState::Prepared);
}

#[test]
fn test_replace_oldest() {
    let rig = Rig::new();
    let first = rig.start("Solo");
    let second = rig.start("Solo");
    assert_eq!(rig.engine.cue_state(first).unwrap(), CueState::Stopped);
    assert_eq!(rig.engine.cue_state(second).unwrap(), CueState::Playing);
}

#[test]
fn test_category_replace_oldest() {
    let rig = Rig::new();
    let wind = rig.start("Wind");
    let rain = rig.start("Rain");
    assert_eq!(rig.state(wind), CueState::Stopped);
    assert_eq!(rig.state(rain), CueState::Playing);
    assert_eq!(rig.engine.category_instance_count(AMBIENCE).unwrap(), 1);
    assert_eq!(rig.live_voices().len(), 1);
}

#[test]
fn test_replace_lowest_priority() {
    let rig = Rig::new();
    let line = rig.start("Line");
    let chatter = rig.start("Chatter");
    let second_line = rig.start("Line");

    assert_eq!(rig.state(chatter), CueState::Stopped);
    assert_eq!(rig.state(line), CueState::Playing);
    assert_eq!(rig.state(second_line), CueState::Playing);
    assert_eq!(rig.engine.category_instance_count(DIALOG).unwrap(), 2);
}

#[test]
fn test_replace_quietest() {
    let rig = Rig::new();
    let shout = rig.start("Shout");
    let murmur = rig.start("Murmur");
    let second_shout = rig.start("Shout");

    assert_eq!(rig.state(murmur), CueState::Stopped);
    assert_eq!(rig.state(shout), CueState::Playing);
    assert_eq!(rig.state(second_shout), CueState::Playing);
    assert_eq!(rig.engine.category_instance_count(CROWD).unwrap(), 2);
}

#[test]
fn test_queue_waits_for_release() {
    let rig = Rig::new();
    let first = rig.start("Queued");
    let voice = rig.live_voices()[0];

    let second = rig.start("Queued");
    assert_eq!(rig.engine.cue_state(second).unwrap(), CueState::Prepared);
    assert_eq!(rig.engine.cue_state(first).unwrap(), CueState::Stopping);

    rig.tick(10);
    assert_eq!(rig.engine.cue_state(second).unwrap(), CueState::Prepared);

    // First cue's last pass ends; the queued cue takes the slot
    assert!(rig.complete_buffer(voice));
    rig.tick(10);
    assert_eq!(rig.engine.cue_state(first).unwrap(), CueState::Stopped);
    assert_eq!(rig.engine.cue_state(second).unwrap(), CueState::Playing);
}

#[test]
fn test_max_cues() {
    let config = EngineConfig {
        max_cues: 2,
        ..EngineConfig::default()
    };
    let rig = Rig::with_data(WaveData::memory(vec![0u8; 4096]), config);
    rig.start("Idle");
    rig.start("Idle");
    let idle = rig.cue("Idle");
    assert!(matches!(
        rig.engine.prepare_cue(rig.bank, idle),
        Err(CueError::ResourceExhausted(_))
    ));
}

// ═══════════════════════════════════════════════════════════════════════════════
// STREAMING & BANKS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_streaming_refills_through_callbacks() {
    let data = WaveData::stream(SeekReader::new(Cursor::new(vec![0u8; 4096])));
    let rig = Rig::with_data(data, EngineConfig::default().with_streaming(512, 2));
    let cue = rig.start("Stream");
    let voice = rig.live_voices()[0];
    assert_eq!(rig.mixer.log.lock().submitted[&voice], 2);

    // Wave 2 is 2048 bytes: four 512-byte chunks
    for _ in 0..2 {
        assert!(rig.complete_buffer(voice));
        rig.tick(10);
    }
    assert_eq!(rig.mixer.log.lock().submitted[&voice], 4);
    assert_eq!(rig.engine.cue_state(cue).unwrap(), CueState::Playing);

    while rig.complete_buffer(voice) {
        rig.tick(10);
    }
    assert_eq!(rig.mixer.log.lock().submitted[&voice], 4);
    assert_eq!(rig.engine.cue_state(cue).unwrap(), CueState::Stopped);
}

#[test]
fn test_stream_shorter_than_entry_completes_cue() {
    let data = WaveData::stream(SeekReader::new(Cursor::new(vec![0u8; 16])));
    let rig = Rig::with_data(data, EngineConfig::default().with_streaming(512, 2));
    let cue = rig.start("Stream");

    assert!(rig.playback_error_for(cue));
    assert_eq!(rig.state(cue), CueState::Stopped);
    assert_eq!(rig.engine.live_wave_count(), 0);
    assert!(rig.live_voices().is_empty());

    // Managed cues are reaped and give their slot back
    let stream = rig.cue("Stream");
    rig.engine.play_cue(rig.bank, stream).unwrap();
    rig.tick(10);
    assert_eq!(rig.engine.live_cue_count(), 1);
    assert_eq!(rig.engine.category_instance_count(GLOBAL).unwrap(), 0);
}

#[test]
fn test_zero_length_entry_completes_cue() {
    let streamed = WaveData::stream(SeekReader::new(Cursor::new(vec![0u8; 4096])));
    for rig in [Rig::new(), Rig::with_data(streamed, EngineConfig::default())] {
        let cue = rig.start("Silent");
        assert!(rig.playback_error_for(cue));
        assert_eq!(rig.state(cue), CueState::Stopped);
        assert_eq!(rig.engine.live_wave_count(), 0);
        assert!(rig.live_voices().is_empty());
    }
}

#[test]
fn test_unload_wave_bank_stops_waves() {
    let rig = Rig::new();
    let cue = rig.start("Music");
    assert_eq!(rig.engine.live_wave_count(), 1);

    rig.engine.unload_wave_bank(rig.waves).unwrap();
    assert_eq!(rig.engine.live_wave_count(), 0);
    assert!(rig.live_voices().is_empty());

    // Nothing left on the track: the cue completes
    rig.tick(10);
    assert_eq!(rig.engine.cue_state(cue).unwrap(), CueState::Stopped);

    rig.engine.unload_sound_bank(rig.bank).unwrap();
    assert!(matches!(rig.engine.cue_state(cue), Err(CueError::InvalidHandle(_))));
}

#[test]
fn test_bank_validation() {
    let rig = Rig::new();
    let bad = SoundBankDef::new("Bad").with_sound(SoundDef::new(99));
    assert!(matches!(rig.engine.load_sound_bank(bad), Err(CueError::MalformedCatalog(_))));

    let short = WaveBankDef::new("Short").with_entry(WaveEntry::new(0, 100, WaveFormat::pcm16(1, 8000)));
    assert!(rig.engine.load_wave_bank(short, WaveData::memory(vec![0u8; 10])).is_err());

    assert!(matches!(rig.engine.load_sound_bank(sound_bank()), Err(CueError::MalformedCatalog(_))));
}
