//! FluxForge Cue Engine
//!
//! XACT/FACT-style interactive audio runtime:
//! - Cue → Sound → Track → Event → Wave playback hierarchy
//! - Variation tables (ordered, random, shuffle, interactive)
//! - Runtime parameter control (RPC) curves driven by global and cue variables
//! - Category hierarchy with volume fades and instance limits
//! - Streaming and in-memory wave banks over a pluggable mixer
//! - Lock-free mixer callback queue, host notifications
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     CUE ENGINE ARCHITECTURE                      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │   Host Thread                          Mixer Thread              │
//! │   ┌─────────────────┐                ┌─────────────────┐        │
//! │   │ play_cue()      │                │ VoiceCallbacks  │        │
//! │   │ set_variable()  │                │ .on_buffer_end  │        │
//! │   │ do_work()       │◀──Voice Event──│ .on_stream_end  │        │
//! │   └────────┬────────┘   Queue        └────────┬────────┘        │
//! │            │           (lock-free)            │                 │
//! │            ▼                                  ▼                 │
//! │   ┌─────────────────────────────────────────────────────────┐   │
//! │   │                   EngineContext (lock)                   │   │
//! │   │  Cue ── Sound ── Track ── Events ── Wave ── Mixer voice  │   │
//! │   │   │       │        │                                     │   │
//! │   │   │       └─ RPC curves ◀── variables                    │   │
//! │   │   └─ Category (volume, limits)                           │   │
//! │   └─────────────────────────────────────────────────────────┘   │
//! │                                                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rf_cue::{AudioEngine, EngineCatalog, EngineConfig, SystemClock, WaveData};
//!
//! let catalog = EngineCatalog::from_json_file("engine.json")?;
//! let engine = AudioEngine::new(catalog, EngineConfig::default(), my_mixer, SystemClock::new())?;
//!
//! let waves = engine.load_wave_bank(wave_bank_def, WaveData::memory(bytes))?;
//! let sounds = engine.load_sound_bank(sound_bank_def)?;
//!
//! let footstep = engine.cue_index(sounds, "Footstep")?;
//! engine.play_cue(sounds, footstep)?;
//!
//! // Once per frame
//! engine.do_work();
//! ```

#![allow(clippy::new_without_default)]

pub mod catalog;
pub mod category;
pub mod clock;
pub mod config;
mod context;
pub mod cue;
pub mod curve;
pub mod engine;
pub mod error;
pub mod event;
pub mod handle;
pub mod instance;
pub mod mixer;
pub mod notify;
pub mod rpc;
pub mod scheduler;
pub mod stream;
pub mod variable;
pub mod variation;
pub mod wave;

// Re-exports
pub use catalog::{
    CueDef, CueTarget, DspParameter, DspPreset, EngineCatalog, FilterDef, FilterKind, SoundBankDef, SoundDef,
    TrackDef, WaveBankDef, WaveEntry, WaveFormat,
};
pub use category::{CategoryDef, InstanceLimit, MaxInstanceBehavior};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use context::VoiceEvent;
pub use cue::{CueState, StopMode};
pub use curve::{CurveShape, LinearRamp};
pub use engine::{AudioEngine, VoiceCallbacks};
pub use error::{CueError, CueResult};
pub use event::{
    EffectVariation, EquationOp, EquationValue, EventDef, EventKind, LOOP_INFINITE, MarkerEvent, PlayWaveEvent,
    Repeat, SetValueEvent, StopEvent, StopScope, TrackVariation, ValueCurve, ValueRange, ValueTarget, WaveRef,
    WeightedWave,
};
pub use handle::{CueHandle, SoundBankHandle, WaveBankHandle, WaveHandle};
pub use instance::EventValues;
pub use mixer::{AudioBuffer, FilterParams, MIXER_LOOP_INFINITE, Mixer, NullMixer, VoiceId, VoiceParams};
pub use notify::{Notification, NotificationCallback};
pub use rpc::{
    CombineRule, RpcCombineRules, RpcCurve, RpcParameter, RpcPoint, amplitude_to_decibel, cents_to_frequency_ratio,
    decibel_to_amplitude,
};
pub use stream::{SeekReader, StreamReader, WaveData};
pub use variable::{VariableAccess, VariableDef};
pub use variation::{VariationEntry, VariationMode, VariationTable, VariationTarget};
pub use wave::WaveState;
