//! Cue Instances
//!
//! A cue is the live playback handle created from a cue definition. The
//! engine context drives its transitions; this module holds the state and
//! the pieces of bookkeeping that only concern one cue.

use crate::curve::LinearRamp;
use crate::event::WaveRef;
use crate::handle::{CueHandle, SoundBankHandle, WaveHandle};
use crate::instance::SoundInstance;

// ═══════════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Cue playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CueState {
    /// Initial and terminal
    #[default]
    Stopped = 0,
    /// Created, not yet playing (or waiting for an instance slot)
    Prepared = 1,
    Playing = 2,
    Paused = 3,
    /// Fading out or letting waves finish
    Stopping = 4,
}

impl CueState {
    /// Playing, paused or stopping
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, CueState::Playing | CueState::Paused | CueState::Stopping)
    }
}

/// How a stop request is carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopMode {
    /// Tear everything down now
    Immediate,
    /// Fade out / let waves finish
    #[default]
    Release,
}

impl StopMode {
    pub fn from_immediate(immediate: bool) -> Self {
        if immediate {
            StopMode::Immediate
        } else {
            StopMode::Release
        }
    }
}

/// What a started cue plays
#[derive(Debug, Clone)]
pub enum Payload {
    /// A bare wave from a variation table
    Wave(Option<WaveHandle>),
    Sound(SoundInstance),
}

impl Payload {
    pub fn waves(&self) -> Vec<WaveHandle> {
        match self {
            Payload::Wave(wave) => wave.iter().copied().collect(),
            Payload::Sound(sound) => sound.waves().collect(),
        }
    }
}

/// Result of variation selection, kept while a cue waits for a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Sound(usize),
    Wave(WaveRef),
}

// ═══════════════════════════════════════════════════════════════════════════════
// CUE
// ═══════════════════════════════════════════════════════════════════════════════

/// Live cue
#[derive(Debug, Clone)]
pub struct Cue {
    pub handle: CueHandle,
    pub bank: SoundBankHandle,
    /// Index into the bank's cue definitions
    pub index: usize,
    /// Destroyed automatically once stopped
    pub managed: bool,
    pub state: CueState,
    /// Cue-local variable values (indexed like the variable catalog)
    pub locals: Vec<f32>,
    pub payload: Option<Payload>,
    /// Variation entry picked at play
    pub variation_entry: Option<usize>,
    /// Waiting for an instance slot
    pub waiting: bool,
    /// Selection already made while waiting
    pub queued: Option<Selection>,
    /// Category whose instance count includes this cue
    pub counted_category: Option<usize>,
    /// 3-D output matrix
    pub matrix: Option<Vec<f32>>,
    /// Cue fade gain (fade-in / fade-out)
    pub fade: LinearRamp,
    pub fade_in_ms: u32,
    pub fade_out_ms: u32,
    /// Time spent playing (excludes pauses)
    pub elapsed_ms: u64,
    /// Time since a release stop
    pub release_elapsed_ms: Option<u64>,
    /// Engine time of the last update
    pub updated_ms: u64,
    /// Sound priority (0 = most important)
    pub priority: u8,
}

impl Cue {
    pub fn new(handle: CueHandle, bank: SoundBankHandle, index: usize, locals: Vec<f32>) -> Self {
        Self {
            handle,
            bank,
            index,
            managed: false,
            state: CueState::Prepared,
            locals,
            payload: None,
            variation_entry: None,
            waiting: false,
            queued: None,
            counted_category: None,
            matrix: None,
            fade: LinearRamp::new(1.0),
            fade_in_ms: 0,
            fade_out_ms: 0,
            elapsed_ms: 0,
            release_elapsed_ms: None,
            updated_ms: 0,
            priority: 0,
        }
    }

    pub fn waves(&self) -> Vec<WaveHandle> {
        self.payload.as_ref().map(|p| p.waves()).unwrap_or_default()
    }

    pub fn sound(&self) -> Option<&SoundInstance> {
        match &self.payload {
            Some(Payload::Sound(sound)) => Some(sound),
            _ => None,
        }
    }

    /// Loudness used to rank eviction candidates
    pub fn loudness(&self) -> f32 {
        self.sound().map_or(self.fade.current(), |s| s.last_volume)
    }

    /// Start the fade-in (no-op when `fade_in_ms` is 0)
    pub fn begin_fade_in(&mut self) {
        if self.fade_in_ms > 0 {
            self.fade.set(0.0);
            self.fade.start(1.0, self.fade_in_ms);
        } else {
            self.fade.set(1.0);
        }
    }

    /// Start the fade-out. Returns false if the cue has no fade-out.
    pub fn begin_fade_out(&mut self) -> bool {
        if self.fade_out_ms == 0 {
            return false;
        }
        self.fade.start(0.0, self.fade_out_ms);
        true
    }

    /// Fade-out finished
    #[inline]
    pub fn is_faded_out(&self) -> bool {
        self.fade.target() == 0.0 && !self.fade.is_active()
    }
}
