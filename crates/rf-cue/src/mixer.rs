//! Mixing Subsystem Interface
//!
//! The engine drives voices through [`Mixer`] and never sees resampling or
//! effects. Voices are opaque handles. Completion callbacks flow back through
//! [`crate::VoiceCallbacks`].

use std::ops::Range;
use std::sync::Arc;

use crate::catalog::{FilterKind, WaveFormat};
use crate::error::CueResult;

/// Opaque voice handle issued by the mixer
pub type VoiceId = u64;

/// Mixer-side loop count meaning "loop forever"
pub const MIXER_LOOP_INFINITE: u32 = u32::MAX;

/// A span of PCM bytes queued on a voice
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Backing bytes (shared, never copied per submit)
    pub bytes: Arc<[u8]>,
    /// Played range within `bytes`
    pub range: Range<usize>,
    /// Echoed back in the buffer-end callback
    pub context: u64,
    /// Last buffer of the stream
    pub end_of_stream: bool,
    /// Extra plays of this buffer ([`MIXER_LOOP_INFINITE`] = forever)
    pub loop_count: u32,
}

impl AudioBuffer {
    #[inline]
    pub fn len(&self) -> usize {
        self.range.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Filter coefficients requested for a voice
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterParams {
    pub kind: FilterKind,
    pub frequency_hz: f32,
    pub q: f32,
}

/// Per-voice parameters computed each tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceParams {
    /// Linear amplitude
    pub volume: f32,
    /// Playback rate multiplier
    pub frequency_ratio: f32,
    pub filter: Option<FilterParams>,
    /// Linear reverb send amplitude
    pub reverb_send: f32,
    /// Placement hints from the PlayWave event
    pub position: u16,
    pub angle: u16,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            volume: 1.0,
            frequency_ratio: 1.0,
            filter: None,
            reverb_send: 0.0,
            position: 0,
            angle: 0,
        }
    }
}

/// Voice-rendering collaborator
pub trait Mixer: Send {
    fn create_voice(&mut self, format: &WaveFormat) -> CueResult<VoiceId>;
    fn destroy_voice(&mut self, voice: VoiceId);
    fn start_voice(&mut self, voice: VoiceId);
    /// Halt output, keeping queued buffers (used for pause)
    fn stop_voice(&mut self, voice: VoiceId);
    /// Let the current buffer play out without looping again
    fn exit_loop(&mut self, voice: VoiceId);
    fn submit_buffer(&mut self, voice: VoiceId, buffer: AudioBuffer) -> CueResult<()>;
    fn set_voice_params(&mut self, voice: VoiceId, params: &VoiceParams);
    fn set_output_matrix(&mut self, voice: VoiceId, matrix: &[f32]);
    fn set_dsp_parameter(&mut self, preset: usize, parameter: usize, value: f32);
}

/// Mixer that accepts everything and renders nothing
#[derive(Debug, Default)]
pub struct NullMixer {
    next_voice: VoiceId,
}

impl NullMixer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Mixer for NullMixer {
    fn create_voice(&mut self, _format: &WaveFormat) -> CueResult<VoiceId> {
        self.next_voice += 1;
        Ok(self.next_voice)
    }

    fn destroy_voice(&mut self, _voice: VoiceId) {}

    fn start_voice(&mut self, _voice: VoiceId) {}

    fn stop_voice(&mut self, _voice: VoiceId) {}

    fn exit_loop(&mut self, _voice: VoiceId) {}

    fn submit_buffer(&mut self, _voice: VoiceId, _buffer: AudioBuffer) -> CueResult<()> {
        Ok(())
    }

    fn set_voice_params(&mut self, _voice: VoiceId, _params: &VoiceParams) {}

    fn set_output_matrix(&mut self, _voice: VoiceId, _matrix: &[f32]) {}

    fn set_dsp_parameter(&mut self, _preset: usize, _parameter: usize, _value: f32) {}
}
