//! Wave Playback
//!
//! One playing waveform feeding one mixer voice.
//!
//! ## Lifecycle
//!
//! `Prepared → Playing ⇄ Paused → Stopping → Stopped`
//!
//! Preloaded waves submit their whole region once and let the mixer loop it.
//! Streaming waves keep `read_ahead` chunks queued on the voice and read the
//! next chunk every time one completes, rewinding to the region start while
//! loops remain.

use std::io;
use std::ops::Range;
use std::sync::Arc;

use crate::catalog::{WaveEntry, WaveFormat};
use crate::cue::StopMode;
use crate::error::{CueError, CueResult};
use crate::event::LOOP_INFINITE;
use crate::handle::{CueHandle, WaveBankHandle, WaveHandle};
use crate::mixer::{AudioBuffer, MIXER_LOOP_INFINITE, Mixer, VoiceId, VoiceParams};
use crate::stream::WaveData;

/// Wave playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum WaveState {
    /// Buffered, not yet submitted
    #[default]
    Prepared = 0,
    Playing = 1,
    Paused = 2,
    /// Playing out its last buffers
    Stopping = 3,
    Stopped = 4,
}

impl WaveState {
    #[inline]
    pub fn is_finished(&self) -> bool {
        *self == WaveState::Stopped
    }
}

/// Cue (and track) that receives this wave's end notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveOwner {
    pub cue: CueHandle,
    /// None for a cue's bare variation wave
    pub track: Option<usize>,
}

/// Streaming parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub chunk_bytes: usize,
    pub read_ahead: usize,
}

/// One playing wave
#[derive(Debug)]
pub struct Wave {
    pub handle: WaveHandle,
    pub bank: WaveBankHandle,
    pub entry: usize,
    pub voice: VoiceId,
    pub owner: Option<WaveOwner>,
    pub format: WaveFormat,
    state: WaveState,
    /// Absolute byte region in the bank data
    region: Range<u64>,
    /// Loops still to play ([`LOOP_INFINITE`] = forever)
    loops_remaining: u8,
    /// Next byte to read (streaming)
    cursor: u64,
    /// Buffers submitted and not yet completed
    in_flight: usize,
    /// Last buffer has been read
    end_of_data: bool,
    /// A read could not complete in time
    starved: bool,
    /// Read but not yet submitted (Prepared)
    pending: Vec<AudioBuffer>,
    next_context: u64,
    last_params: Option<VoiceParams>,
}

impl Wave {
    pub fn new(
        handle: WaveHandle,
        bank: WaveBankHandle,
        entry_index: usize,
        entry: &WaveEntry,
        loop_count: u8,
        voice: VoiceId,
    ) -> Self {
        Self {
            handle,
            bank,
            entry: entry_index,
            voice,
            owner: None,
            format: entry.format,
            state: WaveState::Prepared,
            region: entry.offset..entry.end(),
            loops_remaining: loop_count,
            cursor: entry.offset,
            in_flight: 0,
            end_of_data: false,
            starved: false,
            pending: Vec::new(),
            next_context: 0,
            last_params: None,
        }
    }

    pub fn with_owner(mut self, owner: WaveOwner) -> Self {
        self.owner = Some(owner);
        self
    }

    #[inline]
    pub fn state(&self) -> WaveState {
        self.state
    }

    #[inline]
    pub fn is_starved(&self) -> bool {
        self.starved
    }

    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    fn take_context(&mut self) -> u64 {
        self.next_context += 1;
        self.next_context
    }

    /// Read the initial window without submitting it. A wave with no audio
    /// at all is an error: no buffer would ever complete to retire it.
    pub fn prepare(&mut self, data: &mut WaveData, settings: StreamSettings) -> CueResult<()> {
        if self.region.is_empty() {
            return Err(self.no_data());
        }
        if let WaveData::Memory(bytes) = &*data {
            let bytes = Arc::clone(bytes);
            let loop_count = match self.loops_remaining {
                LOOP_INFINITE => MIXER_LOOP_INFINITE,
                n => n as u32,
            };
            let buffer = AudioBuffer {
                bytes,
                range: self.region.start as usize..self.region.end as usize,
                context: self.take_context(),
                end_of_stream: true,
                loop_count,
            };
            self.pending.push(buffer);
            self.end_of_data = true;
            return Ok(());
        }

        while self.pending.len() < settings.read_ahead && !self.end_of_data {
            match self.read_chunk(data, settings)? {
                Some(buffer) => self.pending.push(buffer),
                None => break,
            }
        }
        if self.pending.is_empty() && self.end_of_data {
            return Err(self.no_data());
        }
        Ok(())
    }

    fn no_data(&self) -> CueError {
        CueError::StreamIo(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("{} has no audio data at byte {}", self.handle, self.region.start),
        ))
    }

    /// Submit the prepared window and start the voice
    pub fn play(&mut self, mixer: &mut dyn Mixer) -> CueResult<()> {
        if self.state != WaveState::Prepared {
            return Ok(());
        }
        for buffer in std::mem::take(&mut self.pending) {
            mixer.submit_buffer(self.voice, buffer)?;
            self.in_flight += 1;
        }
        mixer.start_voice(self.voice);
        self.state = WaveState::Playing;
        log::debug!("{} started on voice {}", self.handle, self.voice);
        Ok(())
    }

    pub fn pause(&mut self, mixer: &mut dyn Mixer) {
        if self.state == WaveState::Playing {
            mixer.stop_voice(self.voice);
            self.state = WaveState::Paused;
        }
    }

    pub fn resume(&mut self, mixer: &mut dyn Mixer) {
        if self.state == WaveState::Paused {
            mixer.start_voice(self.voice);
            self.state = WaveState::Playing;
        }
    }

    /// Stop now, or let the current pass play out without looping
    pub fn stop(&mut self, mixer: &mut dyn Mixer, mode: StopMode) {
        match (self.state, mode) {
            (WaveState::Stopped, _) => {}
            (WaveState::Prepared, _) | (_, StopMode::Immediate) => self.finish(mixer),
            (_, StopMode::Release) => {
                self.loops_remaining = 0;
                mixer.exit_loop(self.voice);
                if self.state == WaveState::Paused {
                    mixer.start_voice(self.voice);
                }
                self.state = WaveState::Stopping;
                if self.in_flight == 0 && self.end_of_data {
                    self.finish(mixer);
                }
            }
        }
    }

    /// Tear down the voice
    fn finish(&mut self, mixer: &mut dyn Mixer) {
        if self.state != WaveState::Prepared {
            mixer.stop_voice(self.voice);
        }
        mixer.destroy_voice(self.voice);
        self.pending.clear();
        self.in_flight = 0;
        self.state = WaveState::Stopped;
        log::debug!("{} stopped", self.handle);
    }

    /// A queued buffer completed: top the read-ahead window back up
    pub fn on_buffer_end(&mut self, mixer: &mut dyn Mixer, data: &mut WaveData, settings: StreamSettings) -> CueResult<()> {
        if self.state.is_finished() {
            return Ok(());
        }
        self.in_flight = self.in_flight.saturating_sub(1);
        self.refill(mixer, data, settings)
    }

    /// The voice played its end-of-stream buffer
    pub fn on_stream_end(&mut self, mixer: &mut dyn Mixer) {
        if !self.state.is_finished() {
            self.finish(mixer);
        }
    }

    /// Retry a starved read (called once per tick)
    pub fn service(&mut self, mixer: &mut dyn Mixer, data: &mut WaveData, settings: StreamSettings) -> CueResult<()> {
        if self.starved {
            self.refill(mixer, data, settings)?;
        }
        Ok(())
    }

    fn refill(&mut self, mixer: &mut dyn Mixer, data: &mut WaveData, settings: StreamSettings) -> CueResult<()> {
        if !matches!(self.state, WaveState::Playing | WaveState::Paused | WaveState::Stopping) {
            return Ok(());
        }
        while self.in_flight < settings.read_ahead && !self.end_of_data {
            match self.read_chunk(data, settings) {
                Ok(Some(buffer)) => {
                    mixer.submit_buffer(self.voice, buffer)?;
                    self.in_flight += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    self.finish(mixer);
                    return Err(e);
                }
            }
        }
        if self.end_of_data && self.in_flight == 0 {
            self.finish(mixer);
        }
        Ok(())
    }

    /// Read the next chunk. `None` on under-run or when data ran out.
    fn read_chunk(&mut self, data: &mut WaveData, settings: StreamSettings) -> CueResult<Option<AudioBuffer>> {
        let WaveData::Stream(reader) = &mut *data else {
            return Ok(None);
        };

        if self.cursor >= self.region.end {
            if !self.rewind() {
                self.end_of_data = true;
                return Ok(None);
            }
        }

        let align = self.format.block_align();
        let chunk = (settings.chunk_bytes / align).max(1) * align;
        let want = chunk.min((self.region.end - self.cursor) as usize);
        let mut buf = vec![0u8; want];

        let read = match reader.read_at(self.cursor, &mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if !self.starved {
                    log::warn!("{} stream under-run at byte {}", self.handle, self.cursor);
                }
                self.starved = true;
                return Ok(None);
            }
            Err(e) => return Err(CueError::StreamIo(e)),
        };
        self.starved = false;

        if read == 0 {
            // Data region shorter than advertised
            self.end_of_data = true;
            return Ok(None);
        }

        buf.truncate(read);
        self.cursor += read as u64;
        let last = self.cursor >= self.region.end && !self.can_loop();
        if last {
            self.end_of_data = true;
        }
        Ok(Some(AudioBuffer {
            bytes: Arc::from(buf),
            range: 0..read,
            context: self.take_context(),
            end_of_stream: last,
            loop_count: 0,
        }))
    }

    #[inline]
    fn can_loop(&self) -> bool {
        self.loops_remaining > 0
    }

    /// Jump back to the region start, spending one loop
    fn rewind(&mut self) -> bool {
        match self.loops_remaining {
            0 => false,
            LOOP_INFINITE => {
                self.cursor = self.region.start;
                true
            }
            _ => {
                self.loops_remaining -= 1;
                self.cursor = self.region.start;
                true
            }
        }
    }

    /// Push parameters if they changed
    pub fn apply_params(&mut self, mixer: &mut dyn Mixer, params: VoiceParams) {
        if self.state.is_finished() || self.last_params == Some(params) {
            return;
        }
        mixer.set_voice_params(self.voice, &params);
        self.last_params = Some(params);
    }

    pub fn last_params(&self) -> Option<&VoiceParams> {
        self.last_params.as_ref()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
