//! Engine Context
//!
//! Everything the engine owns, behind the engine's one lock: loaded banks,
//! live cues and waves, categories, variables and the mixer. Public API calls
//! and the tick both run against this state; notifications raised along the
//! way are collected here and dispatched by the caller after the lock is
//! released.
//!
//! ## Tick order
//!
//! 1. Drain mixer callbacks (buffer/stream end) and refill or retire waves
//! 2. Advance category volume fades
//! 3. Update every cue in creation order: fades, reserved variables, due
//!    events, RPC evaluation, voice parameters, completion
//! 4. Retry starved stream reads
//! 5. Push changed DSP parameters
//! 6. Destroy stopped managed cues

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rtrb::Consumer;

use crate::catalog::{CueTarget, EngineCatalog, SoundBankDef, WaveBankDef};
use crate::category::{CategoryMixer, MaxInstanceBehavior};
use crate::config::EngineConfig;
use crate::cue::{Cue, CueState, Payload, Selection, StopMode};
use crate::error::{CueError, CueResult};
use crate::event::{EventKind, LOOP_INFINITE, StopScope, TrackVariation, WaveRef};
use crate::handle::{CueHandle, SoundBankHandle, WaveBankHandle, WaveHandle};
use crate::instance::{ActiveWave, EffectOffsets, EventValues, SoundInstance, TrackAction, TrackInstance};
use crate::mixer::{Mixer, VoiceId, VoiceParams};
use crate::notify::Notification;
use crate::rpc::{RpcOutputs, RpcParameter};
use crate::stream::WaveData;
use crate::variable::{VariableStore, Writer};
use crate::variation::{VariationState, VariationTarget};
use crate::wave::{StreamSettings, Wave, WaveOwner, WaveState};

// ═══════════════════════════════════════════════════════════════════════════════
// MIXER CALLBACKS
// ═══════════════════════════════════════════════════════════════════════════════

/// Mixer callback, queued from the audio thread and drained by the tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceEvent {
    /// A submitted buffer finished playing
    BufferEnd { voice: VoiceId, context: u64 },
    /// The voice played its end-of-stream buffer
    StreamEnd { voice: VoiceId },
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOADED BANKS
// ═══════════════════════════════════════════════════════════════════════════════

/// Loaded sound bank
#[derive(Debug)]
struct SoundBank {
    def: SoundBankDef,
    cue_names: HashMap<String, usize>,
    /// Selection state per variation table
    variation_states: Vec<VariationState>,
    /// Catalog RPC curve indices per sound
    sound_rpcs: Vec<Vec<usize>>,
    /// Catalog RPC curve indices per sound, per track
    track_rpcs: Vec<Vec<Vec<usize>>>,
    /// Catalog DSP preset indices per sound
    sound_dsps: Vec<Vec<usize>>,
    /// Live cues created from this bank
    cues: BTreeSet<CueHandle>,
}

/// Loaded wave bank
#[derive(Debug)]
struct WaveBank {
    def: WaveBankDef,
    data: WaveData,
    /// Live waves reading from this bank
    waves: BTreeSet<WaveHandle>,
}

/// Eviction candidate
#[derive(Debug, Clone, Copy)]
struct Candidate {
    handle: CueHandle,
    state: CueState,
    loudness: f32,
    priority: u8,
}

impl Candidate {
    fn of(cue: &Cue) -> Self {
        Self {
            handle: cue.handle,
            state: cue.state,
            loudness: cue.loudness(),
            priority: cue.priority,
        }
    }
}

/// What an instance-limit check decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LimitOutcome {
    /// Slot is (now) free
    Proceed,
    /// Keep the cue prepared and retry next tick
    Wait,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// Engine state guarded by the engine lock
pub struct EngineContext {
    catalog: EngineCatalog,
    config: EngineConfig,
    /// RPC code → catalog curve index
    rpc_index: HashMap<u32, usize>,
    /// DSP preset code → catalog preset index
    dsp_index: HashMap<u32, usize>,
    /// Catalog curves that drive DSP parameters
    dsp_curves: Vec<usize>,
    /// Last value pushed per DSP slot
    dsp_values: Vec<Option<f32>>,
    categories: CategoryMixer,
    variables: VariableStore,
    sound_banks: BTreeMap<SoundBankHandle, SoundBank>,
    wave_banks: BTreeMap<WaveBankHandle, WaveBank>,
    cues: BTreeMap<CueHandle, Cue>,
    waves: BTreeMap<WaveHandle, Wave>,
    voices: HashMap<VoiceId, WaveHandle>,
    mixer: Box<dyn Mixer>,
    rng: ChaCha8Rng,
    voice_events: Consumer<VoiceEvent>,
    now_ms: u64,
    last_tick_ms: u64,
    notifications: Vec<Notification>,
}

impl EngineContext {
    /// Build from a validated catalog
    pub fn new(
        catalog: EngineCatalog,
        config: EngineConfig,
        mixer: Box<dyn Mixer>,
        voice_events: Consumer<VoiceEvent>,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::seed_from_u64(rand::rng().random()),
        };
        let rpc_index = catalog.rpc_by_code();
        let dsp_index = catalog.dsp_by_code();
        let dsp_curves = catalog
            .rpc_curves
            .iter()
            .enumerate()
            .filter(|(_, c)| c.parameter.is_dsp())
            .map(|(i, _)| i)
            .collect();
        let dsp_values = vec![None; catalog.dsp_slot_count()];
        let categories = CategoryMixer::new(catalog.categories.clone());
        let variables = VariableStore::new(catalog.variables.clone());

        Self {
            catalog,
            config,
            rpc_index,
            dsp_index,
            dsp_curves,
            dsp_values,
            categories,
            variables,
            sound_banks: BTreeMap::new(),
            wave_banks: BTreeMap::new(),
            cues: BTreeMap::new(),
            waves: BTreeMap::new(),
            voices: HashMap::new(),
            mixer,
            rng,
            voice_events,
            now_ms: 0,
            last_tick_ms: 0,
            notifications: Vec::new(),
        }
    }

    /// Engine time for the operation about to run
    pub(crate) fn set_now(&mut self, now_ms: u64) {
        self.now_ms = self.now_ms.max(now_ms);
    }

    pub(crate) fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    fn settings(&self) -> StreamSettings {
        StreamSettings {
            chunk_bytes: self.config.stream_chunk_bytes,
            read_ahead: self.config.stream_read_ahead_chunks,
        }
    }

    /// Log and surface a playback-time failure
    fn report(&mut self, cue: Option<CueHandle>, err: &CueError) {
        match cue {
            Some(cue) => log::warn!("{}: {}", cue, err),
            None => log::warn!("{}", err),
        }
        self.notifications.push(Notification::PlaybackError {
            cue,
            message: err.to_string(),
        });
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &EngineCatalog {
        &self.catalog
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Banks
    // ─────────────────────────────────────────────────────────────────────────

    pub fn load_sound_bank(&mut self, def: SoundBankDef) -> CueResult<SoundBankHandle> {
        if let Err(e) = def.validate(&self.catalog) {
            log::error!("Sound bank '{}' rejected: {}", def.name, e);
            return Err(e);
        }
        if self.sound_banks.values().any(|b| b.def.name == def.name) {
            return Err(CueError::MalformedCatalog(format!("sound bank '{}' is already loaded", def.name)));
        }

        let resolve = |codes: &[u32]| -> Vec<usize> {
            codes.iter().filter_map(|c| self.rpc_index.get(c).copied()).collect()
        };
        let sound_rpcs = def.sounds.iter().map(|s| resolve(&s.rpc_codes)).collect();
        let track_rpcs = def
            .sounds
            .iter()
            .map(|s| s.tracks.iter().map(|t| resolve(&t.rpc_codes)).collect())
            .collect();
        let sound_dsps = def
            .sounds
            .iter()
            .map(|s| s.dsp_codes.iter().filter_map(|c| self.dsp_index.get(c).copied()).collect())
            .collect();
        let cue_names = def.cues.iter().enumerate().map(|(i, c)| (c.name.clone(), i)).collect();
        let variation_states = def
            .variation_tables
            .iter()
            .map(|t| VariationState::new(t.entries.len()))
            .collect();

        let handle = SoundBankHandle::generate();
        log::info!(
            "Loaded sound bank '{}' as {} ({} cues, {} sounds)",
            def.name,
            handle,
            def.cues.len(),
            def.sounds.len()
        );
        self.sound_banks.insert(
            handle,
            SoundBank {
                def,
                cue_names,
                variation_states,
                sound_rpcs,
                track_rpcs,
                sound_dsps,
                cues: BTreeSet::new(),
            },
        );
        Ok(handle)
    }

    /// Destroy every cue of the bank, then drop it
    pub fn unload_sound_bank(&mut self, handle: SoundBankHandle) -> CueResult<()> {
        let cues: Vec<CueHandle> = self
            .sound_banks
            .get(&handle)
            .ok_or_else(|| CueError::InvalidHandle(handle.to_string()))?
            .cues
            .iter()
            .copied()
            .collect();
        for cue in cues {
            self.cue_destroy(cue)?;
        }
        if let Some(bank) = self.sound_banks.remove(&handle) {
            log::info!("Unloaded sound bank '{}'", bank.def.name);
        }
        Ok(())
    }

    pub fn load_wave_bank(&mut self, def: WaveBankDef, data: WaveData) -> CueResult<WaveBankHandle> {
        if let Err(e) = def.validate(data.len_hint()) {
            log::error!("Wave bank '{}' rejected: {}", def.name, e);
            return Err(e);
        }
        if self.wave_banks.values().any(|b| b.def.name == def.name) {
            return Err(CueError::MalformedCatalog(format!("wave bank '{}' is already loaded", def.name)));
        }

        let handle = WaveBankHandle::generate();
        log::info!(
            "Loaded wave bank '{}' as {} ({} waves, {})",
            def.name,
            handle,
            def.entries.len(),
            if data.is_streaming() { "streaming" } else { "in memory" }
        );
        self.wave_banks.insert(
            handle,
            WaveBank {
                def,
                data,
                waves: BTreeSet::new(),
            },
        );
        Ok(handle)
    }

    /// Stop every wave reading from the bank, then drop it
    pub fn unload_wave_bank(&mut self, handle: WaveBankHandle) -> CueResult<()> {
        loop {
            let next = self
                .wave_banks
                .get(&handle)
                .ok_or_else(|| CueError::InvalidHandle(handle.to_string()))?
                .waves
                .first()
                .copied();
            match next {
                Some(wave) => self.stop_wave(wave, StopMode::Immediate),
                None => break,
            }
        }
        if let Some(bank) = self.wave_banks.remove(&handle) {
            log::info!("Unloaded wave bank '{}'", bank.def.name);
        }
        Ok(())
    }

    pub fn cue_index(&self, bank: SoundBankHandle, name: &str) -> CueResult<usize> {
        self.sound_bank(bank)?
            .cue_names
            .get(name)
            .copied()
            .ok_or_else(|| CueError::NotFound(format!("cue '{}'", name)))
    }

    fn sound_bank(&self, handle: SoundBankHandle) -> CueResult<&SoundBank> {
        self.sound_banks
            .get(&handle)
            .ok_or_else(|| CueError::InvalidHandle(handle.to_string()))
    }

    /// Stop every live cue of the bank
    pub fn stop_sound_bank(&mut self, handle: SoundBankHandle, mode: StopMode) -> CueResult<()> {
        let cues: Vec<CueHandle> = self.sound_bank(handle)?.cues.iter().copied().collect();
        for cue in cues {
            self.stop_cue(cue, mode)?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Cue lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    fn cue(&self, handle: CueHandle) -> CueResult<&Cue> {
        self.cues
            .get(&handle)
            .ok_or_else(|| CueError::InvalidHandle(handle.to_string()))
    }

    fn cue_mut(&mut self, handle: CueHandle) -> CueResult<&mut Cue> {
        self.cues
            .get_mut(&handle)
            .ok_or_else(|| CueError::InvalidHandle(handle.to_string()))
    }

    /// Create a cue in `Prepared`
    pub fn prepare_cue(&mut self, bank: SoundBankHandle, index: usize) -> CueResult<CueHandle> {
        let cue_count = self.sound_bank(bank)?.def.cues.len();
        if index >= cue_count {
            return Err(CueError::NotFound(format!("cue index {} in {}", index, bank)));
        }
        if self.cues.len() >= self.config.max_cues {
            return Err(CueError::ResourceExhausted(format!(
                "{} live cues (max_cues)",
                self.cues.len()
            )));
        }

        let handle = CueHandle::generate();
        let mut cue = Cue::new(handle, bank, index, self.variables.new_cue_locals());
        cue.updated_ms = self.now_ms;
        self.cues.insert(handle, cue);
        if let Some(bank) = self.sound_banks.get_mut(&bank) {
            bank.cues.insert(handle);
        }
        log::debug!("Prepared {} (cue {} of {})", handle, index, bank);
        Ok(handle)
    }

    /// Prepare and start a cue that destroys itself once stopped.
    /// `Ok(None)` when an instance limit refused it.
    pub fn play_cue(&mut self, bank: SoundBankHandle, index: usize) -> CueResult<Option<CueHandle>> {
        let handle = self.prepare_cue(bank, index)?;
        if let Some(cue) = self.cues.get_mut(&handle) {
            cue.managed = true;
        }
        match self.start_cue(handle, false) {
            Ok(()) => Ok(Some(handle)),
            Err(CueError::ResourceExhausted(reason)) => {
                log::debug!("{} refused: {}", handle, reason);
                self.remove_cue(handle);
                Ok(None)
            }
            Err(e) => {
                self.remove_cue(handle);
                Err(e)
            }
        }
    }

    /// Start a prepared cue, resume a paused one, replay a stopped one
    pub fn cue_play(&mut self, handle: CueHandle) -> CueResult<()> {
        let cue = self.cue(handle)?;
        match cue.state {
            CueState::Prepared if cue.waiting => Ok(()),
            CueState::Prepared => self.start_cue(handle, false),
            CueState::Paused => self.cue_pause(handle, false),
            CueState::Playing | CueState::Stopping => Ok(()),
            CueState::Stopped => {
                let now = self.now_ms;
                let cue = self.cue_mut(handle)?;
                cue.state = CueState::Prepared;
                cue.variation_entry = None;
                cue.updated_ms = now;
                self.start_cue(handle, false)
            }
        }
    }

    pub fn cue_stop(&mut self, handle: CueHandle, mode: StopMode) -> CueResult<()> {
        self.stop_cue(handle, mode)
    }

    pub fn cue_pause(&mut self, handle: CueHandle, paused: bool) -> CueResult<()> {
        let cue = self.cue(handle)?;
        let (state, counted) = (cue.state, cue.counted_category);
        // Play time up to the pause still counts
        if paused && state == CueState::Playing {
            self.update_cue(handle);
        }
        if !paused && state == CueState::Paused {
            if let Some(category) = counted.filter(|&c| self.categories.is_paused(c)) {
                log::debug!("{} held: category {} is paused", handle, category);
                return Ok(());
            }
        }
        let now = self.now_ms;
        let cue = self.cue_mut(handle)?;
        let target = match (cue.state, paused) {
            (CueState::Playing, true) => CueState::Paused,
            (CueState::Paused, false) => CueState::Playing,
            _ => return Ok(()),
        };
        cue.state = target;
        cue.updated_ms = now;
        let waves = cue.waves();
        for wave in waves {
            if let Some(w) = self.waves.get_mut(&wave) {
                if paused {
                    w.pause(&mut *self.mixer);
                } else {
                    w.resume(&mut *self.mixer);
                }
            }
        }
        log::debug!("{} {}", handle, if paused { "paused" } else { "resumed" });
        if !paused {
            // Events due at the resume point (t = 0 for a cue held since play) fire now
            self.update_cue(handle);
        }
        Ok(())
    }

    /// Stop if needed and forget the cue
    pub fn cue_destroy(&mut self, handle: CueHandle) -> CueResult<()> {
        let state = self.cue(handle)?.state;
        if state != CueState::Stopped {
            self.stop_cue(handle, StopMode::Immediate)?;
        }
        self.remove_cue(handle);
        log::debug!("Destroyed {}", handle);
        Ok(())
    }

    pub fn cue_state(&self, handle: CueHandle) -> CueResult<CueState> {
        Ok(self.cue(handle)?.state)
    }

    /// Waves currently owned by the cue
    pub fn cue_waves(&self, handle: CueHandle) -> CueResult<Vec<WaveHandle>> {
        Ok(self.cue(handle)?.waves())
    }

    /// SetValue results on one track of a playing sound
    pub fn cue_track_values(&self, handle: CueHandle, track: usize) -> CueResult<EventValues> {
        self.cue(handle)?
            .sound()
            .and_then(|s| s.tracks.get(track))
            .map(|t| t.values)
            .ok_or_else(|| CueError::NotFound(format!("track {} of {}", track, handle)))
    }

    pub fn cue_set_variable(&mut self, handle: CueHandle, index: usize, value: f32) -> CueResult<f32> {
        let cue = self
            .cues
            .get_mut(&handle)
            .ok_or_else(|| CueError::InvalidHandle(handle.to_string()))?;
        self.variables.set_local(&mut cue.locals, index, value, Writer::Public)
    }

    pub fn cue_get_variable(&self, handle: CueHandle, index: usize) -> CueResult<f32> {
        self.variables.get_local(&self.cue(handle)?.locals, index)
    }

    /// Set the 3-D output matrix of every voice of the cue
    pub fn cue_apply_3d(&mut self, handle: CueHandle, matrix: Vec<f32>) -> CueResult<()> {
        let cue = self.cue_mut(handle)?;
        let waves = cue.waves();
        for wave in waves {
            if let Some(w) = self.waves.get(&wave) {
                self.mixer.set_output_matrix(w.voice, &matrix);
            }
        }
        if let Some(cue) = self.cues.get_mut(&handle) {
            cue.matrix = Some(matrix);
        }
        Ok(())
    }

    fn remove_cue(&mut self, handle: CueHandle) {
        if let Some(cue) = self.cues.remove(&handle) {
            if let Some(bank) = self.sound_banks.get_mut(&cue.bank) {
                bank.cues.remove(&handle);
            }
        }
    }

    /// Run instance limits and selection, then begin playback.
    /// `retry` is set for cues already waiting on a `Queue` limit.
    fn start_cue(&mut self, handle: CueHandle, retry: bool) -> CueResult<()> {
        let cue = self.cue(handle)?;
        let (bank_handle, index, queued) = (cue.bank, cue.index, cue.queued);
        let cue_def = self
            .sound_bank(bank_handle)?
            .def
            .cues
            .get(index)
            .ok_or_else(|| CueError::NotFound(format!("cue index {}", index)))?;
        let (limit, target) = (cue_def.limit, cue_def.target);
        let (fade_in_ms, fade_out_ms) = (cue_def.fade_in_ms, cue_def.fade_out_ms);

        if limit.is_limited() {
            let peers: Vec<Candidate> = self
                .cues
                .values()
                .filter(|c| c.handle != handle && c.bank == bank_handle && c.index == index && c.state.is_active())
                .map(Candidate::of)
                .collect();
            if limit.is_full(peers.len() as u32)
                && self.resolve_limit(handle, limit.behavior, &peers, retry)? == LimitOutcome::Wait
            {
                return Ok(());
            }
        }

        let selection = match (queued, target) {
            (Some(selection), _) => selection,
            (None, CueTarget::Sound(sound)) => Selection::Sound(sound),
            (None, CueTarget::Variation(table)) => self.select_variation(handle, bank_handle, table)?,
        };

        if let Selection::Sound(sound) = selection {
            let category = self.sound_bank(bank_handle)?.def.sounds[sound].category;
            if self.categories.is_full(category) {
                let peers: Vec<Candidate> = self
                    .cues
                    .values()
                    .filter(|c| c.handle != handle && c.counted_category == Some(category))
                    .map(Candidate::of)
                    .collect();
                let behavior = self.categories.limit(category).behavior;
                if self.resolve_limit(handle, behavior, &peers, retry)? == LimitOutcome::Wait {
                    self.cue_mut(handle)?.queued = Some(selection);
                    return Ok(());
                }
            }
        }

        self.begin(handle, selection, fade_in_ms, fade_out_ms)
    }

    /// Apply a max-instance behavior against `peers`
    fn resolve_limit(
        &mut self,
        handle: CueHandle,
        behavior: MaxInstanceBehavior,
        peers: &[Candidate],
        retry: bool,
    ) -> CueResult<LimitOutcome> {
        if retry {
            return Ok(LimitOutcome::Wait);
        }

        let victim = match behavior {
            MaxInstanceBehavior::FailToPlay => None,
            MaxInstanceBehavior::Queue => {
                let oldest = peers
                    .iter()
                    .filter(|c| c.state != CueState::Stopping)
                    .min_by_key(|c| c.handle);
                if let Some(oldest) = oldest {
                    log::debug!("{} queued behind {}", handle, oldest.handle);
                    self.stop_cue(oldest.handle, StopMode::Release)?;
                }
                self.cue_mut(handle)?.waiting = true;
                return Ok(LimitOutcome::Wait);
            }
            MaxInstanceBehavior::ReplaceOldest => peers.iter().min_by_key(|c| c.handle),
            MaxInstanceBehavior::ReplaceQuietest => peers
                .iter()
                .min_by(|a, b| a.loudness.total_cmp(&b.loudness).then(a.handle.cmp(&b.handle))),
            MaxInstanceBehavior::ReplaceLowestPriority => peers
                .iter()
                .max_by(|a, b| a.priority.cmp(&b.priority).then(b.handle.cmp(&a.handle))),
        };

        match victim {
            Some(victim) => {
                log::debug!("{} replaces {}", handle, victim.handle);
                self.stop_cue(victim.handle, StopMode::Immediate)?;
                Ok(LimitOutcome::Proceed)
            }
            None => Err(CueError::ResourceExhausted(format!(
                "instance limit reached for {}",
                handle
            ))),
        }
    }

    /// Pick an entry from a cue's variation table
    fn select_variation(&mut self, handle: CueHandle, bank: SoundBankHandle, table: usize) -> CueResult<Selection> {
        let now = self.now_ms;
        let cue = self
            .cues
            .get_mut(&handle)
            .ok_or_else(|| CueError::InvalidHandle(handle.to_string()))?;
        let bank = self
            .sound_banks
            .get_mut(&bank)
            .ok_or_else(|| CueError::InvalidHandle(bank.to_string()))?;
        let def = bank
            .def
            .variation_tables
            .get(table)
            .ok_or_else(|| CueError::NotFound(format!("variation table {}", table)))?;
        let control = def.variable.map(|v| self.variables.value_for(v, &cue.locals));
        let state = &mut bank.variation_states[table];

        let pick = state
            .select(def.mode, &def.entries, control, now, &mut self.rng)
            .ok_or_else(|| CueError::NotFound(format!("variation table {} is empty", table)))?;
        cue.variation_entry = Some(pick);
        Ok(match def.entries[pick].target {
            VariationTarget::Sound(sound) => Selection::Sound(sound),
            VariationTarget::Wave(wave) => Selection::Wave(wave),
        })
    }

    /// Instantiate the selection and enter `Playing` (`Paused` inside a paused category)
    fn begin(&mut self, handle: CueHandle, selection: Selection, fade_in_ms: u32, fade_out_ms: u32) -> CueResult<()> {
        let now = self.now_ms;
        let cue = self
            .cues
            .get_mut(&handle)
            .ok_or_else(|| CueError::InvalidHandle(handle.to_string()))?;
        let bank_handle = cue.bank;
        let bank = self
            .sound_banks
            .get(&bank_handle)
            .ok_or_else(|| CueError::InvalidHandle(bank_handle.to_string()))?;

        let mut held = false;
        match selection {
            Selection::Sound(sound) => {
                let def = &bank.def.sounds[sound];
                held = self.categories.is_paused(def.category);
                let (cat_in, cat_out) = self
                    .categories
                    .get(def.category)
                    .map_or((0, 0), |c| (c.def.fade_in_ms, c.def.fade_out_ms));
                cue.fade_in_ms = if fade_in_ms > 0 { fade_in_ms } else { cat_in };
                cue.fade_out_ms = if fade_out_ms > 0 { fade_out_ms } else { cat_out };
                cue.priority = def.priority;
                cue.payload = Some(Payload::Sound(SoundInstance::new(sound, def, &mut self.rng)));
                self.categories.on_cue_started(def.category);
                cue.counted_category = Some(def.category);
            }
            Selection::Wave(_) => {
                cue.fade_in_ms = fade_in_ms;
                cue.fade_out_ms = fade_out_ms;
                cue.payload = Some(Payload::Wave(None));
            }
        }

        // A paused category holds new cues until it resumes
        cue.state = if held { CueState::Paused } else { CueState::Playing };
        cue.waiting = false;
        cue.queued = None;
        cue.elapsed_ms = 0;
        cue.release_elapsed_ms = None;
        cue.updated_ms = now;
        cue.begin_fade_in();
        log::debug!("{} {}", handle, if held { "held by paused category" } else { "playing" });

        if let Selection::Wave(wave) = selection {
            let owner = WaveOwner { cue: handle, track: None };
            match self.spawn_wave(bank_handle, wave, 0, owner, true) {
                Ok(wave) => {
                    if let Some(cue) = self.cues.get_mut(&handle) {
                        cue.payload = Some(Payload::Wave(Some(wave)));
                    }
                }
                Err(e) => self.report(Some(handle), &e),
            }
        }

        // Events at t = 0 fire now, not on the next tick
        self.update_cue(handle);
        Ok(())
    }

    /// Carry out a stop request
    fn stop_cue(&mut self, handle: CueHandle, mode: StopMode) -> CueResult<()> {
        let now = self.now_ms;
        let cue = self.cue_mut(handle)?;
        match (cue.state, mode) {
            (CueState::Stopped, _) => Ok(()),
            (CueState::Prepared, _) => {
                cue.waiting = false;
                cue.queued = None;
                self.finish_cue(handle);
                Ok(())
            }
            (_, StopMode::Immediate) => {
                self.teardown(handle);
                Ok(())
            }
            (CueState::Stopping, StopMode::Release) => Ok(()),
            (_, StopMode::Release) => {
                let was_paused = cue.state == CueState::Paused;
                if was_paused {
                    cue.updated_ms = now;
                }
                cue.state = CueState::Stopping;
                cue.release_elapsed_ms = Some(0);
                let fading = cue.begin_fade_out();
                let waves = cue.waves();
                let tracks = cue.sound().map_or(0, |s| s.tracks.len());

                if was_paused {
                    for wave in &waves {
                        if let Some(w) = self.waves.get_mut(wave) {
                            w.resume(&mut *self.mixer);
                        }
                    }
                }
                if !fading {
                    for track in 0..tracks {
                        self.stop_track(handle, track, StopMode::Release);
                    }
                    if tracks == 0 {
                        for wave in waves {
                            self.stop_wave(wave, StopMode::Release);
                        }
                    }
                }
                log::debug!("{} releasing{}", handle, if fading { " (fade-out)" } else { "" });
                Ok(())
            }
        }
    }

    /// Stop everything the cue owns (children first) and mark it stopped
    fn teardown(&mut self, handle: CueHandle) {
        let Some(cue) = self.cues.get(&handle) else {
            return;
        };
        let tracks = cue.sound().map_or(0, |s| s.tracks.len());
        for track in 0..tracks {
            self.stop_track(handle, track, StopMode::Immediate);
        }
        let waves = self.cues.get(&handle).map(|c| c.waves()).unwrap_or_default();
        for wave in waves {
            self.stop_wave(wave, StopMode::Immediate);
        }
        self.finish_cue(handle);
    }

    /// Enter `Stopped` and release the category slot
    fn finish_cue(&mut self, handle: CueHandle) {
        let Some(cue) = self.cues.get_mut(&handle) else {
            return;
        };
        cue.state = CueState::Stopped;
        cue.payload = None;
        cue.waiting = false;
        cue.queued = None;
        cue.release_elapsed_ms = None;
        if let Some(category) = cue.counted_category.take() {
            self.categories.on_cue_stopped(category);
        }
        log::debug!("{} stopped", handle);
        self.notifications.push(Notification::CueStopped { cue: handle });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tracks & waves
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a voice and a wave for `wave_ref`; optionally start it
    fn spawn_wave(
        &mut self,
        bank: SoundBankHandle,
        wave_ref: WaveRef,
        loop_count: u8,
        owner: WaveOwner,
        start: bool,
    ) -> CueResult<WaveHandle> {
        let settings = self.settings();
        let sound_bank = self
            .sound_banks
            .get(&bank)
            .ok_or_else(|| CueError::InvalidHandle(bank.to_string()))?;
        let name = sound_bank
            .def
            .wave_banks
            .get(wave_ref.wave_bank)
            .ok_or_else(|| CueError::NotFound(format!("wave bank slot {}", wave_ref.wave_bank)))?;
        let (&bank_handle, wave_bank) = self
            .wave_banks
            .iter_mut()
            .find(|(_, b)| &b.def.name == name)
            .ok_or_else(|| CueError::NotFound(format!("wave bank '{}' is not loaded", name)))?;
        let entry = wave_bank
            .def
            .entries
            .get(wave_ref.wave)
            .ok_or_else(|| CueError::NotFound(format!("wave {} in '{}'", wave_ref.wave, name)))?;

        let voice = self.mixer.create_voice(&entry.format)?;
        let handle = WaveHandle::generate();
        let mut wave = Wave::new(handle, bank_handle, wave_ref.wave, entry, loop_count, voice).with_owner(owner);

        if let Err(e) = wave.prepare(&mut wave_bank.data, settings) {
            self.mixer.destroy_voice(voice);
            return Err(e);
        }
        if let Some(matrix) = self.cues.get(&owner.cue).and_then(|c| c.matrix.as_deref()) {
            self.mixer.set_output_matrix(voice, matrix);
        }
        if start {
            if let Err(e) = wave.play(&mut *self.mixer) {
                wave.stop(&mut *self.mixer, StopMode::Immediate);
                return Err(e);
            }
        }

        wave_bank.waves.insert(handle);
        self.voices.insert(voice, handle);
        self.waves.insert(handle, wave);
        Ok(handle)
    }

    /// Pick the wave a PlayWave event plays next
    fn pick_track_wave(&mut self, handle: CueHandle, track: usize, event: usize) -> Option<(SoundBankHandle, WaveRef)> {
        let now = self.now_ms;
        let cue = self.cues.get_mut(&handle)?;
        let bank = self.sound_banks.get(&cue.bank)?;
        let Some(Payload::Sound(sound)) = &mut cue.payload else {
            return None;
        };
        let def = bank.def.sounds.get(sound.sound)?.tracks.get(track)?.events.get(event)?;
        let EventKind::PlayWave(play) = &def.kind else {
            return None;
        };
        let inst = sound.tracks.get_mut(track)?;
        let wave = match &play.variation {
            TrackVariation::Simple(wave) => *wave,
            TrackVariation::Complex { mode, waves } => {
                let pick = inst.variations.get_mut(event)?.select(*mode, waves, None, now, &mut self.rng)?;
                waves[pick].wave
            }
        };
        Some((cue.bank, wave))
    }

    /// A PlayWave event fired
    fn track_play_wave(&mut self, handle: CueHandle, track: usize, event: usize) {
        let Some((bank, wave_ref)) = self.pick_track_wave(handle, track, event) else {
            return;
        };

        let Some((wave_loops, busy, old_upcoming)) = self.setup_track(handle, track, event) else {
            return;
        };

        // A busy track queues the new wave behind the current one
        if busy {
            if let Some(old) = old_upcoming {
                self.set_upcoming(handle, track, None);
                self.stop_wave(old, StopMode::Immediate);
            }
        }

        let owner = WaveOwner { cue: handle, track: Some(track) };
        match self.spawn_wave(bank, wave_ref, wave_loops, owner, !busy) {
            Ok(wave) => {
                let active = ActiveWave { handle: wave, event };
                if busy {
                    self.set_upcoming(handle, track, Some(active));
                } else {
                    if let Some(inst) = self.track_mut(handle, track) {
                        inst.wave = Some(active);
                    }
                    self.prepare_upcoming(handle, track);
                }
            }
            Err(e) => self.report(Some(handle), &e),
        }
    }

    /// Apply a PlayWave event's settings to its track. Returns the wave loop
    /// count, whether the track is busy, and the upcoming wave to replace.
    fn setup_track(&mut self, handle: CueHandle, track: usize, event: usize) -> Option<(u8, bool, Option<WaveHandle>)> {
        let cue = self.cues.get_mut(&handle)?;
        let bank = self.sound_banks.get(&cue.bank)?;
        let Some(Payload::Sound(sound)) = &mut cue.payload else {
            return None;
        };
        let def = bank.def.sounds.get(sound.sound)?.tracks.get(track)?.events.get(event)?;
        let EventKind::PlayWave(play) = &def.kind else {
            return None;
        };
        let inst = sound.tracks.get_mut(track)?;
        inst.effect = play
            .effect_variation
            .as_ref()
            .map(|e| EffectOffsets::draw(e, &mut self.rng))
            .unwrap_or_default();
        inst.position = play.position;
        inst.angle = play.angle;

        // Complex variations loop by picking a new wave each pass
        let wave_loops = match play.variation {
            TrackVariation::Complex { .. } => {
                inst.variation_loops = play.loop_count;
                0
            }
            TrackVariation::Simple(_) => {
                inst.variation_loops = 0;
                play.loop_count
            }
        };
        Some((wave_loops, inst.wave.is_some(), inst.upcoming.map(|u| u.handle)))
    }

    fn track_mut(&mut self, handle: CueHandle, track: usize) -> Option<&mut TrackInstance> {
        match &mut self.cues.get_mut(&handle)?.payload {
            Some(Payload::Sound(sound)) => sound.tracks.get_mut(track),
            _ => None,
        }
    }

    fn set_upcoming(&mut self, handle: CueHandle, track: usize, upcoming: Option<ActiveWave>) {
        if let Some(inst) = self.track_mut(handle, track) {
            inst.upcoming = upcoming;
        }
    }

    /// Prepare the next wave of a looping track variation
    fn prepare_upcoming(&mut self, handle: CueHandle, track: usize) {
        let Some(inst) = self.track_mut(handle, track) else {
            return;
        };
        let Some(current) = inst.wave else {
            return;
        };
        if inst.stopped || inst.variation_loops == 0 || inst.upcoming.is_some() {
            return;
        }
        let Some((bank, wave_ref)) = self.pick_track_wave(handle, track, current.event) else {
            return;
        };
        let owner = WaveOwner { cue: handle, track: Some(track) };
        match self.spawn_wave(bank, wave_ref, 0, owner, false) {
            Ok(wave) => self.set_upcoming(
                handle,
                track,
                Some(ActiveWave {
                    handle: wave,
                    event: current.event,
                }),
            ),
            Err(e) => self.report(Some(handle), &e),
        }
    }

    /// Stop a track: no more events, no more variation loops
    fn stop_track(&mut self, handle: CueHandle, track: usize, mode: StopMode) {
        let Some(inst) = self.track_mut(handle, track) else {
            return;
        };
        inst.stopped = true;
        inst.variation_loops = 0;
        let upcoming = inst.upcoming.take();
        let current = inst.wave;
        if let Some(upcoming) = upcoming {
            self.stop_wave(upcoming.handle, StopMode::Immediate);
        }
        if let Some(current) = current {
            self.stop_wave(current.handle, mode);
        }
    }

    fn stop_wave(&mut self, handle: WaveHandle, mode: StopMode) {
        let Some(wave) = self.waves.get_mut(&handle) else {
            return;
        };
        wave.stop(&mut *self.mixer, mode);
        if wave.state().is_finished() {
            self.on_wave_finished(handle);
        }
    }

    /// Retire a stopped wave and let its track move on
    fn on_wave_finished(&mut self, handle: WaveHandle) {
        let Some(wave) = self.waves.remove(&handle) else {
            return;
        };
        self.voices.remove(&wave.voice);
        if let Some(bank) = self.wave_banks.get_mut(&wave.bank) {
            bank.waves.remove(&handle);
        }
        self.notifications.push(Notification::WaveStopped {
            wave: handle,
            cue: wave.owner.map(|o| o.cue),
        });

        let Some(owner) = wave.owner else {
            return;
        };
        let Some(cue) = self.cues.get_mut(&owner.cue) else {
            return;
        };
        let promoted = match (&mut cue.payload, owner.track) {
            (Some(Payload::Wave(current)), None) => {
                if *current == Some(handle) {
                    *current = None;
                }
                None
            }
            (Some(Payload::Sound(sound)), Some(track)) => {
                let Some(inst) = sound.tracks.get_mut(track) else {
                    return;
                };
                if inst.upcoming.map(|u| u.handle) == Some(handle) {
                    inst.upcoming = None;
                    return;
                }
                if inst.wave.map(|w| w.handle) != Some(handle) {
                    return;
                }
                inst.wave = None;
                if inst.stopped {
                    return;
                }
                match inst.upcoming.take() {
                    Some(next) => {
                        inst.wave = Some(next);
                        if inst.variation_loops != LOOP_INFINITE {
                            inst.variation_loops = inst.variation_loops.saturating_sub(1);
                        }
                        Some((track, next))
                    }
                    None => None,
                }
            }
            _ => None,
        };

        if let Some((track, next)) = promoted {
            let result = match self.waves.get_mut(&next.handle) {
                Some(w) => w.play(&mut *self.mixer),
                None => Ok(()),
            };
            match result {
                Ok(()) => self.prepare_upcoming(owner.cue, track),
                Err(e) => {
                    self.report(Some(owner.cue), &e);
                    self.stop_wave(next.handle, StopMode::Immediate);
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Variables & categories
    // ─────────────────────────────────────────────────────────────────────────

    pub fn variable_index(&self, name: &str) -> CueResult<usize> {
        self.variables.index_of(name)
    }

    pub fn set_global_variable(&mut self, index: usize, value: f32) -> CueResult<f32> {
        self.variables.set_global(index, value, Writer::Public)
    }

    pub fn get_global_variable(&self, index: usize) -> CueResult<f32> {
        self.variables.get_global(index)
    }

    pub fn category_index(&self, name: &str) -> CueResult<usize> {
        self.categories.index_of(name)
    }

    pub fn set_category_volume(&mut self, category: usize, volume: f32, fade_ms: u32) -> CueResult<()> {
        self.categories.set_volume(category, volume, fade_ms)
    }

    /// Effective volume (own × ancestors)
    pub fn category_volume(&self, category: usize) -> CueResult<f32> {
        self.category_checked(category)?;
        Ok(self.categories.effective_volume(category))
    }

    pub fn category_instance_count(&self, category: usize) -> CueResult<u32> {
        self.category_checked(category)?;
        Ok(self.categories.instance_count(category))
    }

    fn category_checked(&self, category: usize) -> CueResult<()> {
        match self.categories.get(category) {
            Some(_) => Ok(()),
            None => Err(CueError::NotFound(format!("category {}", category))),
        }
    }

    /// Cues counted in `category` or any of its descendants
    fn cues_in_category(&self, category: usize) -> Vec<CueHandle> {
        self.cues
            .values()
            .filter(|c| c.counted_category.is_some_and(|cat| self.categories.is_within(cat, category)))
            .map(|c| c.handle)
            .collect()
    }

    pub fn stop_category(&mut self, category: usize, mode: StopMode) -> CueResult<()> {
        self.category_checked(category)?;
        for cue in self.cues_in_category(category) {
            self.stop_cue(cue, mode)?;
        }
        Ok(())
    }

    pub fn pause_category(&mut self, category: usize, paused: bool) -> CueResult<()> {
        self.categories.set_paused(category, paused)?;
        for cue in self.cues_in_category(category) {
            self.cue_pause(cue, paused)?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tick
    // ─────────────────────────────────────────────────────────────────────────

    /// Advance the engine to `now_ms`
    pub fn update(&mut self, now_ms: u64) {
        self.set_now(now_ms);
        let now = self.now_ms;
        let delta = now.saturating_sub(self.last_tick_ms);
        self.last_tick_ms = now;

        self.drain_voice_events();
        self.categories.update(clamp_ms(delta));

        let handles: Vec<CueHandle> = self.cues.keys().copied().collect();
        for handle in handles {
            self.update_cue(handle);
        }

        self.service_waves();
        self.update_dsp();

        let finished: Vec<CueHandle> = self
            .cues
            .values()
            .filter(|c| c.managed && c.state == CueState::Stopped)
            .map(|c| c.handle)
            .collect();
        for handle in finished {
            self.remove_cue(handle);
        }
    }

    fn drain_voice_events(&mut self) {
        let settings = self.settings();
        while let Ok(event) = self.voice_events.pop() {
            let (voice, stream_end) = match event {
                VoiceEvent::BufferEnd { voice, .. } => (voice, false),
                VoiceEvent::StreamEnd { voice } => (voice, true),
            };
            let Some(&handle) = self.voices.get(&voice) else {
                continue;
            };
            let Some(wave) = self.waves.get_mut(&handle) else {
                continue;
            };

            let result = if stream_end {
                wave.on_stream_end(&mut *self.mixer);
                Ok(())
            } else {
                match self.wave_banks.get_mut(&wave.bank) {
                    Some(bank) => wave.on_buffer_end(&mut *self.mixer, &mut bank.data, settings),
                    None => Ok(()),
                }
            };
            let owner = wave.owner.map(|o| o.cue);
            let finished = wave.state().is_finished();

            if let Err(e) = result {
                self.report(owner, &e);
            }
            if finished {
                self.on_wave_finished(handle);
            }
        }
    }

    fn service_waves(&mut self) {
        let settings = self.settings();
        let starved: Vec<WaveHandle> = self
            .waves
            .values()
            .filter(|w| w.is_starved())
            .map(|w| w.handle)
            .collect();
        for handle in starved {
            let Some(wave) = self.waves.get_mut(&handle) else {
                continue;
            };
            let result = match self.wave_banks.get_mut(&wave.bank) {
                Some(bank) => wave.service(&mut *self.mixer, &mut bank.data, settings),
                None => Ok(()),
            };
            let owner = wave.owner.map(|o| o.cue);
            let finished = wave.state().is_finished();
            if let Err(e) = result {
                self.report(owner, &e);
            }
            if finished {
                self.on_wave_finished(handle);
            }
        }
    }

    /// Advance one cue to the current engine time
    fn update_cue(&mut self, handle: CueHandle) {
        let now = self.now_ms;
        let Some(cue) = self.cues.get_mut(&handle) else {
            return;
        };
        let delta = now.saturating_sub(cue.updated_ms);
        cue.updated_ms = now;

        match cue.state {
            CueState::Prepared if cue.waiting => {
                if let Err(e) = self.start_cue(handle, true) {
                    self.report(Some(handle), &e);
                    self.finish_cue(handle);
                }
                return;
            }
            CueState::Prepared | CueState::Paused | CueState::Stopped => return,
            CueState::Playing => {
                cue.elapsed_ms += delta;
                cue.fade.advance(clamp_ms(delta));
            }
            CueState::Stopping => {
                cue.fade.advance(clamp_ms(delta));
                if let Some(release) = cue.release_elapsed_ms.as_mut() {
                    *release += delta;
                }
            }
        }
        let playing = cue.state == CueState::Playing;

        self.update_reserved(handle);
        if playing {
            let actions = self.advance_tracks(handle);
            self.apply_actions(handle, actions);
        }
        self.update_voices(handle);
        self.check_completion(handle);
    }

    /// Maintain the engine-written cue variables
    fn update_reserved(&mut self, handle: CueHandle) {
        let reserved = self.variables.reserved();
        if reserved.num_cue_instances.is_none() && reserved.attack_time.is_none() && reserved.release_time.is_none() {
            return;
        }
        let Some(cue) = self.cues.get(&handle) else {
            return;
        };
        let (bank, index) = (cue.bank, cue.index);
        let instances = self
            .cues
            .values()
            .filter(|c| c.bank == bank && c.index == index && c.state.is_active())
            .count();

        let Some(cue) = self.cues.get_mut(&handle) else {
            return;
        };
        let values = [
            (reserved.num_cue_instances, instances as f32),
            (reserved.attack_time, cue.elapsed_ms as f32),
            (reserved.release_time, cue.release_elapsed_ms.unwrap_or(0) as f32),
        ];
        for (index, value) in values {
            if let Some(index) = index {
                let _ = self.variables.set_local(&mut cue.locals, index, value, Writer::Engine);
            }
        }
    }

    /// Fire due events on every track
    fn advance_tracks(&mut self, handle: CueHandle) -> Vec<(usize, TrackAction)> {
        let mut actions = Vec::new();
        let Some(cue) = self.cues.get_mut(&handle) else {
            return actions;
        };
        let Some(bank) = self.sound_banks.get(&cue.bank) else {
            return actions;
        };
        let elapsed = cue.elapsed_ms;
        let Some(Payload::Sound(sound)) = &mut cue.payload else {
            return actions;
        };
        let Some(def) = bank.def.sounds.get(sound.sound) else {
            return actions;
        };
        for (index, (inst, track)) in sound.tracks.iter_mut().zip(&def.tracks).enumerate() {
            for action in inst.advance(track, elapsed, &mut self.rng) {
                actions.push((index, action));
            }
        }
        actions
    }

    fn apply_actions(&mut self, handle: CueHandle, actions: Vec<(usize, TrackAction)>) {
        for (track, action) in actions {
            if self.cues.get(&handle).map(|c| c.state) != Some(CueState::Playing) {
                return;
            }
            match action {
                TrackAction::PlayWave { event } => self.track_play_wave(handle, track, event),
                TrackAction::Marker { marker } => {
                    log::trace!("{} track {} marker {}", handle, track, marker);
                    self.notifications.push(Notification::Marker { cue: handle, track, marker });
                }
                TrackAction::Stop(stop) => {
                    let mode = StopMode::from_immediate(stop.immediate);
                    match stop.scope {
                        StopScope::Track => self.stop_track(handle, track, mode),
                        StopScope::Cue => {
                            if let Err(e) = self.stop_cue(handle, mode) {
                                self.report(Some(handle), &e);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Evaluate RPCs and push voice parameters for every wave of the cue
    fn update_voices(&mut self, handle: CueHandle) {
        let Some(cue) = self.cues.get_mut(&handle) else {
            return;
        };
        let gain = cue.fade.current();
        match &mut cue.payload {
            Some(Payload::Sound(sound)) => {
                let Some(bank) = self.sound_banks.get(&cue.bank) else {
                    return;
                };
                let Some(def) = bank.def.sounds.get(sound.sound) else {
                    return;
                };
                let gain = gain * self.categories.effective_volume(def.category);
                let rules = &self.config.rpc_combine;
                let floor = self.config.silence_threshold_db;
                let locals = &cue.locals;
                let mut loudest = 0.0f32;

                for (index, (inst, track)) in sound.tracks.iter_mut().zip(&def.tracks).enumerate() {
                    let curves = bank.sound_rpcs[sound.sound]
                        .iter()
                        .chain(&bank.track_rpcs[sound.sound][index])
                        .map(|&c| &self.catalog.rpc_curves[c]);
                    inst.rpc = RpcOutputs::evaluate(curves, |v| self.variables.value_for(v, locals), rules);

                    let params = inst.voice_params(def, track, gain, rules, floor);
                    loudest = loudest.max(params.volume);
                    for wave in inst.waves() {
                        if let Some(w) = self.waves.get_mut(&wave) {
                            w.apply_params(&mut *self.mixer, params);
                        }
                    }
                }
                sound.last_volume = loudest;
            }
            Some(Payload::Wave(Some(wave))) => {
                let wave = *wave;
                let params = VoiceParams {
                    volume: gain,
                    ..VoiceParams::default()
                };
                if let Some(w) = self.waves.get_mut(&wave) {
                    w.apply_params(&mut *self.mixer, params);
                }
            }
            Some(Payload::Wave(None)) | None => {}
        }
    }

    /// Move a cue to `Stopped` once its content is done
    fn check_completion(&mut self, handle: CueHandle) {
        let Some(cue) = self.cues.get(&handle) else {
            return;
        };
        let idle = match &cue.payload {
            Some(Payload::Sound(sound)) => sound.is_done(),
            Some(Payload::Wave(wave)) => wave.is_none(),
            None => true,
        };
        match cue.state {
            CueState::Playing if idle => self.finish_cue(handle),
            CueState::Stopping if cue.is_faded_out() => self.teardown(handle),
            CueState::Stopping if cue.waves().is_empty() && !cue.fade.is_active() => self.finish_cue(handle),
            _ => {}
        }
    }

    /// Presets routed by at least one live sound
    fn routed_presets(&self) -> Vec<bool> {
        let mut routed = vec![false; self.catalog.dsp_presets.len()];
        for cue in self.cues.values().filter(|c| c.state.is_active()) {
            let (Some(sound), Some(bank)) = (cue.sound(), self.sound_banks.get(&cue.bank)) else {
                continue;
            };
            for &preset in bank.sound_dsps.get(sound.sound).into_iter().flatten() {
                routed[preset] = true;
            }
        }
        routed
    }

    /// Evaluate DSP-targeting RPCs on global values and push changes for
    /// presets that a live sound routes to
    fn update_dsp(&mut self) {
        if self.dsp_curves.is_empty() {
            return;
        }
        let routed = self.routed_presets();
        let mut values: Vec<Option<f32>> = vec![None; self.dsp_values.len()];
        for &index in &self.dsp_curves {
            let curve = &self.catalog.rpc_curves[index];
            let RpcParameter::Dsp(slot) = curve.parameter else {
                continue;
            };
            let Some((preset, _)) = self.catalog.dsp_slot(slot) else {
                continue;
            };
            if !routed[preset] {
                continue;
            }
            let Some(value) = values.get_mut(slot as usize) else {
                continue;
            };
            let y = curve.evaluate(self.variables.global_value(curve.variable));
            *value = Some(self.config.rpc_combine.dsp.combine(*value, y));
        }

        for (slot, value) in values.into_iter().enumerate() {
            let Some((preset, parameter)) = self.catalog.dsp_slot(slot as u16) else {
                continue;
            };
            let Some(value) = value else {
                // Unrouted: push afresh once a sound routes to it again
                if !routed[preset] {
                    self.dsp_values[slot] = None;
                }
                continue;
            };
            let range = self.catalog.dsp_presets[preset].parameters[parameter];
            let value = value.clamp(range.min, range.max);
            if self.dsp_values[slot] != Some(value) {
                self.mixer.set_dsp_parameter(preset, parameter, value);
                self.dsp_values[slot] = Some(value);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Introspection
    // ─────────────────────────────────────────────────────────────────────────

    pub fn live_cue_count(&self) -> usize {
        self.cues.len()
    }

    pub fn live_wave_count(&self) -> usize {
        self.waves.len()
    }

    pub fn wave_state(&self, handle: WaveHandle) -> CueResult<WaveState> {
        self.waves
            .get(&handle)
            .map(|w| w.state())
            .ok_or_else(|| CueError::InvalidHandle(handle.to_string()))
    }

    /// Parameters last pushed to the wave's voice
    pub fn wave_params(&self, handle: WaveHandle) -> CueResult<Option<VoiceParams>> {
        self.waves
            .get(&handle)
            .map(|w| w.last_params().copied())
            .ok_or_else(|| CueError::InvalidHandle(handle.to_string()))
    }
}

#[inline]
fn clamp_ms(delta: u64) -> u32 {
    delta.min(u32::MAX as u64) as u32
}
