//! Audio Engine
//!
//! Public entry point of the cue runtime.
//!
//! ## Thread Safety Design
//!
//! The engine is split into three parts sharing one [`EngineShared`]:
//! - `AudioEngine`: Host-facing API (load banks, play cues, set variables, tick)
//! - `VoiceCallbacks`: Handed to the mixer; queues buffer/stream-end events
//!   through a lock-free ring and may tick the engine at the start of a
//!   processing pass without ever blocking
//! - `EngineContext`: All mutable state, behind one lock
//!
//! Notifications raised during an operation are dispatched after the
//! context lock is released, so a notification callback may call back into
//! the engine.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use rtrb::{Producer, RingBuffer};

use crate::catalog::{EngineCatalog, SoundBankDef, WaveBankDef};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::context::{EngineContext, VoiceEvent};
use crate::cue::{CueState, StopMode};
use crate::error::CueResult;
use crate::handle::{CueHandle, SoundBankHandle, WaveBankHandle, WaveHandle};
use crate::instance::EventValues;
use crate::mixer::{Mixer, VoiceId, VoiceParams};
use crate::notify::{Notification, NotificationCallback};
use crate::stream::WaveData;
use crate::wave::WaveState;

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// State shared by the engine and its voice callbacks
pub struct EngineShared {
    context: Mutex<EngineContext>,
    clock: Box<dyn Clock>,
    /// Voice event producer (protected by Mutex for multi-voice callbacks)
    voice_tx: Mutex<Producer<VoiceEvent>>,
    callback: Mutex<Option<NotificationCallback>>,
    /// Undelivered notifications, oldest dropped first
    notifications: Mutex<VecDeque<Notification>>,
    notification_capacity: usize,
}

impl EngineShared {
    /// Lock the context, run `f` at the current time, then dispatch
    fn with_context<R>(&self, f: impl FnOnce(&mut EngineContext) -> R) -> R {
        let now = self.clock.now_ms();
        let (result, pending) = {
            let mut ctx = self.context.lock();
            ctx.set_now(now);
            let result = f(&mut ctx);
            (result, ctx.take_notifications())
        };
        self.dispatch(pending);
        result
    }

    /// Tick if the context is free. Returns false if it was busy.
    fn try_tick(&self) -> bool {
        let now = self.clock.now_ms();
        let pending = match self.context.try_lock() {
            Some(mut ctx) => {
                ctx.update(now);
                ctx.take_notifications()
            }
            None => return false,
        };
        self.dispatch(pending);
        true
    }

    fn dispatch(&self, pending: Vec<Notification>) {
        if pending.is_empty() {
            return;
        }

        // Reentrant dispatch (callback → engine → dispatch) skips the callback
        if let Some(mut callback) = self.callback.try_lock() {
            if let Some(callback) = callback.as_mut() {
                for notification in &pending {
                    callback(notification);
                }
            }
        }

        let mut queue = self.notifications.lock();
        for notification in pending {
            if queue.len() >= self.notification_capacity {
                queue.pop_front();
            }
            queue.push_back(notification);
        }
    }

    fn push_voice_event(&self, event: VoiceEvent) {
        let mut tx = self.voice_tx.lock();
        if tx.push(event).is_err() {
            log::warn!("Voice event queue full, dropped {:?}", event);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VOICE CALLBACKS (mixer thread)
// ═══════════════════════════════════════════════════════════════════════════════

/// Callbacks the mixer invokes from its own thread
#[derive(Clone)]
pub struct VoiceCallbacks {
    shared: Arc<EngineShared>,
}

impl VoiceCallbacks {
    /// A submitted buffer finished playing
    pub fn on_buffer_end(&self, voice: VoiceId, context: u64) {
        self.shared.push_voice_event(VoiceEvent::BufferEnd { voice, context });
    }

    /// The voice played its end-of-stream buffer
    pub fn on_stream_end(&self, voice: VoiceId) {
        self.shared.push_voice_event(VoiceEvent::StreamEnd { voice });
    }

    /// Start of a mixer processing pass: tick unless the host holds the engine
    pub fn on_processing_pass_start(&self) -> bool {
        self.shared.try_tick()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// AUDIO ENGINE (host thread)
// ═══════════════════════════════════════════════════════════════════════════════

/// Cue engine
///
/// ```
/// use rf_cue::{AudioEngine, EngineCatalog, EngineConfig, ManualClock, NullMixer};
///
/// let clock = ManualClock::new();
/// let engine = AudioEngine::new(
///     EngineCatalog::default(),
///     EngineConfig::default(),
///     NullMixer::new(),
///     clock.clone(),
/// )
/// .unwrap();
///
/// clock.advance(16);
/// engine.do_work();
/// assert_eq!(engine.live_cue_count(), 0);
/// ```
#[derive(Clone)]
pub struct AudioEngine {
    shared: Arc<EngineShared>,
}

impl AudioEngine {
    /// Create an engine over a validated catalog
    pub fn new(
        catalog: EngineCatalog,
        config: EngineConfig,
        mixer: impl Mixer + 'static,
        clock: impl Clock + 'static,
    ) -> CueResult<Self> {
        if let Err(e) = catalog.validate() {
            log::error!("Engine catalog rejected: {}", e);
            return Err(e);
        }

        let (voice_tx, voice_rx) = RingBuffer::new(config.callback_queue_capacity);
        let notification_capacity = config.callback_queue_capacity;
        log::info!(
            "Cue engine created ({} categories, {} variables, {} RPC curves, {} DSP presets)",
            catalog.categories.len(),
            catalog.variables.len(),
            catalog.rpc_curves.len(),
            catalog.dsp_presets.len()
        );

        let context = EngineContext::new(catalog, config, Box::new(mixer), voice_rx);
        Ok(Self {
            shared: Arc::new(EngineShared {
                context: Mutex::new(context),
                clock: Box::new(clock),
                voice_tx: Mutex::new(voice_tx),
                callback: Mutex::new(None),
                notifications: Mutex::new(VecDeque::new()),
                notification_capacity,
            }),
        })
    }

    /// Callbacks to hand to the mixer
    pub fn callbacks(&self) -> VoiceCallbacks {
        VoiceCallbacks {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Advance the engine to the clock's current time
    pub fn do_work(&self) {
        let now = self.shared.clock.now_ms();
        self.shared.with_context(|ctx| ctx.update(now));
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // BANKS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn load_sound_bank(&self, def: SoundBankDef) -> CueResult<SoundBankHandle> {
        self.shared.with_context(|ctx| ctx.load_sound_bank(def))
    }

    /// Destroys every cue created from the bank
    pub fn unload_sound_bank(&self, bank: SoundBankHandle) -> CueResult<()> {
        self.shared.with_context(|ctx| ctx.unload_sound_bank(bank))
    }

    pub fn load_wave_bank(&self, def: WaveBankDef, data: WaveData) -> CueResult<WaveBankHandle> {
        self.shared.with_context(|ctx| ctx.load_wave_bank(def, data))
    }

    /// Stops every wave reading from the bank
    pub fn unload_wave_bank(&self, bank: WaveBankHandle) -> CueResult<()> {
        self.shared.with_context(|ctx| ctx.unload_wave_bank(bank))
    }

    /// Look up a cue definition by name
    pub fn cue_index(&self, bank: SoundBankHandle, name: &str) -> CueResult<usize> {
        self.shared.context.lock().cue_index(bank, name)
    }

    pub fn stop_sound_bank(&self, bank: SoundBankHandle, mode: StopMode) -> CueResult<()> {
        self.shared.with_context(|ctx| ctx.stop_sound_bank(bank, mode))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CUES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Create a cue without starting it
    pub fn prepare_cue(&self, bank: SoundBankHandle, index: usize) -> CueResult<CueHandle> {
        self.shared.with_context(|ctx| ctx.prepare_cue(bank, index))
    }

    /// Fire-and-forget play. The cue destroys itself once stopped.
    /// `Ok(None)` when an instance limit refused it.
    pub fn play_cue(&self, bank: SoundBankHandle, index: usize) -> CueResult<Option<CueHandle>> {
        self.shared.with_context(|ctx| ctx.play_cue(bank, index))
    }

    pub fn cue_play(&self, cue: CueHandle) -> CueResult<()> {
        self.shared.with_context(|ctx| ctx.cue_play(cue))
    }

    pub fn cue_stop(&self, cue: CueHandle, mode: StopMode) -> CueResult<()> {
        self.shared.with_context(|ctx| ctx.cue_stop(cue, mode))
    }

    pub fn cue_pause(&self, cue: CueHandle, paused: bool) -> CueResult<()> {
        self.shared.with_context(|ctx| ctx.cue_pause(cue, paused))
    }

    pub fn cue_destroy(&self, cue: CueHandle) -> CueResult<()> {
        self.shared.with_context(|ctx| ctx.cue_destroy(cue))
    }

    pub fn cue_state(&self, cue: CueHandle) -> CueResult<CueState> {
        self.shared.context.lock().cue_state(cue)
    }

    pub fn cue_set_variable(&self, cue: CueHandle, index: usize, value: f32) -> CueResult<f32> {
        self.shared.with_context(|ctx| ctx.cue_set_variable(cue, index, value))
    }

    pub fn cue_get_variable(&self, cue: CueHandle, index: usize) -> CueResult<f32> {
        self.shared.context.lock().cue_get_variable(cue, index)
    }

    /// Set the output matrix (speaker gains) of every voice of the cue
    pub fn cue_apply_3d(&self, cue: CueHandle, matrix: Vec<f32>) -> CueResult<()> {
        self.shared.with_context(|ctx| ctx.cue_apply_3d(cue, matrix))
    }

    pub fn cue_waves(&self, cue: CueHandle) -> CueResult<Vec<WaveHandle>> {
        self.shared.context.lock().cue_waves(cue)
    }

    pub fn cue_track_values(&self, cue: CueHandle, track: usize) -> CueResult<EventValues> {
        self.shared.context.lock().cue_track_values(cue, track)
    }

    pub fn wave_state(&self, wave: WaveHandle) -> CueResult<WaveState> {
        self.shared.context.lock().wave_state(wave)
    }

    pub fn wave_params(&self, wave: WaveHandle) -> CueResult<Option<VoiceParams>> {
        self.shared.context.lock().wave_params(wave)
    }

    pub fn live_cue_count(&self) -> usize {
        self.shared.context.lock().live_cue_count()
    }

    pub fn live_wave_count(&self) -> usize {
        self.shared.context.lock().live_wave_count()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // VARIABLES
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn variable_index(&self, name: &str) -> CueResult<usize> {
        self.shared.context.lock().variable_index(name)
    }

    /// Returns the stored (clamped) value
    pub fn set_global_variable(&self, index: usize, value: f32) -> CueResult<f32> {
        self.shared.with_context(|ctx| ctx.set_global_variable(index, value))
    }

    pub fn get_global_variable(&self, index: usize) -> CueResult<f32> {
        self.shared.context.lock().get_global_variable(index)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CATEGORIES
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn category_index(&self, name: &str) -> CueResult<usize> {
        self.shared.context.lock().category_index(name)
    }

    /// Fade the category volume to `volume` over `fade_ms`
    pub fn set_category_volume(&self, category: usize, volume: f32, fade_ms: u32) -> CueResult<()> {
        self.shared
            .with_context(|ctx| ctx.set_category_volume(category, volume, fade_ms))
    }

    /// Effective volume (category × ancestors)
    pub fn category_volume(&self, category: usize) -> CueResult<f32> {
        self.shared.context.lock().category_volume(category)
    }

    pub fn category_instance_count(&self, category: usize) -> CueResult<u32> {
        self.shared.context.lock().category_instance_count(category)
    }

    /// Stop every cue in the category and its descendants
    pub fn stop_category(&self, category: usize, mode: StopMode) -> CueResult<()> {
        self.shared.with_context(|ctx| ctx.stop_category(category, mode))
    }

    pub fn pause_category(&self, category: usize, paused: bool) -> CueResult<()> {
        self.shared.with_context(|ctx| ctx.pause_category(category, paused))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // NOTIFICATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Install (or clear) the notification callback
    pub fn set_notification_callback(&self, callback: Option<NotificationCallback>) {
        *self.shared.callback.lock() = callback;
    }

    /// Drain queued notifications
    pub fn take_notifications(&self) -> Vec<Notification> {
        self.shared.notifications.lock().drain(..).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
