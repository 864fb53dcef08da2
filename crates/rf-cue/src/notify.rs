//! Host Notifications

use crate::handle::{CueHandle, WaveHandle};

/// Something the host may want to observe
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Cue reached `Stopped`
    CueStopped { cue: CueHandle },
    /// Marker event fired
    Marker { cue: CueHandle, track: usize, marker: u32 },
    /// Wave finished or was stopped
    WaveStopped { wave: WaveHandle, cue: Option<CueHandle> },
    /// A playback-time failure was skipped
    PlaybackError { cue: Option<CueHandle>, message: String },
}

impl Notification {
    pub fn cue(&self) -> Option<CueHandle> {
        match self {
            Notification::CueStopped { cue } | Notification::Marker { cue, .. } => Some(*cue),
            Notification::WaveStopped { cue, .. } | Notification::PlaybackError { cue, .. } => *cue,
        }
    }
}

/// Host notification callback
pub type NotificationCallback = Box<dyn FnMut(&Notification) + Send>;
