//! Runtime Handles
//!
//! Stable, never-reused identifiers for live objects. Each kind is its own
//! type so a wave handle can't be passed where a cue handle is expected.
//! Handles are issued in increasing order, so comparing two handles of one
//! kind tells which object is older.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u64);

        impl $name {
            #[inline]
            pub fn raw(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

handle!(
    /// Live cue
    CueHandle,
    "cue"
);
handle!(
    /// Loaded sound bank
    SoundBankHandle,
    "soundbank"
);
handle!(
    /// Loaded wave bank
    WaveBankHandle,
    "wavebank"
);
handle!(
    /// Playing wave
    WaveHandle,
    "wave"
);

/// Process-wide handle counter (shared by all kinds)
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

#[inline]
fn next_raw() -> u64 {
    NEXT_HANDLE.fetch_add(1, Ordering::Relaxed)
}

impl CueHandle {
    pub(crate) fn generate() -> Self {
        Self(next_raw())
    }
}

impl SoundBankHandle {
    pub(crate) fn generate() -> Self {
        Self(next_raw())
    }
}

impl WaveBankHandle {
    pub(crate) fn generate() -> Self {
        Self(next_raw())
    }
}

impl WaveHandle {
    pub(crate) fn generate() -> Self {
        Self(next_raw())
    }
}
