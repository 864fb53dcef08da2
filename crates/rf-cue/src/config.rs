//! Engine Configuration
//!
//! Runtime tuning knobs, loadable from JSON. Missing fields fall back to
//! their defaults so partial documents are valid.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CueError, CueResult};
use crate::rpc::{RpcCombineRules, SILENCE_DB};

/// Default streaming chunk size (bytes per submitted buffer)
pub const DEFAULT_STREAM_CHUNK_BYTES: usize = 64 * 1024;

/// Default number of chunks kept read ahead (double buffering)
pub const DEFAULT_READ_AHEAD_CHUNKS: usize = 2;

/// Default inbound callback queue capacity
pub const DEFAULT_CALLBACK_QUEUE_CAPACITY: usize = 4096;

/// Default maximum number of live cues
pub const DEFAULT_MAX_CUES: usize = 1024;

/// Cue engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bytes per streamed buffer
    pub stream_chunk_bytes: usize,
    /// Buffers kept filled ahead of playback for streaming waves
    pub stream_read_ahead_chunks: usize,
    /// Capacity of the mixer callback queue
    pub callback_queue_capacity: usize,
    /// Maximum live cues per engine
    pub max_cues: usize,
    /// Seed for variation selection and event jitter (random when unset)
    pub rng_seed: Option<u64>,
    /// Volumes at or below this level are silent
    pub silence_threshold_db: f32,
    /// How simultaneous RPC curves on one parameter are merged
    pub rpc_combine: RpcCombineRules,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stream_chunk_bytes: DEFAULT_STREAM_CHUNK_BYTES,
            stream_read_ahead_chunks: DEFAULT_READ_AHEAD_CHUNKS,
            callback_queue_capacity: DEFAULT_CALLBACK_QUEUE_CAPACITY,
            max_cues: DEFAULT_MAX_CUES,
            rng_seed: None,
            silence_threshold_db: SILENCE_DB,
            rpc_combine: RpcCombineRules::default(),
        }
    }
}

impl EngineConfig {
    /// Parse from a JSON document
    pub fn from_json_str(json: &str) -> CueResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config.sanitized())
    }

    /// Load from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> CueResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CueError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> CueResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Builder: fixed RNG seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Builder: streaming chunk size and read-ahead depth
    pub fn with_streaming(mut self, chunk_bytes: usize, read_ahead_chunks: usize) -> Self {
        self.stream_chunk_bytes = chunk_bytes;
        self.stream_read_ahead_chunks = read_ahead_chunks;
        self.sanitized()
    }

    /// Clamp degenerate values to something usable
    fn sanitized(mut self) -> Self {
        self.stream_chunk_bytes = self.stream_chunk_bytes.max(1);
        self.stream_read_ahead_chunks = self.stream_read_ahead_chunks.max(1);
        self.callback_queue_capacity = self.callback_queue_capacity.max(16);
        self.max_cues = self.max_cues.max(1);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
