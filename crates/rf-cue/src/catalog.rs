//! Catalog Definitions
//!
//! Immutable, fully-populated definitions handed to the engine by a bank
//! loader: the engine-wide catalog (categories, variables, RPC curves, DSP
//! presets), sound banks and wave banks.
//!
//! Cross references use indices, except RPC curves and DSP presets which
//! sounds and tracks reference by code. Every reference is checked once at
//! load time; playback never sees a dangling index.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::category::{CategoryDef, InstanceLimit};
use crate::error::{CueError, CueResult};
use crate::event::{EventKind, WaveRef};
use crate::rpc::{RpcCurve, RpcParameter};
use crate::variable::VariableDef;
use crate::variation::{VariationTable, VariationTarget};

fn malformed(msg: impl Into<String>) -> CueError {
    CueError::MalformedCatalog(msg.into())
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE CATALOG
// ═══════════════════════════════════════════════════════════════════════════════

/// One DSP preset parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DspParameter {
    pub value: f32,
    pub min: f32,
    pub max: f32,
}

/// DSP preset (effect parameters only, the effect itself lives in the mixer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DspPreset {
    pub code: u32,
    pub parameters: Vec<DspParameter>,
}

/// Engine-wide definitions, immutable after load
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineCatalog {
    #[serde(default)]
    pub categories: Vec<CategoryDef>,
    #[serde(default)]
    pub variables: Vec<VariableDef>,
    #[serde(default)]
    pub rpc_curves: Vec<RpcCurve>,
    #[serde(default)]
    pub dsp_presets: Vec<DspPreset>,
}

impl EngineCatalog {
    pub fn from_json_str(json: &str) -> CueResult<Self> {
        serde_json::from_str(json).map_err(|e| malformed(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> CueResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Total number of flattened DSP parameter slots
    pub fn dsp_slot_count(&self) -> usize {
        self.dsp_presets.iter().map(|p| p.parameters.len()).sum()
    }

    /// Map a flattened DSP slot to `(preset, parameter)`
    pub fn dsp_slot(&self, slot: u16) -> Option<(usize, usize)> {
        let mut remaining = slot as usize;
        for (p, preset) in self.dsp_presets.iter().enumerate() {
            if remaining < preset.parameters.len() {
                return Some((p, remaining));
            }
            remaining -= preset.parameters.len();
        }
        None
    }

    pub fn rpc_by_code(&self) -> HashMap<u32, usize> {
        self.rpc_curves
            .iter()
            .enumerate()
            .map(|(i, c)| (c.code, i))
            .collect()
    }

    pub fn dsp_by_code(&self) -> HashMap<u32, usize> {
        self.dsp_presets
            .iter()
            .enumerate()
            .map(|(i, p)| (p.code, i))
            .collect()
    }

    /// Check internal consistency
    pub fn validate(&self) -> CueResult<()> {
        let categories = self.categories.len();
        for (i, category) in self.categories.iter().enumerate() {
            if let Some(parent) = category.parent {
                if parent >= categories {
                    return Err(malformed(format!(
                        "category '{}' has undefined parent {}",
                        category.name, parent
                    )));
                }
            }
            // Walking more than `categories` links means a cycle
            let mut next = category.parent;
            let mut steps = 0;
            while let Some(p) = next {
                steps += 1;
                if p == i || steps > categories {
                    return Err(malformed(format!("category '{}' has a cyclic parent chain", category.name)));
                }
                next = self.categories[p].parent;
            }
        }

        for variable in &self.variables {
            if !(variable.min <= variable.max) {
                return Err(malformed(format!("variable '{}' has min > max", variable.name)));
            }
        }

        let mut codes = HashSet::new();
        for curve in &self.rpc_curves {
            if !codes.insert(curve.code) {
                return Err(malformed(format!("duplicate RPC code {}", curve.code)));
            }
            if curve.variable >= self.variables.len() {
                return Err(malformed(format!(
                    "RPC {} references undefined variable {}",
                    curve.code, curve.variable
                )));
            }
            if curve.points.is_empty() || !curve.is_sorted() {
                return Err(malformed(format!("RPC {} points are empty or unsorted", curve.code)));
            }
            if let RpcParameter::Dsp(slot) = curve.parameter {
                if self.dsp_slot(slot).is_none() {
                    return Err(malformed(format!("RPC {} targets undefined DSP slot {}", curve.code, slot)));
                }
            }
        }

        for preset in &self.dsp_presets {
            if preset.parameters.iter().any(|p| !(p.min <= p.max)) {
                return Err(malformed(format!("DSP preset {} has min > max", preset.code)));
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOUND BANK
// ═══════════════════════════════════════════════════════════════════════════════

/// Filter type of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterKind {
    #[default]
    LowPass,
    BandPass,
    HighPass,
    Notch,
}

/// Track filter settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterDef {
    pub kind: FilterKind,
    pub frequency_hz: f32,
    pub q: f32,
}

/// One track of a sound
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackDef {
    /// Track volume (dB)
    #[serde(default)]
    pub volume_db: f32,
    #[serde(default)]
    pub filter: Option<FilterDef>,
    /// RPC curve codes
    #[serde(default)]
    pub rpc_codes: Vec<u32>,
    #[serde(default)]
    pub events: Vec<crate::event::EventDef>,
}

impl TrackDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_volume_db(mut self, volume_db: f32) -> Self {
        self.volume_db = volume_db;
        self
    }

    pub fn with_filter(mut self, filter: FilterDef) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_rpc(mut self, code: u32) -> Self {
        self.rpc_codes.push(code);
        self
    }

    pub fn with_event(mut self, event: crate::event::EventDef) -> Self {
        self.events.push(event);
        self
    }
}

/// Sound definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundDef {
    pub category: usize,
    /// Sound volume (dB)
    #[serde(default)]
    pub volume_db: f32,
    /// Sound pitch (cents)
    #[serde(default)]
    pub pitch_cents: f32,
    /// 0 is the most important
    #[serde(default)]
    pub priority: u8,
    pub tracks: Vec<TrackDef>,
    #[serde(default)]
    pub rpc_codes: Vec<u32>,
    #[serde(default)]
    pub dsp_codes: Vec<u32>,
}

impl SoundDef {
    pub fn new(category: usize) -> Self {
        Self {
            category,
            volume_db: 0.0,
            pitch_cents: 0.0,
            priority: 0,
            tracks: Vec::new(),
            rpc_codes: Vec::new(),
            dsp_codes: Vec::new(),
        }
    }

    pub fn with_track(mut self, track: TrackDef) -> Self {
        self.tracks.push(track);
        self
    }

    pub fn with_volume_db(mut self, volume_db: f32) -> Self {
        self.volume_db = volume_db;
        self
    }

    pub fn with_pitch_cents(mut self, pitch_cents: f32) -> Self {
        self.pitch_cents = pitch_cents;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_rpc(mut self, code: u32) -> Self {
        self.rpc_codes.push(code);
        self
    }

    pub fn with_dsp(mut self, code: u32) -> Self {
        self.dsp_codes.push(code);
        self
    }
}

/// What a cue plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CueTarget {
    /// One sound (index into the bank's sounds)
    Sound(usize),
    /// A variation table (index into the bank's tables)
    Variation(usize),
}

/// Cue definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CueDef {
    pub name: String,
    pub target: CueTarget,
    /// Per-cue instance limit (checked before the category limit)
    #[serde(default)]
    pub limit: InstanceLimit,
    /// Overrides the category fade when non-zero
    #[serde(default)]
    pub fade_in_ms: u32,
    #[serde(default)]
    pub fade_out_ms: u32,
}

impl CueDef {
    pub fn new(name: impl Into<String>, target: CueTarget) -> Self {
        Self {
            name: name.into(),
            target,
            limit: InstanceLimit::default(),
            fade_in_ms: 0,
            fade_out_ms: 0,
        }
    }

    pub fn with_limit(mut self, limit: InstanceLimit) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_fades(mut self, fade_in_ms: u32, fade_out_ms: u32) -> Self {
        self.fade_in_ms = fade_in_ms;
        self.fade_out_ms = fade_out_ms;
        self
    }
}

/// Sound bank definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundBankDef {
    pub name: String,
    /// Wave banks referenced by [`WaveRef::wave_bank`], by name
    #[serde(default)]
    pub wave_banks: Vec<String>,
    pub cues: Vec<CueDef>,
    #[serde(default)]
    pub sounds: Vec<SoundDef>,
    #[serde(default)]
    pub variation_tables: Vec<VariationTable>,
}

impl SoundBankDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            wave_banks: Vec::new(),
            cues: Vec::new(),
            sounds: Vec::new(),
            variation_tables: Vec::new(),
        }
    }

    pub fn from_json_str(json: &str) -> CueResult<Self> {
        serde_json::from_str(json).map_err(|e| malformed(e.to_string()))
    }

    pub fn with_wave_bank(mut self, name: impl Into<String>) -> Self {
        self.wave_banks.push(name.into());
        self
    }

    pub fn with_cue(mut self, cue: CueDef) -> Self {
        self.cues.push(cue);
        self
    }

    pub fn with_sound(mut self, sound: SoundDef) -> Self {
        self.sounds.push(sound);
        self
    }

    pub fn with_variation_table(mut self, table: VariationTable) -> Self {
        self.variation_tables.push(table);
        self
    }

    fn check_wave(&self, wave: WaveRef, context: &str) -> CueResult<()> {
        if wave.wave_bank >= self.wave_banks.len() {
            return Err(malformed(format!(
                "{} in bank '{}' references undefined wave bank {}",
                context, self.name, wave.wave_bank
            )));
        }
        Ok(())
    }

    /// Check every reference against the engine catalog
    pub fn validate(&self, catalog: &EngineCatalog) -> CueResult<()> {
        let rpc_codes: HashSet<u32> = catalog.rpc_curves.iter().map(|c| c.code).collect();
        let dsp_codes: HashSet<u32> = catalog.dsp_presets.iter().map(|p| p.code).collect();

        let mut names = HashSet::new();
        for cue in &self.cues {
            if !names.insert(cue.name.as_str()) {
                return Err(malformed(format!("duplicate cue '{}' in bank '{}'", cue.name, self.name)));
            }
            let ok = match cue.target {
                CueTarget::Sound(s) => s < self.sounds.len(),
                CueTarget::Variation(v) => v < self.variation_tables.len(),
            };
            if !ok {
                return Err(malformed(format!("cue '{}' has an undefined target", cue.name)));
            }
        }

        for (t, table) in self.variation_tables.iter().enumerate() {
            if let Some(variable) = table.variable {
                if variable >= catalog.variables.len() {
                    return Err(malformed(format!("variation table {} uses undefined variable {}", t, variable)));
                }
            }
            for entry in &table.entries {
                match entry.target {
                    VariationTarget::Sound(s) if s >= self.sounds.len() => {
                        return Err(malformed(format!("variation table {} references undefined sound {}", t, s)));
                    }
                    VariationTarget::Wave(w) => self.check_wave(w, &format!("variation table {}", t))?,
                    VariationTarget::Sound(_) => {}
                }
            }
        }

        for (s, sound) in self.sounds.iter().enumerate() {
            if sound.category >= catalog.categories.len() {
                return Err(malformed(format!("sound {} uses undefined category {}", s, sound.category)));
            }
            let rpcs = sound.rpc_codes.iter().chain(sound.tracks.iter().flat_map(|t| &t.rpc_codes));
            for code in rpcs {
                if !rpc_codes.contains(code) {
                    return Err(malformed(format!("sound {} references undefined RPC {}", s, code)));
                }
            }
            for code in &sound.dsp_codes {
                if !dsp_codes.contains(code) {
                    return Err(malformed(format!("sound {} references undefined DSP preset {}", s, code)));
                }
            }
            for track in &sound.tracks {
                for event in &track.events {
                    if let EventKind::PlayWave(play) = &event.kind {
                        for wave in play.waves() {
                            self.check_wave(wave, &format!("sound {}", s))?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WAVE BANK
// ═══════════════════════════════════════════════════════════════════════════════

/// PCM layout of a wave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl WaveFormat {
    pub fn pcm16(channels: u16, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
            bits_per_sample: 16,
        }
    }

    /// Bytes per sample frame
    #[inline]
    pub fn block_align(&self) -> usize {
        (self.channels as usize * self.bits_per_sample as usize / 8).max(1)
    }
}

impl Default for WaveFormat {
    fn default() -> Self {
        Self::pcm16(2, 48000)
    }
}

/// Wave entry (byte region of the bank's data)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveEntry {
    #[serde(default)]
    pub name: String,
    pub offset: u64,
    pub length: u64,
    #[serde(default)]
    pub format: WaveFormat,
}

impl WaveEntry {
    pub fn new(offset: u64, length: u64, format: WaveFormat) -> Self {
        Self {
            name: String::new(),
            offset,
            length,
            format,
        }
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Wave bank definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveBankDef {
    pub name: String,
    pub entries: Vec<WaveEntry>,
}

impl WaveBankDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn with_entry(mut self, entry: WaveEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Check entries against the data size (when known)
    pub fn validate(&self, data_len: Option<u64>) -> CueResult<()> {
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.format.channels == 0 || entry.format.sample_rate == 0 {
                return Err(malformed(format!("wave {} in '{}' has an empty format", i, self.name)));
            }
            if let Some(len) = data_len {
                if entry.end() > len {
                    return Err(malformed(format!(
                        "wave {} in '{}' ends at {} past data length {}",
                        i,
                        self.name,
                        entry.end(),
                        len
                    )));
                }
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::CurveShape;
    use crate::event::{EventDef, PlayWaveEvent};
    use crate::variation::{VariationEntry, VariationMode};

    fn catalog() -> EngineCatalog {
        EngineCatalog {
            categories: vec![CategoryDef::new("Global"), CategoryDef::new("Sfx").with_parent(0)],
            variables: vec![VariableDef::global("Speed", 0.0, 0.0, 100.0)],
            rpc_curves: vec![
                RpcCurve::new(10, 0, RpcParameter::Volume).with_point(0.0, 0.0, CurveShape::Linear),
                RpcCurve::new(11, 0, RpcParameter::Dsp(1)).with_point(0.0, 0.5, CurveShape::Linear),
            ],
            dsp_presets: vec![DspPreset {
                code: 1,
                parameters: vec![
                    DspParameter { value: 0.0, min: 0.0, max: 1.0 },
                    DspParameter { value: 0.0, min: 0.0, max: 1.0 },
                ],
            }],
        }
    }

    fn bank() -> SoundBankDef {
        SoundBankDef::new("Bank")
            .with_wave_bank("Waves")
            .with_sound(
                SoundDef::new(1).with_rpc(10).with_dsp(1).with_track(
                    TrackDef::new().with_event(EventDef::new(
                        0,
                        EventKind::PlayWave(PlayWaveEvent::simple(WaveRef::new(0, 0))),
                    )),
                ),
            )
            .with_variation_table(VariationTable::new(
                VariationMode::Random,
                vec![VariationEntry::sound(0, 0.0, 1.0)],
            ))
            .with_cue(CueDef::new("Shot", CueTarget::Sound(0)))
            .with_cue(CueDef::new("Shots", CueTarget::Variation(0)))
    }

    #[test]
    fn test_valid_catalog() {
        let catalog = catalog();
        catalog.validate().unwrap();
        bank().validate(&catalog).unwrap();
        assert_eq!(catalog.dsp_slot_count(), 2);
        assert_eq!(catalog.dsp_slot(1), Some((0, 1)));
        assert_eq!(catalog.dsp_slot(2), None);
    }

    #[test]
    fn test_category_cycle_rejected() {
        let mut catalog = catalog();
        catalog.categories[0].parent = Some(1);
        assert!(matches!(catalog.validate(), Err(CueError::MalformedCatalog(_))));
    }

    #[test]
    fn test_undefined_references_rejected() {
        let catalog = catalog();

        let mut bad = bank();
        bad.sounds[0].category = 9;
        assert!(bad.validate(&catalog).is_err());

        let mut bad = bank();
        bad.sounds[0].rpc_codes.push(99);
        assert!(bad.validate(&catalog).is_err());

        let mut bad = bank();
        bad.wave_banks.clear();
        assert!(bad.validate(&catalog).is_err());

        let bad = bank().with_cue(CueDef::new("Shot", CueTarget::Sound(0)));
        assert!(bad.validate(&catalog).is_err());
    }

    #[test]
    fn test_wave_bank_bounds() {
        let def = WaveBankDef::new("Waves").with_entry(WaveEntry::new(0, 100, WaveFormat::default()));
        assert!(def.validate(Some(100)).is_ok());
        assert!(def.validate(Some(99)).is_err());
        assert!(def.validate(None).is_ok());
    }

    #[test]
    fn test_json_catalog() {
        let json = r#"{
            "categories": [ { "name": "Global" } ],
            "variables": [ { "name": "Speed", "initial": 0.0, "min": 0.0, "max": 1.0 } ]
        }"#;
        let catalog = EngineCatalog::from_json_str(json).unwrap();
        assert_eq!(catalog.categories[0].volume, 1.0);
        assert!(catalog.validate().is_ok());
        assert!(EngineCatalog::from_json_str("[").is_err());
    }
}
