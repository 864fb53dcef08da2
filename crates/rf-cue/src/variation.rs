//! Variation Selector
//!
//! Chooses one entry of a variation table: a sound of many for a cue, or a
//! wave of many for a track. Selection is either driven by a control
//! variable (interactive) or by one of the ordered/random modes.
//!
//! Per-table state (cursor, shuffle deck, last pick, linger timestamps)
//! lives with the loaded sound bank, so every cue of the bank shares it.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::event::WaveRef;

/// How the next entry is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum VariationMode {
    /// 0, 1, 2, ... wrapping
    Ordered = 0,
    /// Random start, then ordered
    OrderedFromRandom = 1,
    /// Weighted random
    #[default]
    Random = 2,
    /// Weighted random, never the same entry twice in a row
    RandomNoImmediateRepeats = 3,
    /// Every entry once per round, in random order
    Shuffle = 4,
    /// Driven by the table's control variable
    Interactive = 5,
}

impl VariationMode {
    pub fn from_index(index: u8) -> Self {
        match index {
            0 => VariationMode::Ordered,
            1 => VariationMode::OrderedFromRandom,
            2 => VariationMode::Random,
            3 => VariationMode::RandomNoImmediateRepeats,
            4 => VariationMode::Shuffle,
            5 => VariationMode::Interactive,
            _ => VariationMode::Random,
        }
    }
}

/// Something that can sit in a weighted pool
pub trait WeightedChoice {
    /// `[min, max]` weight interval. Random draws use `max - min` as the
    /// weight; interactive selection uses the interval itself.
    fn weight_range(&self) -> (f32, f32);

    /// Cooldown after being picked
    fn linger_ms(&self) -> u32 {
        0
    }

    #[inline]
    fn weight(&self) -> f32 {
        let (min, max) = self.weight_range();
        (max - min).max(0.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VARIATION TABLE
// ═══════════════════════════════════════════════════════════════════════════════

/// What a cue variation entry plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariationTarget {
    /// A bare wave (no sound, no category)
    Wave(WaveRef),
    /// A sound of the owning bank (by index)
    Sound(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariationEntry {
    pub target: VariationTarget,
    pub min_weight: f32,
    pub max_weight: f32,
    #[serde(default)]
    pub linger_ms: u32,
}

impl VariationEntry {
    pub fn sound(sound: usize, min_weight: f32, max_weight: f32) -> Self {
        Self {
            target: VariationTarget::Sound(sound),
            min_weight,
            max_weight,
            linger_ms: 0,
        }
    }

    pub fn wave(wave: WaveRef, min_weight: f32, max_weight: f32) -> Self {
        Self {
            target: VariationTarget::Wave(wave),
            min_weight,
            max_weight,
            linger_ms: 0,
        }
    }

    pub fn with_linger(mut self, linger_ms: u32) -> Self {
        self.linger_ms = linger_ms;
        self
    }
}

impl WeightedChoice for VariationEntry {
    fn weight_range(&self) -> (f32, f32) {
        (self.min_weight, self.max_weight)
    }

    fn linger_ms(&self) -> u32 {
        self.linger_ms
    }
}

/// Cue variation table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationTable {
    #[serde(default)]
    pub mode: VariationMode,
    /// Control variable for interactive selection
    #[serde(default)]
    pub variable: Option<usize>,
    pub entries: Vec<VariationEntry>,
}

impl VariationTable {
    pub fn new(mode: VariationMode, entries: Vec<VariationEntry>) -> Self {
        Self {
            mode,
            variable: None,
            entries,
        }
    }

    /// Interactive table driven by `variable`
    pub fn interactive(variable: usize, entries: Vec<VariationEntry>) -> Self {
        Self {
            mode: VariationMode::Interactive,
            variable: Some(variable),
            entries,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SELECTION STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Runtime selection state of one table
#[derive(Debug, Clone, Default)]
pub struct VariationState {
    /// Last picked entry
    pub last: Option<usize>,
    /// Remaining shuffle round
    pub deck: Vec<usize>,
    /// Time each entry was last picked
    pub last_picked_ms: Vec<Option<u64>>,
}

impl VariationState {
    pub fn new(entry_count: usize) -> Self {
        Self {
            last: None,
            deck: Vec::new(),
            last_picked_ms: vec![None; entry_count],
        }
    }

    /// True if `index` was picked less than its linger window ago
    pub fn is_lingering<C: WeightedChoice>(&self, entries: &[C], index: usize, now_ms: u64) -> bool {
        let linger = entries.get(index).map_or(0, |e| e.linger_ms()) as u64;
        match self.last_picked_ms.get(index).copied().flatten() {
            Some(picked) if linger > 0 => now_ms < picked + linger,
            _ => false,
        }
    }

    /// Pick the next entry. `control` is the control variable value when the
    /// table is interactive. Returns `None` only for an empty table.
    pub fn select<C: WeightedChoice>(
        &mut self,
        mode: VariationMode,
        entries: &[C],
        control: Option<f32>,
        now_ms: u64,
        rng: &mut impl Rng,
    ) -> Option<usize> {
        if entries.is_empty() {
            return None;
        }
        if self.last_picked_ms.len() != entries.len() {
            self.last_picked_ms.resize(entries.len(), None);
        }

        let picked = match (mode, control) {
            (VariationMode::Interactive, Some(value)) => select_interactive(entries, value),
            (VariationMode::Interactive, None) | (VariationMode::Random, _) => {
                self.select_weighted(entries, now_ms, false, rng)
            }
            (VariationMode::RandomNoImmediateRepeats, _) => self.select_weighted(entries, now_ms, true, rng),
            (VariationMode::Ordered, _) => self.select_ordered(entries.len(), None),
            (VariationMode::OrderedFromRandom, _) => {
                let start = rng.random_range(0..entries.len());
                self.select_ordered(entries.len(), Some(start))
            }
            (VariationMode::Shuffle, _) => self.select_shuffle(entries.len(), rng),
        };

        self.last = Some(picked);
        self.last_picked_ms[picked] = Some(now_ms);
        Some(picked)
    }

    fn select_ordered(&self, count: usize, random_start: Option<usize>) -> usize {
        match self.last {
            Some(last) => (last + 1) % count,
            None => random_start.unwrap_or(0),
        }
    }

    fn select_shuffle(&mut self, count: usize, rng: &mut impl Rng) -> usize {
        if self.deck.is_empty() {
            self.deck = (0..count).collect();
            self.deck.shuffle(rng);
            // Keep the round boundary from repeating the previous pick
            if count > 1 && self.deck.last() == self.last.as_ref() {
                self.deck.swap(0, count - 1);
            }
        }
        self.deck.pop().unwrap_or(0)
    }

    fn select_weighted<C: WeightedChoice>(
        &self,
        entries: &[C],
        now_ms: u64,
        avoid_last: bool,
        rng: &mut impl Rng,
    ) -> usize {
        let candidates: Vec<usize> = (0..entries.len())
            .filter(|&i| !(avoid_last && entries.len() > 1 && self.last == Some(i)))
            .collect();
        let rested: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&i| !self.is_lingering(entries, i, now_ms))
            .collect();

        // Lingering entries drop out and the rest are drawn uniformly.
        // When everything is cooling down, repeats are allowed.
        let (pool, uniform) = match rested.len() {
            0 => (candidates, false),
            n if n < candidates.len() => (rested, true),
            _ => (rested, false),
        };
        if pool.is_empty() {
            return 0;
        }

        let total: f32 = pool.iter().map(|&i| entries[i].weight()).sum();
        if uniform || total <= 0.0 {
            return pool[rng.random_range(0..pool.len())];
        }

        let mut roll = rng.random_range(0.0..total);
        for &i in &pool {
            let weight = entries[i].weight();
            if roll < weight {
                return i;
            }
            roll -= weight;
        }
        pool[pool.len() - 1]
    }
}

/// Entry whose `[min, max)` contains the value clamped to the table range.
/// The table maximum itself selects the last entry that reaches it.
fn select_interactive<C: WeightedChoice>(entries: &[C], value: f32) -> usize {
    let lo = entries.iter().map(|e| e.weight_range().0).fold(f32::INFINITY, f32::min);
    let hi = entries.iter().map(|e| e.weight_range().1).fold(f32::NEG_INFINITY, f32::max);
    let value = if lo <= hi { value.clamp(lo, hi) } else { value };

    entries
        .iter()
        .position(|e| {
            let (min, max) = e.weight_range();
            value >= min && value < max
        })
        .or_else(|| entries.iter().rposition(|e| e.weight_range().1 == value))
        .unwrap_or(0)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
