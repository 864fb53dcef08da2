//! Category Mixer
//!
//! Per-category volume, fade ramp, pause flag and live instance count.
//! Categories nest through `parent`; a cue's category gain is the product
//! of its category's current volume and every ancestor's.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::curve::LinearRamp;
use crate::error::{CueError, CueResult};

/// Behavior when an instance limit is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum MaxInstanceBehavior {
    /// Don't play the new instance
    #[default]
    FailToPlay = 0,
    /// Release the oldest instance and start the new one once a slot frees
    Queue = 1,
    /// Stop the oldest instance, play the new one
    ReplaceOldest = 2,
    /// Stop the quietest instance, play the new one
    ReplaceQuietest = 3,
    /// Stop the lowest-priority instance, play the new one
    ReplaceLowestPriority = 4,
}

impl MaxInstanceBehavior {
    pub fn from_index(index: u8) -> Self {
        match index {
            0 => MaxInstanceBehavior::FailToPlay,
            1 => MaxInstanceBehavior::Queue,
            2 => MaxInstanceBehavior::ReplaceOldest,
            3 => MaxInstanceBehavior::ReplaceQuietest,
            4 => MaxInstanceBehavior::ReplaceLowestPriority,
            _ => MaxInstanceBehavior::FailToPlay,
        }
    }
}

/// Instance limit with its overflow policy (limit 0 = unlimited)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstanceLimit {
    pub max_instances: u32,
    pub behavior: MaxInstanceBehavior,
}

impl InstanceLimit {
    pub fn new(max_instances: u32, behavior: MaxInstanceBehavior) -> Self {
        Self {
            max_instances,
            behavior,
        }
    }

    #[inline]
    pub fn is_limited(&self) -> bool {
        self.max_instances > 0
    }

    #[inline]
    pub fn is_full(&self, count: u32) -> bool {
        self.is_limited() && count >= self.max_instances
    }
}

/// Category definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDef {
    pub name: String,
    #[serde(default)]
    pub limit: InstanceLimit,
    #[serde(default)]
    pub fade_in_ms: u32,
    #[serde(default)]
    pub fade_out_ms: u32,
    /// Parent category (None = root)
    #[serde(default)]
    pub parent: Option<usize>,
    /// Base volume (linear)
    #[serde(default = "unity")]
    pub volume: f32,
}

fn unity() -> f32 {
    1.0
}

impl CategoryDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            limit: InstanceLimit::default(),
            fade_in_ms: 0,
            fade_out_ms: 0,
            parent: None,
            volume: 1.0,
        }
    }

    pub fn with_parent(mut self, parent: usize) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_limit(mut self, max_instances: u32, behavior: MaxInstanceBehavior) -> Self {
        self.limit = InstanceLimit::new(max_instances, behavior);
        self
    }

    pub fn with_fades(mut self, fade_in_ms: u32, fade_out_ms: u32) -> Self {
        self.fade_in_ms = fade_in_ms;
        self.fade_out_ms = fade_out_ms;
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume.max(0.0);
        self
    }
}

/// Runtime state of one category
#[derive(Debug, Clone)]
pub struct CategoryState {
    pub def: CategoryDef,
    volume: LinearRamp,
    instance_count: u32,
    paused: bool,
}

impl CategoryState {
    fn new(def: CategoryDef) -> Self {
        let volume = LinearRamp::new(def.volume);
        Self {
            def,
            volume,
            instance_count: 0,
            paused: false,
        }
    }

    #[inline]
    pub fn current_volume(&self) -> f32 {
        self.volume.current()
    }

    #[inline]
    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }
}

/// All categories of one engine
#[derive(Debug, Clone, Default)]
pub struct CategoryMixer {
    categories: Vec<CategoryState>,
    names: HashMap<String, usize>,
}

impl CategoryMixer {
    pub fn new(defs: Vec<CategoryDef>) -> Self {
        let names = defs
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect();
        Self {
            categories: defs.into_iter().map(CategoryState::new).collect(),
            names,
        }
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn index_of(&self, name: &str) -> CueResult<usize> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| CueError::NotFound(format!("category '{}'", name)))
    }

    pub fn get(&self, index: usize) -> Option<&CategoryState> {
        self.categories.get(index)
    }

    fn get_mut(&mut self, index: usize) -> CueResult<&mut CategoryState> {
        self.categories
            .get_mut(index)
            .ok_or_else(|| CueError::NotFound(format!("category index {}", index)))
    }

    /// Ramp a category's volume to `volume` over `fade_ms` (instant when 0)
    pub fn set_volume(&mut self, index: usize, volume: f32, fade_ms: u32) -> CueResult<()> {
        let category = self.get_mut(index)?;
        category.volume.start(volume.max(0.0), fade_ms);
        Ok(())
    }

    pub fn set_paused(&mut self, index: usize, paused: bool) -> CueResult<()> {
        self.get_mut(index)?.paused = paused;
        Ok(())
    }

    /// Advance all fades
    pub fn update(&mut self, delta_ms: u32) {
        for category in &mut self.categories {
            category.volume.advance(delta_ms);
        }
    }

    /// Ancestor chain starting at `index` (bounded so a bad parent link can't loop)
    fn chain(&self, index: usize) -> impl Iterator<Item = (usize, &CategoryState)> + '_ {
        let mut next = Some(index);
        let mut remaining = self.categories.len();
        std::iter::from_fn(move || {
            if remaining == 0 {
                return None;
            }
            remaining -= 1;
            let current = next?;
            let category = self.categories.get(current)?;
            next = category.def.parent;
            Some((current, category))
        })
    }

    /// Current volume multiplied through every ancestor
    pub fn effective_volume(&self, index: usize) -> f32 {
        self.chain(index).map(|(_, c)| c.current_volume()).product()
    }

    /// True if the category or any ancestor is paused
    pub fn is_paused(&self, index: usize) -> bool {
        self.chain(index).any(|(_, c)| c.paused)
    }

    /// True if `index` is `ancestor` or nested inside it
    pub fn is_within(&self, index: usize, ancestor: usize) -> bool {
        self.chain(index).any(|(i, _)| i == ancestor)
    }

    pub fn instance_count(&self, index: usize) -> u32 {
        self.categories.get(index).map_or(0, |c| c.instance_count)
    }

    pub fn limit(&self, index: usize) -> InstanceLimit {
        self.categories.get(index).map_or_else(InstanceLimit::default, |c| c.def.limit)
    }

    pub fn is_full(&self, index: usize) -> bool {
        self.categories
            .get(index)
            .is_some_and(|c| c.def.limit.is_full(c.instance_count))
    }

    pub fn on_cue_started(&mut self, index: usize) {
        if let Some(category) = self.categories.get_mut(index) {
            category.instance_count += 1;
        }
    }

    pub fn on_cue_stopped(&mut self, index: usize) {
        if let Some(category) = self.categories.get_mut(index) {
            category.instance_count = category.instance_count.saturating_sub(1);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
