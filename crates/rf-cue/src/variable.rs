//! Variable Store
//!
//! Global (per-engine) and cue-local control variables. These are the
//! inputs of every RPC curve. Writes are always clamped to `[min, max]`.
//! Public callers only reach variables flagged `PUBLIC`, and never write
//! `READ_ONLY` or `RESERVED` ones.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{CueError, CueResult};

bitflags! {
    /// Variable accessibility flags
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct VariableAccess: u8 {
        /// Visible to the public API
        const PUBLIC    = 0x01;
        /// Public writes are rejected
        const READ_ONLY = 0x02;
        /// One value per cue instead of one per engine
        const CUE_LOCAL = 0x04;
        /// Maintained by the engine itself
        const RESERVED  = 0x08;
    }
}

/// Names of the engine-maintained cue-local variables
pub mod reserved {
    pub const NUM_CUE_INSTANCES: &str = "NumCueInstances";
    pub const ATTACK_TIME: &str = "AttackTime";
    pub const RELEASE_TIME: &str = "ReleaseTime";
}

/// Variable definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDef {
    pub name: String,
    /// Public unless the catalog says otherwise
    #[serde(default = "public_access")]
    pub access: VariableAccess,
    pub initial: f32,
    pub min: f32,
    pub max: f32,
}

fn public_access() -> VariableAccess {
    VariableAccess::PUBLIC
}

impl VariableDef {
    /// Public global variable
    pub fn global(name: impl Into<String>, initial: f32, min: f32, max: f32) -> Self {
        Self {
            name: name.into(),
            access: VariableAccess::PUBLIC,
            initial: initial.clamp(min, max),
            min,
            max,
        }
    }

    /// Public cue-local variable
    pub fn cue_local(name: impl Into<String>, initial: f32, min: f32, max: f32) -> Self {
        Self {
            access: VariableAccess::PUBLIC | VariableAccess::CUE_LOCAL,
            ..Self::global(name, initial, min, max)
        }
    }

    /// Builder: add access flags
    pub fn with_access(mut self, access: VariableAccess) -> Self {
        self.access |= access;
        self
    }

    #[inline]
    pub fn is_cue_local(&self) -> bool {
        self.access.contains(VariableAccess::CUE_LOCAL)
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.access.contains(VariableAccess::READ_ONLY)
    }

    #[inline]
    pub fn is_public(&self) -> bool {
        self.access.contains(VariableAccess::PUBLIC)
    }

    #[inline]
    pub fn is_reserved(&self) -> bool {
        self.access.contains(VariableAccess::RESERVED)
    }

    /// Public writes are refused
    #[inline]
    pub fn is_engine_owned(&self) -> bool {
        self.is_read_only() || self.is_reserved()
    }

    /// Clamp a value into range
    #[inline]
    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }
}

/// Who is writing a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Writer {
    /// Public API caller (non-public, read-only and reserved variables are rejected)
    Public,
    /// The engine itself
    Engine,
}

/// Indices of the reserved cue-local variables. A variable counts only when
/// it carries the `RESERVED` flag under one of the [`reserved`] names.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReservedVariables {
    pub num_cue_instances: Option<usize>,
    pub attack_time: Option<usize>,
    pub release_time: Option<usize>,
}

/// Per-engine variable store
#[derive(Debug, Clone)]
pub struct VariableStore {
    defs: Vec<VariableDef>,
    names: HashMap<String, usize>,
    globals: Vec<f32>,
    reserved: ReservedVariables,
}

impl VariableStore {
    pub fn new(defs: Vec<VariableDef>) -> Self {
        let names = defs
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect::<HashMap<_, _>>();
        let globals = defs.iter().map(|d| d.clamp(d.initial)).collect();

        let local = |name: &str| {
            names
                .get(name)
                .copied()
                .filter(|&i| defs[i].is_cue_local() && defs[i].is_reserved())
        };
        let reserved = ReservedVariables {
            num_cue_instances: local(reserved::NUM_CUE_INSTANCES),
            attack_time: local(reserved::ATTACK_TIME),
            release_time: local(reserved::RELEASE_TIME),
        };

        Self {
            defs,
            names,
            globals,
            reserved,
        }
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn def(&self, index: usize) -> Option<&VariableDef> {
        self.defs.get(index)
    }

    pub fn reserved(&self) -> ReservedVariables {
        self.reserved
    }

    /// Look up a variable by name
    pub fn index_of(&self, name: &str) -> CueResult<usize> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| CueError::NotFound(format!("variable '{}'", name)))
    }

    /// Fresh cue-local value set (one slot per variable, only cue-local ones are used)
    pub fn new_cue_locals(&self) -> Vec<f32> {
        self.defs.iter().map(|d| d.clamp(d.initial)).collect()
    }

    fn checked_def(&self, index: usize, cue_local: bool, public: bool) -> CueResult<&VariableDef> {
        let def = self
            .defs
            .get(index)
            .ok_or_else(|| CueError::NotFound(format!("variable index {}", index)))?;

        if def.is_cue_local() != cue_local {
            let scope = if cue_local { "cue-local" } else { "global" };
            return Err(CueError::NotFound(format!("{} variable '{}'", scope, def.name)));
        }
        if public && !def.is_public() {
            return Err(CueError::NotFound(format!("public variable '{}'", def.name)));
        }
        Ok(def)
    }

    /// Access and value checks shared by both write paths. Returns the clamped value.
    fn checked_write(&self, index: usize, cue_local: bool, value: f32, writer: Writer) -> CueResult<f32> {
        let public = writer == Writer::Public;
        let def = self.checked_def(index, cue_local, public)?;
        if public && def.is_engine_owned() {
            return Err(CueError::ReadOnly(def.name.clone()));
        }
        if !value.is_finite() {
            return Err(CueError::InvalidArgument(format!("{} for variable '{}'", value, def.name)));
        }
        let clamped = def.clamp(value);
        if clamped != value {
            log::debug!("{}", CueError::OutOfRange { value, min: def.min, max: def.max });
        }
        Ok(clamped)
    }

    /// Write a global variable. Returns the stored (clamped) value.
    pub fn set_global(&mut self, index: usize, value: f32, writer: Writer) -> CueResult<f32> {
        let clamped = self.checked_write(index, false, value, writer)?;
        self.globals[index] = clamped;
        Ok(clamped)
    }

    /// Public read of a global variable
    pub fn get_global(&self, index: usize) -> CueResult<f32> {
        self.checked_def(index, false, true)?;
        Ok(self.globals[index])
    }

    /// Write a cue-local variable into `locals`. Returns the stored (clamped) value.
    pub fn set_local(&self, locals: &mut [f32], index: usize, value: f32, writer: Writer) -> CueResult<f32> {
        let clamped = self.checked_write(index, true, value, writer)?;
        if let Some(slot) = locals.get_mut(index) {
            *slot = clamped;
        }
        Ok(clamped)
    }

    /// Public read of a cue-local variable
    pub fn get_local(&self, locals: &[f32], index: usize) -> CueResult<f32> {
        self.checked_def(index, true, true)?;
        Ok(locals.get(index).copied().unwrap_or(0.0))
    }

    /// Value an RPC curve sees for `index` in the context of one cue
    #[inline]
    pub fn value_for(&self, index: usize, locals: &[f32]) -> f32 {
        match self.defs.get(index) {
            Some(def) if def.is_cue_local() => locals.get(index).copied().unwrap_or(def.initial),
            Some(_) => self.globals[index],
            None => 0.0,
        }
    }

    /// Value of a global variable (unknown or cue-local indices read as 0)
    #[inline]
    pub fn global_value(&self, index: usize) -> f32 {
        match self.defs.get(index) {
            Some(def) if !def.is_cue_local() => self.globals[index],
            _ => 0.0,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
