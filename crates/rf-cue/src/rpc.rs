//! RPC (Runtime Parameter Control) Evaluation
//!
//! Pure evaluation of piecewise curves that map a control variable to a
//! modulation value, plus the rules used to combine several curves that
//! target the same parameter.
//!
//! Units by parameter:
//! - `Volume`: decibels (0 = unity)
//! - `Pitch`: cents
//! - `ReverbSend`: decibels
//! - `FilterFrequency`: Hz
//! - `FilterQFactor`: Q
//! - `Dsp(slot)`: raw DSP preset parameter value

use serde::{Deserialize, Serialize};

use crate::curve::CurveShape;

/// Amplitude below this level is treated as silence
pub const SILENCE_DB: f32 = -96.0;

/// Convert decibels to linear amplitude (`10^(dB/20)`), 0 at or below [`SILENCE_DB`]
#[inline]
pub fn decibel_to_amplitude(decibel: f32) -> f32 {
    decibel_to_amplitude_with_floor(decibel, SILENCE_DB)
}

/// [`decibel_to_amplitude`] with an explicit silence floor
#[inline]
pub fn decibel_to_amplitude_with_floor(decibel: f32, floor_db: f32) -> f32 {
    if decibel <= floor_db {
        0.0
    } else {
        10.0_f32.powf(decibel / 20.0)
    }
}

/// Convert linear amplitude to decibels, clamped at [`SILENCE_DB`]
#[inline]
pub fn amplitude_to_decibel(amplitude: f32) -> f32 {
    if amplitude <= 0.0 {
        return SILENCE_DB;
    }
    (20.0 * amplitude.log10()).max(SILENCE_DB)
}

/// Convert a pitch offset in cents to a frequency ratio
#[inline]
pub fn cents_to_frequency_ratio(cents: f32) -> f32 {
    2.0_f32.powf(cents / 1200.0)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TARGET PARAMETER
// ═══════════════════════════════════════════════════════════════════════════════

/// Number of built-in (non-DSP) parameters
pub const BUILTIN_PARAMETER_COUNT: u16 = 5;

/// Parameter an RPC curve drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RpcParameter {
    Volume,
    Pitch,
    ReverbSend,
    FilterFrequency,
    FilterQFactor,
    /// Global DSP parameter slot (flattened across all DSP presets)
    Dsp(u16),
}

impl RpcParameter {
    /// Decode the catalog's raw parameter number (values past the built-ins are DSP slots)
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0 => RpcParameter::Volume,
            1 => RpcParameter::Pitch,
            2 => RpcParameter::ReverbSend,
            3 => RpcParameter::FilterFrequency,
            4 => RpcParameter::FilterQFactor,
            n => RpcParameter::Dsp(n - BUILTIN_PARAMETER_COUNT),
        }
    }

    pub fn is_dsp(&self) -> bool {
        matches!(self, RpcParameter::Dsp(_))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RPC CURVE
// ═══════════════════════════════════════════════════════════════════════════════

/// Control point (x = variable value, y = output)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RpcPoint {
    pub x: f32,
    pub y: f32,
    /// Interpolation toward the next point
    #[serde(default)]
    pub shape: CurveShape,
}

impl RpcPoint {
    pub fn new(x: f32, y: f32, shape: CurveShape) -> Self {
        Self { x, y, shape }
    }
}

/// Piecewise curve bound to one control variable and one target parameter
///
/// ## Example
/// ```rust
/// use rf_cue::{CurveShape, RpcCurve, RpcParameter};
///
/// let curve = RpcCurve::new(1, 0, RpcParameter::Volume)
///     .with_point(0.0, -24.0, CurveShape::Linear)
///     .with_point(100.0, 0.0, CurveShape::Linear);
///
/// assert_eq!(curve.evaluate(50.0), -12.0);
/// assert_eq!(curve.evaluate(500.0), 0.0); // held at the last point
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcCurve {
    /// Code used by sounds/tracks to reference this curve
    pub code: u32,
    /// Index of the controlling variable
    pub variable: usize,
    /// Target parameter
    pub parameter: RpcParameter,
    /// Points, ascending by x
    pub points: Vec<RpcPoint>,
}

impl RpcCurve {
    pub fn new(code: u32, variable: usize, parameter: RpcParameter) -> Self {
        Self {
            code,
            variable,
            parameter,
            points: Vec::new(),
        }
    }

    /// Append a point (points must be supplied in ascending x)
    pub fn with_point(mut self, x: f32, y: f32, shape: CurveShape) -> Self {
        self.points.push(RpcPoint::new(x, y, shape));
        self
    }

    /// Curve domain (first and last x)
    pub fn domain(&self) -> Option<(f32, f32)> {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => Some((first.x, last.x)),
            _ => None,
        }
    }

    /// True if the x values never decrease
    pub fn is_sorted(&self) -> bool {
        self.points.windows(2).all(|w| w[0].x <= w[1].x)
    }

    /// Evaluate curve at the given variable value
    #[inline]
    pub fn evaluate(&self, value: f32) -> f32 {
        evaluate_points(&self.points, value)
    }
}

/// Evaluate a point list at `value`
///
/// The input is clamped to the domain, so the boundary output is held
/// outside of it. An empty list yields 0.
pub fn evaluate_points(points: &[RpcPoint], value: f32) -> f32 {
    let (first, last) = match (points.first(), points.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return 0.0,
    };

    if value <= first.x {
        return first.y;
    }
    if value >= last.x {
        return last.y;
    }

    for pair in points.windows(2) {
        let (p0, p1) = (&pair[0], &pair[1]);
        if value >= p0.x && value <= p1.x {
            let dx = p1.x - p0.x;
            if dx <= 0.0 {
                return p1.y;
            }
            let t = (value - p0.x) / dx;
            return p0.y + p0.shape.evaluate(t) * (p1.y - p0.y);
        }
    }

    last.y
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMBINATION
// ═══════════════════════════════════════════════════════════════════════════════

/// How several curve outputs targeting one parameter are merged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CombineRule {
    /// Add outputs (decibel / cent domains)
    #[default]
    Sum,
    /// Multiply outputs (linear domains such as DSP percentages)
    Multiply,
    /// Smallest output wins
    Min,
    /// Largest output wins
    Max,
}

impl CombineRule {
    #[inline]
    pub fn combine(&self, acc: Option<f32>, value: f32) -> f32 {
        match acc {
            None => value,
            Some(acc) => match self {
                CombineRule::Sum => acc + value,
                CombineRule::Multiply => acc * value,
                CombineRule::Min => acc.min(value),
                CombineRule::Max => acc.max(value),
            },
        }
    }
}

/// Combination rule per target parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcCombineRules {
    pub volume: CombineRule,
    pub pitch: CombineRule,
    pub reverb_send: CombineRule,
    pub filter_frequency: CombineRule,
    pub filter_q: CombineRule,
    pub dsp: CombineRule,
}

impl Default for RpcCombineRules {
    fn default() -> Self {
        Self {
            volume: CombineRule::Sum,
            pitch: CombineRule::Sum,
            reverb_send: CombineRule::Sum,
            filter_frequency: CombineRule::Min,
            filter_q: CombineRule::Max,
            dsp: CombineRule::Multiply,
        }
    }
}

impl RpcCombineRules {
    pub fn rule(&self, parameter: RpcParameter) -> CombineRule {
        match parameter {
            RpcParameter::Volume => self.volume,
            RpcParameter::Pitch => self.pitch,
            RpcParameter::ReverbSend => self.reverb_send,
            RpcParameter::FilterFrequency => self.filter_frequency,
            RpcParameter::FilterQFactor => self.filter_q,
            RpcParameter::Dsp(_) => self.dsp,
        }
    }
}

/// Accumulated RPC outputs for one sound or track instance
///
/// `None` means no curve targets that parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RpcOutputs {
    pub volume_db: Option<f32>,
    pub pitch_cents: Option<f32>,
    pub reverb_send_db: Option<f32>,
    pub filter_frequency: Option<f32>,
    pub filter_q: Option<f32>,
}

impl RpcOutputs {
    /// Fold one curve output into the accumulator (DSP slots are ignored here)
    pub fn apply(&mut self, parameter: RpcParameter, value: f32, rules: &RpcCombineRules) {
        let rule = rules.rule(parameter);
        let slot = match parameter {
            RpcParameter::Volume => &mut self.volume_db,
            RpcParameter::Pitch => &mut self.pitch_cents,
            RpcParameter::ReverbSend => &mut self.reverb_send_db,
            RpcParameter::FilterFrequency => &mut self.filter_frequency,
            RpcParameter::FilterQFactor => &mut self.filter_q,
            RpcParameter::Dsp(_) => return,
        };
        *slot = Some(rule.combine(*slot, value));
    }

    /// Evaluate `curves` against variable values from `lookup`
    pub fn evaluate<'a>(
        curves: impl IntoIterator<Item = &'a RpcCurve>,
        lookup: impl Fn(usize) -> f32,
        rules: &RpcCombineRules,
    ) -> Self {
        let mut out = Self::default();
        for curve in curves {
            if curve.parameter.is_dsp() {
                continue;
            }
            out.apply(curve.parameter, curve.evaluate(lookup(curve.variable)), rules);
        }
        out
    }

    #[inline]
    pub fn volume_db(&self) -> f32 {
        self.volume_db.unwrap_or(0.0)
    }

    #[inline]
    pub fn pitch_cents(&self) -> f32 {
        self.pitch_cents.unwrap_or(0.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
