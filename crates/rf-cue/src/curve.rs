//! Curve Shapes and Linear Ramps
//!
//! Interpolation shapes used between RPC curve points, plus the linear
//! ramp that drives category volume fades and cue fade-in/fade-out.

use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, PI};

/// Interpolation shape from one RPC point to the next
///
/// Every shape maps `0 → 0` and `1 → 1`, so consecutive segments always
/// meet at the shared point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum CurveShape {
    /// y = t
    #[default]
    Linear = 0,
    /// Accelerating: y = t²
    Fast = 1,
    /// Decelerating: y = 1 - (1 - t)²
    Slow = 2,
    /// Quarter sine: y = sin(t · π/2)
    Sin = 3,
    /// Half cosine S-curve: y = (1 - cos(t · π)) / 2
    SinCos = 4,
}

impl CurveShape {
    /// Convert from the catalog's point-type byte
    #[inline]
    pub fn from_index(index: u8) -> Self {
        match index {
            0 => CurveShape::Linear,
            1 => CurveShape::Fast,
            2 => CurveShape::Slow,
            3 => CurveShape::Sin,
            4 => CurveShape::SinCos,
            _ => CurveShape::Linear,
        }
    }

    /// Evaluate shape at normalized position t (0.0 - 1.0)
    #[inline]
    pub fn evaluate(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);

        match self {
            CurveShape::Linear => t,
            CurveShape::Fast => t * t,
            CurveShape::Slow => {
                let inv = 1.0 - t;
                1.0 - inv * inv
            }
            CurveShape::Sin => (t * FRAC_PI_2).sin(),
            CurveShape::SinCos => (1.0 - (t * PI).cos()) * 0.5,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LINEAR RAMP
// ═══════════════════════════════════════════════════════════════════════════════

/// Value ramped linearly toward a target at a fixed rate
///
/// The rate is fixed when the ramp starts: `|target - current| / duration_ms`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearRamp {
    current: f32,
    target: f32,
    rate_per_ms: f32,
}

impl LinearRamp {
    /// Create a ramp resting at `value`
    pub fn new(value: f32) -> Self {
        Self {
            current: value,
            target: value,
            rate_per_ms: 0.0,
        }
    }

    /// Start ramping toward `target` over `duration_ms` (instant when 0)
    pub fn start(&mut self, target: f32, duration_ms: u32) {
        self.target = target;
        if duration_ms == 0 {
            self.current = target;
            self.rate_per_ms = 0.0;
        } else {
            self.rate_per_ms = (target - self.current).abs() / duration_ms as f32;
        }
    }

    /// Jump to `value` and stop ramping
    pub fn set(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.rate_per_ms = 0.0;
    }

    /// Advance by `delta_ms`. Returns true while still ramping.
    pub fn advance(&mut self, delta_ms: u32) -> bool {
        if self.current == self.target {
            self.rate_per_ms = 0.0;
            return false;
        }

        let step = self.rate_per_ms * delta_ms as f32;
        if self.current < self.target {
            self.current = (self.current + step).min(self.target);
        } else {
            self.current = (self.current - step).max(self.target);
        }

        if self.current == self.target {
            self.rate_per_ms = 0.0;
            false
        } else {
            true
        }
    }

    #[inline]
    pub fn current(&self) -> f32 {
        self.current
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.current != self.target
    }
}

impl Default for LinearRamp {
    fn default() -> Self {
        Self::new(1.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [CurveShape; 5] = [
        CurveShape::Linear,
        CurveShape::Fast,
        CurveShape::Slow,
        CurveShape::Sin,
        CurveShape::SinCos,
    ];

    #[test]
    fn test_shape_boundaries() {
        for shape in ALL {
            assert!(shape.evaluate(0.0).abs() < 0.0001, "{:?} at 0.0", shape);
            assert!((shape.evaluate(1.0) - 1.0).abs() < 0.0001, "{:?} at 1.0", shape);
        }
    }

    #[test]
    fn test_shape_monotonic() {
        for shape in ALL {
            let mut prev = 0.0;
            for i in 0..=100 {
                let val = shape.evaluate(i as f32 / 100.0);
                assert!(val >= prev - 0.0001, "{:?}: {} < {}", shape, val, prev);
                prev = val;
            }
        }
    }

    #[test]
    fn test_fast_and_slow() {
        assert!((CurveShape::Fast.evaluate(0.5) - 0.25).abs() < 0.0001);
        assert!((CurveShape::Slow.evaluate(0.5) - 0.75).abs() < 0.0001);
        assert!((CurveShape::SinCos.evaluate(0.5) - 0.5).abs() < 0.0001);
    }

    #[test]
    fn test_from_index() {
        assert_eq!(CurveShape::from_index(0), CurveShape::Linear);
        assert_eq!(CurveShape::from_index(4), CurveShape::SinCos);
        assert_eq!(CurveShape::from_index(200), CurveShape::Linear);
    }

    #[test]
    fn test_ramp_half_way() {
        let mut ramp = LinearRamp::new(0.0);
        ramp.start(1.0, 1000);
        assert!(ramp.advance(500));
        assert!((ramp.current() - 0.5).abs() < 0.0001);
        assert!(!ramp.advance(600));
        assert_eq!(ramp.current(), 1.0);
        assert!(!ramp.is_active());
    }

    #[test]
    fn test_ramp_down_and_instant() {
        let mut ramp = LinearRamp::new(1.0);
        ramp.start(0.0, 200);
        ramp.advance(100);
        assert!((ramp.current() - 0.5).abs() < 0.0001);

        ramp.start(0.8, 0);
        assert_eq!(ramp.current(), 0.8);
        assert!(!ramp.is_active());
    }
}
