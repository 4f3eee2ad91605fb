//! Reparameterization between bounded model parameters and free solver variables.
//!
//! The solver works on an unconstrained vector `u`; each model parameter is
//! `p = T(u)` for one of:
//!
//! - `Free`:      `p = u`
//! - `Lower`:     `p = lo − 1 + √(u² + 1)`            (p ≥ lo)
//! - `Upper`:     `p = hi + 1 − √(u² + 1)`            (p ≤ hi)
//! - `Interval`:  `p = lo + (sin u + 1)(hi − lo)/2`  (lo ≤ p ≤ hi)
//! - `Above`:     `p = lo + eᵘ`                      (p > lo, strictly)
//! - `Within`:    `p = lo + (hi − lo)/(1 + e⁻ᵘ)`     (lo < p < hi, strictly)
//!
//! Widths always use `Above`/`Within` with `lo ≥ 0`, so no iterate can ever
//! reach a non-positive width.

/// Mapping for one parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    Free,
    Lower { lo: f64 },
    Upper { hi: f64 },
    Interval { lo: f64, hi: f64 },
    Above { lo: f64 },
    Within { lo: f64, hi: f64 },
}

/// Keeps internal starting points off the flat edges of `Interval`.
const EDGE_NUDGE: f64 = 1e-6;

impl Transform {
    /// Closed-range transform for optional limits.
    pub fn closed(lo: Option<f64>, hi: Option<f64>) -> Self {
        match (lo, hi) {
            (None, None) => Transform::Free,
            (Some(lo), None) => Transform::Lower { lo },
            (None, Some(hi)) => Transform::Upper { hi },
            (Some(lo), Some(hi)) => Transform::Interval { lo, hi },
        }
    }

    /// Open-range transform that never reaches `lo` (used for widths).
    pub fn strictly_above(lo: f64, hi: Option<f64>) -> Self {
        match hi {
            None => Transform::Above { lo },
            Some(hi) => Transform::Within { lo, hi },
        }
    }

    /// Model parameter for solver variable `u`.
    pub fn to_external(self, u: f64) -> f64 {
        match self {
            Transform::Free => u,
            Transform::Lower { lo } => lo - 1.0 + (u * u + 1.0).sqrt(),
            Transform::Upper { hi } => hi + 1.0 - (u * u + 1.0).sqrt(),
            Transform::Interval { lo, hi } => lo + (u.sin() + 1.0) * (hi - lo) / 2.0,
            Transform::Above { lo } => lo + u.exp(),
            Transform::Within { lo, hi } => lo + (hi - lo) / (1.0 + (-u).exp()),
        }
    }

    /// Solver variable for model parameter `p`.
    ///
    /// `p` must satisfy the transform's range. Starting points sitting exactly on
    /// a closed bound are moved slightly inside, where the derivative is non-zero.
    pub fn to_internal(self, p: f64) -> f64 {
        match self {
            Transform::Free => p,
            Transform::Lower { lo } => {
                let s = (p - lo + 1.0).max(1.0 + EDGE_NUDGE);
                (s * s - 1.0).sqrt()
            }
            Transform::Upper { hi } => {
                let s = (hi - p + 1.0).max(1.0 + EDGE_NUDGE);
                (s * s - 1.0).sqrt()
            }
            Transform::Interval { lo, hi } => {
                let s = (2.0 * (p - lo) / (hi - lo) - 1.0).clamp(-1.0 + EDGE_NUDGE, 1.0 - EDGE_NUDGE);
                s.asin()
            }
            Transform::Above { lo } => (p - lo).ln(),
            Transform::Within { lo, hi } => {
                let s = (p - lo) / (hi - lo);
                (s / (1.0 - s)).ln()
            }
        }
    }

    /// `dp/du` at solver variable `u`.
    pub fn derivative(self, u: f64) -> f64 {
        match self {
            Transform::Free => 1.0,
            Transform::Lower { .. } => u / (u * u + 1.0).sqrt(),
            Transform::Upper { .. } => -u / (u * u + 1.0).sqrt(),
            Transform::Interval { lo, hi } => u.cos() * (hi - lo) / 2.0,
            Transform::Above { .. } => u.exp(),
            Transform::Within { lo, hi } => {
                let e = (-u).exp();
                (hi - lo) * e / ((1.0 + e) * (1.0 + e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all() -> Vec<Transform> {
        vec![
            Transform::Free,
            Transform::Lower { lo: -2.0 },
            Transform::Upper { hi: 5.0 },
            Transform::Interval { lo: -1.0, hi: 4.0 },
            Transform::Above { lo: 0.0 },
            Transform::Within { lo: 0.0, hi: 10.0 },
        ]
    }

    #[test]
    fn round_trip_inside_range() {
        for t in all() {
            for &p in &[0.5, 1.0, 3.0] {
                let back = t.to_external(t.to_internal(p));
                assert!((back - p).abs() < 1e-9, "{t:?}: {p} -> {back}");
            }
        }
    }

    #[test]
    fn derivative_matches_finite_difference() {
        let h = 1e-6;
        for t in all() {
            for &u in &[-1.3, -0.2, 0.4, 2.0] {
                let fd = (t.to_external(u + h) - t.to_external(u - h)) / (2.0 * h);
                assert!((t.derivative(u) - fd).abs() < 1e-6, "{t:?} at {u}");
            }
        }
    }

    #[test]
    fn strict_transforms_never_reach_lower_bound() {
        let above = Transform::strictly_above(0.0, None);
        let within = Transform::strictly_above(0.0, Some(3.0));
        for &u in &[-50.0, -10.0, 0.0, 10.0, 30.0] {
            assert!(above.to_external(u) > 0.0);
            let w = within.to_external(u);
            assert!(w > 0.0 && w <= 3.0);
        }
    }

    #[test]
    fn closed_bounds_start_off_the_edge() {
        let t = Transform::closed(Some(0.0), Some(10.0));
        let u = t.to_internal(0.0);
        assert!(t.derivative(u).abs() > 0.0);
        assert!(t.to_external(u) >= 0.0);
    }
}
