//! Lorentzian peak model.
//!
//! ```text
//! L(x) = A · w² / ((x − c)² + w²)
//! ```
//!
//! with center `c`, half-width at half-maximum `w > 0` and height `A`, so that
//! `L(c) = A` and `L(c ± w) = A / 2`.

use serde::{Deserialize, Serialize};

use crate::domain::{PeakBounds, PeakParams};
use crate::error::Result;

/// Stable identifier assigned by the engine when a peak is added.
///
/// Positions in the peak list shift on removal; ids never do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeakId(pub u64);

/// Evaluate a Lorentzian with the given parameters.
pub fn lorentzian(p: &PeakParams, x: f64) -> f64 {
    let d = x - p.center;
    let w2 = p.width * p.width;
    p.amplitude * (w2 / (d * d + w2))
}

/// Partial derivatives `[∂L/∂c, ∂L/∂w, ∂L/∂A]` at `x`.
pub fn lorentzian_partials(p: &PeakParams, x: f64) -> [f64; 3] {
    let d = x - p.center;
    let w = p.width;
    let w2 = w * w;
    let denom = d * d + w2;
    let denom2 = denom * denom;
    [
        2.0 * p.amplitude * w2 * d / denom2,
        2.0 * p.amplitude * w * d * d / denom2,
        w2 / denom,
    ]
}

/// A single peak hypothesis.
#[derive(Debug, Clone, PartialEq)]
pub struct PeakModel {
    id: PeakId,
    guess: PeakParams,
    params: PeakParams,
    bounds: PeakBounds,
    fitted: bool,
    stderr: Option<PeakParams>,
}

impl PeakModel {
    /// Create an unbounded peak. Fails if `width <= 0` or any value is non-finite.
    pub fn new(center: f64, width: f64, amplitude: f64) -> Result<Self> {
        Self::with_bounds(center, width, amplitude, PeakBounds::unbounded())
    }

    /// Create a peak whose search is confined by `bounds`.
    pub fn with_bounds(center: f64, width: f64, amplitude: f64, bounds: PeakBounds) -> Result<Self> {
        let guess = PeakParams::new(center, width, amplitude);
        guess.validate()?;
        bounds.validate_guess(&guess)?;
        Ok(Self {
            id: PeakId::default(),
            guess,
            params: guess,
            bounds,
            fitted: false,
            stderr: None,
        })
    }

    pub fn id(&self) -> PeakId {
        self.id
    }

    pub fn center(&self) -> f64 {
        self.params.center
    }

    pub fn width(&self) -> f64 {
        self.params.width
    }

    pub fn amplitude(&self) -> f64 {
        self.params.amplitude
    }

    /// Current values: the guess until a fit writes results back.
    pub fn params(&self) -> &PeakParams {
        &self.params
    }

    /// Starting point used by every fit.
    pub fn guess(&self) -> &PeakParams {
        &self.guess
    }

    pub fn bounds(&self) -> &PeakBounds {
        &self.bounds
    }

    /// True once a converged fit has assigned the current values.
    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    /// One-sigma standard errors from the last converged fit, when available.
    pub fn stderr(&self) -> Option<&PeakParams> {
        self.stderr.as_ref()
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        lorentzian(&self.params, x)
    }

    pub fn evaluate_many(&self, x: &[f64]) -> Vec<f64> {
        x.iter().map(|&xi| self.evaluate(xi)).collect()
    }

    /// `[∂L/∂c, ∂L/∂w, ∂L/∂A]` at `x` for the current values.
    pub fn partials(&self, x: f64) -> [f64; 3] {
        lorentzian_partials(&self.params, x)
    }

    /// Full width at half maximum.
    pub fn fwhm(&self) -> f64 {
        2.0 * self.params.width
    }

    /// Integrated area `π · A · w`.
    pub fn area(&self) -> f64 {
        std::f64::consts::PI * self.params.amplitude * self.params.width
    }

    pub(crate) fn assign_id(&mut self, id: PeakId) {
        self.id = id;
    }

    /// Store solver output. `fitted` is only set for converged fits.
    pub(crate) fn apply_fit(&mut self, params: PeakParams, stderr: Option<PeakParams>, fitted: bool) {
        self.params = params;
        self.stderr = stderr;
        self.fitted = fitted;
    }

    /// Make the current values the new starting point and clear fit state.
    pub(crate) fn promote(&mut self) {
        self.guess = self.params;
        self.fitted = false;
        self.stderr = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FitError;

    #[test]
    fn peak_value_at_center_is_amplitude() {
        let p = PeakModel::new(1580.0, 12.5, 3.25).unwrap();
        assert_eq!(p.evaluate(1580.0), 3.25);
    }

    #[test]
    fn half_maximum_at_one_width() {
        for &(c, w, a) in &[(0.0, 1.0, 1.0), (1350.0, 40.0, 0.8), (26.5, 0.3, -2.0)] {
            let p = PeakModel::new(c, w, a).unwrap();
            assert!((p.evaluate(c + w) - a / 2.0).abs() < 1e-12 * a.abs().max(1.0));
            assert!((p.evaluate(c - w) - a / 2.0).abs() < 1e-12 * a.abs().max(1.0));
        }
    }

    #[test]
    fn non_positive_width_is_rejected() {
        let err = PeakModel::new(5.0, -1.0, 1.0).unwrap_err();
        assert!(matches!(err, FitError::Validation(_)));
        assert!(PeakModel::new(5.0, 0.0, 1.0).is_err());
    }

    #[test]
    fn evaluate_many_matches_scalar() {
        let p = PeakModel::new(2.0, 0.5, 4.0).unwrap();
        let xs = [0.0, 1.5, 2.0, 2.5, 10.0];
        let ys = p.evaluate_many(&xs);
        for (x, y) in xs.iter().zip(ys.iter()) {
            assert_eq!(*y, p.evaluate(*x));
        }
    }

    #[test]
    fn partials_match_finite_differences() {
        let p = PeakParams::new(3.0, 0.7, 2.5);
        let h = 1e-6;
        for &x in &[1.0, 2.9, 3.0, 3.4, 6.0] {
            let g = lorentzian_partials(&p, x);
            let dc = (lorentzian(&PeakParams { center: p.center + h, ..p }, x)
                - lorentzian(&PeakParams { center: p.center - h, ..p }, x))
                / (2.0 * h);
            let dw = (lorentzian(&PeakParams { width: p.width + h, ..p }, x)
                - lorentzian(&PeakParams { width: p.width - h, ..p }, x))
                / (2.0 * h);
            let da = (lorentzian(&PeakParams { amplitude: p.amplitude + h, ..p }, x)
                - lorentzian(&PeakParams { amplitude: p.amplitude - h, ..p }, x))
                / (2.0 * h);
            assert!((g[0] - dc).abs() < 1e-6, "d/dc at {x}: {} vs {dc}", g[0]);
            assert!((g[1] - dw).abs() < 1e-6, "d/dw at {x}: {} vs {dw}", g[1]);
            assert!((g[2] - da).abs() < 1e-6, "d/dA at {x}: {} vs {da}", g[2]);
        }
        let model = PeakModel::new(p.center, p.width, p.amplitude).unwrap();
        assert_eq!(model.partials(2.9), lorentzian_partials(&p, 2.9));
    }

    #[test]
    fn area_and_fwhm() {
        let p = PeakModel::new(0.0, 2.0, 3.0).unwrap();
        assert_eq!(p.fwhm(), 4.0);
        assert!((p.area() - 6.0 * std::f64::consts::PI).abs() < 1e-12);
    }
}
