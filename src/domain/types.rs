//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - handed to external reporters/persisters as JSON
//! - compared across engines fitted on the same dataset

use std::collections::BTreeMap;
use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{FitError, Result};

/// The three parameters of one Lorentzian peak.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakParams {
    pub center: f64,
    /// Half-width at half-maximum. Always `> 0` for a valid peak.
    pub width: f64,
    /// Peak height at `center`.
    pub amplitude: f64,
}

impl PeakParams {
    pub fn new(center: f64, width: f64, amplitude: f64) -> Self {
        Self {
            center,
            width,
            amplitude,
        }
    }

    /// Check the invariants every peak must satisfy.
    pub fn validate(&self) -> Result<()> {
        if !self.center.is_finite() {
            return Err(FitError::validation(format!("peak center must be finite, got {}", self.center)));
        }
        if !self.amplitude.is_finite() {
            return Err(FitError::validation(format!(
                "peak amplitude must be finite, got {}",
                self.amplitude
            )));
        }
        if !(self.width.is_finite() && self.width > 0.0) {
            return Err(FitError::validation(format!(
                "peak width must be finite and > 0, got {}",
                self.width
            )));
        }
        Ok(())
    }
}

/// Optional search constraints for a single peak.
///
/// Centers are confined to `guess ± center_tolerance`. Widths always stay
/// strictly positive; `width_min`/`width_max` narrow that further (open interval).
/// Amplitude limits are closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PeakBounds {
    pub center_tolerance: Option<f64>,
    pub width_min: Option<f64>,
    pub width_max: Option<f64>,
    pub amplitude_min: Option<f64>,
    pub amplitude_max: Option<f64>,
}

impl PeakBounds {
    /// No constraints beyond `width > 0`.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_center_tolerance(mut self, tolerance: f64) -> Self {
        self.center_tolerance = Some(tolerance);
        self
    }

    pub fn with_width_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.width_min = min;
        self.width_max = max;
        self
    }

    pub fn with_amplitude_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.amplitude_min = min;
        self.amplitude_max = max;
        self
    }

    /// Validate the bounds themselves and check that `guess` lies inside them.
    pub fn validate_guess(&self, guess: &PeakParams) -> Result<()> {
        if let Some(tol) = self.center_tolerance {
            if !(tol.is_finite() && tol > 0.0) {
                return Err(FitError::validation(format!("center tolerance must be finite and > 0, got {tol}")));
            }
        }

        let w_lo = self.width_min.unwrap_or(0.0);
        if !(w_lo.is_finite() && w_lo >= 0.0) {
            return Err(FitError::validation(format!("width minimum must be finite and >= 0, got {w_lo}")));
        }
        if let Some(w_hi) = self.width_max {
            if !(w_hi.is_finite() && w_hi > w_lo) {
                return Err(FitError::validation(format!(
                    "width maximum must be finite and > {w_lo}, got {w_hi}"
                )));
            }
            if guess.width >= w_hi {
                return Err(FitError::validation(format!(
                    "width guess {} must be < width maximum {w_hi}",
                    guess.width
                )));
            }
        }
        if guess.width <= w_lo {
            return Err(FitError::validation(format!(
                "width guess {} must be > width minimum {w_lo}",
                guess.width
            )));
        }

        for (name, v) in [("minimum", self.amplitude_min), ("maximum", self.amplitude_max)] {
            if let Some(v) = v {
                if !v.is_finite() {
                    return Err(FitError::validation(format!("amplitude {name} must be finite, got {v}")));
                }
            }
        }
        if let (Some(lo), Some(hi)) = (self.amplitude_min, self.amplitude_max) {
            if hi <= lo {
                return Err(FitError::validation(format!(
                    "amplitude range is empty: [{lo}, {hi}]"
                )));
            }
        }
        if self.amplitude_min.is_some_and(|lo| guess.amplitude < lo)
            || self.amplitude_max.is_some_and(|hi| guess.amplitude > hi)
        {
            return Err(FitError::validation(format!(
                "amplitude guess {} lies outside [{}, {}]",
                guess.amplitude,
                self.amplitude_min.unwrap_or(f64::NEG_INFINITY),
                self.amplitude_max.unwrap_or(f64::INFINITY)
            )));
        }

        Ok(())
    }
}

/// Column semantics of a dataset (what `x` and `y` mean).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisLabels {
    pub x_label: String,
    pub y_label: String,
}

impl AxisLabels {
    pub fn new(x_label: impl Into<String>, y_label: impl Into<String>) -> Self {
        Self {
            x_label: x_label.into(),
            y_label: y_label.into(),
        }
    }
}

impl Default for AxisLabels {
    fn default() -> Self {
        Self::new("x", "y")
    }
}

/// A scalar metadata value carried through from the loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Flag(v) => write!(f, "{v}"),
            MetaValue::Number(v) => write!(f, "{v}"),
            MetaValue::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        MetaValue::Number(value)
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        MetaValue::Flag(value)
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Text(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::Text(value)
    }
}

/// Free-form measurement metadata. Ordered so reports are stable.
pub type Metadata = BTreeMap<String, MetaValue>;

/// Measurement technique (selects an adapter profile).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Technique {
    Raman,
    Xrd,
}

impl Technique {
    /// Human-readable label for terminal output.
    pub fn display_name(self) -> &'static str {
        match self {
            Technique::Raman => "Raman",
            Technique::Xrd => "XRD",
        }
    }
}

/// Polynomial baseline fitted together with the peaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundKind {
    /// No baseline: the model is the plain sum of peaks.
    #[default]
    None,
    Constant,
    Linear,
    Quadratic,
    Cubic,
}

impl BackgroundKind {
    /// Number of polynomial coefficients (lowest order first).
    pub fn coefficient_len(self) -> usize {
        match self {
            BackgroundKind::None => 0,
            BackgroundKind::Constant => 1,
            BackgroundKind::Linear => 2,
            BackgroundKind::Quadratic => 3,
            BackgroundKind::Cubic => 4,
        }
    }
}

/// Solver settings for one `fit()` call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitOptions {
    /// Upper bound on Jacobian evaluations.
    pub max_iterations: usize,
    /// Relative residual-change tolerance: an accepted step with
    /// `rss_old - rss_new <= tolerance * rss_old` ends the search as converged.
    pub tolerance: f64,
    /// Largest acceptable `rss / Σ(y - ȳ)²` for a converged fit, i.e. the
    /// model must explain at least `1 - max_relative_rss` of the variance.
    ///
    /// A solver that stops at a point worse than this is reported as not
    /// converged (`Termination::ResidualAboveThreshold`).
    pub max_relative_rss: f64,
}

impl FitOptions {
    pub const DEFAULT_MAX_ITERATIONS: usize = 200;
    pub const DEFAULT_TOLERANCE: f64 = 1e-10;
    pub const DEFAULT_MAX_RELATIVE_RSS: f64 = 1e-2;

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(FitError::validation("max_iterations must be >= 1"));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(FitError::validation(format!(
                "tolerance must be finite and > 0, got {}",
                self.tolerance
            )));
        }
        if self.max_relative_rss.is_nan() || self.max_relative_rss <= 0.0 {
            return Err(FitError::validation(format!(
                "max_relative_rss must be > 0, got {}",
                self.max_relative_rss
            )));
        }
        Ok(())
    }
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
            tolerance: Self::DEFAULT_TOLERANCE,
            max_relative_rss: Self::DEFAULT_MAX_RELATIVE_RSS,
        }
    }
}

/// Why the solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Residual is zero to floating-point precision.
    ResidualFloor,
    /// An accepted step changed the residual by less than the tolerance.
    ResidualChange,
    /// Gradient vanished: the iterate is a stationary point.
    Gradient,
    /// No admissible descending step at any damping, away from a stationary point.
    Stalled,
    /// Iteration cap reached before convergence.
    MaxIterations,
    /// The model produced NaN/∞ at the starting point.
    NonFinite,
    /// The solver stopped but the residual is above `FitOptions::max_relative_rss`.
    ResidualAboveThreshold,
    /// A peak collapsed below the sample spacing or left the data range.
    DegeneratePeak,
}

impl Termination {
    pub fn is_converged(self) -> bool {
        matches!(
            self,
            Termination::ResidualFloor | Termination::ResidualChange | Termination::Gradient
        )
    }

    pub fn describe(self) -> &'static str {
        match self {
            Termination::ResidualFloor => "residual at floating-point floor",
            Termination::ResidualChange => "residual change below tolerance",
            Termination::Gradient => "gradient vanished",
            Termination::Stalled => "no admissible descent away from a minimum",
            Termination::MaxIterations => "iteration limit reached",
            Termination::NonFinite => "model not finite at initial guess",
            Termination::ResidualAboveThreshold => "residual above acceptance threshold",
            Termination::DegeneratePeak => "peak collapsed or left the data range",
        }
    }
}

/// Outcome of the last `fit()` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub converged: bool,
    pub termination: Termination,
    /// Residual sum of squares at the returned parameters.
    pub rss: f64,
    /// Jacobian evaluations used.
    pub iterations: usize,
    pub n_points: usize,
    pub n_params: usize,
    /// `rss / (n - p)`; absent when `n <= p`.
    pub reduced_chi_square: Option<f64>,
    /// `1 - rss / Σ(y - ȳ)²`; absent for constant data.
    pub r_squared: Option<f64>,
    pub bic: f64,
    /// Best-effort peak parameters, in peak order.
    pub peaks: Vec<PeakParams>,
    /// One-sigma standard errors, in peak order (converged fits with `n > p` only).
    pub stderr: Option<Vec<PeakParams>>,
    /// Background coefficients, lowest order first.
    pub background: Vec<f64>,
}

/// Lifecycle of a `FitEngine` within one fit cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// No peaks yet.
    Unfit,
    /// Peaks present, no current fit result.
    Ready,
    /// Last fit converged.
    Fitted,
    /// Last fit did not converge (best-effort values available).
    Failed,
}

/// How Savitzky–Golay smoothing treats the `window / 2` samples at each end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EdgeMode {
    /// Evaluate the polynomial fitted to the first/last full window.
    #[default]
    Polyfit,
    /// Reflect the signal about the end sample (`y[-k] = y[k]`).
    Mirror,
    /// Repeat the end sample.
    Nearest,
}

/// Savitzky–Golay settings: odd window length, polynomial order, edge handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Smoothing {
    pub window: usize,
    pub order: usize,
    #[serde(default)]
    pub edges: EdgeMode,
}

/// Resolved settings for one `peakfit demo`/`compare` run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub technique: Technique,
    /// Peaks used to synthesize the spectrum.
    pub truth: Vec<PeakParams>,
    pub x_min: f64,
    pub x_max: f64,
    pub points: usize,
    pub noise_sigma: f64,
    pub seed: u64,
    /// Relative perturbation applied to the true peaks to form the guesses.
    pub jitter: f64,
    pub background: BackgroundKind,
    pub smoothing: Option<Smoothing>,
    pub normalize: bool,
    pub options: FitOptions,
    /// Rows in the largest-residual table (0 disables it).
    pub top_n: usize,
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_params_reject_non_positive_width() {
        assert!(PeakParams::new(5.0, -1.0, 1.0).validate().is_err());
        assert!(PeakParams::new(5.0, 0.0, 1.0).validate().is_err());
        assert!(PeakParams::new(f64::NAN, 1.0, 1.0).validate().is_err());
        assert!(PeakParams::new(5.0, 1.0, 1.0).validate().is_ok());
    }

    #[test]
    fn bounds_reject_guess_outside_ranges() {
        let guess = PeakParams::new(10.0, 2.0, 5.0);
        let bounds = PeakBounds::unbounded().with_width_range(None, Some(1.5));
        assert!(bounds.validate_guess(&guess).is_err());

        let bounds = PeakBounds::unbounded().with_amplitude_range(Some(0.0), Some(4.0));
        assert!(bounds.validate_guess(&guess).is_err());

        let bounds = PeakBounds::unbounded().with_center_tolerance(-1.0);
        assert!(bounds.validate_guess(&guess).is_err());

        let bounds = PeakBounds::unbounded()
            .with_center_tolerance(1.0)
            .with_width_range(Some(0.5), Some(3.0))
            .with_amplitude_range(Some(0.0), Some(10.0));
        assert!(bounds.validate_guess(&guess).is_ok());
    }

    #[test]
    fn only_solver_stops_count_as_converged() {
        assert!(Termination::ResidualChange.is_converged());
        assert!(Termination::Gradient.is_converged());
        assert!(!Termination::Stalled.is_converged());
        assert!(!Termination::MaxIterations.is_converged());
        assert!(!Termination::ResidualAboveThreshold.is_converged());
        assert!(!Termination::DegeneratePeak.is_converged());
    }

    #[test]
    fn meta_values_serialize_untagged() {
        let mut meta = Metadata::new();
        meta.insert("laser_nm".to_string(), 532.0.into());
        meta.insert("sample".to_string(), "C-17".into());
        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(json, r#"{"laser_nm":532.0,"sample":"C-17"}"#);
    }
}
