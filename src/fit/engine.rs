//! The peak-fitting engine.
//!
//! A [`FitEngine`] borrows one [`SpectralDataset`] and owns an ordered list of
//! [`PeakModel`]s. `fit()` flattens the peaks into
//!
//! ```text
//! [c₁, w₁, A₁, c₂, w₂, A₂, …, b₀, b₁, …]
//! ```
//!
//! (background coefficients last), maps each entry through its bound
//! [`Transform`] and runs Levenberg–Marquardt from the peaks' guesses. Every fit
//! restarts from the guesses, so repeated calls with no intervening change
//! produce identical results.
//!
//! Mutating methods take `&mut self`: an engine has a single writer. Several
//! engines may share one dataset across threads.

use nalgebra::{DMatrix, DVector};

use crate::data::SpectralDataset;
use crate::domain::{BackgroundKind, EngineState, FitOptions, FitResult, PeakBounds, PeakParams, Termination};
use crate::error::{FitError, Result};
use crate::fit::selection::bic;
use crate::math::{LeastSquaresProblem, LmSettings, Transform, minimize};
use crate::models::{Background, PeakId, PeakModel, lorentzian, lorentzian_partials};

/// Parameters per peak in the flattened vector.
const PEAK_PARAMS: usize = 3;

/// `‖Jᵀr‖∞` below this (relative to `max(1, rss)`) counts as a stationary point.
const GRADIENT_TOLERANCE: f64 = 1e-12;

/// Residual floor relative to `max(1, Σy²)`.
const RESIDUAL_FLOOR: f64 = 1e-24;

/// Sum-of-Lorentzians fitter over a borrowed dataset.
#[derive(Debug, Clone)]
pub struct FitEngine<'a> {
    dataset: &'a SpectralDataset,
    peaks: Vec<PeakModel>,
    background: Background,
    options: FitOptions,
    fit_result: Option<FitResult>,
    next_id: u64,
}

impl<'a> FitEngine<'a> {
    pub fn new(dataset: &'a SpectralDataset) -> Self {
        Self {
            dataset,
            peaks: Vec::new(),
            background: Background::none(),
            options: FitOptions::default(),
            fit_result: None,
            next_id: 0,
        }
    }

    pub fn with_options(mut self, options: FitOptions) -> Result<Self> {
        self.set_options(options)?;
        Ok(self)
    }

    pub fn with_background(mut self, kind: BackgroundKind) -> Self {
        self.set_background(kind);
        self
    }

    /// Replace the solver defaults. Clears any previous fit result.
    pub fn set_options(&mut self, options: FitOptions) -> Result<()> {
        options.validate()?;
        self.options = options;
        self.fit_result = None;
        Ok(())
    }

    /// Fit a polynomial baseline alongside the peaks. Clears any previous fit result.
    pub fn set_background(&mut self, kind: BackgroundKind) {
        let (lo, hi) = self.dataset.x_range();
        self.background = Background::new(kind, lo, hi);
        self.fit_result = None;
    }

    pub fn dataset(&self) -> &'a SpectralDataset {
        self.dataset
    }

    pub fn options(&self) -> &FitOptions {
        &self.options
    }

    pub fn background(&self) -> &Background {
        &self.background
    }

    pub fn peaks(&self) -> &[PeakModel] {
        &self.peaks
    }

    pub fn peak(&self, index: usize) -> Result<&PeakModel> {
        self.peaks.get(index).ok_or(FitError::Index {
            index,
            len: self.peaks.len(),
        })
    }

    pub fn peak_by_id(&self, id: PeakId) -> Option<&PeakModel> {
        self.peaks.iter().find(|p| p.id() == id)
    }

    /// Outcome of the last `fit()`, cleared whenever the peak list changes.
    pub fn fit_result(&self) -> Option<&FitResult> {
        self.fit_result.as_ref()
    }

    pub fn state(&self) -> EngineState {
        match &self.fit_result {
            Some(result) if result.converged => EngineState::Fitted,
            Some(_) => EngineState::Failed,
            None if self.peaks.is_empty() => EngineState::Unfit,
            None => EngineState::Ready,
        }
    }

    /// Add an unbounded peak.
    ///
    /// `amplitude` defaults to the measured `y` nearest `center`. Nothing is
    /// modified if validation fails.
    pub fn add_peak(&mut self, center: f64, width: f64, amplitude: Option<f64>) -> Result<&PeakModel> {
        self.add_peak_with_bounds(center, width, amplitude, PeakBounds::unbounded())
    }

    /// Add a peak whose search is confined by `bounds`.
    pub fn add_peak_with_bounds(
        &mut self,
        center: f64,
        width: f64,
        amplitude: Option<f64>,
        bounds: PeakBounds,
    ) -> Result<&PeakModel> {
        if !center.is_finite() {
            return Err(FitError::validation(format!("peak center must be finite, got {center}")));
        }
        let amplitude = amplitude.unwrap_or_else(|| self.dataset.nearest_y(center));
        let mut peak = PeakModel::with_bounds(center, width, amplitude, bounds)?;

        peak.assign_id(PeakId(self.next_id));
        self.next_id += 1;
        self.peaks.push(peak);
        self.fit_result = None;

        let index = self.peaks.len() - 1;
        log::debug!("added peak #{index} at {center} (width={width}, amplitude={amplitude})");
        Ok(&self.peaks[index])
    }

    /// Remove the peak at `index`, returning it. Clears any previous fit result.
    pub fn remove_peak(&mut self, index: usize) -> Result<PeakModel> {
        if index >= self.peaks.len() {
            return Err(FitError::Index {
                index,
                len: self.peaks.len(),
            });
        }
        self.fit_result = None;
        Ok(self.peaks.remove(index))
    }

    /// `Σᵢ Lᵢ(x)` over the current peaks, in peak order.
    pub fn composite(&self, x: f64) -> f64 {
        self.peaks.iter().map(|p| p.evaluate(x)).sum()
    }

    pub fn composite_many(&self, x: &[f64]) -> Vec<f64> {
        x.iter().map(|&xi| self.composite(xi)).collect()
    }

    /// Peaks plus background: the function the solver matches to the data.
    pub fn best_fit(&self, x: f64) -> f64 {
        self.composite(x) + self.background.evaluate(x)
    }

    pub fn best_fit_many(&self, x: &[f64]) -> Vec<f64> {
        x.iter().map(|&xi| self.best_fit(xi)).collect()
    }

    /// `y − best_fit(x)` at every sample of the dataset.
    pub fn residuals(&self) -> Vec<f64> {
        self.dataset
            .x()
            .iter()
            .zip(self.dataset.y())
            .map(|(&x, &y)| y - self.best_fit(x))
            .collect()
    }

    /// Index pairs of peaks whose centers are closer than half the narrower width.
    pub fn coincident_peaks(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for i in 0..self.peaks.len() {
            for j in (i + 1)..self.peaks.len() {
                let (a, b) = (&self.peaks[i], &self.peaks[j]);
                if (a.center() - b.center()).abs() < 0.5 * a.width().min(b.width()) {
                    out.push((i, j));
                }
            }
        }
        out
    }

    /// Fit with the engine's configured iteration cap and tolerance.
    pub fn fit(&mut self) -> Result<&FitResult> {
        let FitOptions {
            max_iterations,
            tolerance,
            ..
        } = self.options;
        self.fit_with(max_iterations, tolerance)
    }

    /// Fit with an explicit iteration cap and tolerance.
    ///
    /// Non-convergence is reported through `FitResult::converged`; errors are
    /// reserved for an empty peak list and invalid settings.
    pub fn fit_with(&mut self, max_iterations: usize, tolerance: f64) -> Result<&FitResult> {
        if self.peaks.is_empty() {
            return Err(FitError::state("fit() requires at least one peak"));
        }
        let options = FitOptions {
            max_iterations,
            tolerance,
            ..self.options
        };
        options.validate()?;

        let transforms = build_transforms(&self.peaks, self.background.len());
        let start = DVector::from_iterator(
            transforms.len(),
            self.peaks
                .iter()
                .flat_map(|p| {
                    let g = p.guess();
                    [g.center, g.width, g.amplitude]
                })
                .chain(std::iter::repeat(0.0).take(self.background.len()))
                .zip(transforms.iter())
                .map(|(v, t)| t.to_internal(v)),
        );

        let n = self.dataset.len();
        let k = transforms.len();
        if n <= k {
            log::warn!("underdetermined fit: {n} points for {k} parameters");
        }

        let problem = PeakProblem {
            x: self.dataset.x(),
            y: self.dataset.y(),
            transforms: &transforms,
            n_peaks: self.peaks.len(),
            background: &self.background,
        };
        let y_norm2: f64 = self.dataset.y().iter().map(|v| v * v).sum();
        let settings = LmSettings {
            max_iterations,
            tolerance,
            gradient_tolerance: GRADIENT_TOLERANCE,
            residual_floor: RESIDUAL_FLOOR * y_norm2.max(1.0),
        };
        let outcome = minimize(&problem, start, &settings);
        let (params, coefficients) = problem.decode(&outcome.params);

        let tss = self.dataset.total_sum_of_squares();
        let rss = outcome.rss;
        let mut termination = outcome.termination;
        if termination.is_converged() {
            if let Some(i) = degenerate_peak(self.dataset, &self.peaks, &params) {
                log::warn!(
                    "peak {i} degenerated: center={:.6e} width={:.3e}",
                    params[i].center,
                    params[i].width
                );
                termination = Termination::DegeneratePeak;
            } else if tss > 0.0 && rss / tss > options.max_relative_rss {
                termination = Termination::ResidualAboveThreshold;
            }
        }
        let converged = termination.is_converged();

        let stderr = if converged && n > k {
            standard_errors(self.dataset, &params, &self.background, &coefficients, rss)
        } else {
            None
        };

        for (i, peak) in self.peaks.iter_mut().enumerate() {
            let err = stderr.as_ref().map(|s| s.0[i]);
            peak.apply_fit(params[i], err, converged);
        }
        self.background.coefficients = coefficients.clone();

        let result = FitResult {
            converged,
            termination,
            rss,
            iterations: outcome.iterations,
            n_points: n,
            n_params: k,
            reduced_chi_square: (n > k).then(|| rss / (n - k) as f64),
            r_squared: (tss > 0.0 && rss.is_finite()).then(|| 1.0 - rss / tss),
            bic: bic(n, rss, k),
            peaks: params,
            stderr: stderr.map(|s| s.0),
            background: coefficients,
        };

        if converged {
            log::info!(
                "fit converged after {} iterations ({}): rss={:.6e}",
                result.iterations,
                termination.describe(),
                rss
            );
        } else {
            log::warn!(
                "fit did not converge after {} iterations ({}): rss={:.6e}",
                result.iterations,
                termination.describe(),
                rss
            );
        }

        Ok(&*self.fit_result.insert(result))
    }

    /// Human-readable summary of the last fit.
    pub fn report(&self) -> Result<String> {
        crate::report::format_fit_report(self)
    }

    /// Use the current (fitted or best-effort) values as the guesses for the
    /// next fit. Returns the engine to `Ready`.
    pub fn promote_fit(&mut self) -> Result<()> {
        if self.fit_result.is_none() {
            return Err(FitError::state("promote_fit() requires a previous fit"));
        }
        for peak in &mut self.peaks {
            peak.promote();
        }
        self.fit_result = None;
        Ok(())
    }
}

fn build_transforms(peaks: &[PeakModel], background_len: usize) -> Vec<Transform> {
    let mut out = Vec::with_capacity(peaks.len() * PEAK_PARAMS + background_len);
    for peak in peaks {
        let b = peak.bounds();
        let c = peak.guess().center;
        out.push(match b.center_tolerance {
            Some(tol) => Transform::Interval {
                lo: c - tol,
                hi: c + tol,
            },
            None => Transform::Free,
        });
        out.push(Transform::strictly_above(b.width_min.unwrap_or(0.0), b.width_max));
        out.push(Transform::closed(b.amplitude_min, b.amplitude_max));
    }
    out.extend(std::iter::repeat(Transform::Free).take(background_len));
    out
}

/// Residuals of the composite model in transformed coordinates.
struct PeakProblem<'p> {
    x: &'p [f64],
    y: &'p [f64],
    transforms: &'p [Transform],
    n_peaks: usize,
    background: &'p Background,
}

impl PeakProblem<'_> {
    fn decode(&self, u: &DVector<f64>) -> (Vec<PeakParams>, Vec<f64>) {
        let external: Vec<f64> = self
            .transforms
            .iter()
            .zip(u.iter())
            .map(|(t, &v)| t.to_external(v))
            .collect();
        let peaks = external[..self.n_peaks * PEAK_PARAMS]
            .chunks_exact(PEAK_PARAMS)
            .map(|c| PeakParams::new(c[0], c[1], c[2]))
            .collect();
        let coefficients = external[self.n_peaks * PEAK_PARAMS..].to_vec();
        (peaks, coefficients)
    }
}

impl LeastSquaresProblem for PeakProblem<'_> {
    fn params_len(&self) -> usize {
        self.transforms.len()
    }

    fn residuals_len(&self) -> usize {
        self.x.len()
    }

    fn residuals(&self, u: &DVector<f64>, out: &mut DVector<f64>) -> bool {
        let (peaks, coefficients) = self.decode(u);
        if peaks.iter().any(|p| p.validate().is_err()) {
            return false;
        }
        for (i, (&x, &y)) in self.x.iter().zip(self.y).enumerate() {
            let model: f64 = peaks.iter().map(|p| lorentzian(p, x)).sum::<f64>()
                + self.background.evaluate_with(&coefficients, x);
            out[i] = model - y;
        }
        out.iter().all(|v| v.is_finite())
    }

    fn jacobian(&self, u: &DVector<f64>, out: &mut DMatrix<f64>) {
        let (peaks, _) = self.decode(u);
        let chain: Vec<f64> = self
            .transforms
            .iter()
            .zip(u.iter())
            .map(|(t, &v)| t.derivative(v))
            .collect();
        let offset = self.n_peaks * PEAK_PARAMS;
        let mut bg = vec![0.0; self.background.len()];

        for (i, &x) in self.x.iter().enumerate() {
            for (k, p) in peaks.iter().enumerate() {
                let partials = lorentzian_partials(p, x);
                for (j, d) in partials.iter().enumerate() {
                    let col = k * PEAK_PARAMS + j;
                    out[(i, col)] = d * chain[col];
                }
            }
            self.background.fill_partials(x, &mut bg);
            for (j, d) in bg.iter().enumerate() {
                out[(i, offset + j)] = d * chain[offset + j];
            }
        }
    }
}

/// Index of the first fitted peak narrower than the sample spacing, or
/// outside the data range when its center is unbounded.
fn degenerate_peak(dataset: &SpectralDataset, peaks: &[PeakModel], params: &[PeakParams]) -> Option<usize> {
    let (x_min, x_max) = dataset.x_range();
    let spacing = dataset.min_spacing();
    peaks.iter().zip(params).position(|(peak, p)| {
        let collapsed = spacing.is_some_and(|dx| p.width < dx);
        let escaped = peak.bounds().center_tolerance.is_none() && !(x_min..=x_max).contains(&p.center);
        collapsed || escaped
    })
}

/// Per-peak standard errors (plus background errors) from `σ² (JᵀJ)⁻¹`.
struct StdErrors(Vec<PeakParams>);

fn standard_errors(
    dataset: &SpectralDataset,
    peaks: &[PeakParams],
    background: &Background,
    coefficients: &[f64],
    rss: f64,
) -> Option<StdErrors> {
    let n = dataset.len();
    let k = peaks.len() * PEAK_PARAMS + coefficients.len();
    if n <= k {
        return None;
    }

    let mut jac = DMatrix::<f64>::zeros(n, k);
    let mut bg = vec![0.0; coefficients.len()];
    for (i, &x) in dataset.x().iter().enumerate() {
        for (p_idx, p) in peaks.iter().enumerate() {
            for (j, d) in lorentzian_partials(p, x).iter().enumerate() {
                jac[(i, p_idx * PEAK_PARAMS + j)] = *d;
            }
        }
        background.fill_partials(x, &mut bg);
        for (j, d) in bg.iter().enumerate() {
            jac[(i, peaks.len() * PEAK_PARAMS + j)] = *d;
        }
    }

    let sigma2 = rss / (n - k) as f64;
    let cov = jac.tr_mul(&jac).try_inverse()? * sigma2;
    let err = |idx: usize| {
        let v = cov[(idx, idx)];
        (v.is_finite() && v >= 0.0).then(|| v.sqrt())
    };

    let mut out = Vec::with_capacity(peaks.len());
    for p_idx in 0..peaks.len() {
        let base = p_idx * PEAK_PARAMS;
        out.push(PeakParams::new(err(base)?, err(base + 1)?, err(base + 2)?));
    }
    Some(StdErrors(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SyntheticSpectrum, generate_spectrum, perturb_peaks};

    fn two_peak_truth() -> Vec<PeakParams> {
        vec![PeakParams::new(1350.0, 40.0, 0.8), PeakParams::new(1580.0, 25.0, 1.0)]
    }

    fn two_peak_dataset() -> SpectralDataset {
        generate_spectrum(&SyntheticSpectrum::clean(two_peak_truth(), 1000.0, 1900.0, 451)).unwrap()
    }

    fn assert_recovers(engine: &FitEngine<'_>, truth: &[PeakParams], tol: f64) {
        for (peak, t) in engine.peaks().iter().zip(truth) {
            assert!((peak.center() - t.center).abs() < tol, "center {} vs {}", peak.center(), t.center);
            assert!((peak.width() - t.width).abs() < tol, "width {} vs {}", peak.width(), t.width);
            assert!(
                (peak.amplitude() - t.amplitude).abs() < tol,
                "amplitude {} vs {}",
                peak.amplitude(),
                t.amplitude
            );
        }
    }

    #[test]
    fn composite_is_sum_of_peaks() {
        let ds = two_peak_dataset();
        let mut engine = FitEngine::new(&ds);
        engine.add_peak(1350.0, 40.0, Some(0.8)).unwrap();
        engine.add_peak(1580.0, 25.0, Some(1.0)).unwrap();
        engine.add_peak(1200.0, 5.0, Some(-0.3)).unwrap();

        for &x in &[1000.0, 1201.0, 1349.5, 1580.0, 1777.7] {
            let sum: f64 = engine.peaks().iter().map(|p| p.evaluate(x)).sum();
            assert_eq!(engine.composite(x), sum);
        }
        assert_eq!(engine.composite_many(ds.x()), engine.best_fit_many(ds.x()));
    }

    #[test]
    fn exact_guesses_converge_with_zero_residual() {
        let ds = two_peak_dataset();
        let mut engine = FitEngine::new(&ds);
        for t in two_peak_truth() {
            engine.add_peak(t.center, t.width, Some(t.amplitude)).unwrap();
        }

        let result = engine.fit().unwrap().clone();
        assert!(result.converged);
        assert!(result.rss < 1e-20, "rss={}", result.rss);
        assert_recovers(&engine, &two_peak_truth(), 1e-8);
        assert!(engine.peaks().iter().all(|p| p.is_fitted()));
        assert_eq!(engine.state(), EngineState::Fitted);
    }

    #[test]
    fn perturbed_guesses_recover_truth_or_report_failure() {
        let ds = two_peak_dataset();
        for seed in 0..5 {
            let guesses = perturb_peaks(&two_peak_truth(), 0.1, seed).unwrap();
            let mut engine = FitEngine::new(&ds)
                .with_options(FitOptions {
                    max_relative_rss: 1e-6,
                    ..FitOptions::default()
                })
                .unwrap();
            for g in &guesses {
                engine.add_peak(g.center, g.width, Some(g.amplitude)).unwrap();
            }

            let result = engine.fit().unwrap().clone();
            if result.converged {
                assert!(result.rss < 1e-6 * ds.total_sum_of_squares());
                assert_recovers(&engine, &two_peak_truth(), 1e-3);
            } else {
                assert!(engine.peaks().iter().all(|p| !p.is_fitted()));
            }
        }
    }

    #[test]
    fn default_options_converged_means_recovered() {
        let ds = two_peak_dataset();
        let mut converged = 0;
        for seed in 100..120 {
            let guesses = perturb_peaks(&two_peak_truth(), 0.1, seed).unwrap();
            let mut engine = FitEngine::new(&ds);
            for g in &guesses {
                engine.add_peak(g.center, g.width, Some(g.amplitude)).unwrap();
            }
            let result = engine.fit().unwrap().clone();
            if result.converged {
                converged += 1;
                assert!(result.rss <= FitOptions::DEFAULT_MAX_RELATIVE_RSS * ds.total_sum_of_squares());
                assert_recovers(&engine, &two_peak_truth(), 1e-3);
            }
        }
        assert!(converged >= 15, "only {converged} of 20 fits converged");
    }

    #[test]
    fn misplaced_guess_is_not_reported_as_converged_fit() {
        let ds = two_peak_dataset();
        let mut engine = FitEngine::new(&ds);
        engine.add_peak(1350.0, 40.0, Some(0.8)).unwrap();
        engine.add_peak(1800.0, 25.0, Some(1.0)).unwrap();

        let result = engine.fit().unwrap().clone();
        let relative_rss = result.rss / ds.total_sum_of_squares();
        if result.converged {
            assert!(relative_rss <= FitOptions::DEFAULT_MAX_RELATIVE_RSS, "rss/tss={relative_rss}");
            assert_recovers(&engine, &two_peak_truth(), 1e-3);
        } else {
            assert_eq!(engine.state(), EngineState::Failed);
            assert!(result.stderr.is_none());
            assert!(engine.report().unwrap().contains("NOT converged"));
        }
    }

    #[test]
    fn collapsed_or_escaped_peaks_are_degenerate() {
        let ds = two_peak_dataset();
        let mut engine = FitEngine::new(&ds);
        engine.add_peak(1350.0, 40.0, Some(0.8)).unwrap();
        engine
            .add_peak_with_bounds(1580.0, 25.0, Some(1.0), PeakBounds::unbounded().with_center_tolerance(5.0))
            .unwrap();
        let peaks = engine.peaks();

        let good = [PeakParams::new(1350.0, 40.0, 0.8), PeakParams::new(1580.0, 25.0, 1.0)];
        assert_eq!(degenerate_peak(&ds, peaks, &good), None);

        let spike = [PeakParams::new(1350.0, 4.6e-279, 133.7), good[1]];
        assert_eq!(degenerate_peak(&ds, peaks, &spike), Some(0));

        let escaped = [PeakParams::new(2406.5, 40.0, 0.8), good[1]];
        assert_eq!(degenerate_peak(&ds, peaks, &escaped), Some(0));

        // A bounded center is confined by its transform, so the range check skips it.
        let bounded_outside = [good[0], PeakParams::new(1950.0, 25.0, 1.0)];
        assert_eq!(degenerate_peak(&ds, peaks, &bounded_outside), None);

        let narrow = [good[0], PeakParams::new(1580.0, 1.5, 1.0)];
        assert_eq!(degenerate_peak(&ds, peaks, &narrow), Some(1));
    }

    #[test]
    fn perturbed_guesses_converge_on_well_separated_peaks() {
        let ds = two_peak_dataset();
        let guesses = perturb_peaks(&two_peak_truth(), 0.1, 11).unwrap();
        let mut engine = FitEngine::new(&ds);
        for g in &guesses {
            engine.add_peak(g.center, g.width, Some(g.amplitude)).unwrap();
        }
        let result = engine.fit().unwrap();
        assert!(result.converged, "{:?}", result.termination);
        assert_recovers(&engine, &two_peak_truth(), 1e-5);
    }

    #[test]
    fn widths_stay_positive_from_tiny_guesses() {
        let ds = two_peak_dataset();
        let mut engine = FitEngine::new(&ds);
        engine.add_peak(1350.0, 1e-3, Some(0.8)).unwrap();
        engine.add_peak(1580.0, 1e-3, Some(1.0)).unwrap();
        let result = engine.fit_with(50, 1e-10).unwrap().clone();
        for p in &result.peaks {
            assert!(p.width > 0.0);
        }
        for p in engine.peaks() {
            assert!(p.width() > 0.0);
        }
    }

    #[test]
    fn fit_without_peaks_is_a_state_error() {
        let ds = two_peak_dataset();
        let mut engine = FitEngine::new(&ds);
        assert!(matches!(engine.fit(), Err(FitError::State(_))));
        assert!(matches!(engine.report(), Err(FitError::State(_))));
        assert_eq!(engine.state(), EngineState::Unfit);
    }

    #[test]
    fn report_requires_a_fit_attempt() {
        let ds = two_peak_dataset();
        let mut engine = FitEngine::new(&ds);
        engine.add_peak(1350.0, 40.0, None).unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
        assert!(matches!(engine.report(), Err(FitError::State(_))));
    }

    #[test]
    fn repeated_fit_is_identical() {
        let ds = two_peak_dataset();
        let guesses = perturb_peaks(&two_peak_truth(), 0.1, 4).unwrap();
        let mut engine = FitEngine::new(&ds);
        for g in &guesses {
            engine.add_peak(g.center, g.width, Some(g.amplitude)).unwrap();
        }
        let first = engine.fit().unwrap().clone();
        let second = engine.fit().unwrap().clone();
        assert_eq!(first, second);
    }

    #[test]
    fn add_and_remove_reset_state() {
        let ds = two_peak_dataset();
        let mut engine = FitEngine::new(&ds);
        for t in two_peak_truth() {
            engine.add_peak(t.center, t.width, Some(t.amplitude)).unwrap();
        }
        engine.fit().unwrap();
        assert_eq!(engine.state(), EngineState::Fitted);

        engine.add_peak(1700.0, 10.0, Some(0.0)).unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
        assert!(engine.fit_result().is_none());

        engine.fit().unwrap();
        let removed = engine.remove_peak(2).unwrap();
        assert_eq!(removed.id(), PeakId(2));
        assert_eq!(engine.state(), EngineState::Ready);

        let err = engine.remove_peak(5).unwrap_err();
        assert_eq!(err, FitError::Index { index: 5, len: 2 });

        engine.remove_peak(0).unwrap();
        engine.remove_peak(0).unwrap();
        assert_eq!(engine.state(), EngineState::Unfit);
    }

    #[test]
    fn invalid_peak_leaves_engine_untouched() {
        let ds = two_peak_dataset();
        let mut engine = FitEngine::new(&ds);
        engine.add_peak(1350.0, 40.0, None).unwrap();
        engine.fit().unwrap();
        let before = engine.fit_result().cloned();

        assert!(engine.add_peak(1580.0, -1.0, None).is_err());
        assert!(engine.add_peak(f64::NAN, 1.0, None).is_err());
        assert_eq!(engine.peaks().len(), 1);
        assert_eq!(engine.fit_result().cloned(), before);
    }

    #[test]
    fn default_amplitude_is_nearest_sample() {
        let ds = two_peak_dataset();
        let mut engine = FitEngine::new(&ds);
        let peak = engine.add_peak(1580.4, 25.0, None).unwrap();
        assert_eq!(peak.amplitude(), ds.nearest_y(1580.4));
    }

    #[test]
    fn iteration_cap_reports_non_convergence() {
        let ds = two_peak_dataset();
        let mut engine = FitEngine::new(&ds);
        engine.add_peak(1300.0, 80.0, Some(0.3)).unwrap();
        engine.add_peak(1620.0, 60.0, Some(0.4)).unwrap();

        let result = engine.fit_with(1, 1e-10).unwrap().clone();
        assert!(!result.converged);
        assert_eq!(result.termination, Termination::MaxIterations);
        assert_eq!(result.iterations, 1);
        assert_eq!(engine.state(), EngineState::Failed);
        assert!(engine.peaks().iter().all(|p| !p.is_fitted()));
        let report = engine.report().unwrap();
        assert!(report.contains("NOT converged"));
    }

    #[test]
    fn center_tolerance_confines_search() {
        let ds = two_peak_dataset();
        let mut engine = FitEngine::new(&ds);
        let bounds = PeakBounds::unbounded().with_center_tolerance(5.0);
        engine.add_peak_with_bounds(1340.0, 40.0, Some(0.8), bounds).unwrap();
        engine.add_peak(1580.0, 25.0, Some(1.0)).unwrap();

        engine.fit().unwrap();
        let c = engine.peaks()[0].center();
        assert!((1335.0..=1345.0).contains(&c), "center escaped bounds: {c}");
    }

    #[test]
    fn fits_linear_background() {
        let truth = two_peak_truth();
        let spec = SyntheticSpectrum::clean(truth.clone(), 1000.0, 1900.0, 451).with_background(vec![0.1, 1e-4]);
        let ds = generate_spectrum(&spec).unwrap();

        let mut engine = FitEngine::new(&ds).with_background(BackgroundKind::Linear);
        for t in &truth {
            engine.add_peak(t.center, t.width, Some(t.amplitude)).unwrap();
        }
        let result = engine.fit().unwrap().clone();
        assert!(result.converged, "{:?}", result.termination);
        assert_recovers(&engine, &truth, 1e-5);
        for (&x, &y) in ds.x().iter().zip(ds.y()) {
            assert!((engine.best_fit(x) - y).abs() < 1e-6);
        }
    }

    #[test]
    fn noisy_fit_reports_standard_errors() {
        let truth = two_peak_truth();
        let spec = SyntheticSpectrum::clean(truth.clone(), 1000.0, 1900.0, 451).with_noise(0.01, 42);
        let ds = generate_spectrum(&spec).unwrap();

        let mut engine = FitEngine::new(&ds);
        for t in &truth {
            engine.add_peak(t.center, t.width, Some(t.amplitude)).unwrap();
        }
        let result = engine.fit().unwrap().clone();
        assert!(result.converged);
        let stderr = result.stderr.expect("stderr for converged noisy fit");
        for (s, p) in stderr.iter().zip(engine.peaks()) {
            assert!(s.center > 0.0 && s.width > 0.0 && s.amplitude > 0.0);
            assert_eq!(p.stderr(), Some(s));
        }
        assert_recovers(&engine, &truth, 2.0);
        assert!(result.r_squared.unwrap() > 0.99);
    }

    #[test]
    fn promote_fit_restarts_from_fitted_values() {
        let ds = two_peak_dataset();
        let guesses = perturb_peaks(&two_peak_truth(), 0.1, 8).unwrap();
        let mut engine = FitEngine::new(&ds);
        for g in &guesses {
            engine.add_peak(g.center, g.width, Some(g.amplitude)).unwrap();
        }
        assert!(engine.promote_fit().is_err());

        engine.fit().unwrap();
        engine.promote_fit().unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
        let refit = engine.fit().unwrap();
        assert!(refit.converged);
        assert!(refit.iterations <= 3, "refit took {} iterations", refit.iterations);
    }

    #[test]
    fn coincident_peaks_are_flagged() {
        let ds = two_peak_dataset();
        let mut engine = FitEngine::new(&ds);
        engine.add_peak(1580.0, 25.0, Some(0.5)).unwrap();
        engine.add_peak(1582.0, 20.0, Some(0.5)).unwrap();
        engine.add_peak(1350.0, 40.0, Some(0.8)).unwrap();
        assert_eq!(engine.coincident_peaks(), vec![(0, 1)]);
    }
}
