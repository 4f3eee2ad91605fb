//! Synthetic spectra built from known Lorentzians.
//!
//! Used by the `peakfit demo`/`compare` commands and by tests that need data
//! with a known answer. Generation is fully determined by the seed.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::{Normal, Uniform};

use crate::data::SpectralDataset;
use crate::domain::{AxisLabels, PeakParams};
use crate::error::{FitError, Result};
use crate::models::{PeakModel, polynomial};

/// Recipe for a synthetic spectrum.
#[derive(Debug, Clone)]
pub struct SyntheticSpectrum {
    pub peaks: Vec<PeakParams>,
    pub x_min: f64,
    pub x_max: f64,
    pub points: usize,
    /// Standard deviation of additive Gaussian noise (0 disables noise).
    pub noise_sigma: f64,
    /// Polynomial baseline coefficients, lowest order first.
    pub background: Vec<f64>,
    pub seed: u64,
    pub labels: AxisLabels,
}

impl SyntheticSpectrum {
    /// Noise-free spectrum of the given peaks on an evenly spaced grid.
    pub fn clean(peaks: Vec<PeakParams>, x_min: f64, x_max: f64, points: usize) -> Self {
        Self {
            peaks,
            x_min,
            x_max,
            points,
            noise_sigma: 0.0,
            background: Vec::new(),
            seed: 0,
            labels: AxisLabels::default(),
        }
    }

    pub fn with_noise(mut self, sigma: f64, seed: u64) -> Self {
        self.noise_sigma = sigma;
        self.seed = seed;
        self
    }

    pub fn with_background(mut self, coefficients: Vec<f64>) -> Self {
        self.background = coefficients;
        self
    }

    pub fn with_labels(mut self, labels: AxisLabels) -> Self {
        self.labels = labels;
        self
    }
}

/// Evenly spaced grid with both endpoints included.
pub fn linear_grid(min: f64, max: f64, points: usize) -> Result<Vec<f64>> {
    if !(min.is_finite() && max.is_finite() && max > min) {
        return Err(FitError::validation(format!(
            "invalid grid range: min={min}, max={max} (must be finite and max>min)"
        )));
    }
    if points < 2 {
        return Err(FitError::validation("grid needs at least 2 points"));
    }
    let step = (max - min) / (points as f64 - 1.0);
    Ok((0..points).map(|i| min + step * i as f64).collect())
}

/// Generate the dataset described by `spec`.
pub fn generate_spectrum(spec: &SyntheticSpectrum) -> Result<SpectralDataset> {
    if spec.peaks.is_empty() {
        return Err(FitError::validation("synthetic spectrum needs at least one peak"));
    }
    if !(spec.noise_sigma.is_finite() && spec.noise_sigma >= 0.0) {
        return Err(FitError::validation(format!(
            "noise sigma must be finite and >= 0, got {}",
            spec.noise_sigma
        )));
    }

    let models = spec
        .peaks
        .iter()
        .map(|p| PeakModel::new(p.center, p.width, p.amplitude))
        .collect::<Result<Vec<_>>>()?;

    let x = linear_grid(spec.x_min, spec.x_max, spec.points)?;
    let mut y: Vec<f64> = x
        .iter()
        .map(|&xi| models.iter().map(|m| m.evaluate(xi)).sum::<f64>() + polynomial(&spec.background, xi))
        .collect();

    if spec.noise_sigma > 0.0 {
        let mut rng = StdRng::seed_from_u64(spec.seed);
        let normal = Normal::new(0.0, spec.noise_sigma)
            .map_err(|e| FitError::validation(format!("noise distribution error: {e}")))?;
        for v in &mut y {
            *v += normal.sample(&mut rng);
        }
    }

    Ok(SpectralDataset::new(x, y)?
        .with_labels(spec.labels.clone())
        .with_meta("synthetic", true)
        .with_meta("seed", spec.seed as f64)
        .with_meta("noise_sigma", spec.noise_sigma))
}

/// Perturb peaks by a bounded relative factor.
///
/// Widths and amplitudes move by up to `±fraction` of themselves; centers move
/// by up to `±fraction` of the peak width.
pub fn perturb_peaks(peaks: &[PeakParams], fraction: f64, seed: u64) -> Result<Vec<PeakParams>> {
    if !(fraction.is_finite() && (0.0..1.0).contains(&fraction)) {
        return Err(FitError::validation(format!("perturbation must be in [0, 1), got {fraction}")));
    }
    if fraction == 0.0 {
        return Ok(peaks.to_vec());
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let unit = Uniform::new_inclusive(-fraction, fraction);
    Ok(peaks
        .iter()
        .map(|p| PeakParams {
            center: p.center + unit.sample(&mut rng) * p.width,
            width: p.width * (1.0 + unit.sample(&mut rng)),
            amplitude: p.amplitude * (1.0 + unit.sample(&mut rng)),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_spectrum_is_exact_sum_of_peaks() {
        let truth = vec![PeakParams::new(10.0, 1.0, 2.0), PeakParams::new(20.0, 2.0, 1.0)];
        let ds = generate_spectrum(&SyntheticSpectrum::clean(truth, 0.0, 30.0, 31)).unwrap();
        assert_eq!(ds.len(), 31);
        // x = 10 sits on the first center; the second peak adds 1 * 4 / (100 + 4).
        let expected = 2.0 + 4.0 / 104.0;
        assert!((ds.y()[10] - expected).abs() < 1e-12);
    }

    #[test]
    fn noise_is_reproducible_for_a_seed() {
        let truth = vec![PeakParams::new(5.0, 1.0, 1.0)];
        let spec = SyntheticSpectrum::clean(truth, 0.0, 10.0, 50).with_noise(0.05, 7);
        let a = generate_spectrum(&spec).unwrap();
        let b = generate_spectrum(&spec).unwrap();
        assert_eq!(a.y(), b.y());
    }

    #[test]
    fn perturbation_stays_within_fraction() {
        let truth = vec![PeakParams::new(100.0, 5.0, 10.0); 20];
        let moved = perturb_peaks(&truth, 0.1, 3).unwrap();
        for p in moved {
            assert!((p.center - 100.0).abs() <= 0.5 + 1e-12);
            assert!((p.width - 5.0).abs() <= 0.5 + 1e-12);
            assert!((p.amplitude - 10.0).abs() <= 1.0 + 1e-12);
        }
    }
}
