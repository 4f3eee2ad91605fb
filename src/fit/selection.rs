//! Peak-count selection using BIC with guardrails.
//!
//! Each [`Hypothesis`] is an alternative list of peak seeds for the same
//! dataset. All hypotheses are fitted in parallel and scored with
//!
//! - BIC = n * ln(RSS/n) + k * ln(n)
//!
//! Selection rules:
//! 1. Exclude underdetermined hypotheses: require `n >= k + 5`
//! 2. Among converged fits, choose the minimum BIC
//! 3. If a hypothesis with fewer peaks is within ΔBIC < 2 of the best, pick it

use rayon::prelude::*;

use crate::data::SpectralDataset;
use crate::domain::{BackgroundKind, FitOptions, FitResult, PeakBounds, PeakParams};
use crate::error::{FitError, Result};
use crate::fit::engine::FitEngine;

/// Minimum number of extra observations beyond parameter count.
const MIN_N_BUFFER: usize = 5;

/// BIC difference below which the simpler hypothesis wins.
const SIMPLER_MARGIN: f64 = 2.0;

/// Initial guess (and search limits) for one peak of a hypothesis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakSeed {
    pub guess: PeakParams,
    pub bounds: PeakBounds,
}

impl From<PeakParams> for PeakSeed {
    fn from(guess: PeakParams) -> Self {
        Self {
            guess,
            bounds: PeakBounds::unbounded(),
        }
    }
}

/// One candidate explanation of a spectrum.
#[derive(Debug, Clone)]
pub struct Hypothesis {
    pub label: String,
    pub seeds: Vec<PeakSeed>,
    pub background: BackgroundKind,
}

impl Hypothesis {
    pub fn new(label: impl Into<String>, seeds: impl IntoIterator<Item = PeakSeed>) -> Self {
        Self {
            label: label.into(),
            seeds: seeds.into_iter().collect(),
            background: BackgroundKind::None,
        }
    }

    pub fn with_background(mut self, background: BackgroundKind) -> Self {
        self.background = background;
        self
    }

    /// Free parameters: three per peak plus the background coefficients.
    pub fn param_count(&self) -> usize {
        3 * self.seeds.len() + self.background.coefficient_len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HypothesisFit {
    pub label: String,
    pub n_peaks: usize,
    pub result: FitResult,
}

/// Output of fitting + selection.
#[derive(Debug, Clone)]
pub struct HypothesisSelection {
    pub best: HypothesisFit,
    /// Fits for all attempted hypotheses (after guardrails), in input order.
    pub fits: Vec<HypothesisFit>,
    /// Hypotheses that were skipped and why.
    pub skipped: Vec<(String, String)>,
}

enum Attempt {
    Fitted(HypothesisFit),
    Skipped(String, String),
}

/// Fit every hypothesis against `dataset` and select the best one.
pub fn compare_hypotheses(
    dataset: &SpectralDataset,
    hypotheses: &[Hypothesis],
    options: &FitOptions,
) -> Result<HypothesisSelection> {
    options.validate()?;
    let n = dataset.len();

    let attempts = hypotheses
        .par_iter()
        .map(|h| {
            let k = h.param_count();
            if h.seeds.is_empty() {
                return Ok(Attempt::Skipped(h.label.clone(), "No peaks.".to_string()));
            }
            if n < k + MIN_N_BUFFER {
                return Ok(Attempt::Skipped(
                    h.label.clone(),
                    format!("Underdetermined: n={n} < k+{MIN_N_BUFFER}={}", k + MIN_N_BUFFER),
                ));
            }
            fit_hypothesis(dataset, h, options).map(Attempt::Fitted)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut fits = Vec::new();
    let mut skipped = Vec::new();
    for attempt in attempts {
        match attempt {
            Attempt::Fitted(fit) => fits.push(fit),
            Attempt::Skipped(label, reason) => {
                log::info!("skipping hypothesis '{label}': {reason}");
                skipped.push((label, reason));
            }
        }
    }

    if fits.is_empty() {
        return Err(FitError::state("Insufficient data to fit any hypothesis after guardrails."));
    }
    let best = select_by_bic(&fits).ok_or_else(|| FitError::state("No hypothesis converged."))?;
    log::info!("selected hypothesis '{}' (BIC {:.3})", best.label, best.result.bic);

    Ok(HypothesisSelection { best, fits, skipped })
}

fn fit_hypothesis(dataset: &SpectralDataset, hypothesis: &Hypothesis, options: &FitOptions) -> Result<HypothesisFit> {
    let mut engine = FitEngine::new(dataset)
        .with_options(*options)?
        .with_background(hypothesis.background);
    for seed in &hypothesis.seeds {
        let g = seed.guess;
        engine.add_peak_with_bounds(g.center, g.width, Some(g.amplitude), seed.bounds)?;
    }
    let result = engine.fit()?.clone();
    log::debug!(
        "hypothesis '{}': rss={:.6e} bic={:.3} converged={}",
        hypothesis.label,
        result.rss,
        result.bic,
        result.converged
    );
    Ok(HypothesisFit {
        label: hypothesis.label.clone(),
        n_peaks: hypothesis.seeds.len(),
        result,
    })
}

/// Bayesian information criterion for `n` points, residual `sse` and `k` parameters.
pub fn bic(n: usize, sse: f64, k: usize) -> f64 {
    let n_f = n as f64;
    let sse_per = (sse / n_f).max(1e-12);
    n_f * sse_per.ln() + (k as f64) * n_f.ln()
}

fn select_by_bic(fits: &[HypothesisFit]) -> Option<HypothesisFit> {
    let converged: Vec<&HypothesisFit> = fits.iter().filter(|f| f.result.converged).collect();
    let best_bic = converged
        .iter()
        .map(|f| f.result.bic)
        .min_by(|a, b| a.total_cmp(b))?;

    // Prefer simplicity if within the margin: fewest peaks first, input order on ties.
    let mut by_size = converged;
    by_size.sort_by_key(|f| f.n_peaks);
    by_size
        .into_iter()
        .find(|f| f.result.bic < best_bic + SIMPLER_MARGIN)
        .cloned()
}
