//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - synthesizes a spectrum for the chosen technique
//! - preprocesses it and runs the fit (or the hypothesis comparison)
//! - prints the text report or JSON

use clap::Parser;
use serde::Serialize;

use crate::adapters::TechniqueProfile;
use crate::cli::{Command, SpectrumArgs};
use crate::data::{SpectralDataset, SyntheticSpectrum, generate_spectrum, perturb_peaks};
use crate::domain::{AxisLabels, FitOptions, FitResult, PeakParams, RunConfig, Smoothing, Technique};
use crate::error::AppError;
use crate::fit::{FitEngine, Hypothesis, HypothesisFit, PeakSeed, compare_hypotheses};
use crate::report::{compute_residuals, format_comparison, format_residual_table, largest_residuals};

/// Entry point for the `peakfit` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::Demo(args) => handle_demo(&run_config_from_args(&args)),
        Command::Compare(args) => handle_compare(&run_config_from_args(&args)),
    }
}

/// Resolve CLI arguments against the technique defaults.
pub fn run_config_from_args(args: &SpectrumArgs) -> RunConfig {
    let (x_min, x_max) = default_range(args.technique);
    RunConfig {
        technique: args.technique,
        truth: if args.peaks.is_empty() {
            default_peaks(args.technique)
        } else {
            args.peaks.clone()
        },
        x_min: args.x_min.unwrap_or(x_min),
        x_max: args.x_max.unwrap_or(x_max),
        points: args.points,
        noise_sigma: args.noise,
        seed: args.seed,
        jitter: args.jitter,
        background: args.background,
        smoothing: args.smooth.map(|s| Smoothing {
            edges: args.smooth_edges,
            ..s
        }),
        normalize: args.normalize,
        options: FitOptions {
            max_iterations: args.max_iterations,
            tolerance: args.tolerance,
            max_relative_rss: args.max_relative_rss,
        },
        top_n: args.top,
        json: args.json,
    }
}

fn default_range(technique: Technique) -> (f64, f64) {
    match technique {
        Technique::Raman => (1000.0, 1900.0),
        Technique::Xrd => (20.0, 60.0),
    }
}

/// Two well-separated bands typical for the technique.
fn default_peaks(technique: Technique) -> Vec<PeakParams> {
    match technique {
        Technique::Raman => vec![PeakParams::new(1350.0, 40.0, 0.8), PeakParams::new(1580.0, 25.0, 1.0)],
        Technique::Xrd => vec![PeakParams::new(28.4, 0.3, 1.0), PeakParams::new(47.3, 0.4, 0.6)],
    }
}

/// Synthesize, label and preprocess the dataset described by `config`.
pub fn build_dataset(config: &RunConfig, profile: &TechniqueProfile) -> Result<SpectralDataset, AppError> {
    let spec = SyntheticSpectrum::clean(config.truth.clone(), config.x_min, config.x_max, config.points)
        .with_noise(config.noise_sigma, config.seed);
    let raw = generate_spectrum(&spec)?;
    let mut ds = profile.dataset(raw.x().to_vec(), raw.y().to_vec(), raw.metadata().clone())?;

    if let Some(s) = config.smoothing {
        log::info!(
            "smoothing with Savitzky-Golay window={} order={} edges={:?}",
            s.window,
            s.order,
            s.edges
        );
        ds = ds.smoothed_with(s.window, s.order, s.edges)?;
    }
    if config.normalize {
        ds = ds.normalized()?;
    }
    Ok(ds)
}

/// Initial guesses: the true peaks, perturbed by `jitter`, sorted by center.
fn initial_guesses(config: &RunConfig) -> Result<Vec<PeakParams>, AppError> {
    let mut guesses = perturb_peaks(&config.truth, config.jitter, config.seed.wrapping_add(1))?;
    guesses.sort_by(|a, b| a.center.total_cmp(&b.center));
    Ok(guesses)
}

#[derive(Debug, Serialize)]
struct DemoOutput<'a> {
    technique: Technique,
    labels: &'a AxisLabels,
    truth: &'a [PeakParams],
    guesses: &'a [PeakParams],
    fit: &'a FitResult,
}

fn handle_demo(config: &RunConfig) -> Result<(), AppError> {
    let profile = config.technique.profile();
    let ds = build_dataset(config, &profile)?;
    let guesses = initial_guesses(config)?;

    let mut engine = FitEngine::new(&ds)
        .with_options(config.options)?
        .with_background(config.background);
    for g in &guesses {
        profile.add_peak(&mut engine, g.center, Some(g.width), None)?;
    }
    let fit = engine.fit()?.clone();

    if config.json {
        let out = DemoOutput {
            technique: config.technique,
            labels: ds.labels(),
            truth: &config.truth,
            guesses: &guesses,
            fit: &fit,
        };
        println!("{}", to_json(&out)?);
        return Ok(());
    }

    println!("{}", engine.report()?);
    if config.top_n > 0 {
        let rows = largest_residuals(&compute_residuals(&engine), config.top_n);
        println!("Largest residuals:");
        println!("{}", format_residual_table(&rows, &ds.labels().x_label));
    }
    Ok(())
}

/// Hypotheses with 1..=n of the guessed peaks (strongest first), plus one
/// with an extra peak at the strongest unexplained sample.
pub fn build_hypotheses(
    ds: &SpectralDataset,
    profile: &TechniqueProfile,
    guesses: &[PeakParams],
    config: &RunConfig,
) -> Vec<Hypothesis> {
    let mut ranked: Vec<PeakSeed> = guesses
        .iter()
        .map(|g| profile.seed(g.center, Some(g.width), Some(profile.clamp_amplitude(ds.nearest_y(g.center)))))
        .collect();
    ranked.sort_by(|a, b| b.guess.amplitude.total_cmp(&a.guess.amplitude));

    let mut out: Vec<Hypothesis> = (1..=ranked.len())
        .map(|k| {
            Hypothesis::new(format!("{k} peak(s)"), ranked[..k].iter().copied()).with_background(config.background)
        })
        .collect();

    if let Some(extra) = strongest_unexplained(ds, &ranked, profile) {
        let mut seeds = ranked.clone();
        seeds.push(extra);
        out.push(Hypothesis::new(format!("{} peak(s)", seeds.len()), seeds).with_background(config.background));
    }
    out
}

/// Seed at the sample with the largest residual against the seeded peaks.
fn strongest_unexplained(ds: &SpectralDataset, seeds: &[PeakSeed], profile: &TechniqueProfile) -> Option<PeakSeed> {
    let mut engine = FitEngine::new(ds);
    for s in seeds {
        engine
            .add_peak(s.guess.center, s.guess.width, Some(s.guess.amplitude))
            .ok()?;
    }
    let (i, residual) = engine
        .residuals()
        .into_iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))?;
    let amplitude = profile.clamp_amplitude(residual);
    Some(profile.seed(ds.x()[i], None, Some(amplitude)))
}

#[derive(Debug, Serialize)]
struct CompareOutput<'a> {
    technique: Technique,
    truth: &'a [PeakParams],
    best: &'a str,
    fits: Vec<CompareEntry<'a>>,
    skipped: &'a [(String, String)],
}

#[derive(Debug, Serialize)]
struct CompareEntry<'a> {
    label: &'a str,
    n_peaks: usize,
    fit: &'a FitResult,
}

impl<'a> From<&'a HypothesisFit> for CompareEntry<'a> {
    fn from(f: &'a HypothesisFit) -> Self {
        Self {
            label: &f.label,
            n_peaks: f.n_peaks,
            fit: &f.result,
        }
    }
}

fn handle_compare(config: &RunConfig) -> Result<(), AppError> {
    let profile = config.technique.profile();
    let ds = build_dataset(config, &profile)?;
    let guesses = initial_guesses(config)?;
    let hypotheses = build_hypotheses(&ds, &profile, &guesses, config);

    let selection = compare_hypotheses(&ds, &hypotheses, &config.options)?;

    if config.json {
        let out = CompareOutput {
            technique: config.technique,
            truth: &config.truth,
            best: &selection.best.label,
            fits: selection.fits.iter().map(CompareEntry::from).collect(),
            skipped: &selection.skipped,
        };
        println!("{}", to_json(&out)?);
        return Ok(());
    }

    println!("{}", format_comparison(&selection));
    Ok(())
}

fn to_json<T: Serialize>(value: &T) -> Result<String, AppError> {
    serde_json::to_string_pretty(value).map_err(|e| AppError::new(1, format!("Failed to encode JSON: {e}")))
}
