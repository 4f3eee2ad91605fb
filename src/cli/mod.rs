//! Command-line parsing for the `peakfit` binary.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! fitting code. Both commands run on seeded synthetic spectra, so a run is
//! fully reproducible from its arguments.

use clap::{Parser, Subcommand};

use crate::domain::{BackgroundKind, EdgeMode, FitOptions, PeakParams, Smoothing, Technique};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "peakfit", version, about = "Lorentzian peak fitting for Raman and XRD spectra")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Synthesize a spectrum, fit it from perturbed guesses, and print the report.
    Demo(SpectrumArgs),
    /// Fit competing peak-count hypotheses in parallel and select one by BIC.
    Compare(SpectrumArgs),
}

/// Spectrum synthesis and fit options shared by all commands.
#[derive(Debug, Parser, Clone)]
pub struct SpectrumArgs {
    /// Technique profile (axis labels and peak limits).
    #[arg(short = 't', long, value_enum, default_value_t = Technique::Raman)]
    pub technique: Technique,

    /// True peak as `center:width:amplitude` (repeatable; technique default if omitted).
    #[arg(short = 'p', long = "peak", value_name = "C:W:A", value_parser = parse_peak)]
    pub peaks: Vec<PeakParams>,

    /// Number of samples.
    #[arg(short = 'n', long, default_value_t = 451)]
    pub points: usize,

    /// Lower end of the x range (technique default if omitted).
    #[arg(long)]
    pub x_min: Option<f64>,

    /// Upper end of the x range (technique default if omitted).
    #[arg(long)]
    pub x_max: Option<f64>,

    /// Standard deviation of additive Gaussian noise.
    #[arg(long, default_value_t = 0.01)]
    pub noise: f64,

    /// Random seed for noise and guess perturbation.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Relative perturbation of the initial guesses (0 starts at the truth).
    #[arg(long, default_value_t = 0.1)]
    pub jitter: f64,

    /// Polynomial baseline fitted alongside the peaks.
    #[arg(long, value_enum, default_value_t = BackgroundKind::None)]
    pub background: BackgroundKind,

    /// Savitzky–Golay smoothing before fitting, as `window:order`.
    #[arg(long, value_name = "WINDOW:ORDER", value_parser = parse_smoothing)]
    pub smooth: Option<Smoothing>,

    /// Edge handling for `--smooth`.
    #[arg(long, value_enum, default_value_t = EdgeMode::Polyfit)]
    pub smooth_edges: EdgeMode,

    /// Min-max normalize intensities to [0, 1] before fitting.
    #[arg(long)]
    pub normalize: bool,

    /// Maximum solver iterations.
    #[arg(long, default_value_t = FitOptions::DEFAULT_MAX_ITERATIONS)]
    pub max_iterations: usize,

    /// Relative residual-change tolerance.
    #[arg(long, default_value_t = FitOptions::DEFAULT_TOLERANCE)]
    pub tolerance: f64,

    /// Largest RSS / total sum of squares accepted as converged.
    #[arg(long, default_value_t = FitOptions::DEFAULT_MAX_RELATIVE_RSS)]
    pub max_relative_rss: f64,

    /// Show the N largest residuals.
    #[arg(long, default_value_t = 5)]
    pub top: usize,

    /// Print machine-readable JSON instead of the text report.
    #[arg(long)]
    pub json: bool,
}

/// Parse `center:width:amplitude`.
pub fn parse_peak(s: &str) -> Result<PeakParams, String> {
    let parts: Vec<&str> = s.split(':').map(str::trim).collect();
    let [c, w, a] = parts.as_slice() else {
        return Err(format!("expected center:width:amplitude, got '{s}'"));
    };
    let num = |v: &str, name: &str| v.parse::<f64>().map_err(|e| format!("invalid {name} '{v}': {e}"));
    let peak = PeakParams::new(num(c, "center")?, num(w, "width")?, num(a, "amplitude")?);
    peak.validate().map_err(|e| e.to_string())?;
    Ok(peak)
}

/// Parse `window:order`.
pub fn parse_smoothing(s: &str) -> Result<Smoothing, String> {
    let Some((window, order)) = s.split_once(':') else {
        return Err(format!("expected window:order, got '{s}'"));
    };
    let window = window
        .trim()
        .parse::<usize>()
        .map_err(|e| format!("invalid window '{window}': {e}"))?;
    let order = order
        .trim()
        .parse::<usize>()
        .map_err(|e| format!("invalid order '{order}': {e}"))?;
    Ok(Smoothing {
        window,
        order,
        edges: EdgeMode::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_peak_triplets() {
        let p = parse_peak("1350:40:0.8").unwrap();
        assert_eq!(p, PeakParams::new(1350.0, 40.0, 0.8));
        assert!(parse_peak("1350:40").is_err());
        assert!(parse_peak("1350:-4:1").is_err());
        assert!(parse_peak("a:1:1").is_err());
    }

    #[test]
    fn parses_smoothing() {
        let s = parse_smoothing("11:3").unwrap();
        assert_eq!((s.window, s.order, s.edges), (11, 3, EdgeMode::Polyfit));
        assert!(parse_smoothing("11").is_err());
    }

    #[test]
    fn demo_defaults() {
        let cli = Cli::try_parse_from(["peakfit", "demo"]).unwrap();
        let Command::Demo(args) = cli.command else {
            panic!("expected demo");
        };
        assert_eq!(args.technique, Technique::Raman);
        assert!(args.peaks.is_empty());
        assert_eq!(args.max_iterations, FitOptions::DEFAULT_MAX_ITERATIONS);
        assert_eq!(args.background, BackgroundKind::None);
    }

    #[test]
    fn compare_accepts_repeated_peaks() {
        let cli = Cli::try_parse_from([
            "peakfit",
            "compare",
            "-t",
            "xrd",
            "-p",
            "28.4:0.3:1",
            "-p",
            "47.3:0.4:0.6",
            "--smooth",
            "7:2",
            "--smooth-edges",
            "mirror",
        ])
        .unwrap();
        let Command::Compare(args) = cli.command else {
            panic!("expected compare");
        };
        assert_eq!(args.technique, Technique::Xrd);
        assert_eq!(args.peaks.len(), 2);
        assert_eq!(args.smooth.map(|s| (s.window, s.order)), Some((7, 2)));
        assert_eq!(args.smooth_edges, EdgeMode::Mirror);
    }
}
