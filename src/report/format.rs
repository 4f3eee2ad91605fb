//! Formatted terminal output.
//!
//! We keep formatting code in one place so the fitting code stays free of
//! presentation details and output changes stay localized.

use crate::error::{FitError, Result};
use crate::fit::{FitEngine, HypothesisSelection};
use crate::models::PeakModel;
use crate::report::ResidualRow;

/// Full fit report: dataset summary, solver diagnostics, per-peak table.
///
/// Fails with `FitError::State` before the first `fit()`.
pub fn format_fit_report(engine: &FitEngine<'_>) -> Result<String> {
    let Some(fit) = engine.fit_result() else {
        return Err(FitError::state("report() requires a fit attempt"));
    };
    let ds = engine.dataset();
    let labels = ds.labels();
    let (x_min, x_max) = ds.x_range();

    let mut out = String::new();
    out.push_str("=== peakfit - Lorentzian fit ===\n");
    out.push_str(&format!(
        "Data: n={} | {}=[{:.4}, {:.4}] | y: {}\n",
        ds.len(),
        labels.x_label,
        x_min,
        x_max,
        labels.y_label
    ));
    for (key, value) in ds.metadata() {
        out.push_str(&format!("  {key}: {value}\n"));
    }
    if let Some(other) = ds.other() {
        out.push_str(&format!("  reference spectrum: n={}\n", other.len()));
    }

    out.push_str("\nFit diagnostics:\n");
    let status = if fit.converged { "converged" } else { "NOT converged" };
    out.push_str(&format!("- status    : {status} ({})\n", fit.termination.describe()));
    out.push_str(&format!("- iterations: {}\n", fit.iterations));
    out.push_str(&format!("- params    : {} (points: {})\n", fit.n_params, fit.n_points));
    out.push_str(&format!("- RSS       : {:.6e}\n", fit.rss));
    if let Some(chi2) = fit.reduced_chi_square {
        out.push_str(&format!("- red. chi2 : {chi2:.6e}\n"));
    }
    if let Some(r2) = fit.r_squared {
        out.push_str(&format!("- R^2       : {r2:.6}\n"));
    }
    out.push_str(&format!("- BIC       : {:.3}\n", fit.bic));
    if !fit.background.is_empty() {
        out.push_str(&format!(
            "- background: {:?} {}\n",
            engine.background().kind,
            fmt_vec(&fit.background)
        ));
    }

    out.push_str("\nPeaks:\n");
    out.push_str(&format_peak_table(engine.peaks()));

    let coincident = engine.coincident_peaks();
    if !coincident.is_empty() {
        out.push('\n');
        for (i, j) in coincident {
            out.push_str(&format!(
                "warning: peaks #{i} and #{j} share a center ({:.4} vs {:.4}); parameters may be ambiguous\n",
                engine.peaks()[i].center(),
                engine.peaks()[j].center()
            ));
        }
    }

    Ok(out)
}

fn format_peak_table(peaks: &[PeakModel]) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:<3} {:<4} {:>22} {:>22} {:>22} {:>12} {:<6}\n",
            "#", "id", "center", "width", "amplitude", "area", "status"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(
        format!("{:-<3} {:-<4} {:-<22} {:-<22} {:-<22} {:-<12} {:-<6}\n", "", "", "", "", "", "", "").trim_end(),
    );
    out.push('\n');

    for (i, p) in peaks.iter().enumerate() {
        let err = p.stderr();
        out.push_str(
            format!(
                "{:<3} {:<4} {:>22} {:>22} {:>22} {:>12.4} {:<6}\n",
                i,
                p.id().0,
                fmt_with_err(p.center(), err.map(|e| e.center)),
                fmt_with_err(p.width(), err.map(|e| e.width)),
                fmt_with_err(p.amplitude(), err.map(|e| e.amplitude)),
                p.area(),
                if p.is_fitted() { "fitted" } else { "unfit" },
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

/// Residual table for the given rows.
pub fn format_residual_table(rows: &[ResidualRow], x_label: &str) -> String {
    let mut out = String::new();
    out.push_str(
        format!("{:>14} {:>14} {:>14} {:>14}\n", truncate(x_label, 14), "y_obs", "y_fit", "residual").trim_end(),
    );
    out.push('\n');
    out.push_str(format!("{:-<14} {:-<14} {:-<14} {:-<14}\n", "", "", "", "").trim_end());
    out.push('\n');
    for r in rows {
        out.push_str(format!("{:>14.4} {:>14.6} {:>14.6} {:>14.6}\n", r.x, r.y_obs, r.y_fit, r.residual).trim_end());
        out.push('\n');
    }
    out
}

/// Hypothesis comparison table; the selected hypothesis is starred.
pub fn format_comparison(selection: &HypothesisSelection) -> String {
    let mut out = String::new();
    out.push_str("Hypotheses:\n");
    for fit in &selection.fits {
        let chosen = if fit.label == selection.best.label { "*" } else { " " };
        let status = if fit.result.converged { "" } else { " (not converged)" };
        out.push_str(&format!(
            "{chosen} {:<16} peaks={} RSS={:.6e} BIC={:.3}{status}\n",
            truncate(&fit.label, 16),
            fit.n_peaks,
            fit.result.rss,
            fit.result.bic
        ));
    }
    for (label, reason) in &selection.skipped {
        out.push_str(&format!("  (skipped {label}) {reason}\n"));
    }

    out.push_str("\nChosen hypothesis:\n");
    out.push_str(&format!("- {} ({} peaks)\n", selection.best.label, selection.best.n_peaks));
    for (i, p) in selection.best.result.peaks.iter().enumerate() {
        out.push_str(&format!(
            "- peak {i}: center={:.4} width={:.4} amplitude={:.4}\n",
            p.center, p.width, p.amplitude
        ));
    }
    out
}

fn fmt_with_err(v: f64, err: Option<f64>) -> String {
    match err {
        Some(e) => format!("{v:.4} ± {e:.2e}"),
        None => format!("{v:.4}"),
    }
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.6}")).collect();
    format!("[{}]", parts.join(", "))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}
