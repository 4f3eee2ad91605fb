//! Reporting utilities: residuals, largest misfits, and formatted terminal output.

pub mod format;

pub use format::*;

use crate::fit::FitEngine;

/// Observed vs fitted value at one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResidualRow {
    pub x: f64,
    pub y_obs: f64,
    pub y_fit: f64,
    pub residual: f64,
}

/// Fitted values and residuals (`y_obs − y_fit`) for every sample, in dataset order.
pub fn compute_residuals(engine: &FitEngine<'_>) -> Vec<ResidualRow> {
    let ds = engine.dataset();
    ds.x()
        .iter()
        .zip(ds.y())
        .map(|(&x, &y_obs)| {
            let y_fit = engine.best_fit(x);
            ResidualRow {
                x,
                y_obs,
                y_fit,
                residual: y_obs - y_fit,
            }
        })
        .collect()
}

/// The `top_n` rows with the largest absolute residual, largest first.
pub fn largest_residuals(rows: &[ResidualRow], top_n: usize) -> Vec<ResidualRow> {
    let mut sorted = rows.to_vec();
    sorted.sort_by(|a, b| b.residual.abs().total_cmp(&a.residual.abs()));
    sorted.truncate(top_n);
    sorted
}
