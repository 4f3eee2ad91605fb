//! Measured spectra.
//!
//! A [`SpectralDataset`] is validated once at construction and is read-only
//! afterwards, so any number of engines may borrow it at the same time.

use crate::domain::{AxisLabels, MetaValue, Metadata};
use crate::error::{FitError, Result};

/// One (x, y) series with equal, non-zero length and finite values.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumPair {
    x: Vec<f64>,
    y: Vec<f64>,
}

impl SpectrumPair {
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        validate_series(&x, &y)?;
        Ok(Self { x, y })
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// A single measurement plus an optional reference spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralDataset {
    series: SpectrumPair,
    other: Option<SpectrumPair>,
    metadata: Metadata,
    labels: AxisLabels,
}

impl SpectralDataset {
    /// Build a dataset from the primary series.
    ///
    /// Fails with `FitError::Validation` for mismatched lengths, empty arrays
    /// or non-finite values.
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        Ok(Self {
            series: SpectrumPair::new(x, y)?,
            other: None,
            metadata: Metadata::new(),
            labels: AxisLabels::default(),
        })
    }

    /// Attach a reference spectrum (validated independently of the primary series).
    pub fn with_other(mut self, x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        self.other = Some(SpectrumPair::new(x, y)?);
        Ok(self)
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_labels(mut self, labels: AxisLabels) -> Self {
        self.labels = labels;
        self
    }

    pub fn x(&self) -> &[f64] {
        self.series.x()
    }

    pub fn y(&self) -> &[f64] {
        self.series.y()
    }

    pub fn other(&self) -> Option<&SpectrumPair> {
        self.other.as_ref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn labels(&self) -> &AxisLabels {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// Always false: construction rejects empty series.
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Smallest and largest `x`.
    pub fn x_range(&self) -> (f64, f64) {
        self.x()
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }

    /// Smallest positive gap between sorted `x` values, `None` when all `x` coincide.
    pub fn min_spacing(&self) -> Option<f64> {
        let mut xs = self.x().to_vec();
        xs.sort_by(f64::total_cmp);
        xs.windows(2)
            .map(|w| w[1] - w[0])
            .filter(|d| *d > 0.0)
            .min_by(f64::total_cmp)
    }

    /// `y` at the sample whose `x` is closest to `x0` (first one on ties).
    pub fn nearest_y(&self, x0: f64) -> f64 {
        let mut best = 0;
        let mut best_dist = f64::INFINITY;
        for (i, &xi) in self.x().iter().enumerate() {
            let d = (xi - x0).abs();
            if d < best_dist {
                best = i;
                best_dist = d;
            }
        }
        self.y()[best]
    }

    /// Sum of squared deviations of `y` from its mean.
    pub fn total_sum_of_squares(&self) -> f64 {
        let y = self.y();
        let mean = y.iter().sum::<f64>() / y.len() as f64;
        y.iter().map(|v| (v - mean) * (v - mean)).sum()
    }

    /// Same dataset with a different primary `y` (used by preprocessing).
    pub(crate) fn with_y(&self, y: Vec<f64>) -> Result<Self> {
        Ok(Self {
            series: SpectrumPair::new(self.x().to_vec(), y)?,
            other: self.other.clone(),
            metadata: self.metadata.clone(),
            labels: self.labels.clone(),
        })
    }
}

fn validate_series(x: &[f64], y: &[f64]) -> Result<()> {
    if x.is_empty() || y.is_empty() {
        return Err(FitError::validation("x and y must be non-empty"));
    }
    if x.len() != y.len() {
        return Err(FitError::validation(format!(
            "x and y lengths differ: x={}, y={}",
            x.len(),
            y.len()
        )));
    }
    if let Some(i) = x.iter().position(|v| !v.is_finite()) {
        return Err(FitError::validation(format!("x[{i}]={} is not finite", x[i])));
    }
    if let Some(i) = y.iter().position(|v| !v.is_finite()) {
        return Err(FitError::validation(format!("y[{i}]={} is not finite", y[i])));
    }
    Ok(())
}
