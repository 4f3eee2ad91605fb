//! Intensity preprocessing applied before fitting.
//!
//! Both operations return a new dataset; the input is never modified, so a raw
//! and a preprocessed copy can be fitted side by side.
//!
//! - min–max normalization: `y' = (y - min) / (max - min)`
//! - Savitzky–Golay smoothing: local polynomial least squares over a sliding
//!   window. The `window / 2` samples at each end follow an [`EdgeMode`]. The
//!   default evaluates the polynomial fitted to the first/last full window, so
//!   a peak sitting at the edge of the scan keeps its slope. `Mirror` and
//!   `Nearest` pad the signal instead and run the ordinary convolution.

use nalgebra::{DMatrix, DVector};

use crate::data::SpectralDataset;
use crate::domain::EdgeMode;
use crate::error::{FitError, Result};

/// Singular values below this are treated as zero in the pseudo-inverse.
const PINV_EPS: f64 = 1e-12;

impl SpectralDataset {
    /// Rescale `y` into `[0, 1]`.
    pub fn normalized(&self) -> Result<SpectralDataset> {
        self.with_y(normalize(self.y())?)
    }

    /// Smooth `y` with a Savitzky–Golay filter of odd `window` and polynomial `order`.
    pub fn smoothed(&self, window: usize, order: usize) -> Result<SpectralDataset> {
        self.smoothed_with(window, order, EdgeMode::default())
    }

    pub fn smoothed_with(&self, window: usize, order: usize, edges: EdgeMode) -> Result<SpectralDataset> {
        self.with_y(savitzky_golay_with(self.y(), window, order, edges)?)
    }
}

/// Min–max normalization of a series.
pub fn normalize(y: &[f64]) -> Result<Vec<f64>> {
    let (lo, hi) = y
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let span = hi - lo;
    if !(span.is_finite() && span > 0.0) {
        return Err(FitError::validation("cannot normalize a constant or empty series"));
    }
    Ok(y.iter().map(|v| (v - lo) / span).collect())
}

/// Savitzky–Golay smoothing with polynomial edges.
pub fn savitzky_golay(y: &[f64], window: usize, order: usize) -> Result<Vec<f64>> {
    savitzky_golay_with(y, window, order, EdgeMode::Polyfit)
}

/// Savitzky–Golay smoothing with the given edge handling.
pub fn savitzky_golay_with(y: &[f64], window: usize, order: usize, edges: EdgeMode) -> Result<Vec<f64>> {
    if window % 2 == 0 {
        return Err(FitError::validation(format!("smoothing window must be odd, got {window}")));
    }
    if window <= order {
        return Err(FitError::validation(format!(
            "smoothing window ({window}) must exceed polynomial order ({order})"
        )));
    }
    if window > y.len() {
        return Err(FitError::validation(format!(
            "smoothing window ({window}) exceeds series length ({})",
            y.len()
        )));
    }

    let half = window / 2;
    let vander = vandermonde(window, order, half);
    let pinv = vander
        .clone()
        .pseudo_inverse(PINV_EPS)
        .map_err(|e| FitError::validation(format!("smoothing design matrix: {e}")))?;

    let n = y.len();
    let mut out = vec![0.0; n];

    // Value of the local polynomial at offset 0 is its constant term.
    let smooth_at = |i: usize, sample: &dyn Fn(isize) -> f64| -> f64 {
        (0..window)
            .map(|j| pinv[(0, j)] * sample(i as isize - half as isize + j as isize))
            .sum()
    };

    for i in half..(n - half) {
        out[i] = smooth_at(i, &|k: isize| y[k as usize]);
    }

    match edges {
        EdgeMode::Polyfit => {
            let head = window_fit(&pinv, &y[..window]);
            let tail = window_fit(&pinv, &y[n - window..]);
            for i in 0..half {
                out[i] = (vander.row(i) * &head)[0];
                let k = window - half + i;
                out[n - half + i] = (vander.row(k) * &tail)[0];
            }
        }
        EdgeMode::Mirror | EdgeMode::Nearest => {
            let padded = |k: isize| y[padded_index(k, n, edges)];
            for i in (0..half).chain(n - half..n) {
                out[i] = smooth_at(i, &padded);
            }
        }
    }

    Ok(out)
}

/// Map an index past either end back into `0..n`. Needs `n > window / 2`.
fn padded_index(k: isize, n: usize, edges: EdgeMode) -> usize {
    let last = n as isize - 1;
    let k = match edges {
        EdgeMode::Mirror if k < 0 => -k,
        EdgeMode::Mirror if k > last => 2 * last - k,
        _ => k,
    };
    k.clamp(0, last) as usize
}

fn vandermonde(window: usize, order: usize, half: usize) -> DMatrix<f64> {
    DMatrix::from_fn(window, order + 1, |r, c| {
        let offset = r as f64 - half as f64;
        offset.powi(c as i32)
    })
}

fn window_fit(pinv: &DMatrix<f64>, segment: &[f64]) -> DVector<f64> {
    pinv * DVector::from_column_slice(segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_maps_to_unit_interval() {
        let y = normalize(&[2.0, 4.0, 6.0, 3.0]).unwrap();
        assert_eq!(y, vec![0.0, 0.5, 1.0, 0.25]);
        assert!(normalize(&[1.0, 1.0]).is_err());
    }

    #[test]
    fn savitzky_golay_preserves_polynomials_up_to_order() {
        let y: Vec<f64> = (0..21)
            .map(|i| {
                let t = i as f64 * 0.1;
                1.0 - 2.0 * t + 0.5 * t * t
            })
            .collect();
        let s = savitzky_golay(&y, 7, 2).unwrap();
        for (a, b) in y.iter().zip(s.iter()) {
            assert!((a - b).abs() < 1e-9, "expected {a}, got {b}");
        }
    }

    #[test]
    fn savitzky_golay_reduces_alternating_noise() {
        let y: Vec<f64> = (0..41).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let s = savitzky_golay(&y, 15, 3).unwrap();
        let interior_max = s[7..34].iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        assert!(interior_max < 0.5, "noise not reduced: {interior_max}");
    }

    #[test]
    fn edge_modes_share_the_interior() {
        let y: Vec<f64> = (0..25).map(|i| ((i * 7) % 5) as f64 + 0.1 * i as f64).collect();
        let poly = savitzky_golay_with(&y, 7, 2, EdgeMode::Polyfit).unwrap();
        let mirror = savitzky_golay_with(&y, 7, 2, EdgeMode::Mirror).unwrap();
        let nearest = savitzky_golay_with(&y, 7, 2, EdgeMode::Nearest).unwrap();
        for i in 3..22 {
            assert_eq!(poly[i], mirror[i]);
            assert_eq!(poly[i], nearest[i]);
        }
        assert_ne!(mirror[0], nearest[0]);
    }

    #[test]
    fn only_polyfit_edges_follow_a_ramp() {
        let y: Vec<f64> = (0..15).map(|i| i as f64).collect();
        let poly = savitzky_golay_with(&y, 5, 2, EdgeMode::Polyfit).unwrap();
        let nearest = savitzky_golay_with(&y, 5, 2, EdgeMode::Nearest).unwrap();
        assert!((poly[0] - 0.0).abs() < 1e-9);
        assert!((poly[14] - 14.0).abs() < 1e-9);
        assert!(nearest[0] > 0.1, "nearest edge {}", nearest[0]);

        let flat = vec![3.0; 9];
        for edges in [EdgeMode::Polyfit, EdgeMode::Mirror, EdgeMode::Nearest] {
            let s = savitzky_golay_with(&flat, 5, 2, edges).unwrap();
            assert!(s.iter().all(|v| (v - 3.0).abs() < 1e-12), "{edges:?}: {s:?}");
        }
    }

    #[test]
    fn padded_index_reflects_or_clamps() {
        assert_eq!(padded_index(-2, 10, EdgeMode::Mirror), 2);
        assert_eq!(padded_index(11, 10, EdgeMode::Mirror), 7);
        assert_eq!(padded_index(-2, 10, EdgeMode::Nearest), 0);
        assert_eq!(padded_index(11, 10, EdgeMode::Nearest), 9);
        assert_eq!(padded_index(4, 10, EdgeMode::Mirror), 4);
    }

    #[test]
    fn savitzky_golay_validates_parameters() {
        let y = vec![0.0; 10];
        assert!(savitzky_golay(&y, 4, 2).is_err());
        assert!(savitzky_golay(&y, 3, 3).is_err());
        assert!(savitzky_golay(&y, 11, 2).is_err());
    }

    #[test]
    fn dataset_preprocessing_keeps_original_untouched() {
        let ds = SpectralDataset::new(vec![0.0, 1.0, 2.0], vec![10.0, 20.0, 30.0]).unwrap();
        let norm = ds.normalized().unwrap();
        assert_eq!(norm.y(), &[0.0, 0.5, 1.0]);
        assert_eq!(ds.y(), &[10.0, 20.0, 30.0]);
        assert_eq!(norm.x(), ds.x());
    }
}
