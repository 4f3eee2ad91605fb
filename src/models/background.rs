//! Polynomial baseline.
//!
//! The baseline is evaluated in a normalized coordinate
//! `t = (x − origin) / scale` so cubic terms stay well conditioned for
//! Raman shifts in the thousands. Coefficients are lowest order first.

use serde::{Deserialize, Serialize};

use crate::domain::BackgroundKind;

/// Evaluate `Σ c_k t^k` (Horner).
pub fn polynomial(coefficients: &[f64], t: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, &c| acc * t + c)
}

/// Baseline model fitted alongside the peaks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Background {
    pub kind: BackgroundKind,
    pub origin: f64,
    pub scale: f64,
    pub coefficients: Vec<f64>,
}

impl Background {
    /// Zero baseline of the given kind over `[x_min, x_max]`.
    pub fn new(kind: BackgroundKind, x_min: f64, x_max: f64) -> Self {
        let half_span = 0.5 * (x_max - x_min);
        let scale = if half_span.is_finite() && half_span > 0.0 {
            half_span
        } else {
            1.0
        };
        Self {
            kind,
            origin: 0.5 * (x_min + x_max),
            scale,
            coefficients: vec![0.0; kind.coefficient_len()],
        }
    }

    pub fn none() -> Self {
        Self::new(BackgroundKind::None, 0.0, 0.0)
    }

    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    fn coordinate(&self, x: f64) -> f64 {
        (x - self.origin) / self.scale
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        self.evaluate_with(&self.coefficients, x)
    }

    /// Evaluate with trial coefficients (solver iterates).
    pub fn evaluate_with(&self, coefficients: &[f64], x: f64) -> f64 {
        if coefficients.is_empty() {
            return 0.0;
        }
        polynomial(coefficients, self.coordinate(x))
    }

    /// Fill `out[k] = t^k` (the derivative with respect to each coefficient).
    ///
    /// # Panics
    /// Panics if `out` is shorter than `self.len()`.
    pub fn fill_partials(&self, x: f64, out: &mut [f64]) {
        assert!(
            out.len() >= self.len(),
            "partials buffer holds {} values, background has {} coefficients",
            out.len(),
            self.len()
        );
        let t = self.coordinate(x);
        let mut power = 1.0;
        for slot in out.iter_mut().take(self.len()) {
            *slot = power;
            power *= t;
        }
    }
}

impl Default for Background {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polynomial_lowest_order_first() {
        assert_eq!(polynomial(&[1.0, 2.0, 3.0], 2.0), 1.0 + 4.0 + 12.0);
        assert_eq!(polynomial(&[], 5.0), 0.0);
    }

    #[test]
    fn background_uses_normalized_coordinate() {
        let mut bg = Background::new(BackgroundKind::Linear, 1000.0, 2000.0);
        bg.coefficients = vec![1.0, 0.5];
        assert_eq!(bg.evaluate(1500.0), 1.0);
        assert_eq!(bg.evaluate(2000.0), 1.5);

        let mut partials = [0.0; 2];
        bg.fill_partials(1000.0, &mut partials);
        assert_eq!(partials, [1.0, -1.0]);
    }

    #[test]
    fn none_background_is_zero() {
        let bg = Background::none();
        assert!(bg.is_empty());
        assert_eq!(bg.evaluate(123.0), 0.0);
    }

    #[test]
    #[should_panic(expected = "partials buffer")]
    fn short_partials_buffer_panics() {
        let bg = Background::new(BackgroundKind::Quadratic, 0.0, 1.0);
        let mut partials = [0.0; 2];
        bg.fill_partials(0.5, &mut partials);
    }
}
