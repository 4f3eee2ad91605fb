//! SVD least squares.
//!
//! The Levenberg–Marquardt step solves small square systems
//!
//! ```text
//! (JᵀJ + λ·D) δ = −Jᵀr
//! ```
//!
//! by Cholesky. When the damped matrix is not numerically positive definite
//! (degenerate peaks, flat regions) we fall back to this SVD solve, which
//! also handles rectangular and rank-deficient systems.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Solve a symmetric positive (semi-)definite system, Cholesky first.
pub fn solve_normal_equations(a: &DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    if let Some(chol) = a.clone().cholesky() {
        let x = chol.solve(b);
        if x.iter().all(|v| v.is_finite()) {
            return Some(x);
        }
    }
    solve_least_squares(a, b)
}
