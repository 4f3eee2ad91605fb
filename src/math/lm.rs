//! Levenberg–Marquardt nonlinear least squares.
//!
//! Minimizes `Σ rᵢ(u)²` over a free parameter vector `u`. Each iteration
//! evaluates the Jacobian once and then solves the damped normal equations
//!
//! ```text
//! (JᵀJ + λ·diag(JᵀJ)) δ = −Jᵀr
//! ```
//!
//! increasing `λ` ×10 until a step lowers the residual, and relaxing it ÷10
//! after every accepted step. The search state lives entirely inside
//! [`minimize`]; callers only see the returned [`LmOutcome`].
//!
//! Stopping rules, checked in this order:
//! - `ResidualFloor`: `rss <= residual_floor`
//! - `Gradient`: `‖Jᵀr‖∞ <= gradient_tolerance · max(1, rss)`
//! - `ResidualChange`: step accepted at `λ <= MAX_SETTLED_LAMBDA` with
//!   `rss_old − rss_new <= tolerance · rss_old`. A tiny improvement under heavy
//!   damping only means the step was short, so the search goes on.
//! - no descending step even with `λ > MAX_LAMBDA`: `Gradient` when the
//!   residual is orthogonal to every Jacobian column (cosine at most
//!   `STATIONARY_COSINE`), `Stalled` otherwise
//! - `MaxIterations`: `max_iterations` Jacobian evaluations used

use nalgebra::{DMatrix, DVector};

use crate::domain::Termination;
use crate::math::solve_normal_equations;

const INITIAL_LAMBDA: f64 = 1e-3;
const MIN_LAMBDA: f64 = 1e-15;
const MAX_LAMBDA: f64 = 1e16;
const DIAG_FLOOR: f64 = 1e-12;
const MAX_SETTLED_LAMBDA: f64 = 1.0;
const STATIONARY_COSINE: f64 = 1e-4;

/// A residual vector and its Jacobian, both functions of the free parameters.
pub trait LeastSquaresProblem {
    fn params_len(&self) -> usize;

    fn residuals_len(&self) -> usize;

    /// Fill `out` with residuals at `u`.
    ///
    /// Returns `false` when `u` is not an admissible iterate (non-finite model
    /// values, degenerate parameters); the solver then rejects the step.
    fn residuals(&self, u: &DVector<f64>, out: &mut DVector<f64>) -> bool;

    /// Fill `out` (`residuals_len × params_len`) with `∂rᵢ/∂uⱼ`.
    fn jacobian(&self, u: &DVector<f64>, out: &mut DMatrix<f64>);
}

#[derive(Debug, Clone, Copy)]
pub struct LmSettings {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub gradient_tolerance: f64,
    pub residual_floor: f64,
}

#[derive(Debug, Clone)]
pub struct LmOutcome {
    /// Best parameters found (the last accepted iterate).
    pub params: DVector<f64>,
    pub rss: f64,
    pub iterations: usize,
    pub termination: Termination,
}

/// Run Levenberg–Marquardt from `start`.
pub fn minimize<P: LeastSquaresProblem>(problem: &P, start: DVector<f64>, settings: &LmSettings) -> LmOutcome {
    let n = problem.residuals_len();
    let p = problem.params_len();

    let mut u = start;
    let mut r = DVector::<f64>::zeros(n);
    if !problem.residuals(&u, &mut r) || !r.iter().all(|v| v.is_finite()) {
        return LmOutcome {
            params: u,
            rss: f64::INFINITY,
            iterations: 0,
            termination: Termination::NonFinite,
        };
    }
    let mut rss = r.norm_squared();
    if rss <= settings.residual_floor {
        return LmOutcome {
            params: u,
            rss,
            iterations: 0,
            termination: Termination::ResidualFloor,
        };
    }

    let mut lambda = INITIAL_LAMBDA;
    let mut jac = DMatrix::<f64>::zeros(n, p);
    let mut r_trial = DVector::<f64>::zeros(n);

    for iter in 1..=settings.max_iterations {
        problem.jacobian(&u, &mut jac);
        let g = jac.tr_mul(&r);
        if g.amax() <= settings.gradient_tolerance * rss.max(1.0) {
            return LmOutcome {
                params: u,
                rss,
                iterations: iter,
                termination: Termination::Gradient,
            };
        }

        let a = jac.tr_mul(&jac);
        let scale: Vec<f64> = a.diagonal().iter().map(|d| d.max(DIAG_FLOOR)).collect();
        let neg_g = -&g;

        let accepted = loop {
            let mut damped = a.clone();
            for (j, s) in scale.iter().enumerate() {
                damped[(j, j)] += lambda * s;
            }

            if let Some(delta) = solve_normal_equations(&damped, &neg_g) {
                let u_trial = &u + &delta;
                if problem.residuals(&u_trial, &mut r_trial) {
                    let rss_trial = r_trial.norm_squared();
                    if rss_trial.is_finite() && rss_trial < rss {
                        break Some((u_trial, rss_trial));
                    }
                }
            }

            lambda *= 10.0;
            if lambda > MAX_LAMBDA {
                break None;
            }
        };

        let Some((u_next, rss_next)) = accepted else {
            let cosine = gradient_cosine(&jac, &r);
            log::debug!("lm: no descending step at iteration {iter} (rss={rss:.6e}, cosine={cosine:.3e})");
            let termination = if cosine <= STATIONARY_COSINE {
                Termination::Gradient
            } else {
                Termination::Stalled
            };
            return LmOutcome {
                params: u,
                rss,
                iterations: iter,
                termination,
            };
        };

        let improvement = rss - rss_next;
        let rss_prev = rss;
        let settled = lambda <= MAX_SETTLED_LAMBDA;
        u = u_next;
        rss = rss_next;
        std::mem::swap(&mut r, &mut r_trial);
        lambda = (lambda / 10.0).max(MIN_LAMBDA);
        log::trace!("lm: iteration {iter} rss={rss:.6e} lambda={lambda:.1e}");

        if rss <= settings.residual_floor {
            return LmOutcome {
                params: u,
                rss,
                iterations: iter,
                termination: Termination::ResidualFloor,
            };
        }
        if settled && improvement <= settings.tolerance * rss_prev {
            return LmOutcome {
                params: u,
                rss,
                iterations: iter,
                termination: Termination::ResidualChange,
            };
        }
    }

    LmOutcome {
        params: u,
        rss,
        iterations: settings.max_iterations,
        termination: Termination::MaxIterations,
    }
}

/// Largest `|Jⱼ·r| / (‖Jⱼ‖·‖r‖)` over the Jacobian columns.
///
/// Zero at a stationary point regardless of how the parameters are scaled.
fn gradient_cosine(jac: &DMatrix<f64>, r: &DVector<f64>) -> f64 {
    let r_norm = r.norm();
    if r_norm == 0.0 {
        return 0.0;
    }
    jac.column_iter()
        .filter_map(|col| {
            let col_norm = col.norm();
            (col_norm > 0.0).then(|| col.dot(r).abs() / (col_norm * r_norm))
        })
        .fold(0.0, f64::max)
}
