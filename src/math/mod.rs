//! Numerical building blocks: linear solves, parameter transforms and the
//! Levenberg–Marquardt solver.

pub mod lm;
pub mod ols;
pub mod transform;

pub use lm::*;
pub use ols::*;
pub use transform::*;
