//! Peak fitting.
//!
//! - [`engine`]: `FitEngine`, the mutable peak list and its Levenberg–Marquardt fit
//! - [`selection`]: parallel comparison of peak-count hypotheses by BIC

pub mod engine;
pub mod selection;

pub use engine::*;
pub use selection::*;
