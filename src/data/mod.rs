//! Spectral data: validated storage, preprocessing and synthetic generation.

pub mod dataset;
pub mod preprocess;
pub mod sample;

pub use dataset::*;
pub use preprocess::{normalize, savitzky_golay, savitzky_golay_with};
pub use sample::*;
