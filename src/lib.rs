//! `peakfit` library crate.
//!
//! Fits sums of Lorentzian peaks to one-dimensional spectra (Raman, XRD).
//! The binary (`peakfit`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - loaders, plotters and persisters can drive `FitEngine` directly

pub mod adapters;
pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod math;
pub mod models;
pub mod report;
