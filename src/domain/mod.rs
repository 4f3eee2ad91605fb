//! Domain types used throughout the crate.
//!
//! This module defines:
//!
//! - peak parameters and their search bounds (`PeakParams`, `PeakBounds`)
//! - dataset labelling and metadata (`AxisLabels`, `MetaValue`, `Metadata`)
//! - solver settings and outcomes (`FitOptions`, `FitResult`, `Termination`)

pub mod types;

pub use types::*;
