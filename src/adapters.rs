//! Technique profiles.
//!
//! A profile fixes what the two columns mean for a measurement technique and
//! the default search limits for its peaks. It never changes how fitting
//! works: everything here ends up as `AxisLabels`, metadata or `PeakBounds`.

use crate::data::SpectralDataset;
use crate::domain::{AxisLabels, Metadata, PeakBounds, PeakParams, Technique};
use crate::error::Result;
use crate::fit::{FitEngine, PeakSeed};
use crate::models::PeakModel;

/// Default peak limits and starting values for a technique.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileDefaults {
    /// Centers may move at most this far from their guess.
    pub center_tolerance: f64,
    pub width_max: f64,
    pub amplitude_min: f64,
    pub amplitude_max: f64,
    /// Width guess when the caller gives none.
    pub width: f64,
    /// Amplitude guess when the caller gives none and the data cannot supply one.
    pub amplitude: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TechniqueProfile {
    pub technique: Technique,
    pub labels: AxisLabels,
    /// Column key of the independent variable, recorded in metadata.
    pub x_key: &'static str,
    pub defaults: ProfileDefaults,
}

impl Technique {
    pub fn profile(self) -> TechniqueProfile {
        match self {
            Technique::Raman => TechniqueProfile {
                technique: self,
                labels: AxisLabels::new("Wavenumber, cm^-1", "Intensity, -"),
                x_key: "wavenumber",
                defaults: ProfileDefaults {
                    center_tolerance: 10.0,
                    width_max: 200.0,
                    amplitude_min: 0.0,
                    amplitude_max: 200.0,
                    width: 10.0,
                    amplitude: 10.0,
                },
            },
            Technique::Xrd => TechniqueProfile {
                technique: self,
                labels: AxisLabels::new("2-theta, deg", "Intensity, -"),
                x_key: "angle",
                defaults: ProfileDefaults {
                    center_tolerance: 5.0,
                    width_max: 10.0,
                    amplitude_min: 0.0,
                    amplitude_max: 10.0,
                    width: 0.5,
                    amplitude: 1.0,
                },
            },
        }
    }
}

impl TechniqueProfile {
    /// Build a dataset with this technique's column semantics.
    ///
    /// Adds `technique` and `x_column` to `metadata` unless already present.
    pub fn dataset(&self, x: Vec<f64>, y: Vec<f64>, metadata: Metadata) -> Result<SpectralDataset> {
        let mut metadata = metadata;
        metadata
            .entry("technique".to_string())
            .or_insert_with(|| self.technique.display_name().into());
        metadata
            .entry("x_column".to_string())
            .or_insert_with(|| self.x_key.into());
        Ok(SpectralDataset::new(x, y)?
            .with_labels(self.labels.clone())
            .with_metadata(metadata))
    }

    /// Default search limits for a peak of this technique.
    pub fn bounds(&self) -> PeakBounds {
        let d = &self.defaults;
        PeakBounds::unbounded()
            .with_center_tolerance(d.center_tolerance)
            .with_width_range(None, Some(d.width_max))
            .with_amplitude_range(Some(d.amplitude_min), Some(d.amplitude_max))
    }

    /// Clamp into the technique's amplitude range.
    pub fn clamp_amplitude(&self, amplitude: f64) -> f64 {
        amplitude.clamp(self.defaults.amplitude_min, self.defaults.amplitude_max)
    }

    /// Seed for a peak at `center`, filling missing guesses from the defaults.
    pub fn seed(&self, center: f64, width: Option<f64>, amplitude: Option<f64>) -> PeakSeed {
        PeakSeed {
            guess: PeakParams::new(
                center,
                width.unwrap_or(self.defaults.width),
                amplitude.unwrap_or(self.defaults.amplitude),
            ),
            bounds: self.bounds(),
        }
    }

    /// Add a bounded peak to `engine`.
    ///
    /// A missing amplitude is read off the data at `center` and clamped into
    /// the technique's amplitude range.
    pub fn add_peak<'e>(
        &self,
        engine: &'e mut FitEngine<'_>,
        center: f64,
        width: Option<f64>,
        amplitude: Option<f64>,
    ) -> Result<&'e PeakModel> {
        let amplitude = amplitude.unwrap_or_else(|| self.clamp_amplitude(engine.dataset().nearest_y(center)));
        let width = width.unwrap_or(self.defaults.width);
        engine.add_peak_with_bounds(center, width, Some(amplitude), self.bounds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MetaValue;
    use crate::error::FitError;

    #[test]
    fn raman_profile_labels_dataset() {
        let profile = Technique::Raman.profile();
        let mut meta = Metadata::new();
        meta.insert("laser_nm".to_string(), MetaValue::from(532.0));
        let ds = profile.dataset(vec![100.0, 200.0, 300.0], vec![1.0, 2.0, 1.5], meta).unwrap();

        assert_eq!(ds.labels().x_label, "Wavenumber, cm^-1");
        assert_eq!(ds.metadata()["technique"], MetaValue::from("Raman"));
        assert_eq!(ds.metadata()["x_column"], MetaValue::from("wavenumber"));
        assert_eq!(ds.metadata()["laser_nm"], MetaValue::from(532.0));
    }

    #[test]
    fn profile_dataset_still_validates() {
        let err = Technique::Xrd.profile().dataset(vec![1.0, 2.0], vec![1.0], Metadata::new()).unwrap_err();
        assert!(matches!(err, FitError::Validation(_)));
    }

    #[test]
    fn xrd_bounds_follow_defaults() {
        let b = Technique::Xrd.profile().bounds();
        assert_eq!(b.center_tolerance, Some(5.0));
        assert_eq!(b.width_max, Some(10.0));
        assert_eq!(b.amplitude_min, Some(0.0));
        assert_eq!(b.amplitude_max, Some(10.0));
    }

    #[test]
    fn add_peak_clamps_amplitude_from_data() {
        let profile = Technique::Xrd.profile();
        let ds = profile
            .dataset(vec![20.0, 25.0, 30.0], vec![0.2, 42.0, -0.1], Metadata::new())
            .unwrap();
        let mut engine = FitEngine::new(&ds);

        let peak = profile.add_peak(&mut engine, 25.0, None, None).unwrap();
        assert_eq!(peak.amplitude(), 10.0);
        assert_eq!(peak.width(), 0.5);

        let peak = profile.add_peak(&mut engine, 30.0, Some(1.0), None).unwrap();
        assert_eq!(peak.amplitude(), 0.0);
    }

    #[test]
    fn out_of_range_guess_is_rejected() {
        let profile = Technique::Raman.profile();
        let ds = profile.dataset(vec![0.0, 1.0, 2.0], vec![0.0, 1.0, 0.0], Metadata::new()).unwrap();
        let mut engine = FitEngine::new(&ds);
        assert!(profile.add_peak(&mut engine, 1.0, Some(250.0), None).is_err());
        assert!(engine.peaks().is_empty());
    }
}
