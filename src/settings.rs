use crate::reduce::ReduceOptions;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

/// Measurement and calibration settings.
///
/// Settings are passed explicitly into every operation. Unset calibration
/// values are stored as zero.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Settings {
    pub pixel_value_threshold: f64,
    pub wide_sigma_threshold: f64,

    /// Distance from camera to soil at the first calibration position in millimeters.
    pub measured_distance: f64,
    pub calibration_factor: f64,
    pub calibration_disparity_offset: f64,
    pub calibration_measured_at_z: f64,

    /// `true` if z decreases when moving toward the soil.
    pub negative_z: bool,
    pub calibration_image_width: usize,
    pub calibration_image_height: usize,

    pub input_coverage_threshold: f64,
    pub disparity_coverage_threshold: f64,
    pub rotation: f64,
    pub calibration_rotation_adjustment: f64,
    pub verbose: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pixel_value_threshold: 1.,
            wide_sigma_threshold: 10.,
            measured_distance: 0.,
            calibration_factor: 0.,
            calibration_disparity_offset: 0.,
            calibration_measured_at_z: 0.,
            negative_z: true,
            calibration_image_width: 0,
            calibration_image_height: 0,
            input_coverage_threshold: 5.,
            disparity_coverage_threshold: 2.,
            rotation: 0.,
            calibration_rotation_adjustment: 0.,
            verbose: 0,
        }
    }
}

impl Settings {
    /// Reduction options using the pixel and sigma thresholds.
    pub fn reduce_options(&self, narrowable: bool) -> ReduceOptions {
        ReduceOptions::new(
            self.pixel_value_threshold,
            self.wide_sigma_threshold,
            narrowable,
        )
    }

    /// Maps `verbose` onto the most detailed `tracing` level worth emitting.
    pub fn level_filter(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::OFF,
            1 | 2 => LevelFilter::INFO,
            3 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reduce::Threshold;
    use rstest::rstest;

    #[rstest]
    #[case(0, LevelFilter::OFF)]
    #[case(2, LevelFilter::INFO)]
    #[case(3, LevelFilter::DEBUG)]
    #[case(9, LevelFilter::TRACE)]
    fn verbosity_levels(#[case] verbose: u8, #[case] level: LevelFilter) {
        let settings = Settings {
            verbose,
            ..Default::default()
        };
        assert_eq!(settings.level_filter(), level);
    }

    #[test]
    fn reduce_options_follow_thresholds() {
        let options = Settings::default().reduce_options(true);
        assert_eq!(options.threshold, Threshold::Above(1.));
        assert_eq!(options.wide_sigma_threshold, 10.);
        assert!(options.narrowable);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn partial_settings_document() {
        let settings: Settings = serde_json::from_str(
            r#"{ "measured_distance": 250, "calibration_factor": 2.2321, "negative_z": true }"#,
        )
        .unwrap();

        assert_eq!(settings.measured_distance, 250.);
        assert_eq!(settings.calibration_factor, 2.2321);
        assert_eq!(settings.pixel_value_threshold, 1.);
    }
}
