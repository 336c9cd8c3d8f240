//! Two-point disparity to distance calibration.
//!
//! Calibration happens in two phases. At the first position the reduced
//! disparity is recorded as an offset together with the position and the
//! image size. After the camera has moved a known distance along z, the
//! change in disparity yields a factor converting disparity differences into
//! millimeters. From then on the state is read-only and every measurement
//! turns a reduced disparity into a soil z coordinate.

use crate::{field::Shape, settings::Settings, utils::round_to};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uom::si::{f64::Length, length::millimeter};

/// Largest allowed difference, in millimeters, between the soil z computed
/// while recording the factor and the soil z implied by the measured distance.
pub const SANITY_TOLERANCE_MM: f64 = 2.0;

#[derive(Debug, Error, PartialEq)]
pub enum CalibrationError {
    #[error("disparity offset is already recorded")]
    OffsetAlreadySet,
    #[error("disparity offset must be recorded before the calibration factor")]
    OffsetUnset,
    #[error("calibration factor is already recorded")]
    FactorAlreadySet,
    #[error("disparity did not change between calibration positions: {disparity}")]
    ZeroDisparityDifference { disparity: f64 },
    #[error("calculated soil z {calculated} is more than {tolerance} mm from expected {expected}")]
    SanityMismatch {
        calculated: f64,
        expected: f64,
        tolerance: f64,
    },
    #[error("image size {actual:?} does not match calibration image size {expected:?}")]
    ImageSizeMismatch { expected: Shape, actual: Shape },
}

/// Relation between the z axis and the distance from camera to soil.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Direction {
    /// z increases toward the soil.
    Positive,
    /// z decreases toward the soil.
    Negative,
}

impl Direction {
    pub fn from_negative_z(negative_z: bool) -> Self {
        match negative_z {
            true => Direction::Negative,
            false => Direction::Positive,
        }
    }

    pub fn sign(&self) -> f64 {
        match self {
            Direction::Positive => 1.,
            Direction::Negative => -1.,
        }
    }
}

/// Which calibration value is still missing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    NeedsOffset,
    NeedsFactor,
    Calibrated,
}

/// Calibration values. Zero marks an unset offset or factor.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibrationState {
    pub measured_distance: f64,
    pub disparity_offset: f64,
    pub measured_at_z: f64,
    pub calibration_factor: f64,
    pub direction: Direction,
    pub image_size: Option<Shape>,
}

impl CalibrationState {
    pub fn new(measured_distance: f64, direction: Direction) -> Self {
        Self {
            measured_distance,
            disparity_offset: 0.,
            measured_at_z: 0.,
            calibration_factor: 0.,
            direction,
            image_size: None,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let image_size = match (
            settings.calibration_image_width,
            settings.calibration_image_height,
        ) {
            (0, _) | (_, 0) => None,
            (width, height) => Some(Shape::from_size(width, height)),
        };

        Self {
            measured_distance: settings.measured_distance,
            disparity_offset: settings.calibration_disparity_offset,
            measured_at_z: settings.calibration_measured_at_z,
            calibration_factor: settings.calibration_factor,
            direction: Direction::from_negative_z(settings.negative_z),
            image_size,
        }
    }

    /// Writes the calibration values back into `settings` for persistence.
    pub fn store(&self, settings: &mut Settings) {
        settings.measured_distance = self.measured_distance;
        settings.calibration_disparity_offset = self.disparity_offset;
        settings.calibration_measured_at_z = self.measured_at_z;
        settings.calibration_factor = self.calibration_factor;
        settings.negative_z = self.direction == Direction::Negative;
        let size = self.image_size.unwrap_or(Shape::new(0, 0));
        settings.calibration_image_width = size.width();
        settings.calibration_image_height = size.height();
    }

    /// A state with a factor can measure, even without an offset.
    pub fn phase(&self) -> Phase {
        if self.calibration_factor != 0. {
            Phase::Calibrated
        } else if self.disparity_offset == 0. {
            Phase::NeedsOffset
        } else {
            Phase::NeedsFactor
        }
    }

    /// Slope and intercept of the disparity to distance line, if calibrated.
    pub fn line(&self) -> Option<(f64, f64)> {
        match self.phase() {
            Phase::Calibrated => Some((
                -self.calibration_factor,
                self.measured_distance + self.disparity_offset * self.calibration_factor,
            )),
            _ => None,
        }
    }

    fn compute(&self, disparity_mid: f64, current_z: f64) -> Height {
        let sign = self.direction.sign();
        let disparity_delta = disparity_mid - self.disparity_offset;
        let distance = self.measured_distance - disparity_delta * self.calibration_factor;
        let measured_soil_z = self.measured_at_z + sign * self.measured_distance;
        let z = (current_z + sign * distance).round();

        Height {
            z,
            details: HeightDetails {
                disparity_mid,
                disparity_offset: self.disparity_offset,
                disparity_delta,
                calibration_factor: self.calibration_factor,
                measured_distance: self.measured_distance,
                distance,
                measured_at_z: self.measured_at_z,
                measured_soil_z,
                current_z,
                direction: self.direction,
                calculated_soil_z: z,
            },
        }
    }
}

/// Every value that went into a soil z calculation.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HeightDetails {
    pub disparity_mid: f64,
    pub disparity_offset: f64,
    pub disparity_delta: f64,
    pub calibration_factor: f64,
    pub measured_distance: f64,
    pub distance: f64,
    pub measured_at_z: f64,
    pub measured_soil_z: f64,
    pub current_z: f64,
    pub direction: Direction,
    pub calculated_soil_z: f64,
}

/// A calculated soil z coordinate in millimeters.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Height {
    pub z: f64,
    pub details: HeightDetails,
}

impl Height {
    pub fn z_length(&self) -> Length {
        Length::new::<millimeter>(self.z)
    }
}

/// Records calibration values and converts reduced disparity into soil z.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationSolver {
    state: CalibrationState,
}

impl CalibrationSolver {
    pub fn new(state: CalibrationState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    pub fn into_state(self) -> CalibrationState {
        self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Records the disparity at the first calibration position.
    pub fn record_offset(
        &mut self,
        disparity_mid: f64,
        current_z: f64,
        image_size: Shape,
    ) -> Result<(), CalibrationError> {
        if self.state.disparity_offset != 0. {
            return Err(CalibrationError::OffsetAlreadySet);
        }

        self.state.disparity_offset = disparity_mid;
        self.state.measured_at_z = current_z;
        self.state.image_size = Some(image_size);
        info!(
            disparity_offset = disparity_mid,
            measured_at_z = current_z,
            "recorded calibration disparity offset"
        );

        Ok(())
    }

    /// Records the calibration factor from the disparity at a second position.
    ///
    /// `image_size` must match the size recorded with the offset.
    /// The factor is only kept if the soil z it yields at `current_z` agrees
    /// with the measured distance to within `SANITY_TOLERANCE_MM`.
    pub fn record_factor(
        &mut self,
        disparity_mid: f64,
        current_z: f64,
        image_size: Shape,
    ) -> Result<Height, CalibrationError> {
        if self.state.disparity_offset == 0. {
            return Err(CalibrationError::OffsetUnset);
        }

        if self.state.calibration_factor != 0. {
            return Err(CalibrationError::FactorAlreadySet);
        }

        self.check_image_size(image_size)?;

        let disparity_difference = disparity_mid - self.state.disparity_offset;
        if disparity_difference == 0. {
            return Err(CalibrationError::ZeroDisparityDifference {
                disparity: disparity_mid,
            });
        }

        let travel = (self.state.measured_at_z - current_z).abs();
        let candidate = CalibrationState {
            calibration_factor: round_to(travel / disparity_difference, 4),
            ..self.state.clone()
        };

        let height = candidate.compute(disparity_mid, current_z);
        let expected = height.details.measured_soil_z;
        if (height.z - expected).abs() > SANITY_TOLERANCE_MM {
            return Err(CalibrationError::SanityMismatch {
                calculated: height.z,
                expected,
                tolerance: SANITY_TOLERANCE_MM,
            });
        }

        info!(
            calibration_factor = candidate.calibration_factor,
            disparity_difference, "recorded calibration factor"
        );
        self.state = candidate;

        Ok(height)
    }

    /// Converts a reduced disparity at `current_z` into soil z.
    ///
    /// Returns `Ok(None)` if no calibration factor is recorded yet.
    pub fn height(
        &self,
        disparity_mid: f64,
        current_z: f64,
        image_size: Shape,
    ) -> Result<Option<Height>, CalibrationError> {
        if self.state.calibration_factor == 0. {
            return Ok(None);
        }

        self.check_image_size(image_size)?;

        let height = self.state.compute(disparity_mid, current_z);
        debug!(details = ?height.details, "calculated soil z");

        Ok(Some(height))
    }

    /// The factor is pixel-scale dependent, so every capture after the offset
    /// must match the offset capture's size.
    fn check_image_size(&self, image_size: Shape) -> Result<(), CalibrationError> {
        match self.state.image_size {
            Some(expected) if expected != image_size => Err(CalibrationError::ImageSizeMismatch {
                expected,
                actual: image_size,
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    const SIZE: Shape = Shape::new(480, 640);

    fn calibrated() -> CalibrationSolver {
        CalibrationSolver::new(CalibrationState {
            measured_distance: 250.,
            disparity_offset: 100.,
            measured_at_z: 0.,
            calibration_factor: 2.2321,
            direction: Direction::Negative,
            image_size: Some(SIZE),
        })
    }

    fn offset_recorded() -> CalibrationSolver {
        let mut solver = CalibrationSolver::new(CalibrationState::new(250., Direction::Negative));
        solver.record_offset(100., 0., SIZE).unwrap();
        solver
    }

    #[test]
    fn phases_fill_in_order() {
        let mut solver = CalibrationSolver::new(CalibrationState::new(250., Direction::Negative));
        assert_eq!(solver.phase(), Phase::NeedsOffset);
        assert_eq!(
            solver.record_factor(120., -50., SIZE),
            Err(CalibrationError::OffsetUnset)
        );

        solver.record_offset(100., 0., SIZE).unwrap();
        assert_eq!(solver.phase(), Phase::NeedsFactor);
        assert_eq!(
            solver.record_offset(101., 0., SIZE),
            Err(CalibrationError::OffsetAlreadySet)
        );

        solver.record_factor(259.78, -50., SIZE).unwrap();
        assert_eq!(solver.phase(), Phase::Calibrated);
        assert_eq!(
            solver.record_factor(259.78, -50., SIZE),
            Err(CalibrationError::FactorAlreadySet)
        );
    }

    #[test]
    fn factor_from_two_positions() {
        let mut solver = offset_recorded();
        let height = solver.record_factor(259.78, -50., SIZE).unwrap();

        assert_relative_eq!(solver.state().calibration_factor, 0.3129);
        assert_eq!(height.z, -250.);
        assert_eq!(height.details.measured_soil_z, -250.);
    }

    #[test]
    fn identical_disparity_is_rejected() {
        let mut solver = offset_recorded();
        assert_eq!(
            solver.record_factor(100., -50., SIZE),
            Err(CalibrationError::ZeroDisparityDifference { disparity: 100. })
        );
        assert_eq!(solver.phase(), Phase::NeedsFactor);
    }

    #[test]
    fn moving_away_fails_sanity_check() {
        // Disparity grew although the camera moved 50 mm away from the soil.
        let mut solver = offset_recorded();
        let result = solver.record_factor(259.78, 50., SIZE);

        assert!(matches!(
            result,
            Err(CalibrationError::SanityMismatch { calculated, expected, .. })
                if calculated == -150. && expected == -250.
        ));
        assert_eq!(solver.state().calibration_factor, 0.);
    }

    #[test]
    fn factor_requires_offset_image_size() {
        let mut solver = offset_recorded();
        let actual = Shape::new(240, 320);

        assert_eq!(
            solver.record_factor(259.78, -50., actual),
            Err(CalibrationError::ImageSizeMismatch {
                expected: SIZE,
                actual,
            })
        );
        assert_eq!(solver.phase(), Phase::NeedsFactor);
    }

    #[test]
    fn uncalibrated_height_is_none() {
        assert_eq!(offset_recorded().height(120., 0., SIZE), Ok(None));
    }

    #[rstest]
    #[case(112., 0., -223.)]
    #[case(100., 0., -250.)]
    #[case(100., -30., -280.)]
    #[case(122.4, -50., -250.)]
    fn height_from_disparity(#[case] disparity: f64, #[case] current_z: f64, #[case] z: f64) {
        let height = calibrated().height(disparity, current_z, SIZE).unwrap().unwrap();
        assert_eq!(height.z, z);
        assert_eq!(height.details.calculated_soil_z, z);
        assert_relative_eq!(height.z_length().get::<millimeter>(), z, epsilon = 1e-9);
    }

    #[test]
    fn positive_direction() {
        let mut state = calibrated().into_state();
        state.direction = Direction::Positive;
        let height = CalibrationSolver::new(state)
            .height(112., 0., SIZE)
            .unwrap()
            .unwrap();

        assert_eq!(height.z, 223.);
        assert_eq!(height.details.measured_soil_z, 250.);
    }

    #[rstest]
    #[case(Shape::new(480, 320))]
    #[case(Shape::new(240, 640))]
    fn image_size_must_match(#[case] actual: Shape) {
        assert_eq!(
            calibrated().height(112., 0., actual),
            Err(CalibrationError::ImageSizeMismatch {
                expected: SIZE,
                actual
            })
        );
    }

    #[test]
    fn line_through_calibration() {
        let (slope, intercept) = calibrated().state().line().unwrap();
        assert_relative_eq!(slope, -2.2321);
        assert_relative_eq!(intercept, 473.21, epsilon = 1e-9);
        assert_eq!(offset_recorded().state().line(), None);
    }

    #[test]
    fn settings_round_trip() {
        let settings = Settings {
            measured_distance: 250.,
            calibration_factor: 2.2321,
            calibration_disparity_offset: 100.,
            calibration_image_width: 640,
            calibration_image_height: 480,
            ..Default::default()
        };
        let state = CalibrationState::from_settings(&settings);
        assert_eq!(state, calibrated().into_state());

        let mut stored = Settings::default();
        state.store(&mut stored);
        assert_eq!(stored, settings);
    }
}
