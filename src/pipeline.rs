//! Soil height measurement from repeated disparity captures.

use crate::{
    calibration::{CalibrationSolver, CalibrationState, Height, Phase},
    combine::combine,
    error::Error,
    field::ScalarField,
    reduce::{ReduceError, ReductionResult, Reducer},
    settings::Settings,
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error("measured distance and calibration factor are both unset")]
    MissingMeasuredDistance,
    #[error("expected combined disparity of at least 1 but got: {max:?}")]
    ZeroDisparity { max: Option<f64> },
    #[error("{coverage}% of pixels above threshold, at least {required}% required")]
    InsufficientCoverage { coverage: f64, required: f64 },
}

/// What a measurement did with the calibration state.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// First calibration position: the reduced disparity became the offset.
    OffsetRecorded { disparity_offset: f64 },
    /// Second calibration position: the factor passed its sanity check.
    FactorRecorded(Height),
    Measured(Height),
}

/// Combines, reduces, and calibrates disparity captures.
#[derive(Clone, Debug)]
pub struct HeightPipeline<'a> {
    settings: &'a Settings,
}

impl<'a> HeightPipeline<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Checks that a raw capture has enough pixels above the pixel threshold.
    pub fn check_input(&self, field: &ScalarField) -> Result<ReductionResult, Error> {
        let required = self.settings.input_coverage_threshold;
        let reduction = match Reducer::new(self.settings.reduce_options(false)).reduce(field) {
            Ok(reduction) => reduction,
            Err(ReduceError::InsufficientSignal { .. }) => {
                return Err(PipelineError::InsufficientCoverage {
                    coverage: 0.,
                    required,
                }
                .into());
            }
        };

        let coverage = reduction.stats.thresh_size_p;
        if coverage < required {
            return Err(PipelineError::InsufficientCoverage { coverage, required }.into());
        }

        Ok(reduction)
    }

    /// Measures soil z at `current_z`, advancing `state` through calibration.
    ///
    /// `state` is only updated if the whole measurement succeeds.
    pub fn measure(
        &self,
        captures: &[ScalarField],
        current_z: f64,
        state: &mut CalibrationState,
    ) -> Result<Outcome, Error> {
        if state.measured_distance == 0. && state.calibration_factor == 0. {
            return Err(PipelineError::MissingMeasuredDistance.into());
        }

        let disparity = combine(captures, self.settings.pixel_value_threshold)?;
        let max = disparity.max();
        if max.is_none_or(|max| max < 1.) {
            return Err(PipelineError::ZeroDisparity { max }.into());
        }

        let reduction = Reducer::new(self.settings.reduce_options(true)).reduce(&disparity)?;
        info!("{}", reduction.report("disparity", &disparity));

        let required = self.settings.disparity_coverage_threshold;
        let coverage = reduction.stats.thresh_size_p;
        if coverage < required {
            return Err(PipelineError::InsufficientCoverage { coverage, required }.into());
        }

        let disparity_mid = reduction.stats.mid;
        let mut solver = CalibrationSolver::new(state.clone());
        let outcome = if let Some(height) = solver.height(disparity_mid, current_z, disparity.shape())? {
            Outcome::Measured(height)
        } else if solver.phase() == Phase::NeedsOffset {
            solver.record_offset(disparity_mid, current_z, disparity.shape())?;
            Outcome::OffsetRecorded {
                disparity_offset: disparity_mid,
            }
        } else {
            Outcome::FactorRecorded(solver.record_factor(
                disparity_mid,
                current_z,
                disparity.shape(),
            )?)
        };

        debug!(?outcome, "measurement complete");
        *state = solver.into_state();

        Ok(outcome)
    }
}
