//! Robust disparity reduction and two-point calibration for stereo soil height measurement.
//!
//! A stereo block matcher or optical flow library produces a 2-D field of
//! per-pixel samples. This crate reduces such a field to one trustworthy
//! value, calibrates reduced disparities against two known camera positions,
//! and resolves the camera rotation from an optical flow field.

pub mod angle;
pub mod calibration;
pub mod combine;
pub mod error;
pub mod field;
pub mod pipeline;
pub mod reduce;
pub mod settings;

mod utils;

pub use error::Error;

pub mod prelude {
    pub use crate::{
        angle::{AngleResolver, AngleState, flow_disparity},
        calibration::{CalibrationSolver, CalibrationState, Direction, Height, Phase},
        combine::combine,
        error::Error,
        field::{Mask, ScalarField, Shape},
        pipeline::{HeightPipeline, Outcome},
        reduce::{Gated, ReduceOptions, Reducer, ReductionResult, Threshold},
        settings::Settings,
    };
}
