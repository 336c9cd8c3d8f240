use crate::{
    angle::AngleError, calibration::CalibrationError, combine::CombineError, field::FieldError,
    pipeline::PipelineError, reduce::ReduceError,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error(transparent)]
    Reduce(#[from] ReduceError),
    #[error(transparent)]
    Angle(#[from] AngleError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Combine(#[from] CombineError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}
