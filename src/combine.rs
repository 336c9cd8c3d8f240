use crate::field::{ScalarField, Shape};
use rayon::prelude::*;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CombineError {
    #[error("at least one disparity field is required")]
    NoFields,
    #[error("expected every field to be {expected:?} but got: {actual:?}")]
    ShapeMismatch { expected: Shape, actual: Shape },
}

/// Merges disparity fields from repeated captures into one field.
///
/// The first field is the base. Each later field fills in the pixels of the
/// running result that are still below `threshold` or invalid.
pub fn combine(fields: &[ScalarField], threshold: f64) -> Result<ScalarField, CombineError> {
    let (first, rest) = fields.split_first().ok_or(CombineError::NoFields)?;
    let expected = first.shape();
    if let Some(other) = rest.iter().find(|field| field.shape() != expected) {
        return Err(CombineError::ShapeMismatch {
            expected,
            actual: other.shape(),
        });
    }

    let mut combined = first.as_slice().to_vec();
    for field in rest {
        combined
            .par_iter_mut()
            .zip(field.as_slice().par_iter())
            .filter(|(current, _)| current.is_nan() || **current < threshold)
            .for_each(|(current, &computed)| *current = computed);
    }

    Ok(ScalarField::from_parts(expected, combined))
}
