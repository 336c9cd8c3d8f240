//! Camera rotation from an optical flow field.
//!
//! Between the two captures of a stereo pair the camera travels along one
//! axis, so every tracked pixel moves in roughly the same direction. The
//! per-pixel flow direction only determines the camera rotation up to a
//! quarter turn. A representative displacement vector, rotated by the
//! candidate angle, resolves the remaining ambiguity: the resolved angle is
//! the one that maps the displacement onto the negative x axis.

use crate::{
    field::{Mask, ScalarField, Shape},
    reduce::{Gated, ReduceOptions, Reducer},
    settings::Settings,
    utils::round_to,
};
use nalgebra::{Rotation2, Vector2};
use rayon::join;
use thiserror::Error;
use tracing::debug;
use uom::si::{angle::degree, f64::Angle};

/// Per-pixel angles above this many degrees are treated as zero.
pub const MAX_PIXEL_ANGLE_DEG: f64 = 89.0;

/// Flow components with a smaller magnitude are ignored.
pub const MIN_FLOW_COMPONENT: f64 = 0.5;

/// Reduced flow components with at most this magnitude count as no motion.
pub const DELTA_DEAD_BAND: f64 = 1.0;

/// Fixed point scale of block matcher disparities.
pub const DISPARITY_SCALE: f64 = 16.0;

#[derive(Debug, Error, PartialEq)]
pub enum AngleError {
    #[error("flow components differ in shape: dx is {dx:?} but dy is {dy:?}")]
    ShapeMismatch { dx: Shape, dy: Shape },
}

#[derive(Clone, Debug, PartialEq)]
pub struct AngleState {
    /// Resolved rotation in (-180, 180] degrees.
    pub angle: Angle,

    /// Per-pixel estimate in [0, 90) degrees before the quadrant was resolved.
    pub estimate: Angle,

    /// Pixels whose flow direction agrees with the estimate.
    pub mask: Mask,

    pub confidence: f64,
    pub used_fallback: bool,

    /// Representative flow displacement `(dx, dy)`.
    pub delta: Vector2<f64>,
}

impl AngleState {
    pub fn degrees(&self) -> f64 {
        self.angle.get::<degree>()
    }

    /// Compares the resolved angle with the configured capture rotation.
    ///
    /// `adjustment` is the previously stored calibration rotation adjustment,
    /// zero if none was stored.
    pub fn compare_with(&self, rotation: f64, adjustment: f64) -> RotationCheck {
        let provided = rotation + adjustment;
        let angle = round_to(self.degrees(), 1);
        let differs = (angle - provided).abs() > 0.1;
        if differs {
            debug!(angle, provided, "using resolved camera angle");
        }

        RotationCheck {
            angle,
            provided,
            differs,
            adjustment: (adjustment == 0.).then_some(rotation - angle),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RotationCheck {
    /// Resolved angle rounded to a tenth of a degree.
    pub angle: f64,
    pub provided: f64,
    pub differs: bool,

    /// Adjustment to store, if none was stored yet.
    pub adjustment: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AngleResolver {
    pixel_value_threshold: f64,
}

impl AngleResolver {
    pub fn new(pixel_value_threshold: f64) -> Self {
        Self {
            pixel_value_threshold,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.pixel_value_threshold)
    }

    /// Resolves the rotation of the flow field `(dx, dy)`.
    ///
    /// Ambiguous or empty flow never fails. It resolves to an angle of zero.
    pub fn resolve(&self, dx: &ScalarField, dy: &ScalarField) -> Result<AngleState, AngleError> {
        check_shapes(dx, dy)?;

        let raw = raw_angles(dx, dy);
        let folded = raw.par_map(fold_angle);
        let options = ReduceOptions::new(self.pixel_value_threshold, f64::INFINITY, false);
        let coarse = match Reducer::new(options).reduce(&folded) {
            Ok(result) => result.gate(&raw, 0.),
            Err(err) => {
                debug!(%err, "no usable flow angles, using 0");
                Gated::fallback(&raw, 0., 0.)
            }
        };

        let (dx_mid, dy_mid) = join(
            || reduce_component(dx, &coarse.mask),
            || reduce_component(dy, &coarse.mask),
        );
        let delta = Vector2::new(dx_mid, dy_mid);

        let mut angle = coarse.value;
        let mut rotated = rotate(&delta, angle);
        if rotated.y.abs() > rotated.x.abs() {
            angle += 90.;
            rotated = rotate(&delta, angle);
        }

        if rotated.x > 0. {
            angle += 180.;
            rotated = rotate(&delta, angle);
        }

        debug!(
            estimate = coarse.value,
            angle,
            dx = delta.x,
            dy = delta.y,
            rotated_dx = rotated.x,
            rotated_dy = rotated.y,
            "resolved flow rotation"
        );

        if angle > 180. {
            angle -= 360.;
        }

        Ok(AngleState {
            angle: Angle::new::<degree>(angle),
            estimate: Angle::new::<degree>(coarse.value),
            mask: coarse.mask,
            confidence: coarse.confidence,
            used_fallback: coarse.used_fallback,
            delta,
        })
    }
}

/// Converts flow magnitude into a block matcher style disparity field.
pub fn flow_disparity(dx: &ScalarField, dy: &ScalarField) -> Result<ScalarField, AngleError> {
    check_shapes(dx, dy)?;
    Ok(zip_fields(dx, dy, |x, y| {
        (x.hypot(y) * DISPARITY_SCALE).trunc()
    }))
}

fn check_shapes(dx: &ScalarField, dy: &ScalarField) -> Result<(), AngleError> {
    if dx.shape() != dy.shape() {
        return Err(AngleError::ShapeMismatch {
            dx: dx.shape(),
            dy: dy.shape(),
        });
    }

    Ok(())
}

fn zip_fields<F>(a: &ScalarField, b: &ScalarField, f: F) -> ScalarField
where
    F: Fn(f64, f64) -> f64 + Send + Sync,
{
    use rayon::prelude::*;

    let values = a
        .as_slice()
        .par_iter()
        .zip(b.as_slice().par_iter())
        .map(|(&x, &y)| f(x, y))
        .collect();
    ScalarField::from_parts(a.shape(), values)
}

/// Per-pixel flow direction `atan(dx / dy)` in degrees, invalid where `dy` is zero.
fn raw_angles(dx: &ScalarField, dy: &ScalarField) -> ScalarField {
    zip_fields(dx, dy, |x, y| match y == 0. {
        true => f64::NAN,
        false => (x / y).atan().to_degrees(),
    })
}

fn fold_angle(angle: f64) -> f64 {
    if angle > MAX_PIXEL_ANGLE_DEG {
        0.
    } else if angle < 0. {
        angle + 90.
    } else {
        angle
    }
}

/// Reduces one flow component over `mask`, ignoring small motion.
fn reduce_component(component: &ScalarField, mask: &Mask) -> f64 {
    let values = component.masked(mask).par_map(|v| match v.abs() < MIN_FLOW_COMPONENT {
        true => f64::NAN,
        false => v,
    });

    let value = match Reducer::new(ReduceOptions::ignore_threshold()).reduce(&values) {
        Ok(result) => result.gate(&values, 0.).into_inner(),
        Err(_) => 0.,
    };

    match value.abs() <= DELTA_DEAD_BAND {
        true => 0.,
        false => value,
    }
}

/// Rotates `delta` by `angle` degrees with y pointing down the image.
fn rotate(delta: &Vector2<f64>, angle: f64) -> Vector2<f64> {
    Rotation2::new(angle.to_radians()) * delta
}
