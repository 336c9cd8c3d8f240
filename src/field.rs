use crate::utils::round_to;
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::ops::{BitAnd, Not};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FieldError {
    #[error("expected {expected} values for a {rows}x{cols} field but got: {actual}")]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        expected: usize,
        actual: usize,
    },
    #[error("a field must hold at least one value")]
    Empty,
}

/// Dimensions of a field in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Shape {
    rows: usize,
    cols: usize,
}

impl Shape {
    pub const fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Creates a `Shape` from image style `width` and `height`.
    pub const fn from_size(width: usize, height: usize) -> Self {
        Self::new(height, width)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn width(&self) -> usize {
        self.cols
    }

    pub fn height(&self) -> usize {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A 2-D array of scalar samples such as disparity, intensity, or angle.
///
/// Samples are stored row by row.
/// A `NaN` sample marks an invalid pixel and never passes a threshold test.
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarField {
    shape: Shape,
    values: Vec<f64>,
}

impl ScalarField {
    /// Creates a field from row-major `values`.
    ///
    /// Infinite samples are stored as `NaN`. Returns an error if `values` does
    /// not hold exactly `rows * cols` samples or if the field would be empty.
    pub fn new(rows: usize, cols: usize, mut values: Vec<f64>) -> Result<Self, FieldError> {
        let shape = Shape::new(rows, cols);
        if shape.is_empty() {
            return Err(FieldError::Empty);
        }

        if shape.len() != values.len() {
            return Err(FieldError::ShapeMismatch {
                rows,
                cols,
                expected: shape.len(),
                actual: values.len(),
            });
        }

        values.par_iter_mut().for_each(invalidate_infinite);
        Ok(Self { shape, values })
    }

    /// Creates a field whose `values` are known to match `shape`.
    pub(crate) fn from_parts(shape: Shape, mut values: Vec<f64>) -> Self {
        debug_assert_eq!(shape.len(), values.len());
        values.par_iter_mut().for_each(invalidate_infinite);
        Self { shape, values }
    }

    /// Creates a field from any numeric samples that widen losslessly to `f64`.
    ///
    /// Block matchers typically hand back `i16` disparities scaled by 16.
    pub fn from_values<T>(rows: usize, cols: usize, values: &[T]) -> Result<Self, FieldError>
    where
        T: Copy + Into<f64>,
    {
        Self::new(rows, cols, values.iter().map(|&v| v.into()).collect())
    }

    pub fn filled(rows: usize, cols: usize, value: f64) -> Result<Self, FieldError> {
        Self::new(rows, cols, vec![value; rows * cols])
    }

    pub fn from_fn<F>(rows: usize, cols: usize, f: F) -> Result<Self, FieldError>
    where
        F: Fn(usize, usize) -> f64,
    {
        let values = (0..rows)
            .flat_map(|row| (0..cols).map(move |col| (row, col)))
            .map(|(row, col)| f(row, col))
            .collect();
        Self::new(rows, cols, values)
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.shape.rows || col >= self.shape.cols {
            return None;
        }

        self.values.get(row * self.shape.cols + col).copied()
    }

    pub fn as_slice(&self) -> &[f64] {
        self.values.as_slice()
    }

    pub fn par_map<F>(&self, f: F) -> Self
    where
        F: Fn(f64) -> f64 + Send + Sync,
    {
        Self::from_parts(self.shape, self.values.par_iter().map(|&v| f(v)).collect())
    }

    /// Returns a copy of the field with every pixel outside `mask` invalidated.
    ///
    /// Panics if `mask` does not match the shape of the field.
    pub fn masked(&self, mask: &Mask) -> Self {
        assert_eq!(self.shape, mask.shape(), "mask shape must match field");
        Self {
            shape: self.shape,
            values: self
                .values
                .par_iter()
                .zip(mask.bits.par_iter())
                .map(|(&v, &keep)| if keep { v } else { f64::NAN })
                .collect(),
        }
    }

    pub fn valid(&self) -> Mask {
        self.mask_where(|v| v.is_finite())
    }

    pub fn above(&self, threshold: f64) -> Mask {
        self.mask_where(|v| v > threshold)
    }

    pub fn below(&self, threshold: f64) -> Mask {
        self.mask_where(|v| v < threshold)
    }

    /// Pixels inside the open interval `(center - half_width, center + half_width)`.
    pub fn band(&self, center: f64, half_width: f64) -> Mask {
        self.mask_where(|v| v > center - half_width && v < center + half_width)
    }

    pub fn mask_where<P>(&self, pred: P) -> Mask
    where
        P: Fn(f64) -> bool + Send + Sync,
    {
        Mask {
            shape: self.shape,
            bits: self.values.par_iter().map(|&v| pred(v)).collect(),
        }
    }

    pub fn selected<'a>(&'a self, mask: &'a Mask) -> impl Iterator<Item = f64> + 'a {
        self.values
            .iter()
            .zip(mask.bits.iter())
            .filter(|&(v, &keep)| keep && v.is_finite())
            .map(|(&v, _)| v)
    }

    /// Mean and population standard deviation of the samples selected by `mask`.
    ///
    /// Returns `None` if `mask` selects no valid sample.
    pub fn mean_std(&self, mask: &Mask) -> Option<(f64, f64)> {
        let (count, sum) = self
            .selected(mask)
            .fold((0usize, 0.0f64), |(count, sum), v| (count + 1, sum + v));
        if count == 0 {
            return None;
        }

        let mean = sum / count as f64;
        let variance = self
            .selected(mask)
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / count as f64;

        Some((mean, variance.sqrt()))
    }

    /// Largest valid sample, or `None` if every pixel is invalid.
    pub fn max(&self) -> Option<f64> {
        self.values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .reduce(f64::max)
    }

    pub fn min(&self) -> Option<f64> {
        self.values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .reduce(f64::min)
    }
}

#[cfg(feature = "image")]
macro_rules! impl_try_from_luma {
    ($($t:ty),*) => {$(
        impl<C> TryFrom<&image::ImageBuffer<image::Luma<$t>, C>> for ScalarField
        where
            C: std::ops::Deref<Target = [$t]>,
        {
            type Error = FieldError;

            fn try_from(buffer: &image::ImageBuffer<image::Luma<$t>, C>) -> Result<Self, Self::Error> {
                let (width, height) = buffer.dimensions();
                Self::from_values(height as usize, width as usize, buffer.as_raw())
            }
        }
    )*};
}

#[cfg(feature = "image")]
impl_try_from_luma!(u8, u16, f32);

/// `NaN` is the only invalid sample, so infinities are folded into it.
fn invalidate_infinite(value: &mut f64) {
    if value.is_infinite() {
        *value = f64::NAN;
    }
}

/// A boolean selection over the pixels of a `ScalarField`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mask {
    shape: Shape,
    bits: Vec<bool>,
}

impl Mask {
    pub fn full(shape: Shape) -> Self {
        Self {
            shape,
            bits: vec![true; shape.len()],
        }
    }

    pub fn empty(shape: Shape) -> Self {
        Self {
            shape,
            bits: vec![false; shape.len()],
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn as_slice(&self) -> &[bool] {
        self.bits.as_slice()
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&bit| bit).count()
    }

    /// Percentage of pixels selected, rounded to two decimals.
    pub fn coverage(&self) -> f64 {
        round_to(self.count() as f64 / self.bits.len() as f64 * 100., 2)
    }

    pub fn is_disjoint(&self, other: &Mask) -> bool {
        !self
            .bits
            .iter()
            .zip(other.bits.iter())
            .any(|(&a, &b)| a && b)
    }

    fn zip_with<F>(&self, other: &Mask, f: F) -> Mask
    where
        F: Fn(bool, bool) -> bool + Send + Sync,
    {
        assert_eq!(self.shape, other.shape, "mask shapes must match");
        Mask {
            shape: self.shape,
            bits: self
                .bits
                .par_iter()
                .zip(other.bits.par_iter())
                .map(|(&a, &b)| f(a, b))
                .collect(),
        }
    }
}

impl BitAnd for &Mask {
    type Output = Mask;

    fn bitand(self, other: Self) -> Self::Output {
        self.zip_with(other, |a, b| a && b)
    }
}

impl Not for &Mask {
    type Output = Mask;

    fn not(self) -> Self::Output {
        Mask {
            shape: self.shape,
            bits: self.bits.iter().map(|&bit| !bit).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    #[rstest]
    #[case(2, 2, 3)]
    #[case(1, 5, 4)]
    fn reject_mismatched_shape(#[case] rows: usize, #[case] cols: usize, #[case] len: usize) {
        assert!(matches!(
            ScalarField::new(rows, cols, vec![0.0; len]),
            Err(FieldError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn reject_empty_field() {
        assert_eq!(ScalarField::new(0, 3, vec![]), Err(FieldError::Empty));
    }

    #[test]
    fn infinite_samples_are_invalid() {
        let values = vec![f64::INFINITY, 50., 50., f64::NEG_INFINITY];
        let field = ScalarField::new(1, 4, values).unwrap();

        assert_eq!(field.valid().count(), 2);
        assert_eq!(field.above(1.).coverage(), 50.);
        assert_eq!(field.max(), Some(50.));

        let doubled = field.par_map(|v| v * f64::MAX);
        assert_eq!(doubled.valid().count(), 0);
    }

    #[test]
    fn nan_never_passes_threshold() {
        let field = ScalarField::new(1, 3, vec![f64::NAN, 2.0, 0.5]).unwrap();
        assert_eq!(field.above(1.0).as_slice(), &[false, true, false]);
        assert_eq!(field.below(1.0).as_slice(), &[false, false, true]);
        assert_eq!(field.valid().count(), 2);
    }

    #[test]
    fn population_statistics() {
        let field = ScalarField::new(2, 2, vec![2.0, 4.0, 4.0, f64::NAN]).unwrap();
        let (mean, std) = field.mean_std(&Mask::full(field.shape())).unwrap();
        assert_relative_eq!(mean, 10.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(std, (8.0f64 / 9.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn statistics_of_nothing() {
        let field = ScalarField::filled(2, 2, 1.0).unwrap();
        assert_eq!(field.mean_std(&Mask::empty(field.shape())), None);
    }

    #[test]
    fn coverage_is_rounded_percent() {
        let field = ScalarField::new(1, 3, vec![1.0, 0.0, 0.0]).unwrap();
        assert_eq!(field.above(0.5).coverage(), 33.33);
    }

    #[test]
    fn mask_algebra() {
        let field = ScalarField::new(1, 4, vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        let low = field.below(1.5);
        let high = field.above(0.5);
        assert_eq!((&low & &high).as_slice(), &[false, true, false, false]);
        assert_eq!((!&low).as_slice(), &[false, false, true, true]);
        assert!(low.is_disjoint(&field.above(1.5)));
    }

    #[test]
    fn masked_invalidates_outside() {
        let field = ScalarField::new(1, 2, vec![5.0, 6.0]).unwrap();
        let masked = field.masked(&field.above(5.5));
        assert!(masked.as_slice()[0].is_nan());
        assert_eq!(masked.as_slice()[1], 6.0);
    }

    #[test]
    fn from_fn_is_row_major() {
        let field = ScalarField::from_fn(2, 3, |row, col| (row * 10 + col) as f64).unwrap();
        assert_eq!(field.get(1, 2), Some(12.0));
        assert_eq!(field.get(2, 0), None);
        assert_eq!(field.shape().width(), 3);
    }

    #[test]
    fn widen_block_matcher_output() {
        let field = ScalarField::from_values(1, 3, &[-16i16, 0, 1792]).unwrap();
        assert_eq!(field.as_slice(), &[-16.0, 0.0, 1792.0]);
        assert_eq!(field.max(), Some(1792.0));
        assert_eq!(field.min(), Some(-16.0));
    }

    #[cfg(feature = "image")]
    #[test]
    fn from_luma_image() {
        let image = image::GrayImage::from_fn(4, 2, |x, y| image::Luma([(x + y * 4) as u8]));
        let field = ScalarField::try_from(&image).unwrap();
        assert_eq!(field.shape(), Shape::from_size(4, 2));
        assert_eq!(field.get(1, 0), Some(4.0));
    }
}
