//! Iterative mean/sigma reduction of a scalar field.
//!
//! A reduction picks the pixels above a threshold, takes their mean and
//! standard deviation, and splits the field into `low`, `mid`, and `high`
//! bands around that mean. Disparity fields are typically bimodal (matched
//! texture versus unmatched background) with heavy tails, so a reduction that
//! is allowed to narrow also snaps onto a dominant histogram peak and, if the
//! spread stays wide, re-centers on the mid band.
//!
//! Every masking pass is recorded in the result's history:
//!
//! ```text
//! Threshold -> [BinRefine] -> [WideSpread -> WideSpreadRefine]
//! ```

mod accumulator;
mod gate;
mod report;

use crate::{
    field::{Mask, ScalarField},
    utils::round_to,
};
use accumulator::Accumulator;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

pub use gate::Gated;
pub use report::ContentReport;

/// Number of histogram bins spanning `[mu - sigma, mu + sigma]` during refinement.
pub const BIN_COUNT: usize = 200;

/// How many times the runner-up bin count the top bin must exceed to be
/// taken as the new center.
pub const PEAK_DOMINANCE: f64 = 2.0;

/// Mid band coverage, in percent, below which a reduction is not trusted.
pub const LOW_CONFIDENCE_PERCENT: f64 = 3.0;

#[derive(Debug, Error, PartialEq)]
pub enum ReduceError {
    #[error("no valid samples above threshold {threshold}")]
    InsufficientSignal { threshold: Threshold },
}

/// Selects the pixels that seed a reduction.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Threshold {
    /// Keep samples strictly above the value and clamp `mu` to at least value + 1.
    Above(f64),
    /// Keep every valid sample. Used for signed data such as flow components.
    Ignore,
}

impl Threshold {
    pub fn value(&self) -> Option<f64> {
        match self {
            Threshold::Above(value) => Some(*value),
            Threshold::Ignore => None,
        }
    }

    fn base_mask(&self, field: &ScalarField) -> Mask {
        match self {
            Threshold::Above(value) => field.above(*value),
            Threshold::Ignore => field.valid(),
        }
    }

    fn clamp(&self, center: f64) -> f64 {
        match self {
            Threshold::Above(value) => center.max(value + 1.),
            Threshold::Ignore => center,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::Above(value) => write!(f, "{value}"),
            Threshold::Ignore => write!(f, "-inf"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReduceOptions {
    pub threshold: Threshold,

    /// Sigma above which a narrowable reduction re-centers on its mid band.
    pub wide_sigma_threshold: f64,

    /// Enables histogram refinement and wide spread correction.
    pub narrowable: bool,
}

impl ReduceOptions {
    pub fn new(threshold: f64, wide_sigma_threshold: f64, narrowable: bool) -> Self {
        Self {
            threshold: Threshold::Above(threshold),
            wide_sigma_threshold,
            narrowable,
        }
    }

    pub fn ignore_threshold() -> Self {
        Self {
            threshold: Threshold::Ignore,
            wide_sigma_threshold: f64::INFINITY,
            narrowable: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Pass {
    Threshold,
    /// Center snapped onto a dominant histogram bin.
    BinRefine,
    /// Mean and sigma recomputed from the previous mid band.
    WideSpread,
    /// Center snapped onto the top histogram bin after a wide spread pass.
    WideSpreadRefine,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Masks {
    pub threshold: Mask,
    pub low: Mask,
    pub mid: Mask,
    pub high: Mask,
}

/// Summary statistics of one masking pass.
///
/// Coverage fields (`*_size_p`) are percentages of the whole field rounded to
/// two decimals.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Stats {
    /// Unclamped center the masks were built around.
    pub center: f64,
    pub mu: f64,
    pub sigma: f64,
    pub low: f64,
    pub mid: f64,
    pub high: f64,
    pub max: f64,
    pub thresh_size_p: f64,
    pub low_size_p: f64,
    pub mid_size_p: f64,
    pub high_size_p: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub pass: Pass,
    pub masks: Masks,
    pub stats: Stats,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReductionResult {
    pub threshold: Threshold,
    pub masks: Masks,
    pub stats: Stats,

    /// Every pass in order. The last entry matches `masks` and `stats`.
    pub history: Vec<Snapshot>,
}

impl ReductionResult {
    pub fn is_confident(&self) -> bool {
        self.stats.mid_size_p >= LOW_CONFIDENCE_PERCENT
    }

    /// The pass preceding the final one, or the final one if there is only one.
    ///
    /// Renderers color the tails of this pass around the final mid band.
    pub fn previous(&self) -> &Snapshot {
        let index = self.history.len().saturating_sub(2);
        &self.history[index]
    }

    pub fn passes(&self) -> impl Iterator<Item = Pass> + '_ {
        self.history.iter().map(|snapshot| snapshot.pass)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reducer {
    options: ReduceOptions,
}

impl Reducer {
    pub fn new(options: ReduceOptions) -> Self {
        Self { options }
    }

    /// Reduces `field` to a `ReductionResult`.
    ///
    /// Returns `ReduceError::InsufficientSignal` if no valid sample passes the threshold.
    pub fn reduce(&self, field: &ScalarField) -> Result<ReductionResult, ReduceError> {
        let threshold = self.options.threshold;
        let base = threshold.base_mask(field);
        let (mean, sigma) = field
            .mean_std(&base)
            .ok_or(ReduceError::InsufficientSignal { threshold })?;

        let mut trace = Trace::new(field, base, threshold);
        let (mut center, mut sigma) = (round_to(mean, 4), round_to(sigma, 4));
        trace.record(Pass::Threshold, center, sigma);

        if !self.options.narrowable {
            return Ok(trace.finish());
        }

        if let Some(peaks) = peaks_within(field, center, sigma) {
            let above_threshold = threshold.value().is_none_or(|t| peaks.top.left > t);
            if above_threshold && peaks.is_dominant(PEAK_DOMINANCE) {
                debug!(
                    top_count = peaks.top.count,
                    runner_up = peaks.runner_up,
                    "narrowing range: prominent bin count"
                );
                (center, sigma) = (peaks.top.center(), peaks.top.width);
                trace.record(Pass::BinRefine, center, sigma);
            }
        }

        if sigma > self.options.wide_sigma_threshold {
            debug!(sigma, "narrowing range: wide deviation");
            let Some((mean, spread)) = field.mean_std(&trace.masks().mid) else {
                warn!("mid band is empty, skipping wide spread correction");
                return Ok(trace.finish());
            };

            (center, sigma) = (round_to(mean, 4), round_to(spread, 4));
            trace.record(Pass::WideSpread, center, sigma);

            if let Some(peaks) = peaks_within(field, center, sigma) {
                (center, sigma) = (peaks.top.center(), peaks.top.width);
                trace.record(Pass::WideSpreadRefine, center, sigma);
            }
        }

        Ok(trace.finish())
    }
}

/// Histogram peaks of the valid samples inside `[center - sigma, center + sigma]`.
fn peaks_within(field: &ScalarField, center: f64, sigma: f64) -> Option<accumulator::Peaks> {
    let mut acc = Accumulator::new(BIN_COUNT, (center - sigma)..=(center + sigma))?;
    acc.extend(field.as_slice().iter().copied());
    acc.into_peaks()
}

/// Accumulates snapshots while a reduction narrows.
struct Trace<'a> {
    field: &'a ScalarField,
    base: Mask,
    threshold: Threshold,
    thresh_size_p: f64,
    max: f64,
    history: Vec<Snapshot>,
}

impl<'a> Trace<'a> {
    fn new(field: &'a ScalarField, base: Mask, threshold: Threshold) -> Self {
        let thresh_size_p = base.coverage();
        let max = field.selected(&base).fold(f64::MIN, f64::max);
        Self {
            field,
            base,
            threshold,
            thresh_size_p,
            max,
            history: Vec::new(),
        }
    }

    fn record(&mut self, pass: Pass, center: f64, sigma: f64) {
        let low = self.field.below(center - sigma);
        let high = self.field.above(center + sigma);
        let mid = &(&self.base & &!&low) & &!&high;

        let mu = self.threshold.clamp(center);
        let stats = Stats {
            center,
            mu,
            sigma,
            low: mu - sigma,
            mid: mu,
            high: mu + sigma,
            max: self.max,
            thresh_size_p: self.thresh_size_p,
            low_size_p: low.coverage(),
            mid_size_p: mid.coverage(),
            high_size_p: high.coverage(),
        };

        debug!(?pass, mu, sigma, mid_size_p = stats.mid_size_p, "reduction pass");

        self.history.push(Snapshot {
            pass,
            masks: Masks {
                threshold: self.base.clone(),
                low,
                mid,
                high,
            },
            stats,
        });
    }

    fn masks(&self) -> &Masks {
        // `record` runs before any caller can ask for masks.
        &self.history[self.history.len() - 1].masks
    }

    fn finish(self) -> ReductionResult {
        let last = self.history[self.history.len() - 1].clone();
        ReductionResult {
            threshold: self.threshold,
            masks: last.masks,
            stats: last.stats,
            history: self.history,
        }
    }
}
