use super::{LOW_CONFIDENCE_PERCENT, ReductionResult};
use crate::field::{Mask, ScalarField};
use tracing::debug;

/// Half width of the band rebuilt around a fallback value.
pub const FALLBACK_BAND: f64 = 1.0;

/// A reduced value that is replaced by a fallback when its mid band is too sparse.
#[derive(Clone, Debug, PartialEq)]
pub struct Gated {
    pub value: f64,

    /// Mid band coverage of the reduction in percent. Zero if the reduction failed.
    pub confidence: f64,
    pub used_fallback: bool,

    /// The mid band, or the band of `band_source` within `FALLBACK_BAND` of the fallback.
    pub mask: Mask,
}

impl Gated {
    /// Substitutes `value` and selects the pixels of `band_source` around it.
    pub fn fallback(band_source: &ScalarField, value: f64, confidence: f64) -> Self {
        Self {
            value,
            confidence,
            used_fallback: true,
            mask: band_source.band(value, FALLBACK_BAND),
        }
    }

    pub fn into_inner(self) -> f64 {
        self.value
    }
}

impl ReductionResult {
    /// Returns `mu` and the mid band if the reduction is confident, otherwise
    /// `fallback` with a band rebuilt from `band_source`.
    pub fn gate(&self, band_source: &ScalarField, fallback: f64) -> Gated {
        let confidence = self.stats.mid_size_p;
        if confidence < LOW_CONFIDENCE_PERCENT {
            debug!(
                confidence,
                rejected = self.stats.mu,
                fallback,
                "low confidence reduction, using fallback"
            );
            return Gated::fallback(band_source, fallback, confidence);
        }

        Gated {
            value: self.stats.mu,
            confidence,
            used_fallback: false,
            mask: self.masks.mid.clone(),
        }
    }
}
