use super::{ReductionResult, Threshold};
use crate::{field::ScalarField, utils::round_to};
use std::{collections::HashMap, fmt};

/// Number of most frequent sample values listed in a `ContentReport`.
const TOP_VALUE_COUNT: usize = 5;

/// A one-line description of how much usable content a reduced field holds.
#[derive(Clone, Debug, PartialEq)]
pub struct ContentReport {
    pub tag: String,
    pub threshold: Threshold,

    /// Percent of pixels above the threshold.
    pub coverage: f64,
    pub low: f64,
    pub mid: f64,
    pub high: f64,
    pub mid_size_p: f64,

    /// Most frequent integer sample values and the percent of pixels holding each.
    pub top_values: Vec<(i64, f64)>,
}

impl ReductionResult {
    /// Summarizes the reduction of `field` under the name `tag`.
    pub fn report(&self, tag: impl Into<String>, field: &ScalarField) -> ContentReport {
        ContentReport {
            tag: tag.into(),
            threshold: self.threshold,
            coverage: self.stats.thresh_size_p,
            low: self.stats.low,
            mid: self.stats.mid,
            high: self.stats.high,
            mid_size_p: self.stats.mid_size_p,
            top_values: top_values(field),
        }
    }
}

fn top_values(field: &ScalarField) -> Vec<(i64, f64)> {
    let mut counts: HashMap<i64, usize> = HashMap::new();
    field
        .as_slice()
        .iter()
        .filter(|v| v.is_finite())
        .for_each(|v| *counts.entry(v.round() as i64).or_default() += 1);

    let mut counts: Vec<(i64, usize)> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    counts
        .into_iter()
        .take(TOP_VALUE_COUNT)
        .map(|(value, count)| {
            (
                value,
                round_to(count as f64 / field.len() as f64 * 100., 1),
            )
        })
        .collect()
}

impl fmt::Display for ContentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}% > {}, average value: {:.0}, {:.0} < {}% < {:.0}",
            self.tag, self.coverage, self.threshold, self.mid, self.low, self.mid_size_p, self.high
        )
    }
}
