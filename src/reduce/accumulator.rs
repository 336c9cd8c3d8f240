use crate::utils::round_to;
use std::ops::RangeInclusive;

/// Fixed-width histogram over a closed range of sample values.
///
/// Samples outside the range are not counted. A sample on the upper bound
/// falls in the last bin.
pub(super) struct Accumulator {
    resolution: f64,
    range: RangeInclusive<f64>,
    buffer: Vec<u32>,
}

/// A histogram bin described by its left edge.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(super) struct Bin {
    pub left: f64,
    pub width: f64,
    pub count: u32,
}

impl Bin {
    pub fn center(&self) -> f64 {
        self.left + self.width / 2.
    }
}

/// The most and second most populated bins.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(super) struct Peaks {
    pub top: Bin,
    pub runner_up: u32,
}

impl Peaks {
    /// Returns `true` if the top bin outnumbers the runner-up by more than `ratio`.
    pub fn is_dominant(&self, ratio: f64) -> bool {
        self.top.count as f64 > ratio * self.runner_up as f64
    }
}

impl Accumulator {
    /// Creates an accumulator with `bins` equal bins spanning `range`.
    ///
    /// Returns `None` if the range is empty or not finite.
    pub fn new(bins: usize, range: RangeInclusive<f64>) -> Option<Self> {
        let span = range.end() - range.start();
        if bins == 0 || !span.is_finite() || span <= 0. {
            return None;
        }

        Some(Self {
            resolution: span / bins as f64,
            range,
            buffer: vec![0; bins],
        })
    }

    fn value_to_index(&self, value: f64) -> Option<usize> {
        if !self.range.contains(&value) {
            return None;
        }

        let index = ((value - self.range.start()) / self.resolution).floor() as usize;
        Some(index.min(self.buffer.len() - 1))
    }

    fn index_to_value(&self, index: usize) -> f64 {
        index as f64 * self.resolution + self.range.start()
    }

    pub fn vote(&mut self, value: f64) {
        if let Some(index) = self.value_to_index(value) {
            self.buffer[index] += 1;
        }
    }

    /// Returns the two most populated bins, or `None` if no sample was counted.
    ///
    /// Ties go to the bin with the lower edge.
    pub fn into_peaks(self) -> Option<Peaks> {
        let mut order: Vec<usize> = (0..self.buffer.len()).collect();
        order.sort_by(|&a, &b| self.buffer[b].cmp(&self.buffer[a]));

        let first = *order.first()?;
        if self.buffer[first] == 0 {
            return None;
        }

        let runner_up = order.get(1).map_or(0, |&i| self.buffer[i]);
        Some(Peaks {
            top: Bin {
                left: round_to(self.index_to_value(first), 4),
                width: round_to(self.resolution, 4),
                count: self.buffer[first],
            },
            runner_up,
        })
    }
}

impl Extend<f64> for Accumulator {
    fn extend<I: IntoIterator<Item = f64>>(&mut self, iter: I) {
        iter.into_iter().for_each(|value| self.vote(value));
    }
}
