//! Order statistics shared by the reservoir and the bucket aggregator.

use enumset::{EnumSet, EnumSetType};
use serde::{Deserialize, Serialize};

/// Largest percentile that can be requested, meaning the 99.999th percentile.
pub const MAX_PERCENTILE: u32 = 99_999;

/// Optional summary statistics emitted alongside percentiles.
#[derive(Debug, Ord, PartialOrd, Hash, EnumSetType, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    /// Smallest sample, emitted as `<name>.min`.
    Min,
    /// Largest sample, emitted as `<name>.max`.
    Max,
    /// Sample standard deviation, emitted as `<name>.std`.
    Std,
    /// Arithmetic mean, emitted as `<name>.ave`.
    Ave,
}

impl Statistic {
    /// The suffix appended to the metric name.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Std => "std",
            Self::Ave => "ave",
        }
    }

    /// All statistics.
    pub fn all() -> EnumSet<Self> {
        EnumSet::all()
    }
}

/// Returns the divisor that maps `percentile` into the range `(0, 1]`.
///
/// The scale depends on the magnitude: `90` is the 90th percentile, `999` the 99.9th and
/// `9999` the 99.99th.
fn percentile_scale(percentile: u32) -> usize {
    match percentile {
        0..=99 => 100,
        100..=999 => 1_000,
        1_000..=9_999 => 10_000,
        _ => 100_000,
    }
}

/// Returns the index of `percentile` in an ascending sorted sample of length `len`.
///
/// The index is `floor(fraction * len)`. Returns `None` if the sample is too small for the index
/// to lie inside it.
pub fn percentile_index(percentile: u32, len: usize) -> Option<usize> {
    let index = (percentile as usize).saturating_mul(len) / percentile_scale(percentile);
    (index < len).then_some(index)
}

/// Returns `true` if a sample of `len` values is large enough to resolve `percentile`.
///
/// The rounded rank of the percentile must lie strictly below the sample size. With 10 samples,
/// the 99th percentile would round to the 10th rank and is therefore not resolvable.
pub fn is_resolvable(percentile: u32, len: usize) -> bool {
    let scale = percentile_scale(percentile);
    let rank = ((percentile as usize).saturating_mul(len) + scale / 2) / scale;
    rank < len
}

/// Running count, extremes, mean and variance of a sample set.
///
/// Mean and variance are updated incrementally (Welford's algorithm), which stays numerically
/// stable for long runs of similar values.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Summary {
    count: u64,
    min: f64,
    max: f64,
    mean: f64,
    m2: f64,
}

impl Summary {
    /// Adds a sample.
    pub fn insert(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }

        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Number of samples.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Smallest sample, `0` if empty.
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Largest sample, `0` if empty.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Arithmetic mean, `0` if empty.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample standard deviation, `0` with fewer than two samples.
    pub fn std_dev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2 / (self.count - 1) as f64).sqrt()
    }
}

impl FromIterator<f64> for Summary {
    fn from_iter<T: IntoIterator<Item = f64>>(iter: T) -> Self {
        let mut summary = Self::default();
        for value in iter {
            summary.insert(value);
        }
        summary
    }
}
