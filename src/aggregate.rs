//! Online statistics over measured intervals.

use serde::Serialize;

use crate::measurement::RawSample;

/// Per-field accumulator used for sums, minimums and maximums.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
struct Fields {
    elapsed_ns: f64,
    cycles: f64,
    instructions: f64,
    branches: f64,
    branch_misses: f64,
}

impl Fields {
    fn splat(v: f64) -> Self {
        Self {
            elapsed_ns: v,
            cycles: v,
            instructions: v,
            branches: v,
            branch_misses: v,
        }
    }

    fn from_sample(s: &RawSample) -> Self {
        Self {
            elapsed_ns: s.elapsed_ns as f64,
            cycles: s.cycles as f64,
            instructions: s.instructions as f64,
            branches: s.branches as f64,
            branch_misses: s.branch_misses as f64,
        }
    }

    fn zip(self, other: Self, op: impl Fn(f64, f64) -> f64) -> Self {
        Self {
            elapsed_ns: op(self.elapsed_ns, other.elapsed_ns),
            cycles: op(self.cycles, other.cycles),
            instructions: op(self.instructions, other.instructions),
            branches: op(self.branches, other.branches),
            branch_misses: op(self.branch_misses, other.branch_misses),
        }
    }

    fn map(self, op: impl Fn(f64) -> f64) -> Self {
        self.zip(self, |a, _| op(a))
    }
}

/// Summary statistics over a sequence of [`RawSample`]s.
///
/// Tracks the sample count, per-field sums, the fastest (minimum) and
/// slowest (maximum) value of every field, and the total wall time spent.
/// Means are computed on read.
///
/// When each sample covers `M` batched calls, [`scale_by`](Self::scale_by)
/// divides sums and extremes by `M` once, after folding, so the accessors
/// report per-call values. [`total_elapsed_ns`](Self::total_elapsed_ns) is
/// not scaled: it is the wall time actually measured.
///
/// An empty aggregate reports NaN means and infinite fastest values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateStatistics {
    count: u64,
    sum: Fields,
    min: Fields,
    max: Fields,
    total_elapsed_ns: f64,
    inner_repeat: u64,
}

impl Default for AggregateStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregateStatistics {
    /// An empty aggregate.
    pub fn new() -> Self {
        Self {
            count: 0,
            sum: Fields::splat(0.0),
            min: Fields::splat(f64::INFINITY),
            max: Fields::splat(0.0),
            total_elapsed_ns: 0.0,
            inner_repeat: 1,
        }
    }

    /// Add one sample.
    #[inline]
    pub fn fold(&mut self, sample: RawSample) {
        let f = Fields::from_sample(&sample);
        self.count += 1;
        self.sum = self.sum.zip(f, |a, b| a + b);
        self.min = self.min.zip(f, f64::min);
        self.max = self.max.zip(f, f64::max);
        self.total_elapsed_ns += f.elapsed_ns;
    }

    /// Combine with another aggregate.
    ///
    /// Associative and commutative. Both sides should have the same inner
    /// repeat factor; the result keeps the larger of the two.
    pub fn merge(&mut self, other: &AggregateStatistics) {
        debug_assert!(
            self.count == 0 || other.count == 0 || self.inner_repeat == other.inner_repeat,
            "merging aggregates with different inner repeat factors"
        );
        self.count += other.count;
        self.sum = self.sum.zip(other.sum, |a, b| a + b);
        self.min = self.min.zip(other.min, f64::min);
        self.max = self.max.zip(other.max, f64::max);
        self.total_elapsed_ns += other.total_elapsed_ns;
        self.inner_repeat = self.inner_repeat.max(other.inner_repeat);
    }

    /// Convert "per batch of `m` calls" into "per call".
    ///
    /// Divides sums, minimums and maximums by `m`; the sample count and
    /// [`total_elapsed_ns`](Self::total_elapsed_ns) are unchanged. Call once,
    /// after all folding.
    pub fn scale_by(&mut self, m: u64) {
        if m <= 1 {
            return;
        }
        let d = m as f64;
        self.sum = self.sum.map(|v| v / d);
        self.min = self.min.map(|v| v / d);
        self.max = self.max.map(|v| v / d);
        self.inner_repeat = self.inner_repeat.saturating_mul(m);
    }

    /// Number of samples folded in.
    pub fn iteration_count(&self) -> u64 {
        self.count
    }

    /// Calls per sample that have been divided out by `scale_by`.
    pub fn inner_repeat_factor(&self) -> u64 {
        self.inner_repeat
    }

    #[inline]
    fn mean(&self, sum: f64) -> f64 {
        sum / self.count as f64
    }

    /// Mean elapsed nanoseconds.
    pub fn elapsed_ns(&self) -> f64 {
        self.mean(self.sum.elapsed_ns)
    }

    /// Mean elapsed seconds.
    pub fn elapsed_sec(&self) -> f64 {
        self.elapsed_ns() / 1e9
    }

    /// Wall time measured across all samples, in nanoseconds.
    pub fn total_elapsed_ns(&self) -> f64 {
        self.total_elapsed_ns
    }

    /// Mean cycles.
    pub fn cycles(&self) -> f64 {
        self.mean(self.sum.cycles)
    }

    /// Mean instructions.
    pub fn instructions(&self) -> f64 {
        self.mean(self.sum.instructions)
    }

    /// Mean branch instructions.
    pub fn branches(&self) -> f64 {
        self.mean(self.sum.branches)
    }

    /// Mean mispredicted branches.
    pub fn branch_misses(&self) -> f64 {
        self.mean(self.sum.branch_misses)
    }

    /// Minimum elapsed nanoseconds.
    pub fn fastest_elapsed_ns(&self) -> f64 {
        self.min.elapsed_ns
    }

    /// Minimum cycles.
    pub fn fastest_cycles(&self) -> f64 {
        self.min.cycles
    }

    /// Minimum instructions.
    pub fn fastest_instructions(&self) -> f64 {
        self.min.instructions
    }

    /// Minimum branch instructions.
    pub fn fastest_branches(&self) -> f64 {
        self.min.branches
    }

    /// Minimum mispredicted branches.
    pub fn fastest_branch_misses(&self) -> f64 {
        self.min.branch_misses
    }

    /// Maximum elapsed nanoseconds.
    pub fn slowest_elapsed_ns(&self) -> f64 {
        self.max.elapsed_ns
    }

    /// Maximum cycles.
    pub fn slowest_cycles(&self) -> f64 {
        self.max.cycles
    }

    /// Mean instructions per cycle, or 0 without cycle counts.
    pub fn instructions_per_cycle(&self) -> f64 {
        if self.sum.cycles > 0.0 {
            self.sum.instructions / self.sum.cycles
        } else {
            0.0
        }
    }

    /// Fraction of branches mispredicted, or 0 without branch counts.
    pub fn branch_miss_rate(&self) -> f64 {
        if self.sum.branches > 0.0 {
            self.sum.branch_misses / self.sum.branches
        } else {
            0.0
        }
    }
}

impl Extend<RawSample> for AggregateStatistics {
    fn extend<I: IntoIterator<Item = RawSample>>(&mut self, iter: I) {
        for sample in iter {
            self.fold(sample);
        }
    }
}

impl FromIterator<RawSample> for AggregateStatistics {
    fn from_iter<I: IntoIterator<Item = RawSample>>(iter: I) -> Self {
        let mut agg = Self::new();
        agg.extend(iter);
        agg
    }
}
