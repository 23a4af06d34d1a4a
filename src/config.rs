//! Configuration for the calibrated benchmark loop.

use serde::{Deserialize, Serialize};

use crate::bench::InnerRepeat;
use crate::error::{BenchError, Result};
use crate::measurement::BackendSpec;

/// Knobs controlling how many times the benchmarked callable is repeated.
///
/// The loop repeats work on two levels:
/// - Outer repeats (`min_outer_repeat` / `max_outer_repeat`): the number of
///   independent measured intervals. The count grows tenfold while the total
///   measured time is below `min_warmup_time_ns`.
/// - Inner repeats (`max_inner_repeat` / `min_inner_time_ns`): calls batched
///   inside one interval when a single call is too fast to time reliably.
///   Results are divided by the inner factor so they read "per call".
///
/// Every field has a default; override only what you need.
///
/// ```
/// use counters_bench::BenchmarkConfig;
///
/// let config = BenchmarkConfig::default()
///     .min_outer_repeat(20)
///     .min_warmup_time_ns(50_000_000);
/// assert_eq!(config.max_outer_repeat, 1_000_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Starting number of outer intervals (default: 10). Zero is treated as 1.
    pub min_outer_repeat: u64,

    /// Minimum total measured time per pass in nanoseconds (default: 0.4 s).
    pub min_warmup_time_ns: u64,

    /// Upper bound on outer intervals per pass (default: 1,000,000).
    pub max_outer_repeat: u64,

    /// Largest inner repeat factor the sizing phase may pick (default: 10,000).
    ///
    /// Must be one of 1, 10, 100, 1000, 10000.
    pub max_inner_repeat: u64,

    /// Minimum duration of one interval before batching stops growing
    /// (default: 2,000 ns).
    pub min_inner_time_ns: u64,

    /// How the inner repeat factor is chosen (default: `Auto`).
    pub inner_repeat: InnerRepeatPolicy,

    /// Which counter backend the thread-local collector uses (default: `Auto`).
    ///
    /// Changing it between runs reopens that thread's collector.
    pub backend: BackendSpec,
}

/// How the inner repeat factor is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InnerRepeatPolicy {
    /// Grow by powers of ten until one interval lasts `min_inner_time_ns`.
    #[default]
    Auto,

    /// Use exactly this factor. Must be one of 1, 10, 100, 1000, 10000.
    Fixed(u64),
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            min_outer_repeat: 10,
            min_warmup_time_ns: 400_000_000,
            max_outer_repeat: 1_000_000,
            max_inner_repeat: 10_000,
            min_inner_time_ns: 2_000,
            inner_repeat: InnerRepeatPolicy::Auto,
            backend: BackendSpec::Auto,
        }
    }
}

impl BenchmarkConfig {
    /// Configuration for fast runs (tests, smoke checks).
    ///
    /// Settings:
    /// - 10 ms minimum time per pass (vs 400 ms default)
    /// - 100,000 maximum outer intervals (vs 1,000,000 default)
    pub fn quick() -> Self {
        Self {
            min_warmup_time_ns: 10_000_000,
            max_outer_repeat: 100_000,
            ..Self::default()
        }
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    ///
    /// ```
    /// use counters_bench::BenchmarkConfig;
    ///
    /// let config = BenchmarkConfig::from_json_str(r#"{ "min_outer_repeat": 3 }"#).unwrap();
    /// assert_eq!(config.min_outer_repeat, 3);
    /// assert_eq!(config.min_warmup_time_ns, 400_000_000);
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the starting number of outer intervals.
    pub fn min_outer_repeat(mut self, n: u64) -> Self {
        self.min_outer_repeat = n;
        self
    }

    /// Set the minimum measured time per pass in nanoseconds.
    pub fn min_warmup_time_ns(mut self, ns: u64) -> Self {
        self.min_warmup_time_ns = ns;
        self
    }

    /// Set the upper bound on outer intervals.
    pub fn max_outer_repeat(mut self, n: u64) -> Self {
        self.max_outer_repeat = n;
        self
    }

    /// Set the largest inner repeat factor the sizing phase may pick.
    pub fn max_inner_repeat(mut self, m: u64) -> Self {
        self.max_inner_repeat = m;
        self
    }

    /// Set the minimum interval duration targeted by inner sizing.
    pub fn min_inner_time_ns(mut self, ns: u64) -> Self {
        self.min_inner_time_ns = ns;
        self
    }

    /// Pin the inner repeat factor, skipping the sizing phase.
    pub fn fixed_inner_repeat(mut self, m: u64) -> Self {
        self.inner_repeat = InnerRepeatPolicy::Fixed(m);
        self
    }

    /// Select the counter backend.
    pub fn backend(mut self, spec: BackendSpec) -> Self {
        self.backend = spec;
        self
    }

    /// Starting outer count with zero coerced to one.
    pub fn effective_min_outer_repeat(&self) -> u64 {
        self.min_outer_repeat.max(1)
    }

    /// Check the configuration for contradictions.
    ///
    /// # Errors
    ///
    /// - [`BenchError::UnsupportedInnerRepeat`] if `max_inner_repeat` or a
    ///   fixed factor is not a supported round value.
    /// - [`BenchError::InvalidConfig`] if `min_outer_repeat` (after coercing
    ///   zero to one) exceeds `max_outer_repeat`.
    pub fn validate(&self) -> Result<()> {
        InnerRepeat::try_from(self.max_inner_repeat)?;
        if let InnerRepeatPolicy::Fixed(m) = self.inner_repeat {
            InnerRepeat::try_from(m)?;
        }
        if self.effective_min_outer_repeat() > self.max_outer_repeat {
            return Err(BenchError::InvalidConfig(format!(
                "min_outer_repeat ({}) exceeds max_outer_repeat ({})",
                self.effective_min_outer_repeat(),
                self.max_outer_repeat
            )));
        }
        Ok(())
    }
}
