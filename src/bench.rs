//! The calibrated benchmark loop.
//!
//! Two calibration phases run before a result is returned:
//!
//! 1. **Inner repeat sizing.** A single call is often far shorter than the
//!    overhead of reading counters. The callable is batched `M` times inside
//!    one interval, with `M` growing by powers of ten (1, 10, ... 10000) until
//!    one interval lasts at least `min_inner_time_ns`.
//! 2. **Outer warm-up and measurement.** `N` intervals of `M` calls are
//!    folded into an aggregate. While the aggregate's total time is below
//!    `min_warmup_time_ns`, `N` grows tenfold and the run continues. The
//!    first pass is discarded as warm-up; the second starts from the
//!    warm-up's final `N` and is returned, divided by `M`.

use std::cell::Cell;
use std::hint::black_box;

use tracing::{debug, trace};

use crate::aggregate::AggregateStatistics;
use crate::config::{BenchmarkConfig, InnerRepeatPolicy};
use crate::error::{BenchError, Result};
use crate::measurement::{BackendSpec, EventCollector, RawSample};

/// Number of calls batched inside one measured interval.
///
/// Restricted to powers of ten so each factor has its own unrolled path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InnerRepeat {
    /// 1 call per interval.
    One,
    /// 10 calls per interval.
    Ten,
    /// 100 calls per interval.
    Hundred,
    /// 1,000 calls per interval.
    Thousand,
    /// 10,000 calls per interval.
    TenThousand,
}

impl InnerRepeat {
    /// Every supported factor, ascending.
    pub const ALL: [InnerRepeat; 5] = [
        InnerRepeat::One,
        InnerRepeat::Ten,
        InnerRepeat::Hundred,
        InnerRepeat::Thousand,
        InnerRepeat::TenThousand,
    ];

    /// The factor as a number.
    pub const fn get(self) -> u64 {
        match self {
            InnerRepeat::One => 1,
            InnerRepeat::Ten => 10,
            InnerRepeat::Hundred => 100,
            InnerRepeat::Thousand => 1_000,
            InnerRepeat::TenThousand => 10_000,
        }
    }

    /// The next factor up, if any.
    pub const fn next(self) -> Option<InnerRepeat> {
        match self {
            InnerRepeat::One => Some(InnerRepeat::Ten),
            InnerRepeat::Ten => Some(InnerRepeat::Hundred),
            InnerRepeat::Hundred => Some(InnerRepeat::Thousand),
            InnerRepeat::Thousand => Some(InnerRepeat::TenThousand),
            InnerRepeat::TenThousand => None,
        }
    }

    /// Call `f` exactly `self.get()` times.
    #[inline]
    pub fn run<F, T>(self, f: &mut F)
    where
        F: FnMut() -> T,
    {
        match self {
            InnerRepeat::One => call_unrolled::<1, _, _>(f),
            InnerRepeat::Ten => call_unrolled::<10, _, _>(f),
            InnerRepeat::Hundred => call_unrolled::<100, _, _>(f),
            InnerRepeat::Thousand => call_unrolled::<1_000, _, _>(f),
            InnerRepeat::TenThousand => call_unrolled::<10_000, _, _>(f),
        }
    }
}

impl TryFrom<u64> for InnerRepeat {
    type Error = BenchError;

    fn try_from(m: u64) -> Result<Self> {
        InnerRepeat::ALL
            .into_iter()
            .find(|r| r.get() == m)
            .ok_or(BenchError::UnsupportedInnerRepeat(m))
    }
}

impl std::fmt::Display for InnerRepeat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.get())
    }
}

// The trip count is a constant, leaving unrolling to the optimizer.
#[inline(always)]
fn call_unrolled<const N: usize, F, T>(f: &mut F)
where
    F: FnMut() -> T,
{
    for _ in 0..N {
        black_box(f());
    }
}

/// Pick the inner repeat factor.
///
/// `measure(m)` must run one interval of `m` calls and return its elapsed
/// nanoseconds. Starting from 1, the factor grows tenfold until an interval
/// reaches `min_inner_time_ns` or the factor reaches `max`. The factor `max`
/// itself is never measured.
pub fn size_inner_repeat<M>(
    max: InnerRepeat,
    min_inner_time_ns: u64,
    mut measure: M,
) -> InnerRepeat
where
    M: FnMut(InnerRepeat) -> u64,
{
    let mut m = InnerRepeat::One;
    while m < max {
        let elapsed_ns = measure(m);
        trace!(inner_repeat = m.get(), elapsed_ns, "inner sizing interval");
        if elapsed_ns >= min_inner_time_ns {
            return m;
        }
        match m.next() {
            Some(next) => m = next,
            None => break,
        }
    }
    max
}

/// Limits for one outer pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OuterBounds {
    /// Starting interval count (at least 1).
    pub min_repeat: u64,
    /// Interval count cap.
    pub max_repeat: u64,
    /// Total time a pass should reach before it stops growing.
    pub min_time_ns: u64,
}

impl From<&BenchmarkConfig> for OuterBounds {
    fn from(config: &BenchmarkConfig) -> Self {
        Self {
            min_repeat: config.effective_min_outer_repeat(),
            max_repeat: config.max_outer_repeat.max(1),
            min_time_ns: config.min_warmup_time_ns,
        }
    }
}

/// Run one outer pass starting at `start_repeat` intervals.
///
/// After the last planned interval, if the total elapsed time is still below
/// `bounds.min_time_ns` and the count is below the cap, the count grows
/// tenfold (clamped to the cap) and the same run continues. Returns the
/// aggregate and the final interval count, which always equals the
/// aggregate's `iteration_count()`.
pub fn run_outer_pass<I>(
    start_repeat: u64,
    bounds: &OuterBounds,
    mut interval: I,
) -> (AggregateStatistics, u64)
where
    I: FnMut() -> RawSample,
{
    let max = bounds.max_repeat.max(1);
    let mut n = start_repeat.clamp(bounds.min_repeat.max(1).min(max), max);
    let mut done = 0u64;
    let mut aggregate = AggregateStatistics::new();
    while done < n {
        aggregate.fold(interval());
        done += 1;
        if done == n && aggregate.total_elapsed_ns() < bounds.min_time_ns as f64 && n < max {
            n = n.saturating_mul(10).min(max);
            trace!(
                outer_repeat = n,
                total_ns = aggregate.total_elapsed_ns(),
                "extending pass"
            );
        }
    }
    (aggregate, n)
}

/// Run the warm-up pass, then the measurement pass.
///
/// Returns the warm-up's final interval count and the measurement aggregate
/// (not yet divided by the inner repeat factor).
pub fn run_passes<I>(bounds: &OuterBounds, mut interval: I) -> (u64, AggregateStatistics)
where
    I: FnMut() -> RawSample,
{
    let (_, warmup_repeat) = run_outer_pass(bounds.min_repeat, bounds, &mut interval);
    let (aggregate, _) = run_outer_pass(warmup_repeat, bounds, &mut interval);
    (warmup_repeat, aggregate)
}

/// Benchmark `f` with an explicit collector.
///
/// Use this to control the collector's lifetime yourself, or to benchmark
/// with a specific backend without touching the thread-local collector.
///
/// # Errors
///
/// Returns [`BenchError`] if `config` is invalid. Nothing is measured in that
/// case.
pub fn benchmark_on<F, T>(
    collector: &mut EventCollector,
    mut f: F,
    config: &BenchmarkConfig,
) -> Result<AggregateStatistics>
where
    F: FnMut() -> T,
{
    config.validate()?;
    let max_inner = InnerRepeat::try_from(config.max_inner_repeat)?;

    let inner = match config.inner_repeat {
        InnerRepeatPolicy::Fixed(m) => InnerRepeat::try_from(m)?,
        InnerRepeatPolicy::Auto => size_inner_repeat(max_inner, config.min_inner_time_ns, |m| {
            collector.start();
            m.run(&mut f);
            collector.end().elapsed_ns
        }),
    };

    let bounds = OuterBounds::from(config);
    let (warmup_repeat, mut aggregate) = run_passes(&bounds, || {
        collector.start();
        inner.run(&mut f);
        collector.end()
    });
    aggregate.scale_by(inner.get());

    debug!(
        backend = collector.backend_name(),
        inner_repeat = inner.get(),
        warmup_repeat,
        outer_repeat = aggregate.iteration_count(),
        elapsed_ns = aggregate.elapsed_ns(),
        "benchmark complete"
    );
    Ok(aggregate)
}

thread_local! {
    static COLLECTOR: Cell<Option<EventCollector>> = const { Cell::new(None) };
}

/// Run `op` with this thread's collector, creating it on first use.
///
/// The collector is taken out of the slot while `op` runs and put back only
/// when `op` returns, so a panicking callable drops it instead of leaving a
/// half-open interval behind. A benchmark inside a benchmarked callable finds
/// the slot empty and opens its own. A cached collector opened with a
/// different backend choice is replaced.
pub(crate) fn with_thread_collector<R>(
    spec: BackendSpec,
    op: impl FnOnce(&mut EventCollector) -> R,
) -> R {
    let mut collector = match COLLECTOR.take() {
        Some(c) if c.spec() == spec => c,
        _ => {
            trace!(backend = %spec, "opening thread collector");
            EventCollector::with_backend(spec)
        }
    };
    let result = op(&mut collector);
    COLLECTOR.set(Some(collector));
    result
}

/// Benchmark `f` with `config` on this thread's collector.
///
/// Blocks for the whole warm-up plus measurement (about 0.8 s with the
/// default configuration) and returns per-call statistics.
///
/// # Errors
///
/// Returns [`BenchError`] if `config` is invalid.
///
/// ```
/// use counters_bench::{benchmark, BenchmarkConfig};
///
/// let stats = benchmark(|| (0..100u64).sum::<u64>(), &BenchmarkConfig::quick()).unwrap();
/// assert!(stats.elapsed_ns() > 0.0);
/// ```
pub fn benchmark<F, T>(f: F, config: &BenchmarkConfig) -> Result<AggregateStatistics>
where
    F: FnMut() -> T,
{
    with_thread_collector(config.backend, |collector| benchmark_on(collector, f, config))
}

/// Benchmark `f` overriding only the outer-loop knobs.
///
/// # Errors
///
/// Returns [`BenchError::InvalidConfig`] if `min_outer_repeat` exceeds
/// `max_outer_repeat`.
pub fn benchmark_with<F, T>(
    f: F,
    min_outer_repeat: u64,
    min_warmup_time_ns: u64,
    max_outer_repeat: u64,
) -> Result<AggregateStatistics>
where
    F: FnMut() -> T,
{
    let config = BenchmarkConfig::default()
        .min_outer_repeat(min_outer_repeat)
        .min_warmup_time_ns(min_warmup_time_ns)
        .max_outer_repeat(max_outer_repeat);
    benchmark(f, &config)
}

/// Benchmark `f` with the default configuration.
///
/// # Errors
///
/// The default configuration is valid, so this only fails if the defaults
/// are changed to something invalid.
pub fn bench<F, T>(f: F) -> Result<AggregateStatistics>
where
    F: FnMut() -> T,
{
    benchmark(f, &BenchmarkConfig::default())
}

/// Whether this thread can read hardware counters, not just wall time.
///
/// Answered from the thread's collector when it was opened with
/// [`BackendSpec::Auto`]. A cached `WallClock` collector is left in place and
/// a short-lived `Auto` collector answers instead.
pub fn has_performance_counters() -> bool {
    match COLLECTOR.take() {
        Some(cached) if cached.spec() != BackendSpec::Auto => {
            let available = EventCollector::new().has_events();
            COLLECTOR.set(Some(cached));
            available
        }
        cached => {
            let collector = cached.unwrap_or_default();
            let available = collector.has_events();
            COLLECTOR.set(Some(collector));
            available
        }
    }
}
