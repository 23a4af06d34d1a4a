//! Interval collection: wall clock plus hardware counters.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::backend::{BackendSpec, CounterBackend, HardwareCounts, PlatformBackend};
use crate::error::CountersUnavailable;

/// Measurements for one `start()`/`end()` interval.
///
/// `elapsed_ns` is always populated. The hardware fields are zero unless the
/// collector has hardware counters (and the interval was reliable).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSample {
    /// Wall-clock duration in nanoseconds.
    pub elapsed_ns: u64,
    /// Core clock cycles.
    pub cycles: u64,
    /// Retired instructions.
    pub instructions: u64,
    /// Retired branch instructions.
    pub branches: u64,
    /// Mispredicted branches.
    pub branch_misses: u64,
}

impl RawSample {
    /// Combine a wall-clock duration with hardware counts.
    pub fn new(elapsed_ns: u64, counts: HardwareCounts) -> Self {
        Self {
            elapsed_ns,
            cycles: counts.cycles,
            instructions: counts.instructions,
            branches: counts.branches,
            branch_misses: counts.branch_misses,
        }
    }

    /// A sample with elapsed time only.
    pub fn from_elapsed_ns(elapsed_ns: u64) -> Self {
        Self {
            elapsed_ns,
            ..Self::default()
        }
    }

    /// The hardware part of this sample.
    pub fn counts(&self) -> HardwareCounts {
        HardwareCounts {
            cycles: self.cycles,
            instructions: self.instructions,
            branches: self.branches,
            branch_misses: self.branch_misses,
        }
    }
}

/// Measures intervals of wall-clock time and hardware counters.
///
/// The collector owns one counter backend, opened at construction and closed
/// on drop. Opening is comparatively expensive, so keep a collector around
/// and reuse it (the crate's `benchmark` does this per thread).
///
/// # Misuse
///
/// A collector holds one open interval at a time. Calling `start()` twice
/// without `end()`, or `end()` without `start()`, yields meaningless samples.
/// This is only checked in debug builds.
///
/// ```
/// use counters_bench::EventCollector;
///
/// let mut collector = EventCollector::new();
/// collector.start();
/// let v: u64 = (0..1000u64).map(std::hint::black_box).sum();
/// let sample = collector.end();
/// assert_eq!(v, 499_500);
/// if !collector.has_events() {
///     assert_eq!(sample.cycles, 0);
/// }
/// ```
#[derive(Debug)]
pub struct EventCollector {
    spec: BackendSpec,
    backend: PlatformBackend,
    started: Instant,
    armed: bool,
}

impl EventCollector {
    /// Create a collector, opening hardware counters if possible.
    pub fn new() -> Self {
        Self::with_backend(BackendSpec::Auto)
    }

    /// Create a collector with an explicit backend choice.
    pub fn with_backend(spec: BackendSpec) -> Self {
        Self {
            spec,
            backend: PlatformBackend::open(spec),
            started: Instant::now(),
            armed: false,
        }
    }

    /// Whether samples carry hardware counters.
    pub fn has_events(&self) -> bool {
        self.backend.is_available()
    }

    /// The backend choice this collector was opened with.
    pub fn spec(&self) -> BackendSpec {
        self.spec
    }

    /// Why hardware counters are unavailable, if they are.
    pub fn unavailable_reason(&self) -> Option<&CountersUnavailable> {
        self.backend.unavailable_reason()
    }

    /// Name of the active backend (`perf_event`, `kperf` or `wall_clock`).
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Begin an interval.
    #[inline]
    pub fn start(&mut self) {
        debug_assert!(!self.armed, "EventCollector::start called twice without end");
        self.armed = true;
        self.backend.start();
        self.started = Instant::now();
    }

    /// End the interval and return its measurements.
    #[inline]
    pub fn end(&mut self) -> RawSample {
        let elapsed = self.started.elapsed();
        let counts = self.backend.stop();
        debug_assert!(self.armed, "EventCollector::end called without start");
        self.armed = false;
        let elapsed_ns = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        RawSample::new(elapsed_ns, counts)
    }

    /// Measure one call of `f`.
    #[inline]
    pub fn measure<F, T>(&mut self, f: F) -> RawSample
    where
        F: FnOnce() -> T,
    {
        self.start();
        std::hint::black_box(f());
        self.end()
    }
}

impl Default for EventCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_creation() {
        let counts = HardwareCounts {
            cycles: 3,
            instructions: 4,
            branches: 5,
            branch_misses: 6,
        };
        let sample = RawSample::new(1000, counts);
        assert_eq!(sample.elapsed_ns, 1000);
        assert_eq!(sample.counts(), counts);
        assert_eq!(RawSample::from_elapsed_ns(7).counts(), HardwareCounts::default());
    }

    #[test]
    fn test_wall_clock_collector() {
        let mut collector = EventCollector::with_backend(BackendSpec::WallClock);
        assert!(!collector.has_events());
        assert_eq!(collector.backend_name(), "wall_clock");

        let sample =
            collector.measure(|| std::thread::sleep(std::time::Duration::from_micros(200)));
        assert!(sample.elapsed_ns >= 200_000, "elapsed_ns = {}", sample.elapsed_ns);
        assert_eq!(sample.cycles, 0);
        assert_eq!(sample.instructions, 0);
        assert_eq!(sample.branches, 0);
        assert_eq!(sample.branch_misses, 0);
    }

    #[test]
    fn test_collector_reusable() {
        let mut collector = EventCollector::new();
        for _ in 0..100 {
            collector.start();
            std::hint::black_box((0..100u64).sum::<u64>());
            let _ = collector.end();
        }
    }

    #[test]
    #[should_panic(expected = "start called twice")]
    #[cfg(debug_assertions)]
    fn test_nested_start_is_caught_in_debug() {
        let mut collector = EventCollector::with_backend(BackendSpec::WallClock);
        collector.start();
        collector.start();
    }
}
