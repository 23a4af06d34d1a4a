//! Unified counter backend across platforms.
//!
//! This module provides:
//! - `CounterBackend` - the lifecycle every backend implements
//! - `PlatformBackend` - an enum wrapping all backend implementations
//! - `BackendSpec` - which backend to try when opening
//!
//! Backend implementations:
//! - `PerfGroup` - Linux perf_event group (may need CAP_PERFMON)
//! - `KperfCounters` - macOS Apple Silicon kperf (requires sudo)
//! - wall clock - no hardware counters

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CountersUnavailable;

#[cfg(all(target_os = "macos", target_arch = "aarch64", feature = "kperf"))]
use super::kperf::KperfCounters;

#[cfg(all(target_os = "linux", feature = "perf"))]
use super::perf::PerfGroup;

/// Hardware counter deltas for one interval.
///
/// All zero when counters are unavailable or the interval was unreliable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareCounts {
    /// Core clock cycles.
    pub cycles: u64,
    /// Retired instructions.
    pub instructions: u64,
    /// Retired branch instructions.
    pub branches: u64,
    /// Mispredicted branches.
    pub branch_misses: u64,
}

/// Lifecycle shared by every counter backend.
///
/// `start` and `stop` bracket one interval. Calls must alternate; a second
/// `start` before `stop` is a caller bug and is not detected.
pub trait CounterBackend {
    /// Reset and arm the counters.
    fn start(&mut self);

    /// Disarm the counters and return what they counted since `start`.
    fn stop(&mut self) -> HardwareCounts;

    /// Whether `stop` reports real hardware counts.
    fn is_available(&self) -> bool;
}

/// A counter backend chosen at runtime.
///
/// Enum dispatch keeps `start`/`stop` monomorphic and inlinable on the
/// measurement path.
pub enum PlatformBackend {
    /// Wall clock only; carries the reason hardware counters are missing.
    WallClock(CountersUnavailable),

    /// Linux perf_event counter group.
    #[cfg(all(target_os = "linux", feature = "perf"))]
    Perf(PerfGroup),

    /// macOS Apple Silicon kperf counters.
    #[cfg(all(target_os = "macos", target_arch = "aarch64", feature = "kperf"))]
    Kperf(KperfCounters),
}

impl PlatformBackend {
    /// Open a backend according to `spec`.
    ///
    /// Never fails: if no hardware backend opens, the wall-clock variant is
    /// returned with the last failure reason.
    pub fn open(spec: BackendSpec) -> Self {
        match spec {
            BackendSpec::WallClock => PlatformBackend::WallClock(CountersUnavailable::Disabled),
            BackendSpec::Auto => Self::open_hardware().unwrap_or_else(|reason| {
                debug!(%reason, "hardware counters unavailable, measuring wall clock only");
                PlatformBackend::WallClock(reason)
            }),
        }
    }

    #[allow(unreachable_code)]
    fn open_hardware() -> Result<Self, CountersUnavailable> {
        #[cfg(all(target_os = "linux", feature = "perf"))]
        {
            let group = PerfGroup::open()?;
            debug!("opened perf_event counter group");
            return Ok(PlatformBackend::Perf(group));
        }

        #[cfg(all(target_os = "macos", target_arch = "aarch64", feature = "kperf"))]
        {
            let counters = KperfCounters::open()?;
            debug!("opened kperf thread counters");
            return Ok(PlatformBackend::Kperf(counters));
        }

        Err(CountersUnavailable::UnsupportedPlatform)
    }

    /// Why hardware counters are missing, if they are.
    pub fn unavailable_reason(&self) -> Option<&CountersUnavailable> {
        match self {
            PlatformBackend::WallClock(reason) => Some(reason),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Backend name for diagnostics and metadata.
    pub fn name(&self) -> &'static str {
        match self {
            PlatformBackend::WallClock(_) => "wall_clock",
            #[cfg(all(target_os = "linux", feature = "perf"))]
            PlatformBackend::Perf(_) => "perf_event",
            #[cfg(all(target_os = "macos", target_arch = "aarch64", feature = "kperf"))]
            PlatformBackend::Kperf(_) => "kperf",
        }
    }
}

impl CounterBackend for PlatformBackend {
    #[inline]
    fn start(&mut self) {
        match self {
            PlatformBackend::WallClock(_) => {}
            #[cfg(all(target_os = "linux", feature = "perf"))]
            PlatformBackend::Perf(b) => b.start(),
            #[cfg(all(target_os = "macos", target_arch = "aarch64", feature = "kperf"))]
            PlatformBackend::Kperf(b) => b.start(),
        }
    }

    #[inline]
    fn stop(&mut self) -> HardwareCounts {
        match self {
            PlatformBackend::WallClock(_) => HardwareCounts::default(),
            #[cfg(all(target_os = "linux", feature = "perf"))]
            PlatformBackend::Perf(b) => b.stop(),
            #[cfg(all(target_os = "macos", target_arch = "aarch64", feature = "kperf"))]
            PlatformBackend::Kperf(b) => b.stop(),
        }
    }

    fn is_available(&self) -> bool {
        match self {
            PlatformBackend::WallClock(_) => false,
            #[cfg(all(target_os = "linux", feature = "perf"))]
            PlatformBackend::Perf(b) => b.is_available(),
            #[cfg(all(target_os = "macos", target_arch = "aarch64", feature = "kperf"))]
            PlatformBackend::Kperf(b) => b.is_available(),
        }
    }
}

impl std::fmt::Debug for PlatformBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformBackend")
            .field("name", &self.name())
            .field("available", &self.is_available())
            .finish()
    }
}

/// Specification for which backend to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendSpec {
    /// Try the platform's hardware counters, fall back to wall clock.
    ///
    /// When running with sufficient privileges this picks perf_event on
    /// Linux and kperf on Apple Silicon.
    #[default]
    Auto,

    /// Never open hardware counters.
    WallClock,
}

impl std::fmt::Display for BackendSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendSpec::Auto => write!(f, "Auto"),
            BackendSpec::WallClock => write!(f, "WallClock"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_clock_spec_never_has_counters() {
        let mut backend = PlatformBackend::open(BackendSpec::WallClock);
        assert!(!backend.is_available());
        assert_eq!(backend.name(), "wall_clock");
        assert_eq!(backend.unavailable_reason(), Some(&CountersUnavailable::Disabled));

        backend.start();
        assert_eq!(backend.stop(), HardwareCounts::default());
    }

    #[test]
    fn auto_spec_reports_reason_iff_unavailable() {
        let backend = PlatformBackend::open(BackendSpec::Auto);
        assert_eq!(backend.is_available(), backend.unavailable_reason().is_none());
    }

    #[test]
    #[cfg(not(any(
        all(target_os = "linux", feature = "perf"),
        all(target_os = "macos", target_arch = "aarch64", feature = "kperf")
    )))]
    fn auto_spec_is_unsupported_without_backend() {
        let backend = PlatformBackend::open(BackendSpec::Auto);
        assert_eq!(
            backend.unavailable_reason(),
            Some(&CountersUnavailable::UnsupportedPlatform)
        );
    }
}
