//! Hardware counters for Linux using a perf_event group.
//!
//! Cycles, instructions, branch instructions and branch misses are opened as
//! followers of a single group leader, so one `read` returns all four for the
//! same interval instead of four racing intervals.
//!
//! # Requirements
//!
//! - Linux kernel with perf_event support and an exposed PMU (many VMs and
//!   containers have none)
//! - Root, `CAP_PERFMON`, or `kernel.perf_event_paranoid <= 2`
//!   (check with `cat /proc/sys/kernel/perf_event_paranoid`)
//! - Enable with `--features perf` (on by default)
//!
//! # Group read format
//!
//! The kernel answers a group read with
//! `{ nr, time_enabled, time_running, { value, id } * nr }`. When more
//! logical counters are active than the PMU has registers, the kernel
//! time-shares them and `time_running < time_enabled`; values are then
//! scaled by `time_enabled / time_running`. A group that never ran during
//! the interval (`time_running == 0`) cannot be scaled and reports zeros.

#[cfg(target_os = "linux")]
use std::sync::atomic::{compiler_fence, Ordering};

#[cfg(target_os = "linux")]
use tracing::trace;

#[cfg(target_os = "linux")]
use crate::error::CountersUnavailable;

use super::backend::HardwareCounts;
#[cfg(target_os = "linux")]
use super::backend::CounterBackend;

/// Scale a multiplexed counter value.
///
/// Returns `None` when the group never ran, since no estimate can be made.
#[inline]
pub fn scale_count(raw: u64, time_enabled: u64, time_running: u64) -> Option<u64> {
    if time_running == 0 {
        return None;
    }
    if time_running >= time_enabled {
        return Some(raw);
    }
    let scaled = u128::from(raw) * u128::from(time_enabled) / u128::from(time_running);
    Some(u64::try_from(scaled).unwrap_or(u64::MAX))
}

/// One group read, before multiplexing correction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupReading {
    /// Nanoseconds the group was enabled.
    pub time_enabled: u64,
    /// Nanoseconds the group was actually scheduled on the PMU.
    pub time_running: u64,
    /// Raw counter values.
    pub raw: HardwareCounts,
}

impl GroupReading {
    /// Narrow the enabled/running times to the interval since `prev`.
    ///
    /// Group reset zeroes counter values but the kernel keeps accumulating
    /// `time_enabled` and `time_running` for the life of the group, so only
    /// the times need differencing.
    pub fn since(&self, prev: &GroupReading) -> GroupReading {
        GroupReading {
            time_enabled: self.time_enabled.saturating_sub(prev.time_enabled),
            time_running: self.time_running.saturating_sub(prev.time_running),
            raw: self.raw,
        }
    }

    /// Apply multiplexing correction to every counter.
    ///
    /// Returns `None` for an unreliable interval (the group never ran).
    pub fn scaled(&self) -> Option<HardwareCounts> {
        let scale = |v| scale_count(v, self.time_enabled, self.time_running);
        Some(HardwareCounts {
            cycles: scale(self.raw.cycles)?,
            instructions: scale(self.raw.instructions)?,
            branches: scale(self.raw.branches)?,
            branch_misses: scale(self.raw.branch_misses)?,
        })
    }
}

/// A perf_event group counting cycles, instructions, branches and branch
/// misses for the calling thread.
///
/// The file descriptors are closed when this value is dropped.
#[cfg(target_os = "linux")]
pub struct PerfGroup {
    group: ::perf_event2::Group,
    cycles: ::perf_event2::Counter,
    instructions: ::perf_event2::Counter,
    branches: ::perf_event2::Counter,
    branch_misses: ::perf_event2::Counter,
    // Lifetime times at the end of the previous interval.
    last: GroupReading,
}

#[cfg(target_os = "linux")]
impl PerfGroup {
    /// Open the counter group.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Insufficient permissions
    /// - The PMU does not expose one of the events
    pub fn open() -> Result<Self, CountersUnavailable> {
        use ::perf_event2::events::Hardware;
        use ::perf_event2::{Builder, Group};

        let mut group = Group::new().map_err(classify_open_error)?;
        let cycles = group
            .add(&Builder::new(Hardware::CPU_CYCLES))
            .map_err(classify_open_error)?;
        let instructions = group
            .add(&Builder::new(Hardware::INSTRUCTIONS))
            .map_err(classify_open_error)?;
        let branches = group
            .add(&Builder::new(Hardware::BRANCH_INSTRUCTIONS))
            .map_err(classify_open_error)?;
        let branch_misses = group
            .add(&Builder::new(Hardware::BRANCH_MISSES))
            .map_err(classify_open_error)?;

        // Some hypervisors accept the open but refuse to schedule the group.
        let mut this = Self {
            group,
            cycles,
            instructions,
            branches,
            branch_misses,
            last: GroupReading::default(),
        };
        this.probe()?;
        Ok(this)
    }

    fn probe(&mut self) -> Result<(), CountersUnavailable> {
        self.group
            .enable()
            .and_then(|_| self.group.disable())
            .map_err(|e| CountersUnavailable::ConfigurationFailed(format!("enable failed: {e}")))?;
        self.last = self
            .read_group()
            .map_err(|e| CountersUnavailable::ConfigurationFailed(format!("read failed: {e}")))?;
        Ok(())
    }

    fn read_group(&mut self) -> std::io::Result<GroupReading> {
        let data = self.group.read()?;
        let nanos = |d: Option<std::time::Duration>| {
            d.map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
                .unwrap_or(0)
        };
        Ok(GroupReading {
            time_enabled: nanos(data.time_enabled()),
            time_running: nanos(data.time_running()),
            raw: HardwareCounts {
                cycles: data[&self.cycles],
                instructions: data[&self.instructions],
                branches: data[&self.branches],
                branch_misses: data[&self.branch_misses],
            },
        })
    }
}

#[cfg(target_os = "linux")]
impl CounterBackend for PerfGroup {
    #[inline]
    fn start(&mut self) {
        // Group-wide ioctls keep all members on the same interval.
        let _ = self.group.reset();
        let _ = self.group.enable();
        compiler_fence(Ordering::SeqCst);
    }

    #[inline]
    fn stop(&mut self) -> HardwareCounts {
        compiler_fence(Ordering::SeqCst);
        let _ = self.group.disable();
        let reading = match self.read_group() {
            Ok(r) => {
                let interval = r.since(&self.last);
                self.last = r;
                interval
            }
            Err(e) => {
                trace!(error = %e, "perf group read failed, dropping hardware counts");
                return HardwareCounts::default();
            }
        };
        reading.scaled().unwrap_or_else(|| {
            trace!(
                time_enabled = reading.time_enabled,
                "perf group was not scheduled during the interval"
            );
            HardwareCounts::default()
        })
    }

    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(target_os = "linux")]
impl std::fmt::Debug for PerfGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerfGroup").finish_non_exhaustive()
    }
}

#[cfg(target_os = "linux")]
fn classify_open_error(e: std::io::Error) -> CountersUnavailable {
    match e.kind() {
        std::io::ErrorKind::PermissionDenied => CountersUnavailable::PermissionDenied {
            hint: permission_hint(),
        },
        _ => match e.raw_os_error() {
            Some(libc::EACCES) | Some(libc::EPERM) => CountersUnavailable::PermissionDenied {
                hint: permission_hint(),
            },
            Some(libc::ENOENT) | Some(libc::ENODEV) | Some(libc::EOPNOTSUPP) => {
                CountersUnavailable::UnsupportedPlatform
            }
            _ => CountersUnavailable::ConfigurationFailed(e.to_string()),
        },
    }
}

/// Read `kernel.perf_event_paranoid`, if the file exists.
#[cfg(target_os = "linux")]
pub fn perf_event_paranoid() -> Option<i32> {
    std::fs::read_to_string("/proc/sys/kernel/perf_event_paranoid")
        .ok()?
        .trim()
        .parse()
        .ok()
}

#[cfg(target_os = "linux")]
fn permission_hint() -> String {
    match perf_event_paranoid() {
        Some(level) if level > 2 => format!(
            "kernel.perf_event_paranoid is {level}; \
             run with sudo, set CAP_PERFMON, or lower it to 2"
        ),
        Some(level) => format!(
            "kernel.perf_event_paranoid is {level}; run with sudo or set CAP_PERFMON"
        ),
        None => "run with sudo or set CAP_PERFMON".to_string(),
    }
}
