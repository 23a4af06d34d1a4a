//! Counter collection across platforms.
//!
//! This module provides:
//! - Hardware counter backends behind one lifecycle (`start`/`stop`)
//! - [`EventCollector`], which pairs a backend with a wall clock
//! - [`RawSample`], the result of one measured interval
//!
//! # Backend Selection
//!
//! With [`BackendSpec::Auto`] the first backend that opens wins:
//! - **Linux**: `perf_event` group of cycles, instructions, branches and
//!   branch misses (`perf` feature)
//! - **macOS ARM64**: kperf thread counters (`kperf` feature)
//! - Anything else: wall clock only
//!
//! Opening counters usually needs privileges. On Linux that means root,
//! `CAP_PERFMON`, or `kernel.perf_event_paranoid <= 2`; on macOS it means
//! `sudo`:
//!
//! ```bash
//! sudo -E cargo test
//! ```
//!
//! A backend that fails to open is not an error: measurements carry
//! elapsed time and zero hardware counts.

mod backend;
mod collector;

#[cfg(feature = "kperf")]
pub mod kperf;

#[cfg(feature = "perf")]
pub mod perf;

pub use backend::{BackendSpec, CounterBackend, HardwareCounts, PlatformBackend};
pub use collector::{EventCollector, RawSample};
