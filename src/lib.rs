//! # counters-bench
//!
//! Measure how long a piece of code takes, and how many cycles,
//! instructions, branches and branch misses it costs, per call.
//!
//! This crate provides:
//! - Hardware counters behind one interface: Linux `perf_event` groups and
//!   Apple Silicon kperf, with wall-clock fallback everywhere else
//! - A self-calibrating loop that batches fast calls and keeps sampling
//!   until enough time has been measured
//! - Summary statistics (mean, fastest, slowest, totals) per call
//!
//! ## Quick Start
//!
//! ```
//! use counters_bench::{benchmark, has_performance_counters, BenchmarkConfig};
//!
//! let stats = benchmark(
//!     || (0..100u64).map(std::hint::black_box).sum::<u64>(),
//!     &BenchmarkConfig::quick(),
//! )
//! .unwrap();
//!
//! println!("{:.1} ns/call over {} samples", stats.elapsed_ns(), stats.iteration_count());
//! if has_performance_counters() {
//!     println!("{:.0} instructions/call", stats.instructions());
//! }
//! ```
//!
//! ## Permissions
//!
//! Hardware counters usually need privileges (root, `CAP_PERFMON` or
//! `kernel.perf_event_paranoid <= 2` on Linux; `sudo` on macOS). Without
//! them every hardware field is zero and only elapsed time is reported;
//! nothing fails.
//!
//! ## Threads
//!
//! [`benchmark`] runs on the calling thread and reuses one collector per
//! thread. Benchmarks on different threads are independent. Use
//! [`benchmark_on`] to manage the collector yourself.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
mod aggregate;
mod bench;
mod config;
mod error;

// Functional modules
pub mod measurement;
pub mod output;

// Re-exports for public API
pub use aggregate::AggregateStatistics;
pub use bench::{
    bench, benchmark, benchmark_on, benchmark_with, has_performance_counters, run_outer_pass,
    run_passes, size_inner_repeat, InnerRepeat, OuterBounds,
};
pub use config::{BenchmarkConfig, InnerRepeatPolicy};
pub use error::{BenchError, CountersUnavailable, Result};
pub use measurement::{BackendSpec, EventCollector, HardwareCounts, RawSample};
