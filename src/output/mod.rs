//! Output formats for benchmark results.

pub mod json;

use serde::{Deserialize, Serialize};

use crate::aggregate::AggregateStatistics;

/// Flat, per-call view of an [`AggregateStatistics`] for reporting.
///
/// Hardware fields are `None` when the run had no hardware counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Intervals in the measurement pass.
    pub iterations: u64,
    /// Calls per interval.
    pub inner_repeat: u64,
    /// Mean nanoseconds per call.
    pub elapsed_ns: f64,
    /// Fastest nanoseconds per call.
    pub fastest_elapsed_ns: f64,
    /// Wall time spent in the measurement pass.
    pub total_elapsed_ns: f64,
    /// Mean cycles per call.
    pub cycles: Option<f64>,
    /// Mean instructions per call.
    pub instructions: Option<f64>,
    /// Mean branch instructions per call.
    pub branches: Option<f64>,
    /// Mean branch misses per call.
    pub branch_misses: Option<f64>,
    /// Instructions per cycle.
    pub ipc: Option<f64>,
}

impl Summary {
    /// Build a summary. `has_counters` decides whether hardware fields are
    /// reported (see `has_performance_counters`).
    pub fn new(stats: &AggregateStatistics, has_counters: bool) -> Self {
        let hw = |v: f64| has_counters.then_some(v);
        Self {
            iterations: stats.iteration_count(),
            inner_repeat: stats.inner_repeat_factor(),
            elapsed_ns: stats.elapsed_ns(),
            fastest_elapsed_ns: stats.fastest_elapsed_ns(),
            total_elapsed_ns: stats.total_elapsed_ns(),
            cycles: hw(stats.cycles()),
            instructions: hw(stats.instructions()),
            branches: hw(stats.branches()),
            branch_misses: hw(stats.branch_misses()),
            ipc: hw(stats.instructions_per_cycle()),
        }
    }
}
