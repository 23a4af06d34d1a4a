//! Example: benchmark a few functions and print per-call counters.
//!
//! Run with `RUST_LOG=counters_bench=debug` to see calibration decisions.
//! On Linux, hardware counters need `perf_event_paranoid <= 2` or root; on
//! Apple Silicon they need sudo. Without them only wall time is reported.

use std::hint::black_box;

use counters_bench::measurement::EventCollector;
use counters_bench::output::{json, Summary};
use counters_bench::{benchmark, has_performance_counters, BenchmarkConfig};
use tracing_subscriber::EnvFilter;

fn fib(n: u64) -> u64 {
    if n < 2 {
        n
    } else {
        fib(n - 1) + fib(n - 2)
    }
}

fn sum_100() -> u64 {
    let mut acc = 0u64;
    for i in 0..100u64 {
        acc = acc.wrapping_add(black_box(i));
    }
    acc
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let counters = has_performance_counters();
    if !counters {
        let collector = EventCollector::new();
        match collector.unavailable_reason() {
            Some(reason) => eprintln!("warning: hardware counters unavailable: {reason}"),
            None => eprintln!("warning: hardware counters unavailable"),
        }
        eprintln!("         reporting wall time only\n");
    }

    let config = BenchmarkConfig::default();

    println!(
        "{:<10} {:>10} {:>10} {:>12} {:>8} {:>10}",
        "name", "ns/call", "fastest", "instr/call", "ipc", "M x N"
    );

    let noop = benchmark(|| {}, &config)?;
    let sum = benchmark(sum_100, &config)?;
    let fib20 = benchmark(|| fib(black_box(20)), &config)?;

    for (name, stats) in [("noop", &noop), ("sum_100", &sum), ("fib(20)", &fib20)] {
        println!(
            "{:<10} {:>10.2} {:>10.2} {:>12.1} {:>8.2} {:>10}",
            name,
            stats.elapsed_ns(),
            stats.fastest_elapsed_ns(),
            stats.instructions(),
            stats.instructions_per_cycle(),
            format!("{}x{}", stats.inner_repeat_factor(), stats.iteration_count()),
        );
    }

    println!();
    println!("{}", json::to_json_pretty(&Summary::new(&fib20, counters))?);
    Ok(())
}
