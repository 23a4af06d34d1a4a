//! End-to-end tests of the calibrated benchmark loop.
//!
//! Configurations keep the time targets small so the suite stays fast; the
//! default 0.4 s passes are only exercised by the doc examples.

use std::hint::black_box;
use std::time::Duration;

use counters_bench::{
    benchmark, benchmark_on, benchmark_with, has_performance_counters, BackendSpec, BenchError,
    BenchmarkConfig, EventCollector,
};

fn busy_loop_100() -> u64 {
    let mut s = 0u64;
    for i in 0..100u64 {
        s = s.wrapping_add(black_box(i));
    }
    s
}

fn relative_diff(a: f64, b: f64) -> f64 {
    (a - b).abs() / a.abs().max(b.abs())
}

/// Runs with a raised inner threshold so the outcome does not depend on
/// optimization level: unoptimized builds can make 10,000 empty calls last
/// past the default 2 µs target at a smaller factor.
#[test]
fn noop_selects_largest_inner_factor() {
    // A 10 ms inner target cannot be reached by 1000 empty calls.
    let config = BenchmarkConfig::default()
        .min_inner_time_ns(10_000_000)
        .min_warmup_time_ns(1_000_000)
        .max_outer_repeat(10_000);

    let stats = benchmark(|| {}, &config).unwrap();

    assert_eq!(stats.inner_repeat_factor(), 10_000);
    let per_sample = stats.total_elapsed_ns() / stats.iteration_count() as f64;
    let per_sample_from_mean = stats.elapsed_ns() * stats.inner_repeat_factor() as f64;
    assert!(
        relative_diff(per_sample, per_sample_from_mean) < 1e-9,
        "total/iterations = {per_sample}, elapsed * M = {per_sample_from_mean}"
    );
}

#[test]
#[cfg(not(debug_assertions))]
fn noop_selects_largest_inner_factor_with_defaults() {
    let config = BenchmarkConfig::default().min_warmup_time_ns(1_000_000);

    let stats = benchmark(|| {}, &config).unwrap();

    assert_eq!(stats.inner_repeat_factor(), 10_000);
    let per_sample = stats.total_elapsed_ns() / stats.iteration_count() as f64;
    let per_sample_from_mean = stats.elapsed_ns() * stats.inner_repeat_factor() as f64;
    assert!(relative_diff(per_sample, per_sample_from_mean) < 1e-9);
}

#[test]
fn slow_callable_keeps_inner_factor_one() {
    let config = BenchmarkConfig::default()
        .min_outer_repeat(3)
        .min_warmup_time_ns(1_000_000);

    let stats = benchmark(|| std::thread::sleep(Duration::from_micros(100)), &config).unwrap();

    assert_eq!(stats.inner_repeat_factor(), 1);
    assert!(stats.fastest_elapsed_ns() >= 100_000.0);
    assert!(stats.iteration_count() >= 3);
}

#[test]
fn outer_count_respects_bounds() {
    let config = BenchmarkConfig::default()
        .min_outer_repeat(5)
        .max_outer_repeat(20)
        .min_warmup_time_ns(u64::MAX)
        .fixed_inner_repeat(1);

    let stats = benchmark(busy_loop_100, &config).unwrap();
    assert_eq!(stats.iteration_count(), 20);

    let config = config.min_warmup_time_ns(0);
    let stats = benchmark(busy_loop_100, &config).unwrap();
    assert_eq!(stats.iteration_count(), 5);
}

#[test]
fn iteration_count_is_measurement_pass_only() {
    let mut calls = 0u64;
    let config = BenchmarkConfig::default()
        .min_outer_repeat(7)
        .min_warmup_time_ns(0)
        .fixed_inner_repeat(10);

    let stats = benchmark(|| calls += 1, &config).unwrap();

    assert_eq!(stats.iteration_count(), 7);
    // 7 warm-up intervals plus 7 measured ones, 10 calls each.
    assert_eq!(calls, 140);
}

#[test]
fn repeated_runs_agree() {
    let config = BenchmarkConfig::default()
        .min_outer_repeat(1_000)
        .max_outer_repeat(1_000)
        .fixed_inner_repeat(100);

    let first = benchmark(busy_loop_100, &config).unwrap();
    let second = benchmark(busy_loop_100, &config).unwrap();

    assert_eq!(first.iteration_count(), second.iteration_count());
    assert!(
        relative_diff(first.elapsed_ns(), second.elapsed_ns()) < 0.5,
        "first = {:.1} ns, second = {:.1} ns",
        first.elapsed_ns(),
        second.elapsed_ns()
    );
}

#[test]
fn wall_clock_backend_reports_no_counters() {
    let config = BenchmarkConfig::quick()
        .min_warmup_time_ns(1_000_000)
        .backend(BackendSpec::WallClock);

    let stats = benchmark(busy_loop_100, &config).unwrap();

    assert!(stats.elapsed_ns() > 0.0);
    assert_eq!(stats.cycles(), 0.0);
    assert_eq!(stats.instructions(), 0.0);
    assert_eq!(stats.branches(), 0.0);
    assert_eq!(stats.branch_misses(), 0.0);
}

#[test]
fn auto_backend_without_counters_reports_zero() {
    let config = BenchmarkConfig::quick().min_warmup_time_ns(1_000_000);
    let stats = benchmark(busy_loop_100, &config).unwrap();
    assert!(stats.elapsed_ns() > 0.0);

    if has_performance_counters() {
        eprintln!(
            "hardware counters available: {:.0} instructions/call",
            stats.instructions()
        );
    } else {
        assert_eq!(stats.cycles(), 0.0);
        assert_eq!(stats.instructions(), 0.0);
    }
}

#[test]
fn has_performance_counters_matches_fresh_collector() {
    assert_eq!(has_performance_counters(), EventCollector::new().has_events());
}

#[test]
fn unsupported_inner_factor_fails() {
    let config = BenchmarkConfig::quick().fixed_inner_repeat(7);
    let err = benchmark(busy_loop_100, &config).unwrap_err();
    assert!(matches!(err, BenchError::UnsupportedInnerRepeat(7)));

    let config = BenchmarkConfig::quick().max_inner_repeat(7);
    let err = benchmark(busy_loop_100, &config).unwrap_err();
    assert!(matches!(err, BenchError::UnsupportedInnerRepeat(7)));
}

#[test]
fn outer_convenience_overload() {
    let stats = benchmark_with(busy_loop_100, 0, 1_000_000, 100).unwrap();
    assert!(stats.iteration_count() >= 1);
    assert!(stats.iteration_count() <= 100);

    let err = benchmark_with(busy_loop_100, 50, 0, 10).unwrap_err();
    assert!(matches!(err, BenchError::InvalidConfig(_)));
}

#[test]
fn explicit_collector_is_reusable() {
    let mut collector = EventCollector::with_backend(BackendSpec::WallClock);
    let config = BenchmarkConfig::quick().min_warmup_time_ns(500_000);

    for _ in 0..3 {
        let stats = benchmark_on(&mut collector, busy_loop_100, &config).unwrap();
        assert!(stats.elapsed_ns() > 0.0);
        assert!(stats.fastest_elapsed_ns() <= stats.elapsed_ns());
        assert!(stats.slowest_elapsed_ns() >= stats.elapsed_ns());
    }
}

#[test]
fn thread_recovers_after_panicking_callable() {
    let config = BenchmarkConfig::default()
        .min_outer_repeat(3)
        .min_warmup_time_ns(0)
        .fixed_inner_repeat(10);

    let caught = std::panic::catch_unwind(|| {
        let mut calls = 0u32;
        benchmark(
            || {
                calls += 1;
                if calls == 5 {
                    panic!("callable failed mid-interval");
                }
            },
            &config,
        )
    });
    assert!(caught.is_err());

    let stats = benchmark(busy_loop_100, &config).unwrap();
    assert_eq!(stats.iteration_count(), 3);
    assert_eq!(stats.inner_repeat_factor(), 10);
}

#[test]
fn threads_benchmark_independently() {
    let handles: Vec<_> = (0..4)
        .map(|_| {
            std::thread::spawn(|| {
                let config = BenchmarkConfig::quick().min_warmup_time_ns(2_000_000);
                benchmark(busy_loop_100, &config).map(|s| s.iteration_count())
            })
        })
        .collect();

    for handle in handles {
        let n = handle.join().unwrap().unwrap();
        assert!((10..=100_000).contains(&n), "n = {n}");
    }
}
