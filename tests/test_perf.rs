//! Linux perf_event group counters.
//!
//! These tests skip (with a message) when the kernel refuses the counters,
//! which is the normal case in containers and with a strict
//! `perf_event_paranoid`.

#![cfg(all(target_os = "linux", feature = "perf"))]

use std::hint::black_box;

use counters_bench::measurement::perf::{perf_event_paranoid, PerfGroup};
use counters_bench::measurement::CounterBackend;
use counters_bench::{BackendSpec, CountersUnavailable, EventCollector};

const LOOP_ITERATIONS: u64 = 100_000;

fn work() -> u64 {
    let mut acc = 0u64;
    for i in 0..LOOP_ITERATIONS {
        acc = acc.wrapping_add(black_box(i) ^ 0x5a);
    }
    acc
}

fn open_or_skip() -> Option<PerfGroup> {
    match PerfGroup::open() {
        Ok(group) => Some(group),
        Err(e) => {
            eprintln!(
                "skipping: perf counters unavailable ({e}); paranoid = {:?}",
                perf_event_paranoid()
            );
            None
        }
    }
}

#[test]
fn group_counts_a_loop() {
    let Some(mut group) = open_or_skip() else {
        return;
    };
    assert!(group.is_available());

    group.start();
    black_box(work());
    let counts = group.stop();

    eprintln!("{counts:?}");
    // A zeroed reading means the group was never scheduled in this interval.
    if counts.cycles == 0 && counts.instructions == 0 {
        eprintln!("group not scheduled during the interval, nothing to check");
        return;
    }
    assert!(counts.cycles > 0);
    assert!(counts.instructions >= LOOP_ITERATIONS, "instructions = {}", counts.instructions);
    assert!(counts.branches > 0);
    assert!(counts.branch_misses <= counts.branches);
}

#[test]
fn group_is_reusable() {
    let Some(mut group) = open_or_skip() else {
        return;
    };
    for _ in 0..1_000 {
        group.start();
        black_box(work());
        let _ = group.stop();
    }
}

#[test]
fn collector_reports_reason_when_unavailable() {
    let collector = EventCollector::with_backend(BackendSpec::Auto);
    match collector.unavailable_reason() {
        None => assert_eq!(collector.backend_name(), "perf_event"),
        Some(CountersUnavailable::PermissionDenied { hint }) => {
            assert!(!hint.is_empty());
            assert_eq!(collector.backend_name(), "wall_clock");
        }
        Some(other) => {
            eprintln!("perf unavailable: {other}");
            assert_eq!(collector.backend_name(), "wall_clock");
        }
    }
}
