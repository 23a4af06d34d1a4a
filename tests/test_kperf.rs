//! Apple Silicon kperf counters. Needs sudo; skips otherwise.

#![cfg(all(target_os = "macos", target_arch = "aarch64", feature = "kperf"))]

use std::hint::black_box;

use counters_bench::measurement::kperf::KperfCounters;
use counters_bench::measurement::CounterBackend;
use counters_bench::CountersUnavailable;

#[test]
fn kperf_counts_a_loop() {
    let mut counters = match KperfCounters::open() {
        Ok(c) => c,
        Err(CountersUnavailable::PermissionDenied { .. }) => {
            eprintln!("skipping: kperf needs root");
            return;
        }
        Err(e) => {
            eprintln!("skipping: kperf unavailable ({e})");
            return;
        }
    };

    counters.start();
    let mut acc = 0u64;
    for i in 0..100_000u64 {
        acc = acc.wrapping_add(black_box(i));
    }
    black_box(acc);
    let counts = counters.stop();

    eprintln!("{counts:?}");
    assert!(counts.cycles > 0);
    assert!(counts.instructions >= 100_000);
    assert!(counts.branches > 0);
}
