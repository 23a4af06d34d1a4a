//! Hardware counters for Apple Silicon using kperf.
//!
//! Apple Silicon CPUs expose two fixed counters (core cycles, retired
//! instructions) and several configurable ones. They are reached through the
//! private `kperf` framework, which is not linkable: its symbols are resolved
//! with `dlopen`/`dlsym` once per process.
//!
//! # Requirements
//!
//! - macOS on Apple Silicon (M1 and later)
//! - **Must run with sudo/root privileges**
//! - Enable with `--features kperf` (on by default)
//!
//! Counters are read per thread with `kpc_get_thread_counters`, so the
//! interval only covers work done by the calling thread.

#[cfg(all(target_os = "macos", target_arch = "aarch64"))]
pub use apple_silicon::KperfCounters;

#[cfg(all(target_os = "macos", target_arch = "aarch64"))]
mod apple_silicon {
    use std::sync::atomic::{compiler_fence, Ordering};
    use std::sync::OnceLock;

    use tracing::debug;

    use crate::error::CountersUnavailable;
    use crate::measurement::backend::{CounterBackend, HardwareCounts};

    // kpc constants (reverse-engineered from Apple's private framework)
    const KPC_CLASS_FIXED: u32 = 0;
    const KPC_CLASS_CONFIGURABLE: u32 = 1;
    const KPC_CLASS_FIXED_MASK: u32 = 1 << KPC_CLASS_FIXED;
    const KPC_CLASS_CONFIGURABLE_MASK: u32 = 1 << KPC_CLASS_CONFIGURABLE;
    const KPC_CLASSES: u32 = KPC_CLASS_FIXED_MASK | KPC_CLASS_CONFIGURABLE_MASK;

    // Count in EL0 (user mode, AArch64).
    const CFGWORD_EL0A64EN: u64 = 0x20000;

    // Configurable events on M-series cores.
    const EVENT_INST_BRANCH: u64 = 0x8d;
    const EVENT_BRANCH_MISPRED_NONSPEC: u64 = 0xcb;

    // Fixed counters come first in the thread buffer.
    const FIXED_CYCLES: usize = 0;
    const FIXED_INSTRUCTIONS: usize = 1;

    const KPC_MAX_COUNTERS: usize = 32;

    type KpcForceAllCtrsSet = unsafe extern "C" fn(i32) -> i32;
    type KpcForceAllCtrsGet = unsafe extern "C" fn(*mut i32) -> i32;
    type KpcSetCounting = unsafe extern "C" fn(u32) -> i32;
    type KpcSetThreadCounting = unsafe extern "C" fn(u32) -> i32;
    type KpcSetConfig = unsafe extern "C" fn(u32, *const u64) -> i32;
    type KpcGetThreadCounters = unsafe extern "C" fn(u32, u32, *mut u64) -> i32;
    type KpcGetCounterCount = unsafe extern "C" fn(u32) -> u32;
    type KpcGetConfigCount = unsafe extern "C" fn(u32) -> u32;

    struct KperfFunctions {
        force_all_ctrs_set: KpcForceAllCtrsSet,
        force_all_ctrs_get: KpcForceAllCtrsGet,
        set_counting: KpcSetCounting,
        set_thread_counting: KpcSetThreadCounting,
        set_config: KpcSetConfig,
        get_thread_counters: KpcGetThreadCounters,
        get_counter_count: KpcGetCounterCount,
        get_config_count: KpcGetConfigCount,
    }

    static KPERF: OnceLock<Option<KperfFunctions>> = OnceLock::new();

    fn load_kperf() -> Result<&'static KperfFunctions, CountersUnavailable> {
        let kperf = KPERF.get_or_init(|| unsafe {
            let lib = libc::dlopen(
                c"/System/Library/PrivateFrameworks/kperf.framework/kperf".as_ptr(),
                libc::RTLD_LAZY,
            );
            if lib.is_null() {
                return None;
            }

            macro_rules! load_fn {
                ($name:literal) => {{
                    let sym = libc::dlsym(lib, concat!($name, "\0").as_ptr().cast());
                    if sym.is_null() {
                        debug!(symbol = $name, "kperf symbol missing");
                        return None;
                    }
                    std::mem::transmute::<*mut libc::c_void, _>(sym)
                }};
            }

            Some(KperfFunctions {
                force_all_ctrs_set: load_fn!("kpc_force_all_ctrs_set"),
                force_all_ctrs_get: load_fn!("kpc_force_all_ctrs_get"),
                set_counting: load_fn!("kpc_set_counting"),
                set_thread_counting: load_fn!("kpc_set_thread_counting"),
                set_config: load_fn!("kpc_set_config"),
                get_thread_counters: load_fn!("kpc_get_thread_counters"),
                get_counter_count: load_fn!("kpc_get_counter_count"),
                get_config_count: load_fn!("kpc_get_config_count"),
            })
        });

        kperf.as_ref().ok_or(CountersUnavailable::FrameworkNotFound)
    }

    /// kperf thread counters: cycles, instructions, branches, branch misses.
    pub struct KperfCounters {
        kperf: &'static KperfFunctions,
        n_counters: u32,
        // Index of the first configurable counter in the thread buffer.
        configurable_base: usize,
        start: [u64; KPC_MAX_COUNTERS],
    }

    impl KperfCounters {
        /// Configure and enable the counters for this thread.
        ///
        /// # Errors
        ///
        /// Returns an error if:
        /// - kperf framework not available
        /// - Not running with sudo/root privileges
        /// - The counters cannot be configured
        pub fn open() -> Result<Self, CountersUnavailable> {
            let kperf = load_kperf()?;

            unsafe {
                // Querying the force-all flag needs the same privilege as setting it.
                let mut forced = 0i32;
                if (kperf.force_all_ctrs_get)(&mut forced) != 0 {
                    return Err(CountersUnavailable::PermissionDenied {
                        hint: "run with sudo".into(),
                    });
                }
                if (kperf.force_all_ctrs_set)(1) != 0 {
                    return Err(CountersUnavailable::PermissionDenied {
                        hint: "run with sudo".into(),
                    });
                }

                let n_configs = (kperf.get_config_count)(KPC_CLASS_CONFIGURABLE_MASK) as usize;
                if n_configs < 2 {
                    return Err(CountersUnavailable::ConfigurationFailed(format!(
                        "need 2 configurable counters, found {n_configs}"
                    )));
                }

                let mut config = vec![0u64; n_configs];
                config[0] = EVENT_INST_BRANCH | CFGWORD_EL0A64EN;
                config[1] = EVENT_BRANCH_MISPRED_NONSPEC | CFGWORD_EL0A64EN;

                if (kperf.set_config)(KPC_CLASS_CONFIGURABLE_MASK, config.as_ptr()) != 0 {
                    return Err(CountersUnavailable::ConfigurationFailed(
                        "kpc_set_config failed".into(),
                    ));
                }
                if (kperf.set_counting)(KPC_CLASSES) != 0 {
                    return Err(CountersUnavailable::ConfigurationFailed(
                        "kpc_set_counting failed".into(),
                    ));
                }
                if (kperf.set_thread_counting)(KPC_CLASSES) != 0 {
                    return Err(CountersUnavailable::ConfigurationFailed(
                        "kpc_set_thread_counting failed".into(),
                    ));
                }

                let n_counters = (kperf.get_counter_count)(KPC_CLASSES);
                let n_fixed = (kperf.get_counter_count)(KPC_CLASS_FIXED_MASK);
                if n_fixed < 2 || n_counters as usize > KPC_MAX_COUNTERS {
                    return Err(CountersUnavailable::ConfigurationFailed(format!(
                        "unexpected counter layout ({n_fixed} fixed, {n_counters} total)"
                    )));
                }

                Ok(Self {
                    kperf,
                    n_counters,
                    configurable_base: n_fixed as usize,
                    start: [0; KPC_MAX_COUNTERS],
                })
            }
        }

        #[inline]
        fn read(&self, buf: &mut [u64; KPC_MAX_COUNTERS]) -> bool {
            unsafe { (self.kperf.get_thread_counters)(0, self.n_counters, buf.as_mut_ptr()) == 0 }
        }
    }

    impl CounterBackend for KperfCounters {
        #[inline]
        fn start(&mut self) {
            let mut buf = [0u64; KPC_MAX_COUNTERS];
            if !self.read(&mut buf) {
                buf = [0; KPC_MAX_COUNTERS];
            }
            self.start = buf;
            compiler_fence(Ordering::SeqCst);
        }

        #[inline]
        fn stop(&mut self) -> HardwareCounts {
            compiler_fence(Ordering::SeqCst);
            let mut end = [0u64; KPC_MAX_COUNTERS];
            if !self.read(&mut end) {
                return HardwareCounts::default();
            }
            let delta = |i: usize| end[i].saturating_sub(self.start[i]);
            let base = self.configurable_base;
            HardwareCounts {
                cycles: delta(FIXED_CYCLES),
                instructions: delta(FIXED_INSTRUCTIONS),
                branches: delta(base),
                branch_misses: delta(base + 1),
            }
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    impl std::fmt::Debug for KperfCounters {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("KperfCounters")
                .field("n_counters", &self.n_counters)
                .finish()
        }
    }
}
