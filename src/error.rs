//! Error types.
//!
//! Two kinds of failure are kept apart:
//! - [`BenchError`]: the caller asked for something the benchmark loop cannot
//!   do (bad configuration). Returned before any measurement runs.
//! - [`CountersUnavailable`]: hardware counters could not be opened. This is
//!   an expected, degraded mode; measurements continue with wall-clock time.

use thiserror::Error;

/// Errors returned by the benchmark entry points.
#[derive(Debug, Error)]
pub enum BenchError {
    /// Inner repeat factor outside `{1, 10, 100, 1000, 10000}`.
    #[error("unsupported inner repeat factor {0} (expected one of 1, 10, 100, 1000, 10000)")]
    UnsupportedInnerRepeat(u64),

    /// Configuration values that contradict each other.
    #[error("invalid benchmark configuration: {0}")]
    InvalidConfig(String),

    /// Configuration text could not be parsed.
    #[error("failed to parse benchmark configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

/// Why a counter backend could not be opened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CountersUnavailable {
    /// No counter backend exists for this platform (or it was compiled out).
    #[error("hardware counters are not supported on this platform")]
    UnsupportedPlatform,

    /// Counters were explicitly disabled through `BackendSpec::WallClock`.
    #[error("hardware counters disabled by configuration")]
    Disabled,

    /// The kernel refused access.
    #[error("permission denied opening hardware counters: {hint}")]
    PermissionDenied {
        /// How to obtain access on this platform.
        hint: String,
    },

    /// The private kperf framework could not be loaded.
    #[error("kperf framework not found")]
    FrameworkNotFound,

    /// Counters exist but could not be configured.
    #[error("hardware counter configuration failed: {0}")]
    ConfigurationFailed(String),
}

/// Result alias for benchmark operations.
pub type Result<T> = std::result::Result<T, BenchError>;
