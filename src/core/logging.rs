//! Logging initialization and utilities
//!
//! Streaming traffic is chatty: chunk loads, evictions and loader churn log
//! at `debug`, per-operation i/o at `trace`. The initializers here map the
//! old debug-streaming toggles onto target filters for the `streaming` and
//! `io` modules so the rest of the engine can stay at `info`.

use env_logger::Env;

/// Filter enabled by the verbose streaming toggle.
const VERBOSE_STREAMING_FILTER: &str = "info,animstream::streaming=trace,animstream::io=trace";

/// Initialize the logging system at the default `info` level.
///
/// Override with the RUST_LOG environment variable.
pub fn init() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
}

/// Initialize with streaming diagnostics turned all the way up.
///
/// Every chunk request, eviction, probe and loader transition is logged;
/// the rest of the engine stays at `info`. RUST_LOG still overrides.
pub fn init_verbose() {
    env_logger::Builder::from_env(Env::default().default_filter_or(VERBOSE_STREAMING_FILTER)).init();
}

/// Idempotent initializer for test and bench harnesses, where many cases
/// share one process and race to install the global logger. Output is
/// captured per test.
///
/// Returns `false` when a logger was already installed.
pub fn init_for_tests() -> bool {
    env_logger::Builder::from_env(Env::default().default_filter_or(VERBOSE_STREAMING_FILTER))
        .is_test(true)
        .try_init()
        .is_ok()
}
