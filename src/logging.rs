//! Logging setup for rowdb.
//!
//! The crate itself only emits `tracing` events:
//!
//! | Level | What |
//! |-------|------|
//! | `error` | engine failures (with SQLite's extended code), missing key provider |
//! | `warn` | stale observers, values that do not fit their column, decrypt failures |
//! | `debug` | SQL text, schema registration, worker lifecycle |
//! | `trace` | bound arguments |
//!
//! With the `logging` feature these helpers install a `tracing-subscriber`
//! formatter; without it they do nothing, so callers can invoke them
//! unconditionally.

#[cfg(feature = "logging")]
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize logging at `info`, overridable through `RUST_LOG`.
///
/// # Example
/// ```rust
/// rowdb::logging::init();
/// ```
#[cfg(feature = "logging")]
pub fn init() {
    init_with_level("info")
}

/// Initialize logging with a specific level (`RUST_LOG` still wins).
///
/// Does nothing if a global subscriber is already installed.
#[cfg(feature = "logging")]
pub fn init_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_line_number(true)
        .try_init();
}

/// Initialize verbose logging captured by the test harness.
#[cfg(feature = "logging")]
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("rowdb=debug"))
        .with_test_writer()
        .try_init();
}

#[cfg(not(feature = "logging"))]
pub fn init() {}

#[cfg(not(feature = "logging"))]
pub fn init_with_level(_level: &str) {}

#[cfg(not(feature = "logging"))]
pub fn init_test() {}
