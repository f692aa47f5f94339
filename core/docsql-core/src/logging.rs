//! Tracing subscriber setup.
//!
//! The engine emits spans and events through `tracing` unconditionally; the
//! subscriber wiring here only compiles with the `logging` feature, so
//! embedding applications can install their own instead.

#[cfg(feature = "logging")]
use tracing_subscriber::{EnvFilter, fmt};

/// Install the global subscriber, honoring `RUST_LOG` and defaulting to
/// `info`.
#[cfg(feature = "logging")]
pub fn init() {
    init_with_level("info")
}

/// Install the global subscriber with an explicit default level. A set
/// `RUST_LOG` still takes precedence.
#[cfg(feature = "logging")]
pub fn init_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        // Join branch tasks run on their own threads.
        .with_thread_ids(true)
        .init();
}

/// Verbose subscriber routed through the test harness's capture; safe to
/// call from every test, repeat calls are ignored.
#[cfg(feature = "logging")]
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("docsql_core=debug"))
        .with_test_writer()
        .try_init();
}

// No-op stand-ins without the feature.
#[cfg(not(feature = "logging"))]
pub fn init() {}

#[cfg(not(feature = "logging"))]
pub fn init_with_level(_level: &str) {}

#[cfg(not(feature = "logging"))]
pub fn init_test() {}
