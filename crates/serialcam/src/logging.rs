//! Logging setup for serialcam.
//!
//! Installs a `tracing-subscriber` registry filtered by verbosity, with
//! `RUST_LOG` taking precedence.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Crates whose events are shown without `RUST_LOG`.
///
/// `tower_http` carries the per-request spans of the HTTP server.
const LOG_TARGETS: [&str; 2] = ["serialcam", "tower_http"];

/// How much the CLI logs, from `-q` to `-vv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Images stored, sessions opened and closed.
    #[default]
    Normal,
    /// Marker hits and per-request traces.
    Verbose,
    /// Every chunk read from the port.
    Trace,
}

impl Verbosity {
    /// Maximum level shown for our targets.
    #[must_use]
    pub fn to_level_filter(&self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }
}

/// `EnvFilter` directives used when `RUST_LOG` is unset.
fn default_filter(verbosity: Verbosity) -> String {
    let level = verbosity.to_level_filter();
    LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber.
///
/// Later calls are ignored, so tests and the binary can both call it.
///
/// ```no_run
/// use serialcam::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::Verbose);
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    );

    let _ = subscriber.try_init();
}

/// Warnings and errors, routed through the test harness's capture.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}
