//! Logging setup and the process-wide "offline mode" banner gate.

use std::sync::OnceLock;

use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

/// Errors raised while configuring the global tracing subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The subscriber was already installed (by this or another call).
    #[error("global tracing subscriber already set")]
    AlreadyInitialized,
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One line per event, human-readable. Default for interactive use.
    #[default]
    Compact,
    /// Newline-delimited JSON, for the daemon's rolling log file.
    Json,
}

/// Configuration for [`setup_logging`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    level: String,
    format: LogFormat,
    directives: Vec<String>,
}

impl LogConfig {
    /// Start from a base level (`"info"`, `"debug"`, ...).
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            format: LogFormat::default(),
            directives: Vec::new(),
        }
    }

    /// Override the output format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Append an extra `EnvFilter` directive (e.g. `"happy_sync=trace"`).
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    fn build_filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::try_new(&self.level).unwrap_or_else(|_| EnvFilter::new("info"));
        for directive in &self.directives {
            if let Ok(d) = directive.parse() {
                filter = filter.add_directive(d);
            }
        }
        filter
    }
}

/// Install the global tracing subscriber. Honors `RUST_LOG` via
/// [`EnvFilter`] layered on top of `config`'s base level.
///
/// # Errors
///
/// Returns [`TelemetryError::AlreadyInitialized`] if a global subscriber
/// is already set (e.g. called twice, or from a test harness).
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = config.build_filter();
    let result = match config.format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::NONE)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init(),
    };
    result.map_err(|_| TelemetryError::AlreadyInitialized)
}

/// Install logging at `"info"` with the compact format; the common case
/// for `happy` and `happy codex` when `DEBUG` is unset.
///
/// # Errors
///
/// See [`setup_logging`].
pub fn setup_default_logging() -> TelemetryResult<()> {
    setup_logging(&LogConfig::new("info"))
}

static OFFLINE_BANNER_SHOWN: OnceLock<()> = OnceLock::new();

/// Show the "working in offline mode" banner exactly once per process
/// lifetime, no matter how many offline-tolerant calls trigger it.
///
/// This is distinct from log-level filtering: the banner is a
/// user-visible, terse, one-line notice (§7) that must reach the
/// terminal even when `RUST_LOG=error` would suppress a `tracing::warn!`
/// call, so it is written directly to stderr rather than through the
/// subscriber.
pub fn warn_offline_once() {
    if OFFLINE_BANNER_SHOWN.set(()).is_ok() {
        eprintln!("⚠️  Happy server unreachable - working in offline mode");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_banner_gate_fires_once() {
        // OnceLock state is process-global; exercise the underlying
        // primitive directly rather than the shared static so this test
        // doesn't interfere with others in the same binary.
        let gate: OnceLock<()> = OnceLock::new();
        let mut fired = 0;
        for _ in 0..5 {
            if gate.set(()).is_ok() {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn log_config_builders_compose() {
        let config = LogConfig::new("debug")
            .with_format(LogFormat::Json)
            .with_directive("happy_sync=trace");
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.directives, vec!["happy_sync=trace".to_string()]);
    }
}
