//! # Observability
//!
//! Structured logging setup for the planner auth crates.
//!
//! Libraries only ever use `tracing` macros. Binaries call
//! [`init_with_config`] once at startup; this installs:
//!
//! - a JSONL file layer (default `~/.planner/logs/dev.jsonl`), one object per
//!   event with timestamp, level, service, pid, target, message and fields
//! - an optional compact stderr layer for foreground runs
//!
//! Credential-bearing fields (`access_token`, `refresh_token`,
//! `authorization`, ...) are redacted by the JSON layer before anything is
//! written, so a stray `debug!(access_token = %t)` never lands on disk.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "planner-cli".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! tracing::info!("ready");
//! ```

mod json_layer;
mod sink;

pub use json_layer::{is_sensitive_field, JsonLayer, LogEntry, REDACTED};
pub use sink::{default_log_path, FileSink};

use std::io;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Runtime export policy mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObservabilityMode {
    /// Development mode: structured fields are written (after redaction).
    #[default]
    DevVerbose,
    /// Production mode: only message metadata is written, fields are dropped.
    ProdMetadataOnly,
}

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, included in every log line.
    pub service_name: String,

    /// Default log level filter. `RUST_LOG` takes precedence when set.
    pub default_level: String,

    /// Optional custom log file path. Defaults to [`default_log_path`].
    pub log_path: Option<PathBuf>,

    /// Also emit compact logs to stderr.
    pub also_stderr: bool,

    /// Runtime observability mode.
    pub mode: ObservabilityMode,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
            mode: ObservabilityMode::DevVerbose,
        }
    }
}

/// Initialize logging with default settings for `service_name`.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with a custom configuration.
///
/// If the log file cannot be opened the file layer is skipped and a stderr
/// layer is installed instead. Calling this twice is harmless; the second
/// call leaves the first subscriber in place.
pub fn init_with_config(config: LogConfig) {
    let log_path = config.log_path.clone().or_else(default_log_path);

    let file_layer = match log_path.as_ref().map(FileSink::open) {
        Some(Ok(sink)) => Some(
            JsonLayer::new(config.service_name.clone(), sink)
                .with_fields(config.mode == ObservabilityMode::DevVerbose)
                .with_filter(env_filter(&config.default_level)),
        ),
        Some(Err(err)) => {
            eprintln!(
                "observability: failed to open log file {:?}: {}",
                log_path, err
            );
            None
        }
        None => None,
    };

    let stderr_wanted = config.also_stderr || file_layer.is_none();
    let stderr_layer = stderr_wanted.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    let installed = tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            service = %config.service_name,
            log_path = ?log_path,
            "observability initialized"
        );
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert!(config.log_path.is_none());
        assert!(!config.also_stderr);
        assert_eq!(config.mode, ObservabilityMode::DevVerbose);
    }
}
