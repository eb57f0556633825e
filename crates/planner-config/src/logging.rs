//! Logging initialization.
//!
//! Thin wrapper over the observability crate that maps environment settings
//! onto a [`observability::LogConfig`]. Output goes to the JSONL file at
//! `~/.planner/logs/dev.jsonl`. Stderr stays clean for command output unless
//! `PLANNER_LOG_STDERR` asks for a copy.

use observability::{LogConfig, ObservabilityMode};

/// Initialize logging for the CLI front end.
pub fn init_logging(level: &str) {
    init_logging_for_service("planner-cli", level);
}

/// Initialize logging with a custom service name.
///
/// `PLANNER_OBS_MODE=prod` switches the file layer to metadata-only output.
/// `PLANNER_LOG_STDERR=1` adds a stderr copy.
pub fn init_logging_for_service(service_name: &str, level: &str) {
    let mode = match std::env::var("PLANNER_OBS_MODE")
        .unwrap_or_else(|_| "dev".to_string())
        .to_ascii_lowercase()
        .as_str()
    {
        "prod" | "production" => ObservabilityMode::ProdMetadataOnly,
        _ => ObservabilityMode::DevVerbose,
    };

    let also_stderr = stderr_requested(std::env::var("PLANNER_LOG_STDERR").ok().as_deref());

    observability::init_with_config(LogConfig {
        service_name: service_name.into(),
        default_level: parse_level(level).to_string().to_ascii_lowercase(),
        also_stderr,
        mode,
        ..Default::default()
    });
}

fn stderr_requested(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1") | Some("true") | Some("yes")
    )
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
