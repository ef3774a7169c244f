use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const ENABLED_ENV: &str = "AGENT_STREAM_OBSERVABILITY";
const LEVEL_ENV: &str = "AGENT_STREAM_LOG_LEVEL";
const JSON_PATH_ENV: &str = "AGENT_STREAM_JSON_LOG_PATH";
const DEFAULT_JSON_FILE: &str = "agent-run-stream.logs.jsonl";

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn enabled(raw: Option<&str>) -> bool {
    raw.and_then(parse_switch).unwrap_or(true)
}

fn env_filter(level: Option<&str>) -> EnvFilter {
    if let Some(level) = level
        && let Ok(filter) = EnvFilter::try_new(level)
    {
        return filter;
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Splits a log path into the directory and file name `tracing-appender` expects.
fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_JSON_FILE)
        .to_string();
    (dir, file_name)
}

/// Installs the process-wide `tracing` subscriber. Later calls are no-ops.
///
/// Environment variables:
/// - `AGENT_STREAM_OBSERVABILITY`: `off`/`false`/`0` disables logging (default on).
/// - `AGENT_STREAM_LOG_LEVEL`: filter directive (`info`, `agent_run_stream=debug`, ...).
/// - `AGENT_STREAM_JSON_LOG_PATH`: write JSONL to this file instead of the console.
/// - `RUST_LOG`: fallback filter.
///
/// Console output goes to stderr so stdout stays free for event output.
pub fn init_observability() {
    INIT.get_or_init(|| {
        if !enabled(std::env::var(ENABLED_ENV).ok().as_deref()) {
            return;
        }

        let filter = env_filter(std::env::var(LEVEL_ENV).ok().as_deref());
        match std::env::var(JSON_PATH_ENV) {
            Ok(raw) if !raw.trim().is_empty() => {
                let (dir, file_name) = split_log_path(Path::new(raw.trim()));
                let _ = std::fs::create_dir_all(&dir);
                let writer = tracing_appender::rolling::never(dir, file_name);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(false)
                    .with_writer(writer);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(json_layer)
                    .try_init();
            }
            _ => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}
