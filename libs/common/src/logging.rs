//! Logging bootstrap
//!
//! Console output always; a size-bounded set of daily rolling files when a
//! log file is configured. `RUST_LOG` overrides the configured level.

use std::path::{Path, PathBuf};

use errors::{BridgeError, BridgeResult};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Rolled files kept next to the active one
const MAX_LOG_FILES: usize = 3;

/// Chatty dependencies capped regardless of the configured level
const QUIET_TARGETS: &str = "rumqttc=warn,reqwest=warn,hyper=warn,hyper_util=warn";

fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// `2026-01-31 12:00:00.123 [INFO] fronsrv::scheduler: message`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Local::now();
        write!(writer, "{} ", now.format("%Y-%m-%d %H:%M:%S%.3f"))?;

        let meta = event.metadata();
        let level = *meta.level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m",
                Level::DEBUG => "\x1b[34m",
                Level::INFO => "\x1b[32m",
                Level::WARN => "\x1b[33m",
                Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }
        write!(writer, "{}: ", meta.target())?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Used as the file name when `file` names a directory
    pub service_name: String,
    /// Level or full filter directive ("debug", "info,fronsrv=debug")
    pub level: String,
    /// Log file path, console only when `None`
    pub file: Option<PathBuf>,
    /// JSON lines in the file instead of the bracketed text format
    pub json: bool,
    /// ANSI colors on the console
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "fronsrv".to_string(),
            level: "info".to_string(),
            file: None,
            json: false,
            ansi: true,
        }
    }
}

/// Keeps the non-blocking file writer flushing; drop it last
#[derive(Debug)]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Build the filter: `RUST_LOG` wins, otherwise the configured level
pub fn build_filter(level: &str) -> BridgeResult<EnvFilter> {
    if let Ok(directives) = std::env::var("RUST_LOG") {
        if !directives.trim().is_empty() {
            return EnvFilter::try_new(directives)
                .map_err(|e| BridgeError::invalid_config("RUST_LOG", e.to_string()));
        }
    }
    let directives = format!("{},{}", level.trim().to_ascii_lowercase(), QUIET_TARGETS);
    EnvFilter::try_new(directives).map_err(|e| BridgeError::invalid_config("general.log_level", e.to_string()))
}

/// Split a configured log file into (directory, file name)
fn file_parts(path: &Path, service_name: &str) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map_or_else(|| format!("{service_name}.log"), str::to_string);
    (dir, name)
}

/// Install the global subscriber
pub fn init(config: &LogConfig) -> BridgeResult<LogGuard> {
    let filter = build_filter(&config.level)?;

    let console_layer = fmt::layer()
        .with_ansi(config.ansi)
        .event_format(BracketedLevelFormat)
        .boxed();

    let mut file_guard = None;
    let file_layer = match &config.file {
        Some(path) => {
            let (dir, name) = file_parts(path, &config.service_name);
            std::fs::create_dir_all(&dir)?;

            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(name)
                .max_log_files(MAX_LOG_FILES)
                .build(&dir)
                .map_err(|e| BridgeError::invalid_config("general.log_file", e.to_string()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            file_guard = Some(guard);

            let layer = if config.json {
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_target(true)
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .event_format(BracketedLevelFormat)
                    .boxed()
            };
            Some(layer)
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| BridgeError::Configuration(format!("logging already initialised: {e}")))?;

    if let Some(path) = &config.file {
        tracing::info!("Logging to console and {}", path.display());
    }

    Ok(LogGuard { _file: file_guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_parts() {
        let (dir, name) = file_parts(Path::new("/var/log/fronsrv/app.log"), "fronsrv");
        assert_eq!(dir, PathBuf::from("/var/log/fronsrv"));
        assert_eq!(name, "app.log");

        let (dir, name) = file_parts(Path::new("bridge.log"), "fronsrv");
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(name, "bridge.log");
    }

    #[test]
    fn test_invalid_level_rejected() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert!(build_filter("info").is_ok());
        assert!(build_filter("DEBUG").is_ok());
        assert!(build_filter("[[[").is_err());
    }
}
