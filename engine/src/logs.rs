//! Tracing setup for the engine process

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::errors::EngineError;

/// File name prefix of the daily log files
const LOG_FILE_PREFIX: &str = "launchpad.log";

/// Dependencies that only get to speak at warn and above
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls", "h2"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Filter directive used when `RUST_LOG` is not set: the engine and
    /// request traces at this level, chatty dependencies held at warn
    pub fn filter_directive(&self) -> String {
        let mut directives = vec![
            self.as_str().to_string(),
            format!("launchpad={}", self.as_str()),
            format!("tower_http={}", self.as_str()),
        ];
        if !matches!(self, LogLevel::Trace) {
            directives.extend(QUIET_TARGETS.iter().map(|t| format!("{t}=warn")));
        }
        directives.join(",")
    }
}

#[derive(Debug, Clone)]
pub struct LogOptions {
    pub log_level: LogLevel,

    /// Write logs to stdout
    pub stdout: bool,

    /// Directory of daily log files, no file output when absent
    pub log_dir: Option<PathBuf>,

    pub json_format: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            stdout: true,
            log_dir: None,
            json_format: false,
        }
    }
}

fn format_layer<S, W>(writer: W, json: bool, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_ansi(ansi);
    if json {
        layer.json().boxed()
    } else {
        layer.boxed()
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer when dropped; keep it alive
/// for the lifetime of the process.
pub fn init_logging(options: LogOptions) -> Result<Option<WorkerGuard>, EngineError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.log_level.filter_directive()));

    let mut guard = None;
    let file_layer = options.log_dir.as_ref().map(|dir| {
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        guard = Some(file_guard);
        format_layer(writer, options.json_format, false)
    });
    let stdout_layer = options
        .stdout
        .then(|| format_layer(std::io::stdout, options.json_format, true));

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| EngineError::ConfigError(e.to_string()))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_serde() {
        let level: LogLevel = serde_json::from_str("\"warning\"").unwrap();
        assert_eq!(level, LogLevel::Warn);
        assert_eq!(serde_json::to_string(&LogLevel::Debug).unwrap(), "\"debug\"");
        assert!(serde_json::from_str::<LogLevel>("\"loud\"").is_err());
    }

    #[test]
    fn test_filter_directive() {
        let directive = LogLevel::Debug.filter_directive();
        assert!(directive.starts_with("debug,launchpad=debug,tower_http=debug"));
        assert!(directive.contains("reqwest=warn"));
        assert!(!LogLevel::Trace.filter_directive().contains("=warn"));
        assert!(EnvFilter::try_new(directive).is_ok());
    }
}
