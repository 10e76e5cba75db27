//! Logging setup shared by the orchestrator and its workers.
//!
//! Everything is written to stderr: a worker's stdout carries its IPC
//! channel. Workers inherit stderr, so their records interleave with the
//! parent's.
//!
//! # Environment Variables
//!
//! - `MMSCORE_LOG` - Log filter (overrides RUST_LOG)
//! - `MMSCORE_LOG_LEVEL` - Log level: error, warn, info, debug, trace
//! - `MMSCORE_LOG_FORMAT` - Output format: pretty, compact, json
//! - `MMSCORE_LOG_FILE` - Path to log file (in addition to stderr)
//! - `RUST_LOG` - Standard Rust log filter (fallback)

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{Level, Subscriber};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, MakeWriter, format::FmtSpan},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

pub const LOG_FILTER_ENV: &str = "MMSCORE_LOG";
pub const LOG_LEVEL_ENV: &str = "MMSCORE_LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "MMSCORE_LOG_FORMAT";
pub const LOG_FILE_ENV: &str = "MMSCORE_LOG_FILE";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Multi-line human-readable records
    Pretty,
    /// Single-line records
    #[default]
    Compact,
    /// One JSON object per record
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "full" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Unknown log format: '{}'. Valid options: pretty, compact, json",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Rotation of the optional log file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogRotation {
    Hourly,
    Daily,
    /// Single file, appended to across runs
    #[default]
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level, used when no filter is set
    pub level: Level,
    pub format: LogFormat,
    /// Also write records to this file
    pub file_path: Option<PathBuf>,
    pub rotation: LogRotation,
    /// Log span timing on close
    pub span_events: bool,
    /// Filter directive string; overrides `level`
    pub filter: Option<String>,
    /// Emit ANSI colors on stderr
    pub ansi: bool,
    pub show_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            file_path: None,
            rotation: LogRotation::Never,
            span_events: false,
            filter: None,
            ansi: true,
            show_target: false,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for worker processes: configuration comes from the
    /// environment exported by the parent, and only the parent writes the
    /// log file.
    pub fn for_worker() -> Self {
        let mut config = Self::default().with_env_overrides();
        config.file_path = None;
        config
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    pub fn with_rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    /// Apply environment variable overrides.
    ///
    /// A filter already set from the command line wins over `MMSCORE_LOG`,
    /// `RUST_LOG` and `MMSCORE_LOG_LEVEL`.
    pub fn with_env_overrides(mut self) -> Self {
        if self.filter.is_none() {
            if let Ok(filter) = std::env::var(LOG_FILTER_ENV) {
                self.filter = Some(filter);
            } else if let Ok(filter) = std::env::var("RUST_LOG") {
                self.filter = Some(filter);
            }
        }

        if self.filter.is_none()
            && let Ok(level_str) = std::env::var(LOG_LEVEL_ENV)
        {
            self.level = parse_level(&level_str).unwrap_or(self.level);
        }

        if let Ok(format) = std::env::var(LOG_FORMAT_ENV)
            && let Ok(f) = format.parse()
        {
            self.format = f;
        }

        if let Ok(path) = std::env::var(LOG_FILE_ENV) {
            self.file_path = Some(PathBuf::from(path));
        }

        self
    }

    /// Filter directives in effect, as passed to worker processes.
    pub fn directives(&self) -> String {
        match &self.filter {
            Some(filter) => filter.clone(),
            None => self.level.to_string().to_lowercase(),
        }
    }

    fn build_filter(&self) -> EnvFilter {
        EnvFilter::try_new(self.directives()).unwrap_or_else(|_| {
            eprintln!(
                "Warning: Invalid log filter '{}', using default",
                self.directives()
            );
            EnvFilter::new(self.level.to_string().to_lowercase())
        })
    }
}

/// Parse a log level string.
pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

fn fmt_layer<S, W>(config: &LogConfig, writer: W, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let span_events = if config.span_events {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(config.show_target)
        .with_span_events(span_events);

    match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
    }
}

/// Initialize the global tracing subscriber.
///
/// Writes to stderr and, when `file_path` is set, to a rolling log file.
/// Later calls are silently ignored.
pub fn init(config: LogConfig) {
    let filter = config.build_filter();

    let file_layer = config.file_path.as_ref().map(|path| {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("mmscore.log");
        let appender = RollingFileAppender::new(config.rotation.into(), parent, file_name);
        fmt_layer(&config, appender, false)
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer(&config, std::io::stderr, config.ansi))
        .with(file_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("full".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("warning"), Some(Level::WARN));
        assert_eq!(parse_level("DEBUG"), Some(Level::DEBUG));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn test_directives() {
        assert_eq!(LogConfig::default().directives(), "info");
        assert_eq!(
            LogConfig::new().with_level(Level::DEBUG).directives(),
            "debug"
        );
        assert_eq!(
            LogConfig::new()
                .with_level(Level::DEBUG)
                .with_filter("mmscore::worker=trace")
                .directives(),
            "mmscore::worker=trace"
        );
    }

    #[test]
    fn test_cli_filter_wins_over_env() {
        // with_env_overrides never replaces a filter that is already set
        let config = LogConfig::new()
            .with_filter("warn")
            .with_env_overrides();
        assert_eq!(config.filter.as_deref(), Some("warn"));
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new()
            .with_format(LogFormat::Json)
            .with_rotation(LogRotation::Daily)
            .with_span_events(true)
            .with_ansi(false)
            .with_file(PathBuf::from("/tmp/mmscore.log"));

        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.rotation, LogRotation::Daily);
        assert!(config.span_events);
        assert!(!config.ansi);
        assert_eq!(config.file_path, Some(PathBuf::from("/tmp/mmscore.log")));
    }
}
