//! Logging setup for the command line
//!
//! Log lines go to stderr so they never mix with table output on stdout.
//! `RUST_LOG` overrides the configured filter. A daily-rotated JSON log file
//! can be enabled for bug reports.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory for JSON log files
    pub log_dir: PathBuf,

    /// Whether to write JSON logs to `log_dir`
    pub enable_json_logs: bool,

    /// Whether to log to stderr
    pub enable_console_logs: bool,

    /// Whether to include file/line information in logs
    pub include_location: bool,

    /// Whether to log span open/close (timing of scans and pipelines)
    pub enable_spans: bool,

    /// Default log level filter
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: log_directory(),
            enable_json_logs: false,
            enable_console_logs: true,
            include_location: false,
            enable_spans: false,
            default_filter: "warn,redis_admin_cli=info,redis_admin_redis=info,redis_admin_core=info"
                .to_string(),
        }
    }
}

impl LoggingConfig {
    /// Verbose console output with spans and source locations
    pub fn development() -> Self {
        Self {
            include_location: true,
            enable_spans: true,
            default_filter: "info,redis_admin_cli=debug,redis_admin_redis=debug,redis_admin_core=debug"
                .to_string(),
            ..Self::default()
        }
    }

    /// Preset for a `-v` count: 0 is the default, 1 adds debug output from
    /// the admin crates, 2 and more is development
    pub fn for_verbosity(verbose: u8) -> Self {
        match verbose {
            0 => Self::default(),
            1 => Self {
                default_filter:
                    "warn,redis_admin_cli=debug,redis_admin_redis=debug,redis_admin_core=debug"
                        .to_string(),
                ..Self::default()
            },
            _ => Self::development(),
        }
    }

    pub fn with_json_logs(mut self, enabled: bool) -> Self {
        self.enable_json_logs = enabled;
        self
    }
}

/// Initialize the global subscriber.
///
/// The returned guard flushes the JSON file writer and must be held until
/// the program exits.
pub fn init(config: LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    // RUST_LOG takes precedence over the default filter
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let span_events = if config.enable_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let mut layers = Vec::new();
    let mut guard = None;

    if config.enable_console_logs {
        let console_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_span_events(span_events.clone())
            .with_ansi(true)
            .compact()
            .with_filter(env_filter.clone())
            .boxed();

        layers.push(console_layer);
    }

    if config.enable_json_logs {
        std::fs::create_dir_all(&config.log_dir)?;

        let file_appender = tracing_appender::rolling::daily(&config.log_dir, "redis-admin.log");
        let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(worker_guard);

        let json_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(span_events)
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(non_blocking)
            .with_filter(env_filter)
            .boxed();

        layers.push(json_layer);
    }

    tracing_subscriber::registry().with(layers).try_init()?;

    tracing::debug!(
        log_dir = %config.log_dir.display(),
        json_enabled = config.enable_json_logs,
        console_enabled = config.enable_console_logs,
        "logging initialized"
    );

    Ok(guard)
}

/// Where JSON logs are written
pub fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("redis-admin")
        .join("logs")
}
