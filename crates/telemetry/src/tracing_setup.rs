//! Structured logging for the monitor host and its pipeline crates.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Crates whose logs are raised to `debug` by the `debugLogging` setting.
const PIPELINE_TARGETS: &[&str] = &["pipeline", "monitor_core", "monitor_storage", "bridge", "overlay"];

/// Output encoding of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    /// `LOG_JSON=1` or `LOG_JSON=true` selects JSON lines.
    fn from_env() -> Self {
        match std::env::var("LOG_JSON") {
            Ok(v) if v == "1" || v.eq_ignore_ascii_case("true") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Base filter, e.g. "info" or "pipeline=trace"
    pub filter: String,
    pub format: LogFormat,
    /// Log span open/close events
    pub span_events: bool,
    /// Mirrors the `debugLogging` setting
    pub debug_logging: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::default(),
            span_events: false,
            debug_logging: false,
        }
    }
}

impl TracingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_span_events(mut self, span_events: bool) -> Self {
        self.span_events = span_events;
        self
    }

    pub fn with_debug_logging(mut self, debug_logging: bool) -> Self {
        self.debug_logging = debug_logging;
        self
    }

    /// Full filter string, with pipeline targets appended when debug logging is on.
    pub fn directives(&self) -> String {
        if !self.debug_logging {
            return self.filter.clone();
        }
        let mut directives = self.filter.clone();
        for target in PIPELINE_TARGETS {
            directives.push(',');
            directives.push_str(target);
            directives.push_str("=debug");
        }
        directives
    }
}

/// Installs the global subscriber.
///
/// Later calls leave the first subscriber in place.
pub fn init_tracing(config: TracingConfig) {
    let directives = config.directives();
    let env_filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"));

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(span_events)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_span_events(span_events).with_target(true))
            .try_init(),
    };

    if installed.is_ok() {
        tracing::info!(filter = %directives, format = ?config.format, "Logging initialized");
    }
}

/// Installs the subscriber from `RUST_LOG` / `LOG_JSON` plus the `debugLogging` setting.
pub fn init_tracing_from_env(debug_logging: bool) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    init_tracing(
        TracingConfig::new()
            .with_filter(filter)
            .with_format(LogFormat::from_env())
            .with_debug_logging(debug_logging),
    );
}
