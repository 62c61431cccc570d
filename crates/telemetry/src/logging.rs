use serde::{Deserialize, Serialize};
use std::env;
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Crates that are too chatty at `info`
const QUIET_TARGETS: [&str; 4] = ["hyper=warn", "tokio=warn", "reqwest=warn", "ort=warn"];

/// Log output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    /// Human-readable format (default for development)
    #[default]
    Pretty,
    /// Compact text format
    Compact,
    /// JSON format for log aggregation systems
    Json,
}

impl LogFormat {
    /// Parse log format from the `LOG_FORMAT` environment variable
    pub fn from_env() -> Self {
        match env::var("LOG_FORMAT")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "json" => Self::Json,
            "compact" => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

/// Configuration for structured logging
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Service name, e.g. "people-service"
    pub service_name: String,
    pub service_version: String,
    /// Deployment environment (development/staging/production)
    pub environment: String,
    /// Emit span open/close events
    pub enable_span_events: bool,
    /// When set, a daily rolling JSON log is also written to this directory
    pub log_dir: Option<String>,
}

impl LogConfig {
    /// Build a configuration from `LOG_FORMAT`, `SERVICE_VERSION`, `ENVIRONMENT`,
    /// `LOG_SPAN_EVENTS`, `LOG_TO_FILE` and `LOG_DIR`
    pub fn new(service_name: impl Into<String>) -> Self {
        let log_to_file = env::var("LOG_TO_FILE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false);

        Self {
            format: LogFormat::from_env(),
            service_name: service_name.into(),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            enable_span_events: env::var("LOG_SPAN_EVENTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            log_dir: if log_to_file {
                Some(env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()))
            } else {
                None
            },
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_span_events(mut self, enable: bool) -> Self {
        self.enable_span_events = enable;
        self
    }

    pub fn with_file_logging(mut self, log_dir: impl Into<String>) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }

    fn span_events(&self) -> FmtSpan {
        if self.enable_span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Keeps the background file writer alive. Hold it for the lifetime of the process,
/// dropping it flushes and stops file logging.
#[must_use]
pub struct LogGuard {
    _file_writer: Option<WorkerGuard>,
}

fn env_filter() -> EnvFilter {
    QUIET_TARGETS.iter().fold(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        |filter, directive| match directive.parse() {
            Ok(directive) => filter.add_directive(directive),
            Err(_) => filter,
        },
    )
}

fn stdout_layer(config: &LogConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_span_events(config.span_events())
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_writer(io::stdout)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(config.span_events())
            .with_target(true)
            .with_thread_ids(false)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(config.span_events())
            .with_target(true)
            .with_thread_ids(false)
            .with_line_number(true)
            .boxed(),
    }
}

/// Initialize structured logging with the given configuration.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_structured_logging(config: LogConfig) -> LogGuard {
    let mut layers = vec![stdout_layer(&config)];
    let mut file_writer = None;

    if let Some(log_dir) = &config.log_dir {
        let file_appender =
            tracing_appender::rolling::daily(log_dir, format!("{}.log", config.service_name));
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        layers.push(
            fmt::layer()
                .json()
                .with_span_events(config.span_events())
                .with_writer(non_blocking)
                .boxed(),
        );
        file_writer = Some(guard);
    }

    let installed = tracing_subscriber::registry()
        .with(layers)
        .with(env_filter())
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            service.name = %config.service_name,
            service.version = %config.service_version,
            environment = %config.environment,
            format = ?config.format,
            file_logging = config.log_dir.is_some(),
            "structured logging initialized"
        );
    }

    LogGuard {
        _file_writer: file_writer,
    }
}

/// Initialize logging for a named service with settings from the environment
pub fn init_with_service(service_name: impl Into<String>) -> LogGuard {
    init_structured_logging(LogConfig::new(service_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_env() {
        std::env::remove_var("LOG_FORMAT");
        assert_eq!(LogFormat::from_env(), LogFormat::Pretty);

        std::env::set_var("LOG_FORMAT", "JSON");
        assert_eq!(LogFormat::from_env(), LogFormat::Json);

        std::env::set_var("LOG_FORMAT", "compact");
        assert_eq!(LogFormat::from_env(), LogFormat::Compact);

        std::env::set_var("LOG_FORMAT", "something-else");
        assert_eq!(LogFormat::from_env(), LogFormat::Pretty);

        std::env::remove_var("LOG_FORMAT");
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new("people-service")
            .with_version("1.2.0")
            .with_environment("production")
            .with_format(LogFormat::Json)
            .with_span_events(true)
            .with_file_logging("/var/log/people");

        assert_eq!(config.service_name, "people-service");
        assert_eq!(config.service_version, "1.2.0");
        assert_eq!(config.environment, "production");
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.log_dir.as_deref(), Some("/var/log/people"));
        assert!(config.span_events() == FmtSpan::NEW | FmtSpan::CLOSE);
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        let _first = init_structured_logging(LogConfig::new("first").with_format(LogFormat::Compact));
        let _second = init_structured_logging(LogConfig::new("second"));
    }
}
