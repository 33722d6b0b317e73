//! Tracing subscriber configuration for the service binary
//!
//! Library code only emits events and spans (`job`, `inference`, `request`); the binary
//! picks a format and destination here. Backend `log` records are forwarded through the
//! `tracing-log` bridge.

#[cfg(feature = "cli")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Environment variable overriding the verbosity-derived filter
pub const LOG_FILTER_ENV: &str = "RUST_LOG";

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable output with colors (default)
    Console,
    /// Compact output without colors for CI and containers
    Compact,
    /// JSON structured logging for log shippers
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Configuration for tracing output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TracingOutput {
    Console,
    /// Daily rolling file next to the given path
    #[cfg(feature = "tracing-files")]
    File(std::path::PathBuf),
    #[cfg(feature = "tracing-files")]
    Both(std::path::PathBuf),
}

/// Keeps a non-blocking file writer flushing; hold it until shutdown
#[cfg(feature = "tracing-files")]
pub type TracingGuard = Option<tracing_appender::non_blocking::WorkerGuard>;
#[cfg(not(feature = "tracing-files"))]
pub type TracingGuard = Option<()>;

/// Tracing configuration builder
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Verbosity level (maps to log levels)
    pub verbosity: u8,
    pub format: TracingFormat,
    pub output: TracingOutput,
    /// Filter directive string, overrides verbosity when set
    pub env_filter: Option<String>,
    /// Deployment environment recorded in the start-up event
    pub environment: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            output: TracingOutput::Console,
            env_filter: None,
            environment: None,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbosity level (0-2+)
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: TracingOutput) -> Self {
        self.output = output;
        self
    }

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_environment<S: Into<String>>(mut self, environment: S) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Take the filter from `RUST_LOG` when it is set and non-empty
    #[must_use]
    pub fn with_env_override(self) -> Self {
        match std::env::var(LOG_FILTER_ENV) {
            Ok(filter) if !filter.trim().is_empty() => self.with_env_filter(filter),
            _ => self,
        }
    }

    /// Convert verbosity level to tracing filter string
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Filter directives that will be installed
    #[must_use]
    pub fn filter_directives(&self) -> String {
        self.env_filter
            .clone()
            .unwrap_or_else(|| self.verbosity_to_filter().to_string())
    }

    /// Install the global subscriber
    ///
    /// The returned guard must outlive all logging when writing to a file.
    #[cfg(feature = "cli")]
    pub fn init(self) -> anyhow::Result<TracingGuard> {
        use tracing_subscriber::fmt;

        let filter = EnvFilter::try_new(self.filter_directives())?;
        let registry = Registry::default().with(filter);
        let guard: TracingGuard = match (&self.format, &self.output) {
            (TracingFormat::Console, TracingOutput::Console) => {
                let fmt_layer = fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_level(true)
                    .compact();
                registry.with(fmt_layer).try_init()?;
                None
            },

            (TracingFormat::Compact, TracingOutput::Console) => {
                let fmt_layer = fmt::layer().with_ansi(false).with_target(true).compact();
                registry.with(fmt_layer).try_init()?;
                None
            },

            #[cfg(feature = "tracing-json")]
            (TracingFormat::Json, TracingOutput::Console) => {
                let fmt_layer = fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true);
                registry.with(fmt_layer).try_init()?;
                None
            },

            #[cfg(feature = "tracing-files")]
            (format, TracingOutput::File(path)) => {
                let (file_writer, file_guard) = file_writer(path);

                match format {
                    TracingFormat::Console | TracingFormat::Compact => {
                        let fmt_layer = fmt::layer()
                            .with_ansi(false)
                            .with_writer(file_writer)
                            .compact();
                        registry.with(fmt_layer).try_init()?;
                    },
                    #[cfg(feature = "tracing-json")]
                    TracingFormat::Json => {
                        let fmt_layer = fmt::layer()
                            .json()
                            .with_writer(file_writer)
                            .with_current_span(true)
                            .with_span_list(true);
                        registry.with(fmt_layer).try_init()?;
                    },
                }
                Some(file_guard)
            },

            #[cfg(feature = "tracing-files")]
            (format, TracingOutput::Both(path)) => {
                let (file_writer, file_guard) = file_writer(path);

                let console_layer = fmt::layer()
                    .with_ansi(*format == TracingFormat::Console)
                    .with_target(false)
                    .compact();
                let file_layer = fmt::layer()
                    .with_ansi(false)
                    .with_writer(file_writer)
                    .compact();
                registry.with(console_layer).with(file_layer).try_init()?;
                Some(file_guard)
            },
        };

        tracing::info!(
            filter = %self.filter_directives(),
            environment = self.environment.as_deref().unwrap_or("unknown"),
            "tracing initialized"
        );
        Ok(guard)
    }
}

#[cfg(feature = "tracing-files")]
fn file_writer(
    path: &std::path::Path,
) -> (
    tracing_appender::non_blocking::NonBlocking,
    tracing_appender::non_blocking::WorkerGuard,
) {
    let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    let prefix = path
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("bg-changer.log"));
    tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, prefix))
}
