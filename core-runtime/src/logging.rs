//! # Logging
//!
//! Installs the process-wide `tracing` subscriber used by the cache manager
//! and the sync queue:
//!
//! - an `EnvFilter` that keeps the workspace crates at the configured level
//!   and quiets the HTTP and SQL stacks to `warn`
//! - one stdout formatter (pretty, compact or JSON)
//! - an optional mirror that hands every surviving event to a host
//!   [`LoggerSink`]
//!
//! Request URLs pass through [`strip_query`] before they are recorded, and
//! field values bound for a host sink pass through [`redact_if_sensitive`],
//! so signed query strings and bearer tokens never reach a log line.
//!
//! ```ignore
//! use bridge_traits::time::LogLevel;
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//! use std::sync::Arc;
//!
//! init_logging(
//!     LoggingConfig::default()
//!         .with_format(LogFormat::Compact)
//!         .with_level(LogLevel::Debug)
//!         .with_logger_sink(Arc::new(host_sink)),
//! )?;
//! tracing::info!(pending = 3, "Write queue restored");
//! ```

use crate::error::{Error, Result};

use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Sibling crates shown at the configured level alongside this one.
const WORKSPACE_CRATES: &[&str] = &[
    "core_cache",
    "core_sync",
    "core_service",
    "bridge_desktop",
];

/// Dependencies capped at `warn` unless a custom filter says otherwise.
const NOISY_CRATES: &[&str] = &["h2", "hyper", "reqwest", "sqlx"];

const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, colored
    Pretty,
    /// One JSON object per event
    Json,
    /// One line per event
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Full `EnvFilter` directive string; replaces the per-crate default.
    pub filter: Option<String>,
    pub logger_sink: Option<Arc<dyn LoggerSink>>,
    /// Log span open/close in the pretty format and span context in JSON.
    pub span_events: bool,
    pub show_target: bool,
    pub show_threads: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
            logger_sink: None,
            span_events: true,
            show_target: true,
            show_threads: false,
        }
    }
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("format", &self.format)
            .field("level", &self.level)
            .field("filter", &self.filter)
            .field("logger_sink", &self.logger_sink.as_ref().map(|_| "<sink>"))
            .field("span_events", &self.span_events)
            .finish_non_exhaustive()
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_filter(mut self, directives: impl Into<String>) -> Self {
        self.filter = Some(directives.into());
        self
    }

    /// Mirror events to the host logger as well as stdout.
    pub fn with_logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn show_target(mut self, show: bool) -> Self {
        self.show_target = show;
        self
    }

    pub fn show_threads(mut self, show: bool) -> Self {
        self.show_threads = show;
        self
    }

    fn directives(&self) -> String {
        if let Some(custom) = &self.filter {
            return custom.clone();
        }

        let level = self.level.as_str();
        std::iter::once(env!("CARGO_PKG_NAME").replace('-', "_"))
            .chain(WORKSPACE_CRATES.iter().map(|krate| krate.to_string()))
            .map(|krate| format!("{}={}", krate, level))
            .chain(NOISY_CRATES.iter().map(|krate| format!("{}=warn", krate)))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// - [`Error::Config`] if the filter directives do not parse
/// - [`Error::LoggingInitialized`] if a global subscriber is already set
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;

    tracing_subscriber::registry()
        .with(output_layer(&config))
        .with(filter)
        .with(LoggerSinkLayer::new(config.logger_sink.clone()))
        .try_init()
        .map_err(|e| Error::LoggingInitialized(e.to_string()))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    EnvFilter::try_new(config.directives())
        .map_err(|e| Error::Config(format!("Invalid log filter: {}", e)))
}

fn output_layer(config: &LoggingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_target(config.show_target)
        .with_thread_ids(config.show_threads)
        .with_thread_names(config.show_threads);

    match config.format {
        LogFormat::Pretty => {
            let spans = if config.span_events {
                FmtSpan::ACTIVE
            } else {
                FmtSpan::NONE
            };
            layer.pretty().with_span_events(spans).boxed()
        }
        LogFormat::Json => layer
            .json()
            .flatten_event(true)
            .with_current_span(config.span_events)
            .with_span_list(config.span_events)
            .boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

/// Mirrors events into a host [`LoggerSink`].
struct LoggerSinkLayer {
    sink: Option<Arc<dyn LoggerSink>>,
}

impl LoggerSinkLayer {
    fn new(sink: Option<Arc<dyn LoggerSink>>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for LoggerSinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(sink) = &self.sink else {
            return;
        };

        let meta = event.metadata();
        let level = log_level(meta.level());
        if level < sink.min_level() {
            return;
        }

        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let mut entry = LogEntry::new(
            level,
            meta.target(),
            fields.message.unwrap_or_else(|| meta.name().to_string()),
        );
        entry.fields = fields.values;
        if let Some(span) = ctx.lookup_current() {
            entry = entry.in_span(span.name());
        }

        deliver(Arc::clone(sink), entry);
    }
}

/// Hand an entry to the sink without blocking the emitting task.
///
/// Outside a tokio runtime the entry is delivered inline on a throwaway
/// current-thread runtime.
fn deliver(sink: Arc<dyn LoggerSink>, entry: LogEntry) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move {
            if let Err(e) = sink.log(entry).await {
                eprintln!("logger sink rejected entry: {}", e);
            }
        });
        return;
    }

    let outcome = tokio::runtime::Builder::new_current_thread()
        .build()
        .map_err(|e| e.to_string())
        .and_then(|rt| rt.block_on(sink.log(entry)).map_err(|e| e.to_string()));
    if let Err(e) = outcome {
        eprintln!("logger sink rejected entry: {}", e);
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    values: BTreeMap<String, String>,
}

impl FieldCollector {
    fn put(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            name => {
                let value = redact_if_sensitive(name, &value);
                self.values.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, value.to_string());
    }

    // Integers, floats and bools land here through the default `Visit` impls.
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, format!("{:?}", value));
    }
}

fn log_level(level: &Level) -> LogLevel {
    match *level {
        Level::ERROR => LogLevel::Error,
        Level::WARN => LogLevel::Warn,
        Level::INFO => LogLevel::Info,
        Level::DEBUG => LogLevel::Debug,
        Level::TRACE => LogLevel::Trace,
    }
}

/// Mask a value when its field name suggests a credential.
///
/// Values that look like e-mail addresses keep only their first character.
///
/// ```ignore
/// use core_runtime::logging::redact_if_sensitive;
///
/// tracing::debug!(auth = %redact_if_sensitive("Authorization", header), "Replaying write");
/// ```
pub fn redact_if_sensitive(field_name: &str, value: &str) -> String {
    const CREDENTIAL_MARKERS: &[&str] = &[
        "authorization",
        "bearer",
        "cookie",
        "token",
        "secret",
        "password",
        "api_key",
    ];

    let name = field_name.to_ascii_lowercase();
    if CREDENTIAL_MARKERS.iter().any(|marker| name.contains(marker)) {
        return REDACTED.to_string();
    }

    match value.split_once('@') {
        Some((local, domain)) if domain.contains('.') => {
            let initial: String = local.chars().take(1).collect();
            format!("{}***@{}", initial, REDACTED)
        }
        _ => value.to_string(),
    }
}

/// Strip a URL down to its path, dropping the query string and fragment.
///
/// Query strings regularly carry signed tokens; the path is enough to
/// correlate log lines.
pub fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as SinkResult;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        entries: Mutex<Vec<LogEntry>>,
    }

    #[async_trait]
    impl LoggerSink for RecordingSink {
        async fn log(&self, entry: LogEntry) -> SinkResult<()> {
            self.entries.lock().unwrap().push(entry);
            Ok(())
        }

        fn min_level(&self) -> LogLevel {
            LogLevel::Debug
        }
    }

    fn capture(emit: impl FnOnce()) -> Vec<LogEntry> {
        let sink = Arc::new(RecordingSink::default());
        let shared: Arc<dyn LoggerSink> = sink.clone();
        let subscriber = tracing_subscriber::registry().with(LoggerSinkLayer::new(Some(shared)));
        tracing::subscriber::with_default(subscriber, emit);
        let entries = sink.entries.lock().unwrap().clone();
        entries
    }

    #[test]
    fn test_builder_flags() {
        let config = LoggingConfig::default()
            .with_format(LogFormat::Json)
            .with_level(LogLevel::Warn)
            .with_span_events(false)
            .show_target(false)
            .show_threads(true);

        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, LogLevel::Warn);
        assert!(!config.span_events);
        assert!(!config.show_target);
        assert!(config.show_threads);
        assert!(config.logger_sink.is_none());
    }

    #[test]
    fn test_default_directives() {
        let directives = LoggingConfig::default()
            .with_level(LogLevel::Debug)
            .directives();

        assert!(directives.starts_with("core_runtime=debug"));
        assert!(directives.contains("core_cache=debug"));
        assert!(directives.contains("core_sync=debug"));
        assert!(directives.contains("sqlx=warn"));
        assert!(build_filter(&LoggingConfig::default()).is_ok());
    }

    #[test]
    fn test_custom_filter_replaces_defaults() {
        let config = LoggingConfig::default().with_filter("core_sync=trace");
        assert_eq!(config.directives(), "core_sync=trace");

        let filter = build_filter(&config).unwrap().to_string();
        assert!(!filter.contains("core_cache"));
    }

    #[test]
    fn test_sink_receives_message_fields_and_span() {
        let entries = capture(|| {
            let span = tracing::info_span!("drain");
            let _enter = span.enter();
            tracing::warn!(
                target: "core_sync::queue",
                retry_count = 2u32,
                url = "/api/posts",
                "Operation failed, will retry"
            );
        });

        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.level, LogLevel::Warn);
        assert_eq!(entry.target, "core_sync::queue");
        assert_eq!(entry.message, "Operation failed, will retry");
        assert_eq!(entry.fields["retry_count"], "2");
        assert_eq!(entry.fields["url"], "/api/posts");
        assert_eq!(entry.span.as_deref(), Some("drain"));
    }

    #[test]
    fn test_sink_threshold_and_field_redaction() {
        let entries = capture(|| {
            tracing::trace!("too chatty");
            tracing::debug!(authorization = "Bearer abc", "replaying");
        });

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].fields["authorization"], REDACTED);
    }

    #[test]
    fn test_redact_if_sensitive() {
        assert_eq!(redact_if_sensitive("Authorization", "Bearer abc"), REDACTED);
        assert_eq!(redact_if_sensitive("Set-Cookie", "sid=1"), REDACTED);
        assert_eq!(redact_if_sensitive("x-api_key", "k"), REDACTED);
        assert_eq!(
            redact_if_sensitive("email", "user@example.com"),
            "u***@[REDACTED]"
        );
        assert_eq!(redact_if_sensitive("handle", "@someone"), "@someone");
        assert_eq!(
            redact_if_sensitive("Content-Type", "application/json"),
            "application/json"
        );
    }

    #[test]
    fn test_strip_query() {
        assert_eq!(strip_query("/api/posts?sig=abc"), "/api/posts");
        assert_eq!(
            strip_query("https://cdn.example.com/a.png#x"),
            "https://cdn.example.com/a.png"
        );
        assert_eq!(strip_query("/plain"), "/plain");
    }
}
