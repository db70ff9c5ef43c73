//! Structured Logging Configuration
//!
//! - JSON output for log aggregation (`LOG_FORMAT=json`)
//! - Human-readable output for terminals (default)
//!
//! # Environment Variables
//!
//! - `LOG_FORMAT`: "json" for JSON output, anything else for text (default: text)
//! - `RUST_LOG`: standard level filter (default: info)
//!   Examples: `RUST_LOG=debug`, `RUST_LOG=rw_client=trace,reqwest=info`
//!
//! Request context travels through spans, so every event logged while a
//! dispatch is in progress carries its `method` and `url` fields:
//!
//! ```rust,ignore
//! use tracing::{info_span, Instrument};
//!
//! let span = info_span!("dispatch", method = %request.method(), url = %request.url());
//! client.request(request).instrument(span).await?;
//! ```

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Parse a `LOG_FORMAT` value. Anything that is not "json" is text.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }

    /// Read the format from the `LOG_FORMAT` environment variable.
    pub fn from_env() -> Self {
        Self::parse(&std::env::var("LOG_FORMAT").unwrap_or_default())
    }
}

/// Initialize logging for the named binary.
///
/// Reads `LOG_FORMAT` for the output format and `RUST_LOG` for filtering,
/// defaulting to `info`. Logs go to stderr so command output on stdout stays
/// machine-readable.
pub fn init_logging(service_name: &str) {
    let env_filter = default_filter();

    match LogFormat::from_env() {
        LogFormat::Json => init_json_logging(env_filter),
        LogFormat::Text => init_text_logging(env_filter),
    }

    tracing::debug!(service = service_name, "Logging initialized");
}

fn default_filter() -> EnvFilter {
    filter_from(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref())
}

/// Unset, empty or unparsable directives fall back to `info`
fn filter_from(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn init_json_logging(env_filter: EnvFilter) {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_span_list(true)
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .flatten_event(true)
                .with_span_events(FmtSpan::CLOSE),
        )
        .init();
}

fn init_text_logging(env_filter: EnvFilter) {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(true),
        )
        .init();
}
