//! Logging setup for suite binaries
//!
//! Suites log through `tracing`. Test binaries call [`init_logging`] once;
//! later calls (one per `#[tokio::test]`) are no-ops.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Selects JSON output when set to `json`
pub const ENV_LOG_FORMAT: &str = "APPTEST_LOG_FORMAT";

const DEFAULT_FILTER: &str = "info,kube=warn,tower=warn,hyper=warn";

/// Output format of the fmt layer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable, one line per event
    #[default]
    Pretty,
    /// One JSON object per event, for CI log collectors
    Json,
}

impl LogFormat {
    /// Read the format from [`ENV_LOG_FORMAT`]
    pub fn from_env() -> Self {
        Self::parse(std::env::var(ENV_LOG_FORMAT).ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Install the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` and falls back to `info`. Returns whether
/// this call installed the subscriber.
pub fn init_logging() -> bool {
    init_logging_with(LogFormat::from_env())
}

/// Install the global tracing subscriber with an explicit format.
pub fn init_logging_with(format: LogFormat) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = match format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_test_writer()
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
}
