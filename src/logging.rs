//! Subscriber setup for programs driving the library.
//!
//! `RUST_LOG` holds filter directives and falls back to [`DEFAULT_FILTER`].
//! `LOG_FORMAT` picks between one JSON object per event, the default, and
//! human-readable lines.

use std::str::FromStr;

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "crystal_torture=info";

/// Variable selecting the output format.
pub const LOG_FORMAT_VAR: &str = "LOG_FORMAT";

/// Event output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Flattened JSON events with the current span attached.
    #[default]
    Json,
    /// Human-readable lines.
    Pretty,
}

/// Unrecognised `LOG_FORMAT` value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown log format {0:?} (expected \"json\" or \"pretty\")")]
pub struct UnknownLogFormat(pub String);

impl FromStr for LogFormat {
    type Err = UnknownLogFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            _ => Err(UnknownLogFormat(s.to_string())),
        }
    }
}

impl LogFormat {
    /// Format named by `LOG_FORMAT`; unset or unknown values give JSON.
    pub fn from_env() -> Self {
        std::env::var(LOG_FORMAT_VAR)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or_default()
    }
}

/// Filter from `RUST_LOG`, or [`DEFAULT_FILTER`].
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a global subscriber with the given format and filter.
///
/// Span closes are logged in both formats, so torture and build phases
/// report their duration.
pub fn init_tracing_with(format: LogFormat, filter: EnvFilter) -> Result<(), TryInitError> {
    let (json, pretty) = match format {
        LogFormat::Json => (
            Some(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true),
            ),
            None,
        ),
        LogFormat::Pretty => (
            None,
            Some(fmt::layer().with_target(true).with_span_events(FmtSpan::CLOSE)),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .try_init()
}

/// Install a global subscriber configured from the environment.
///
/// Fails if one is already set; callers may ignore that.
pub fn init_tracing() -> Result<(), TryInitError> {
    init_tracing_with(LogFormat::from_env(), env_filter())
}
