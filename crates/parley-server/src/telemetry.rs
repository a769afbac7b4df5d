//! Logging setup for Parley Server.
//!
//! Log output goes through `tracing-subscriber`. The filter comes from
//! `RUST_LOG` and falls back to `info,parley_server=debug,parley_relay=debug`.
//! `PARLEY_LOG_FORMAT=json` switches from human-readable lines to one JSON
//! object per event.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,parley_server=debug,parley_relay=debug";

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    /// Parse a `PARLEY_LOG_FORMAT` value. Unknown values fall back to pretty.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }

    pub fn from_env() -> Self {
        std::env::var("PARLEY_LOG_FORMAT")
            .map(|s| Self::parse(&s))
            .unwrap_or_default()
    }
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber in the format chosen by `PARLEY_LOG_FORMAT`.
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match LogFormat::from_env() {
        LogFormat::Pretty => init_local(),
        LogFormat::Json => init_json(),
    }
}

/// Console output with targets and source locations, for local runs.
pub fn init_local() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter())
        .with(fmt_layer)
        .try_init()?;

    tracing::info!("Telemetry initialized");
    Ok(())
}

/// One JSON object per event, for log shippers.
pub fn init_json() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_current_span(true);

    tracing_subscriber::registry()
        .with(filter())
        .with(fmt_layer)
        .try_init()?;

    tracing::info!("Telemetry initialized (json)");
    Ok(())
}

/// Flush point before exit.
pub fn shutdown() {
    tracing::info!("Telemetry shutdown complete");
}
