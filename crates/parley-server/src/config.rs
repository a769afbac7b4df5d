//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `PARLEY_BIND_ADDR`: listen address. Default: `0.0.0.0:8080`. The legacy
//!   `PORT` variable (`:8080` or `8080`) is honoured when this is unset.
//! - `PARLEY_DATABASE_PATH`: libsql database file. Unset means in-memory.
//! - `PARLEY_SECRETS_FILE`: newline-separated one-time registration secrets
//! - `PARLEY_TOKEN_KEY`: HMAC key for bearer tokens. Random per process if unset.
//! - `PARLEY_TOKEN_TTL_HOURS`: bearer token lifetime. Default: 24
//! - `PARLEY_REDELIVERY_INTERVAL_SECS`: redelivery period. Default: 3
//! - `PARLEY_OUTBOUND_BUFFER`: per-connection queue depth. Default: 256
//!
//! `PARLEY_LOG_FORMAT` is read by [`crate::telemetry`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use parley_relay::RelayConfig;
use thiserror::Error;
use tracing::{info, warn};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_TOKEN_TTL_HOURS: u64 = 24;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

impl ConfigError {
    fn invalid(name: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            name,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    pub bind_addr: SocketAddr,
    /// Database file, `None` for in-memory
    pub database_path: Option<PathBuf>,
    /// File holding one-time registration secrets
    pub secrets_file: Option<PathBuf>,
    /// HMAC key for bearer tokens, `None` to generate one at startup
    pub token_key: Option<String>,
    /// Bearer token lifetime
    pub token_ttl: Duration,
    /// Relay core settings
    pub relay: RelayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_path: None,
            secrets_file: None,
            token_key: None,
            token_ttl: Duration::from_secs(DEFAULT_TOKEN_TTL_HOURS * 3600),
            relay: RelayConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load server configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load server configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let bind_addr = match (get("PARLEY_BIND_ADDR"), get("PORT")) {
            (Some(addr), _) => parse_bind_addr("PARLEY_BIND_ADDR", &addr)?,
            (None, Some(port)) => parse_legacy_port(&port)?,
            (None, None) => parse_bind_addr("PARLEY_BIND_ADDR", DEFAULT_BIND_ADDR)?,
        };

        let defaults = RelayConfig::default();
        let redelivery_interval = match get("PARLEY_REDELIVERY_INTERVAL_SECS") {
            Some(v) => Duration::from_secs(parse_positive("PARLEY_REDELIVERY_INTERVAL_SECS", &v)?),
            None => defaults.redelivery_interval,
        };
        let outbound_buffer = match get("PARLEY_OUTBOUND_BUFFER") {
            Some(v) => parse_positive("PARLEY_OUTBOUND_BUFFER", &v)? as usize,
            None => defaults.outbound_buffer,
        };
        let token_ttl_hours = match get("PARLEY_TOKEN_TTL_HOURS") {
            Some(v) => parse_positive("PARLEY_TOKEN_TTL_HOURS", &v)?,
            None => DEFAULT_TOKEN_TTL_HOURS,
        };

        Ok(Self {
            bind_addr,
            database_path: get("PARLEY_DATABASE_PATH").map(PathBuf::from),
            secrets_file: get("PARLEY_SECRETS_FILE").map(PathBuf::from),
            token_key: get("PARLEY_TOKEN_KEY"),
            token_ttl: Duration::from_secs(token_ttl_hours * 3600),
            relay: RelayConfig {
                redelivery_interval,
                outbound_buffer,
                ..defaults
            },
        })
    }

    /// Log the current server configuration.
    pub fn log_config(&self) {
        info!("Bind address: {}", self.bind_addr);
        match &self.database_path {
            Some(path) => info!("Database: {}", path.display()),
            None => info!("Database: in-memory (development mode)"),
        }
        match &self.secrets_file {
            Some(path) => info!("Registration secrets: {}", path.display()),
            None => warn!("No PARLEY_SECRETS_FILE set, registration is disabled"),
        }
        if self.token_key.is_none() {
            warn!("No PARLEY_TOKEN_KEY set, tokens will not survive a restart");
        }
        info!(
            "Redelivery every {}s, outbound buffer {}",
            self.relay.redelivery_interval.as_secs(),
            self.relay.outbound_buffer
        );
    }
}

fn parse_bind_addr(name: &'static str, value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(name, value))
}

/// Accepts `:8080` or `8080`.
fn parse_legacy_port(value: &str) -> Result<SocketAddr, ConfigError> {
    let port: u16 = value
        .trim()
        .trim_start_matches(':')
        .parse()
        .map_err(|_| ConfigError::invalid("PORT", value))?;
    Ok(SocketAddr::from(([0, 0, 0, 0], port)))
}

fn parse_positive(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::invalid(name, value)),
    }
}
