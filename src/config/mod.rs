//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;

/// Who may connect and who may control the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMode {
    /// Open server, anyone may control the run
    Local,
    /// Token-gated joins, control actions are spectator-only
    Multi,
}

impl FromStr for ServerMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "multi" => Ok(Self::Multi),
            _ => Err(ConfigError::Invalid("MODE")),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Run identifier clients must present when joining
    pub run_id: String,
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Snapshots per second (at most `tick_rate`)
    pub snapshot_rate: u32,

    /// Directory holding `*.txt` maps and their `*.json` world constants
    pub maps_dir: PathBuf,
    /// Map loaded at startup
    pub map_name: String,

    /// Local or multiplayer mode
    pub mode: ServerMode,
    /// Shared join token (multi mode only)
    pub token: Option<String>,

    /// Allowed client origins for CORS, `*` for any
    pub client_origin: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match get("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => get("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:4321".to_string()),
        };

        let tick_rate = parse_rate(get("TICK_RATE"), 60, "TICK_RATE")?;
        let snapshot_rate = parse_rate(get("SNAPSHOT_RATE"), 20, "SNAPSHOT_RATE")?;
        if snapshot_rate > tick_rate {
            return Err(ConfigError::SnapshotRateTooHigh {
                snapshot_rate,
                tick_rate,
            });
        }

        let mode = match get("MODE") {
            Some(mode) => mode.parse()?,
            None => ServerMode::Local,
        };
        let token = get("TOKEN").filter(|t| !t.is_empty());
        if mode == ServerMode::Multi && token.is_none() {
            return Err(ConfigError::Missing("TOKEN"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),

            run_id: get("RUN_ID").unwrap_or_else(|| "default".to_string()),
            tick_rate,
            snapshot_rate,

            maps_dir: get("MAPS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("maps")),
            map_name: get("MAP_NAME").unwrap_or_else(|| "smoke.txt".to_string()),

            mode,
            token,

            client_origin: get("CLIENT_ORIGIN").unwrap_or_else(|| "*".to_string()),
        })
    }
}

fn parse_rate(value: Option<String>, default: u32, key: &'static str) -> Result<u32, ConfigError> {
    let rate = match value {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key))?,
        None => default,
    };
    if rate == 0 {
        return Err(ConfigError::Invalid(key));
    }
    Ok(rate)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("SNAPSHOT_RATE ({snapshot_rate}) must not exceed TICK_RATE ({tick_rate})")]
    SnapshotRateTooHigh { snapshot_rate: u32, tick_rate: u32 },
}
