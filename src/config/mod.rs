//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::util::rate_limit::BRIDGE_RATE_LIMIT;
use crate::util::time::DEFAULT_CONTROL_HZ;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Control loop settings
    pub control: ControlConfig,
    /// Policy training settings
    pub policy: PolicyConfig,

    /// Inbound event queue capacity
    pub event_buffer: usize,
    /// Outbound command broadcast capacity
    pub command_buffer: usize,
    /// Max inbound messages per second from one bridge
    pub bridge_rate_limit: u32,
    /// Allowed origins for the status API
    pub client_origin: String,
}

/// Settings owned by the control loop
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlConfig {
    /// Ticks per second
    pub tick_hz: u32,
    /// Reopen the gate if an action stays unacknowledged this long
    pub action_timeout: Option<Duration>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_hz: DEFAULT_CONTROL_HZ,
            action_timeout: None,
        }
    }
}

/// Where the training data lives and how the classifier is grown
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyConfig {
    pub states_csv: PathBuf,
    pub actions_csv: PathBuf,
    /// Both CSVs start with a header row
    pub has_headers: bool,
    pub seed: u64,
    pub max_depth: Option<usize>,
    pub min_split: usize,
    /// Log the trained tree at debug level
    pub dump: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            states_csv: PathBuf::from("data/states.csv"),
            actions_csv: PathBuf::from("data/actions.csv"),
            has_headers: false,
            seed: 0,
            max_depth: None,
            min_split: 2,
            dump: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // PORT wins over SERVER_ADDR, as on most container hosts
        let server_addr = if let Some(port) = lookup("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string())
        };

        let tick_hz: u32 = parse_or(&lookup, "CONTROL_HZ", DEFAULT_CONTROL_HZ)?;
        if tick_hz == 0 {
            return Err(ConfigError::Invalid {
                var: "CONTROL_HZ",
                value: "0".to_string(),
            });
        }

        let timeout_ms: u64 = parse_or(&lookup, "ACTION_TIMEOUT_MS", 0)?;
        let defaults = PolicyConfig::default();

        Ok(Self {
            server_addr: server_addr.parse().map_err(|_| ConfigError::Invalid {
                var: "SERVER_ADDR",
                value: server_addr.clone(),
            })?,

            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),

            control: ControlConfig {
                tick_hz,
                action_timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
            },

            policy: PolicyConfig {
                states_csv: lookup("POLICY_STATES_CSV")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.states_csv),
                actions_csv: lookup("POLICY_ACTIONS_CSV")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.actions_csv),
                has_headers: parse_or(&lookup, "POLICY_CSV_HEADERS", defaults.has_headers)?,
                seed: parse_or(&lookup, "POLICY_SEED", defaults.seed)?,
                max_depth: parse_opt(&lookup, "POLICY_MAX_DEPTH")?,
                min_split: parse_or(&lookup, "POLICY_MIN_SPLIT", defaults.min_split)?,
                dump: parse_or(&lookup, "POLICY_DUMP", defaults.dump)?,
            },

            event_buffer: parse_or(&lookup, "EVENT_BUFFER", 1000)?,
            command_buffer: parse_or(&lookup, "COMMAND_BUFFER", 100)?,
            bridge_rate_limit: parse_or(&lookup, "BRIDGE_RATE_LIMIT", BRIDGE_RATE_LIMIT)?,
            client_origin: lookup("CLIENT_ORIGIN").unwrap_or_default(),
        })
    }
}

fn parse_opt<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
        None => Ok(None),
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    Ok(parse_opt(lookup, var)?.unwrap_or(default))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}
