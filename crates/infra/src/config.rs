//! Environment-driven configuration.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `GASFLOW_BIND_ADDR` | `0.0.0.0:8080` |
//! | `DATABASE_URL` | unset: in-memory store |
//! | `GASFLOW_DB_MAX_CONNECTIONS` | `10` |
//! | `GASFLOW_NEAR_DEPLETION_RATIO` | `0.9` |
//! | `GASFLOW_LARGE_TRANSFER_LINES` | `100` |
//! | `GASFLOW_HEAVY_TRANSFER_WEIGHT` | `5000` |
//! | `GASFLOW_CONFLICT_MODE` | `warn` (`warn` or `block`) |
//! | `GASFLOW_RESERVE_ON_APPROVAL` | `true` |

use std::str::FromStr;

use thiserror::Error;

use gasflow_transfers::{ConflictMode, ValidationPolicy};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Knobs of the transfer engine itself.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub validation: ValidationPolicy,
    pub conflict_mode: ConflictMode,
    /// Hold source stock when a transfer is approved.
    pub reserve_on_approval: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            validation: ValidationPolicy::default(),
            conflict_mode: ConflictMode::Warn,
            reserve_on_approval: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub engine: EngineSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: None,
            db_max_connections: 10,
            engine: EngineSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset and blank keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();
        let policy = ValidationPolicy::default();

        Ok(Self {
            bind_addr: get("GASFLOW_BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: get("DATABASE_URL"),
            db_max_connections: parse(&get, "GASFLOW_DB_MAX_CONNECTIONS")?.unwrap_or(defaults.db_max_connections),
            engine: EngineSettings {
                validation: ValidationPolicy {
                    near_depletion_ratio: parse_ratio(&get)?.unwrap_or(policy.near_depletion_ratio),
                    large_transfer_lines: parse(&get, "GASFLOW_LARGE_TRANSFER_LINES")?
                        .unwrap_or(policy.large_transfer_lines),
                    heavy_transfer_weight: parse(&get, "GASFLOW_HEAVY_TRANSFER_WEIGHT")?
                        .unwrap_or(policy.heavy_transfer_weight),
                },
                conflict_mode: match get("GASFLOW_CONFLICT_MODE").as_deref() {
                    None | Some("warn") => ConflictMode::Warn,
                    Some("block") => ConflictMode::Block,
                    Some(other) => {
                        return Err(ConfigError::Invalid {
                            key: "GASFLOW_CONFLICT_MODE",
                            value: other.to_string(),
                        });
                    }
                },
                reserve_on_approval: parse_bool(&get, "GASFLOW_RESERVE_ON_APPROVAL")?
                    .unwrap_or(defaults.engine.reserve_on_approval),
            },
        })
    }
}

fn parse<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|value| value.parse().map_err(|_| ConfigError::Invalid { key, value }))
        .transpose()
}

fn parse_ratio<G>(get: &G) -> Result<Option<f64>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    const KEY: &str = "GASFLOW_NEAR_DEPLETION_RATIO";
    match parse::<f64, _>(get, KEY)? {
        Some(r) if !(r > 0.0 && r <= 1.0) => Err(ConfigError::Invalid {
            key: KEY,
            value: r.to_string(),
        }),
        other => Ok(other),
    }
}

fn parse_bool<G>(get: &G, key: &'static str) -> Result<Option<bool>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|value| match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { key, value }),
        })
        .transpose()
}
