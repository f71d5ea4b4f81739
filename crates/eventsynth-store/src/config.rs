//! Connection settings.
//!
//! Each setting resolves as: explicit override (CLI flag) → environment
//! variable → default. `host`, `username`, `password` and `database` have no
//! default; `password` may be empty but must be given.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{validate_identifier, ConfigError};

pub const DEFAULT_PORT: u16 = 8123;
pub const DEFAULT_TABLE: &str = "events";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const ENV_HOST: &str = "CLICKHOUSE_HOST";
pub const ENV_PORT: &str = "CLICKHOUSE_PORT";
pub const ENV_SECURE: &str = "CLICKHOUSE_SECURE";
pub const ENV_USER: &str = "CLICKHOUSE_USER";
pub const ENV_PASSWORD: &str = "CLICKHOUSE_PASSWORD";
pub const ENV_DATABASE: &str = "CLICKHOUSE_DATABASE";
pub const ENV_TABLE: &str = "CLICKHOUSE_TABLE";
pub const ENV_TIMEOUT_SECS: &str = "CLICKHOUSE_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    /// `https` instead of `http`.
    pub secure: bool,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub database: String,
    pub table: String,
    /// Per-request timeout; `0` disables it.
    pub timeout_secs: u64,
}

/// Values given explicitly (usually CLI flags); `None` falls through to the environment.
#[derive(Debug, Clone, Default)]
pub struct StoreOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub secure: Option<bool>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub table: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl StoreConfig {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            secure: false,
            username: username.into(),
            password: password.into(),
            database: database.into(),
            table: DEFAULT_TABLE.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(&StoreOverrides::default())
    }

    pub fn resolve(overrides: &StoreOverrides) -> Result<Self, ConfigError> {
        Self::resolve_with(overrides, |key| std::env::var(key).ok())
    }

    /// Resolution against an arbitrary variable lookup.
    pub fn resolve_with(
        overrides: &StoreOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let required = |value: &Option<String>,
                        field: &'static str,
                        flag: &'static str,
                        key: &'static str|
         -> Result<String, ConfigError> {
            value
                .clone()
                .or_else(|| env(key))
                .ok_or(ConfigError::Missing {
                    field,
                    flag,
                    env: key,
                })
        };

        let host = required(&overrides.host, "host", "host", ENV_HOST)?;
        let username = required(&overrides.username, "username", "user", ENV_USER)?;
        let password = required(&overrides.password, "password", "password", ENV_PASSWORD)?;
        let database = required(&overrides.database, "database", "database", ENV_DATABASE)?;

        let port = match overrides.port {
            Some(port) => port,
            None => match env(ENV_PORT) {
                Some(raw) => parse_number(&raw, "port")?,
                None => DEFAULT_PORT,
            },
        };
        let secure = match overrides.secure {
            Some(secure) => secure,
            None => match env(ENV_SECURE) {
                Some(raw) => parse_bool(&raw, "secure")?,
                None => false,
            },
        };
        let table = overrides
            .table
            .clone()
            .or_else(|| env(ENV_TABLE))
            .unwrap_or_else(|| DEFAULT_TABLE.to_string());
        let timeout_secs = match overrides.timeout_secs {
            Some(secs) => secs,
            None => match env(ENV_TIMEOUT_SECS) {
                Some(raw) => parse_number(&raw, "timeout_secs")?,
                None => DEFAULT_TIMEOUT_SECS,
            },
        };

        let config = Self {
            host,
            port,
            secure,
            username,
            password,
            database,
            table,
            timeout_secs,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "host",
                value: self.host.clone(),
                reason: "must not be empty".to_string(),
            });
        }
        for (field, value) in [("database", &self.database), ("table", &self.table)] {
            validate_identifier(value).map_err(|e| ConfigError::Invalid {
                field,
                value: value.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// `http(s)://host:port/`
    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}:{}/", self.host, self.port)
    }

    /// `database.table`
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }
}

fn parse_number<T: std::str::FromStr>(raw: &str, field: &'static str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        field,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(raw: &str, field: &'static str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            field,
            value: raw.to_string(),
            reason: "expected true/false".to_string(),
        }),
    }
}
