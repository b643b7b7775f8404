use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use parley_gateway::dispatcher::DEFAULT_QUEUE_DEPTH;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("PARLEY_JWT_SECRET is unset or still a placeholder")]
    MissingSecret,
    #[error("{key} has an invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub scheduler_interval: Duration,
    pub session_queue_depth: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("PARLEY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            return Err(ConfigError::MissingSecret);
        }

        let db_path = lookup("PARLEY_DB_PATH").unwrap_or_else(|| "parley.db".into());
        let host = lookup("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = parsed(&lookup, "PARLEY_PORT", 3000)?;
        let interval_secs: u64 = parsed(&lookup, "PARLEY_SCHEDULER_INTERVAL_SECS", 60)?;
        let session_queue_depth = parsed(&lookup, "PARLEY_SESSION_QUEUE_DEPTH", DEFAULT_QUEUE_DEPTH)?;

        if interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "PARLEY_SCHEDULER_INTERVAL_SECS",
                value: "0".into(),
            });
        }
        if session_queue_depth == 0 {
            return Err(ConfigError::Invalid {
                key: "PARLEY_SESSION_QUEUE_DEPTH",
                value: "0".into(),
            });
        }

        Ok(Self {
            jwt_secret,
            db_path: db_path.into(),
            host,
            port,
            scheduler_interval: Duration::from_secs(interval_secs),
            session_queue_depth,
        })
    }

    /// Bind address. `PARLEY_HOST` is a bare IPv4 or IPv6 address.
    pub fn addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.host.trim().parse().map_err(|_| ConfigError::Invalid {
            key: "PARLEY_HOST",
            value: self.host.clone(),
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

fn parsed<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}
