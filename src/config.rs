use std::{net::SocketAddr, path::PathBuf, time::Duration};

use crate::error::ConfigError;
use crate::store::DEFAULT_DB_PATH;

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_STATIC_DIR: &str = "static";
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: SocketAddr,
    pub db_path: PathBuf,
    pub static_dir: PathBuf,
    pub check_interval: Duration,
}

impl Config {
    /// Read `SCHEDULER_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_raw = lookup("SCHEDULER_BIND").unwrap_or_else(|| DEFAULT_BIND.into());
        let bind: SocketAddr = bind_raw.parse().map_err(|_| ConfigError::Invalid {
            key: "SCHEDULER_BIND",
            value: bind_raw.clone(),
        })?;

        let db_path = lookup("SCHEDULER_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.into());
        let static_dir = lookup("SCHEDULER_STATIC_DIR").unwrap_or_else(|| DEFAULT_STATIC_DIR.into());

        let check_interval = match lookup("SCHEDULER_CHECK_INTERVAL_SECS") {
            None => Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS),
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "SCHEDULER_CHECK_INTERVAL_SECS",
                        value: raw,
                    });
                }
            },
        };

        Ok(Config {
            bind,
            db_path: PathBuf::from(db_path),
            static_dir: PathBuf::from(static_dir),
            check_interval,
        })
    }
}
