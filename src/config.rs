use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
#[error("invalid {key} value {value:?}: {reason}")]
pub struct ConfigError {
    key: &'static str,
    value: String,
    reason: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: PathBuf,
    pub upload_dir: PathBuf,
    pub map_token: String,
    pub secure_headers: bool,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let map_token = env::var("MAPBOX_TOKEN").unwrap_or_default();
        if map_token.is_empty() {
            warn!("MAPBOX_TOKEN not set, the cluster map will not initialize");
        }

        Ok(Self {
            port: try_load("PORT", "3000")?,
            database_path: try_load("DATABASE_PATH", "recamp.db")?,
            upload_dir: try_load("UPLOAD_DIR", "uploads")?,
            map_token,
            secure_headers: try_load("SECURE_HEADERS", "true")?,
        })
    }
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let value = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    value.parse().map_err(|e: T::Err| ConfigError {
        key,
        reason: e.to_string(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default() {
        let port: u16 = try_load("RECAMP_TEST_UNSET_PORT", "4000").unwrap();
        assert_eq!(port, 4000);
    }

    #[test]
    fn rejects_unparsable_value() {
        let err = try_load::<u16>("RECAMP_TEST_UNSET_BAD", "not-a-port").unwrap_err();
        assert!(err.to_string().contains("RECAMP_TEST_UNSET_BAD"));
    }
}
