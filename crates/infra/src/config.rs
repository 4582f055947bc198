//! Configuration loading and representation.

use std::env;

use thiserror::Error;

/// Default connection pool size when `WARDSTOCK_MAX_CONNECTIONS` is unset.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,

    #[error("invalid {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Connection settings for the Postgres-backed store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl StoreConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Read configuration from the environment: `DATABASE_URL` (required)
    /// and `WARDSTOCK_MAX_CONNECTIONS` (optional).
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;

        let max_connections = match env::var("WARDSTOCK_MAX_CONNECTIONS") {
            Ok(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                name: "WARDSTOCK_MAX_CONNECTIONS",
                value,
            })?,
            Err(_) => DEFAULT_MAX_CONNECTIONS,
        };

        Ok(Self {
            database_url,
            max_connections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let cfg = StoreConfig::new("postgres://localhost/wardstock");
        assert_eq!(cfg.max_connections, DEFAULT_MAX_CONNECTIONS);

        let cfg = cfg.with_max_connections(16);
        assert_eq!(cfg.max_connections, 16);
    }
}
