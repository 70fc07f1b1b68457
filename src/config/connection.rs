//! Database connection configuration.
//!
//! Supports configuration via environment variables:
//! - `PG_HOST`: Database server hostname (default `localhost`)
//! - `PG_PORT`: Port (default `5432`)
//! - `PG_DB`: Database name (default `pagila`)
//! - `PG_USER`: Username (default `postgres`)
//! - `PG_PASSWORD`: Password (default empty)

use std::env;
use std::time::Duration;

/// Error type for connection configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Invalid port in {var}: {value}")]
    InvalidPort { var: String, value: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// PostgreSQL connection parameters.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database name.
    pub dbname: String,
    /// Username.
    pub user: String,
    /// Password (may be empty).
    pub password: String,
    /// Timeout for establishing a connection.
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "pagila".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ConnectionConfig {
    /// Load configuration from `PG_*` environment variables.
    ///
    /// Every variable is optional; unset ones fall back to the defaults.
    pub fn from_env() -> Result<Self, ConnectionError> {
        let defaults = Self::default();

        let port = match env::var("PG_PORT") {
            Ok(value) => value.trim().parse().map_err(|_| ConnectionError::InvalidPort {
                var: "PG_PORT".to_string(),
                value,
            })?,
            Err(_) => defaults.port,
        };

        Ok(Self {
            host: env::var("PG_HOST").unwrap_or(defaults.host),
            port,
            dbname: env::var("PG_DB").unwrap_or(defaults.dbname),
            user: env::var("PG_USER").unwrap_or(defaults.user),
            password: env::var("PG_PASSWORD").unwrap_or(defaults.password),
            connect_timeout: defaults.connect_timeout,
        })
    }

    /// Build the `tokio-postgres` configuration.
    pub fn to_pg_config(&self) -> Result<tokio_postgres::Config, ConnectionError> {
        if self.host.is_empty() {
            return Err(ConnectionError::InvalidConfig("host is empty".to_string()));
        }
        if self.dbname.is_empty() {
            return Err(ConnectionError::InvalidConfig("dbname is empty".to_string()));
        }

        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.dbname)
            .user(&self.user)
            .connect_timeout(self.connect_timeout)
            .application_name("sqlgate");
        if !self.password.is_empty() {
            config.password(&self.password);
        }
        Ok(config)
    }

    /// Short `host:port/dbname` label for logs.
    pub fn label(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.dbname)
    }
}
