//! Configuration module for sqlgate.
//!
//! Handles database connection parameters, environment variables, and the
//! TOML settings file shared by the driver and the gateway process.

mod connection;
mod settings;

pub use connection::{ConnectionConfig, ConnectionError};
pub use settings::{
    expand_env_vars, CacheSettings, DatabaseSettings, EmbeddingSettings, GatewaySettings,
    Settings, SettingsError, SupervisorSettings, UsageSettings, DEFAULT_MAX_ROWS,
    MAX_ROWS_ENV,
};
