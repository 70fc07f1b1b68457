//! TOML-based configuration for sqlgate.
//!
//! Supports a config file (sqlgate.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [database]
//! host = "localhost"
//! dbname = "pagila"
//! user = "readonly"
//! password = "${PAGILA_PASSWORD}"
//!
//! [gateway]
//! max_rows = 500
//! statement_timeout_ms = 15000
//!
//! [cache]
//! path = "~/.sqlgate/vector_cache.db"
//! threshold = 0.2
//! metric = "squared_l2"
//!
//! [embedding]
//! model = "text-embedding-004"
//! api_key_env = "GEMINI_API_KEY"
//!
//! [supervisor]
//! request_timeout_secs = 30
//! poll_interval_ms = 1000
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::connection::{ConnectionConfig, ConnectionError};
use crate::cache::Distance;

/// Environment variable that overrides the configured row cap.
pub const MAX_ROWS_ENV: &str = "MCP_MAX_ROWS";

/// Row cap used when neither the config file nor the environment set one.
pub const DEFAULT_MAX_ROWS: usize = 1000;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Relational store connection.
    pub database: DatabaseSettings,

    /// SQL gateway limits.
    pub gateway: GatewaySettings,

    /// Semantic cache storage and matching.
    pub cache: CacheSettings,

    /// Embedding provider.
    pub embedding: EmbeddingSettings,

    /// Gateway process supervision.
    pub supervisor: SupervisorSettings,

    /// Usage ledger persistence.
    pub usage: UsageSettings,
}

/// Database connection settings.
///
/// Unset fields fall back to the `PG_*` environment variables.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dbname: Option<String>,
    pub user: Option<String>,
    /// Password (supports ${ENV_VAR} expansion).
    pub password: Option<String>,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            dbname: None,
            user: None,
            password: None,
            connect_timeout_secs: 10,
        }
    }
}

impl DatabaseSettings {
    /// Resolve the connection parameters: file values first, then environment.
    pub fn connection_config(&self) -> Result<ConnectionConfig, SettingsError> {
        let mut config = ConnectionConfig::from_env()?;

        if let Some(host) = &self.host {
            config.host = expand_env_vars(host)?;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dbname) = &self.dbname {
            config.dbname = expand_env_vars(dbname)?;
        }
        if let Some(user) = &self.user {
            config.user = expand_env_vars(user)?;
        }
        if let Some(password) = &self.password {
            config.password = expand_env_vars(password)?;
        }
        config.connect_timeout = Duration::from_secs(self.connect_timeout_secs.max(1));

        Ok(config)
    }
}

/// SQL gateway settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Maximum rows returned per query (overridden by `MCP_MAX_ROWS`).
    pub max_rows: usize,

    /// Server-side statement timeout in milliseconds.
    pub statement_timeout_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            statement_timeout_ms: 30_000,
        }
    }
}

impl GatewaySettings {
    /// The row cap in effect: `MCP_MAX_ROWS` if set and valid, else `max_rows`.
    ///
    /// Never returns zero.
    pub fn effective_max_rows(&self) -> usize {
        let configured = match env::var(MAX_ROWS_ENV) {
            Ok(value) => match value.trim().parse::<usize>() {
                Ok(n) => n,
                Err(_) => {
                    tracing::warn!(var = MAX_ROWS_ENV, %value, "ignoring invalid row cap override");
                    self.max_rows
                }
            },
            Err(_) => self.max_rows,
        };
        configured.max(1)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }
}

/// Semantic cache settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Consult and populate the cache at all.
    pub enabled: bool,

    /// SQLite file holding cache entries (default `~/.sqlgate/vector_cache.db`).
    pub path: Option<String>,

    /// Strict upper bound on the nearest-neighbour distance for a hit.
    pub threshold: f32,

    /// Distance metric used for matching.
    pub metric: Distance,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            threshold: 0.2,
            metric: Distance::SquaredL2,
        }
    }
}

impl CacheSettings {
    /// Resolve the cache database path.
    pub fn cache_path(&self) -> Result<PathBuf, SettingsError> {
        match &self.path {
            Some(path) => Ok(expand_home(&expand_env_vars(path)?)),
            None => {
                let home = dirs::home_dir().ok_or_else(|| {
                    SettingsError::InvalidConfig("cannot determine home directory".to_string())
                })?;
                Ok(home.join(".sqlgate").join("vector_cache.db"))
            }
        }
    }
}

/// Embedding provider settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Base URL of the Generative Language API.
    pub endpoint: String,

    /// Embedding model name.
    pub model: String,

    /// Name of the environment variable holding the API key.
    pub api_key_env: String,

    /// HTTP timeout for one embedding call.
    pub timeout_secs: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "text-embedding-004".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            timeout_secs: 15,
        }
    }
}

/// Gateway process supervision settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Gateway executable (default: this binary).
    pub command: Option<String>,

    /// Arguments for `command` (default: `["serve"]` when `command` is unset).
    pub args: Vec<String>,

    /// How long to wait for one response line.
    pub request_timeout_secs: u64,

    /// Liveness poll period.
    pub poll_interval_ms: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            request_timeout_secs: 30,
            poll_interval_ms: 1000,
        }
    }
}

impl SupervisorSettings {
    /// Resolve the gateway program and its arguments.
    pub fn gateway_command(&self) -> Result<(PathBuf, Vec<String>), SettingsError> {
        match &self.command {
            Some(command) => {
                let program = PathBuf::from(expand_env_vars(command)?);
                let args = self
                    .args
                    .iter()
                    .map(|arg| expand_env_vars(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((program, args))
            }
            None => {
                let program = env::current_exe()?;
                Ok((program, vec!["serve".to_string()]))
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

/// Usage ledger settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UsageSettings {
    /// JSON file holding aggregate token and cost counters.
    pub path: String,
}

impl Default for UsageSettings {
    fn default() -> Self {
        Self {
            path: "usage_stats.json".to_string(),
        }
    }
}

impl UsageSettings {
    pub fn usage_path(&self) -> Result<PathBuf, SettingsError> {
        Ok(expand_home(&expand_env_vars(&self.path)?))
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `SQLGATE_CONFIG`
    /// 2. `./sqlgate.toml`
    /// 3. `~/.config/sqlgate/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("SQLGATE_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("sqlgate.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("sqlgate").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if !(self.cache.threshold > 0.0) {
            return Err(SettingsError::InvalidConfig(format!(
                "cache.threshold must be positive, got {}",
                self.cache.threshold
            )));
        }
        if self.gateway.max_rows == 0 {
            return Err(SettingsError::InvalidConfig(
                "gateway.max_rows must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Replace a leading `~/` with the home directory.
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if ch.is_alphanumeric() || ch == '_' {
                    var_name.push(ch);
                    chars.next();
                } else {
                    break;
                }
            }
            if var_name.is_empty() {
                // Just a lone $, keep it
                result.push('$');
                continue;
            }
        }

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
