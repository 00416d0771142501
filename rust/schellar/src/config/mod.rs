//! Configuration management for schellar.
//!
//! Configuration is layered, later sources winning:
//! 1. Built-in defaults
//! 2. Config file (`config/schellar.{toml,yaml,json}`, or the `--config` path)
//! 3. Environment variables prefixed `SCHELLAR__`, with `__` between
//!    section and key (e.g. `SCHELLAR__SCHEDULER__CHECK_INTERVAL_SECS=10`)
//! 4. `CONDUCTOR_API_URL`, kept for compatibility with existing deployments
//!
//! Command-line flags are applied on top by the binary.
//!
//! # Validation
//!
//! ```rust,ignore
//! use schellar::config::{AppConfig, ConfigValidator};
//!
//! let config = AppConfig::load(None)?;
//! ConfigValidator::validate(&config)?;
//! ```

pub mod error;
pub mod validator;

pub use error::{ConfigResult, ConfigurationError};
pub use validator::ConfigValidator;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable holding the workflow engine base URL.
pub const CONDUCTOR_API_URL_ENV: &str = "CONDUCTOR_API_URL";

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP API server.
    #[serde(default)]
    pub server: ServerConfig,
    /// Workflow engine client.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Run monitor.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Schedule and run storage.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load and validate configuration.
    ///
    /// `file` replaces the default config file location when given.
    pub fn load(file: Option<&str>) -> anyhow::Result<Self> {
        let config = Self::load_unchecked(file)?;

        ConfigValidator::validate(&config)
            .map_err(|e| anyhow::anyhow!("Configuration validation failed:\n\n{e}"))?;

        Ok(config)
    }

    /// Load configuration without validation.
    pub fn load_unchecked(file: Option<&str>) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let file_source = match file {
            Some(path) => config::File::with_name(path).required(true),
            None => config::File::with_name("config/schellar").required(false),
        };

        let config = config::Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", i64::from(default_port()))?
            .add_source(file_source)
            .add_source(
                config::Environment::with_prefix("SCHELLAR")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut app_config: AppConfig = config.try_deserialize()?;

        if let Ok(url) = std::env::var(CONDUCTOR_API_URL_ENV)
            && !url.trim().is_empty()
        {
            app_config.engine.base_url = url;
        }

        Ok(app_config)
    }
}

/// HTTP API server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// API port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_request_timeout(),
        }
    }
}

/// Workflow engine client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the engine API, e.g. `http://conductor:8080/api`.
    #[serde(default)]
    pub base_url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_engine_timeout")]
    pub timeout_secs: u64,
    /// Require the workflow definition to exist when a schedule is created.
    #[serde(default)]
    pub validate_workflows: bool,
}

fn default_engine_timeout() -> u64 {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_secs: default_engine_timeout(),
            validate_workflows: false,
        }
    }
}

/// Run monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between run status checks.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
}

fn default_check_interval() -> u64 {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
        }
    }
}

/// Storage backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// Process-local maps; nothing survives a restart.
    Memory,
    /// Single `SQLite` file.
    #[default]
    Sqlite,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database file for the `sqlite` driver.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/schellar.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            path: default_database_path(),
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive (`info`, `schellar=debug,tower_http=info`, ...).
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        // SAFETY: tests touching the environment are serialized.
        unsafe {
            std::env::remove_var(CONDUCTOR_API_URL_ENV);
            std::env::remove_var("SCHELLAR__SCHEDULER__CHECK_INTERVAL_SECS");
            std::env::remove_var("SCHELLAR__DATABASE__DRIVER");
        }
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.engine.timeout_secs, 10);
        assert!(!config.engine.validate_workflows);
        assert_eq!(config.scheduler.check_interval_secs, 5);
        assert_eq!(config.database.driver, DatabaseDriver::Sqlite);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        // SAFETY: serialized with every other environment test.
        unsafe {
            std::env::set_var(CONDUCTOR_API_URL_ENV, "http://conductor:8080/api");
            std::env::set_var("SCHELLAR__SCHEDULER__CHECK_INTERVAL_SECS", "12");
            std::env::set_var("SCHELLAR__DATABASE__DRIVER", "memory");
        }

        let config = AppConfig::load_unchecked(None).unwrap();
        assert_eq!(config.engine.base_url, "http://conductor:8080/api");
        assert_eq!(config.scheduler.check_interval_secs, 12);
        assert_eq!(config.database.driver, DatabaseDriver::Memory);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_explicit_file() {
        clear_env();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[engine]\nbase_url = \"http://localhost:8080/api\"\nvalidate_workflows = true\n\n\
             [logging]\nformat = \"json\""
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.engine.base_url, "http://localhost:8080/api");
        assert!(config.engine.validate_workflows);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    #[serial]
    fn test_load_requires_engine_url() {
        clear_env();
        let err = AppConfig::load(None).unwrap_err();
        assert!(err.to_string().contains("engine.base_url"));
    }
}
