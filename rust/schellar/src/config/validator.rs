//! Startup validation of the loaded configuration.
//!
//! Every problem is collected so an operator sees all of them at once rather
//! than fixing one per restart.

use tracing_subscriber::EnvFilter;

use super::error::{ConfigResult, ConfigurationError};
use super::{AppConfig, DatabaseDriver, CONDUCTOR_API_URL_ENV};

/// Checks an [`AppConfig`] before anything is started.
#[derive(Debug)]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire application configuration.
    ///
    /// Returns `Ok(())` if valid, or a `ConfigurationError` with all issues.
    pub fn validate(config: &AppConfig) -> ConfigResult<()> {
        let mut errors = Vec::new();

        errors.extend(Self::validate_engine(config).err());
        errors.extend(Self::validate_scheduler(config).err());
        errors.extend(Self::validate_database(config).err());
        errors.extend(Self::validate_logging(config).err());

        let flattened = errors
            .into_iter()
            .flat_map(|e| match e {
                ConfigurationError::Multiple(inner) => inner,
                e => vec![e],
            })
            .collect();
        ConfigurationError::collect(flattened)
    }

    /// Engine URL must be present and HTTP(S); the timeout must be non-zero.
    pub fn validate_engine(config: &AppConfig) -> ConfigResult<()> {
        let engine = &config.engine;
        let mut errors = Vec::new();

        let url = engine.base_url.trim();
        if url.is_empty() {
            errors.push(ConfigurationError::missing_required(
                "engine.base_url",
                "Launching and monitoring workflows on the engine",
                format!("{CONDUCTOR_API_URL_ENV}, SCHELLAR__ENGINE__BASE_URL or --conductor-api-url"),
            ));
        } else if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push(ConfigurationError::invalid(
                "engine.base_url",
                format!("'{url}' is not an http(s) URL"),
                "Use the engine API root, e.g. http://conductor:8080/api",
            ));
        }

        if engine.timeout_secs == 0 {
            errors.push(ConfigurationError::invalid(
                "engine.timeout_secs",
                "is 0",
                "Engine calls need a bounded timeout; set 1 or more (default 10)",
            ));
        }

        ConfigurationError::collect(errors)
    }

    /// The monitor interval must be at least one second.
    pub fn validate_scheduler(config: &AppConfig) -> ConfigResult<()> {
        if config.scheduler.check_interval_secs == 0 {
            return Err(ConfigurationError::invalid(
                "scheduler.check_interval_secs",
                "is 0",
                "Set SCHELLAR__SCHEDULER__CHECK_INTERVAL_SECS or --check-interval to 1 or more",
            ));
        }
        Ok(())
    }

    /// The selected driver must be built in and have somewhere to write.
    pub fn validate_database(config: &AppConfig) -> ConfigResult<()> {
        match config.database.driver {
            DatabaseDriver::Memory => Ok(()),
            DatabaseDriver::Sqlite if !cfg!(feature = "sqlite") => {
                Err(ConfigurationError::feature_unavailable(
                    "SQLite store",
                    "This build does not include the 'sqlite' feature",
                    "Set database.driver = \"memory\" or rebuild with --features sqlite",
                ))
            }
            DatabaseDriver::Sqlite if config.database.path.as_os_str().is_empty() => {
                Err(ConfigurationError::invalid(
                    "database.path",
                    "is empty",
                    "Point SCHELLAR__DATABASE__PATH at a writable file, e.g. ./data/schellar.db",
                ))
            }
            DatabaseDriver::Sqlite => Ok(()),
        }
    }

    /// The log level must be a valid filter directive.
    pub fn validate_logging(config: &AppConfig) -> ConfigResult<()> {
        EnvFilter::try_new(&config.logging.level)
            .map(|_| ())
            .map_err(|e| {
                ConfigurationError::invalid(
                    "logging.level",
                    format!("'{}' is not a valid filter: {e}", config.logging.level),
                    "Use a level (trace, debug, info, warn, error) or directives like schellar=debug",
                )
            })
    }
}
