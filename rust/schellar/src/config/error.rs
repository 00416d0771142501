//! Configuration errors that say which setting is wrong and how to fix it.

use thiserror::Error;

/// A configuration problem found at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A setting has a value the service cannot use.
    #[error("Invalid configuration: {setting} {problem}\n\nHow to fix: {fix_hint}")]
    Invalid {
        setting: String,
        problem: String,
        fix_hint: String,
    },

    /// A setting without a usable default was not provided.
    #[error("Missing required configuration: {setting}\n\nRequired for: {context}\nSet via: {env_var}")]
    MissingRequired {
        setting: String,
        context: String,
        env_var: String,
    },

    /// The setting asks for something this build does not include.
    #[error("Feature not available: {feature}\n\nReason: {reason}\nAlternative: {alternative}")]
    FeatureUnavailable {
        feature: String,
        reason: String,
        alternative: String,
    },

    /// Several problems at once, reported together.
    #[error("Multiple configuration errors:\n{}", numbered(.0))]
    Multiple(Vec<ConfigurationError>),
}

fn numbered(errors: &[ConfigurationError]) -> String {
    errors
        .iter()
        .enumerate()
        .map(|(i, err)| format!("\n{}. {err}\n", i + 1))
        .collect()
}

impl ConfigurationError {
    #[must_use]
    pub fn invalid(
        setting: impl Into<String>,
        problem: impl Into<String>,
        fix_hint: impl Into<String>,
    ) -> Self {
        Self::Invalid {
            setting: setting.into(),
            problem: problem.into(),
            fix_hint: fix_hint.into(),
        }
    }

    #[must_use]
    pub fn missing_required(
        setting: impl Into<String>,
        context: impl Into<String>,
        env_var: impl Into<String>,
    ) -> Self {
        Self::MissingRequired {
            setting: setting.into(),
            context: context.into(),
            env_var: env_var.into(),
        }
    }

    #[must_use]
    pub fn feature_unavailable(
        feature: impl Into<String>,
        reason: impl Into<String>,
        alternative: impl Into<String>,
    ) -> Self {
        Self::FeatureUnavailable {
            feature: feature.into(),
            reason: reason.into(),
            alternative: alternative.into(),
        }
    }

    /// Collapse a list of problems: none is `Ok`, one is itself, more are
    /// wrapped in [`ConfigurationError::Multiple`].
    pub fn collect(mut errors: Vec<ConfigurationError>) -> ConfigResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple(errors)),
        }
    }

    /// Number of problems (1 unless `Multiple`).
    #[must_use]
    pub fn count(&self) -> usize {
        match self {
            Self::Multiple(errors) => errors.len(),
            _ => 1,
        }
    }
}

/// Result type for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigurationError>;
