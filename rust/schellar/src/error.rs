use thiserror::Error;

/// Errors raised by the scheduling core and the workflow engine client.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// A schedule definition is missing a required field or is malformed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The schedule or run store could not serve the request.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] anyhow::Error),

    /// The addressed schedule does not exist.
    #[error("Schedule not found: {0}")]
    NotFound(String),

    /// The workflow engine could not be reached or did not answer in time.
    #[error("Workflow engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The workflow engine answered with a non-success status.
    #[error("Workflow engine rejected request ({status}): {message}")]
    EngineRejected { status: u16, message: String },
}

/// Result type alias for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;

impl From<reqwest::Error> for SchedulerError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            SchedulerError::EngineRejected {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_timeout() {
            SchedulerError::EngineUnavailable(format!("Request timed out: {err}"))
        } else if err.is_connect() {
            SchedulerError::EngineUnavailable(format!("Connection failed: {err}"))
        } else {
            SchedulerError::EngineUnavailable(err.to_string())
        }
    }
}

impl SchedulerError {
    /// Wrap a persistence failure.
    pub fn store(err: impl Into<anyhow::Error>) -> Self {
        SchedulerError::StoreUnavailable(err.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        SchedulerError::Validation(message.into())
    }

    /// Whether the error came from the workflow engine.
    #[must_use]
    pub fn is_engine(&self) -> bool {
        matches!(
            self,
            SchedulerError::EngineUnavailable(_) | SchedulerError::EngineRejected { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedulerError::validation("'cronString' is required");
        assert_eq!(err.to_string(), "Validation failed: 'cronString' is required");

        let err = SchedulerError::EngineRejected {
            status: 404,
            message: "workflow not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Workflow engine rejected request (404): workflow not found"
        );
    }

    #[test]
    fn test_store_error_keeps_source() {
        let err = SchedulerError::store(anyhow::anyhow!("disk full"));
        assert!(err.to_string().contains("disk full"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_engine());
    }

    #[test]
    fn test_engine_classification() {
        assert!(SchedulerError::EngineUnavailable("timeout".into()).is_engine());
        assert!(!SchedulerError::NotFound("daily".into()).is_engine());
    }
}
