//! HTTP client for a Conductor-compatible workflow engine.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Serialize;
use serde_json::Value;

use super::{WorkflowEngine, WorkflowRun};
use crate::config::EngineConfig;
use crate::domain::WorkflowContext;
use crate::error::{Result, SchedulerError};

#[derive(Serialize)]
struct StartWorkflowRequest<'a> {
    name: &'a str,
    version: &'a str,
    input: &'a WorkflowContext,
}

/// Conductor REST client.
#[derive(Debug, Clone)]
pub struct ConductorClient {
    base_url: Url,
    client: Client,
}

impl ConductorClient {
    /// Create a client for `base_url` with a fixed per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns `EngineUnavailable` if `base_url` is not an absolute URL or
    /// the HTTP client cannot be built.
    pub fn new(base_url: impl AsRef<str>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.as_ref();
        let base_url = Url::parse(base_url).map_err(|e| {
            SchedulerError::EngineUnavailable(format!("invalid engine URL '{base_url}': {e}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(SchedulerError::EngineUnavailable(format!(
                "engine URL '{base_url}' cannot carry a path"
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SchedulerError::EngineUnavailable(format!("HTTP client: {e}")))?;
        Ok(Self { base_url, client })
    }

    /// Create a client from the `engine` config section.
    ///
    /// # Errors
    ///
    /// Returns `EngineUnavailable` if the HTTP client cannot be built.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::new(&config.base_url, Duration::from_secs(config.timeout_secs))
    }

    /// Append `segments` to the base path, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Turn anything but `200 OK` into `EngineRejected`.
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status == StatusCode::OK {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(SchedulerError::EngineRejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl WorkflowEngine for ConductorClient {
    async fn launch_workflow(
        &self,
        name: &str,
        version: &str,
        input: &WorkflowContext,
    ) -> Result<String> {
        let body = StartWorkflowRequest {
            name,
            version,
            input,
        };
        let response = self
            .client
            .post(self.url(&["workflow"]))
            .json(&body)
            .send()
            .await?;
        let text = Self::check(response).await?.text().await?;

        let workflow_id = text.trim().trim_matches('"');
        if workflow_id.is_empty() {
            return Err(SchedulerError::EngineRejected {
                status: 200,
                message: "empty workflow id in launch response".to_string(),
            });
        }
        tracing::debug!(workflow = name, workflow_id, "Engine accepted launch");
        Ok(workflow_id.to_string())
    }

    async fn get_workflow_run(&self, workflow_id: &str) -> Result<WorkflowRun> {
        let response = self
            .client
            .get(self.url(&["workflow", workflow_id]))
            .query(&[("includeTasks", "false")])
            .send()
            .await?;
        let payload: Value = Self::check(response).await?.json().await?;
        WorkflowRun::from_payload(payload)
    }

    async fn get_workflow_definition(&self, name: &str, version: &str) -> Result<Option<Value>> {
        let response = self
            .client
            .get(self.url(&["metadata", "workflow", name]))
            .query(&[("version", version)])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let definition: Value = Self::check(response).await?.json().await?;
        Ok(Some(definition))
    }
}
