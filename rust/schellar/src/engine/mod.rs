//! Workflow engine client.
//!
//! The scheduler launches and inspects runs only through [`WorkflowEngine`].
//! [`ConductorClient`] talks to a Conductor-compatible HTTP API;
//! [`MockEngine`] is a scripted stand-in for tests.

pub mod conductor;
pub mod mock;

pub use conductor::ConductorClient;
pub use mock::MockEngine;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{WorkflowContext, WorkflowStatus};
use crate::error::{Result, SchedulerError};

/// Operations the scheduler needs from the workflow engine.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Start a run of `name`@`version` with `input`, returning the engine's
    /// run identifier.
    async fn launch_workflow(
        &self,
        name: &str,
        version: &str,
        input: &WorkflowContext,
    ) -> Result<String>;

    /// Current state of a run.
    async fn get_workflow_run(&self, workflow_id: &str) -> Result<WorkflowRun>;

    /// Definition of `name`@`version`, or `None` if the engine does not know it.
    async fn get_workflow_definition(&self, name: &str, version: &str) -> Result<Option<Value>>;
}

/// Typed view of an engine run payload.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowRun {
    /// Run status.
    pub status: WorkflowStatus,
    /// Run output; empty when the engine reports none.
    pub output: WorkflowContext,
    /// Full payload as returned by the engine.
    pub raw: Value,
}

impl WorkflowRun {
    /// Build the envelope from a raw engine payload.
    ///
    /// # Errors
    ///
    /// Returns `EngineRejected` if the payload has no string `status`.
    pub fn from_payload(raw: Value) -> Result<Self> {
        let status = raw
            .get("status")
            .and_then(Value::as_str)
            .map(WorkflowStatus::from)
            .ok_or_else(|| SchedulerError::EngineRejected {
                status: 200,
                message: "run payload has no status".to_string(),
            })?;
        let output = raw
            .get("output")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Ok(Self {
            status,
            output,
            raw,
        })
    }
}
