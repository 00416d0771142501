//! Scripted in-process engine for tests and local experiments.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{WorkflowEngine, WorkflowRun};
use crate::domain::WorkflowContext;
use crate::error::{Result, SchedulerError};

/// A scripted engine answer.
#[derive(Debug, Clone)]
enum Scripted<T> {
    Ok(T),
    Unavailable,
    Rejected(u16),
}

impl<T> Scripted<T> {
    fn into_result(self) -> Result<T> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Unavailable => Err(SchedulerError::EngineUnavailable(
                "mock engine unavailable".to_string(),
            )),
            Self::Rejected(status) => Err(SchedulerError::EngineRejected {
                status,
                message: "mock engine rejected request".to_string(),
            }),
        }
    }
}

/// A launch request the mock engine received.
#[derive(Debug, Clone, PartialEq)]
pub struct Launch {
    pub name: String,
    pub version: String,
    pub input: WorkflowContext,
}

/// Engine whose answers are scripted by the test.
///
/// Launches without a scripted answer succeed with a generated id
/// (`wf-1`, `wf-2`, ...). Runs without a scripted payload are rejected with
/// 404.
#[derive(Debug, Default)]
pub struct MockEngine {
    launch_script: Mutex<VecDeque<Scripted<String>>>,
    launches: Mutex<Vec<Launch>>,
    runs: Mutex<HashMap<String, Scripted<Value>>>,
    definitions: Mutex<HashSet<(String, String)>>,
    run_queries: AtomicUsize,
    generated: AtomicUsize,
}

impl MockEngine {
    /// Create an engine with nothing scripted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next launch returns `workflow_id`.
    pub fn push_launch(&self, workflow_id: impl Into<String>) {
        self.launch_script
            .lock()
            .push_back(Scripted::Ok(workflow_id.into()));
    }

    /// Next launch fails as if the engine were unreachable.
    pub fn fail_next_launch(&self) {
        self.launch_script.lock().push_back(Scripted::Unavailable);
    }

    /// Next launch is rejected with `status`.
    pub fn reject_next_launch(&self, status: u16) {
        self.launch_script.lock().push_back(Scripted::Rejected(status));
    }

    /// Status checks for `workflow_id` return `payload`.
    pub fn set_run(&self, workflow_id: impl Into<String>, payload: Value) {
        self.runs
            .lock()
            .insert(workflow_id.into(), Scripted::Ok(payload));
    }

    /// Status checks for `workflow_id` fail as if the engine were unreachable.
    pub fn fail_run(&self, workflow_id: impl Into<String>) {
        self.runs
            .lock()
            .insert(workflow_id.into(), Scripted::Unavailable);
    }

    /// Make `name`@`version` a known workflow definition.
    pub fn add_definition(&self, name: impl Into<String>, version: impl Into<String>) {
        self.definitions.lock().insert((name.into(), version.into()));
    }

    /// Every launch received so far, in order.
    pub fn launches(&self) -> Vec<Launch> {
        self.launches.lock().clone()
    }

    /// Number of status checks received so far.
    pub fn run_queries(&self) -> usize {
        self.run_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkflowEngine for MockEngine {
    async fn launch_workflow(
        &self,
        name: &str,
        version: &str,
        input: &WorkflowContext,
    ) -> Result<String> {
        let scripted = self.launch_script.lock().pop_front();
        let scripted = scripted.unwrap_or_else(|| {
            let n = self.generated.fetch_add(1, Ordering::SeqCst) + 1;
            Scripted::Ok(format!("wf-{n}"))
        });
        let workflow_id = scripted.into_result()?;
        self.launches.lock().push(Launch {
            name: name.to_string(),
            version: version.to_string(),
            input: input.clone(),
        });
        Ok(workflow_id)
    }

    async fn get_workflow_run(&self, workflow_id: &str) -> Result<WorkflowRun> {
        self.run_queries.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .runs
            .lock()
            .get(workflow_id)
            .cloned()
            .unwrap_or(Scripted::Rejected(404));
        WorkflowRun::from_payload(scripted.into_result()?)
    }

    async fn get_workflow_definition(&self, name: &str, version: &str) -> Result<Option<Value>> {
        let known = self
            .definitions
            .lock()
            .contains(&(name.to_string(), version.to_string()));
        Ok(known.then(|| serde_json::json!({"name": name, "version": version})))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_scripted_launches() {
        let engine = MockEngine::new();
        engine.push_launch("abc");
        engine.fail_next_launch();

        let input = WorkflowContext::new();
        assert_eq!(engine.launch_workflow("wf1", "1", &input).await.unwrap(), "abc");
        assert!(engine.launch_workflow("wf1", "1", &input).await.is_err());
        assert_eq!(engine.launch_workflow("wf1", "1", &input).await.unwrap(), "wf-1");
        assert_eq!(engine.launches().len(), 2);
    }

    #[tokio::test]
    async fn test_scripted_runs() {
        let engine = MockEngine::new();
        engine.set_run("abc", json!({"status": "RUNNING"}));
        engine.fail_run("def");

        assert!(engine.get_workflow_run("abc").await.unwrap().status.is_running());
        assert!(matches!(
            engine.get_workflow_run("def").await,
            Err(SchedulerError::EngineUnavailable(_))
        ));
        assert!(matches!(
            engine.get_workflow_run("zzz").await,
            Err(SchedulerError::EngineRejected { status: 404, .. })
        ));
        assert_eq!(engine.run_queries(), 3);
    }
}
