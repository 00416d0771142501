//! Workflow and schedule status vocabularies.
//!
//! The engine's vocabulary is open: anything it reports that is not one of
//! the known statuses is carried verbatim in [`WorkflowStatus::Other`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of a workflow run as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WorkflowStatus {
    /// Run is executing.
    Running,
    /// Run is paused on the engine; still outstanding.
    Paused,
    /// Run finished successfully.
    Completed,
    /// Run failed.
    Failed,
    /// Run exceeded its engine-side timeout.
    TimedOut,
    /// Run was terminated by an operator.
    Terminated,
    /// Any other status string the engine reports.
    Other(String),
}

impl WorkflowStatus {
    /// Status string as stored and sent over the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::TimedOut => "TIMED_OUT",
            Self::Terminated => "TERMINATED",
            Self::Other(s) => s.as_str(),
        }
    }

    /// Whether the run is still outstanding on the engine.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    /// Whether the run reached a final state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !self.is_running()
    }

    /// Whether the run finished successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl From<&str> for WorkflowStatus {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "RUNNING" => Self::Running,
            "PAUSED" => Self::Paused,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            "TIMED_OUT" => Self::TimedOut,
            "TERMINATED" => Self::Terminated,
            _ => Self::Other(s.to_string()),
        }
    }
}

impl From<String> for WorkflowStatus {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<WorkflowStatus> for String {
    fn from(status: WorkflowStatus) -> Self {
        match status {
            WorkflowStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a schedule: idle until its first launch, then a mirror of the
/// most recent run's lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ScheduleStatus {
    /// No run has been launched yet.
    #[default]
    Idle,
    /// Status of the most recent run.
    Workflow(WorkflowStatus),
}

impl ScheduleStatus {
    /// Status string as stored and sent over the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Idle => "IDLE",
            Self::Workflow(status) => status.as_str(),
        }
    }

    /// Whether the schedule has a run outstanding.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Workflow(status) if status.is_running())
    }
}

impl From<WorkflowStatus> for ScheduleStatus {
    fn from(status: WorkflowStatus) -> Self {
        Self::Workflow(status)
    }
}

impl From<String> for ScheduleStatus {
    fn from(s: String) -> Self {
        if s.trim().eq_ignore_ascii_case("IDLE") || s.trim().is_empty() {
            Self::Idle
        } else {
            Self::Workflow(WorkflowStatus::from(s))
        }
    }
}

impl From<ScheduleStatus> for String {
    fn from(status: ScheduleStatus) -> Self {
        match status {
            ScheduleStatus::Idle => "IDLE".to_string(),
            ScheduleStatus::Workflow(status) => status.into(),
        }
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
