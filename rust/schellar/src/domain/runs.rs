//! Schedule runs: one launch of a schedule, tracked to completion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::WorkflowStatus;

/// A single launch instance of a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRun {
    /// Unique run identifier.
    pub id: String,
    /// Owning schedule. Runs outlive their schedule.
    pub schedule_id: String,
    /// Engine-side run identifier.
    pub workflow_id: String,
    /// Last status observed on the engine.
    pub status: WorkflowStatus,
    /// When the run was launched.
    pub start_date: DateTime<Utc>,
    /// When the run was observed to finish.
    #[serde(default)]
    pub finish_date: Option<DateTime<Utc>>,
    /// Engine payload captured at the final status check.
    #[serde(default, rename = "details")]
    pub workflow_details: Option<Value>,
    /// Timestamp of the last mutation.
    pub last_update: DateTime<Utc>,
}

impl ScheduleRun {
    /// Create a run record for a freshly launched workflow.
    pub fn launched(
        schedule_id: impl Into<String>,
        workflow_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            schedule_id: schedule_id.into(),
            workflow_id: workflow_id.into(),
            status: WorkflowStatus::Running,
            start_date: now,
            finish_date: None,
            workflow_details: None,
            last_update: now,
        }
    }
}

/// A partial set of run fields to write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunUpdate {
    pub status: Option<WorkflowStatus>,
    pub finish_date: Option<DateTime<Utc>>,
    pub workflow_details: Option<Value>,
    pub last_update: Option<DateTime<Utc>>,
}

impl RunUpdate {
    /// Update that records a terminal status along with the engine payload.
    #[must_use]
    pub fn finished(status: WorkflowStatus, details: Value, now: DateTime<Utc>) -> Self {
        Self {
            status: Some(status),
            finish_date: Some(now),
            workflow_details: Some(details),
            last_update: Some(now),
        }
    }

    /// Apply the update to a run in place.
    pub fn apply(&self, run: &mut ScheduleRun) {
        if let Some(status) = &self.status {
            run.status = status.clone();
        }
        if let Some(finish_date) = self.finish_date {
            run.finish_date = Some(finish_date);
        }
        if let Some(details) = &self.workflow_details {
            run.workflow_details = Some(details.clone());
        }
        if let Some(last_update) = self.last_update {
            run.last_update = last_update;
        }
    }
}
