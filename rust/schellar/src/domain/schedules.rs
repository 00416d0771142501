//! Schedule definitions and their partial updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::ScheduleStatus;

/// Input/accumulated-output context carried across a schedule's runs.
pub type WorkflowContext = Map<String, Value>;

/// Default workflow version when none is given.
pub const DEFAULT_WORKFLOW_VERSION: &str = "1";

/// Default staleness threshold in seconds.
pub const DEFAULT_CHECK_WARNING_SECONDS: u64 = 3600;

/// A persisted, named trigger definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    /// Stable unique identifier.
    pub id: String,
    /// Human-facing unique key.
    pub name: String,
    /// Whether a live timer should exist for this schedule.
    #[serde(default)]
    pub enabled: bool,
    /// Workflow to launch on the engine.
    pub workflow_name: String,
    /// Workflow version to launch.
    #[serde(default = "default_workflow_version")]
    pub workflow_version: String,
    /// 6-field cron expression (seconds resolution).
    pub cron_string: String,
    /// Context passed as workflow input; successful outputs are merged back in.
    #[serde(default)]
    pub workflow_context: WorkflowContext,
    /// Whether a new launch may start while a previous run is outstanding.
    #[serde(default)]
    pub parallel_runs: bool,
    /// Activation window start (exclusive). `None` is unbounded.
    #[serde(default)]
    pub from_date: Option<DateTime<Utc>>,
    /// Activation window end (exclusive). `None` is unbounded.
    #[serde(default)]
    pub to_date: Option<DateTime<Utc>>,
    /// Informational staleness threshold for outstanding runs.
    #[serde(default = "default_check_warning_seconds")]
    pub check_warning_seconds: u64,
    /// Mirror of the most recent run's lifecycle.
    #[serde(default)]
    pub status: ScheduleStatus,
    /// Timestamp of the last mutation.
    #[serde(default = "Utc::now")]
    pub last_update: DateTime<Utc>,
}

fn default_workflow_version() -> String {
    DEFAULT_WORKFLOW_VERSION.to_string()
}

fn default_check_warning_seconds() -> u64 {
    DEFAULT_CHECK_WARNING_SECONDS
}

impl Schedule {
    /// Create an enabled schedule with a fresh identifier and defaults for
    /// everything optional.
    pub fn new(
        name: impl Into<String>,
        workflow_name: impl Into<String>,
        cron_string: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            enabled: true,
            workflow_name: workflow_name.into(),
            workflow_version: default_workflow_version(),
            cron_string: cron_string.into(),
            workflow_context: WorkflowContext::new(),
            parallel_runs: false,
            from_date: None,
            to_date: None,
            check_warning_seconds: DEFAULT_CHECK_WARNING_SECONDS,
            status: ScheduleStatus::Idle,
            last_update: Utc::now(),
        }
    }

    /// Whether `now` falls strictly inside the activation window.
    #[must_use]
    pub fn in_window(&self, now: DateTime<Utc>) -> bool {
        let before_end = self.to_date.is_none_or(|to| now < to);
        let after_start = self.from_date.is_none_or(|from| now > from);
        before_end && after_start
    }
}

/// Merge a successful run's output into a schedule context.
///
/// Output keys overwrite same-named context keys; every other context key is
/// preserved.
pub fn merge_context(context: &mut WorkflowContext, output: &WorkflowContext) {
    for (key, value) in output {
        context.insert(key.clone(), value.clone());
    }
}

/// A partial set of schedule fields to write.
///
/// `None` leaves a field untouched. The nested options on the window bounds
/// distinguish "leave as is" from "clear".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleUpdate {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub workflow_name: Option<String>,
    pub workflow_version: Option<String>,
    pub cron_string: Option<String>,
    pub workflow_context: Option<WorkflowContext>,
    pub parallel_runs: Option<bool>,
    pub from_date: Option<Option<DateTime<Utc>>>,
    pub to_date: Option<Option<DateTime<Utc>>>,
    pub check_warning_seconds: Option<u64>,
    pub status: Option<ScheduleStatus>,
    pub last_update: Option<DateTime<Utc>>,
}

impl ScheduleUpdate {
    /// Update that records a status change.
    #[must_use]
    pub fn status(status: ScheduleStatus, now: DateTime<Utc>) -> Self {
        Self {
            status: Some(status),
            last_update: Some(now),
            ..Self::default()
        }
    }

    /// Add a replacement context to the update.
    #[must_use]
    pub fn with_context(mut self, context: WorkflowContext) -> Self {
        self.workflow_context = Some(context);
        self
    }

    /// Apply the update to a schedule in place.
    pub fn apply(&self, schedule: &mut Schedule) {
        if let Some(name) = &self.name {
            schedule.name.clone_from(name);
        }
        if let Some(enabled) = self.enabled {
            schedule.enabled = enabled;
        }
        if let Some(workflow_name) = &self.workflow_name {
            schedule.workflow_name.clone_from(workflow_name);
        }
        if let Some(workflow_version) = &self.workflow_version {
            schedule.workflow_version.clone_from(workflow_version);
        }
        if let Some(cron_string) = &self.cron_string {
            schedule.cron_string.clone_from(cron_string);
        }
        if let Some(context) = &self.workflow_context {
            schedule.workflow_context.clone_from(context);
        }
        if let Some(parallel_runs) = self.parallel_runs {
            schedule.parallel_runs = parallel_runs;
        }
        if let Some(from_date) = self.from_date {
            schedule.from_date = from_date;
        }
        if let Some(to_date) = self.to_date {
            schedule.to_date = to_date;
        }
        if let Some(seconds) = self.check_warning_seconds {
            schedule.check_warning_seconds = seconds;
        }
        if let Some(status) = &self.status {
            schedule.status = status.clone();
        }
        if let Some(last_update) = self.last_update {
            schedule.last_update = last_update;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WorkflowStatus;
    use serde_json::json;

    fn context(value: Value) -> WorkflowContext {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_merge_is_additive() {
        let mut ctx = context(json!({"y": 2}));
        merge_context(&mut ctx, &context(json!({"x": 1})));
        assert_eq!(Value::Object(ctx), json!({"y": 2, "x": 1}));
    }

    #[test]
    fn test_merge_overwrites_collisions() {
        let mut ctx = context(json!({"y": 2}));
        merge_context(&mut ctx, &context(json!({"x": 1, "y": 9})));
        assert_eq!(Value::Object(ctx), json!({"y": 9, "x": 1}));
    }

    #[test]
    fn test_window_bounds_are_exclusive() {
        let now = Utc::now();
        let mut schedule = Schedule::new("daily", "wf1", "0 0 9 * * *");
        assert!(schedule.in_window(now));

        schedule.from_date = Some(now + chrono::Duration::hours(1));
        assert!(!schedule.in_window(now));

        schedule.from_date = Some(now);
        assert!(!schedule.in_window(now));

        schedule.from_date = Some(now - chrono::Duration::hours(1));
        schedule.to_date = Some(now);
        assert!(!schedule.in_window(now));

        schedule.to_date = Some(now + chrono::Duration::hours(1));
        assert!(schedule.in_window(now));
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let schedule: Schedule = serde_json::from_value(json!({
            "id": "s-1",
            "name": "daily",
            "workflowName": "wf1",
            "cronString": "0 0 9 * * *",
        }))
        .unwrap();
        assert_eq!(schedule.workflow_version, "1");
        assert_eq!(schedule.check_warning_seconds, 3600);
        assert_eq!(schedule.status, ScheduleStatus::Idle);
        assert!(!schedule.enabled);
        assert!(!schedule.parallel_runs);
    }

    #[test]
    fn test_update_leaves_unset_fields() {
        let mut schedule = Schedule::new("daily", "wf1", "0 0 9 * * *");
        schedule.workflow_context = context(json!({"a": 1}));
        let now = Utc::now();

        ScheduleUpdate::status(WorkflowStatus::Running.into(), now).apply(&mut schedule);

        assert!(schedule.status.is_running());
        assert_eq!(schedule.last_update, now);
        assert_eq!(schedule.name, "daily");
        assert_eq!(Value::Object(schedule.workflow_context.clone()), json!({"a": 1}));
    }

    #[test]
    fn test_update_can_clear_window() {
        let mut schedule = Schedule::new("daily", "wf1", "0 0 9 * * *");
        schedule.to_date = Some(Utc::now());
        let update = ScheduleUpdate {
            to_date: Some(None),
            ..ScheduleUpdate::default()
        };
        update.apply(&mut schedule);
        assert!(schedule.to_date.is_none());
    }
}
