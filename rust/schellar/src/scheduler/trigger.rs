//! Per-fire launch decision.
//!
//! The handler re-reads the schedule on each fire and never relies on state
//! captured when the timer was registered.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::database::{RunStore, ScheduleStore};
use crate::domain::{ScheduleRun, ScheduleUpdate, WorkflowStatus};
use crate::engine::WorkflowEngine;
use crate::error::{Result, SchedulerError};
use crate::metrics::{self, outcome};

/// What a single fire did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A run was launched and recorded.
    Launched { run_id: String, workflow_id: String },
    /// The schedule was deleted since the timer was registered.
    ScheduleMissing,
    /// The schedule was disabled since the timer was registered.
    Disabled,
    /// The fire time is outside the activation window.
    OutsideWindow,
    /// Parallel runs are forbidden and a run is still outstanding.
    ConcurrentRunSkipped { outstanding: usize },
}

impl TriggerOutcome {
    /// `outcome` label used in the fire counter.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Launched { .. } => outcome::LAUNCHED,
            Self::ScheduleMissing => outcome::SCHEDULE_MISSING,
            Self::Disabled => outcome::DISABLED,
            Self::OutsideWindow => outcome::OUTSIDE_WINDOW,
            Self::ConcurrentRunSkipped { .. } => outcome::CONCURRENT_RUN_SKIPPED,
        }
    }
}

/// Launches a schedule's workflow when its timer fires.
#[derive(Clone)]
pub struct TriggerHandler {
    schedules: Arc<dyn ScheduleStore>,
    runs: Arc<dyn RunStore>,
    engine: Arc<dyn WorkflowEngine>,
}

impl std::fmt::Debug for TriggerHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerHandler").finish_non_exhaustive()
    }
}

impl TriggerHandler {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        runs: Arc<dyn RunStore>,
        engine: Arc<dyn WorkflowEngine>,
    ) -> Self {
        Self {
            schedules,
            runs,
            engine,
        }
    }

    /// Handle a fire of `schedule_id` now.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` if a store call fails, or the engine error if the
    /// launch fails. Either way the occurrence is dropped; the next cadence
    /// fire tries again.
    pub async fn fire(&self, schedule_id: &str) -> Result<TriggerOutcome> {
        self.fire_at(schedule_id, Utc::now()).await
    }

    /// Handle a fire of `schedule_id` as of `now`.
    ///
    /// # Errors
    ///
    /// See [`TriggerHandler::fire`].
    pub async fn fire_at(&self, schedule_id: &str, now: DateTime<Utc>) -> Result<TriggerOutcome> {
        let result = self.decide(schedule_id, now).await;
        metrics::record_fire(match &result {
            Ok(fired) => fired.label(),
            Err(e) if e.is_engine() => outcome::LAUNCH_FAILED,
            Err(_) => outcome::STORE_ERROR,
        });
        result
    }

    async fn decide(&self, schedule_id: &str, now: DateTime<Utc>) -> Result<TriggerOutcome> {
        let schedule = self
            .schedules
            .find_by_id(schedule_id)
            .await
            .map_err(SchedulerError::store)?;
        let Some(schedule) = schedule else {
            tracing::debug!(schedule_id, "Schedule no longer exists, skipping fire");
            return Ok(TriggerOutcome::ScheduleMissing);
        };

        if !schedule.enabled {
            tracing::debug!(schedule_id, "Schedule disabled, skipping fire");
            return Ok(TriggerOutcome::Disabled);
        }

        if !schedule.in_window(now) {
            tracing::debug!(
                schedule_id,
                from_date = ?schedule.from_date,
                to_date = ?schedule.to_date,
                "Outside activation window, skipping fire"
            );
            return Ok(TriggerOutcome::OutsideWindow);
        }

        if !schedule.parallel_runs {
            let outstanding = self
                .runs
                .find_by_schedule(schedule_id, Some(&WorkflowStatus::Running))
                .await
                .map_err(SchedulerError::store)?
                .len();
            if outstanding > 0 {
                tracing::warn!(
                    schedule_id,
                    name = %schedule.name,
                    outstanding,
                    "Previous run still outstanding and parallel runs disabled, skipping fire"
                );
                return Ok(TriggerOutcome::ConcurrentRunSkipped { outstanding });
            }
        }

        let workflow_id = match self
            .engine
            .launch_workflow(
                &schedule.workflow_name,
                &schedule.workflow_version,
                &schedule.workflow_context,
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(
                    schedule_id,
                    workflow = %schedule.workflow_name,
                    error = %e,
                    "Workflow launch failed"
                );
                return Err(e);
            }
        };

        let run = ScheduleRun::launched(schedule_id, &workflow_id, now);
        let run_id = self.runs.insert(&run).await.map_err(|e| {
            tracing::error!(
                schedule_id,
                workflow_id = %workflow_id,
                error = %e,
                "Launched workflow but failed to record the run"
            );
            SchedulerError::store(e)
        })?;

        let update = ScheduleUpdate::status(WorkflowStatus::Running.into(), now);
        if let Err(e) = self.schedules.update(schedule_id, &update).await {
            tracing::error!(schedule_id, error = %e, "Failed to mark schedule running");
        }

        tracing::info!(
            schedule_id,
            name = %schedule.name,
            workflow = %schedule.workflow_name,
            workflow_id = %workflow_id,
            run_id = %run_id,
            "Workflow launched"
        );
        Ok(TriggerOutcome::Launched {
            run_id,
            workflow_id,
        })
    }
}
