//! Background poller that drives outstanding runs to their terminal state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::database::{RunStore, ScheduleStore};
use crate::domain::{merge_context, RunUpdate, ScheduleRun, ScheduleUpdate, WorkflowStatus};
use crate::engine::{WorkflowEngine, WorkflowRun};
use crate::error::{Result, SchedulerError};
use crate::metrics::{self, TickTimer};

/// Counts from one monitor tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorReport {
    /// Outstanding runs examined.
    pub checked: usize,
    /// Runs the engine still reports as running.
    pub still_running: usize,
    /// Runs recorded as finished this tick.
    pub finished: usize,
    /// Runs whose check or write failed; retried next tick.
    pub failed: usize,
}

/// Polls the engine for every outstanding run.
#[derive(Clone)]
pub struct RunMonitor {
    schedules: Arc<dyn ScheduleStore>,
    runs: Arc<dyn RunStore>,
    engine: Arc<dyn WorkflowEngine>,
    interval: Duration,
}

impl std::fmt::Debug for RunMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunMonitor")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl RunMonitor {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        runs: Arc<dyn RunStore>,
        engine: Arc<dyn WorkflowEngine>,
        interval: Duration,
    ) -> Self {
        Self {
            schedules,
            runs,
            engine,
            interval,
        }
    }

    /// Check every outstanding run once.
    ///
    /// A failure on one run is logged and counted; the remaining runs are
    /// still processed.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` if the outstanding runs cannot be listed.
    pub async fn tick(&self) -> Result<MonitorReport> {
        let timer = TickTimer::new();
        let outstanding = self
            .runs
            .find_by_status(&WorkflowStatus::Running)
            .await
            .map_err(SchedulerError::store)?;

        let mut report = MonitorReport {
            checked: outstanding.len(),
            ..MonitorReport::default()
        };

        for run in outstanding {
            let state = match self.engine.get_workflow_run(&run.workflow_id).await {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(
                        run_id = %run.id,
                        workflow_id = %run.workflow_id,
                        error = %e,
                        "Status check failed, retrying next tick"
                    );
                    metrics::record_run_check_failure();
                    report.failed += 1;
                    continue;
                }
            };

            if state.status.is_running() {
                tracing::debug!(
                    run_id = %run.id,
                    workflow_id = %run.workflow_id,
                    status = %state.status,
                    "Run still outstanding"
                );
                report.still_running += 1;
                continue;
            }

            match self.finish(&run, state).await {
                Ok(()) => report.finished += 1,
                Err(e) => {
                    tracing::error!(
                        run_id = %run.id,
                        workflow_id = %run.workflow_id,
                        error = %e,
                        "Failed to record finished run"
                    );
                    metrics::record_run_check_failure();
                    report.failed += 1;
                }
            }
        }

        timer.complete(report.checked - report.finished);
        Ok(report)
    }

    /// Record a terminal run.
    ///
    /// The schedule is written before the run. A failed write leaves the run
    /// RUNNING, and the next tick repeats both writes.
    async fn finish(&self, run: &ScheduleRun, state: WorkflowRun) -> anyhow::Result<()> {
        let now = Utc::now();
        let WorkflowRun {
            status,
            output,
            raw,
        } = state;

        match self.schedules.find_by_id(&run.schedule_id).await? {
            Some(schedule) => {
                let others = self
                    .runs
                    .find_by_schedule(&schedule.id, Some(&WorkflowStatus::Running))
                    .await?
                    .iter()
                    .filter(|other| other.id != run.id)
                    .count();
                // Newer runs still outstanding keep the schedule RUNNING.
                let schedule_status = if others > 0 {
                    WorkflowStatus::Running
                } else {
                    status.clone()
                };

                let mut update = ScheduleUpdate::status(schedule_status.into(), now);
                if status.is_success() && !output.is_empty() {
                    let mut context = schedule.workflow_context;
                    merge_context(&mut context, &output);
                    update = update.with_context(context);
                }
                self.schedules.update(&schedule.id, &update).await?;
            }
            None => {
                tracing::debug!(schedule_id = %run.schedule_id, "Owning schedule deleted, run kept as history");
            }
        }

        let update = RunUpdate::finished(status.clone(), raw, now);
        if !self.runs.update(&run.id, &update).await? {
            tracing::debug!(run_id = %run.id, "Run disappeared before it could be finished");
            return Ok(());
        }
        metrics::record_run_finished(&status);
        tracing::info!(
            run_id = %run.id,
            schedule_id = %run.schedule_id,
            workflow_id = %run.workflow_id,
            status = %status,
            "Run finished"
        );
        Ok(())
    }

    /// Tick until `token` is cancelled, holding a steady cadence.
    ///
    /// Each tick is followed by a sleep of `interval - elapsed`; a tick that
    /// overruns the interval is followed immediately by the next one.
    pub async fn run(&self, token: CancellationToken) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Run monitor started");
        loop {
            let started = Instant::now();
            match self.tick().await {
                Ok(report) if report.checked > 0 => {
                    tracing::debug!(
                        checked = report.checked,
                        still_running = report.still_running,
                        finished = report.finished,
                        failed = report.failed,
                        "Monitor tick complete"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Monitor tick skipped"),
            }

            let delay = self.interval.saturating_sub(started.elapsed());
            tokio::select! {
                () = token.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        tracing::info!("Run monitor stopped");
    }
}
