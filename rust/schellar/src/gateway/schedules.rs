//! Schedule management endpoints.
//!
//! Schedules are addressed by their unique `name`. Every successful mutation
//! is followed by a reconcile so the live timers pick it up immediately.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use super::{message, ApiError};
use crate::domain::{
    Schedule, ScheduleRun, ScheduleUpdate, WorkflowContext, WorkflowStatus,
    DEFAULT_CHECK_WARNING_SECONDS, DEFAULT_WORKFLOW_VERSION,
};
use crate::error::SchedulerError;
use crate::scheduler::CronExpression;
use crate::AppState;

/// Create the schedule router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/schedule", get(list_schedules).post(create_schedule))
        .route(
            "/schedule/{name}",
            get(get_schedule).put(update_schedule).delete(delete_schedule),
        )
        .route("/schedule/{name}/runs", get(list_runs))
}

/// Body of `POST /schedule` and `PUT /schedule/{name}`.
///
/// On create, `name`, `workflowName` and `cronString` are required. On
/// update, only the fields present are written; `fromDate`/`toDate` set to
/// `null` clear the bound.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub workflow_name: Option<String>,
    pub workflow_version: Option<String>,
    pub cron_string: Option<String>,
    pub workflow_context: Option<WorkflowContext>,
    pub parallel_runs: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    pub from_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable")]
    pub to_date: Option<Option<DateTime<Utc>>>,
    pub check_warning_seconds: Option<u64>,
}

/// Present-but-null becomes `Some(None)`; absent stays `None` via `default`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn required(field: &str, value: Option<String>) -> Result<String, SchedulerError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(SchedulerError::validation(format!("'{field}' is required"))),
    }
}

fn non_empty(field: &str, value: Option<String>) -> Result<Option<String>, SchedulerError> {
    match value {
        Some(v) if v.trim().is_empty() => Err(SchedulerError::validation(format!(
            "'{field}' cannot be empty"
        ))),
        other => Ok(other),
    }
}

fn check_window(
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Result<(), SchedulerError> {
    if let (Some(from), Some(to)) = (from, to)
        && from >= to
    {
        return Err(SchedulerError::validation("'fromDate' must be before 'toDate'"));
    }
    Ok(())
}

impl ScheduleRequest {
    /// Validate a create request and fill in defaults.
    ///
    /// # Errors
    ///
    /// `Validation` naming the first missing or malformed field.
    pub fn into_schedule(self) -> Result<Schedule, SchedulerError> {
        let name = required("name", self.name)?;
        let workflow_name = required("workflowName", self.workflow_name)?;
        let cron_string = required("cronString", self.cron_string)?;
        CronExpression::parse(&cron_string)?;

        let mut schedule = Schedule::new(name, workflow_name, cron_string);
        schedule.enabled = self.enabled.unwrap_or(false);
        schedule.workflow_version = self
            .workflow_version
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_WORKFLOW_VERSION.to_string());
        schedule.workflow_context = self.workflow_context.unwrap_or_default();
        schedule.parallel_runs = self.parallel_runs.unwrap_or(false);
        schedule.from_date = self.from_date.flatten();
        schedule.to_date = self.to_date.flatten();
        schedule.check_warning_seconds = self
            .check_warning_seconds
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_CHECK_WARNING_SECONDS);
        check_window(schedule.from_date, schedule.to_date)?;
        Ok(schedule)
    }

    /// Validate an update request against the schedule it changes.
    ///
    /// # Errors
    ///
    /// `Validation` if a present field is empty or malformed, or if the
    /// resulting window is inverted.
    pub fn into_update(
        self,
        current: &Schedule,
        now: DateTime<Utc>,
    ) -> Result<ScheduleUpdate, SchedulerError> {
        let cron_string = non_empty("cronString", self.cron_string)?;
        if let Some(cron) = &cron_string {
            CronExpression::parse(cron)?;
        }

        let update = ScheduleUpdate {
            name: non_empty("name", self.name)?,
            enabled: self.enabled,
            workflow_name: non_empty("workflowName", self.workflow_name)?,
            workflow_version: non_empty("workflowVersion", self.workflow_version)?,
            cron_string,
            workflow_context: self.workflow_context,
            parallel_runs: self.parallel_runs,
            from_date: self.from_date,
            to_date: self.to_date,
            check_warning_seconds: self.check_warning_seconds.filter(|s| *s > 0),
            status: None,
            last_update: Some(now),
        };
        check_window(
            update.from_date.unwrap_or(current.from_date),
            update.to_date.unwrap_or(current.to_date),
        )?;
        Ok(update)
    }
}

/// Query of `GET /schedule/{name}/runs`.
#[derive(Debug, Default, Deserialize)]
pub struct RunsQuery {
    /// Only runs with this status, e.g. `RUNNING`.
    pub status: Option<String>,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| ApiError::bad_request(format!("Invalid request body: {}", e.body_text())))
}

async fn find_schedule(state: &AppState, name: &str) -> Result<Schedule, ApiError> {
    state
        .stores
        .schedules
        .find_by_name(name)
        .await
        .map_err(SchedulerError::store)?
        .ok_or_else(|| ApiError::not_found(format!("Couldn't find schedule {name}")))
}

async fn ensure_unique_name(state: &AppState, name: &str) -> Result<(), ApiError> {
    let existing = state
        .stores
        .schedules
        .find_by_name(name)
        .await
        .map_err(SchedulerError::store)?;
    if existing.is_some() {
        return Err(ApiError::bad_request(format!("Duplicate schedule name '{name}'")));
    }
    Ok(())
}

/// Reject the request if the engine does not know the workflow.
async fn ensure_workflow_exists(
    state: &AppState,
    name: &str,
    version: &str,
) -> Result<(), ApiError> {
    if !state.config.engine.validate_workflows {
        return Ok(());
    }
    match state.engine.get_workflow_definition(name, version).await? {
        Some(_) => {
            tracing::debug!(workflow = name, version, "Workflow definition found");
            Ok(())
        }
        None => Err(ApiError::bad_request(format!(
            "Workflow '{name}' version {version} doesn't exist in the workflow engine"
        ))),
    }
}

async fn reconcile_after(state: &AppState, change: &'static str, name: &str) {
    if let Err(e) = state.scheduler.reconcile().await {
        tracing::warn!(
            change,
            name,
            error = %e,
            "Reconcile after schedule change failed"
        );
    }
}

/// `POST /schedule`
async fn create_schedule(
    State(state): State<AppState>,
    payload: Result<Json<ScheduleRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let schedule = body(payload)?.into_schedule()?;
    ensure_unique_name(&state, &schedule.name).await?;
    ensure_workflow_exists(&state, &schedule.workflow_name, &schedule.workflow_version).await?;

    state
        .stores
        .schedules
        .insert(&schedule)
        .await
        .map_err(SchedulerError::store)?;
    tracing::info!(
        schedule_id = %schedule.id,
        name = %schedule.name,
        workflow = %schedule.workflow_name,
        cron = %schedule.cron_string,
        enabled = schedule.enabled,
        "Schedule created"
    );

    reconcile_after(&state, "create", &schedule.name).await;
    Ok((StatusCode::CREATED, Json(schedule)))
}

/// `GET /schedule`
async fn list_schedules(State(state): State<AppState>) -> Result<Json<Vec<Schedule>>, ApiError> {
    let schedules = state
        .stores
        .schedules
        .list()
        .await
        .map_err(SchedulerError::store)?;
    Ok(Json(schedules))
}

/// `GET /schedule/{name}`
async fn get_schedule(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Schedule>, ApiError> {
    find_schedule(&state, &name).await.map(Json)
}

/// `PUT /schedule/{name}`
async fn update_schedule(
    State(state): State<AppState>,
    Path(name): Path<String>,
    payload: Result<Json<ScheduleRequest>, JsonRejection>,
) -> Result<Json<Schedule>, ApiError> {
    let request = body(payload)?;
    let mut schedule = find_schedule(&state, &name).await?;
    let update = request.into_update(&schedule, Utc::now())?;

    if let Some(new_name) = &update.name
        && *new_name != schedule.name
    {
        ensure_unique_name(&state, new_name).await?;
    }
    if update.workflow_name.is_some() || update.workflow_version.is_some() {
        let workflow = update.workflow_name.as_ref().unwrap_or(&schedule.workflow_name);
        let version = update
            .workflow_version
            .as_ref()
            .unwrap_or(&schedule.workflow_version);
        ensure_workflow_exists(&state, workflow, version).await?;
    }

    let updated = state
        .stores
        .schedules
        .update(&schedule.id, &update)
        .await
        .map_err(SchedulerError::store)?;
    if !updated {
        return Err(ApiError::not_found(format!("Couldn't find schedule {name}")));
    }
    update.apply(&mut schedule);
    tracing::info!(schedule_id = %schedule.id, name = %schedule.name, "Schedule updated");

    reconcile_after(&state, "update", &schedule.name).await;
    Ok(Json(schedule))
}

/// `DELETE /schedule/{name}`
///
/// Runs of the schedule are kept.
async fn delete_schedule(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let schedule = find_schedule(&state, &name).await?;
    let removed = state
        .stores
        .schedules
        .remove(&schedule.id)
        .await
        .map_err(SchedulerError::store)?;
    if !removed {
        return Err(ApiError::not_found(format!("Couldn't find schedule {name}")));
    }
    tracing::info!(schedule_id = %schedule.id, name = %name, "Schedule deleted");

    reconcile_after(&state, "delete", &name).await;
    Ok(message(
        StatusCode::OK,
        format!("Deleted schedule successfully. name={name}"),
    ))
}

/// `GET /schedule/{name}/runs`
async fn list_runs(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<ScheduleRun>>, ApiError> {
    let schedule = find_schedule(&state, &name).await?;
    let status = query.status.map(WorkflowStatus::from);
    let runs = state
        .stores
        .runs
        .find_by_schedule(&schedule.id, status.as_ref())
        .await
        .map_err(SchedulerError::store)?;
    Ok(Json(runs))
}
