//! `SQLite` storage for schedules and runs.
//!
//! Every operation opens a connection on the blocking pool, so the store is
//! safe to share across tasks. Timestamps are stored as Unix epoch
//! milliseconds and the JSON-valued fields as TEXT.
//!
//! # Example
//!
//! ```rust,ignore
//! use schellar::database::SqliteStore;
//!
//! let store = SqliteStore::new("./data/schellar.db").await?;
//! let enabled = store.find_enabled().await?;
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use tokio::task;

use super::repository::{RunStore, ScheduleStore};
use crate::domain::{
    RunUpdate, Schedule, ScheduleRun, ScheduleStatus, ScheduleUpdate, WorkflowContext,
    WorkflowStatus, DEFAULT_CHECK_WARNING_SECONDS,
};

const SCHEDULE_COLUMNS: &str = "id, name, enabled, workflow_name, workflow_version, cron_string, \
     workflow_context, parallel_runs, from_date, to_date, check_warning_seconds, status, last_update";

const RUN_COLUMNS: &str =
    "id, schedule_id, workflow_id, status, start_date, finish_date, workflow_details, last_update";

/// Schedule and run store backed by a single `SQLite` file.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    /// Path to `SQLite` database file.
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (or create) the store and migrate its schema.
    ///
    /// # Errors
    ///
    /// Returns error if the parent directory cannot be created, the database
    /// cannot be opened, or the schema migration fails.
    pub async fn new<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let db_path = path.into();
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let store = Self { db_path };
        store.migrate_schema().await?;
        Ok(store)
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db_path = self.db_path.clone();
        task::spawn_blocking(move || -> Result<T> {
            let mut conn = Connection::open(&db_path).context("Failed to open database")?;
            conn.busy_timeout(Duration::from_secs(5))?;
            f(&mut conn)
        })
        .await
        .context("Failed to spawn blocking task")?
    }

    async fn migrate_schema(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")
                .context("Failed to enable WAL mode")?;

            conn.execute(
                r"
                CREATE TABLE IF NOT EXISTS schedules (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    enabled INTEGER NOT NULL DEFAULT 0,
                    workflow_name TEXT NOT NULL,
                    workflow_version TEXT NOT NULL,
                    cron_string TEXT NOT NULL,
                    workflow_context TEXT NOT NULL DEFAULT '{}',
                    parallel_runs INTEGER NOT NULL DEFAULT 0,
                    from_date INTEGER,
                    to_date INTEGER,
                    check_warning_seconds INTEGER NOT NULL,
                    status TEXT NOT NULL DEFAULT 'IDLE',
                    last_update INTEGER NOT NULL
                )
                ",
                [],
            )
            .context("Failed to create schedules table")?;

            conn.execute(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_schedules_name ON schedules(name)",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_schedules_enabled ON schedules(enabled)",
                [],
            )?;

            conn.execute(
                r"
                CREATE TABLE IF NOT EXISTS schedule_runs (
                    id TEXT PRIMARY KEY,
                    schedule_id TEXT NOT NULL,
                    workflow_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    start_date INTEGER NOT NULL,
                    finish_date INTEGER,
                    workflow_details TEXT,
                    last_update INTEGER NOT NULL
                )
                ",
                [],
            )
            .context("Failed to create schedule_runs table")?;

            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_runs_status ON schedule_runs(status)",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_runs_schedule ON schedule_runs(schedule_id, status)",
                [],
            )?;

            Ok(())
        })
        .await
    }

    async fn query_schedules(
        &self,
        filter: &'static str,
        arg: Option<String>,
    ) -> Result<Vec<Schedule>> {
        self.with_conn(move |conn| {
            let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM schedules {filter}");
            let mut stmt = conn.prepare(&sql)?;
            let rows = match arg {
                Some(arg) => stmt
                    .query_map(params![arg], ScheduleRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?,
                None => stmt
                    .query_map([], ScheduleRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?,
            };
            rows.into_iter().map(ScheduleRow::into_schedule).collect()
        })
        .await
    }
}

fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Raw column values of a `schedules` row.
struct ScheduleRow {
    id: String,
    name: String,
    enabled: bool,
    workflow_name: String,
    workflow_version: String,
    cron_string: String,
    workflow_context: String,
    parallel_runs: bool,
    from_date: Option<i64>,
    to_date: Option<i64>,
    check_warning_seconds: i64,
    status: String,
    last_update: i64,
}

impl ScheduleRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            enabled: row.get(2)?,
            workflow_name: row.get(3)?,
            workflow_version: row.get(4)?,
            cron_string: row.get(5)?,
            workflow_context: row.get(6)?,
            parallel_runs: row.get(7)?,
            from_date: row.get(8)?,
            to_date: row.get(9)?,
            check_warning_seconds: row.get(10)?,
            status: row.get(11)?,
            last_update: row.get(12)?,
        })
    }

    fn into_schedule(self) -> Result<Schedule> {
        let workflow_context: WorkflowContext = serde_json::from_str(&self.workflow_context)
            .with_context(|| format!("Corrupt workflow_context for schedule {}", self.id))?;
        Ok(Schedule {
            id: self.id,
            name: self.name,
            enabled: self.enabled,
            workflow_name: self.workflow_name,
            workflow_version: self.workflow_version,
            cron_string: self.cron_string,
            workflow_context,
            parallel_runs: self.parallel_runs,
            from_date: self.from_date.map(from_millis),
            to_date: self.to_date.map(from_millis),
            check_warning_seconds: u64::try_from(self.check_warning_seconds)
                .unwrap_or(DEFAULT_CHECK_WARNING_SECONDS),
            status: ScheduleStatus::from(self.status),
            last_update: from_millis(self.last_update),
        })
    }
}

/// Raw column values of a `schedule_runs` row.
struct RunRow {
    id: String,
    schedule_id: String,
    workflow_id: String,
    status: String,
    start_date: i64,
    finish_date: Option<i64>,
    workflow_details: Option<String>,
    last_update: i64,
}

impl RunRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            schedule_id: row.get(1)?,
            workflow_id: row.get(2)?,
            status: row.get(3)?,
            start_date: row.get(4)?,
            finish_date: row.get(5)?,
            workflow_details: row.get(6)?,
            last_update: row.get(7)?,
        })
    }

    fn into_run(self) -> Result<ScheduleRun> {
        let workflow_details = self
            .workflow_details
            .map(|raw| serde_json::from_str::<Value>(&raw))
            .transpose()
            .with_context(|| format!("Corrupt workflow_details for run {}", self.id))?;
        Ok(ScheduleRun {
            id: self.id,
            schedule_id: self.schedule_id,
            workflow_id: self.workflow_id,
            status: WorkflowStatus::from(self.status),
            start_date: from_millis(self.start_date),
            finish_date: self.finish_date.map(from_millis),
            workflow_details,
            last_update: from_millis(self.last_update),
        })
    }
}

fn write_schedule(conn: &Connection, sql: &str, schedule: &Schedule) -> Result<usize> {
    let context = serde_json::to_string(&schedule.workflow_context)?;
    let warning = i64::try_from(schedule.check_warning_seconds).unwrap_or(i64::MAX);
    let written = conn.execute(
        sql,
        params![
            &schedule.id,
            &schedule.name,
            schedule.enabled,
            &schedule.workflow_name,
            &schedule.workflow_version,
            &schedule.cron_string,
            context,
            schedule.parallel_runs,
            schedule.from_date.map(to_millis),
            schedule.to_date.map(to_millis),
            warning,
            schedule.status.as_str(),
            to_millis(schedule.last_update),
        ],
    )?;
    Ok(written)
}

fn write_run(conn: &Connection, sql: &str, run: &ScheduleRun) -> Result<usize> {
    let details = run
        .workflow_details
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let written = conn.execute(
        sql,
        params![
            &run.id,
            &run.schedule_id,
            &run.workflow_id,
            run.status.as_str(),
            to_millis(run.start_date),
            run.finish_date.map(to_millis),
            details,
            to_millis(run.last_update),
        ],
    )?;
    Ok(written)
}

const INSERT_SCHEDULE: &str = r"
    INSERT INTO schedules (id, name, enabled, workflow_name, workflow_version, cron_string,
        workflow_context, parallel_runs, from_date, to_date, check_warning_seconds, status, last_update)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
";

const UPDATE_SCHEDULE: &str = r"
    UPDATE schedules SET name = ?2, enabled = ?3, workflow_name = ?4, workflow_version = ?5,
        cron_string = ?6, workflow_context = ?7, parallel_runs = ?8, from_date = ?9, to_date = ?10,
        check_warning_seconds = ?11, status = ?12, last_update = ?13
    WHERE id = ?1
";

const INSERT_RUN: &str = r"
    INSERT INTO schedule_runs (id, schedule_id, workflow_id, status, start_date, finish_date,
        workflow_details, last_update)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
";

const UPDATE_RUN: &str = r"
    UPDATE schedule_runs SET schedule_id = ?2, workflow_id = ?3, status = ?4, start_date = ?5,
        finish_date = ?6, workflow_details = ?7, last_update = ?8
    WHERE id = ?1
";

#[async_trait]
impl ScheduleStore for SqliteStore {
    async fn find_enabled(&self) -> Result<Vec<Schedule>> {
        self.query_schedules("WHERE enabled = 1 ORDER BY name", None)
            .await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Schedule>> {
        let mut found = self
            .query_schedules("WHERE id = ?1", Some(id.to_string()))
            .await?;
        Ok(found.pop())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Schedule>> {
        let mut found = self
            .query_schedules("WHERE name = ?1", Some(name.to_string()))
            .await?;
        Ok(found.pop())
    }

    async fn list(&self) -> Result<Vec<Schedule>> {
        self.query_schedules("ORDER BY name", None).await
    }

    async fn insert(&self, schedule: &Schedule) -> Result<String> {
        let schedule = schedule.clone();
        self.with_conn(move |conn| {
            write_schedule(conn, INSERT_SCHEDULE, &schedule)
                .with_context(|| format!("Failed to insert schedule '{}'", schedule.name))?;
            Ok(schedule.id)
        })
        .await
    }

    async fn update(&self, id: &str, update: &ScheduleUpdate) -> Result<bool> {
        let id = id.to_string();
        let update = update.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let row = tx
                .query_row(
                    &format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?1"),
                    params![&id],
                    ScheduleRow::from_row,
                )
                .optional()?;
            let Some(row) = row else {
                return Ok(false);
            };

            let mut schedule = row.into_schedule()?;
            update.apply(&mut schedule);
            write_schedule(&tx, UPDATE_SCHEDULE, &schedule)
                .with_context(|| format!("Failed to update schedule {id}"))?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM schedules WHERE id = ?1", params![&id])?;
            Ok(removed > 0)
        })
        .await
    }
}

#[async_trait]
impl RunStore for SqliteStore {
    async fn find_by_status(&self, status: &WorkflowStatus) -> Result<Vec<ScheduleRun>> {
        let status = status.as_str().to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM schedule_runs WHERE status = ?1 ORDER BY start_date"
            ))?;
            let rows = stmt
                .query_map(params![&status], RunRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(RunRow::into_run).collect()
        })
        .await
    }

    async fn find_by_schedule(
        &self,
        schedule_id: &str,
        status: Option<&WorkflowStatus>,
    ) -> Result<Vec<ScheduleRun>> {
        let schedule_id = schedule_id.to_string();
        let status = status.map(|s| s.as_str().to_string());
        self.with_conn(move |conn| {
            let rows = if let Some(status) = status {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM schedule_runs \
                     WHERE schedule_id = ?1 AND status = ?2 ORDER BY start_date DESC"
                ))?;
                stmt.query_map(params![&schedule_id, &status], RunRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            } else {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM schedule_runs \
                     WHERE schedule_id = ?1 ORDER BY start_date DESC"
                ))?;
                stmt.query_map(params![&schedule_id], RunRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            };
            rows.into_iter().map(RunRow::into_run).collect()
        })
        .await
    }

    async fn insert(&self, run: &ScheduleRun) -> Result<String> {
        let run = run.clone();
        self.with_conn(move |conn| {
            write_run(conn, INSERT_RUN, &run)
                .with_context(|| format!("Failed to insert run for workflow {}", run.workflow_id))?;
            Ok(run.id)
        })
        .await
    }

    async fn update(&self, id: &str, update: &RunUpdate) -> Result<bool> {
        let id = id.to_string();
        let update = update.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let row = tx
                .query_row(
                    &format!("SELECT {RUN_COLUMNS} FROM schedule_runs WHERE id = ?1"),
                    params![&id],
                    RunRow::from_row,
                )
                .optional()?;
            let Some(row) = row else {
                return Ok(false);
            };

            let mut run = row.into_run()?;
            update.apply(&mut run);
            write_run(&tx, UPDATE_RUN, &run).with_context(|| format!("Failed to update run {id}"))?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }
}
