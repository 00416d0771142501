//! Repository traits for schedules and runs.
//!
//! The scheduling core only needs create/read/update/delete and a couple of
//! filtered queries; backends provide at least per-record atomicity for each
//! individual call.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::{RunUpdate, Schedule, ScheduleRun, ScheduleUpdate, WorkflowStatus};

/// Repository trait for schedule definitions.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// All schedules with `enabled = true`.
    async fn find_enabled(&self) -> anyhow::Result<Vec<Schedule>>;

    /// Get a schedule by identifier.
    async fn find_by_id(&self, id: &str) -> anyhow::Result<Option<Schedule>>;

    /// Get a schedule by its unique name.
    async fn find_by_name(&self, name: &str) -> anyhow::Result<Option<Schedule>>;

    /// All schedules, ordered by name.
    async fn list(&self) -> anyhow::Result<Vec<Schedule>>;

    /// Insert a new schedule, returning its identifier.
    async fn insert(&self, schedule: &Schedule) -> anyhow::Result<String>;

    /// Apply a partial update. Returns `false` if the schedule does not exist.
    async fn update(&self, id: &str, update: &ScheduleUpdate) -> anyhow::Result<bool>;

    /// Delete a schedule. Its runs are left in place.
    async fn remove(&self, id: &str) -> anyhow::Result<bool>;
}

/// Repository trait for schedule runs.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// All runs currently recorded with `status`.
    async fn find_by_status(&self, status: &WorkflowStatus) -> anyhow::Result<Vec<ScheduleRun>>;

    /// Runs of one schedule, newest first, optionally filtered by status.
    async fn find_by_schedule(
        &self,
        schedule_id: &str,
        status: Option<&WorkflowStatus>,
    ) -> anyhow::Result<Vec<ScheduleRun>>;

    /// Insert a new run, returning its identifier.
    async fn insert(&self, run: &ScheduleRun) -> anyhow::Result<String>;

    /// Apply a partial update. Returns `false` if the run does not exist.
    async fn update(&self, id: &str, update: &RunUpdate) -> anyhow::Result<bool>;
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// In-memory store for tests and throwaway deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    schedules: Arc<RwLock<HashMap<String, Schedule>>>,
    runs: Arc<RwLock<HashMap<String, ScheduleRun>>>,
}

impl InMemoryStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored run.
    pub fn all_runs(&self) -> Vec<ScheduleRun> {
        self.runs.read().values().cloned().collect()
    }
}

#[async_trait]
impl ScheduleStore for InMemoryStore {
    async fn find_enabled(&self) -> anyhow::Result<Vec<Schedule>> {
        let schedules = self.schedules.read();
        Ok(schedules.values().filter(|s| s.enabled).cloned().collect())
    }

    async fn find_by_id(&self, id: &str) -> anyhow::Result<Option<Schedule>> {
        Ok(self.schedules.read().get(id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> anyhow::Result<Option<Schedule>> {
        let schedules = self.schedules.read();
        Ok(schedules.values().find(|s| s.name == name).cloned())
    }

    async fn list(&self) -> anyhow::Result<Vec<Schedule>> {
        let mut all: Vec<_> = self.schedules.read().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn insert(&self, schedule: &Schedule) -> anyhow::Result<String> {
        let mut schedules = self.schedules.write();
        if schedules.contains_key(&schedule.id) {
            anyhow::bail!("Schedule id '{}' already exists", schedule.id);
        }
        if schedules.values().any(|s| s.name == schedule.name) {
            anyhow::bail!("Schedule name '{}' already exists", schedule.name);
        }
        schedules.insert(schedule.id.clone(), schedule.clone());
        Ok(schedule.id.clone())
    }

    async fn update(&self, id: &str, update: &ScheduleUpdate) -> anyhow::Result<bool> {
        let mut schedules = self.schedules.write();
        if let Some(name) = &update.name
            && schedules.values().any(|s| s.id != id && &s.name == name)
        {
            anyhow::bail!("Schedule name '{name}' already exists");
        }
        match schedules.get_mut(id) {
            Some(schedule) => {
                update.apply(schedule);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, id: &str) -> anyhow::Result<bool> {
        Ok(self.schedules.write().remove(id).is_some())
    }
}

#[async_trait]
impl RunStore for InMemoryStore {
    async fn find_by_status(&self, status: &WorkflowStatus) -> anyhow::Result<Vec<ScheduleRun>> {
        let runs = self.runs.read();
        let mut matching: Vec<_> = runs.values().filter(|r| &r.status == status).cloned().collect();
        matching.sort_by_key(|r| r.start_date);
        Ok(matching)
    }

    async fn find_by_schedule(
        &self,
        schedule_id: &str,
        status: Option<&WorkflowStatus>,
    ) -> anyhow::Result<Vec<ScheduleRun>> {
        let runs = self.runs.read();
        let mut matching: Vec<_> = runs
            .values()
            .filter(|r| r.schedule_id == schedule_id)
            .filter(|r| status.is_none_or(|s| &r.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.start_date.cmp(&a.start_date));
        Ok(matching)
    }

    async fn insert(&self, run: &ScheduleRun) -> anyhow::Result<String> {
        let mut runs = self.runs.write();
        if runs.contains_key(&run.id) {
            anyhow::bail!("Run id '{}' already exists", run.id);
        }
        runs.insert(run.id.clone(), run.clone());
        Ok(run.id.clone())
    }

    async fn update(&self, id: &str, update: &RunUpdate) -> anyhow::Result<bool> {
        let mut runs = self.runs.write();
        match runs.get_mut(id) {
            Some(run) => {
                update.apply(run);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_find_enabled_filters_disabled() {
        let store = InMemoryStore::new();
        let on = Schedule::new("on", "wf", "0 * * * * *");
        let mut off = Schedule::new("off", "wf", "0 * * * * *");
        off.enabled = false;
        ScheduleStore::insert(&store, &on).await.unwrap();
        ScheduleStore::insert(&store, &off).await.unwrap();

        let enabled = store.find_enabled().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name, "on");
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let store = InMemoryStore::new();
        ScheduleStore::insert(&store, &Schedule::new("daily", "wf", "0 * * * * *"))
            .await
            .unwrap();
        let dup = Schedule::new("daily", "wf2", "0 * * * * *");
        assert!(ScheduleStore::insert(&store, &dup).await.is_err());
    }

    #[tokio::test]
    async fn test_update_missing_schedule() {
        let store = InMemoryStore::new();
        let found = ScheduleStore::update(&store, "nope", &ScheduleUpdate::default())
            .await
            .unwrap();
        assert!(!found);
    }

    #[tokio::test]
    async fn test_remove_keeps_runs() {
        let store = InMemoryStore::new();
        let schedule = Schedule::new("daily", "wf", "0 * * * * *");
        ScheduleStore::insert(&store, &schedule).await.unwrap();
        RunStore::insert(&store, &ScheduleRun::launched(&schedule.id, "abc", Utc::now()))
            .await
            .unwrap();

        assert!(store.remove(&schedule.id).await.unwrap());
        let runs = store.find_by_schedule(&schedule.id, None).await.unwrap();
        assert_eq!(runs.len(), 1);
    }

    #[tokio::test]
    async fn test_runs_by_status_and_schedule() {
        let store = InMemoryStore::new();
        let done = Utc::now();
        let a = ScheduleRun::launched("s-1", "a", done);
        let b = ScheduleRun::launched("s-1", "b", done);
        let c = ScheduleRun::launched("s-2", "c", done);
        for run in [&a, &b, &c] {
            RunStore::insert(&store, run).await.unwrap();
        }
        RunStore::update(
            &store,
            &a.id,
            &RunUpdate::finished(WorkflowStatus::Completed, serde_json::json!({}), done),
        )
        .await
        .unwrap();

        let running = store.find_by_status(&WorkflowStatus::Running).await.unwrap();
        assert_eq!(running.len(), 2);

        let s1_running = store
            .find_by_schedule("s-1", Some(&WorkflowStatus::Running))
            .await
            .unwrap();
        assert_eq!(s1_running.len(), 1);
        assert_eq!(s1_running[0].workflow_id, "b");
    }
}
