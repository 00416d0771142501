//! Convergence of the live timers to the persisted enabled schedules.

use std::sync::Arc;

use futures::FutureExt;

use super::cron::CronExpression;
use super::registry::{FireCallback, ScheduleKey, TimerRegistry};
use super::trigger::TriggerHandler;
use crate::database::ScheduleStore;
use crate::error::{Result, SchedulerError};

/// What one reconciliation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Timers started.
    pub registered: Vec<ScheduleKey>,
    /// Timers stopped.
    pub unregistered: Vec<ScheduleKey>,
    /// Enabled schedules skipped because their cron string does not parse.
    pub invalid: Vec<String>,
}

impl ReconcileReport {
    /// Whether the registry was left as it was.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.registered.is_empty() && self.unregistered.is_empty()
    }
}

/// Keeps exactly one timer per enabled schedule and cadence.
#[derive(Clone)]
pub struct Reconciler {
    schedules: Arc<dyn ScheduleStore>,
    registry: Arc<TimerRegistry>,
    trigger: TriggerHandler,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        registry: Arc<TimerRegistry>,
        trigger: TriggerHandler,
    ) -> Self {
        Self {
            schedules,
            registry,
            trigger,
        }
    }

    /// Read the enabled schedules and converge the registry to them.
    ///
    /// Repeated calls with an unchanged enabled set change nothing.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` if the enabled schedules cannot be read; the
    /// registry is left untouched so existing timers keep running.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let enabled = self
            .schedules
            .find_enabled()
            .await
            .map_err(SchedulerError::store)?;

        let mut invalid = Vec::new();
        let mut desired = Vec::with_capacity(enabled.len());
        for schedule in enabled {
            match CronExpression::parse(&schedule.cron_string) {
                Ok(cron) => {
                    let key = ScheduleKey::new(&schedule.id, &schedule.cron_string);
                    desired.push((key, cron));
                }
                Err(e) => {
                    tracing::warn!(
                        schedule_id = %schedule.id,
                        name = %schedule.name,
                        error = %e,
                        "Enabled schedule has an invalid cron string, not scheduling it"
                    );
                    invalid.push(schedule.id);
                }
            }
        }

        let converged = self.registry.converge(desired, |key| {
            fire_callback(self.trigger.clone(), key.schedule_id.clone())
        });

        let report = ReconcileReport {
            registered: converged.registered,
            unregistered: converged.unregistered,
            invalid,
        };
        if report.is_noop() {
            tracing::debug!(timers = self.registry.len(), "Reconcile: no changes");
        } else {
            tracing::info!(
                registered = report.registered.len(),
                unregistered = report.unregistered.len(),
                timers = self.registry.len(),
                "Reconciled timers"
            );
        }
        Ok(report)
    }
}

fn fire_callback(trigger: TriggerHandler, schedule_id: String) -> FireCallback {
    Arc::new(move || {
        let trigger = trigger.clone();
        let schedule_id = schedule_id.clone();
        async move {
            match trigger.fire(&schedule_id).await {
                Ok(outcome) => {
                    tracing::debug!(schedule_id = %schedule_id, ?outcome, "Fire handled");
                }
                Err(e) => {
                    tracing::warn!(schedule_id = %schedule_id, error = %e, "Fire dropped");
                }
            }
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryStore;
    use crate::domain::{Schedule, ScheduleUpdate};
    use crate::engine::MockEngine;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Schedule store whose reads can be made to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryStore,
        broken: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> anyhow::Result<()> {
            if self.broken.load(Ordering::SeqCst) {
                anyhow::bail!("database is locked");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ScheduleStore for FlakyStore {
        async fn find_enabled(&self) -> anyhow::Result<Vec<Schedule>> {
            self.check()?;
            self.inner.find_enabled().await
        }
        async fn find_by_id(&self, id: &str) -> anyhow::Result<Option<Schedule>> {
            self.check()?;
            self.inner.find_by_id(id).await
        }
        async fn find_by_name(&self, name: &str) -> anyhow::Result<Option<Schedule>> {
            self.check()?;
            self.inner.find_by_name(name).await
        }
        async fn list(&self) -> anyhow::Result<Vec<Schedule>> {
            self.check()?;
            self.inner.list().await
        }
        async fn insert(&self, schedule: &Schedule) -> anyhow::Result<String> {
            ScheduleStore::insert(&self.inner, schedule).await
        }
        async fn update(&self, id: &str, update: &ScheduleUpdate) -> anyhow::Result<bool> {
            ScheduleStore::update(&self.inner, id, update).await
        }
        async fn remove(&self, id: &str) -> anyhow::Result<bool> {
            self.inner.remove(id).await
        }
    }

    fn reconciler(store: Arc<FlakyStore>) -> (Reconciler, Arc<TimerRegistry>) {
        let registry = Arc::new(TimerRegistry::new());
        let trigger = TriggerHandler::new(
            store.clone(),
            Arc::new(InMemoryStore::new()),
            Arc::new(MockEngine::new()),
        );
        (Reconciler::new(store, registry.clone(), trigger), registry)
    }

    fn schedule(name: &str, enabled: bool) -> Schedule {
        let mut s = Schedule::new(name, "wf1", "0 0 9 1 1 *");
        s.enabled = enabled;
        s
    }

    #[tokio::test]
    async fn test_only_enabled_schedules_get_timers() {
        let store = Arc::new(FlakyStore::default());
        let on = schedule("on", true);
        let off = schedule("off", false);
        store.insert(&on).await.unwrap();
        store.insert(&off).await.unwrap();
        let (reconciler, registry) = reconciler(store);

        let report = reconciler.reconcile().await.unwrap();
        assert_eq!(report.registered, vec![ScheduleKey::new(&on.id, &on.cron_string)]);
        assert!(registry.keys().iter().all(|k| k.schedule_id != off.id));
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let store = Arc::new(FlakyStore::default());
        store.insert(&schedule("a", true)).await.unwrap();
        store.insert(&schedule("b", true)).await.unwrap();
        let (reconciler, registry) = reconciler(store);

        let first = reconciler.reconcile().await.unwrap();
        assert_eq!(first.registered.len(), 2);
        let second = reconciler.reconcile().await.unwrap();
        assert!(second.is_noop());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_cron_change_swaps_one_timer() {
        let store = Arc::new(FlakyStore::default());
        let s = schedule("a", true);
        store.insert(&s).await.unwrap();
        let (reconciler, registry) = reconciler(store.clone());
        reconciler.reconcile().await.unwrap();

        let update = ScheduleUpdate {
            cron_string: Some("0 0 10 1 1 *".to_string()),
            ..ScheduleUpdate::default()
        };
        store.update(&s.id, &update).await.unwrap();

        let report = reconciler.reconcile().await.unwrap();
        assert_eq!(report.unregistered, vec![ScheduleKey::new(&s.id, "0 0 9 1 1 *")]);
        assert_eq!(report.registered, vec![ScheduleKey::new(&s.id, "0 0 10 1 1 *")]);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_disable_and_delete_stop_timers() {
        let store = Arc::new(FlakyStore::default());
        let a = schedule("a", true);
        let b = schedule("b", true);
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();
        let (reconciler, registry) = reconciler(store.clone());
        reconciler.reconcile().await.unwrap();

        let disable = ScheduleUpdate {
            enabled: Some(false),
            ..ScheduleUpdate::default()
        };
        store.update(&a.id, &disable).await.unwrap();
        store.remove(&b.id).await.unwrap();

        let report = reconciler.reconcile().await.unwrap();
        assert_eq!(report.unregistered.len(), 2);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_leaves_registry() {
        let store = Arc::new(FlakyStore::default());
        store.insert(&schedule("a", true)).await.unwrap();
        let (reconciler, registry) = reconciler(store.clone());
        reconciler.reconcile().await.unwrap();
        let before = registry.keys();

        store.broken.store(true, Ordering::SeqCst);
        let err = reconciler.reconcile().await.unwrap_err();
        assert!(matches!(err, SchedulerError::StoreUnavailable(_)));
        assert_eq!(registry.keys(), before);
    }

    #[tokio::test]
    async fn test_invalid_cron_not_registered() {
        let store = Arc::new(FlakyStore::default());
        let mut bad = schedule("bad", true);
        bad.cron_string = "0 9 * * *".to_string();
        store.insert(&bad).await.unwrap();
        let (reconciler, registry) = reconciler(store);

        let report = reconciler.reconcile().await.unwrap();
        assert_eq!(report.invalid, vec![bad.id]);
        assert!(registry.is_empty());
    }
}
