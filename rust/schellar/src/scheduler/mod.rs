//! Cron-driven launching and monitoring of workflow runs.
//!
//! - [`registry`]: live timers, one per enabled schedule and cadence
//! - [`reconcile`]: converges the timers to the persisted schedules
//! - [`trigger`]: decides on each fire whether to launch a run
//! - [`monitor`]: polls outstanding runs until they finish
//!
//! [`Scheduler`] wires these together and owns their background tasks.

pub mod cron;
pub mod monitor;
pub mod reconcile;
pub mod registry;
pub mod trigger;

pub use cron::CronExpression;
pub use monitor::{MonitorReport, RunMonitor};
pub use reconcile::{ReconcileReport, Reconciler};
pub use registry::{ScheduleKey, TimerRegistry};
pub use trigger::{TriggerHandler, TriggerOutcome};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::database::Stores;
use crate::engine::WorkflowEngine;
use crate::error::Result;

/// The scheduling core: timers, trigger handler and run monitor.
pub struct Scheduler {
    registry: Arc<TimerRegistry>,
    trigger: TriggerHandler,
    reconciler: Reconciler,
    monitor: RunMonitor,
    token: CancellationToken,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("registry", &self.registry)
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Build the core. Nothing runs until [`Scheduler::start`].
    pub fn new(
        stores: &Stores,
        engine: Arc<dyn WorkflowEngine>,
        check_interval: Duration,
    ) -> Self {
        let registry = Arc::new(TimerRegistry::new());
        let trigger = TriggerHandler::new(
            Arc::clone(&stores.schedules),
            Arc::clone(&stores.runs),
            Arc::clone(&engine),
        );
        let reconciler = Reconciler::new(
            Arc::clone(&stores.schedules),
            Arc::clone(&registry),
            trigger.clone(),
        );
        let monitor = RunMonitor::new(
            Arc::clone(&stores.schedules),
            Arc::clone(&stores.runs),
            engine,
            check_interval,
        );
        Self {
            registry,
            trigger,
            reconciler,
            monitor,
            token: CancellationToken::new(),
            monitor_task: Mutex::new(None),
        }
    }

    /// Run the initial reconcile and start the monitor loop.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` if the initial reconcile cannot read the store; the
    /// monitor loop is not started in that case.
    pub async fn start(&self) -> Result<ReconcileReport> {
        let report = self.reconciler.reconcile().await?;

        let mut task = self.monitor_task.lock();
        if task.is_none() {
            let monitor = self.monitor.clone();
            let token = self.token.child_token();
            *task = Some(tokio::spawn(async move { monitor.run(token).await }));
        }
        Ok(report)
    }

    /// Converge the timers to the current enabled schedules.
    ///
    /// Call after every schedule mutation.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` if the store cannot be read; timers are unchanged.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.reconciler.reconcile().await
    }

    /// Handle a fire of `schedule_id` immediately, outside its cadence.
    ///
    /// # Errors
    ///
    /// See [`TriggerHandler::fire`].
    pub async fn fire(&self, schedule_id: &str) -> Result<TriggerOutcome> {
        self.trigger.fire(schedule_id).await
    }

    /// Run one monitor pass immediately.
    ///
    /// # Errors
    ///
    /// See [`RunMonitor::tick`].
    pub async fn check_runs(&self) -> Result<MonitorReport> {
        self.monitor.tick().await
    }

    /// Live timer registry.
    pub fn registry(&self) -> &TimerRegistry {
        &self.registry
    }

    /// Stop the monitor loop and every timer.
    ///
    /// Trigger callbacks that already started are not awaited.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let task = self.monitor_task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "Run monitor ended abnormally");
        }
        self.registry.shutdown().await;
        tracing::info!("Scheduler stopped");
    }
}
