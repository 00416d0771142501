//! Live cron timers keyed by schedule identity and cadence.
//!
//! Each timer is a tokio task that sleeps until the next cron fire and then
//! spawns its callback as an independent task. Stopping a timer cancels only
//! future fires; a callback that already started runs to completion.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::cron::CronExpression;

/// Callback invoked on every fire of a timer.
pub type FireCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Registry identity of a timer: the schedule and the cadence in force.
///
/// A schedule whose cron string changes maps to a new key, so the old timer
/// is stopped and a new one started rather than rewritten in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScheduleKey {
    pub schedule_id: String,
    pub cron: String,
}

impl ScheduleKey {
    pub fn new(schedule_id: impl Into<String>, cron: impl Into<String>) -> Self {
        Self {
            schedule_id: schedule_id.into(),
            cron: cron.into(),
        }
    }
}

impl fmt::Display for ScheduleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.schedule_id, self.cron)
    }
}

/// Keys added and removed by one [`TimerRegistry::converge`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvergeReport {
    pub registered: Vec<ScheduleKey>,
    pub unregistered: Vec<ScheduleKey>,
}

impl ConvergeReport {
    /// Whether the call changed nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.registered.is_empty() && self.unregistered.is_empty()
    }
}

struct Timer {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owned map of live timers behind a single lock.
pub struct TimerRegistry {
    timers: Mutex<HashMap<ScheduleKey, Timer>>,
    root: CancellationToken,
}

impl fmt::Debug for TimerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerRegistry")
            .field("timers", &self.timers.lock().len())
            .finish_non_exhaustive()
    }
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            timers: Mutex::new(HashMap::new()),
            root: CancellationToken::new(),
        }
    }

    /// Start a timer for `key`. Returns `false` if the key is already live.
    ///
    /// Must be called from within a tokio runtime.
    pub fn register(
        &self,
        key: ScheduleKey,
        cron: CronExpression,
        callback: FireCallback,
    ) -> bool {
        let mut timers = self.timers.lock();
        if timers.contains_key(&key) {
            return false;
        }
        let timer = self.spawn_timer(&key, cron, callback);
        timers.insert(key, timer);
        true
    }

    /// Stop the timer for `key`. Returns `false` if no such timer was live.
    pub fn unregister(&self, key: &ScheduleKey) -> bool {
        let removed = self.timers.lock().remove(key);
        match removed {
            Some(timer) => {
                timer.token.cancel();
                tracing::info!(key = %key, "Timer stopped");
                true
            }
            None => false,
        }
    }

    /// Keys of all live timers.
    pub fn keys(&self) -> HashSet<ScheduleKey> {
        self.timers.lock().keys().cloned().collect()
    }

    /// Number of live timers.
    pub fn len(&self) -> usize {
        self.timers.lock().len()
    }

    /// Whether no timer is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the live key set equal to `desired`.
    ///
    /// The diff and every resulting start/stop happen under one lock
    /// acquisition, so concurrent calls cannot interleave.
    pub fn converge<F>(
        &self,
        desired: Vec<(ScheduleKey, CronExpression)>,
        callback_for: F,
    ) -> ConvergeReport
    where
        F: Fn(&ScheduleKey) -> FireCallback,
    {
        let mut timers = self.timers.lock();
        let wanted: HashSet<&ScheduleKey> = desired.iter().map(|(key, _)| key).collect();

        let stale: Vec<ScheduleKey> = timers
            .keys()
            .filter(|key| !wanted.contains(key))
            .cloned()
            .collect();

        let mut report = ConvergeReport::default();
        for key in stale {
            if let Some(timer) = timers.remove(&key) {
                timer.token.cancel();
                tracing::info!(key = %key, "Timer stopped");
                report.unregistered.push(key);
            }
        }

        for (key, cron) in desired {
            if timers.contains_key(&key) {
                continue;
            }
            let timer = self.spawn_timer(&key, cron, callback_for(&key));
            timers.insert(key.clone(), timer);
            report.registered.push(key);
        }

        report.registered.sort();
        report.unregistered.sort();
        report
    }

    /// Stop every timer and wait for the timer tasks to exit.
    ///
    /// Callbacks already spawned by a timer are not awaited.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let drained: Vec<(ScheduleKey, Timer)> = self.timers.lock().drain().collect();
        for (key, timer) in drained {
            if let Err(e) = timer.handle.await {
                tracing::warn!(key = %key, error = %e, "Timer task ended abnormally");
            }
        }
    }

    fn spawn_timer(
        &self,
        key: &ScheduleKey,
        cron: CronExpression,
        callback: FireCallback,
    ) -> Timer {
        let token = self.root.child_token();
        let handle = tokio::spawn(run_timer(key.clone(), cron, callback, token.clone()));
        tracing::info!(key = %key, "Timer started");
        Timer { token, handle }
    }
}

async fn run_timer(
    key: ScheduleKey,
    cron: CronExpression,
    callback: FireCallback,
    token: CancellationToken,
) {
    let mut cursor = Utc::now();
    loop {
        let Some(next) = cron.next_after(&cursor) else {
            tracing::warn!(key = %key, "Cron expression has no further fire times");
            return;
        };
        let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            () = token.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        tracing::debug!(key = %key, fire_time = %next, "Timer fired");
        tokio::spawn(callback());
        cursor = next.max(Utc::now());
    }
}
