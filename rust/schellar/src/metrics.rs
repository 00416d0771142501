//! Prometheus metrics for the scheduler, served at `GET /metrics`.
//!
//! Metrics live in the process-wide default registry. Recording before
//! [`init_metrics`] has run is a no-op.

use std::sync::OnceLock;
use std::time::Instant;

use anyhow::{Context, Result};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

use crate::domain::WorkflowStatus;

// Trigger metrics
pub static FIRES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new(); // labels: outcome

// Monitor metrics
pub static RUNS_FINISHED: OnceLock<IntCounterVec> = OnceLock::new(); // labels: status
pub static RUN_CHECK_FAILURES: OnceLock<IntCounter> = OnceLock::new();
pub static OUTSTANDING_RUNS: OnceLock<IntGauge> = OnceLock::new();
pub static MONITOR_TICK_DURATION: OnceLock<Histogram> = OnceLock::new();

// Registry metrics
pub static LIVE_TIMERS: OnceLock<IntGauge> = OnceLock::new();

static INIT_RESULT: OnceLock<Result<()>> = OnceLock::new();

/// `outcome` label values of `schellar_fires_total`.
pub mod outcome {
    pub const LAUNCHED: &str = "launched";
    pub const SCHEDULE_MISSING: &str = "schedule_missing";
    pub const DISABLED: &str = "disabled";
    pub const OUTSIDE_WINDOW: &str = "outside_window";
    pub const CONCURRENT_RUN_SKIPPED: &str = "concurrent_run_skipped";
    pub const LAUNCH_FAILED: &str = "launch_failed";
    pub const STORE_ERROR: &str = "store_error";
}

/// Register every metric with the default registry. Safe to call repeatedly.
pub fn init_metrics() -> Result<()> {
    match INIT_RESULT.get_or_init(init_metrics_internal) {
        Ok(()) => Ok(()),
        Err(e) => Err(anyhow::anyhow!("Metrics initialization failed: {e}")),
    }
}

fn init_metrics_internal() -> Result<()> {
    let fires_total = register_int_counter_vec!(
        "schellar_fires_total",
        "Timer fires by outcome",
        &["outcome"]
    )
    .context("Failed to register FIRES_TOTAL metric")?;

    let runs_finished = register_int_counter_vec!(
        "schellar_runs_finished_total",
        "Runs recorded as finished, by terminal status",
        &["status"]
    )
    .context("Failed to register RUNS_FINISHED metric")?;

    let run_check_failures = register_int_counter!(
        "schellar_run_check_failures_total",
        "Run checks that failed and were left for the next tick"
    )
    .context("Failed to register RUN_CHECK_FAILURES metric")?;

    let outstanding_runs = register_int_gauge!(
        "schellar_outstanding_runs",
        "Runs recorded as RUNNING at the last monitor tick"
    )
    .context("Failed to register OUTSTANDING_RUNS metric")?;

    let monitor_tick_duration = register_histogram!(
        "schellar_monitor_tick_duration_seconds",
        "Duration of one monitor pass in seconds"
    )
    .context("Failed to register MONITOR_TICK_DURATION metric")?;

    let live_timers = register_int_gauge!("schellar_live_timers", "Live cron timers")
        .context("Failed to register LIVE_TIMERS metric")?;

    let _ = FIRES_TOTAL.set(fires_total);
    let _ = RUNS_FINISHED.set(runs_finished);
    let _ = RUN_CHECK_FAILURES.set(run_check_failures);
    let _ = OUTSTANDING_RUNS.set(outstanding_runs);
    let _ = MONITOR_TICK_DURATION.set(monitor_tick_duration);
    let _ = LIVE_TIMERS.set(live_timers);

    tracing::debug!("Metrics registered");
    Ok(())
}

/// Count one timer fire.
pub fn record_fire(outcome: &str) {
    if let Some(fires) = FIRES_TOTAL.get() {
        fires.with_label_values(&[outcome]).inc();
    }
}

/// Count one run reaching `status`.
pub fn record_run_finished(status: &WorkflowStatus) {
    if let Some(finished) = RUNS_FINISHED.get() {
        finished.with_label_values(&[status.as_str()]).inc();
    }
}

/// Count one run check that will be retried.
pub fn record_run_check_failure() {
    if let Some(failures) = RUN_CHECK_FAILURES.get() {
        failures.inc();
    }
}

/// Set the live timer gauge.
pub fn set_live_timers(count: usize) {
    if let Some(gauge) = LIVE_TIMERS.get() {
        gauge.set(i64::try_from(count).unwrap_or(i64::MAX));
    }
}

/// Times one monitor pass.
#[derive(Debug)]
pub struct TickTimer {
    start: Instant,
}

impl TickTimer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Record the pass duration and how many runs it found outstanding.
    pub fn complete(self, outstanding: usize) {
        if let Some(duration) = MONITOR_TICK_DURATION.get() {
            duration.observe(self.start.elapsed().as_secs_f64());
        }
        if let Some(gauge) = OUTSTANDING_RUNS.get() {
            gauge.set(i64::try_from(outstanding).unwrap_or(i64::MAX));
        }
    }
}

impl Default for TickTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Render every registered metric in the Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fires(outcome: &str) -> u64 {
        FIRES_TOTAL.get().unwrap().with_label_values(&[outcome]).get()
    }

    #[test]
    fn test_init_is_idempotent() {
        init_metrics().unwrap();
        init_metrics().unwrap();
        assert!(FIRES_TOTAL.get().is_some());
    }

    #[test]
    fn test_record_fire_counts_by_outcome() {
        init_metrics().unwrap();
        let before = fires(outcome::OUTSIDE_WINDOW);
        record_fire(outcome::OUTSIDE_WINDOW);
        record_fire(outcome::OUTSIDE_WINDOW);
        assert!(fires(outcome::OUTSIDE_WINDOW) >= before + 2);
    }

    #[test]
    #[serial_test::serial]
    fn test_text_output() {
        init_metrics().unwrap();
        record_run_finished(&WorkflowStatus::Completed);
        set_live_timers(3);
        TickTimer::new().complete(1);

        let text = get_metrics();
        assert!(text.contains("schellar_runs_finished_total{status=\"COMPLETED\"}"));
        assert!(text.contains("schellar_live_timers 3"));
        assert!(text.contains("schellar_monitor_tick_duration_seconds_count"));
    }
}
