//! Log output setup and startup reporting helpers.
//!
//! [`init`] installs the global subscriber from [`LoggingConfig`]. The
//! macros and [`OpTimer`] keep the startup sequence in `server::create_app`
//! readable in both text and JSON output.

use std::time::{Duration, Instant};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

/// Install the global tracing subscriber.
///
/// `RUST_LOG`, when set, takes precedence over `config.level`.
///
/// # Errors
///
/// Fails if the level is not a valid filter or a global subscriber is
/// already installed.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?,
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .flatten_event(true),
            )
            .try_init()?,
    }
    Ok(())
}

/// Times one startup phase and logs its duration when finished.
///
/// ```rust,ignore
/// use schellar::logging::OpTimer;
///
/// let timer = OpTimer::new("server", "stores");
/// let stores = create_stores(&config.database).await;
/// timer.finish_with_result(stores.as_ref());
/// ```
#[derive(Debug)]
pub struct OpTimer {
    component: &'static str,
    operation: &'static str,
    start: Instant,
}

impl OpTimer {
    #[must_use]
    pub fn new(component: &'static str, operation: &'static str) -> Self {
        tracing::debug!(component, operation, "Phase started");
        Self {
            component,
            operation,
            start: Instant::now(),
        }
    }

    /// Time since the timer was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Log completion and return the phase duration.
    pub fn finish(self) -> Duration {
        let elapsed = self.elapsed();
        tracing::debug!(
            component = self.component,
            operation = self.operation,
            duration_ms = millis(elapsed),
            "Phase completed"
        );
        elapsed
    }

    /// Log completion or failure depending on `result`.
    pub fn finish_with_result<T, E: std::fmt::Display>(self, result: Result<&T, &E>) -> Duration {
        let elapsed = self.elapsed();
        let duration_ms = millis(elapsed);
        match result {
            Ok(_) => tracing::debug!(
                component = self.component,
                operation = self.operation,
                duration_ms,
                "Phase completed"
            ),
            Err(e) => tracing::error!(
                component = self.component,
                operation = self.operation,
                duration_ms,
                error = %e,
                "Phase failed"
            ),
        }
        elapsed
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Log one numbered startup step.
///
/// ```rust,ignore
/// log_init_step!(2, 4, "Engine", format!("Conductor at {url}"));
/// ```
#[macro_export]
macro_rules! log_init_step {
    ($step:expr, $total:expr, $name:expr, $detail:expr) => {
        tracing::info!(step = $step, total = $total, "[{}/{}] {}: {}", $step, $total, $name, $detail)
    };
}

/// Log a non-fatal startup problem.
#[macro_export]
macro_rules! log_init_warning {
    ($($arg:tt)+) => {
        tracing::warn!("startup: {}", format!($($arg)+))
    };
}

/// Log the end of a startup phase.
#[macro_export]
macro_rules! log_success {
    ($($arg:tt)+) => {
        tracing::info!("ready: {}", format!($($arg)+))
    };
}

/// Log the service banner.
#[macro_export]
macro_rules! log_banner {
    ($title:expr, $subtitle:expr) => {{
        tracing::info!("------------------------------------------------");
        tracing::info!("  {}", $title);
        tracing::info!("  {}", $subtitle);
        tracing::info!("------------------------------------------------");
    }};
}
