//! Application assembly: stores, engine client, scheduler and router.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::{AppConfig, DatabaseDriver};
use crate::database::create_stores;
use crate::engine::{ConductorClient, WorkflowEngine};
use crate::gateway;
use crate::logging::OpTimer;
use crate::metrics;
use crate::scheduler::Scheduler;
use crate::{log_banner, log_init_step, log_init_warning, log_success, AppState};

/// Schellar version (from Cargo.toml).
const VERSION: &str = env!("CARGO_PKG_VERSION");

const INIT_STEPS: u8 = 4;

/// A started application.
#[derive(Debug)]
pub struct App {
    /// HTTP API, ready to serve.
    pub router: Router,
    /// Running scheduler; call [`Scheduler::shutdown`] once serving stops.
    pub scheduler: Arc<Scheduler>,
}

/// Open the stores, start the scheduler and build the router.
///
/// # Errors
///
/// Fails if the store cannot be opened or read, or if the engine client
/// cannot be built. Nothing else stops startup.
pub async fn create_app(config: AppConfig) -> anyhow::Result<App> {
    let overall_timer = OpTimer::new("server", "create_app");

    log_banner!(
        format!("Schellar v{VERSION}"),
        format!(
            "Engine: {} | Store: {:?}",
            config.engine.base_url, config.database.driver
        )
    );

    // [1/4] Stores
    let step_timer = OpTimer::new("server", "stores");
    let stores = create_stores(&config.database).await;
    step_timer.finish_with_result(stores.as_ref());
    let stores = stores?;
    let store_detail = match config.database.driver {
        DatabaseDriver::Memory => "in-memory".to_string(),
        DatabaseDriver::Sqlite => format!("SQLite at {}", config.database.path.display()),
    };
    log_init_step!(1, INIT_STEPS, "Stores", store_detail);

    // [2/4] Engine client
    let step_timer = OpTimer::new("server", "engine");
    let engine: Arc<dyn WorkflowEngine> = Arc::new(ConductorClient::from_config(&config.engine)?);
    log_init_step!(
        2,
        INIT_STEPS,
        "Engine",
        format!(
            "{} (timeout {}s)",
            config.engine.base_url, config.engine.timeout_secs
        )
    );
    if !config.engine.validate_workflows {
        log_init_warning!("Workflow definitions are not checked when schedules are created");
    }
    step_timer.finish();

    // [3/4] Scheduler
    let step_timer = OpTimer::new("server", "scheduler");
    if let Err(e) = metrics::init_metrics() {
        log_init_warning!("Metrics disabled: {e}");
    }
    let state = AppState::new(config, stores, engine);
    let report = state.scheduler.start().await;
    step_timer.finish_with_result(report.as_ref());
    let report = report?;
    log_init_step!(
        3,
        INIT_STEPS,
        "Scheduler",
        format!(
            "{} timers, runs checked every {}s",
            report.registered.len(),
            state.config.scheduler.check_interval_secs
        )
    );
    if !report.invalid.is_empty() {
        log_init_warning!(
            "{} enabled schedules have invalid cron strings: {}",
            report.invalid.len(),
            report.invalid.join(", ")
        );
    }

    // [4/4] Router
    let step_timer = OpTimer::new("server", "router");
    let scheduler = Arc::clone(&state.scheduler);
    let timeout = Duration::from_secs(state.config.server.timeout_secs);
    let router = gateway::create_router()
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state);
    log_init_step!(4, INIT_STEPS, "Router", "schedule API + health + metrics");
    step_timer.finish();

    let elapsed = overall_timer.finish();
    log_success!("Schellar started in {} ms", elapsed.as_millis());

    Ok(App { router, scheduler })
}
