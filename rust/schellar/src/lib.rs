//! Schellar - cron-driven launcher and monitor for Conductor workflows
//!
//! Schellar keeps one live timer per enabled schedule. Each fire launches
//! the schedule's workflow on the engine, subject to the schedule's
//! activation window and parallel-run policy. A background monitor polls
//! outstanding runs and merges successful output back into the schedule's
//! context, so each run sees what the previous ones produced.
//!
//! # Architecture
//!
//! - [`config`]: layered configuration and startup validation
//! - [`domain`]: schedules, runs and their status vocabularies
//! - [`database`]: schedule and run repositories (memory, `SQLite`)
//! - [`engine`]: workflow engine client
//! - [`scheduler`]: timer registry, reconciliation, trigger and run monitor
//! - [`gateway`]: HTTP API for managing schedules
//! - [`metrics`]: Prometheus counters and gauges
//! - [`server`]: application assembly
//!
//! # Example
//!
//! ```rust,ignore
//! use schellar::{config::AppConfig, server::create_app};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load(None)?;
//!     let app = create_app(config).await?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app.router).await?;
//!     app.scheduler.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod database;
pub mod domain;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod metrics;
pub mod scheduler;
pub mod server;

use std::sync::Arc;
use std::time::Duration;

use config::AppConfig;
use database::Stores;
use engine::WorkflowEngine;
use scheduler::Scheduler;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Schedule and run repositories.
    pub stores: Stores,
    /// Workflow engine client, used for the optional definition check.
    pub engine: Arc<dyn WorkflowEngine>,
    /// Scheduling core; handlers reconcile it after every mutation.
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    /// Assemble the state and a scheduler over the same stores and engine.
    ///
    /// The scheduler is not started.
    pub fn new(config: AppConfig, stores: Stores, engine: Arc<dyn WorkflowEngine>) -> Self {
        let interval = Duration::from_secs(config.scheduler.check_interval_secs);
        let scheduler = Arc::new(Scheduler::new(&stores, Arc::clone(&engine), interval));
        Self {
            config: Arc::new(config),
            stores,
            engine,
            scheduler,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("stores", &self.stores)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
