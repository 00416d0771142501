//! Schellar - Main Entry Point
//!
//! Serves the schedule API and runs the scheduler until Ctrl+C or SIGTERM.

use clap::Parser;
use mimalloc::MiMalloc;

use schellar::config::{AppConfig, ConfigValidator};
use schellar::server::create_app;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Command-line arguments. Each overrides the matching configuration value.
#[derive(Parser, Debug)]
#[command(name = "schellar")]
#[command(about = "Cron-driven launcher and monitor for Conductor workflows")]
#[command(version)]
struct Args {
    /// Workflow engine API root, e.g. http://conductor:8080/api.
    #[arg(long, env = "CONDUCTOR_API_URL")]
    conductor_api_url: Option<String>,

    /// Host to bind to.
    #[arg(long, env = "SCHELLAR_HOST")]
    host: Option<String>,

    /// Port to listen on.
    #[arg(short, long, env = "SCHELLAR_PORT")]
    port: Option<u16>,

    /// Log filter, e.g. `info` or `schellar=debug`.
    #[arg(long, env = "SCHELLAR_LOG_LEVEL")]
    log_level: Option<String>,

    /// Config file path.
    #[arg(short, long, env = "SCHELLAR_CONFIG")]
    config: Option<String>,

    /// Seconds between run status checks.
    #[arg(long, env = "CHECK_INTERVAL_SECONDS")]
    check_interval: Option<u64>,
}

impl Args {
    fn apply(self, config: &mut AppConfig) {
        if let Some(url) = self.conductor_api_url {
            config.engine.base_url = url;
        }
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(secs) = self.check_interval {
            config.scheduler.check_interval_secs = secs;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = Args::parse();

    let mut config = AppConfig::load_unchecked(args.config.take().as_deref())?;
    args.apply(&mut config);
    ConfigValidator::validate(&config)
        .map_err(|e| anyhow::anyhow!("Configuration validation failed:\n\n{e}"))?;

    schellar::logging::init(&config.logging)?;
    tracing::info!("Starting schellar v{}", env!("CARGO_PKG_VERSION"));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = create_app(config).await?;

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    let served = axum::serve(listener, app.router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    app.scheduler.shutdown().await;
    served?;
    tracing::info!("Server shut down gracefully");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
}
