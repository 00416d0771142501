//! Prometheus scrape endpoint.

use axum::{extract::State, http::header, response::IntoResponse, routing::get, Router};

use crate::metrics;
use crate::AppState;

/// Create the metrics router.
pub fn router() -> Router<AppState> {
    Router::new().route("/metrics", get(scrape))
}

async fn scrape(State(state): State<AppState>) -> impl IntoResponse {
    metrics::set_live_timers(state.scheduler.registry().len());
    (
        [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
        metrics::get_metrics(),
    )
}
