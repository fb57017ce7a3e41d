use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

pub mod error;
pub mod health;
pub mod metrics;
pub mod ocr;

/// Room for multipart framing and the non-file fields on top of the image.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Build the HTTP API. `/metrics` is only mounted when a recorder handle is given.
pub fn router(
    state: AppState,
    max_image_bytes: usize,
    prometheus: Option<Arc<PrometheusHandle>>,
) -> Router {
    let body_limit = max_image_bytes + MULTIPART_OVERHEAD_BYTES;

    let mut app = Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/ocr", post(ocr::submit_job))
        .route("/api/v1/ocr/{job_id}", get(ocr::get_job_status))
        .route("/api/v1/ocr/{job_id}/events", get(ocr::job_events))
        .with_state(state);

    if let Some(handle) = prometheus {
        app = app.route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(handle),
        );
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
}
