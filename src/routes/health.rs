use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub busy: bool,
    pub retained_jobs: usize,
}

/// GET /health: Liveness plus whether a job is currently processing.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        busy: state.orchestrator.is_busy(),
        retained_jobs: state.orchestrator.job_count(),
    })
}
