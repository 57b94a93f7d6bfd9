use axum::{
    Router,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use crate::web::{AppState, pages};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(pages::index))
        .route("/config", post(pages::update_config))
        .route("/api/analysis/jobs", post(pages::launch_job))
        .route("/api/analysis/status", get(pages::job_status))
        .route("/results", get(pages::results_page))
        .route("/results/:filename", get(pages::download_result))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}
