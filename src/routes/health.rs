// src/routes/health.rs
//! API health check endpoint for the parcelflow backend.
//!
//! This module defines the `/health` route used by container orchestrators
//! and CI pipelines to verify that the service is up. It follows the Explicit
//! Module Boundary Pattern (EMBP): the handler stays private and the gateway
//! (`mod.rs`) merges the exported subrouter.

use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use super::AppState;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    tracked_views: usize,
}

/// Handle `GET /health`.
///
/// Reports liveness and how many view status rows are readable. A failing
/// status read degrades the answer instead of failing the check.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    // ---
    match state.views.view_statuses().await {
        Ok(statuses) => Json(HealthResponse {
            status: "ok",
            tracked_views: statuses.len(),
        }),
        Err(e) => {
            tracing::warn!("Health check could not read view statuses: {:#}", e);
            Json(HealthResponse {
                status: "degraded",
                tracked_views: 0,
            })
        }
    }
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
