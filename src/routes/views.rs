//! Materialized view status and on-demand refresh.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::info;

use super::{ApiError, AppState};
use crate::models::ViewStatus;
use crate::views::RefreshOutcome;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/views", get(list_statuses))
        .route("/views/{name}/refresh", post(refresh))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    view_name: String,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<i64>,
}

async fn list_statuses(State(state): State<AppState>) -> Result<Json<Vec<ViewStatus>>, ApiError> {
    Ok(Json(state.views.view_statuses().await?))
}

async fn refresh(
    Path(view_name): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<RefreshResponse>, ApiError> {
    // ---
    info!("POST /views/{}/refresh", view_name);

    let (outcome, duration_ms) = match state.views.refresh(&view_name).await? {
        RefreshOutcome::Refreshed { duration_ms } => ("refreshed", Some(duration_ms)),
        RefreshOutcome::Coalesced => ("coalesced", None),
        RefreshOutcome::Untracked => ("untracked", None),
    };
    Ok(Json(RefreshResponse {
        view_name,
        outcome,
        duration_ms,
    }))
}
