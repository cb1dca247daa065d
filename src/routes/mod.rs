//! HTTP routes gateway (EMBP).
//!
//! Each sibling module exports a subrouter; this gateway merges them and
//! attaches the shared [`AppState`]. Handlers stay thin: they call into the
//! geometry, ingestion and view modules and map domain errors to responses.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use tracing::error;

use crate::error::{EnqueueError, GeometryError};
use crate::ingest::IngestionHandle;
use crate::store::ParcelStore;
use crate::views::MaterializedViewScheduler;

mod geometry;
mod health;
mod parcels;
mod views;

// ---

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub parcels: Arc<dyn ParcelStore>,
    pub ingestion: IngestionHandle,
    pub views: Arc<MaterializedViewScheduler>,
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(geometry::router())
        .merge(parcels::router())
        .merge(views::router())
        .merge(health::router())
        .with_state(state)
}

/// Upload size accepted by the file endpoints.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Error half of every handler result.
#[derive(Debug)]
pub(crate) enum ApiError {
    Geometry(GeometryError),
    Enqueue(EnqueueError),
    Internal(anyhow::Error),
}

impl From<GeometryError> for ApiError {
    fn from(e: GeometryError) -> Self {
        ApiError::Geometry(e)
    }
}

impl From<EnqueueError> for ApiError {
    fn from(e: EnqueueError) -> Self {
        ApiError::Enqueue(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        match self {
            ApiError::Geometry(e) => {
                let status = match e {
                    GeometryError::GeometryInvalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    _ => StatusCode::BAD_REQUEST,
                };
                let body = json!({
                    "error": e.kind(),
                    "message": e.message(),
                    "detail": e.to_string(),
                });
                (status, Json(body)).into_response()
            }
            ApiError::Enqueue(e) => {
                let code = match e {
                    EnqueueError::Saturated => "ingestion_saturated",
                    EnqueueError::ShuttingDown => "shutting_down",
                };
                let body = json!({ "error": code, "message": e.to_string() });
                (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
            }
            ApiError::Internal(e) => {
                error!("Request failed: {:#}", e);
                let body = json!({ "error": "internal", "message": "Internal server error" });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use anyhow::anyhow;
    use serde_json::Value;

    #[tokio::test]
    async fn internal_errors_hide_their_cause() {
        // ---
        let err = anyhow!("password authentication failed for user \"parcelflow\"")
            .context("insert into parcels");
        let resp = ApiError::Internal(err).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "internal");
        assert_eq!(body["message"], "Internal server error");
        let text = String::from_utf8_lossy(&bytes);
        assert!(!text.contains("password"));
        assert!(!text.contains("parcels"));
        assert!(body.get("detail").is_none());
    }
}
