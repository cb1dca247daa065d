//! Geometry parsing endpoints.
//!
//! `POST /geometry/parse?filename=` takes the raw bytes of an uploaded geo file;
//! `POST /geometry/inline` takes GeoJSON. Both answer with the canonical
//! geometry and its metrics without persisting anything.

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query};
use axum::routing::post;
use axum::{Json, Router};
use geo::Geometry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{ApiError, AppState, MAX_UPLOAD_BYTES};
use crate::geometry::geojson::{geometry_to_value, geometry_type_name};
use crate::geometry::{compute_metrics, parse_geometry_file, parse_inline_geometry};
use crate::models::GeometryMetrics;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/geometry/parse", post(parse_file))
        .route("/geometry/inline", post(parse_inline))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

#[derive(Debug, Deserialize)]
pub(super) struct FileQuery {
    pub filename: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ParsedGeometry {
    #[serde(rename = "type")]
    pub geometry_type: &'static str,
    pub geometry: Value,
    pub metrics: GeometryMetrics,
}

impl ParsedGeometry {
    pub(super) fn measure(geometry: &Geometry<f64>) -> Result<Self, ApiError> {
        // ---
        let metrics = compute_metrics(geometry)?;
        Ok(ParsedGeometry {
            geometry_type: geometry_type_name(geometry),
            geometry: geometry_to_value(geometry),
            metrics,
        })
    }
}

async fn parse_file(
    Query(query): Query<FileQuery>,
    body: Bytes,
) -> Result<Json<ParsedGeometry>, ApiError> {
    // ---
    info!("POST /geometry/parse - {} ({} bytes)", query.filename, body.len());
    let geometry = parse_geometry_file(&body, &query.filename)?;
    Ok(Json(ParsedGeometry::measure(&geometry)?))
}

async fn parse_inline(Json(value): Json<Value>) -> Result<Json<ParsedGeometry>, ApiError> {
    // ---
    let geometry = parse_inline_geometry(&value)?;
    Ok(Json(ParsedGeometry::measure(&geometry)?))
}
