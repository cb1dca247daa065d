//! Parcel write endpoints.
//!
//! A geometry write parses and measures the upload synchronously, persists it,
//! and then queues background ingestion. Ingestion failures never fail the
//! write; queue saturation is reported in the response.

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::geometry::ParsedGeometry;
use super::{ApiError, AppState, MAX_UPLOAD_BYTES};
use crate::error::EnqueueError;
use crate::geometry::parse_geometry_file;
use crate::models::{IngestionOptions, IngestionReason, ParcelGeometryRecord};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/parcels/{id}/geometry", put(put_geometry))
        .route("/parcels/{id}/ingest", post(trigger_ingestion))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

#[derive(Debug, Deserialize)]
struct GeometryUploadQuery {
    filename: String,
    population: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeometryWriteResponse {
    parcel_id: Uuid,
    created: bool,
    #[serde(flatten)]
    parsed: ParsedGeometry,
    /// `queued`, or the enqueue error code when the job was refused.
    ingestion: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestionAccepted {
    parcel_id: Uuid,
    status: &'static str,
}

async fn put_geometry(
    Path(parcel_id): Path<Uuid>,
    Query(query): Query<GeometryUploadQuery>,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<GeometryWriteResponse>), ApiError> {
    // ---
    info!(%parcel_id, "PUT /parcels/{{id}}/geometry - {}", query.filename);

    let geometry = parse_geometry_file(&body, &query.filename)?;
    let parsed = ParsedGeometry::measure(&geometry)?;

    let record = ParcelGeometryRecord {
        parcel_id,
        geometry,
        area_sq_meters: parsed.metrics.area_sq_meters,
        perimeter_meters: parsed.metrics.perimeter_meters,
    };
    let created = state
        .parcels
        .save_parcel_geometry(&record, query.population)
        .await?;

    let options = IngestionOptions {
        reason: if created {
            IngestionReason::Create
        } else {
            IngestionReason::Update
        },
        provided_population: query.population,
        geometry_changed: true,
    };
    let ingestion = match state.ingestion.enqueue_ingestion(parcel_id, options) {
        Ok(()) => "queued",
        Err(e) => {
            warn!(%parcel_id, "Ingestion not queued: {}", e);
            match e {
                EnqueueError::Saturated => "saturated",
                EnqueueError::ShuttingDown => "shutting_down",
            }
        }
    };

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(GeometryWriteResponse {
            parcel_id,
            created,
            parsed,
            ingestion,
        }),
    ))
}

async fn trigger_ingestion(
    Path(parcel_id): Path<Uuid>,
    State(state): State<AppState>,
    Json(options): Json<IngestionOptions>,
) -> Result<(StatusCode, Json<IngestionAccepted>), ApiError> {
    // ---
    state.ingestion.enqueue_ingestion(parcel_id, options)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(IngestionAccepted {
            parcel_id,
            status: "queued",
        }),
    ))
}
