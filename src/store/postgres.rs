use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use super::{ParcelStore, RiskStore, ViewStore};
use crate::geometry::geojson::{geometry_from_str, geometry_to_value};
use crate::models::{
    ClimateMetricSnapshot, Parcel, ParcelGeometryRecord, PopulationSnapshot, RiskAssessment,
    RiskDrivers, RiskInput, RiskInputUpsert, TrackedView, ViewStatus, DEFAULT_RISK_WEIGHT,
};
use crate::schema;

// ---

/// PostgreSQL/PostGIS store. Geometry crosses the boundary as GeoJSON text.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// DB-facing rows, kept apart from the domain types so column encodings
// (GeoJSON text, metric/band strings, JSONB) stay out of the model.

#[derive(sqlx::FromRow)]
struct ParcelRow {
    id: Uuid,
    geometry: String,
    area_sq_meters: Option<f64>,
    perimeter_meters: Option<f64>,
    population: Option<i64>,
}

impl TryFrom<ParcelRow> for Parcel {
    type Error = anyhow::Error;

    fn try_from(row: ParcelRow) -> Result<Self> {
        // ---
        let geometry = geometry_from_str(&row.geometry)
            .with_context(|| format!("stored geometry of parcel {} is unreadable", row.id))?;
        Ok(Parcel {
            id: row.id,
            geometry,
            area: row.area_sq_meters,
            perimeter: row.perimeter_meters,
            population: row.population,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RiskInputRow {
    parcel_id: Uuid,
    metric: String,
    value: f64,
    weight: f64,
    normalized_score: Option<f64>,
    data_source: Option<String>,
    last_evaluated_at: DateTime<Utc>,
}

impl TryFrom<RiskInputRow> for RiskInput {
    type Error = anyhow::Error;

    fn try_from(row: RiskInputRow) -> Result<Self> {
        Ok(RiskInput {
            parcel_id: row.parcel_id,
            metric: row.metric.parse()?,
            value: row.value,
            weight: row.weight,
            normalized_score: row.normalized_score,
            data_source: row.data_source,
            last_evaluated_at: row.last_evaluated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AssessmentRow {
    id: Uuid,
    parcel_id: Uuid,
    overall_score: f64,
    risk_band: String,
    drivers: Json<RiskDrivers>,
    assessed_at: DateTime<Utc>,
    methodology_version: String,
}

impl TryFrom<AssessmentRow> for RiskAssessment {
    type Error = anyhow::Error;

    fn try_from(row: AssessmentRow) -> Result<Self> {
        Ok(RiskAssessment {
            id: row.id,
            parcel_id: row.parcel_id,
            overall_score: row.overall_score,
            risk_band: row.risk_band.parse()?,
            drivers: row.drivers.0,
            assessed_at: row.assessed_at,
            methodology_version: row.methodology_version,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ViewStatusRow {
    view_name: String,
    last_refreshed_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
    status: String,
    error_message: Option<String>,
}

impl TryFrom<ViewStatusRow> for ViewStatus {
    type Error = anyhow::Error;

    fn try_from(row: ViewStatusRow) -> Result<Self> {
        Ok(ViewStatus {
            view_name: row.view_name,
            last_refreshed_at: row.last_refreshed_at,
            duration_ms: row.duration_ms,
            status: row.status.parse()?,
            error_message: row.error_message,
        })
    }
}

#[async_trait]
impl ParcelStore for PgStore {
    async fn find_parcel(&self, id: Uuid) -> Result<Option<Parcel>> {
        // ---
        let row = sqlx::query_as::<_, ParcelRow>(
            r#"
            SELECT id, ST_AsGeoJSON(geometry) AS geometry,
                   area_sq_meters, perimeter_meters, population
            FROM parcels
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load parcel")?;

        row.map(Parcel::try_from).transpose()
    }

    async fn save_parcel_geometry(
        &self,
        record: &ParcelGeometryRecord,
        population: Option<i64>,
    ) -> Result<bool> {
        // ---
        let geojson = geometry_to_value(&record.geometry).to_string();

        // xmax is zero only for a freshly inserted tuple
        let created = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO parcels (id, geometry, area_sq_meters, perimeter_meters, population)
            VALUES ($1, ST_SetSRID(ST_GeomFromGeoJSON($2), 4326), $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                geometry = EXCLUDED.geometry,
                area_sq_meters = EXCLUDED.area_sq_meters,
                perimeter_meters = EXCLUDED.perimeter_meters,
                population = COALESCE(EXCLUDED.population, parcels.population),
                updated_at = NOW()
            RETURNING (xmax = 0) AS created
            "#,
        )
        .bind(record.parcel_id)
        .bind(geojson)
        .bind(record.area_sq_meters)
        .bind(record.perimeter_meters)
        .bind(population)
        .fetch_one(&self.pool)
        .await
        .context("failed to save parcel geometry")?;

        Ok(created)
    }

    async fn record_population(&self, snapshot: &PopulationSnapshot) -> Result<()> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO parcel_population_stats (
                parcel_id, population, density_per_sq_km, source, collected_at
            ) VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(snapshot.parcel_id)
        .bind(snapshot.population)
        .bind(snapshot.density_per_sq_km)
        .bind(&snapshot.source)
        .bind(snapshot.collected_at)
        .execute(&self.pool)
        .await
        .context("failed to record population snapshot")?;

        Ok(())
    }

    async fn record_climate_metric(&self, snapshot: &ClimateMetricSnapshot) -> Result<()> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO parcel_climate_metrics (
                parcel_id, elevation_meters, slope_degrees, avg_temperature_c,
                rainfall_mm, flood_risk_score, drought_risk_score, sea_level_risk_score,
                data_source, collected_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(snapshot.parcel_id)
        .bind(snapshot.elevation_meters)
        .bind(snapshot.slope_degrees)
        .bind(snapshot.avg_temperature_c)
        .bind(snapshot.rainfall_mm)
        .bind(snapshot.flood_risk_score)
        .bind(snapshot.drought_risk_score)
        .bind(snapshot.sea_level_risk_score)
        .bind(&snapshot.data_source)
        .bind(snapshot.collected_at)
        .execute(&self.pool)
        .await
        .context("failed to record climate metrics")?;

        Ok(())
    }
}

#[async_trait]
impl RiskStore for PgStore {
    async fn upsert_risk_input(&self, upsert: &RiskInputUpsert) -> Result<RiskInput> {
        // ---
        let row = sqlx::query_as::<_, RiskInputRow>(
            r#"
            INSERT INTO parcel_risk_inputs (
                parcel_id, metric, value, weight, normalized_score, data_source, last_evaluated_at
            ) VALUES ($1, $2, $3, COALESCE($4, $8), $5, $6, $7)
            ON CONFLICT (parcel_id, metric) DO UPDATE SET
                value = EXCLUDED.value,
                weight = COALESCE($4, parcel_risk_inputs.weight),
                normalized_score = EXCLUDED.normalized_score,
                data_source = COALESCE($6, parcel_risk_inputs.data_source),
                last_evaluated_at = EXCLUDED.last_evaluated_at
            RETURNING parcel_id, metric, value, weight, normalized_score,
                      data_source, last_evaluated_at
            "#,
        )
        .bind(upsert.parcel_id)
        .bind(upsert.metric.as_str())
        .bind(upsert.value)
        .bind(upsert.weight)
        .bind(upsert.normalized_score)
        .bind(upsert.data_source.as_deref())
        .bind(upsert.evaluated_at)
        .bind(DEFAULT_RISK_WEIGHT)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to upsert risk input {}", upsert.metric))?;

        RiskInput::try_from(row)
    }

    async fn risk_inputs(&self, parcel_id: Uuid) -> Result<Vec<RiskInput>> {
        // ---
        let rows = sqlx::query_as::<_, RiskInputRow>(
            r#"
            SELECT parcel_id, metric, value, weight, normalized_score,
                   data_source, last_evaluated_at
            FROM parcel_risk_inputs
            WHERE parcel_id = $1
            ORDER BY metric
            "#,
        )
        .bind(parcel_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load risk inputs")?;

        rows.into_iter().map(RiskInput::try_from).collect()
    }

    async fn insert_assessment(&self, assessment: &RiskAssessment) -> Result<()> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO parcel_risk_assessments (
                id, parcel_id, overall_score, risk_band, drivers,
                assessed_at, methodology_version
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(assessment.id)
        .bind(assessment.parcel_id)
        .bind(assessment.overall_score)
        .bind(assessment.risk_band.as_str())
        .bind(Json(&assessment.drivers))
        .bind(assessment.assessed_at)
        .bind(&assessment.methodology_version)
        .execute(&self.pool)
        .await
        .context("failed to insert risk assessment")?;

        Ok(())
    }

    async fn assessments(&self, parcel_id: Uuid) -> Result<Vec<RiskAssessment>> {
        // ---
        let rows = sqlx::query_as::<_, AssessmentRow>(
            r#"
            SELECT id, parcel_id, overall_score, risk_band, drivers,
                   assessed_at, methodology_version
            FROM parcel_risk_assessments
            WHERE parcel_id = $1
            ORDER BY assessed_at
            "#,
        )
        .bind(parcel_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load risk assessments")?;

        rows.into_iter().map(RiskAssessment::try_from).collect()
    }
}

#[async_trait]
impl ViewStore for PgStore {
    async fn ensure_views(&self) -> Result<()> {
        // ---
        let failures = schema::ensure_views(&self.pool).await;
        if failures > 0 {
            warn!("{} view bootstrap statements failed", failures);
        }
        Ok(())
    }

    async fn mark_running(&self, view: TrackedView) -> Result<()> {
        // ---
        sqlx::query(
            r#"
            UPDATE materialized_view_refreshes
            SET status = 'running', error_message = NULL
            WHERE view_name = $1
            "#,
        )
        .bind(view.name())
        .execute(&self.pool)
        .await
        .context("failed to mark view running")?;

        Ok(())
    }

    async fn refresh_view(&self, view: TrackedView) -> Result<()> {
        // ---
        // View names come from the fixed tracked list, never from input
        let statement = format!("REFRESH MATERIALIZED VIEW CONCURRENTLY {}", view.name());
        sqlx::query(&statement).execute(&self.pool).await?;
        Ok(())
    }

    async fn mark_refreshed(
        &self,
        view: TrackedView,
        at: DateTime<Utc>,
        duration_ms: i64,
    ) -> Result<()> {
        // ---
        sqlx::query(
            r#"
            UPDATE materialized_view_refreshes
            SET status = 'idle', last_refreshed_at = $2, duration_ms = $3, error_message = NULL
            WHERE view_name = $1
            "#,
        )
        .bind(view.name())
        .bind(at)
        .bind(duration_ms)
        .execute(&self.pool)
        .await
        .context("failed to mark view refreshed")?;

        Ok(())
    }

    async fn mark_failed(&self, view: TrackedView, message: &str) -> Result<()> {
        // ---
        sqlx::query(
            r#"
            UPDATE materialized_view_refreshes
            SET status = 'error', error_message = $2
            WHERE view_name = $1
            "#,
        )
        .bind(view.name())
        .bind(message)
        .execute(&self.pool)
        .await
        .context("failed to mark view failed")?;

        Ok(())
    }

    async fn view_statuses(&self) -> Result<Vec<ViewStatus>> {
        // ---
        let rows = sqlx::query_as::<_, ViewStatusRow>(
            r#"
            SELECT view_name, last_refreshed_at, duration_ms, status, error_message
            FROM materialized_view_refreshes
            ORDER BY view_name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to load view statuses")?;

        rows.into_iter().map(ViewStatus::try_from).collect()
    }
}
