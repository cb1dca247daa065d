//! Database schema management for `parcelflow`.
//!
//! Ensures required tables, indexes and materialized views exist before
//! serving requests. Applied once on startup from `main.rs` (EMBP: single
//! gateway call for tables, one for views).

use anyhow::Result;
use sqlx::PgPool;
use tracing::{debug, error};

use crate::models::TrackedView;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates the parcel table, the append-only observation tables, the
/// per-(parcel, metric) risk inputs, the assessment time series and the view
/// status table. Safe to call on every startup; no-op if objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query("CREATE EXTENSION IF NOT EXISTS postgis;")
        .execute(&mut *tx)
        .await?;

    // Parcel geometry with the metrics measured at write time
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS parcels (
            id                UUID PRIMARY KEY,
            geometry          GEOMETRY(Geometry, 4326) NOT NULL,
            area_sq_meters    DOUBLE PRECISION,
            perimeter_meters  DOUBLE PRECISION,
            population        BIGINT,
            created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS parcel_population_stats (
            id                 UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            parcel_id          UUID NOT NULL REFERENCES parcels (id) ON DELETE CASCADE,
            population         BIGINT NOT NULL,
            density_per_sq_km  DOUBLE PRECISION,
            source             TEXT NOT NULL,
            collected_at       TIMESTAMPTZ NOT NULL,
            created_at         TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS parcel_climate_metrics (
            id                    UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            parcel_id             UUID NOT NULL REFERENCES parcels (id) ON DELETE CASCADE,
            elevation_meters      DOUBLE PRECISION,
            slope_degrees         DOUBLE PRECISION,
            avg_temperature_c     DOUBLE PRECISION,
            rainfall_mm           DOUBLE PRECISION,
            flood_risk_score      DOUBLE PRECISION,
            drought_risk_score    DOUBLE PRECISION,
            sea_level_risk_score  DOUBLE PRECISION,
            data_source           TEXT NOT NULL,
            collected_at          TIMESTAMPTZ NOT NULL,
            created_at            TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // One row per (parcel, metric); upserts overwrite in place
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS parcel_risk_inputs (
            id                 UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            parcel_id          UUID NOT NULL REFERENCES parcels (id) ON DELETE CASCADE,
            metric             TEXT NOT NULL,
            value              DOUBLE PRECISION NOT NULL,
            weight             DOUBLE PRECISION NOT NULL DEFAULT 1.0,
            normalized_score   DOUBLE PRECISION,
            data_source        TEXT,
            last_evaluated_at  TIMESTAMPTZ NOT NULL,
            UNIQUE (parcel_id, metric)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS parcel_risk_assessments (
            id                   UUID PRIMARY KEY,
            parcel_id            UUID NOT NULL REFERENCES parcels (id) ON DELETE CASCADE,
            overall_score        DOUBLE PRECISION NOT NULL,
            risk_band            TEXT NOT NULL,
            drivers              JSONB NOT NULL,
            assessed_at          TIMESTAMPTZ NOT NULL,
            methodology_version  TEXT NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS materialized_view_refreshes (
            id                 SERIAL PRIMARY KEY,
            view_name          TEXT NOT NULL UNIQUE,
            last_refreshed_at  TIMESTAMPTZ,
            duration_ms        BIGINT,
            status             TEXT NOT NULL DEFAULT 'idle',
            error_message      TEXT
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Indexes for the latest-row lookups in the views
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_parcels_geometry
            ON parcels USING GIST (geometry);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_risk_assessments_parcel_assessed
            ON parcel_risk_assessments (parcel_id, assessed_at DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_population_stats_parcel_collected
            ON parcel_population_stats (parcel_id, collected_at DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_climate_metrics_parcel_collected
            ON parcel_climate_metrics (parcel_id, collected_at DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

// ---

const POPULATION_DENSITY_VIEW_SQL: &str = r#"
CREATE MATERIALIZED VIEW IF NOT EXISTS population_density_grid_mv AS
WITH parcel_extent AS (
    SELECT ST_SetSRID(ST_Extent(p.geometry)::geometry, 4326) AS geom
    FROM parcels p
),
bounds AS (
    SELECT
        ST_XMin(geom) AS minx,
        ST_YMin(geom) AS miny,
        0.02::double precision AS cell_size,
        GREATEST(CEIL((ST_XMax(geom) - ST_XMin(geom)) / 0.02)::int, 1) AS x_steps,
        GREATEST(CEIL((ST_YMax(geom) - ST_YMin(geom)) / 0.02)::int, 1) AS y_steps
    FROM parcel_extent
    WHERE geom IS NOT NULL
),
latest_population AS (
    SELECT DISTINCT ON (parcel_id) parcel_id, population
    FROM parcel_population_stats
    ORDER BY parcel_id, collected_at DESC, created_at DESC
),
grid AS (
    SELECT ST_MakeEnvelope(
               b.minx + gx.step * b.cell_size,
               b.miny + gy.step * b.cell_size,
               b.minx + (gx.step + 1) * b.cell_size,
               b.miny + (gy.step + 1) * b.cell_size,
               4326
           ) AS geom
    FROM bounds b,
    LATERAL generate_series(0, b.x_steps - 1) AS gx(step),
    LATERAL generate_series(0, b.y_steps - 1) AS gy(step)
)
SELECT
    ROW_NUMBER() OVER () AS cell_id,
    g.geom,
    COALESCE(SUM(pps.population), 0) AS total_population,
    CASE
        WHEN ST_Area(g.geom::geography) = 0 THEN 0
        ELSE COALESCE(SUM(pps.population), 0) / (ST_Area(g.geom::geography) / 1000000.0)
    END AS density_per_sq_km,
    NOW() AS computed_at
FROM grid g
LEFT JOIN parcels p ON ST_Intersects(p.geometry, g.geom)
LEFT JOIN latest_population pps ON pps.parcel_id = p.id
GROUP BY g.geom;
"#;

const RISK_SUMMARY_VIEW_SQL: &str = r#"
CREATE MATERIALIZED VIEW IF NOT EXISTS parcel_risk_summary_mv AS
WITH latest_population AS (
    SELECT DISTINCT ON (pps.parcel_id)
        pps.parcel_id, pps.population, pps.density_per_sq_km, pps.collected_at
    FROM parcel_population_stats pps
    ORDER BY pps.parcel_id, pps.collected_at DESC, pps.created_at DESC
),
latest_climate AS (
    SELECT DISTINCT ON (pcm.parcel_id)
        pcm.parcel_id, pcm.avg_temperature_c, pcm.rainfall_mm,
        pcm.elevation_meters, pcm.flood_risk_score, pcm.collected_at
    FROM parcel_climate_metrics pcm
    ORDER BY pcm.parcel_id, pcm.collected_at DESC, pcm.created_at DESC
)
SELECT
    p.id AS parcel_id,
    ra.overall_score,
    ra.risk_band,
    ra.drivers,
    ra.assessed_at,
    COALESCE(lp.population, 0) AS population,
    lp.density_per_sq_km,
    lp.collected_at AS population_collected_at,
    lc.avg_temperature_c,
    lc.rainfall_mm,
    lc.elevation_meters,
    lc.flood_risk_score,
    lc.collected_at AS climate_collected_at
FROM parcels p
LEFT JOIN LATERAL (
    SELECT pra.overall_score, pra.risk_band, pra.drivers, pra.assessed_at
    FROM parcel_risk_assessments pra
    WHERE pra.parcel_id = p.id
    ORDER BY pra.assessed_at DESC
    LIMIT 1
) ra ON true
LEFT JOIN latest_population lp ON lp.parcel_id = p.id
LEFT JOIN latest_climate lc ON lc.parcel_id = p.id;
"#;

/// DDL for one tracked view and the indexes it needs. `REFRESH ... CONCURRENTLY`
/// requires the unique index.
fn view_statements(view: TrackedView) -> [&'static str; 3] {
    // ---
    match view {
        TrackedView::PopulationDensityGrid => [
            POPULATION_DENSITY_VIEW_SQL,
            "CREATE INDEX IF NOT EXISTS population_density_grid_mv_geom_idx \
             ON population_density_grid_mv USING GIST (geom);",
            "CREATE UNIQUE INDEX IF NOT EXISTS population_density_grid_mv_cell_idx \
             ON population_density_grid_mv (cell_id);",
        ],
        TrackedView::ParcelRiskSummary => [
            RISK_SUMMARY_VIEW_SQL,
            "CREATE UNIQUE INDEX IF NOT EXISTS parcel_risk_summary_mv_parcel_idx \
             ON parcel_risk_summary_mv (parcel_id);",
            "CREATE INDEX IF NOT EXISTS parcel_risk_summary_mv_band_idx \
             ON parcel_risk_summary_mv (risk_band);",
        ],
    }
}

/// Create the tracked materialized views and seed one status row per view.
///
/// Each statement runs on its own: a failing view is logged and the rest are
/// still attempted. Returns the number of statements that failed.
pub async fn ensure_views(pool: &PgPool) -> usize {
    // ---
    let mut failures = 0;

    for view in TrackedView::ALL {
        for statement in view_statements(view) {
            if let Err(e) = sqlx::query(statement).execute(pool).await {
                error!("Failed executing schema statement for {}: {}", view, e);
                failures += 1;
            }
        }
    }

    let names: Vec<String> = TrackedView::ALL.iter().map(|v| v.name().to_string()).collect();
    let seeded = sqlx::query(
        r#"
        INSERT INTO materialized_view_refreshes (view_name, status)
        SELECT view_name, 'idle' FROM UNNEST($1::text[]) AS src(view_name)
        ON CONFLICT (view_name) DO NOTHING
        "#,
    )
    .bind(&names)
    .execute(pool)
    .await;

    match seeded {
        Ok(result) => debug!("Seeded {} view status rows", result.rows_affected()),
        Err(e) => {
            error!("Failed seeding view status rows: {}", e);
            failures += 1;
        }
    }

    failures
}
