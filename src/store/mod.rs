//! Persistence seams for the ingestion pipeline.
//!
//! The core talks to these traits only. `PgStore` is the production
//! implementation over PostgreSQL/PostGIS; `MemoryStore` keeps everything
//! in-process for tests and local runs.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    ClimateMetricSnapshot, Parcel, ParcelGeometryRecord, PopulationSnapshot, RiskAssessment,
    RiskInput, RiskInputUpsert, TrackedView, ViewStatus,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ---

/// Parcel rows and their append-only observations.
#[async_trait]
pub trait ParcelStore: Send + Sync {
    async fn find_parcel(&self, id: Uuid) -> anyhow::Result<Option<Parcel>>;

    /// Insert or replace a parcel's geometry and metrics. Returns `true` when
    /// the parcel did not exist before.
    async fn save_parcel_geometry(
        &self,
        record: &ParcelGeometryRecord,
        population: Option<i64>,
    ) -> anyhow::Result<bool>;

    async fn record_population(&self, snapshot: &PopulationSnapshot) -> anyhow::Result<()>;

    async fn record_climate_metric(&self, snapshot: &ClimateMetricSnapshot) -> anyhow::Result<()>;
}

/// Per-(parcel, metric) risk inputs and the assessment time series.
#[async_trait]
pub trait RiskStore: Send + Sync {
    /// Create or overwrite the input for `(parcel_id, metric)` and return the stored row.
    async fn upsert_risk_input(&self, upsert: &RiskInputUpsert) -> anyhow::Result<RiskInput>;

    async fn risk_inputs(&self, parcel_id: Uuid) -> anyhow::Result<Vec<RiskInput>>;

    async fn insert_assessment(&self, assessment: &RiskAssessment) -> anyhow::Result<()>;

    /// Assessments for a parcel, oldest first.
    async fn assessments(&self, parcel_id: Uuid) -> anyhow::Result<Vec<RiskAssessment>>;
}

/// Materialized views and their refresh status rows.
#[async_trait]
pub trait ViewStore: Send + Sync {
    /// Create missing views, indexes and status rows. Never drops anything.
    async fn ensure_views(&self) -> anyhow::Result<()>;

    /// Flag a refresh as in progress and clear any previous error.
    async fn mark_running(&self, view: TrackedView) -> anyhow::Result<()>;

    /// Run the refresh itself without blocking readers.
    async fn refresh_view(&self, view: TrackedView) -> anyhow::Result<()>;

    async fn mark_refreshed(
        &self,
        view: TrackedView,
        at: DateTime<Utc>,
        duration_ms: i64,
    ) -> anyhow::Result<()>;

    async fn mark_failed(&self, view: TrackedView, message: &str) -> anyhow::Result<()>;

    async fn view_statuses(&self) -> anyhow::Result<Vec<ViewStatus>>;
}
