//! Risk assessment: per-metric normalization, idempotent risk inputs and the
//! aggregated assessment time series.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{
    round2, EnvironmentalSample, RiskAssessment, RiskBand, RiskDrivers, RiskInput,
    RiskInputUpsert, RiskMetric,
};
use crate::store::RiskStore;

// ---

/// Methodology tag written on every assessment produced here.
pub const METHODOLOGY_VERSION: &str = "auto-ingest-v1";

/// Map a raw metric value onto the 0-100 risk scale.
///
/// Elevation and slope go through fixed ladders, hazard scores are already
/// normalized, and climate readings carry no score.
pub fn normalize_risk_score(metric: RiskMetric, value: f64) -> Option<f64> {
    // ---
    match metric {
        RiskMetric::Elevation => Some(if value < 50.0 {
            80.0
        } else if value < 200.0 {
            40.0
        } else {
            15.0
        }),
        RiskMetric::Slope => Some(if value > 12.0 {
            60.0
        } else if value > 5.0 {
            30.0
        } else {
            10.0
        }),
        RiskMetric::FloodRisk | RiskMetric::DroughtRisk | RiskMetric::SeaLevel => Some(value),
        RiskMetric::AvgTemperature | RiskMetric::Rainfall => None,
    }
}

/// Aggregate the hazard inputs of one parcel into an assessment.
///
/// Returns `None` when no hazard input is present; missing hazards are left
/// out of the mean rather than counted as zero.
pub fn assess(
    parcel_id: Uuid,
    inputs: &[RiskInput],
    assessed_at: DateTime<Utc>,
) -> Option<RiskAssessment> {
    // ---
    let score_of = |metric: RiskMetric| {
        inputs
            .iter()
            .find(|i| i.metric == metric)
            .map(|i| i.normalized_score.unwrap_or(i.value))
    };
    let value_of = |metric: RiskMetric| inputs.iter().find(|i| i.metric == metric).map(|i| i.value);

    let hazards: Vec<f64> = inputs
        .iter()
        .filter(|i| i.metric.is_hazard())
        .map(|i| i.normalized_score.unwrap_or(i.value))
        .collect();
    if hazards.is_empty() {
        return None;
    }

    let overall = hazards.iter().sum::<f64>() / hazards.len() as f64;

    Some(RiskAssessment {
        id: Uuid::new_v4(),
        parcel_id,
        overall_score: round2(overall),
        risk_band: RiskBand::from_score(overall),
        drivers: RiskDrivers {
            elevation_meters: value_of(RiskMetric::Elevation),
            slope_degrees: value_of(RiskMetric::Slope),
            flood_risk: score_of(RiskMetric::FloodRisk),
            drought_risk: score_of(RiskMetric::DroughtRisk),
            sea_level_risk: score_of(RiskMetric::SeaLevel),
        },
        assessed_at,
        methodology_version: METHODOLOGY_VERSION.to_string(),
    })
}

#[derive(Clone)]
pub struct RiskAssessmentEngine {
    store: Arc<dyn RiskStore>,
}

impl RiskAssessmentEngine {
    pub fn new(store: Arc<dyn RiskStore>) -> Self {
        Self { store }
    }

    /// Create or overwrite the input for `(parcel_id, metric)`.
    ///
    /// `weight` and `data_source` keep their stored values when `None`.
    pub async fn upsert_risk_input(
        &self,
        parcel_id: Uuid,
        metric: RiskMetric,
        value: f64,
        weight: Option<f64>,
        data_source: Option<&str>,
    ) -> Result<RiskInput> {
        // ---
        let upsert = RiskInputUpsert {
            parcel_id,
            metric,
            value,
            weight,
            normalized_score: normalize_risk_score(metric, value),
            data_source: data_source.map(String::from),
            evaluated_at: Utc::now(),
        };
        self.store.upsert_risk_input(&upsert).await
    }

    /// Upsert one risk input per present sample field. Failures are logged per
    /// metric and do not stop the others; returns how many were written.
    pub async fn record_sample(&self, parcel_id: Uuid, sample: &EnvironmentalSample) -> usize {
        // ---
        let mut written = 0;
        for (metric, value) in sample.readings() {
            match self
                .upsert_risk_input(parcel_id, metric, value, None, sample.source.as_deref())
                .await
            {
                Ok(_) => written += 1,
                Err(e) => warn!(%parcel_id, %metric, "Failed to upsert risk input: {:#}", e),
            }
        }
        debug!(%parcel_id, "Upserted {} risk inputs", written);
        written
    }

    /// Aggregate the parcel's current hazard inputs and append an assessment.
    pub async fn compute_overall_assessment(
        &self,
        parcel_id: Uuid,
    ) -> Result<Option<RiskAssessment>> {
        // ---
        let inputs = self.store.risk_inputs(parcel_id).await?;

        let Some(assessment) = assess(parcel_id, &inputs, Utc::now()) else {
            debug!(%parcel_id, "No hazard inputs, skipping assessment");
            return Ok(None);
        };

        self.store.insert_assessment(&assessment).await?;
        info!(
            %parcel_id,
            score = assessment.overall_score,
            band = assessment.risk_band.as_str(),
            "Risk assessment recorded"
        );
        Ok(Some(assessment))
    }
}
