//! Data model for the parcel ingestion and risk pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use geo::Geometry;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---

/// Parcel row as exposed by the parcel store. The core only reads these fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Parcel {
    // ---
    pub id: Uuid,
    pub geometry: Geometry<f64>,
    /// Stored area in square meters.
    pub area: Option<f64>,
    /// Stored perimeter in meters.
    pub perimeter: Option<f64>,
    pub population: Option<i64>,
}

/// Canonical geometry plus its measured metrics, written at parcel-write time.
#[derive(Debug, Clone, PartialEq)]
pub struct ParcelGeometryRecord {
    // ---
    pub parcel_id: Uuid,
    pub geometry: Geometry<f64>,
    pub area_sq_meters: f64,
    pub perimeter_meters: f64,
}

/// Area and perimeter of a geometry, both in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeometryMetrics {
    // ---
    pub area_sq_meters: f64,
    pub perimeter_meters: f64,
}

/// Environmental attributes derived for one sampling run. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentalSample {
    // ---
    pub elevation_meters: Option<f64>,
    pub slope_degrees: Option<f64>,
    pub avg_temperature_c: Option<f64>,
    pub rainfall_mm: Option<f64>,
    pub flood_risk_score: Option<f64>,
    pub drought_risk_score: Option<f64>,
    pub sea_level_risk_score: Option<f64>,
    pub source: Option<String>,
}

impl EnvironmentalSample {
    /// True when at least one measured field is present (`source` does not count).
    pub fn has_values(&self) -> bool {
        // ---
        !self.readings().is_empty()
    }

    /// Present fields paired with the risk metric they feed.
    pub fn readings(&self) -> Vec<(RiskMetric, f64)> {
        // ---
        [
            (RiskMetric::Elevation, self.elevation_meters),
            (RiskMetric::Slope, self.slope_degrees),
            (RiskMetric::AvgTemperature, self.avg_temperature_c),
            (RiskMetric::Rainfall, self.rainfall_mm),
            (RiskMetric::FloodRisk, self.flood_risk_score),
            (RiskMetric::DroughtRisk, self.drought_risk_score),
            (RiskMetric::SeaLevel, self.sea_level_risk_score),
        ]
        .into_iter()
        .filter_map(|(metric, value)| value.map(|v| (metric, v)))
        .collect()
    }
}

/// Append-only population observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulationSnapshot {
    // ---
    pub parcel_id: Uuid,
    pub population: i64,
    pub density_per_sq_km: Option<f64>,
    pub source: String,
    pub collected_at: DateTime<Utc>,
}

impl PopulationSnapshot {
    /// Build a snapshot, deriving density from the parcel's stored area.
    pub fn for_parcel(parcel: &Parcel, population: i64, collected_at: DateTime<Utc>) -> Self {
        // ---
        let density_per_sq_km = parcel
            .area
            .filter(|area| *area > 0.0)
            .map(|area| round2(population as f64 / (area / 1_000_000.0)));

        PopulationSnapshot {
            parcel_id: parcel.id,
            population,
            density_per_sq_km,
            source: "parcel_form".to_string(),
            collected_at,
        }
    }
}

/// Append-only climate observation persisted from a sampling run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClimateMetricSnapshot {
    // ---
    pub parcel_id: Uuid,
    pub elevation_meters: Option<f64>,
    pub slope_degrees: Option<f64>,
    pub avg_temperature_c: Option<f64>,
    pub rainfall_mm: Option<f64>,
    pub flood_risk_score: Option<f64>,
    pub drought_risk_score: Option<f64>,
    pub sea_level_risk_score: Option<f64>,
    pub data_source: String,
    pub collected_at: DateTime<Utc>,
}

impl ClimateMetricSnapshot {
    pub fn from_sample(
        parcel_id: Uuid,
        sample: &EnvironmentalSample,
        collected_at: DateTime<Utc>,
    ) -> Self {
        // ---
        ClimateMetricSnapshot {
            parcel_id,
            elevation_meters: sample.elevation_meters,
            slope_degrees: sample.slope_degrees,
            avg_temperature_c: sample.avg_temperature_c,
            rainfall_mm: sample.rainfall_mm,
            flood_risk_score: sample.flood_risk_score,
            drought_risk_score: sample.drought_risk_score,
            sea_level_risk_score: sample.sea_level_risk_score,
            data_source: sample
                .source
                .clone()
                .unwrap_or_else(|| "ingestion".to_string()),
            collected_at,
        }
    }
}

/// Metric keys for per-parcel risk inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskMetric {
    Elevation,
    Slope,
    AvgTemperature,
    Rainfall,
    FloodRisk,
    DroughtRisk,
    SeaLevel,
}

impl RiskMetric {
    /// Hazard-class metrics that feed the overall assessment.
    pub const HAZARDS: [RiskMetric; 3] = [
        RiskMetric::FloodRisk,
        RiskMetric::DroughtRisk,
        RiskMetric::SeaLevel,
    ];

    pub fn as_str(&self) -> &'static str {
        // ---
        match self {
            RiskMetric::Elevation => "elevation",
            RiskMetric::Slope => "slope",
            RiskMetric::AvgTemperature => "avg_temperature",
            RiskMetric::Rainfall => "rainfall",
            RiskMetric::FloodRisk => "flood_risk",
            RiskMetric::DroughtRisk => "drought_risk",
            RiskMetric::SeaLevel => "sea_level",
        }
    }

    pub fn is_hazard(&self) -> bool {
        Self::HAZARDS.contains(self)
    }
}

impl fmt::Display for RiskMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskMetric {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        match s {
            "elevation" => Ok(RiskMetric::Elevation),
            "slope" => Ok(RiskMetric::Slope),
            "avg_temperature" => Ok(RiskMetric::AvgTemperature),
            "rainfall" => Ok(RiskMetric::Rainfall),
            "flood_risk" => Ok(RiskMetric::FloodRisk),
            "drought_risk" => Ok(RiskMetric::DroughtRisk),
            "sea_level" => Ok(RiskMetric::SeaLevel),
            other => Err(anyhow::anyhow!("unknown risk metric '{}'", other)),
        }
    }
}

/// Current value of one metric for one parcel. Unique per (parcel, metric).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskInput {
    // ---
    pub parcel_id: Uuid,
    pub metric: RiskMetric,
    pub value: f64,
    pub weight: f64,
    pub normalized_score: Option<f64>,
    pub data_source: Option<String>,
    pub last_evaluated_at: DateTime<Utc>,
}

/// Write request for `RiskStore::upsert_risk_input`.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskInputUpsert {
    // ---
    pub parcel_id: Uuid,
    pub metric: RiskMetric,
    pub value: f64,
    /// `None` keeps the stored weight (or the default on first insert).
    pub weight: Option<f64>,
    pub normalized_score: Option<f64>,
    /// `None` keeps the stored data source.
    pub data_source: Option<String>,
    pub evaluated_at: DateTime<Utc>,
}

/// Default weight of a freshly created risk input.
pub const DEFAULT_RISK_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskBand {
    Low,
    Moderate,
    High,
}

impl RiskBand {
    /// Band thresholds: >= 70 high, >= 40 moderate, otherwise low.
    pub fn from_score(score: f64) -> Self {
        // ---
        if score >= 70.0 {
            RiskBand::High
        } else if score >= 40.0 {
            RiskBand::Moderate
        } else {
            RiskBand::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        // ---
        match self {
            RiskBand::Low => "LOW",
            RiskBand::Moderate => "MODERATE",
            RiskBand::High => "HIGH",
        }
    }
}

impl FromStr for RiskBand {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(RiskBand::Low),
            "MODERATE" => Ok(RiskBand::Moderate),
            "HIGH" => Ok(RiskBand::High),
            other => Err(anyhow::anyhow!("unknown risk band '{}'", other)),
        }
    }
}

/// Inputs that drove an assessment, captured at assessment time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskDrivers {
    // ---
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elevation_meters: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slope_degrees: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flood_risk: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drought_risk: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sea_level_risk: Option<f64>,
}

/// One immutable row of the assessment time series.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    // ---
    pub id: Uuid,
    pub parcel_id: Uuid,
    pub overall_score: f64,
    pub risk_band: RiskBand,
    pub drivers: RiskDrivers,
    pub assessed_at: DateTime<Utc>,
    pub methodology_version: String,
}

/// Refresh lifecycle of a tracked materialized view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshState {
    Idle,
    Running,
    Error,
}

impl RefreshState {
    pub fn as_str(&self) -> &'static str {
        // ---
        match self {
            RefreshState::Idle => "idle",
            RefreshState::Running => "running",
            RefreshState::Error => "error",
        }
    }
}

impl FromStr for RefreshState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(RefreshState::Idle),
            "running" => Ok(RefreshState::Running),
            "error" => Ok(RefreshState::Error),
            other => Err(anyhow::anyhow!("unknown refresh status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewStatus {
    // ---
    pub view_name: String,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub status: RefreshState,
    pub error_message: Option<String>,
}

impl ViewStatus {
    /// Status row as seeded at bootstrap.
    pub fn idle(view_name: &str) -> Self {
        // ---
        ViewStatus {
            view_name: view_name.to_string(),
            last_refreshed_at: None,
            duration_ms: None,
            status: RefreshState::Idle,
            error_message: None,
        }
    }
}

/// The fixed set of materialized views the scheduler owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackedView {
    PopulationDensityGrid,
    ParcelRiskSummary,
}

impl TrackedView {
    pub const ALL: [TrackedView; 2] = [
        TrackedView::PopulationDensityGrid,
        TrackedView::ParcelRiskSummary,
    ];

    pub fn name(&self) -> &'static str {
        // ---
        match self {
            TrackedView::PopulationDensityGrid => "population_density_grid_mv",
            TrackedView::ParcelRiskSummary => "parcel_risk_summary_mv",
        }
    }

    /// `None` for names outside the tracked list.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.name() == name)
    }
}

impl fmt::Display for TrackedView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionReason {
    Create,
    Update,
}

/// Options accompanying one ingestion trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionOptions {
    // ---
    pub reason: IngestionReason,
    #[serde(default)]
    pub provided_population: Option<i64>,
    #[serde(default)]
    pub geometry_changed: bool,
}

impl IngestionOptions {
    /// Environmental sampling runs when geometry changed; always on create.
    pub fn should_sample(&self) -> bool {
        // ---
        self.geometry_changed || self.reason == IngestionReason::Create
    }
}

/// Round half away from zero to two decimals, as stored in the database.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;
    use geo::point;

    fn create_test_parcel(area: Option<f64>) -> Parcel {
        // ---
        Parcel {
            id: Uuid::new_v4(),
            geometry: Geometry::Point(point!(x: 36.8, y: -1.3)),
            area,
            perimeter: None,
            population: None,
        }
    }

    #[test]
    fn test_population_density() {
        // ---
        let at = Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap();
        let parcel = create_test_parcel(Some(2_000_000.0));
        let snapshot = PopulationSnapshot::for_parcel(&parcel, 1_000, at);

        // 1000 people over 2 km² is 500 per km²
        assert_eq!(snapshot.density_per_sq_km, Some(500.0));
        assert_eq!(snapshot.source, "parcel_form");
        assert_eq!(snapshot.parcel_id, parcel.id);
    }

    #[test]
    fn test_population_density_without_area() {
        // ---
        let at = Utc::now();
        assert_eq!(
            PopulationSnapshot::for_parcel(&create_test_parcel(None), 50, at).density_per_sq_km,
            None
        );
        assert_eq!(
            PopulationSnapshot::for_parcel(&create_test_parcel(Some(0.0)), 50, at)
                .density_per_sq_km,
            None
        );
    }

    #[test]
    fn test_risk_band_thresholds() {
        // ---
        assert_eq!(RiskBand::from_score(70.0), RiskBand::High);
        assert_eq!(RiskBand::from_score(69.99), RiskBand::Moderate);
        assert_eq!(RiskBand::from_score(40.0), RiskBand::Moderate);
        assert_eq!(RiskBand::from_score(39.99), RiskBand::Low);
        assert_eq!(RiskBand::from_score(0.0), RiskBand::Low);
    }

    #[test]
    fn test_metric_names_parse_back() {
        // ---
        for metric in [
            RiskMetric::Elevation,
            RiskMetric::Slope,
            RiskMetric::AvgTemperature,
            RiskMetric::Rainfall,
            RiskMetric::FloodRisk,
            RiskMetric::DroughtRisk,
            RiskMetric::SeaLevel,
        ] {
            assert_eq!(metric.as_str().parse::<RiskMetric>().unwrap(), metric);
        }
        assert!("humidity".parse::<RiskMetric>().is_err());
    }

    #[test]
    fn test_sample_readings_skip_absent_fields() {
        // ---
        let sample = EnvironmentalSample {
            slope_degrees: Some(3.5),
            drought_risk_score: Some(40.0),
            source: Some("ingestion".into()),
            ..Default::default()
        };
        assert_eq!(
            sample.readings(),
            vec![(RiskMetric::Slope, 3.5), (RiskMetric::DroughtRisk, 40.0)]
        );
        assert!(sample.has_values());

        let only_source = EnvironmentalSample {
            source: Some("ingestion".into()),
            ..Default::default()
        };
        assert!(!only_source.has_values());
    }

    #[test]
    fn test_should_sample() {
        // ---
        let create = IngestionOptions {
            reason: IngestionReason::Create,
            provided_population: None,
            geometry_changed: false,
        };
        assert!(create.should_sample());

        let update = IngestionOptions {
            reason: IngestionReason::Update,
            provided_population: Some(10),
            geometry_changed: false,
        };
        assert!(!update.should_sample());
        assert!(IngestionOptions {
            geometry_changed: true,
            ..update
        }
        .should_sample());
    }

    #[test]
    fn test_climate_snapshot_defaults_source() {
        // ---
        let sample = EnvironmentalSample {
            rainfall_mm: Some(900.0),
            ..Default::default()
        };
        let snapshot = ClimateMetricSnapshot::from_sample(Uuid::new_v4(), &sample, Utc::now());
        assert_eq!(snapshot.data_source, "ingestion");
        assert_eq!(snapshot.rainfall_mm, Some(900.0));
    }

    #[test]
    fn test_tracked_view_lookup() {
        // ---
        assert_eq!(
            TrackedView::from_name("parcel_risk_summary_mv"),
            Some(TrackedView::ParcelRiskSummary)
        );
        assert_eq!(TrackedView::from_name("unknown_view"), None);
    }
}
