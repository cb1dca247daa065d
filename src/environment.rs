//! Environmental sampling: elevation lookup plus heuristic slope, climate and
//! hazard estimates derived from a parcel geometry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use geo::{BoundingRect, Centroid, Geometry, Point};
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::geometry::metrics::{geodesic_distance, polygonal_area};
use crate::models::{round2, EnvironmentalSample};

// ---

/// Source tag written on every sample produced here.
pub const SAMPLE_SOURCE: &str = "ingestion";

/// Elevation in meters at a WGS84 position. `None` means unknown.
#[async_trait]
pub trait ElevationLookup: Send + Sync {
    async fn elevation(&self, lat: f64, lon: f64) -> Option<f64>;
}

/// Elevation lookup over HTTP GET returning `{"results": [{"elevation": ..}]}`.
///
/// The position is sent as `locations=lat,lon` unless the configured URL
/// already carries a `locations` parameter.
#[derive(Debug, Clone)]
pub struct HttpElevationLookup {
    client: Client,
    endpoint: Url,
}

#[derive(Debug, Deserialize)]
struct ElevationResponse {
    #[serde(default)]
    results: Vec<ElevationResult>,
}

#[derive(Debug, Deserialize)]
struct ElevationResult {
    elevation: Option<f64>,
}

impl HttpElevationLookup {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        // ---
        let endpoint = Url::parse(endpoint)
            .with_context(|| format!("invalid elevation endpoint '{}'", endpoint))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build elevation HTTP client")?;
        Ok(Self { client, endpoint })
    }

    fn request_url(&self, lat: f64, lon: f64) -> Url {
        // ---
        let mut url = self.endpoint.clone();
        if !url.query_pairs().any(|(key, _)| key == "locations") {
            url.query_pairs_mut()
                .append_pair("locations", &format!("{},{}", lat, lon));
        }
        url
    }

    async fn fetch(&self, lat: f64, lon: f64) -> Result<Option<f64>> {
        // ---
        let url = self.request_url(lat, lon);
        debug!("Fetching elevation from: {}", url);

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            bail!("HTTP {}", response.status());
        }
        let body: ElevationResponse = response.json().await?;
        Ok(body.results.first().and_then(|r| r.elevation))
    }
}

#[async_trait]
impl ElevationLookup for HttpElevationLookup {
    async fn elevation(&self, lat: f64, lon: f64) -> Option<f64> {
        // ---
        match self.fetch(lat, lon).await {
            Ok(value) => value.filter(|v| v.is_finite()),
            Err(e) => {
                warn!("Failed to fetch elevation: {}", e);
                None
            }
        }
    }
}

/// Derives an [`EnvironmentalSample`] from a geometry.
#[derive(Clone, Default)]
pub struct EnvironmentalSampler {
    elevation: Option<Arc<dyn ElevationLookup>>,
}

impl EnvironmentalSampler {
    /// `None` disables the elevation lookup; elevation-derived fields are then absent.
    pub fn new(elevation: Option<Arc<dyn ElevationLookup>>) -> Self {
        Self { elevation }
    }

    /// Sample the geometry. Returns `None` when no field could be computed.
    pub async fn sample(&self, geometry: &Geometry<f64>) -> Option<EnvironmentalSample> {
        // ---
        let mut sample = EnvironmentalSample {
            source: Some(SAMPLE_SOURCE.to_string()),
            ..Default::default()
        };

        if let Some(center) = representative_point(geometry) {
            let (lon, lat) = center.x_y();

            if let Some(lookup) = &self.elevation {
                if let Some(elevation) = lookup.elevation(lat, lon).await {
                    sample.elevation_meters = Some(round2(elevation));
                    sample.sea_level_risk_score = Some(estimate_sea_level_risk(elevation));
                    sample.flood_risk_score = Some(estimate_flood_risk(elevation));
                }
            }

            let rainfall = estimate_rainfall(lat);
            sample.avg_temperature_c = Some(estimate_temperature(lat));
            sample.rainfall_mm = Some(rainfall);
            sample.drought_risk_score = Some(estimate_drought_risk(rainfall));
        }

        sample.slope_degrees = estimate_slope(geometry);

        sample.has_values().then_some(sample)
    }
}

/// Centroid, or the bounding-box center for shapes without one.
fn representative_point(geometry: &Geometry<f64>) -> Option<Point<f64>> {
    // ---
    geometry
        .centroid()
        .or_else(|| geometry.bounding_rect().map(|r| Point(r.center())))
        .filter(|p| p.x().is_finite() && p.y().is_finite())
}

/// Area to bounding-box diagonal ratio, scaled and clamped to [0, 30] degrees.
pub fn estimate_slope(geometry: &Geometry<f64>) -> Option<f64> {
    // ---
    let rect = geometry.bounding_rect()?;
    let diagonal_km = geodesic_distance(rect.min(), rect.max()) / 1000.0;
    if !diagonal_km.is_finite() || diagonal_km == 0.0 {
        return None;
    }

    let area_sq_km = polygonal_area(geometry) / 1_000_000.0;
    let slope = (area_sq_km / diagonal_km * 5.0).clamp(0.0, 30.0);
    Some(round2(slope))
}

/// Latitude-based mean temperature, floored at -50 °C.
pub fn estimate_temperature(lat: f64) -> f64 {
    round2((27.0 - lat.abs() * 0.4).max(-50.0))
}

/// Latitude-based annual rainfall, floored at 200 mm.
pub fn estimate_rainfall(lat: f64) -> f64 {
    round2((1200.0 - lat.abs() * 10.0).max(200.0))
}

pub fn estimate_flood_risk(elevation: f64) -> f64 {
    // ---
    match elevation {
        e if e <= 20.0 => 85.0,
        e if e <= 100.0 => 60.0,
        e if e <= 500.0 => 30.0,
        _ => 10.0,
    }
}

pub fn estimate_sea_level_risk(elevation: f64) -> f64 {
    // ---
    match elevation {
        e if e <= 10.0 => 90.0,
        e if e <= 50.0 => 55.0,
        _ => 15.0,
    }
}

pub fn estimate_drought_risk(rainfall: f64) -> f64 {
    // ---
    match rainfall {
        r if r < 400.0 => 70.0,
        r if r < 800.0 => 40.0,
        _ => 15.0,
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use geo::{point, polygon};

    struct FixedElevation(Option<f64>);

    #[async_trait]
    impl ElevationLookup for FixedElevation {
        async fn elevation(&self, _lat: f64, _lon: f64) -> Option<f64> {
            self.0
        }
    }

    fn equatorial_square() -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: 36.80, y: -0.01),
            (x: 36.81, y: -0.01),
            (x: 36.81, y: 0.00),
            (x: 36.80, y: 0.00),
            (x: 36.80, y: -0.01),
        ])
    }

    #[test]
    fn hazard_ladders() {
        // ---
        assert_eq!(estimate_flood_risk(20.0), 85.0);
        assert_eq!(estimate_flood_risk(20.5), 60.0);
        assert_eq!(estimate_flood_risk(500.0), 30.0);
        assert_eq!(estimate_flood_risk(1650.0), 10.0);

        assert_eq!(estimate_sea_level_risk(10.0), 90.0);
        assert_eq!(estimate_sea_level_risk(50.0), 55.0);
        assert_eq!(estimate_sea_level_risk(51.0), 15.0);

        assert_eq!(estimate_drought_risk(399.0), 70.0);
        assert_eq!(estimate_drought_risk(400.0), 40.0);
        assert_eq!(estimate_drought_risk(800.0), 15.0);
    }

    #[test]
    fn latitude_heuristics_are_floored() {
        // ---
        assert_eq!(estimate_temperature(0.0), 27.0);
        assert_eq!(estimate_temperature(-45.0), 9.0);
        assert_eq!(estimate_rainfall(10.0), 1100.0);
        assert_eq!(estimate_rainfall(89.0), 310.0);
        assert_eq!(estimate_rainfall(-100.0), 200.0);
    }

    #[test]
    fn slope_is_absent_for_points_and_clamped() {
        // ---
        assert_eq!(estimate_slope(&Geometry::Point(point!(x: 1.0, y: 1.0))), None);

        let slope = estimate_slope(&equatorial_square()).unwrap();
        assert!((0.0..=30.0).contains(&slope));

        let huge = Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 20.0, y: 0.0),
            (x: 20.0, y: 20.0),
            (x: 0.0, y: 20.0),
            (x: 0.0, y: 0.0),
        ]);
        assert_eq!(estimate_slope(&huge), Some(30.0));
    }

    #[test]
    fn sample_without_elevation_source() {
        // ---
        let sampler = EnvironmentalSampler::new(None);
        let sample = tokio_test::block_on(sampler.sample(&equatorial_square())).unwrap();

        assert_eq!(sample.elevation_meters, None);
        assert_eq!(sample.flood_risk_score, None);
        assert_eq!(sample.sea_level_risk_score, None);
        assert_eq!(sample.drought_risk_score, Some(15.0));
        assert_eq!(sample.source.as_deref(), Some(SAMPLE_SOURCE));
    }

    #[test]
    fn sample_with_low_elevation() {
        // ---
        let sampler = EnvironmentalSampler::new(Some(Arc::new(FixedElevation(Some(8.456)))));
        let sample = tokio_test::block_on(sampler.sample(&equatorial_square())).unwrap();

        assert_eq!(sample.elevation_meters, Some(8.46));
        assert_eq!(sample.flood_risk_score, Some(85.0));
        assert_eq!(sample.sea_level_risk_score, Some(90.0));
    }

    #[test]
    fn request_url_adds_locations_once() {
        // ---
        let lookup =
            HttpElevationLookup::new("https://elevation.example/api", Duration::from_secs(1))
                .unwrap();
        let url = lookup.request_url(-1.5, 36.75);
        assert_eq!(url.query(), Some("locations=-1.5%2C36.75"));

        let fixed = HttpElevationLookup::new(
            "https://elevation.example/api?locations=0,0",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(fixed.request_url(5.0, 5.0).query(), Some("locations=0,0"));
    }

    #[test]
    fn unknown_elevation_keeps_other_fields() {
        // ---
        let sampler = EnvironmentalSampler::new(Some(Arc::new(FixedElevation(None))));
        let sample = tokio_test::block_on(sampler.sample(&equatorial_square())).unwrap();

        assert_eq!(sample.elevation_meters, None);
        assert_eq!(sample.flood_risk_score, None);
        assert_eq!(sample.sea_level_risk_score, None);
        assert!(sample.slope_degrees.is_some());
        assert!(sample.avg_temperature_c.is_some());
        assert_eq!(sample.drought_risk_score, Some(15.0));
    }

    #[tokio::test]
    async fn unreachable_elevation_service_keeps_other_fields() {
        // ---
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let lookup = HttpElevationLookup::new(
            &format!("http://{}/v1/elevation", addr),
            Duration::from_millis(500),
        )
        .unwrap();
        assert_eq!(lookup.elevation(-0.005, 36.805).await, None);

        let sampler = EnvironmentalSampler::new(Some(Arc::new(lookup)));
        let sample = sampler.sample(&equatorial_square()).await.unwrap();
        assert_eq!(sample.elevation_meters, None);
        assert_eq!(sample.rainfall_mm, Some(1199.95));
        assert_eq!(sample.drought_risk_score, Some(15.0));
    }
}
