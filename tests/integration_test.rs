//! End-to-end tests over HTTP.
//!
//! Each test starts the router on an ephemeral port backed by `MemoryStore`,
//! so no database is needed.

use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use uuid::Uuid;

use parcelflow::environment::EnvironmentalSampler;
use parcelflow::ingest::{IngestionOrchestrator, IngestionPipeline};
use parcelflow::models::{RefreshState, RiskBand, TrackedView};
use parcelflow::risk::RiskAssessmentEngine;
use parcelflow::store::{MemoryStore, RiskStore};
use parcelflow::views::MaterializedViewScheduler;
use parcelflow::{router, AppState};

struct TestApp {
    base: String,
    client: Client,
    store: Arc<MemoryStore>,
}

async fn spawn_app() -> Result<TestApp> {
    // ---
    let store = Arc::new(MemoryStore::new());
    let views = Arc::new(MaterializedViewScheduler::new(store.clone()));
    views.bootstrap().await?;

    let pipeline = Arc::new(IngestionPipeline::new(
        store.clone(),
        EnvironmentalSampler::new(None),
        RiskAssessmentEngine::new(store.clone()),
        views.clone(),
    ));
    let orchestrator = IngestionOrchestrator::start(pipeline, 2, 16);

    let app = router(AppState {
        parcels: store.clone(),
        ingestion: orchestrator.handle(),
        views,
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _orchestrator = orchestrator;
        let _ = axum::serve(listener, app).await;
    });

    Ok(TestApp {
        base: format!("http://{}", addr),
        client: Client::new(),
        store,
    })
}

fn placemark(name: &str, lon: f64, lat: f64) -> String {
    // ---
    let d = 0.01;
    format!(
        "<Placemark><name>{name}</name><Polygon><outerBoundaryIs><LinearRing><coordinates>\
         {lon},{lat},0 {e},{lat},0 {e},{n},0 {lon},{n},0 {lon},{lat},0\
         </coordinates></LinearRing></outerBoundaryIs></Polygon></Placemark>",
        e = lon + d,
        n = lat + d,
    )
}

fn kmz(kml: &str) -> Result<Vec<u8>> {
    // ---
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer.start_file("doc.kml", zip::write::SimpleFileOptions::default())?;
    writer.write_all(kml.as_bytes())?;
    Ok(writer.finish()?.into_inner())
}

#[tokio::test]
async fn kmz_with_two_placemarks_parses_to_multipolygon() -> Result<()> {
    // ---
    let app = spawn_app().await?;
    let kml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2"><Document>{}{}</Document></kml>"#,
        placemark("north", 36.80, -1.30),
        placemark("south", 36.90, -1.40),
    );

    let resp = app
        .client
        .post(format!("{}/geometry/parse?filename=parcels.kmz", app.base))
        .body(kmz(&kml)?)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = resp.json().await?;
    assert_eq!(body["type"], "MultiPolygon");
    assert_eq!(body["geometry"]["type"], "MultiPolygon");
    let members = body["geometry"]["coordinates"].as_array().map(Vec::len);
    assert_eq!(members, Some(2));
    assert!(body["metrics"]["areaSqMeters"].as_f64().unwrap_or(0.0) > 2_000_000.0);
    Ok(())
}

#[tokio::test]
async fn unsupported_extension_is_a_bad_request() -> Result<()> {
    // ---
    let app = spawn_app().await?;
    let resp = app
        .client
        .post(format!("{}/geometry/parse?filename=notes.txt", app.base))
        .body("hello")
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: Value = resp.json().await?;
    assert_eq!(body["error"], "unsupported_format");
    Ok(())
}

#[tokio::test]
async fn self_intersecting_polygon_is_unprocessable() -> Result<()> {
    // ---
    let app = spawn_app().await?;
    let bowtie = json!({
        "type": "Polygon",
        "coordinates": [[[0.0, 0.0], [1.0, 1.0], [1.0, 0.0], [0.0, 1.0], [0.0, 0.0]]]
    });
    let resp = app
        .client
        .post(format!("{}/geometry/inline", app.base))
        .json(&bowtie)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body: Value = resp.json().await?;
    assert_eq!(body["error"], "geometry_invalid");
    Ok(())
}

#[tokio::test]
async fn manual_refresh_marks_view_idle_with_duration() -> Result<()> {
    // ---
    let app = spawn_app().await?;
    let resp = app
        .client
        .post(format!("{}/views/parcel_risk_summary_mv/refresh", app.base))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await?;
    assert_eq!(body["outcome"], "refreshed");

    let statuses: Value = app
        .client
        .get(format!("{}/views", app.base))
        .send()
        .await?
        .json()
        .await?;
    let summary = statuses
        .as_array()
        .and_then(|rows| {
            rows.iter()
                .find(|row| row["viewName"] == "parcel_risk_summary_mv")
        })
        .cloned()
        .unwrap_or(Value::Null);
    assert_eq!(summary["status"], "idle");
    assert!(summary["durationMs"].as_i64().unwrap_or(-1) >= 0);
    assert!(summary["lastRefreshedAt"].is_string());

    assert_eq!(
        app.store.status_history(TrackedView::ParcelRiskSummary),
        vec![RefreshState::Running, RefreshState::Idle]
    );
    Ok(())
}

#[tokio::test]
async fn refreshing_an_untracked_view_changes_nothing() -> Result<()> {
    // ---
    let app = spawn_app().await?;
    let resp = app
        .client
        .post(format!("{}/views/unknown_view/refresh", app.base))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await?;
    assert_eq!(body["outcome"], "untracked");

    let statuses: Vec<Value> = app
        .client
        .get(format!("{}/views", app.base))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(statuses.len(), 2);
    assert!(statuses.iter().all(|row| row["status"] == "idle"));
    assert!(statuses.iter().all(|row| row["lastRefreshedAt"].is_null()));
    Ok(())
}

#[tokio::test]
async fn geometry_upload_triggers_background_ingestion() -> Result<()> {
    // ---
    let app = spawn_app().await?;
    let parcel_id = Uuid::new_v4();
    let square = json!({
        "type": "Feature",
        "properties": {},
        "geometry": {
            "type": "Polygon",
            "coordinates": [[
                [36.80, -0.01], [36.81, -0.01], [36.81, 0.0], [36.80, 0.0], [36.80, -0.01]
            ]]
        }
    });

    let resp = app
        .client
        .put(format!(
            "{}/parcels/{}/geometry?filename=site.geojson&population=618",
            app.base, parcel_id
        ))
        .body(square.to_string())
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = resp.json().await?;
    assert_eq!(body["created"], true);
    assert_eq!(body["ingestion"], "queued");

    // Ingestion runs in the background; poll until the assessment lands.
    let mut assessments = Vec::new();
    for _ in 0..100 {
        assessments = app.store.assessments(parcel_id).await?;
        if !assessments.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(assessments.len(), 1);
    assert_eq!(assessments[0].overall_score, 15.0);
    assert_eq!(assessments[0].risk_band, RiskBand::Low);

    let population = app.store.population_snapshots(parcel_id);
    assert_eq!(population.len(), 1);
    let density = population[0].density_per_sq_km.unwrap_or(0.0);
    assert!((480.0..520.0).contains(&density), "density {}", density);
    assert_eq!(app.store.climate_snapshots(parcel_id).len(), 1);

    // A second upload of the same parcel is an update.
    let resp = app
        .client
        .put(format!(
            "{}/parcels/{}/geometry?filename=site.json",
            app.base, parcel_id
        ))
        .body(square.to_string())
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn manual_ingestion_for_missing_parcel_is_accepted() -> Result<()> {
    // ---
    let app = spawn_app().await?;
    let parcel_id = Uuid::new_v4();
    let resp = app
        .client
        .post(format!("{}/parcels/{}/ingest", app.base, parcel_id))
        .json(&json!({ "reason": "update" }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(app.store.assessments(parcel_id).await?.is_empty());
    assert_eq!(app.store.refresh_count(TrackedView::ParcelRiskSummary), 0);
    Ok(())
}

#[tokio::test]
async fn health_reports_tracked_views() -> Result<()> {
    // ---
    let app = spawn_app().await?;
    let body: Value = app
        .client
        .get(format!("{}/health", app.base))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["trackedViews"], 2);
    Ok(())
}
