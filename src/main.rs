//! Application entry point for the `parcelflow` backend service.
//!
//! This binary orchestrates the full startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool and creating the schema
//! - Creating the reporting materialized views and their status rows
//! - Starting the ingestion worker pool and the view refresh schedule
//! - Binding the Axum HTTP server and serving until Ctrl-C
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**) – PostgreSQL connection string
//! - `DB_POOL_MAX` (optional) – maximum number of DB connections (default: 5)
//! - `BIND_ADDR` (optional) – listen address (default: `0.0.0.0:8080`)
//! - `ELEVATION_API_URL` (optional) – elevation lookup endpoint
//! - `INGEST_WORKERS`, `INGEST_QUEUE_DEPTH` (optional) – ingestion pool sizing
//! - `VIEW_REFRESH_INTERVAL_SECS` (optional) – scheduled refresh period
//! - `AXUM_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `AXUM_SPAN_EVENTS` (optional) – span event mode for tracing
use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use parcelflow::environment::{ElevationLookup, EnvironmentalSampler, HttpElevationLookup};
use parcelflow::ingest::{IngestionOrchestrator, IngestionPipeline};
use parcelflow::risk::RiskAssessmentEngine;
use parcelflow::store::PgStore;
use parcelflow::views::MaterializedViewScheduler;
use parcelflow::{config, routes, schema, AppState};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    tracing::info!("Attempting to connect to database");

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;

    let store = Arc::new(PgStore::new(pool));

    let views = Arc::new(MaterializedViewScheduler::new(store.clone()));
    views.bootstrap().await?;

    let elevation = match cfg.elevation_api_url.as_deref() {
        Some(url) => {
            let lookup = HttpElevationLookup::new(url, cfg.elevation_timeout)?;
            Some(Arc::new(lookup) as Arc<dyn ElevationLookup>)
        }
        None => {
            tracing::warn!("ELEVATION_API_URL not set; elevation-derived risk metrics are skipped");
            None
        }
    };

    let pipeline = Arc::new(IngestionPipeline::new(
        store.clone(),
        EnvironmentalSampler::new(elevation),
        RiskAssessmentEngine::new(store.clone()),
        views.clone(),
    ));
    let orchestrator = IngestionOrchestrator::start(
        pipeline,
        cfg.ingest_workers as usize,
        cfg.ingest_queue_depth as usize,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let schedule = views.spawn_schedule(cfg.view_refresh_interval, shutdown_rx);

    // Build app from routes gateway (EMBP)
    let app = routes::router(AppState {
        parcels: store,
        ingestion: orchestrator.handle(),
        views,
    });

    tracing::info!("Listening on {}", cfg.bind_addr);

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.bind_addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, draining background work");
    let _ = shutdown_tx.send(true);
    orchestrator.shutdown().await;
    if let Err(e) = schedule.await {
        tracing::error!("View refresh schedule ended abnormally: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    // ---
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `AXUM_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by `RUST_LOG`, falling back to `AXUM_LOG_LEVEL`
///
/// Call once at startup before any logging macros run.
fn init_tracing() {
    // ---
    let span_events = match env::var("AXUM_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("AXUM_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,hyper=info,reqwest=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
