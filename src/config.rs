//! Configuration loader for the `parcelflow` backend service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). Everything downstream receives an immutable
//! [`Config`] snapshot instead of reading `env::var` itself.
//!
use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Read an optional string environment variable; blank counts as unset.
macro_rules! optional_env {
    ($var_name:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Address the HTTP server binds to.
    pub bind_addr: String,

    /// Elevation lookup endpoint. Elevation-based fields are skipped when unset.
    pub elevation_api_url: Option<String>,

    /// Request timeout for the elevation lookup.
    pub elevation_timeout: Duration,

    /// Concurrent ingestion jobs.
    pub ingest_workers: u32,

    /// Jobs that may wait in the ingestion queue before callers are refused.
    pub ingest_queue_depth: u32,

    /// Period of the scheduled materialized view refresh.
    pub view_refresh_interval: Duration,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
///
/// Optional:
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `BIND_ADDR` – listen address (default: `0.0.0.0:8080`)
/// - `ELEVATION_API_URL` – elevation lookup endpoint (default: unset)
/// - `ELEVATION_TIMEOUT_MS` – elevation request timeout (default: 3000)
/// - `INGEST_WORKERS` – concurrent ingestion jobs (default: 4)
/// - `INGEST_QUEUE_DEPTH` – ingestion queue capacity (default: 256)
/// - `VIEW_REFRESH_INTERVAL_SECS` – scheduled refresh period (default: 3600)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let bind_addr = optional_env!("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string());
    let elevation_api_url = optional_env!("ELEVATION_API_URL");
    let elevation_timeout_ms = parse_env_u32!("ELEVATION_TIMEOUT_MS", 3000);
    let ingest_workers = parse_env_u32!("INGEST_WORKERS", 4);
    let ingest_queue_depth = parse_env_u32!("INGEST_QUEUE_DEPTH", 256);
    let refresh_secs = parse_env_u32!("VIEW_REFRESH_INTERVAL_SECS", 3600);

    if ingest_workers == 0 || ingest_queue_depth == 0 || refresh_secs == 0 {
        return Err(anyhow!(
            "INGEST_WORKERS, INGEST_QUEUE_DEPTH and VIEW_REFRESH_INTERVAL_SECS must be positive"
        ));
    }

    Ok(Config {
        db_url,
        db_pool_max,
        bind_addr,
        elevation_api_url,
        elevation_timeout: Duration::from_millis(u64::from(elevation_timeout_ms)),
        ingest_workers,
        ingest_queue_depth,
        view_refresh_interval: Duration::from_secs(u64::from(refresh_secs)),
    })
}

/// Replace the password of a connection URL with `****`.
fn mask_password(db_url: &str) -> String {
    // ---
    if let Some(at_pos) = db_url.rfind('@') {
        if let Some(colon_pos) = db_url[..at_pos].rfind(':') {
            // `postgres://host@...` has its only colon in the scheme
            if !db_url[colon_pos..].starts_with("://") {
                return format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..]);
            }
        }
    }
    db_url.to_string()
}

impl Config {
    /// Log the loaded configuration, masking the database password.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL               : {}", mask_password(&self.db_url));
        tracing::info!("  DB_POOL_MAX                : {}", self.db_pool_max);
        tracing::info!("  BIND_ADDR                  : {}", self.bind_addr);
        tracing::info!(
            "  ELEVATION_API_URL          : {}",
            self.elevation_api_url.as_deref().unwrap_or("(disabled)")
        );
        tracing::info!("  ELEVATION_TIMEOUT          : {:?}", self.elevation_timeout);
        tracing::info!("  INGEST_WORKERS             : {}", self.ingest_workers);
        tracing::info!("  INGEST_QUEUE_DEPTH         : {}", self.ingest_queue_depth);
        tracing::info!("  VIEW_REFRESH_INTERVAL      : {:?}", self.view_refresh_interval);
    }
}
