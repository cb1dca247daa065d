//! Domain error kinds for the synchronous geometry path and the ingestion queue.
//!
//! Parsing and metric errors are surfaced verbatim to the caller that uploaded
//! the geometry, so every variant maps to a stable `kind()` code plus a
//! user-facing `message()`. Pipeline failures that happen off the request path
//! use `anyhow` and are only logged.

use thiserror::Error;

// ---

/// Failure while turning an uploaded file or inline object into a geometry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GeometryError {
    #[error("unsupported geometry file format: {0}")]
    UnsupportedFormat(String),

    #[error("no geometry found: {0}")]
    EmptyGeometry(String),

    #[error("malformed container: {0}")]
    MalformedContainer(String),

    #[error("KMZ archive does not contain a .kml entry")]
    MissingKml,

    #[error("failed to parse geometry: {0}")]
    ParseFailure(String),

    #[error("invalid geometry: {0}")]
    GeometryInvalid(String),
}

impl GeometryError {
    /// Stable machine-readable code, safe to expose to API clients.
    pub fn kind(&self) -> &'static str {
        // ---
        match self {
            GeometryError::UnsupportedFormat(_) => "unsupported_format",
            GeometryError::EmptyGeometry(_) => "empty_geometry",
            GeometryError::MalformedContainer(_) => "malformed_container",
            GeometryError::MissingKml => "missing_kml",
            GeometryError::ParseFailure(_) => "parse_failure",
            GeometryError::GeometryInvalid(_) => "geometry_invalid",
        }
    }

    /// Human-readable message rendered to the uploader.
    pub fn message(&self) -> &'static str {
        // ---
        match self {
            GeometryError::UnsupportedFormat(_) => {
                "Unsupported file format. Please upload a .zip (Shapefile), .shp, .geojson, .json, .kml, or .kmz file."
            }
            GeometryError::EmptyGeometry(_) => "Uploaded file contains no valid geometries.",
            GeometryError::MalformedContainer(_) => "Uploaded archive could not be read.",
            GeometryError::MissingKml => "KMZ archive does not contain a valid .kml file.",
            GeometryError::ParseFailure(_) => "Failed to parse geometry data.",
            GeometryError::GeometryInvalid(_) => "Invalid geometry structure or coordinates.",
        }
    }
}

/// Rejection returned by `IngestionHandle::enqueue_ingestion`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("ingestion queue is full")]
    Saturated,

    #[error("ingestion orchestrator is shutting down")]
    ShuttingDown,
}
