//! parcelflow: land-parcel geometry ingestion and risk scoring.
//!
//! Uploaded geo files are normalized into one canonical geometry, measured
//! geodesically and persisted. A bounded background pipeline then derives
//! population density, environmental samples and a composite risk assessment,
//! and keeps the reporting materialized views fresh.
//!
//! Module layout follows the Explicit Module Boundary Pattern (EMBP): each
//! module exposes a narrow surface and `routes` is the only HTTP gateway.

pub mod config;
pub mod environment;
pub mod error;
pub mod geometry;
pub mod ingest;
pub mod models;
pub mod risk;
pub mod routes;
pub mod schema;
pub mod store;
pub mod views;

pub use config::Config;
pub use error::{EnqueueError, GeometryError};
pub use routes::{router, AppState};
