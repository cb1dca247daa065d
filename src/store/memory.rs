use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::{ParcelStore, RiskStore, ViewStore};
use crate::models::{
    ClimateMetricSnapshot, Parcel, ParcelGeometryRecord, PopulationSnapshot, RefreshState,
    RiskAssessment, RiskInput, RiskInputUpsert, RiskMetric, TrackedView, ViewStatus,
    DEFAULT_RISK_WEIGHT,
};

// ---

/// In-process store with the same observable semantics as `PgStore`.
///
/// Besides the store traits it exposes inspection and fault-injection helpers
/// used by tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    refresh_delay: Mutex<Duration>,
}

#[derive(Debug, Default)]
struct MemoryState {
    // ---
    parcels: HashMap<Uuid, Parcel>,
    population: Vec<PopulationSnapshot>,
    climate: Vec<ClimateMetricSnapshot>,
    risk_inputs: BTreeMap<(Uuid, RiskMetric), RiskInput>,
    assessments: Vec<RiskAssessment>,
    statuses: BTreeMap<String, ViewStatus>,
    status_history: Vec<(TrackedView, RefreshState)>,
    refresh_counts: HashMap<TrackedView, usize>,
    failing_views: HashSet<TrackedView>,
    failing_climate_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delete a parcel, as an external parcel write would.
    pub fn remove_parcel(&self, id: Uuid) -> Option<Parcel> {
        self.state.lock().parcels.remove(&id)
    }

    pub fn population_snapshots(&self, parcel_id: Uuid) -> Vec<PopulationSnapshot> {
        // ---
        let state = self.state.lock();
        state
            .population
            .iter()
            .filter(|s| s.parcel_id == parcel_id)
            .cloned()
            .collect()
    }

    pub fn climate_snapshots(&self, parcel_id: Uuid) -> Vec<ClimateMetricSnapshot> {
        // ---
        let state = self.state.lock();
        state
            .climate
            .iter()
            .filter(|s| s.parcel_id == parcel_id)
            .cloned()
            .collect()
    }

    /// Every status written for `view`, in order.
    pub fn status_history(&self, view: TrackedView) -> Vec<RefreshState> {
        // ---
        let state = self.state.lock();
        state
            .status_history
            .iter()
            .filter(|(v, _)| *v == view)
            .map(|(_, s)| *s)
            .collect()
    }

    /// Number of refresh statements that actually ran for `view`.
    pub fn refresh_count(&self, view: TrackedView) -> usize {
        self.state
            .lock()
            .refresh_counts
            .get(&view)
            .copied()
            .unwrap_or(0)
    }

    /// Make refreshes of `view` fail until reset.
    pub fn fail_view(&self, view: TrackedView, failing: bool) {
        // ---
        let mut state = self.state.lock();
        if failing {
            state.failing_views.insert(view);
        } else {
            state.failing_views.remove(&view);
        }
    }

    /// Make climate-metric writes fail until reset.
    pub fn fail_climate_writes(&self, failing: bool) {
        self.state.lock().failing_climate_writes = failing;
    }

    /// Simulated duration of every refresh statement.
    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock() = delay;
    }

    fn update_status<F>(&self, view: TrackedView, apply: F)
    where
        F: FnOnce(&mut ViewStatus),
    {
        // ---
        let mut state = self.state.lock();
        let Some(status) = state.statuses.get_mut(view.name()) else {
            return;
        };
        apply(status);
        let new_state = status.status;
        state.status_history.push((view, new_state));
    }
}

#[async_trait]
impl ParcelStore for MemoryStore {
    async fn find_parcel(&self, id: Uuid) -> anyhow::Result<Option<Parcel>> {
        Ok(self.state.lock().parcels.get(&id).cloned())
    }

    async fn save_parcel_geometry(
        &self,
        record: &ParcelGeometryRecord,
        population: Option<i64>,
    ) -> anyhow::Result<bool> {
        // ---
        let mut state = self.state.lock();
        let previous = state.parcels.get(&record.parcel_id).map(|p| p.population);
        let created = previous.is_none();
        state.parcels.insert(
            record.parcel_id,
            Parcel {
                id: record.parcel_id,
                geometry: record.geometry.clone(),
                area: Some(record.area_sq_meters),
                perimeter: Some(record.perimeter_meters),
                population: population.or(previous.flatten()),
            },
        );
        Ok(created)
    }

    async fn record_population(&self, snapshot: &PopulationSnapshot) -> anyhow::Result<()> {
        // ---
        let mut state = self.state.lock();
        if !state.parcels.contains_key(&snapshot.parcel_id) {
            bail!("parcel {} does not exist", snapshot.parcel_id);
        }
        state.population.push(snapshot.clone());
        Ok(())
    }

    async fn record_climate_metric(&self, snapshot: &ClimateMetricSnapshot) -> anyhow::Result<()> {
        // ---
        let mut state = self.state.lock();
        if state.failing_climate_writes {
            bail!("climate metrics for parcel {} could not be written", snapshot.parcel_id);
        }
        if !state.parcels.contains_key(&snapshot.parcel_id) {
            bail!("parcel {} does not exist", snapshot.parcel_id);
        }
        state.climate.push(snapshot.clone());
        Ok(())
    }
}

#[async_trait]
impl RiskStore for MemoryStore {
    async fn upsert_risk_input(&self, upsert: &RiskInputUpsert) -> anyhow::Result<RiskInput> {
        // ---
        let mut state = self.state.lock();
        let key = (upsert.parcel_id, upsert.metric);
        let existing = state.risk_inputs.get(&key);

        let row = RiskInput {
            parcel_id: upsert.parcel_id,
            metric: upsert.metric,
            value: upsert.value,
            weight: upsert
                .weight
                .or(existing.map(|r| r.weight))
                .unwrap_or(DEFAULT_RISK_WEIGHT),
            normalized_score: upsert.normalized_score,
            data_source: upsert
                .data_source
                .clone()
                .or_else(|| existing.and_then(|r| r.data_source.clone())),
            last_evaluated_at: upsert.evaluated_at,
        };
        state.risk_inputs.insert(key, row.clone());
        Ok(row)
    }

    async fn risk_inputs(&self, parcel_id: Uuid) -> anyhow::Result<Vec<RiskInput>> {
        // ---
        let state = self.state.lock();
        Ok(state
            .risk_inputs
            .values()
            .filter(|r| r.parcel_id == parcel_id)
            .cloned()
            .collect())
    }

    async fn insert_assessment(&self, assessment: &RiskAssessment) -> anyhow::Result<()> {
        self.state.lock().assessments.push(assessment.clone());
        Ok(())
    }

    async fn assessments(&self, parcel_id: Uuid) -> anyhow::Result<Vec<RiskAssessment>> {
        // ---
        let state = self.state.lock();
        Ok(state
            .assessments
            .iter()
            .filter(|a| a.parcel_id == parcel_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ViewStore for MemoryStore {
    async fn ensure_views(&self) -> anyhow::Result<()> {
        // ---
        let mut state = self.state.lock();
        for view in TrackedView::ALL {
            state
                .statuses
                .entry(view.name().to_string())
                .or_insert_with(|| ViewStatus::idle(view.name()));
        }
        Ok(())
    }

    async fn mark_running(&self, view: TrackedView) -> anyhow::Result<()> {
        // ---
        self.update_status(view, |status| {
            status.status = RefreshState::Running;
            status.error_message = None;
        });
        Ok(())
    }

    async fn refresh_view(&self, view: TrackedView) -> anyhow::Result<()> {
        // ---
        let delay = *self.refresh_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        *state.refresh_counts.entry(view).or_insert(0) += 1;
        if state.failing_views.contains(&view) {
            bail!("relation \"{}\" could not be refreshed", view.name());
        }
        Ok(())
    }

    async fn mark_refreshed(
        &self,
        view: TrackedView,
        at: DateTime<Utc>,
        duration_ms: i64,
    ) -> anyhow::Result<()> {
        // ---
        self.update_status(view, |status| {
            status.status = RefreshState::Idle;
            status.last_refreshed_at = Some(at);
            status.duration_ms = Some(duration_ms);
            status.error_message = None;
        });
        Ok(())
    }

    async fn mark_failed(&self, view: TrackedView, message: &str) -> anyhow::Result<()> {
        // ---
        self.update_status(view, |status| {
            status.status = RefreshState::Error;
            status.error_message = Some(message.to_string());
        });
        Ok(())
    }

    async fn view_statuses(&self) -> anyhow::Result<Vec<ViewStatus>> {
        Ok(self.state.lock().statuses.values().cloned().collect())
    }
}
