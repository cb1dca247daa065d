//! Materialized view scheduler.
//!
//! Owns the fixed list of tracked views: bootstraps them, refreshes them on
//! demand and on a timer, and keeps their status rows current. Refreshes of
//! one view are single-flight; see [`MaterializedViewScheduler::refresh`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::models::{TrackedView, ViewStatus};
use crate::store::ViewStore;

// ---

/// What a refresh call ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed { duration_ms: i64 },
    /// A refresh that started after this request completed while it waited.
    Coalesced,
    /// Name outside the tracked list; nothing was touched.
    Untracked,
}

pub struct MaterializedViewScheduler {
    store: Arc<dyn ViewStore>,
    /// Per-view flight lock holding the start time of the last successful refresh.
    flights: HashMap<TrackedView, Arc<Mutex<Option<Instant>>>>,
}

impl MaterializedViewScheduler {
    pub fn new(store: Arc<dyn ViewStore>) -> Self {
        // ---
        let flights = TrackedView::ALL
            .into_iter()
            .map(|view| (view, Arc::new(Mutex::new(None))))
            .collect();
        Self { store, flights }
    }

    /// Create missing views and status rows. Additive only.
    pub async fn bootstrap(&self) -> Result<()> {
        // ---
        self.store.ensure_views().await?;
        info!("Materialized views ready: {:?}", tracked_names());
        Ok(())
    }

    /// Refresh one view by name. Unknown names are a logged no-op.
    pub async fn refresh(&self, view_name: &str) -> Result<RefreshOutcome> {
        // ---
        match TrackedView::from_name(view_name) {
            Some(view) => self.refresh_view(view).await,
            None => {
                warn!("Attempted to refresh untracked materialized view: {}", view_name);
                Ok(RefreshOutcome::Untracked)
            }
        }
    }

    /// Refresh a tracked view.
    ///
    /// Callers for the same view queue on its flight lock. A caller that gets
    /// the lock after a refresh started later than its own request returns
    /// `Coalesced` without running another one. Failures are written to the
    /// status row and returned.
    pub async fn refresh_view(&self, view: TrackedView) -> Result<RefreshOutcome> {
        // ---
        let requested_at = Instant::now();
        let Some(flight) = self.flights.get(&view) else {
            return Ok(RefreshOutcome::Untracked);
        };
        let mut last_started = flight.lock().await;

        if last_started.is_some_and(|started| started > requested_at) {
            debug!("Refresh of {} coalesced with a newer run", view);
            return Ok(RefreshOutcome::Coalesced);
        }

        let started = Instant::now();
        self.store.mark_running(view).await?;

        match self.store.refresh_view(view).await {
            Ok(()) => {
                let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
                self.store.mark_refreshed(view, Utc::now(), duration_ms).await?;
                *last_started = Some(started);
                info!("Refreshed materialized view {} in {} ms", view, duration_ms);
                Ok(RefreshOutcome::Refreshed { duration_ms })
            }
            Err(e) => {
                let message = format!("{:#}", e);
                if let Err(mark) = self.store.mark_failed(view, &message).await {
                    error!("Failed recording refresh error for {}: {:#}", view, mark);
                }
                error!("Failed refreshing materialized view {}: {}", view, message);
                Err(e.context(format!("failed refreshing materialized view {}", view)))
            }
        }
    }

    /// Status rows of the tracked views, ordered by name.
    pub async fn view_statuses(&self) -> Result<Vec<ViewStatus>> {
        // ---
        let mut statuses: Vec<ViewStatus> = self
            .store
            .view_statuses()
            .await?
            .into_iter()
            .filter(|s| TrackedView::from_name(&s.view_name).is_some())
            .collect();
        statuses.sort_by(|a, b| a.view_name.cmp(&b.view_name));
        Ok(statuses)
    }

    /// Refresh every tracked view; one failing view does not stop the rest.
    /// Returns the number of views that failed.
    pub async fn refresh_all(&self) -> usize {
        // ---
        let mut failures = 0;
        for view in TrackedView::ALL {
            // Errors are already logged and recorded on the status row
            if self.refresh_view(view).await.is_err() {
                failures += 1;
            }
        }
        failures
    }

    /// One timer-driven pass over all tracked views.
    pub async fn scheduled_refresh(&self) {
        // ---
        let started = Instant::now();
        let failures = self.refresh_all().await;
        info!(
            "Scheduled view refresh finished in {:?} ({} failed)",
            started.elapsed(),
            failures
        );
    }

    /// Run [`scheduled_refresh`](Self::scheduled_refresh) every `period` until
    /// `shutdown` flips to true or its sender is dropped. The first run happens
    /// one full period after spawning.
    pub fn spawn_schedule(
        self: &Arc<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        // ---
        let me = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => me.scheduled_refresh().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("View refresh schedule stopped");
        })
    }
}

fn tracked_names() -> Vec<&'static str> {
    TrackedView::ALL.iter().map(TrackedView::name).collect()
}
