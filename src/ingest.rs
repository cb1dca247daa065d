//! Background ingestion after a parcel write.
//!
//! `IngestionHandle::enqueue_ingestion` pushes a job onto a bounded queue and
//! returns at once. A dispatcher task hands jobs to at most `workers`
//! concurrent tasks; jobs for the same parcel run one at a time behind a
//! per-parcel lock. Every stage failure is logged with the parcel id and never
//! reaches the caller.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, OwnedMutexGuard, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::environment::EnvironmentalSampler;
use crate::error::EnqueueError;
use crate::models::{ClimateMetricSnapshot, IngestionOptions, Parcel, PopulationSnapshot};
use crate::risk::RiskAssessmentEngine;
use crate::store::ParcelStore;
use crate::views::MaterializedViewScheduler;

// ---

/// Async mutex per parcel id. Entries are pruned once nobody holds or waits on them.
#[derive(Default)]
pub struct ParcelLocks {
    inflight: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl ParcelLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, parcel_id: Uuid) -> OwnedMutexGuard<()> {
        // ---
        let lock = {
            let mut inflight = self.inflight.lock();
            Arc::clone(inflight.entry(parcel_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop the guard and forget the lock if it is now unused.
    pub fn release(&self, parcel_id: Uuid, guard: OwnedMutexGuard<()>) {
        // ---
        drop(guard);
        let mut inflight = self.inflight.lock();
        if inflight
            .get(&parcel_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            inflight.remove(&parcel_id);
        }
    }

    pub fn len(&self) -> usize {
        self.inflight.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The work done for one ingestion trigger.
pub struct IngestionPipeline {
    parcels: Arc<dyn ParcelStore>,
    sampler: EnvironmentalSampler,
    risk: RiskAssessmentEngine,
    views: Arc<MaterializedViewScheduler>,
    locks: ParcelLocks,
}

impl IngestionPipeline {
    pub fn new(
        parcels: Arc<dyn ParcelStore>,
        sampler: EnvironmentalSampler,
        risk: RiskAssessmentEngine,
        views: Arc<MaterializedViewScheduler>,
    ) -> Self {
        // ---
        Self {
            parcels,
            sampler,
            risk,
            views,
            locks: ParcelLocks::new(),
        }
    }

    /// Run every stage for one trigger. Never fails; problems are logged.
    pub async fn process(&self, parcel_id: Uuid, options: IngestionOptions) {
        self.run(parcel_id, options, None).await
    }

    /// Take the parcel lock, then a worker slot if `workers` is given, then run
    /// the stages. Jobs queued behind a busy parcel hold no slot while they wait.
    #[instrument(
        name = "ingestion",
        skip(self, options, workers),
        fields(reason = ?options.reason)
    )]
    async fn run(
        &self,
        parcel_id: Uuid,
        options: IngestionOptions,
        workers: Option<&Semaphore>,
    ) {
        // ---
        let guard = self.locks.acquire(parcel_id).await;
        let _slot = match workers {
            Some(workers) => match workers.acquire().await {
                Ok(permit) => Some(permit),
                Err(_) => {
                    warn!("Worker pool closed, dropping ingestion job");
                    self.locks.release(parcel_id, guard);
                    return;
                }
            },
            None => None,
        };

        let found = self.process_parcel(parcel_id, options).await;
        self.locks.release(parcel_id, guard);

        if !found {
            return;
        }

        let failed = self.views.refresh_all().await;
        if failed > 0 {
            error!(stage = "view_refresh", "{} materialized views failed to refresh", failed);
        }
        debug!("Ingestion complete");
    }

    /// Parcel-scoped stages, run under the parcel lock. Returns false when the
    /// parcel no longer exists.
    async fn process_parcel(&self, parcel_id: Uuid, options: IngestionOptions) -> bool {
        // ---
        let parcel = match self.parcels.find_parcel(parcel_id).await {
            Ok(Some(parcel)) => parcel,
            Ok(None) => {
                warn!("Parcel not found for ingestion");
                return false;
            }
            Err(e) => {
                error!(stage = "load", "Failed to load parcel: {:#}", e);
                return false;
            }
        };

        if let Some(population) = options.provided_population {
            let snapshot = PopulationSnapshot::for_parcel(&parcel, population, Utc::now());
            if let Err(e) = self.parcels.record_population(&snapshot).await {
                error!(stage = "population", "Failed to record population: {:#}", e);
            }
        }

        if options.should_sample() {
            self.capture_environment(&parcel).await;
        }
        true
    }

    async fn capture_environment(&self, parcel: &Parcel) {
        // ---
        let Some(sample) = self.sampler.sample(&parcel.geometry).await else {
            debug!("No environmental sample available");
            return;
        };

        let snapshot = ClimateMetricSnapshot::from_sample(parcel.id, &sample, Utc::now());
        if let Err(e) = self.parcels.record_climate_metric(&snapshot).await {
            error!(stage = "climate", "Failed to record climate metrics: {:#}", e);
        }

        self.risk.record_sample(parcel.id, &sample).await;

        if let Err(e) = self.risk.compute_overall_assessment(parcel.id).await {
            error!(stage = "assessment", "Failed to compute risk assessment: {:#}", e);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct IngestionJob {
    parcel_id: Uuid,
    options: IngestionOptions,
}

/// Cheap, cloneable submit side of the orchestrator.
#[derive(Debug, Clone)]
pub struct IngestionHandle {
    tx: mpsc::Sender<IngestionJob>,
}

impl IngestionHandle {
    /// Queue a job and return immediately.
    pub fn enqueue_ingestion(
        &self,
        parcel_id: Uuid,
        options: IngestionOptions,
    ) -> Result<(), EnqueueError> {
        // ---
        match self.tx.try_send(IngestionJob { parcel_id, options }) {
            Ok(()) => {
                debug!(%parcel_id, reason = ?options.reason, "Ingestion queued");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!(%parcel_id, "Ingestion queue is full");
                Err(EnqueueError::Saturated)
            }
            Err(TrySendError::Closed(_)) => Err(EnqueueError::ShuttingDown),
        }
    }
}

/// Bounded worker pool driving [`IngestionPipeline`].
///
/// At most `workers` jobs run at once. The dispatcher admits at most
/// `workers + queue_depth` jobs into tasks; beyond that it stops draining the
/// channel, so the channel fills and callers see `Saturated`.
pub struct IngestionOrchestrator {
    handle: IngestionHandle,
    shutdown: oneshot::Sender<()>,
    dispatcher: JoinHandle<()>,
}

impl IngestionOrchestrator {
    pub fn start(pipeline: Arc<IngestionPipeline>, workers: usize, queue_depth: usize) -> Self {
        // ---
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let (shutdown, shutdown_rx) = oneshot::channel();
        let workers = workers.max(1);
        let pool = WorkerPool {
            workers: Arc::new(Semaphore::new(workers)),
            admission: Arc::new(Semaphore::new(workers + queue_depth.max(1))),
        };

        let dispatcher = tokio::spawn(dispatch(pipeline, rx, pool, shutdown_rx));
        info!(workers, queue_depth, "Ingestion orchestrator started");

        Self {
            handle: IngestionHandle { tx },
            shutdown,
            dispatcher,
        }
    }

    pub fn handle(&self) -> IngestionHandle {
        self.handle.clone()
    }

    /// Stop accepting jobs, finish the queued ones and wait for all workers.
    pub async fn shutdown(self) {
        // ---
        let _ = self.shutdown.send(());
        if let Err(e) = self.dispatcher.await {
            error!("Ingestion dispatcher ended abnormally: {}", e);
        }
        info!("Ingestion orchestrator stopped");
    }
}

/// Running slots and admitted (running or parcel-blocked) jobs.
struct WorkerPool {
    workers: Arc<Semaphore>,
    admission: Arc<Semaphore>,
}

async fn dispatch(
    pipeline: Arc<IngestionPipeline>,
    mut rx: mpsc::Receiver<IngestionJob>,
    pool: WorkerPool,
    mut shutdown: oneshot::Receiver<()>,
) {
    // ---
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                rx.close();
                break;
            }
            Some(result) = tasks.join_next(), if !tasks.is_empty() => log_join(result),
            job = rx.recv() => match job {
                Some(job) => {
                    if !spawn_job(&mut tasks, &pipeline, &pool, job).await {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    // Drain what was accepted before the queue closed
    while let Some(job) = rx.recv().await {
        if !spawn_job(&mut tasks, &pipeline, &pool, job).await {
            break;
        }
    }
    while let Some(result) = tasks.join_next().await {
        log_join(result);
    }
}

/// Wait for admission and start the job. False if the pool is closed.
async fn spawn_job(
    tasks: &mut JoinSet<()>,
    pipeline: &Arc<IngestionPipeline>,
    pool: &WorkerPool,
    job: IngestionJob,
) -> bool {
    // ---
    let Ok(admitted) = Arc::clone(&pool.admission).acquire_owned().await else {
        return false;
    };
    let pipeline = Arc::clone(pipeline);
    let workers = Arc::clone(&pool.workers);
    tasks.spawn(async move {
        pipeline
            .run(job.parcel_id, job.options, Some(&workers))
            .await;
        drop(admitted);
    });
    true
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!("Ingestion task panicked: {}", e);
    }
}
