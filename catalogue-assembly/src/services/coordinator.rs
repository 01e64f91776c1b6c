//! Assembly coordinator
//!
//! Accepts sector sync and delete requests and runs them on a fixed pool of
//! workers fed by one FIFO queue. At most one job per sector is in flight:
//! a sector is reserved before its attempt number is taken, and stays
//! registered until the job's terminal record has been persisted.
//!
//! All shared bookkeeping (in-flight jobs, counters, the queue sender) lives
//! behind a single mutex that is never held across an await point.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AssemblySettings;
use crate::error::{AssemblyError, Result};
use crate::models::{ImportState, JobKind, Sector, User};
use crate::services::sector_job::{JobOutcome, SectorJob};
use crate::store::Backend;

/// A job registered in the in-flight map
struct SectorFuture {
    dataset_key: i32,
    attempt: i32,
    kind: JobKind,
    created: DateTime<Utc>,
    username: String,
    cancel: CancellationToken,
    state: watch::Receiver<ImportState>,
}

#[derive(Default)]
struct Registry {
    syncs: HashMap<i32, SectorFuture>,
    /// Sectors whose job is being prepared
    reserved: HashSet<i32>,
    completed: HashMap<i32, u32>,
    failed: HashMap<i32, u32>,
    /// `None` once the coordinator is stopped
    queue: Option<mpsc::UnboundedSender<SectorJob>>,
}

/// Snapshot of a queued or running job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunningJob {
    pub sector_key: i32,
    pub dataset_key: i32,
    pub attempt: i32,
    pub job: JobKind,
    pub state: ImportState,
    pub created: DateTime<Utc>,
    pub username: String,
}

/// Coordinator state: jobs in flight plus completion counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssemblyState {
    pub running: Vec<RunningJob>,
    pub failed: u32,
    pub completed: u32,
}

impl AssemblyState {
    pub fn is_idle(&self) -> bool {
        self.running.is_empty()
    }
}

/// Outcome of a bulk sync request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    /// Jobs accepted into the queue
    pub queued: u32,
    /// Sectors already in flight
    pub busy: u32,
    /// Sectors with an unresolved subject or target
    pub unresolved: u32,
    /// Sectors refused with an error
    pub failed: u32,
}

struct Inner {
    backend: Backend,
    settings: AssemblySettings,
    registry: Mutex<Registry>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

/// Schedules sector jobs, at most one per sector
#[derive(Clone)]
pub struct AssemblyCoordinator {
    inner: Arc<Inner>,
}

impl AssemblyCoordinator {
    /// Start the worker pool.
    ///
    /// Import records left unfinished by a previous process are marked
    /// CANCELED first.
    pub async fn start(backend: Backend, settings: AssemblySettings) -> Result<Self> {
        let stale = backend.imports.cancel_unfinished().await?;
        if stale > 0 {
            warn!(count = stale, "Marked unfinished sector imports from a previous run as canceled");
        }

        let (tx, rx) = mpsc::unbounded_channel::<SectorJob>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let worker_count = settings.worker_count.max(1);

        let inner = Arc::new(Inner {
            backend,
            settings,
            registry: Mutex::new(Registry {
                queue: Some(tx),
                ..Default::default()
            }),
            workers: Mutex::new(Vec::with_capacity(worker_count)),
            shutdown: CancellationToken::new(),
        });

        {
            let mut workers = inner.workers.lock().unwrap();
            for worker in 0..worker_count {
                workers.push(tokio::spawn(worker_loop(inner.clone(), rx.clone(), worker)));
            }
        }

        info!(workers = worker_count, "Assembly coordinator started");
        Ok(Self { inner })
    }

    /// Queue a sync of one sector.
    ///
    /// Returns `Ok(false)` without side effects if a job for the sector is
    /// already in flight.
    pub async fn sync_sector(&self, sector_key: i32, user: &User) -> Result<bool> {
        self.submit(JobKind::Sync, sector_key, user).await
    }

    /// Queue removal of a sector and all of its catalogue content
    pub async fn delete_sector(&self, sector_key: i32, user: &User) -> Result<bool> {
        self.submit(JobKind::Delete, sector_key, user).await
    }

    async fn submit(&self, kind: JobKind, sector_key: i32, user: &User) -> Result<bool> {
        if self.inner.shutdown.is_cancelled() {
            return Err(AssemblyError::ShuttingDown);
        }
        let Some(mut reservation) = self.reserve(sector_key)? else {
            info!(sector_key, job = %kind, "Sector already busy, request ignored");
            return Ok(false);
        };

        let backend = &self.inner.backend;
        let sector = backend
            .sectors
            .get_sector(sector_key)
            .await?
            .ok_or(AssemblyError::SectorNotFound(sector_key))?;

        if kind == JobKind::Sync && !backend.tree.has_data(sector.dataset_key).await? {
            return Err(AssemblyError::Configuration(format!(
                "Dataset {} is empty, cannot sync sector {}",
                sector.dataset_key, sector_key
            )));
        }

        let attempt = backend.imports.next_attempt(sector_key).await?;
        let (job, state) = SectorJob::new(
            kind,
            &sector,
            attempt,
            user.clone(),
            backend.clone(),
            self.inner.settings.clone(),
            self.inner.shutdown.child_token(),
        );
        let record = job.record().clone();

        {
            let mut registry = self.inner.registry.lock().unwrap();
            if registry.queue.is_none() {
                return Err(AssemblyError::ShuttingDown);
            }
            registry.reserved.remove(&sector_key);
            reservation.held = false;
            registry.syncs.insert(
                sector_key,
                SectorFuture {
                    dataset_key: sector.dataset_key,
                    attempt,
                    kind,
                    created: Utc::now(),
                    username: user.username.clone(),
                    cancel: job.cancel_token(),
                    state,
                },
            );
        }

        if let Err(e) = backend.imports.save_import(&record).await {
            self.inner.release(sector_key);
            return Err(e.into());
        }

        let queued = {
            let registry = self.inner.registry.lock().unwrap();
            match &registry.queue {
                Some(queue) => queue.send(job).map_err(|_| AssemblyError::ShuttingDown),
                None => Err(AssemblyError::ShuttingDown),
            }
        };
        if let Err(e) = queued {
            // The job never ran: close its record
            let mut record = record;
            record.error = Some(AssemblyError::Canceled.to_string());
            record.transition_to(ImportState::Canceled);
            if let Err(save_err) = backend.imports.save_import(&record).await {
                warn!(sector_key, error = %save_err, "Failed to persist canceled sector import");
            }
            self.inner.release(sector_key);
            return Err(e);
        }

        backend.metrics.job_queued(kind);
        info!(sector_key, attempt, job = %kind, user = %user.username, "Queued sector job");
        Ok(true)
    }

    /// Claim a sector for a new job.
    ///
    /// Returns `None` if the sector is registered or already reserved.
    fn reserve(&self, sector_key: i32) -> Result<Option<Reservation<'_>>> {
        let mut registry = self.inner.registry.lock().unwrap();
        if registry.queue.is_none() {
            return Err(AssemblyError::ShuttingDown);
        }
        if registry.syncs.contains_key(&sector_key) || !registry.reserved.insert(sector_key) {
            return Ok(None);
        }
        Ok(Some(Reservation {
            inner: &self.inner,
            sector_key,
            held: true,
        }))
    }

    /// Request cooperative cancellation of a sector's job.
    ///
    /// Returns false if no job for the sector is in flight.
    pub fn cancel(&self, sector_key: i32, user: &User) -> bool {
        let registry = self.inner.registry.lock().unwrap();
        match registry.syncs.get(&sector_key) {
            Some(job) => {
                info!(sector_key, attempt = job.attempt, user = %user.username, "Canceling sector job");
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Queue syncs for every sector of one source dataset
    pub async fn sync_dataset(&self, dataset_key: i32, user: &User) -> Result<SyncSummary> {
        let sectors = self.inner.backend.sectors.list_sectors(Some(dataset_key)).await?;
        info!(dataset_key, sectors = sectors.len(), "Syncing all sectors of dataset");
        self.sync_many(sectors, user).await
    }

    /// Queue syncs for all sectors, ordered by target name
    pub async fn sync_all(&self, user: &User) -> Result<SyncSummary> {
        let mut sectors = self.inner.backend.sectors.list_sectors(None).await?;
        sectors.sort_by(|a, b| {
            a.target
                .name
                .cmp(&b.target.name)
                .then_with(|| a.target.rank.cmp(&b.target.rank))
                .then_with(|| a.key.cmp(&b.key))
        });
        info!(sectors = sectors.len(), "Syncing all sectors");
        self.sync_many(sectors, user).await
    }

    async fn sync_many(&self, sectors: Vec<Sector>, user: &User) -> Result<SyncSummary> {
        let mut summary = SyncSummary::default();

        for sector in sectors {
            if !sector.is_resolved() {
                warn!(
                    sector_key = sector.key,
                    subject = %sector.subject,
                    target = %sector.target,
                    "Skipping sector with unresolved anchors"
                );
                summary.unresolved += 1;
                continue;
            }

            match self.sync_sector(sector.key, user).await {
                Ok(true) => summary.queued += 1,
                Ok(false) => summary.busy += 1,
                Err(AssemblyError::ShuttingDown) => return Err(AssemblyError::ShuttingDown),
                Err(e) => {
                    warn!(sector_key = sector.key, error = %e, "Sector sync refused");
                    summary.failed += 1;
                }
            }
        }

        info!(
            queued = summary.queued,
            busy = summary.busy,
            unresolved = summary.unresolved,
            failed = summary.failed,
            "Bulk sync queued"
        );
        Ok(summary)
    }

    pub fn is_busy(&self, sector_key: i32) -> bool {
        let registry = self.inner.registry.lock().unwrap();
        registry.syncs.contains_key(&sector_key) || registry.reserved.contains(&sector_key)
    }

    /// Whether any sector of the dataset has a job in flight
    pub fn has_syncing_sector(&self, dataset_key: i32) -> bool {
        self.inner
            .registry
            .lock()
            .unwrap()
            .syncs
            .values()
            .any(|job| job.dataset_key == dataset_key)
    }

    /// Snapshot of all jobs and global counters
    pub fn get_state(&self) -> AssemblyState {
        self.snapshot(None)
    }

    /// Snapshot restricted to one source dataset
    pub fn get_dataset_state(&self, dataset_key: i32) -> AssemblyState {
        self.snapshot(Some(dataset_key))
    }

    fn snapshot(&self, dataset_key: Option<i32>) -> AssemblyState {
        let registry = self.inner.registry.lock().unwrap();
        let in_scope = |key: &i32| dataset_key.map_or(true, |d| d == *key);

        let mut running: Vec<RunningJob> = registry
            .syncs
            .iter()
            .filter(|(_, job)| in_scope(&job.dataset_key))
            .map(|(sector_key, job)| RunningJob {
                sector_key: *sector_key,
                dataset_key: job.dataset_key,
                attempt: job.attempt,
                job: job.kind,
                state: *job.state.borrow(),
                created: job.created,
                username: job.username.clone(),
            })
            .collect();
        running.sort_by_key(|job| (job.created, job.sector_key));

        AssemblyState {
            running,
            failed: registry.failed.iter().filter(|(k, _)| in_scope(k)).map(|(_, n)| n).sum(),
            completed: registry.completed.iter().filter(|(k, _)| in_scope(k)).map(|(_, n)| n).sum(),
        }
    }

    /// Cancel all jobs and wait up to the grace period for workers to exit.
    ///
    /// Queued jobs are still drained and end as CANCELED. Workers still
    /// running after the grace period are abandoned.
    pub async fn stop(&self) {
        info!("Stopping assembly coordinator");
        self.inner.shutdown.cancel();
        self.inner.registry.lock().unwrap().queue = None;

        let workers = std::mem::take(&mut *self.inner.workers.lock().unwrap());
        if workers.is_empty() {
            return;
        }

        let grace = self.inner.settings.shutdown_grace;
        match tokio::time::timeout(grace, join_all(workers)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!(error = %e, "Assembly worker ended abnormally");
                    }
                }
                info!("Assembly coordinator stopped");
            }
            Err(_) => {
                let abandoned = self.inner.registry.lock().unwrap().syncs.len();
                warn!(
                    abandoned,
                    grace_ms = grace.as_millis() as u64,
                    "Shutdown grace period elapsed, abandoning running jobs"
                );
            }
        }
    }
}

/// Claim on a sector while its job is prepared, dropped once the job is
/// registered or the request gives up
struct Reservation<'a> {
    inner: &'a Inner,
    sector_key: i32,
    /// Cleared when the reservation turns into a registered job
    held: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.held {
            self.inner.registry.lock().unwrap().reserved.remove(&self.sector_key);
        }
    }
}

impl Inner {
    fn release(&self, sector_key: i32) {
        self.registry.lock().unwrap().syncs.remove(&sector_key);
    }

    /// Run one job to completion and settle its bookkeeping
    async fn execute(&self, job: SectorJob) {
        let sector_key = job.sector_key();
        let kind = job.kind();
        let fallback = job.record().clone();

        let outcome = match tokio::spawn(job.run()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(sector_key, error = %e, "Sector job panicked");
                let mut record = fallback;
                record.error = Some(format!("job panicked: {}", e));
                record.transition_to(ImportState::Failed);
                if let Err(save_err) = self.backend.imports.save_import(&record).await {
                    error!(sector_key, error = %save_err, "Failed to persist failed sector import");
                }
                JobOutcome {
                    import: record,
                    queued: Default::default(),
                    run: Default::default(),
                }
            }
        };

        self.finish(kind, &outcome);
    }

    fn finish(&self, kind: JobKind, outcome: &JobOutcome) {
        let import = &outcome.import;
        self.backend
            .metrics
            .job_finished(kind, import.state, outcome.queued, outcome.run);

        {
            let mut registry = self.registry.lock().unwrap();
            registry.syncs.remove(&import.sector_key);
            match import.state {
                ImportState::Finished => *registry.completed.entry(import.dataset_key).or_default() += 1,
                ImportState::Failed => *registry.failed.entry(import.dataset_key).or_default() += 1,
                _ => {}
            }
        }
        debug!(
            sector_key = import.sector_key,
            attempt = import.attempt,
            state = %import.state,
            queued_ms = outcome.queued.as_millis() as u64,
            run_ms = outcome.run.as_millis() as u64,
            "Sector job settled"
        );
    }
}

async fn worker_loop(
    inner: Arc<Inner>,
    queue: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<SectorJob>>>,
    worker: usize,
) {
    debug!(worker, "Assembly worker started");
    loop {
        let job = {
            let mut queue = queue.lock().await;
            queue.recv().await
        };
        let Some(job) = job else {
            break;
        };
        inner.execute(job).await;
    }
    debug!(worker, "Assembly worker stopped");
}
