//! Job store: the single source of truth for job and batch state.
//!
//! ## Who writes what
//!
//! | Writer               | Operation                          |
//! |----------------------|------------------------------------|
//! | `JobOrchestrator`    | `create_job`, `discard_job`        |
//! | `BatchOrchestrator`  | `create_batch`, `discard_job`      |
//! | queue workers        | `transition`                       |
//! | retention sweeper    | `purge_expired`                    |
//!
//! Orchestrators never write execution state, so they cannot race workers.
//! `transition` refuses backward moves, so a late or duplicated worker write
//! cannot undo progress either.
//!
//! A batch is stored only as its ordered sub-job ids. Its status is computed
//! on every read (see [`crate::batch`]) and therefore cannot drift from the
//! sub-jobs.

use crate::error::ServiceError;
use crate::schema::{JobRecord, JobState, JobStatus, Lookup};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Floor for the sweeper period; `tokio::time::interval` rejects zero.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// What happened to a requested state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// The move would go backward or leave a terminal state.
    Rejected { current: JobStatus },
    /// The job is unknown or already evicted.
    Missing,
}

/// Durable job → record mapping.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a QUEUED record. Fails if `job_id` already exists.
    ///
    /// A job created with a `batch_id` belongs to that batch: it stays
    /// readable exactly as long as the batch does.
    async fn create_job(&self, job_id: &str, batch_id: Option<&str>) -> Result<(), ServiceError>;

    /// Read the current record.
    async fn job(&self, job_id: &str) -> Result<Lookup<JobRecord>, ServiceError>;

    /// Move a job forward in the state machine.
    async fn transition(&self, job_id: &str, state: JobState) -> Result<TransitionOutcome, ServiceError>;

    /// Remove a record whose conversion unit was never enqueued, or whose
    /// batch submission was abandoned.
    async fn discard_job(&self, job_id: &str) -> Result<(), ServiceError>;

    /// Record a batch as its ordered sub-job ids.
    async fn create_batch(&self, batch_id: &str, sub_job_ids: Vec<String>) -> Result<(), ServiceError>;

    /// Read a batch's ordered sub-job ids.
    async fn batch(&self, batch_id: &str) -> Result<Lookup<Vec<String>>, ServiceError>;

    /// Drop everything past retention. Returns the number of entries removed.
    async fn purge_expired(&self) -> Result<usize, ServiceError>;
}

struct JobEntry {
    state: JobState,
    updated_at: Instant,
    batch_id: Option<String>,
}

struct BatchEntry {
    sub_job_ids: Vec<String>,
    created_at: Instant,
}

#[derive(Default)]
struct Tables {
    jobs: HashMap<String, JobEntry>,
    batches: HashMap<String, BatchEntry>,
}

impl Tables {
    fn job_expired(&self, entry: &JobEntry, now: Instant, retention: Duration) -> bool {
        match &entry.batch_id {
            // Until its batch is recorded a sub-job never expires.
            Some(batch_id) => self
                .batches
                .get(batch_id)
                .is_some_and(|batch| self.batch_expired(batch, now, retention)),
            None => {
                entry.state.status().is_terminal() && now.duration_since(entry.updated_at) >= retention
            }
        }
    }

    /// A batch ages from the moment its last sub-job finished.
    fn batch_expired(&self, batch: &BatchEntry, now: Instant, retention: Duration) -> bool {
        let mut settled_at = batch.created_at;
        for id in &batch.sub_job_ids {
            if let Some(job) = self.jobs.get(id) {
                if !job.state.status().is_terminal() {
                    return false;
                }
                settled_at = settled_at.max(job.updated_at);
            }
        }
        now.duration_since(settled_at) >= retention
    }
}

/// In-process [`JobStore`] with time-based retention.
///
/// A standalone job expires `retention` after it finished. A batch and all
/// of its sub-jobs expire together, `retention` after the last sub-job
/// finished, so a sub-job can never vanish from under a live batch. Nothing
/// queued or running ever expires. Expired entries read as `NotFound`
/// immediately, even before [`JobStore::purge_expired`] physically removes
/// them, so a poll can never return a result older than the retention window.
pub struct InMemoryJobStore {
    tables: RwLock<Tables>,
    retention: Duration,
}

impl InMemoryJobStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            retention,
        }
    }

    /// Number of job records held, expired ones included until purged.
    pub async fn job_count(&self) -> usize {
        self.tables.read().await.jobs.len()
    }

    /// Purge expired entries every `interval` until the store is dropped.
    ///
    /// Intervals below one millisecond are raised to one millisecond.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let interval = interval.max(MIN_SWEEP_INTERVAL);
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    debug!("job store dropped; sweeper exiting");
                    return;
                };
                match store.purge_expired().await {
                    Ok(0) => {}
                    Ok(n) => info!(removed = n, "purged expired job records"),
                    Err(e) => warn!("retention sweep failed: {e}"),
                }
            }
        })
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, job_id: &str, batch_id: Option<&str>) -> Result<(), ServiceError> {
        let mut tables = self.tables.write().await;
        if tables.jobs.contains_key(job_id) {
            return Err(ServiceError::Internal(format!("duplicate job id {job_id}")));
        }
        tables.jobs.insert(
            job_id.to_string(),
            JobEntry {
                state: JobState::Queued,
                updated_at: Instant::now(),
                batch_id: batch_id.map(str::to_string),
            },
        );
        Ok(())
    }

    async fn job(&self, job_id: &str) -> Result<Lookup<JobRecord>, ServiceError> {
        let tables = self.tables.read().await;
        let now = Instant::now();
        Ok(tables
            .jobs
            .get(job_id)
            .filter(|entry| !tables.job_expired(entry, now, self.retention))
            .map(|entry| JobRecord::from_state(job_id, &entry.state))
            .into())
    }

    async fn transition(&self, job_id: &str, state: JobState) -> Result<TransitionOutcome, ServiceError> {
        let mut tables = self.tables.write().await;
        let now = Instant::now();
        match tables.jobs.get(job_id) {
            None => return Ok(TransitionOutcome::Missing),
            Some(entry) if tables.job_expired(entry, now, self.retention) => {
                return Ok(TransitionOutcome::Missing)
            }
            Some(_) => {}
        }

        let Some(entry) = tables.jobs.get_mut(job_id) else {
            return Ok(TransitionOutcome::Missing);
        };
        let current = entry.state.status();
        let next = state.status();
        if !current.can_transition_to(next) {
            warn!(%job_id, %current, %next, "rejected backward job transition");
            return Ok(TransitionOutcome::Rejected { current });
        }
        entry.state = state;
        entry.updated_at = now;
        debug!(%job_id, %current, %next, "job transition");
        Ok(TransitionOutcome::Applied)
    }

    async fn discard_job(&self, job_id: &str) -> Result<(), ServiceError> {
        self.tables.write().await.jobs.remove(job_id);
        Ok(())
    }

    async fn create_batch(&self, batch_id: &str, sub_job_ids: Vec<String>) -> Result<(), ServiceError> {
        let mut tables = self.tables.write().await;
        if tables.batches.contains_key(batch_id) {
            return Err(ServiceError::Internal(format!("duplicate batch id {batch_id}")));
        }
        tables.batches.insert(
            batch_id.to_string(),
            BatchEntry {
                sub_job_ids,
                created_at: Instant::now(),
            },
        );
        Ok(())
    }

    async fn batch(&self, batch_id: &str) -> Result<Lookup<Vec<String>>, ServiceError> {
        let tables = self.tables.read().await;
        let now = Instant::now();
        Ok(tables
            .batches
            .get(batch_id)
            .filter(|entry| !tables.batch_expired(entry, now, self.retention))
            .map(|entry| entry.sub_job_ids.clone())
            .into())
    }

    async fn purge_expired(&self) -> Result<usize, ServiceError> {
        let mut tables = self.tables.write().await;
        let now = Instant::now();
        let expired_jobs: Vec<String> = tables
            .jobs
            .iter()
            .filter(|(_, entry)| tables.job_expired(entry, now, self.retention))
            .map(|(id, _)| id.clone())
            .collect();
        let expired_batches: Vec<String> = tables
            .batches
            .iter()
            .filter(|(_, entry)| tables.batch_expired(entry, now, self.retention))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired_jobs {
            tables.jobs.remove(id);
        }
        for id in &expired_batches {
            tables.batches.remove(id);
        }
        Ok(expired_jobs.len() + expired_batches.len())
    }
}
