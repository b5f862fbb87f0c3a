//! Batch jobs: fan out N single jobs, fan in one aggregate status.
//!
//! A batch is nothing more than an ordered list of sub-job ids. Its status
//! is recomputed from the sub-jobs on every poll, so it can never disagree
//! with them and needs no writer of its own.
//!
//! ## Aggregation
//!
//! | Sub-job statuses                         | Batch status |
//! |------------------------------------------|--------------|
//! | any FAILURE                              | FAILURE      |
//! | all QUEUED                               | QUEUED       |
//! | otherwise any QUEUED / PROCESSING        | PROCESSING   |
//! | all SUCCESS (or no sub-jobs at all)      | SUCCESS      |
//!
//! Failure dominates: one broken document makes the batch FAILURE even while
//! its siblings are still running, and since FAILURE is terminal for that
//! sub-job the batch never leaves FAILURE afterwards.

use crate::config::ConversionOptions;
use crate::error::ServiceError;
use crate::jobs::JobOrchestrator;
use crate::schema::{BatchJobRecord, JobRecord, JobStatus, Lookup};
use crate::source::DocumentSource;
use crate::store::JobStore;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Error recorded for a sub-job whose record is gone.
pub const MISSING_SUB_JOB: &str = "job record not found (expired or evicted)";

/// Submits and tracks batches of conversion jobs.
#[derive(Clone)]
pub struct BatchOrchestrator {
    jobs: JobOrchestrator,
    store: Arc<dyn JobStore>,
}

impl BatchOrchestrator {
    pub fn new(jobs: JobOrchestrator, store: Arc<dyn JobStore>) -> Self {
        Self { jobs, store }
    }

    /// Submit every source as its own job and group them under a batch id.
    ///
    /// Sub-jobs keep the order of `sources`. If any submission fails the
    /// whole call fails, no batch is recorded, and the sub-jobs queued so far
    /// are discarded; workers skip a unit whose record is gone.
    pub async fn submit_batch(
        &self,
        sources: Vec<DocumentSource>,
        options: ConversionOptions,
    ) -> Result<String, ServiceError> {
        let total = sources.len();
        let batch_id = Uuid::new_v4().to_string();
        let mut sub_job_ids = Vec::with_capacity(total);
        for source in sources {
            match self.jobs.submit_into(source, options, Some(&batch_id)).await {
                Ok(id) => sub_job_ids.push(id),
                Err(e) => {
                    self.abandon(&batch_id, &sub_job_ids).await;
                    return Err(e);
                }
            }
        }

        if let Err(e) = self.store.create_batch(&batch_id, sub_job_ids.clone()).await {
            self.abandon(&batch_id, &sub_job_ids).await;
            return Err(e);
        }
        info!(%batch_id, documents = total, "batch queued");
        Ok(batch_id)
    }

    async fn abandon(&self, batch_id: &str, sub_job_ids: &[String]) {
        warn!(%batch_id, submitted = sub_job_ids.len(), "batch submission failed; discarding sub-jobs");
        for id in sub_job_ids {
            if let Err(e) = self.store.discard_job(id).await {
                error!(%batch_id, job_id = %id, "could not discard sub-job: {e}");
            }
        }
    }

    /// Current aggregate view of a batch; `NotFound` when unknown or evicted.
    pub async fn batch_status(&self, batch_id: &str) -> Result<Lookup<BatchJobRecord>, ServiceError> {
        let Lookup::Found(sub_job_ids) = self.store.batch(batch_id).await? else {
            debug!(%batch_id, "batch not found");
            return Ok(Lookup::NotFound);
        };

        let sub_jobs = try_join_all(sub_job_ids.iter().map(|id| async move {
            let record = match self.jobs.status(id).await? {
                Lookup::Found(record) => record,
                Lookup::NotFound => JobRecord::failed(id.as_str(), MISSING_SUB_JOB),
            };
            Ok::<_, ServiceError>(record)
        }))
        .await?;

        let status = aggregate_status(sub_jobs.iter().map(|r| r.status));
        let error = (status == JobStatus::Failure).then(|| {
            let failed = sub_jobs
                .iter()
                .filter(|r| r.status == JobStatus::Failure)
                .count();
            format!("{failed}/{} documents failed", sub_jobs.len())
        });

        Ok(Lookup::Found(BatchJobRecord {
            job_id: batch_id.to_string(),
            status,
            sub_jobs,
            error,
        }))
    }
}

/// Batch status from sub-job statuses. See the module docs for the table.
///
/// Depends only on the multiset of statuses, not their order.
pub fn aggregate_status(statuses: impl IntoIterator<Item = JobStatus>) -> JobStatus {
    let mut any_queued = false;
    let mut any_processing = false;
    let mut any_success = false;
    for status in statuses {
        match status {
            JobStatus::Failure => return JobStatus::Failure,
            JobStatus::Queued => any_queued = true,
            JobStatus::Processing => any_processing = true,
            JobStatus::Success => any_success = true,
        }
    }
    match (any_queued, any_processing, any_success) {
        (true, false, false) => JobStatus::Queued,
        (false, false, _) => JobStatus::Success,
        _ => JobStatus::Processing,
    }
}
