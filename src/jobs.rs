//! Asynchronous single-document jobs.
//!
//! [`JobOrchestrator::submit`] returns a job id as soon as the conversion unit
//! is queued; callers poll [`JobOrchestrator::status`] until the record is
//! terminal. The orchestrator only creates records; every later state change
//! comes from the workers through [`crate::store::JobStore::transition`].

use crate::config::ConversionOptions;
use crate::dispatch::{ConversionTask, TaskDispatcher};
use crate::error::ServiceError;
use crate::schema::{JobRecord, Lookup};
use crate::source::DocumentSource;
use crate::store::JobStore;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Creates job handles and reads their state back from the store.
#[derive(Clone)]
pub struct JobOrchestrator {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<dyn TaskDispatcher>,
}

impl JobOrchestrator {
    pub fn new(store: Arc<dyn JobStore>, dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Queue one document for conversion and return its job id.
    ///
    /// The QUEUED record exists before the unit is enqueued, so a `status`
    /// call made right after this returns always finds it.
    ///
    /// # Errors
    /// A system fault when the record cannot be written or the unit cannot be
    /// enqueued. In the latter case the record is removed again.
    pub async fn submit(
        &self,
        source: DocumentSource,
        options: ConversionOptions,
    ) -> Result<String, ServiceError> {
        self.submit_into(source, options, None).await
    }

    /// [`Self::submit`] for a sub-job; the record shares the batch's lifetime.
    pub(crate) async fn submit_into(
        &self,
        source: DocumentSource,
        options: ConversionOptions,
        batch_id: Option<&str>,
    ) -> Result<String, ServiceError> {
        let job_id = Uuid::new_v4().to_string();
        self.store.create_job(&job_id, batch_id).await?;

        let task = ConversionTask {
            job_id: job_id.clone(),
            source,
            options,
        };
        let filename = task.source.display_name();
        if let Err(e) = self.dispatcher.enqueue(task).await {
            error!(%job_id, %filename, "enqueue failed: {e}");
            if let Err(discard) = self.store.discard_job(&job_id).await {
                error!(%job_id, "could not discard orphaned job record: {discard}");
            }
            return Err(e);
        }

        info!(%job_id, %filename, "conversion job queued");
        Ok(job_id)
    }

    /// Current record for `job_id`; `NotFound` when unknown or evicted.
    pub async fn status(&self, job_id: &str) -> Result<Lookup<JobRecord>, ServiceError> {
        let record = self.store.job(job_id).await?;
        if !record.is_found() {
            debug!(%job_id, "job not found");
        }
        Ok(record)
    }
}
