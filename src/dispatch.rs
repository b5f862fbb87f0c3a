//! Task dispatch: hand conversion units to workers without waiting for them.
//!
//! [`TaskDispatcher`] is the seam the orchestrators see. [`LocalDispatcher`]
//! implements it with a bounded in-process queue drained by a pool of tokio
//! workers, which is enough for a single-node deployment and for tests. A
//! broker-backed dispatcher only needs to implement the same two methods.
//!
//! ## Worker loop
//!
//! ```text
//! queue ──▶ worker ──▶ store.transition(PROCESSING)
//!                 ──▶ engine.convert          (in its own task: a panic is contained)
//!                 ──▶ store.transition(SUCCESS | FAILURE)
//! ```
//!
//! The health probe travels the same queue as real work, so a wedged pool
//! shows up as a probe timeout rather than a false "healthy".

use crate::config::ConversionOptions;
use crate::convert::convert_document;
use crate::engine::ConversionEngine;
use crate::error::ServiceError;
use crate::schema::JobState;
use crate::source::DocumentSource;
use crate::store::{JobStore, TransitionOutcome};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The reply a healthy pipeline gives to a ping unit.
pub const PING_REPLY: &str = "pong";

/// One queued conversion.
#[derive(Debug, Clone)]
pub struct ConversionTask {
    pub job_id: String,
    pub source: DocumentSource,
    pub options: ConversionOptions,
}

/// Queues work for out-of-process (or out-of-request) execution.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Enqueue one conversion unit. Must not wait for the conversion.
    async fn enqueue(&self, task: ConversionTask) -> Result<(), ServiceError>;

    /// Send a round-trip unit through the dispatch path and return the
    /// reply. Callers impose their own deadline.
    async fn ping(&self) -> Result<String, ServiceError>;
}

enum WorkUnit {
    Convert(ConversionTask),
    Ping(oneshot::Sender<String>),
}

/// In-process [`TaskDispatcher`] backed by a bounded tokio channel.
#[derive(Clone)]
pub struct LocalDispatcher {
    tx: mpsc::Sender<WorkUnit>,
}

/// Handles to the workers spawned by [`LocalDispatcher::spawn`].
///
/// Dropping the pool closes the queue; workers finish what is already
/// queued and exit.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl LocalDispatcher {
    /// Start `workers` workers draining a queue of at most `capacity` units.
    ///
    /// The workers stop once the queue is closed (by [`WorkerPool::shutdown`]
    /// or by dropping every dispatcher clone) and drained.
    pub fn spawn(
        engine: Arc<dyn ConversionEngine>,
        store: Arc<dyn JobStore>,
        workers: usize,
        capacity: usize,
    ) -> (Self, WorkerPool) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let rx = Arc::clone(&rx);
                let engine = Arc::clone(&engine);
                let store = Arc::clone(&store);
                tokio::spawn(run_worker(worker_id, rx, shutdown_rx.clone(), engine, store))
            })
            .collect::<Vec<_>>();

        info!(workers = handles.len(), capacity, "conversion workers started");
        (Self { tx }, WorkerPool { handles, shutdown })
    }
}

#[async_trait]
impl TaskDispatcher for LocalDispatcher {
    async fn enqueue(&self, task: ConversionTask) -> Result<(), ServiceError> {
        let job_id = task.job_id.clone();
        self.tx
            .try_send(WorkUnit::Convert(task))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => ServiceError::DispatchFailed {
                    reason: "queue is full".into(),
                },
                mpsc::error::TrySendError::Closed(_) => ServiceError::DispatchFailed {
                    reason: "queue is closed".into(),
                },
            })?;
        debug!(%job_id, "conversion unit enqueued");
        Ok(())
    }

    async fn ping(&self) -> Result<String, ServiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WorkUnit::Ping(reply_tx))
            .await
            .map_err(|_| ServiceError::DispatchFailed {
                reason: "queue is closed".into(),
            })?;
        reply_rx.await.map_err(|_| ServiceError::DispatchFailed {
            reason: "worker dropped the ping".into(),
        })
    }
}

impl WorkerPool {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Close the queue, let the workers finish every queued unit, and wait
    /// for them to exit. Enqueueing afterwards fails with `DispatchFailed`.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        info!(workers = self.handles.len(), "draining conversion workers");
        self.join().await;
    }

    /// Wait for every worker to exit without closing the queue.
    pub async fn join(mut self) {
        for handle in std::mem::take(&mut self.handles) {
            if let Err(e) = handle.await {
                error!("conversion worker ended abnormally: {e}");
            }
        }
    }

    /// Stop immediately, abandoning queued units.
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn run_worker(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<WorkUnit>>>,
    mut shutdown: watch::Receiver<bool>,
    engine: Arc<dyn ConversionEngine>,
    store: Arc<dyn JobStore>,
) {
    loop {
        // Hold the lock only while waiting for the next unit.
        let unit = {
            let mut rx = rx.lock().await;
            tokio::select! {
                unit = rx.recv() => unit,
                _ = shutdown.changed() => {
                    // Closing keeps buffered units; recv drains them, then None.
                    rx.close();
                    rx.recv().await
                }
            }
        };
        match unit {
            Some(WorkUnit::Convert(task)) => run_task(worker_id, task, &engine, &store).await,
            Some(WorkUnit::Ping(reply)) => {
                let _ = reply.send(PING_REPLY.to_string());
            }
            None => {
                debug!(worker_id, "queue closed; worker exiting");
                return;
            }
        }
    }
}

async fn run_task(
    worker_id: usize,
    task: ConversionTask,
    engine: &Arc<dyn ConversionEngine>,
    store: &Arc<dyn JobStore>,
) {
    let job_id = task.job_id.clone();
    let start = Instant::now();

    match store.transition(&job_id, JobState::Processing).await {
        Ok(TransitionOutcome::Applied) => {}
        Ok(TransitionOutcome::Missing) => {
            warn!(%job_id, "job record vanished before processing; skipping");
            return;
        }
        Ok(TransitionOutcome::Rejected { current }) => {
            warn!(%job_id, %current, "job already claimed; skipping");
            return;
        }
        Err(e) => {
            error!(%job_id, "could not claim job: {e}");
            return;
        }
    }
    debug!(worker_id, %job_id, "processing");

    let engine = Arc::clone(engine);
    let outcome = tokio::spawn(async move {
        convert_document(engine.as_ref(), &task.source, &task.options).await
    })
    .await;

    let state = match outcome {
        Ok(Ok(result)) => match result.error {
            Some(error) => JobState::Failed(error),
            None => JobState::Succeeded(result),
        },
        Ok(Err(fault)) => {
            error!(%job_id, "engine fault: {fault}");
            JobState::Failed(fault.to_string())
        }
        Err(join_err) => {
            error!(%job_id, "conversion task crashed: {join_err}");
            JobState::Failed("conversion worker crashed".into())
        }
    };
    let status = state.status();

    match store.transition(&job_id, state).await {
        Ok(TransitionOutcome::Applied) => info!(
            worker_id,
            %job_id,
            %status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "job finished"
        ),
        Ok(other) => warn!(%job_id, ?other, "could not record job outcome"),
        Err(e) => error!(%job_id, "could not record job outcome: {e}"),
    }
}
