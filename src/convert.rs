//! Direct (in-request) conversion.
//!
//! ## Why direct vs. queued?
//!
//! Small documents convert in a second or two; queueing them just adds a
//! polling round-trip. [`DirectConverter`] runs the engine inside the caller's
//! request and returns the finished [`ConversionResult`]. Use the queued
//! orchestrators in [`crate::jobs`] and [`crate::batch`] when conversion time
//! can exceed a client's HTTP timeout.
//!
//! ## Failure asymmetry
//!
//! A document the engine cannot convert comes back as a result with `error`
//! set; it never fails the call, so one bad file in a batch cannot hide the
//! other results. Only an engine *fault* propagates as `Err`.

use crate::config::ConversionOptions;
use crate::engine::{apply_options, ConversionEngine};
use crate::error::{EngineError, ServiceError};
use crate::schema::ConversionResult;
use crate::source::DocumentSource;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Runs the conversion engine synchronously for direct conversion calls.
#[derive(Clone)]
pub struct DirectConverter {
    engine: Arc<dyn ConversionEngine>,
    concurrency: usize,
}

impl DirectConverter {
    /// `concurrency` bounds simultaneous engine calls in [`Self::convert_many`].
    pub fn new(engine: Arc<dyn ConversionEngine>, concurrency: usize) -> Self {
        Self {
            engine,
            concurrency: concurrency.max(1),
        }
    }

    /// Convert one document.
    ///
    /// # Returns
    /// `Ok(ConversionResult)` on success *and* on a per-document failure
    /// (check `result.error`).
    ///
    /// # Errors
    /// `ServiceError::EngineFault` when the engine itself failed.
    pub async fn convert_one(
        &self,
        source: &DocumentSource,
        options: &ConversionOptions,
    ) -> Result<ConversionResult, ServiceError> {
        convert_document(self.engine.as_ref(), source, options).await
    }

    /// Convert several documents.
    ///
    /// Output order matches input order. Per-document failures are recorded
    /// element-wise and never stop the remaining documents; an engine fault
    /// fails the whole call once every in-flight document has finished.
    pub async fn convert_many(
        &self,
        sources: &[DocumentSource],
        options: &ConversionOptions,
    ) -> Result<Vec<ConversionResult>, ServiceError> {
        let start = Instant::now();
        // `buffered` (not `buffer_unordered`) yields in input order.
        let pending: Vec<_> = sources
            .iter()
            .map(|source| convert_document(self.engine.as_ref(), source, options))
            .collect();
        let results: Vec<Result<ConversionResult, ServiceError>> = stream::iter(pending)
            .buffered(self.concurrency)
            .collect()
            .await;

        let results = results.into_iter().collect::<Result<Vec<_>, _>>()?;
        let failed = results.iter().filter(|r| r.is_failure()).count();
        info!(
            total = results.len(),
            failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "direct batch conversion complete"
        );
        Ok(results)
    }
}

/// Run the engine once and fold per-document failures into the result.
///
/// Shared by the direct path and the queue workers so both report document
/// failures identically.
pub(crate) async fn convert_document(
    engine: &dyn ConversionEngine,
    source: &DocumentSource,
    options: &ConversionOptions,
) -> Result<ConversionResult, ServiceError> {
    let filename = source.display_name();
    match engine.convert(source, options).await {
        Ok(mut result) => {
            if result.filename.is_empty() {
                result.filename = filename;
            }
            Ok(apply_options(result, options))
        }
        Err(EngineError::Document(e)) => {
            warn!(%filename, engine = engine.name(), "document failed: {e}");
            Ok(ConversionResult::failed(filename, e.to_string()))
        }
        Err(EngineError::Fault(detail)) => Err(ServiceError::EngineFault { detail }),
    }
}
