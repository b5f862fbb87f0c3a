//! # edgequake-doc2md
//!
//! Document-to-Markdown conversion as a service: direct conversion for small
//! inputs, plus queued single and batch jobs that clients poll.
//!
//! ## Why this crate?
//!
//! Converting a 300-page PDF can take minutes, far longer than most HTTP
//! clients will wait. This crate puts a job lifecycle around any conversion
//! engine: submissions return a job id immediately, workers convert in the
//! background, and every poll reads one consistent record. Batches fan out to
//! independent jobs, so one corrupt file fails only itself while the batch
//! status still tells the client something went wrong.
//!
//! ## Architecture
//!
//! ```text
//! request
//!  │
//!  ├─ 1. Gate      reject unsupported formats before anything is queued
//!  ├─ 2. Direct    DirectConverter runs the engine in-request   ──▶ result
//!  │
//!  ├─ 2. Submit    JobOrchestrator: QUEUED record, then enqueue ──▶ job_id
//!  ├─ 3. Work      worker pool: PROCESSING ─▶ engine ─▶ SUCCESS | FAILURE
//!  └─ 4. Poll      JobStore read; batches aggregate their sub-jobs
//! ```
//!
//! Every seam is a trait: [`ConversionEngine`], [`TaskDispatcher`],
//! [`JobStore`], [`CapabilityGate`]. The crate ships one in-process
//! implementation of each so the service runs standalone.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_doc2md::{
//!     ConversionOptions, DocumentSource, HttpEngine, InMemoryJobStore, JobOrchestrator,
//!     LocalDispatcher, Lookup,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Arc::new(HttpEngine::new("http://localhost:5001/convert", 300, 120)?);
//!     let store = Arc::new(InMemoryJobStore::new(Duration::from_secs(3600)));
//!     let (dispatcher, _pool) = LocalDispatcher::spawn(engine, store.clone(), 4, 1024);
//!     let jobs = JobOrchestrator::new(store, Arc::new(dispatcher));
//!
//!     let source = DocumentSource::file("report.pdf", std::fs::read("report.pdf")?);
//!     let job_id = jobs.submit(source, ConversionOptions::default()).await?;
//!
//!     loop {
//!         if let Lookup::Found(record) = jobs.status(&job_id).await? {
//!             if record.status.is_terminal() {
//!                 println!("{}", serde_json::to_string_pretty(&record)?);
//!                 break;
//!             }
//!         }
//!         tokio::time::sleep(Duration::from_millis(500)).await;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | axum HTTP surface and the `doc2md-server` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `server` when embedding only the job core:
//! ```toml
//! edgequake-doc2md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod convert;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod gate;
pub mod health;
pub mod jobs;
pub mod schema;
#[cfg(feature = "server")]
pub mod server;
pub mod source;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{aggregate_status, BatchOrchestrator};
pub use config::{ConversionOptions, ServiceConfig, ServiceConfigBuilder};
pub use convert::DirectConverter;
pub use dispatch::{ConversionTask, LocalDispatcher, TaskDispatcher, WorkerPool};
pub use engine::{ConversionEngine, HttpEngine};
pub use error::{DocumentError, EngineError, ErrorClass, ServiceError};
pub use gate::{CapabilityGate, FormatGate, InputFormat};
pub use health::{HealthProbe, HealthReport, HealthStatus};
pub use jobs::JobOrchestrator;
pub use schema::{BatchJobRecord, ConversionResult, ImageData, ImageType, JobRecord, JobStatus, Lookup};
pub use source::DocumentSource;
pub use store::{InMemoryJobStore, JobStore, TransitionOutcome};
