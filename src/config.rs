//! Configuration types for the conversion service.
//!
//! Two structs, two lifetimes:
//!
//! * [`ConversionOptions`] — per request. Travels with every document through
//!   the queue, so it is small, `Copy`, and serialisable.
//! * [`ServiceConfig`] — per process. Built once at start-up via
//!   [`ServiceConfigBuilder`] and shared read-only afterwards.
//!
//! # Design choice: builder over constructor
//! Most deployments change two or three knobs. The builder lets callers set
//! only those and rely on documented defaults for the rest.

use crate::error::ServiceError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Smallest accepted image resolution scale.
pub const MIN_IMAGE_RESOLUTION_SCALE: u8 = 1;
/// Largest accepted image resolution scale; also the default.
pub const MAX_IMAGE_RESOLUTION_SCALE: u8 = 4;

/// Per-document conversion options. Immutable once a job is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOptions {
    /// Render detected tables as images and return them alongside the
    /// markdown. Default: false.
    pub extract_tables_as_images: bool,

    /// Scale factor for rendered images, 1–4. Default: 4.
    pub image_resolution_scale: u8,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            extract_tables_as_images: false,
            image_resolution_scale: MAX_IMAGE_RESOLUTION_SCALE,
        }
    }
}

impl ConversionOptions {
    /// Validate raw option values as received from a client.
    ///
    /// The scale is taken as `i64` so out-of-range client input (0, -1, 99)
    /// surfaces as a caller error rather than a silent wrap.
    pub fn new(extract_tables_as_images: bool, image_resolution_scale: i64) -> Result<Self, ServiceError> {
        let min = i64::from(MIN_IMAGE_RESOLUTION_SCALE);
        let max = i64::from(MAX_IMAGE_RESOLUTION_SCALE);
        if !(min..=max).contains(&image_resolution_scale) {
            return Err(ServiceError::InvalidOptions(format!(
                "image_resolution_scale must be {min}–{max}, got {image_resolution_scale}"
            )));
        }
        Ok(Self {
            extract_tables_as_images,
            image_resolution_scale: image_resolution_scale as u8,
        })
    }
}

/// Process-wide service configuration.
///
/// Built via [`ServiceConfig::builder()`] or [`ServiceConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_doc2md::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .workers(8)
///     .engine_url("http://localhost:5001/convert")
///     .build()
///     .unwrap();
/// assert_eq!(config.workers, 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Number of queue workers running conversions. Default: 4.
    ///
    /// Each worker holds one document in the engine at a time, so this is
    /// also the maximum number of in-flight queued conversions.
    pub workers: usize,

    /// Maximum number of conversion units waiting in the queue. Default: 1024.
    ///
    /// Submissions beyond this fail immediately with
    /// [`ServiceError::DispatchFailed`] instead of blocking the caller.
    pub queue_capacity: usize,

    /// Concurrent engine calls for one direct batch conversion. Default: 4.
    pub convert_concurrency: usize,

    /// How long finished jobs and batches remain readable, in seconds.
    /// Default: 86 400 (one day).
    pub retention_secs: u64,

    /// Interval between retention sweeps, in seconds. Default: 60.
    pub sweep_interval_secs: u64,

    /// Deadline for the health round-trip, in milliseconds. Default: 5 000.
    pub health_timeout_ms: u64,

    /// Download timeout for URL inputs, in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Per-document timeout for the upstream engine, in seconds. Default: 300.
    pub engine_timeout_secs: u64,

    /// Endpoint of the upstream conversion engine.
    pub engine_url: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            convert_concurrency: 4,
            retention_secs: 86_400,
            sweep_interval_secs: 60,
            health_timeout_ms: 5_000,
            download_timeout_secs: 120,
            engine_timeout_secs: 300,
            engine_url: None,
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.config.queue_capacity = n.max(1);
        self
    }

    pub fn convert_concurrency(mut self, n: usize) -> Self {
        self.config.convert_concurrency = n.max(1);
        self
    }

    pub fn retention_secs(mut self, secs: u64) -> Self {
        self.config.retention_secs = secs;
        self
    }

    pub fn sweep_interval_secs(mut self, secs: u64) -> Self {
        self.config.sweep_interval_secs = secs.max(1);
        self
    }

    pub fn health_timeout_ms(mut self, ms: u64) -> Self {
        self.config.health_timeout_ms = ms;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn engine_timeout_secs(mut self, secs: u64) -> Self {
        self.config.engine_timeout_secs = secs;
        self
    }

    pub fn engine_url(mut self, url: impl Into<String>) -> Self {
        self.config.engine_url = Some(url.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, ServiceError> {
        let c = &self.config;
        if c.health_timeout_ms == 0 {
            return Err(ServiceError::InvalidConfig(
                "Health timeout must be ≥ 1ms".into(),
            ));
        }
        if c.retention_secs == 0 {
            return Err(ServiceError::InvalidConfig(
                "Retention must be ≥ 1s".into(),
            ));
        }
        if let Some(ref url) = c.engine_url {
            if !crate::source::is_url(url) {
                return Err(ServiceError::InvalidConfig(format!(
                    "Engine URL must be HTTP/HTTPS, got '{url}'"
                )));
            }
        }
        Ok(self.config)
    }
}
