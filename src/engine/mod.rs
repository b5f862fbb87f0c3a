//! The conversion engine seam.
//!
//! Orchestration never converts anything itself. It holds an
//! `Arc<dyn ConversionEngine>` injected at construction and calls one method.
//! Swapping the upstream converter, or scripting one in tests, touches
//! nothing else.
//!
//! ```text
//! DirectConverter ──┐
//!                   ├──▶ ConversionEngine::convert(source, options)
//! queue workers  ───┘        │
//!                            ├─ Ok(ConversionResult)          → SUCCESS
//!                            ├─ Err(EngineError::Document(_)) → per-document failure
//!                            └─ Err(EngineError::Fault(_))    → system fault
//! ```
//!
//! Engine markdown is opaque: it reaches the client exactly as produced.
//!
//! Submodules:
//! * [`remote`] — [`HttpEngine`], a client for an upstream conversion service

pub mod remote;

pub use remote::HttpEngine;

use crate::config::ConversionOptions;
use crate::error::EngineError;
use crate::schema::{ConversionResult, ImageData, ImageType};
use crate::source::DocumentSource;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::debug;

/// Converts one document to markdown.
///
/// Implementations must be `Send + Sync`: the same engine instance serves
/// every worker and every direct request concurrently.
#[async_trait]
pub trait ConversionEngine: Send + Sync {
    /// Short identifier for logs and the health report.
    fn name(&self) -> &str;

    /// Convert `source`.
    ///
    /// Return `EngineError::Document` when this document is the problem and
    /// `EngineError::Fault` when the engine itself is.
    async fn convert(
        &self,
        source: &DocumentSource,
        options: &ConversionOptions,
    ) -> Result<ConversionResult, EngineError>;
}

/// Build a base64 data URI.
pub fn data_uri(mime: &str, base64_payload: &str) -> String {
    format!("data:{mime};base64,{base64_payload}")
}

/// Wrap raw image bytes as an [`ImageData`] with a data-URI payload.
///
/// The MIME type is derived from the filename extension.
pub fn encode_image(image_type: ImageType, filename: impl Into<String>, bytes: &[u8]) -> ImageData {
    let filename = filename.into();
    let mime = mime_guess::from_path(&filename).first_or_octet_stream();
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded {} → {} bytes base64", filename, b64.len());

    ImageData {
        image_type,
        image: data_uri(mime.essence_str(), &b64),
        filename,
    }
}

/// Enforce option-driven shape on any engine's output.
///
/// Images are only returned when the caller asked for them, whatever the
/// engine produced.
pub(crate) fn apply_options(mut result: ConversionResult, options: &ConversionOptions) -> ConversionResult {
    if !options.extract_tables_as_images {
        result.images.clear();
    }
    result
}
