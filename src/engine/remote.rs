//! [`HttpEngine`]: delegate conversion to an upstream converter over HTTP.
//!
//! ## Upstream contract
//!
//! ```text
//! POST {endpoint}?extract_tables_as_images=<bool>&image_resolution_scale=<1-4>
//! Content-Type: multipart/form-data   (one part named "document")
//!
//! 200 {"markdown": "...", "images": [{"type": "table", "filename": "...", "image": "..."}]}
//! 200 {"error": "Failed to process page 3"}        → document failure
//! 4xx                                              → document rejected
//! 5xx / connection refused / unparseable body      → engine fault
//! ```
//!
//! URL sources are downloaded here first, so the upstream only ever sees
//! bytes. A dead link fails that document, not the engine.

use crate::config::{ConversionOptions, ServiceConfig};
use crate::engine::{data_uri, ConversionEngine};
use crate::error::{DocumentError, EngineError, ServiceError};
use crate::schema::{ConversionResult, ImageData, ImageType};
use crate::source::{self, DocumentSource};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest upstream error body quoted back to clients.
const MAX_ERROR_BODY: usize = 512;

/// A [`ConversionEngine`] backed by an upstream HTTP conversion service.
#[derive(Debug, Clone)]
pub struct HttpEngine {
    client: reqwest::Client,
    endpoint: String,
    engine_timeout_secs: u64,
    download_timeout_secs: u64,
}

impl HttpEngine {
    pub fn new(
        endpoint: impl Into<String>,
        engine_timeout_secs: u64,
        download_timeout_secs: u64,
    ) -> Result<Self, ServiceError> {
        let endpoint = endpoint.into();
        if !source::is_url(&endpoint) {
            return Err(ServiceError::InvalidConfig(format!(
                "Engine URL must be HTTP/HTTPS, got '{endpoint}'"
            )));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ServiceError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            engine_timeout_secs,
            download_timeout_secs,
        })
    }

    /// Build from the service configuration; `engine_url` must be set.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let endpoint = config
            .engine_url
            .clone()
            .ok_or_else(|| ServiceError::InvalidConfig("engine_url is required".into()))?;
        Self::new(endpoint, config.engine_timeout_secs, config.download_timeout_secs)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Turn any source into (filename, bytes), downloading URLs. CSV
    /// documents are re-encoded to UTF-8 on the way.
    async fn resolve(&self, source: &DocumentSource) -> Result<(String, Bytes), DocumentError> {
        let (filename, bytes) = match source {
            DocumentSource::File { filename, bytes } => (filename.clone(), bytes.clone()),
            DocumentSource::Url(url) => {
                source::download(&self.client, url, self.download_timeout_secs).await?
            }
        };
        if source::is_csv(&filename) {
            let bytes = source::reencode_csv(&filename, bytes)?;
            return Ok((filename, bytes));
        }
        Ok((filename, bytes))
    }
}

#[async_trait]
impl ConversionEngine for HttpEngine {
    fn name(&self) -> &str {
        "http"
    }

    async fn convert(
        &self,
        source: &DocumentSource,
        options: &ConversionOptions,
    ) -> Result<ConversionResult, EngineError> {
        let start = Instant::now();
        let (filename, bytes) = self.resolve(source).await?;
        let mime = mime_guess::from_path(&filename).first_or_octet_stream();

        let part = Part::bytes(bytes.to_vec())
            .file_name(filename.clone())
            .mime_str(mime.essence_str())
            .map_err(|e| EngineError::Fault(format!("Invalid upload part: {e}")))?;
        let form = Form::new().part("document", part);

        let scale = options.image_resolution_scale.to_string();
        let extract = options.extract_tables_as_images.to_string();
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[
                ("extract_tables_as_images", extract.as_str()),
                ("image_resolution_scale", scale.as_str()),
            ])
            .multipart(form)
            .timeout(Duration::from_secs(self.engine_timeout_secs))
            .send()
            .await
            .map_err(|e| self.classify_send_error(e, &filename))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.classify_send_error(e, &filename))?;

        let result = interpret_response(status, &body, &filename);
        match &result {
            Ok(r) => info!(
                %filename,
                markdown_len = r.markdown.len(),
                images = r.images.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "upstream conversion succeeded"
            ),
            Err(e) => warn!(%filename, %status, "upstream conversion failed: {e}"),
        }
        result
    }
}

impl HttpEngine {
    fn classify_send_error(&self, e: reqwest::Error, filename: &str) -> EngineError {
        if e.is_timeout() {
            DocumentError::Timeout {
                filename: filename.to_string(),
                secs: self.engine_timeout_secs,
            }
            .into()
        } else {
            EngineError::Fault(format!("Upstream engine unreachable at {}: {e}", self.endpoint))
        }
    }
}

#[derive(Debug, Deserialize)]
struct UpstreamResponse {
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    images: Vec<UpstreamImage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpstreamImage {
    #[serde(rename = "type")]
    image_type: ImageType,
    filename: String,
    image: String,
}

impl From<UpstreamImage> for ImageData {
    fn from(img: UpstreamImage) -> Self {
        let image = if img.image.starts_with("data:") {
            img.image
        } else {
            let mime = mime_guess::from_path(&img.filename).first_or_octet_stream();
            data_uri(mime.essence_str(), &img.image)
        };
        ImageData {
            image_type: img.image_type,
            filename: img.filename,
            image,
        }
    }
}

/// Map an upstream HTTP response onto the engine contract.
fn interpret_response(
    status: StatusCode,
    body: &str,
    filename: &str,
) -> Result<ConversionResult, EngineError> {
    if status.is_server_error() {
        return Err(EngineError::Fault(format!(
            "Upstream engine returned HTTP {status}: {}",
            truncate(body)
        )));
    }
    if status.is_client_error() {
        return Err(DocumentError::Rejected {
            filename: filename.to_string(),
            detail: format!("HTTP {status}: {}", truncate(body)),
        }
        .into());
    }
    if !status.is_success() {
        return Err(EngineError::Fault(format!(
            "Unexpected upstream status {status}"
        )));
    }

    let parsed: UpstreamResponse = serde_json::from_str(body)
        .map_err(|e| EngineError::Fault(format!("Malformed upstream response: {e}")))?;

    if let Some(detail) = parsed.error {
        return Err(DocumentError::ConversionFailed { detail }.into());
    }

    let markdown = parsed.markdown.unwrap_or_default();
    debug!(%filename, "received {} bytes of markdown", markdown.len());

    Ok(ConversionResult::success(filename, markdown)
        .with_images(parsed.images.into_iter().map(ImageData::from).collect()))
}

fn truncate(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_body_markdown_is_verbatim() {
        let body = r#"{"markdown": "line one  \nline two\n\n\n```\ncode\n```", "images": []}"#;
        let r = interpret_response(StatusCode::OK, body, "a.pdf").unwrap();
        assert_eq!(r.filename, "a.pdf");
        assert_eq!(r.markdown, "line one  \nline two\n\n\n```\ncode\n```");
        assert!(r.error.is_none());
    }

    #[test]
    fn bare_base64_images_become_data_uris() {
        let body = r#"{"markdown": "x", "images": [
            {"type": "table", "filename": "table_1.png", "image": "iVBORw0KGgo="},
            {"type": "picture", "filename": "fig.jpg", "image": "data:image/jpeg;base64,/9j/"}
        ]}"#;
        let r = interpret_response(StatusCode::OK, body, "a.pdf").unwrap();
        assert_eq!(r.images[0].image, "data:image/png;base64,iVBORw0KGgo=");
        assert_eq!(r.images[0].image_type, ImageType::Table);
        assert_eq!(r.images[1].image, "data:image/jpeg;base64,/9j/");
    }

    #[test]
    fn error_body_is_document_failure() {
        let body = r#"{"error": "Failed to process page 3"}"#;
        let err = interpret_response(StatusCode::OK, body, "a.pdf").unwrap_err();
        match err {
            EngineError::Document(DocumentError::ConversionFailed { detail }) => {
                assert_eq!(detail, "Failed to process page 3")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn client_error_is_document_rejection() {
        let err = interpret_response(StatusCode::UNPROCESSABLE_ENTITY, "bad pdf", "a.pdf").unwrap_err();
        assert!(matches!(
            err,
            EngineError::Document(DocumentError::Rejected { .. })
        ));
    }

    #[test]
    fn server_error_and_garbage_are_faults() {
        assert!(matches!(
            interpret_response(StatusCode::BAD_GATEWAY, "", "a.pdf"),
            Err(EngineError::Fault(_))
        ));
        assert!(matches!(
            interpret_response(StatusCode::OK, "<html>", "a.pdf"),
            Err(EngineError::Fault(_))
        ));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(MAX_ERROR_BODY * 2);
        let t = truncate(&body);
        assert!(t.chars().count() <= MAX_ERROR_BODY + 1);
        assert!(t.ends_with('…'));
    }

    #[test]
    fn rejects_non_http_endpoint() {
        assert!(HttpEngine::new("localhost:5001", 10, 10).is_err());
        let engine = HttpEngine::new("http://localhost:5001/convert", 10, 10).unwrap();
        assert_eq!(engine.endpoint(), "http://localhost:5001/convert");
    }

    #[tokio::test]
    async fn latin1_csv_upload_is_sent_as_utf8() {
        let engine = HttpEngine::new("http://localhost:5001/convert", 10, 10).unwrap();
        let source = DocumentSource::file("people.csv", b"name\nJos\xe9\n".to_vec());
        let (filename, bytes) = engine.resolve(&source).await.unwrap();
        assert_eq!(filename, "people.csv");
        assert_eq!(&bytes[..], "name\nJosé\n".as_bytes());

        let pdf = DocumentSource::file("a.pdf", b"%PDF-1.7 \xe9".to_vec());
        let (_, bytes) = engine.resolve(&pdf).await.unwrap();
        assert_eq!(&bytes[..], b"%PDF-1.7 \xe9");
    }

    #[test]
    fn from_config_requires_engine_url() {
        assert!(HttpEngine::from_config(&ServiceConfig::default()).is_err());
    }
}
