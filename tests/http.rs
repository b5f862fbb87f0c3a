//! HTTP API integration tests.
//!
//! Drives the axum router in-process with `tower::ServiceExt::oneshot`; no
//! socket, no upstream converter.

#![cfg(feature = "server")]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use edgequake_doc2md::server::{router, AppState};
use edgequake_doc2md::{
    ConversionEngine, ConversionOptions, ConversionResult, DocumentError, DocumentSource,
    EngineError, ServiceConfig, WorkerPool,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tower::ServiceExt;

const BOUNDARY: &str = "doc2md-test-boundary";
const PDF: &[u8] = b"%PDF-1.7\n1 0 obj\n<<>>\nendobj\n";

/// Converts everything except names containing "bad". Names containing
/// "slow" wait until `hold` is notified.
#[derive(Default)]
struct EchoEngine {
    hold: Notify,
}

#[async_trait]
impl ConversionEngine for EchoEngine {
    fn name(&self) -> &str {
        "echo"
    }

    async fn convert(
        &self,
        source: &DocumentSource,
        _options: &ConversionOptions,
    ) -> Result<ConversionResult, EngineError> {
        let name = source.display_name();
        if name.contains("slow") {
            self.hold.notified().await;
        }
        if name.contains("bad") {
            return Err(DocumentError::ConversionFailed {
                detail: "Failed to process page 3".into(),
            }
            .into());
        }
        Ok(ConversionResult::success(name.clone(), format!("# {name}\n")))
    }
}

fn setup_test_app() -> (axum::Router, WorkerPool) {
    setup_test_app_with(Arc::new(EchoEngine::default()))
}

fn setup_test_app_with(engine: Arc<EchoEngine>) -> (axum::Router, WorkerPool) {
    let config = ServiceConfig::builder()
        .workers(2)
        .health_timeout_ms(1_000)
        .build()
        .expect("valid config");
    let (state, pool) = AppState::from_config(&config, engine);
    (router(state), pool)
}

enum Part<'a> {
    File(&'a str, &'a str, &'a [u8]),
    Text(&'a str, &'a str),
}

fn multipart(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::File(field, filename, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
            Part::Text(field, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{field}\"\r\n\r\n{value}").as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn json_post(uri: &str, value: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(value.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

async fn json_response(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.expect("request failed");
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("failed to read body")
        .to_bytes();
    let value: Value = serde_json::from_slice(&body).expect("invalid json");
    (status, value)
}

async fn poll_until_done(app: &axum::Router, uri: &str) -> Value {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let (status, body) = json_response(app, get(uri)).await;
        if status == StatusCode::OK {
            return body;
        }
        assert_eq!(status, StatusCode::ACCEPTED, "{body}");
        assert!(Instant::now() < deadline, "{uri} never finished");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ── Direct conversion ────────────────────────────────────────────────────────

#[tokio::test]
async fn convert_returns_markdown() {
    let (app, _pool) = setup_test_app();
    let req = multipart("/documents/convert", &[Part::File("document", "a.pdf", PDF)]);

    let (status, body) = json_response(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["filename"], "a.pdf");
    assert_eq!(body["markdown"], "# a.pdf\n");
    assert!(body.get("images").is_none());
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn convert_rejects_unsupported_format() {
    let (app, _pool) = setup_test_app();
    let req = multipart(
        "/documents/convert",
        &[Part::File("document", "notes.txt", b"just some plain text")],
    );

    let (status, body) = json_response(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Unsupported file format: notes.txt");
}

#[tokio::test]
async fn convert_rejects_file_and_url_together() {
    let (app, _pool) = setup_test_app();
    let req = multipart(
        "/documents/convert",
        &[
            Part::File("document", "a.pdf", PDF),
            Part::Text("url", "https://example.org/b.pdf"),
        ],
    );

    let (status, _) = json_response(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn convert_rejects_out_of_range_scale() {
    let (app, _pool) = setup_test_app();
    let req = multipart(
        "/documents/convert?image_resolution_scale=9",
        &[Part::File("document", "a.pdf", PDF)],
    );

    let (status, body) = json_response(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("image_resolution_scale"));
}

#[tokio::test]
async fn batch_convert_keeps_order_and_failures() {
    let (app, _pool) = setup_test_app();
    let req = multipart(
        "/documents/batch-convert",
        &[
            Part::File("documents", "one.pdf", PDF),
            Part::File("documents", "bad.pdf", PDF),
            Part::File("documents", "three.pdf", PDF),
        ],
    );

    let (status, body) = json_response(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    let results = body.as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["markdown"], "# one.pdf\n");
    assert_eq!(
        results[1],
        json!({"filename": "bad.pdf", "error": "Failed to process page 3"})
    );
    assert_eq!(results[2]["markdown"], "# three.pdf\n");
}

// ── Jobs ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn job_requires_input() {
    let (app, _pool) = setup_test_app();
    let (status, body) = json_response(&app, json_post("/conversion-jobs", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Either document or url must be provided");
}

#[tokio::test]
async fn job_lifecycle_over_http() {
    let (app, _pool) = setup_test_app();
    let req = multipart("/conversion-jobs", &[Part::File("document", "a.pdf", PDF)]);

    let (status, body) = json_response(&app, req).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "QUEUED");
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let done = poll_until_done(&app, &format!("/conversion-jobs/{job_id}")).await;
    assert_eq!(done["job_id"], job_id.as_str());
    assert_eq!(done["status"], "SUCCESS");
    assert_eq!(done["result"]["markdown"], "# a.pdf\n");
    assert!(done.get("error").is_none());
}

#[tokio::test]
async fn unknown_job_is_404() {
    let (app, _pool) = setup_test_app();
    for uri in ["/conversion-jobs/nope", "/batch-conversion-jobs/nope"] {
        let (status, body) = json_response(&app, get(uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body["detail"], "Job not found");
    }
}

#[tokio::test]
async fn batch_job_lifecycle_over_http() {
    let (app, _pool) = setup_test_app();
    let req = multipart(
        "/batch-conversion-jobs",
        &[
            Part::File("documents", "a.pdf", PDF),
            Part::File("documents", "bad.pdf", PDF),
        ],
    );

    let (status, body) = json_response(&app, req).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["conversion_results"].as_array().unwrap().len(), 2);
    let batch_id = body["job_id"].as_str().unwrap().to_string();

    let done = poll_until_done(&app, &format!("/batch-conversion-jobs/{batch_id}")).await;
    let settled = done["conversion_results"]
        .as_array()
        .unwrap()
        .iter()
        .all(|j| j["status"] == "SUCCESS" || j["status"] == "FAILURE");
    assert!(settled, "{done}");

    assert_eq!(done["status"], "FAILURE");
    assert_eq!(done["error"], "1/2 documents failed");
    assert_eq!(done["conversion_results"][0]["result"]["filename"], "a.pdf");
    assert_eq!(
        done["conversion_results"][1]["error"],
        "Failed to process page 3"
    );
}

#[tokio::test]
async fn failed_batch_stays_accepted_until_siblings_finish() {
    let engine = Arc::new(EchoEngine::default());
    let (app, _pool) = setup_test_app_with(engine.clone());
    let req = multipart(
        "/batch-conversion-jobs",
        &[
            Part::File("documents", "bad.pdf", PDF),
            Part::File("documents", "slow.pdf", PDF),
        ],
    );
    let (_, body) = json_response(&app, req).await;
    let uri = format!("/batch-conversion-jobs/{}", body["job_id"].as_str().unwrap());

    let deadline = Instant::now() + Duration::from_secs(5);
    let (status, body) = loop {
        let (status, body) = json_response(&app, get(&uri)).await;
        if body["conversion_results"][0]["status"] == "FAILURE" {
            break (status, body);
        }
        assert!(Instant::now() < deadline, "bad.pdf never failed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    assert_eq!(status, StatusCode::ACCEPTED, "{body}");
    assert_eq!(body["status"], "FAILURE");
    assert_ne!(body["conversion_results"][1]["status"], "SUCCESS");

    engine.hold.notify_one();
    let done = poll_until_done(&app, &uri).await;
    assert_eq!(done["status"], "FAILURE");
    assert_eq!(done["conversion_results"][1]["status"], "SUCCESS");
}

#[tokio::test]
async fn batch_job_requires_input() {
    let (app, _pool) = setup_test_app();
    let (status, body) =
        json_response(&app, json_post("/batch-conversion-jobs", json!({"urls": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Either documents or urls must be provided");
}

// ── Health ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_connected_services() {
    let (app, _pool) = setup_test_app();
    let (status, body) = json_response(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["services"]["dispatcher"], "connected");
}
