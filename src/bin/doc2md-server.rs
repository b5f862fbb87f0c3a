//! HTTP server binary for edgequake-doc2md.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ServiceConfig`, wires the in-process queue around an upstream
//! conversion engine, and serves the HTTP API until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_doc2md::server::{self, AppState};
use edgequake_doc2md::{HttpEngine, ServiceConfig};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Forward conversions to a converter listening on port 5001
  doc2md-server --engine-url http://localhost:5001/convert

  # Eight workers, one hour of result retention, JSON logs
  doc2md-server --engine-url http://converter/convert -w 8 --retention-secs 3600 --json-logs

  # Queue a document and poll it
  curl -F document=@report.pdf http://localhost:8080/conversion-jobs
  curl http://localhost:8080/conversion-jobs/<job_id>

ENVIRONMENT VARIABLES:
  Every flag can also be set as DOC2MD_<FLAG>, e.g. DOC2MD_ENGINE_URL.
  RUST_LOG overrides --verbose / --quiet.
"#;

/// Serve document-to-Markdown conversion over HTTP.
#[derive(Parser, Debug)]
#[command(
    name = "doc2md-server",
    version,
    about = "Serve document-to-Markdown conversion over HTTP",
    long_about = "Serve document-to-Markdown conversion over HTTP: direct conversion for small \
documents plus queued single and batch jobs that clients poll for results. Conversion itself is \
delegated to an upstream engine reached over HTTP.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to listen on.
    #[arg(short, long, env = "DOC2MD_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Upstream conversion endpoint (HTTP/HTTPS).
    #[arg(long, env = "DOC2MD_ENGINE_URL")]
    engine_url: String,

    /// Queue workers running conversions.
    #[arg(short, long, env = "DOC2MD_WORKERS", default_value_t = 4)]
    workers: usize,

    /// Maximum queued conversion units before submissions are refused.
    #[arg(long, env = "DOC2MD_QUEUE_CAPACITY", default_value_t = 1024)]
    queue_capacity: usize,

    /// Concurrent engine calls for direct batch conversion.
    #[arg(short, long, env = "DOC2MD_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Seconds a finished job stays readable.
    #[arg(long, env = "DOC2MD_RETENTION_SECS", default_value_t = 86_400)]
    retention_secs: u64,

    /// Health probe deadline in milliseconds.
    #[arg(long, env = "DOC2MD_HEALTH_TIMEOUT_MS", default_value_t = 5_000)]
    health_timeout_ms: u64,

    /// URL download timeout in seconds.
    #[arg(long, env = "DOC2MD_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Upstream engine timeout per document in seconds.
    #[arg(long, env = "DOC2MD_ENGINE_TIMEOUT", default_value_t = 300)]
    engine_timeout: u64,

    /// Debug-level logging.
    #[arg(short, long, env = "DOC2MD_VERBOSE")]
    verbose: bool,

    /// Errors only.
    #[arg(short, long, env = "DOC2MD_QUIET")]
    quiet: bool,

    /// Emit logs as JSON lines.
    #[arg(long, env = "DOC2MD_JSON_LOGS")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    // ── Configuration ────────────────────────────────────────────────────
    let config = ServiceConfig::builder()
        .workers(cli.workers)
        .queue_capacity(cli.queue_capacity)
        .convert_concurrency(cli.concurrency)
        .retention_secs(cli.retention_secs)
        .health_timeout_ms(cli.health_timeout_ms)
        .download_timeout_secs(cli.download_timeout)
        .engine_timeout_secs(cli.engine_timeout)
        .engine_url(cli.engine_url)
        .build()
        .context("Invalid configuration")?;

    let engine = HttpEngine::from_config(&config).context("Failed to create conversion engine")?;
    info!(engine = engine.endpoint(), workers = config.workers, "starting doc2md-server");

    // ── Serve ────────────────────────────────────────────────────────────
    let (state, pool) = AppState::from_config(&config, Arc::new(engine));
    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;

    server::serve(listener, server::router(state))
        .await
        .context("HTTP server failed")?;

    pool.shutdown().await;
    info!("stopped");
    Ok(())
}
