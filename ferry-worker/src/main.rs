//! Ferry Worker
//!
//! HTTP server loading delimited files from Cloud Storage into BigQuery.
//!
//! # Architecture
//!
//! - POST / - Ingest one object or the direct children of a folder
//! - GET /health - Health check endpoint
//! - GET /metrics - Prometheus metrics
//!
//! Each request is processed synchronously within `FUNCTION_TIMEOUT_SEC`.
//! Running query jobs are cancelled when the deadline gets close or when the
//! server shuts down.
//!
//! # Configuration
//!
//! Environment variables:
//! - GCP_PROJECT - Project running the query jobs (required)
//! - CONFIGURATION_BUCKET - Bucket holding the configuration documents (required)
//! - FUNCTION_TIMEOUT_SEC - Invocation deadline in seconds (default: 540)
//! - PUB_SUB_TOPIC / PUB_SUB_ERROR_TOPIC - Notification topics
//! - PORT - HTTP port (default: 8080)
//! - FERRY_BIGQUERY_URL / FERRY_STORAGE_URL / FERRY_PUBSUB_URL - API overrides
//! - FERRY_ACCESS_TOKEN - Fixed bearer token, for emulators

use ferry_cloud_gcp::{BigQueryClient, GcpAuth, GcpEndpoints, GcsObjectStore, PubSubNotifier};
use ferry_runtime::{IngestionOrchestrator, JobRunner};
use ferry_worker::{
    config::WorkerConfig, handler::AppState, metrics, processor::IngestProcessor, router,
    tracing_config,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = tracing_config::init_tracing() {
        eprintln!("Failed to initialize tracing: {}", e);
        std::process::exit(1);
    }

    info!("Starting Ferry worker");

    let config = match WorkerConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    info!(
        project_id = %config.project_id,
        configuration_bucket = %config.configuration_bucket,
        function_name = %config.function_name,
        port = config.port,
        timeout_seconds = config.function_timeout.as_secs(),
        cancel_threshold_seconds = config.cancel_threshold.as_secs(),
        "Configuration loaded"
    );

    let processor = match build_processor(&config) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            error!(error = %e, "Failed to initialize Google Cloud clients");
            std::process::exit(1);
        }
    };

    metrics::init_metrics();

    let shutdown = CancellationToken::new();
    let state = AppState {
        processor,
        function_timeout: config.function_timeout,
        shutdown: shutdown.clone(),
    };
    let app = router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, address = %addr, "Failed to bind server");
            std::process::exit(1);
        }
    };

    info!(address = %addr, "Server listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
    {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }

    info!("Server shut down gracefully");
}

/// Create the Google Cloud clients shared by every invocation
fn build_processor(config: &WorkerConfig) -> ferry_cloud_gcp::Result<IngestProcessor> {
    let endpoints = GcpEndpoints::from_env()?;
    let auth = Arc::new(match &endpoints.access_token {
        Some(token) => GcpAuth::from_static_token(token.clone())?,
        None => GcpAuth::auto()?,
    });

    let engine = BigQueryClient::new(&config.project_id, &endpoints.bigquery_url, auth.clone())?;
    let store = GcsObjectStore::new(&endpoints.storage_url, auth.clone())?;
    let notifier = PubSubNotifier::new(&config.project_id, &endpoints.pubsub_url, auth)?;

    let runner =
        JobRunner::new(Arc::new(engine)).with_cancel_threshold(config.cancel_threshold);

    Ok(IngestProcessor::new(
        Arc::new(store),
        Arc::new(notifier),
        IngestionOrchestrator::new(runner),
        config.clone(),
    ))
}

/// Graceful shutdown signal handler
///
/// Waits for SIGTERM (Cloud Run shutdown signal) or Ctrl-C, then cancels
/// `shutdown` so in-flight query jobs are cancelled.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl-C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }

    shutdown.cancel();
}
