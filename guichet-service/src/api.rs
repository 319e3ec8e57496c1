//! HTTP API for the Guichet service.
//!
//! This module provides the REST API endpoints for:
//! - Health monitoring
//! - Document submission, retrieval, and confirmation
//! - Per-type field catalogs

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::service::GuichetService;

pub mod documents;
use documents::{
    confirm_document_handler, document_fields_handler, get_document_handler,
    list_documents_handler, upload_document_handler,
};

/// Application state
pub struct AppState {
    pub service: Arc<GuichetService>,
    pub start_time: Instant,
}

/// Build the API router
pub fn router(service: Arc<GuichetService>) -> Router {
    // Use the configured max upload size for submissions
    let max_body_size = service.config.upload.max_bytes as usize;

    let state = Arc::new(AppState {
        service,
        start_time: Instant::now(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/documents", get(list_documents_handler))
        .route(
            "/documents",
            post(upload_document_handler).layer(DefaultBodyLimit::max(max_body_size)),
        )
        .route("/documents/{id}", get(get_document_handler))
        .route("/documents/{id}/confirm", post(confirm_document_handler))
        .route(
            "/document-types/{document_type}/fields",
            get(document_fields_handler),
        );

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Health ===

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let extraction_available = state.service.extraction_healthy().await;

    // A null queue depth means the store could not be read, not an empty queue
    let queued_jobs = match state.service.queued_job_count() {
        Ok(count) => Some(count),
        Err(e) => {
            error!(error = %e, "Failed to read queue depth for health report");
            None
        }
    };

    Json(HealthResponse {
        status: health_status(extraction_available, queued_jobs.is_some()),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        extraction_available,
        queued_jobs,
    })
}

fn health_status(extraction_available: bool, queue_readable: bool) -> String {
    match (extraction_available, queue_readable) {
        (true, true) => "healthy".to_string(),
        (false, _) => "degraded: vision backend unavailable".to_string(),
        (true, false) => "degraded: job queue unreadable".to_string(),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    extraction_available: bool,
    queued_jobs: Option<u64>,
}
