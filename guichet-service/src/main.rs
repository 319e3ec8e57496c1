use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod api;
mod config;
mod db;
mod error;
mod fields;
mod jobs;
mod service;
mod storage;
mod vision;

use crate::config::StaticConfig;
use crate::db::Database;
use crate::jobs::JobRunner;
use crate::service::{ExtractionHandler, GuichetService};
use crate::storage::FsObjectStore;
use crate::vision::{FieldExtractor, VisionClient};

// Re-export config crate types to avoid namespace collision
use ::config::{Config as ConfigBuilder, Environment, File};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_logging();

    info!("Starting Guichet service v{}", env!("CARGO_PKG_VERSION"));

    let static_config: StaticConfig = ConfigBuilder::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("GUICHET")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| crate::error::ServiceError::Config {
            message: e.to_string(),
        })?;

    info!(
        host = %static_config.server.host,
        port = static_config.server.port,
        "Static configuration loaded"
    );

    // Ensure data directory exists
    std::fs::create_dir_all(&static_config.storage.data_dir)?;

    // Initialize database
    let db_path = static_config.storage.data_dir.join("guichet.db");
    let db = Arc::new(Database::open(&db_path)?);
    info!(path = %db_path.display(), "Database initialized");

    // Initialize the object store
    let store = Arc::new(FsObjectStore::new(&static_config.storage.data_dir));

    // Initialize the vision extraction client
    let extractor = Arc::new(VisionClient::new(
        static_config.extraction.clone(),
        store.clone(),
    )?);
    if extractor.health_check().await {
        info!(url = %static_config.extraction.base_url, "Vision backend is available");
    } else {
        warn!(url = %static_config.extraction.base_url, "Vision backend is not available");
    }

    // Initialize the service
    let service = Arc::new(GuichetService::new(
        static_config.clone(),
        db.clone(),
        store,
        extractor.clone(),
    ));

    // Register job handlers and start the workers
    let mut runner = JobRunner::new(db.clone(), static_config.queue.clone());
    runner.register(Arc::new(ExtractionHandler::new(db, extractor)));

    let shutdown = CancellationToken::new();
    Arc::new(runner).start(shutdown.clone());

    // Build the router
    let app = api::router(service);

    // Start the server
    let addr = format!(
        "{}:{}",
        static_config.server.host, static_config.server.port
    );
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutdown signal received, stopping workers");
                shutdown.cancel();
            }
        })
        .await?;

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("guichet_service=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
