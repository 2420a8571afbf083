//! Dossier Processor
//!
//! Runs the background analysis pipeline:
//! 1. Claims pending analysis jobs (and re-claims abandoned ones)
//! 2. Fetches document text, chunks oversized bodies
//! 3. Analyzes each unit and records progress
//! 4. Sweeps for stuck jobs on a slower cadence

mod chunker;
mod detector;
mod errors;
mod processor;
mod service;

use std::sync::Arc;
use std::time::Duration;

use dossier_common::{
    analyzer::create_analyzer,
    config::AppConfig,
    db::DbPool,
    metrics::register_metrics,
    storage::{LocalBlobSource, MemBlobSource},
    store::{MemStore, PgStore},
    BlobSource, Store, VERSION,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::detector::StuckJobDetector;
use crate::processor::AnalysisProcessor;
use crate::service::ProcessorService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if config.observability.json_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting Dossier Processor v{}", VERSION);

    register_metrics();

    // Demo mode keeps everything in memory, no database required
    let demo_mode = std::env::args().any(|a| a == "demo");

    let (store, blobs): (Arc<dyn Store>, Arc<dyn BlobSource>) = if demo_mode {
        info!("Running in demo mode with in-memory state");
        (Arc::new(MemStore::new()), Arc::new(MemBlobSource::new()))
    } else {
        info!("Connecting to database...");
        let db = DbPool::new(&config.database).await?;
        db.ping().await?;
        info!("Database reachable");
        (
            Arc::new(PgStore::new(db)),
            Arc::new(LocalBlobSource::new(config.storage.root.clone())),
        )
    };

    // Initialize analyzer
    let analyzer = create_analyzer(&config.analyzer)?;
    info!(model = %analyzer.model_name(), "Analyzer initialized");

    // Initialize processor and loop
    let analysis = Arc::new(AnalysisProcessor::new(
        store.clone(),
        analyzer,
        blobs,
        config.processor.clone(),
        config.analyzer_timeout(),
    ));
    let service = ProcessorService::new(analysis, store.clone(), config.processor.clone());
    service.start(Some(config.tick_interval())).await?;

    // Start the stuck-job detector on its own cadence
    let shutdown = CancellationToken::new();
    let detector = StuckJobDetector::new(store.clone(), config.detector.clone());
    let detector_shutdown = shutdown.clone();
    let detector_handle = tokio::spawn(async move {
        detector.run(detector_shutdown).await;
    });

    info!(
        worker_id = %service.worker_id(),
        tick_interval_ms = config.processor.tick_interval_ms,
        sweep_interval_secs = config.detector.sweep_interval_secs,
        "Processor ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown.cancel();
    service.stop().await?;
    if tokio::time::timeout(Duration::from_secs(10), detector_handle)
        .await
        .is_err()
    {
        tracing::warn!("Detector did not stop within 10s");
    }

    info!("Dossier processor shutting down");
    Ok(())
}
