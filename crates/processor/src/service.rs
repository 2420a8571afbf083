//! Processor service
//!
//! The controllable polling loop around [`AnalysisProcessor`]. Each tick
//! re-claims abandoned work, claims a batch of pending jobs, and runs
//! them. The loop is an explicit object with start, stop, restart and
//! status, so operators control it without touching process lifetime.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dossier_common::config::ProcessorConfig;
use dossier_common::db::models::BackgroundJob;
use dossier_common::metrics::METRICS_PREFIX;
use dossier_common::store::Store;
use metrics::counter;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::ProcessorError;
use crate::processor::AnalysisProcessor;

/// Default tick interval when none is given.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(30_000);

/// Reported loop state.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessorStatus {
    pub running: bool,
    pub interval_ms: u64,
    pub worker_id: String,
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    interval: Duration,
}

/// Controllable processor loop.
pub struct ProcessorService {
    processor: Arc<AnalysisProcessor>,
    store: Arc<dyn Store>,
    config: ProcessorConfig,
    worker_id: String,
    running: Mutex<Option<RunningLoop>>,
}

impl ProcessorService {
    pub fn new(
        processor: Arc<AnalysisProcessor>,
        store: Arc<dyn Store>,
        config: ProcessorConfig,
    ) -> Self {
        let worker_id = config
            .worker_id
            .clone()
            .unwrap_or_else(|| format!("processor-{}", Uuid::new_v4()));
        Self {
            processor,
            store,
            config,
            worker_id,
            running: Mutex::new(None),
        }
    }

    /// Start the loop. `interval` falls back to the default when absent.
    pub async fn start(&self, interval: Option<Duration>) -> Result<(), ProcessorError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(ProcessorError::AlreadyRunning);
        }

        let interval = interval.unwrap_or(DEFAULT_TICK_INTERVAL);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            self.processor.clone(),
            self.store.clone(),
            self.config.clone(),
            self.worker_id.clone(),
            interval,
            cancel.clone(),
        ));

        info!(
            worker_id = %self.worker_id,
            interval_ms = interval.as_millis() as u64,
            "Processor loop started"
        );
        *running = Some(RunningLoop {
            cancel,
            handle,
            interval,
        });
        Ok(())
    }

    /// Stop the loop. No new jobs are claimed; the job in flight runs to
    /// its terminal state before the task exits.
    pub async fn stop(&self) -> Result<(), ProcessorError> {
        let mut running = self.running.lock().await;
        let current = running.take().ok_or(ProcessorError::NotRunning)?;
        current.cancel.cancel();
        if let Err(e) = current.handle.await {
            warn!(error = %e, "Processor loop task ended abnormally");
        }
        info!(worker_id = %self.worker_id, "Processor loop stopped");
        Ok(())
    }

    /// Stop if running, then start with a fresh interval.
    pub async fn restart(&self, interval: Option<Duration>) -> Result<(), ProcessorError> {
        match self.stop().await {
            Ok(()) | Err(ProcessorError::NotRunning) => {}
            Err(e) => return Err(e),
        }
        self.start(interval).await
    }

    pub async fn status(&self) -> ProcessorStatus {
        let running = self.running.lock().await;
        match running.as_ref() {
            Some(current) => ProcessorStatus {
                running: true,
                interval_ms: current.interval.as_millis() as u64,
                worker_id: self.worker_id.clone(),
            },
            None => ProcessorStatus {
                running: false,
                interval_ms: DEFAULT_TICK_INTERVAL.as_millis() as u64,
                worker_id: self.worker_id.clone(),
            },
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }
}

async fn run_loop(
    processor: Arc<AnalysisProcessor>,
    store: Arc<dyn Store>,
    config: ProcessorConfig,
    worker_id: String,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let jobs = match claim_batch(&store, &config, &worker_id).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "Failed to claim jobs");
                Vec::new()
            }
        };

        if !jobs.is_empty() {
            debug!(count = jobs.len(), "Claimed jobs");
            counter!(format!("{}_jobs_claimed_total", METRICS_PREFIX))
                .increment(jobs.len() as u64);
        }

        for job in jobs {
            if let Err(e) = processor.run_job(&job).await {
                error!(job_id = %job.id, error = %e, "Job run failed");
            }
            // Stop claiming between jobs, never mid-job
            if cancel.is_cancelled() {
                return;
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// One tick's worth of work: orphaned PROCESSING jobs first, then fresh
/// PENDING ones, both bounded by the claim batch size.
async fn claim_batch(
    store: &Arc<dyn Store>,
    config: &ProcessorConfig,
    worker_id: &str,
) -> dossier_common::Result<Vec<BackgroundJob>> {
    let cutoff = Utc::now() - chrono::Duration::seconds(config.reclaim_after_secs as i64);
    let mut jobs = store
        .reclaim_abandoned_jobs(worker_id, cutoff, config.claim_batch)
        .await?;
    if !jobs.is_empty() {
        info!(count = jobs.len(), "Reclaimed abandoned jobs");
    }

    let remaining = config.claim_batch.saturating_sub(jobs.len() as u64);
    if remaining > 0 {
        jobs.extend(store.claim_pending_jobs(worker_id, remaining).await?);
    }
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dossier_common::analyzer::MockAnalyzer;
    use dossier_common::db::models::{JobStatus, JobType};
    use dossier_common::storage::MemBlobSource;
    use dossier_common::store::MemStore;

    async fn service_with_one_pending_job() -> (ProcessorService, Arc<MemStore>, Uuid) {
        let store = Arc::new(MemStore::new());
        let blobs = Arc::new(MemBlobSource::new());
        let project = store.insert_project("p").await.unwrap();
        blobs.insert("d.txt", "Document body.").await;
        store
            .insert_document(project.id, "contract", 14, "d.txt")
            .await
            .unwrap();
        let job = store
            .create_job(project.id, JobType::DocumentAnalysis, 1, None)
            .await
            .unwrap();

        let config = ProcessorConfig {
            claim_batch: 10,
            worker_concurrency: 2,
            max_chunk_size: 10_000,
            ..Default::default()
        };
        let processor = Arc::new(AnalysisProcessor::new(
            store.clone(),
            Arc::new(MockAnalyzer::new()),
            blobs,
            config.clone(),
            Duration::from_secs(5),
        ));
        let service = ProcessorService::new(processor, store.clone(), config);
        (service, store, job.id)
    }

    #[tokio::test]
    async fn test_loop_picks_up_and_completes_jobs() {
        let (service, store, job_id) = service_with_one_pending_job().await;

        service.start(Some(Duration::from_millis(10))).await.unwrap();
        // Give the loop a few ticks
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let job = store.find_job(job_id).await.unwrap().unwrap();
            if job.is_terminal() {
                break;
            }
        }
        service.stop().await.unwrap();

        let job = store.find_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.job_status(), JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let (service, _, _) = service_with_one_pending_job().await;
        service.start(None).await.unwrap();
        assert!(matches!(
            service.start(None).await.unwrap_err(),
            ProcessorError::AlreadyRunning
        ));
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_without_start_rejected() {
        let (service, _, _) = service_with_one_pending_job().await;
        assert!(matches!(
            service.stop().await.unwrap_err(),
            ProcessorError::NotRunning
        ));
    }

    #[tokio::test]
    async fn test_status_reflects_interval() {
        let (service, _, _) = service_with_one_pending_job().await;

        let status = service.status().await;
        assert!(!status.running);
        assert_eq!(status.interval_ms, 30_000);

        service.start(Some(Duration::from_millis(500))).await.unwrap();
        let status = service.status().await;
        assert!(status.running);
        assert_eq!(status.interval_ms, 500);

        service.stop().await.unwrap();
        assert!(!service.status().await.running);
    }

    #[tokio::test]
    async fn test_restart_changes_interval() {
        let (service, _, _) = service_with_one_pending_job().await;

        // Restart works from stopped
        service.restart(Some(Duration::from_millis(100))).await.unwrap();
        assert_eq!(service.status().await.interval_ms, 100);

        service.restart(Some(Duration::from_millis(200))).await.unwrap();
        assert_eq!(service.status().await.interval_ms, 200);
        service.stop().await.unwrap();
    }
}
