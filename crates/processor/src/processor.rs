//! Analysis processor
//!
//! Runs one background job end to end: plans the unit set, fans work
//! out to the analyzer, records progress after every unit, and settles
//! the job as completed or failed. A unit is one document, or one chunk
//! of an oversized document; the deterministic chunker guarantees a
//! retry sees the identical unit plan.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dossier_common::analyzer::{AnalysisOutcome, AnalysisRequest, Analyzer};
use dossier_common::config::ProcessorConfig;
use dossier_common::db::models::{BackgroundJob, Document, JobDetail, JobType};
use dossier_common::errors::{AppError, Result};
use dossier_common::metrics::{record_job_outcome, record_unit};
use dossier_common::storage::BlobSource;
use dossier_common::store::Store;
use dossier_common::JobLifecycle;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Outcome of running one document's units.
struct DocumentRun {
    document_id: Uuid,
    /// Result write lost to a concurrent run; nothing to record
    skipped: bool,
    failures: Vec<String>,
}

/// Analysis processor
pub struct AnalysisProcessor {
    store: Arc<dyn Store>,
    analyzer: Arc<dyn Analyzer>,
    blobs: Arc<dyn BlobSource>,
    lifecycle: JobLifecycle,
    config: ProcessorConfig,
    unit_timeout: Duration,
}

impl AnalysisProcessor {
    pub fn new(
        store: Arc<dyn Store>,
        analyzer: Arc<dyn Analyzer>,
        blobs: Arc<dyn BlobSource>,
        config: ProcessorConfig,
        unit_timeout: Duration,
    ) -> Self {
        let lifecycle = JobLifecycle::new(store.clone());
        Self {
            store,
            analyzer,
            blobs,
            lifecycle,
            config,
            unit_timeout,
        }
    }

    /// Create a PENDING analysis job for a project. The unit count is
    /// taken now and fixed for the job's lifetime: one unit per pending
    /// document, or one per chunk for documents above the chunk limit.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub async fn enqueue_analysis(
        &self,
        project_id: Uuid,
        job_type: JobType,
    ) -> Result<BackgroundJob> {
        let pending = self.plan_documents(project_id).await?;
        let total_units = self.count_units(&pending).await?;
        let detail = match job_type {
            JobType::DocumentAnalysis => JobDetail::DocumentAnalysis {
                analyzer_model: Some(self.analyzer.model_name().to_string()),
            },
            JobType::Reanalysis => JobDetail::Reanalysis { requested_by: None },
        };
        self.lifecycle
            .create(project_id, job_type, total_units, Some(detail))
            .await
    }

    /// Documents that still need analysis.
    async fn plan_documents(&self, project_id: Uuid) -> Result<Vec<Document>> {
        let documents = self.store.documents_for_project(project_id).await?;
        Ok(documents.into_iter().filter(|d| !d.is_analyzed()).collect())
    }

    /// Total unit count across the given documents. Chunking is
    /// deterministic, so a later run recomputes the identical plan.
    async fn count_units(&self, documents: &[Document]) -> Result<i32> {
        let mut total = 0i32;
        for document in documents {
            let text = self.blobs.fetch_text(&document.storage_key).await?;
            let chunks = crate::chunker::chunk_text(&text, self.config.max_chunk_size);
            total += chunks.len().max(1) as i32;
        }
        Ok(total)
    }

    /// Run a claimed job to a terminal state.
    ///
    /// Resumable: documents that already carry a result are skipped, so
    /// a job interrupted mid-run picks up where the counters left off.
    #[instrument(skip(self, job), fields(job_id = %job.id, project_id = %job.project_id))]
    pub async fn run_job(&self, job: &BackgroundJob) -> Result<BackgroundJob> {
        let pending = self.plan_documents(job.project_id).await?;
        info!(
            total_units = job.total_units,
            processed_units = job.processed_units,
            pending_documents = pending.len(),
            "Running analysis job"
        );

        if job.total_units == 0 {
            let finished = self.lifecycle.complete(job.id).await?;
            self.finish_project(job.project_id).await;
            record_job_outcome(&job.job_type, true);
            return Ok(finished);
        }

        let mut failures: Vec<(Uuid, String)> = Vec::new();

        let mut runs = stream::iter(pending)
            .map(|document| async move { self.process_document(job, &document).await })
            .buffer_unordered(self.config.worker_concurrency);

        while let Some(run) = runs.next().await {
            if run.skipped {
                debug!(document_id = %run.document_id, "Document already analyzed, skipped");
            }
            for failure in run.failures {
                failures.push((run.document_id, failure));
            }
        }
        drop(runs);

        if failures.is_empty() {
            let finished = self.settle_complete(job).await?;
            self.finish_project(job.project_id).await;
            record_job_outcome(&job.job_type, true);
            info!("Analysis job completed");
            Ok(finished)
        } else {
            let reason = failure_summary(&failures);
            let finished = self.lifecycle.fail(job.id, &reason).await?;
            record_job_outcome(&job.job_type, false);
            warn!(failed_units = failures.len(), "Analysis job failed");
            Ok(finished)
        }
    }

    /// Analyze every unit of one document, advancing the job per unit,
    /// then persist the merged result. Unit failures are collected, not
    /// raised: the remaining units (and documents) keep going.
    async fn process_document(&self, job: &BackgroundJob, document: &Document) -> DocumentRun {
        let mut run = DocumentRun {
            document_id: document.id,
            skipped: false,
            failures: Vec::new(),
        };

        let text = match self.blobs.fetch_text(&document.storage_key).await {
            Ok(text) => text,
            Err(e) => {
                self.record_failure(&mut run, &job.job_type, 0.0, e);
                return run;
            }
        };
        let chunks = crate::chunker::chunk_text(&text, self.config.max_chunk_size);

        let mut parts = Vec::with_capacity(chunks.len().max(1));
        if chunks.len() <= 1 {
            let content = chunks.into_iter().next().map(|c| c.content).unwrap_or_default();
            match self.analyze_unit(job, document, None, content).await {
                Ok(part) => parts.push(part),
                Err((elapsed, e)) => self.record_failure(&mut run, &job.job_type, elapsed, e),
            }
        } else {
            for chunk in chunks {
                match self
                    .analyze_unit(job, document, Some(chunk.index), chunk.content)
                    .await
                {
                    Ok(part) => parts.push(part),
                    Err((elapsed, e)) => self.record_failure(&mut run, &job.job_type, elapsed, e),
                }
            }
        }

        if !run.failures.is_empty() {
            return run;
        }

        let outcome = merge_chunk_outcomes(parts);
        let result = serde_json::json!({
            "summary": outcome.summary,
            "findings": outcome.findings,
            "model": outcome.model,
        });

        // Write-once: losing the race to a concurrent run is a skip,
        // not an error.
        match self.store.set_document_analysis(document.id, result).await {
            Ok(true) => {}
            Ok(false) => {
                run.skipped = true;
                return run;
            }
            Err(e) => {
                self.record_failure(&mut run, &job.job_type, 0.0, e);
                return run;
            }
        }

        let fragment = serde_json::json!({
            "document_id": document.id,
            "doc_type": document.doc_type,
            "summary": outcome.summary,
        });
        if let Err(e) = self
            .store
            .merge_project_analysis(document.project_id, fragment)
            .await
        {
            self.record_failure(&mut run, &job.job_type, 0.0, e);
        }
        run
    }

    /// One analyzer call under the per-unit timeout; the job advances by
    /// one on success.
    async fn analyze_unit(
        &self,
        job: &BackgroundJob,
        document: &Document,
        chunk_index: Option<i32>,
        text: String,
    ) -> std::result::Result<AnalysisOutcome, (f64, AppError)> {
        let request = AnalysisRequest {
            document_id: document.id,
            chunk_index,
            doc_type: document.doc_type.clone(),
            text,
        };
        let started = Instant::now();
        let result = match tokio::time::timeout(self.unit_timeout, self.analyzer.analyze(&request))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(AppError::AnalyzerTimeout {
                timeout_ms: self.unit_timeout.as_millis() as u64,
            }),
        };
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(outcome) => {
                record_unit(elapsed, &job.job_type, true);
                // A lost progress write costs accuracy, not correctness,
                // so the run continues.
                if let Err(e) = self.lifecycle.advance(job.id, 1).await {
                    warn!(job_id = %job.id, error = %e, "Failed to record unit progress");
                }
                Ok(outcome)
            }
            Err(e) => Err((elapsed, e)),
        }
    }

    fn record_failure(&self, run: &mut DocumentRun, job_type: &str, elapsed: f64, error: AppError) {
        if error.is_transient_unit_failure() {
            warn!(document_id = %run.document_id, error = %error, "Unit failed");
        } else {
            error!(document_id = %run.document_id, error = %error, "Unit hit a non-transient error");
        }
        record_unit(elapsed, job_type, false);
        run.failures.push(error.to_string());
    }

    /// Transition a fully-processed job to COMPLETED. Retries advance
    /// drift once: if progress writes were lost, reconcile the counter
    /// from the units actually done before giving up.
    async fn settle_complete(&self, job: &BackgroundJob) -> Result<BackgroundJob> {
        match self.lifecycle.complete(job.id).await {
            Err(AppError::IncompleteJob { processed, total, .. }) => {
                let deficit = total - processed;
                if deficit > 0 {
                    warn!(deficit, "Reconciling lost progress writes before completion");
                    self.lifecycle.advance(job.id, deficit).await?;
                }
                self.lifecycle.complete(job.id).await
            }
            other => other,
        }
    }

    /// Promote the project out of draft once analysis lands.
    async fn finish_project(&self, project_id: Uuid) {
        match self.store.promote_project_if_draft(project_id).await {
            Ok(true) => info!(project_id = %project_id, "Project promoted to active"),
            Ok(false) => {}
            Err(e) => warn!(project_id = %project_id, error = %e, "Project promotion failed"),
        }
    }

    pub fn lifecycle(&self) -> &JobLifecycle {
        &self.lifecycle
    }
}

fn failure_summary(failures: &[(Uuid, String)]) -> String {
    let detail: Vec<String> = failures
        .iter()
        .take(5)
        .map(|(id, err)| format!("{}: {}", id, err))
        .collect();
    let mut reason = format!("{} unit(s) failed [{}]", failures.len(), detail.join("; "));
    reason.truncate(1000);
    reason
}

/// Collapse per-chunk outcomes into one document-level outcome.
fn merge_chunk_outcomes(parts: Vec<AnalysisOutcome>) -> AnalysisOutcome {
    if parts.len() == 1 {
        return parts.into_iter().next().unwrap_or_else(|| AnalysisOutcome {
            summary: String::new(),
            findings: serde_json::Value::Null,
            model: String::new(),
        });
    }
    let model = parts
        .first()
        .map(|p| p.model.clone())
        .unwrap_or_default();
    let summary = parts
        .iter()
        .map(|p| p.summary.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let findings = serde_json::Value::Array(parts.into_iter().map(|p| p.findings).collect());
    AnalysisOutcome {
        summary,
        findings,
        model,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dossier_common::analyzer::MockAnalyzer;
    use dossier_common::db::models::JobStatus;
    use dossier_common::storage::MemBlobSource;
    use dossier_common::store::MemStore;

    struct Harness {
        store: Arc<MemStore>,
        blobs: Arc<MemBlobSource>,
        project_id: Uuid,
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemStore::new());
        let blobs = Arc::new(MemBlobSource::new());
        let project = store.insert_project("acme-diligence").await.unwrap();
        Harness {
            store,
            blobs,
            project_id: project.id,
        }
    }

    fn processor(h: &Harness, analyzer: MockAnalyzer) -> AnalysisProcessor {
        let config = ProcessorConfig {
            worker_concurrency: 2,
            max_chunk_size: 10_000,
            ..Default::default()
        };
        AnalysisProcessor::new(
            h.store.clone(),
            Arc::new(analyzer),
            h.blobs.clone(),
            config,
            Duration::from_secs(5),
        )
    }

    async fn add_document(h: &Harness, key: &str, body: &str) -> Document {
        h.blobs.insert(key, body).await;
        h.store
            .insert_document(h.project_id, "contract", body.len() as i64, key)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_happy_path_completes_and_promotes() {
        let h = harness().await;
        add_document(&h, "a.txt", "First agreement body.").await;
        add_document(&h, "b.txt", "Second agreement body.").await;

        let p = processor(&h, MockAnalyzer::new());
        let job = p
            .enqueue_analysis(h.project_id, JobType::DocumentAnalysis)
            .await
            .unwrap();
        assert_eq!(job.total_units, 2);

        let finished = p.run_job(&job).await.unwrap();
        assert_eq!(finished.job_status(), JobStatus::Completed);
        assert_eq!(finished.processed_units, 2);
        assert_eq!(finished.progress_percent, 100.0);

        for doc in h.store.documents_for_project(h.project_id).await.unwrap() {
            assert!(doc.is_analyzed());
        }
        let project = h.store.find_project(h.project_id).await.unwrap().unwrap();
        assert_eq!(project.status, "active");
        let summary = project.analysis_summary.unwrap();
        assert_eq!(summary.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_partial_failure_fails_job_with_summary() {
        let h = harness().await;
        let good = add_document(&h, "good.txt", "Fine document.").await;
        let bad = add_document(&h, "bad.txt", "Poison document.").await;

        let p = processor(&h, MockAnalyzer::new().failing(bad.id.to_string()));
        let job = p
            .enqueue_analysis(h.project_id, JobType::DocumentAnalysis)
            .await
            .unwrap();

        let finished = p.run_job(&job).await.unwrap();
        assert_eq!(finished.job_status(), JobStatus::Failed);
        let reason = finished.error_message.unwrap();
        assert!(reason.contains("1 unit(s) failed"));
        assert!(reason.contains(&bad.id.to_string()));

        // The good unit still landed its result and its progress
        let good = h.store.find_document(good.id).await.unwrap().unwrap();
        assert!(good.is_analyzed());
        assert_eq!(finished.processed_units, 1);
    }

    #[tokio::test]
    async fn test_resume_skips_analyzed_documents() {
        let h = harness().await;
        let first = add_document(&h, "one.txt", "Document one.").await;
        add_document(&h, "two.txt", "Document two.").await;

        let analyzer = MockAnalyzer::new();
        let p = processor(&h, analyzer);
        let job = p
            .enqueue_analysis(h.project_id, JobType::DocumentAnalysis)
            .await
            .unwrap();

        // Simulate a prior partial run: first document done and counted
        h.store
            .set_document_analysis(first.id, serde_json::json!({"summary": "done"}))
            .await
            .unwrap();
        h.store.advance_job(job.id, 1).await.unwrap();

        let job = h.store.find_job(job.id).await.unwrap().unwrap();
        let finished = p.run_job(&job).await.unwrap();
        assert_eq!(finished.job_status(), JobStatus::Completed);
        assert_eq!(finished.processed_units, 2);
    }

    #[tokio::test]
    async fn test_zero_unit_job_completes_immediately() {
        let h = harness().await;
        let p = processor(&h, MockAnalyzer::new());
        let job = p
            .enqueue_analysis(h.project_id, JobType::DocumentAnalysis)
            .await
            .unwrap();
        assert_eq!(job.total_units, 0);
        assert_eq!(job.progress_percent, 100.0);

        let finished = p.run_job(&job).await.unwrap();
        assert_eq!(finished.job_status(), JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_oversized_document_counts_one_unit_per_chunk() {
        let h = harness().await;
        let body = format!(
            "{}\n\n{}\n\n{}",
            "First part. ".repeat(800),
            "Second part. ".repeat(800),
            "Third part. ".repeat(800)
        );
        assert!(body.chars().count() > 10_000);
        let expected_units = crate::chunker::chunk_text(&body, 10_000).len() as i32;
        assert!(expected_units > 1);
        let doc = add_document(&h, "big.txt", &body).await;

        let p = processor(&h, MockAnalyzer::new());
        let job = p
            .enqueue_analysis(h.project_id, JobType::DocumentAnalysis)
            .await
            .unwrap();
        assert_eq!(job.total_units, expected_units);

        let finished = p.run_job(&job).await.unwrap();
        assert_eq!(finished.job_status(), JobStatus::Completed);
        assert_eq!(finished.processed_units, expected_units);

        let doc = h.store.find_document(doc.id).await.unwrap().unwrap();
        let result = doc.analysis_result.unwrap();
        let findings = result["findings"].as_array().unwrap();
        assert_eq!(findings.len(), expected_units as usize);
        assert!(result["summary"].as_str().unwrap().contains('\n'));
    }

    #[tokio::test]
    async fn test_chunk_failure_fails_only_that_unit() {
        let h = harness().await;
        let body = format!(
            "{}\n\n{}",
            "Alpha section. ".repeat(800),
            "Beta section. ".repeat(800)
        );
        let chunk_count = crate::chunker::chunk_text(&body, 10_000).len() as i32;
        assert!(chunk_count >= 2);
        let doc = add_document(&h, "big.txt", &body).await;

        // Fail only the first chunk of the document
        let p = processor(&h, MockAnalyzer::new().failing(format!("{}#0", doc.id)));
        let job = p
            .enqueue_analysis(h.project_id, JobType::DocumentAnalysis)
            .await
            .unwrap();

        let finished = p.run_job(&job).await.unwrap();
        assert_eq!(finished.job_status(), JobStatus::Failed);
        // The other chunks still advanced progress
        assert_eq!(finished.processed_units, chunk_count - 1);
        // A partially-analyzed document gets no result
        let doc = h.store.find_document(doc.id).await.unwrap().unwrap();
        assert!(!doc.is_analyzed());
    }

    #[tokio::test]
    async fn test_unit_timeout_fails_the_unit() {
        let h = harness().await;
        add_document(&h, "slow.txt", "Takes forever.").await;

        let analyzer = MockAnalyzer::new().with_delay(Duration::from_millis(200));
        let config = ProcessorConfig {
            worker_concurrency: 1,
            max_chunk_size: 10_000,
            ..Default::default()
        };
        let p = AnalysisProcessor::new(
            h.store.clone(),
            Arc::new(analyzer),
            h.blobs.clone(),
            config,
            Duration::from_millis(20),
        );

        let job = p
            .enqueue_analysis(h.project_id, JobType::DocumentAnalysis)
            .await
            .unwrap();
        let finished = p.run_job(&job).await.unwrap();
        assert_eq!(finished.job_status(), JobStatus::Failed);
        assert!(finished.error_message.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_rejected() {
        let h = harness().await;
        add_document(&h, "x.txt", "Body.").await;
        let p = processor(&h, MockAnalyzer::new());

        p.enqueue_analysis(h.project_id, JobType::DocumentAnalysis)
            .await
            .unwrap();
        let err = p
            .enqueue_analysis(h.project_id, JobType::DocumentAnalysis)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateActiveJob { .. }));
    }
}
