//! Analysis service abstraction
//!
//! Provides a unified interface to the document analysis backend:
//! - HTTP (the hosted analysis API)
//! - Mock (deterministic, scriptable, for tests)

use crate::config::AnalyzerConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// One unit of analyzable text. `chunk_index` is set when the unit is a
/// chunk of a larger document rather than the whole body.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    pub document_id: Uuid,
    pub chunk_index: Option<i32>,
    pub doc_type: String,
    pub text: String,
}

impl AnalysisRequest {
    /// Key used by the mock to script per-unit failures.
    pub fn unit_key(&self) -> String {
        match self.chunk_index {
            Some(i) => format!("{}#{}", self.document_id, i),
            None => self.document_id.to_string(),
        }
    }
}

/// Structured result of analyzing one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub summary: String,
    pub findings: serde_json::Value,
    pub model: String,
}

/// Trait for document analysis
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Analyze a single unit of text
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisOutcome>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// HTTP analysis client
pub struct HttpAnalyzer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    document_id: String,
    doc_type: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    summary: String,
    #[serde(default)]
    findings: serde_json::Value,
}

impl HttpAnalyzer {
    pub fn new(
        api_key: String,
        model: String,
        base_url: Option<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| "https://api.dossier.dev/v1".to_string()),
            max_retries,
        })
    }

    /// Make request with retry
    async fn request_with_retry(&self, request: &AnalysisRequest) -> Result<AnalysisOutcome> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                // Exponential backoff
                let delay = Duration::from_millis(100 * (2_u64.pow(attempt)));
                tokio::time::sleep(delay).await;
            }

            match self.make_request(request).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        document_id = %request.document_id,
                        error = %e,
                        "Analysis request failed, retrying"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::AnalyzerError {
            message: "Unknown error after retries".to_string(),
        }))
    }

    async fn make_request(&self, request: &AnalysisRequest) -> Result<AnalysisOutcome> {
        let url = format!("{}/analyze", self.base_url);

        let body = ApiRequest {
            model: &self.model,
            document_id: request.unit_key(),
            doc_type: &request.doc_type,
            text: &request.text,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::AnalyzerError {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::AnalyzerError {
                message: format!("API error {}: {}", status, text),
            });
        }

        let result: ApiResponse =
            response.json().await.map_err(|e| AppError::AnalyzerError {
                message: format!("Failed to parse response: {}", e),
            })?;

        Ok(AnalysisOutcome {
            summary: result.summary,
            findings: result.findings,
            model: self.model.clone(),
        })
    }
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisOutcome> {
        self.request_with_retry(request).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Mock analyzer for testing. Fails the unit keys it was told to fail
/// and answers everything else deterministically.
pub struct MockAnalyzer {
    failing_units: HashSet<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockAnalyzer {
    pub fn new() -> Self {
        Self {
            failing_units: HashSet::new(),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Script a failure for a unit key (document id, or `id#chunk`).
    pub fn failing(mut self, unit_key: impl Into<String>) -> Self {
        self.failing_units.insert(unit_key.into());
        self
    }

    /// Add a fixed delay to every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Analyzer for MockAnalyzer {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let key = request.unit_key();
        if self.failing_units.contains(&key) {
            return Err(AppError::AnalyzerError {
                message: format!("scripted failure for {}", key),
            });
        }
        Ok(AnalysisOutcome {
            summary: format!("Summary of {} ({} chars)", key, request.text.chars().count()),
            findings: serde_json::json!({
                "doc_type": request.doc_type,
                "char_count": request.text.chars().count(),
            }),
            model: "mock-analyzer".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "mock-analyzer"
    }
}

/// Create an analyzer based on configuration
pub fn create_analyzer(config: &AnalyzerConfig) -> Result<Arc<dyn Analyzer>> {
    match config.provider.as_str() {
        "http" => {
            let key = config
                .api_key
                .clone()
                .ok_or_else(|| AppError::Configuration {
                    message: "analyzer.api_key required for the http provider".to_string(),
                })?;
            Ok(Arc::new(HttpAnalyzer::new(
                key,
                config.model.clone(),
                config.api_base.clone(),
                Duration::from_secs(config.timeout_secs),
                config.max_retries,
            )?))
        }
        "mock" => Ok(Arc::new(MockAnalyzer::new())),
        other => {
            tracing::warn!(provider = other, "Unknown analyzer provider, using mock");
            Ok(Arc::new(MockAnalyzer::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(text: &str) -> AnalysisRequest {
        AnalysisRequest {
            document_id: Uuid::new_v4(),
            chunk_index: None,
            doc_type: "contract".to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_mock_analyzer_answers() {
        let analyzer = MockAnalyzer::new();
        let outcome = analyzer.analyze(&request("some text")).await.unwrap();
        assert!(outcome.summary.contains("9 chars"));
        assert_eq!(outcome.model, "mock-analyzer");
        assert_eq!(analyzer.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_scripted_failure() {
        let req = request("body");
        let analyzer = MockAnalyzer::new().failing(req.document_id.to_string());
        let err = analyzer.analyze(&req).await.unwrap_err();
        assert!(matches!(err, AppError::AnalyzerError { .. }));
    }

    #[tokio::test]
    async fn test_chunk_unit_keys_are_distinct() {
        let mut req = request("chunked");
        req.chunk_index = Some(0);
        let whole_key = req.document_id.to_string();
        assert_ne!(req.unit_key(), whole_key);

        let analyzer = MockAnalyzer::new().failing(req.unit_key());
        assert!(analyzer.analyze(&req).await.is_err());

        req.chunk_index = Some(1);
        assert!(analyzer.analyze(&req).await.is_ok());
    }
}
