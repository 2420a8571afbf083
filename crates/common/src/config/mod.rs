//! Configuration management for Dossier services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Analyzer service configuration
    pub analyzer: AnalyzerConfig,

    /// Blob storage configuration
    pub storage: StorageConfig,

    /// Processor loop configuration
    pub processor: ProcessorConfig,

    /// Stuck-job detector configuration
    pub detector: DetectorConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalyzerConfig {
    /// Analyzer provider: http, mock
    #[serde(default = "default_analyzer_provider")]
    pub provider: String,

    /// API key for the inference service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to request
    #[serde(default = "default_analyzer_model")]
    pub model: String,

    /// Per-call timeout in seconds
    #[serde(default = "default_analyzer_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries per call
    #[serde(default = "default_analyzer_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root directory for locally stored document text
    #[serde(default = "default_storage_root")]
    pub root: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessorConfig {
    /// Loop tick interval in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Maximum jobs claimed per tick
    #[serde(default = "default_claim_batch")]
    pub claim_batch: u64,

    /// Concurrent analyzer calls per job
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Documents above this many characters are chunked
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    /// Processing jobs with no progress for this long may be
    /// re-claimed by a live loop
    #[serde(default = "default_reclaim_after")]
    pub reclaim_after_secs: u64,

    /// Worker identifier (defaults to a per-process id)
    pub worker_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetectorConfig {
    /// Sweep interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Jobs with no progress for this long are stuck
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_max_connections() -> u32 { 50 }
fn default_min_connections() -> u32 { 5 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_analyzer_provider() -> String { "http".to_string() }
fn default_analyzer_model() -> String { "dossier-analyst-1".to_string() }
fn default_analyzer_timeout() -> u64 { 60 }
fn default_analyzer_retries() -> u32 { 3 }
fn default_storage_root() -> String { "./data/blobs".to_string() }
fn default_tick_interval_ms() -> u64 { 30_000 }
fn default_claim_batch() -> u64 { 10 }
fn default_worker_concurrency() -> usize { 4 }
fn default_max_chunk_size() -> usize { 30_000 }
fn default_reclaim_after() -> u64 { 300 }
fn default_sweep_interval() -> u64 { 1_800 }
fn default_stale_after() -> u64 { 1_800 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_service_name() -> String { "dossier".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__PROCESSOR__TICK_INTERVAL_MS=5000
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get the per-call analyzer timeout as Duration
    pub fn analyzer_timeout(&self) -> Duration {
        Duration::from_secs(self.analyzer.timeout_secs)
    }

    /// Get the loop tick interval as Duration
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.processor.tick_interval_ms)
    }

    /// Get the staleness threshold as Duration
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.detector.stale_after_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            claim_batch: default_claim_batch(),
            worker_concurrency: default_worker_concurrency(),
            max_chunk_size: default_max_chunk_size(),
            reclaim_after_secs: default_reclaim_after(),
            worker_id: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/dossier".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            analyzer: AnalyzerConfig {
                provider: default_analyzer_provider(),
                api_key: None,
                api_base: None,
                model: default_analyzer_model(),
                timeout_secs: default_analyzer_timeout(),
                max_retries: default_analyzer_retries(),
            },
            storage: StorageConfig {
                root: default_storage_root(),
            },
            processor: ProcessorConfig::default(),
            detector: DetectorConfig {
                sweep_interval_secs: default_sweep_interval(),
                stale_after_secs: default_stale_after(),
            },
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logging: default_json_logging(),
                service_name: default_service_name(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.processor.tick_interval_ms, 30_000);
        assert_eq!(config.detector.stale_after_secs, 1_800);
        assert_eq!(config.processor.max_chunk_size, 30_000);
    }

    #[test]
    fn test_read_database_fallback() {
        let config = AppConfig::default();
        assert_eq!(config.read_database_url(), "postgres://localhost/dossier");
    }
}
