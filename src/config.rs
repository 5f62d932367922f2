//! Configuration management for the model server and promotion orchestrator

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the optional configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`]
pub const CONFIG_PATH_ENV: &str = "FRAUD_CONFIG";

/// Which object store holds the authoritative artifacts
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryBackend {
    /// Artifacts live in `local_dir`
    #[default]
    Local,
    /// Artifacts live in the remote object store
    Remote,
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub repository: RepositoryConfig,
    pub orchestrator: OrchestratorConfig,
    pub logging: LoggingConfig,
}

/// Inference HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind
    pub listen_addr: String,
    /// Upper bound for a single `/reload`
    pub reload_timeout_ms: u64,
    /// Interval between metrics summaries in the log (0 disables)
    pub metrics_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            reload_timeout_ms: 10_000,
            metrics_interval_secs: 60,
        }
    }
}

impl ServerConfig {
    pub fn reload_timeout(&self) -> Duration {
        Duration::from_millis(self.reload_timeout_ms)
    }
}

/// Artifact repository configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub backend: RepositoryBackend,
    /// Local artifact directory (authoritative for `local`, unused for `remote`)
    pub local_dir: PathBuf,
    /// With the local backend, mirror every write to the remote store
    pub mirror_to_remote: bool,
    pub remote: RemoteStoreConfig,
    pub retry: RetryConfig,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            backend: RepositoryBackend::Local,
            local_dir: PathBuf::from("artifacts"),
            mirror_to_remote: false,
            remote: RemoteStoreConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Remote object store endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteStoreConfig {
    /// Base URL of the object store, e.g. `http://minio:9000`
    pub endpoint: String,
    /// Bucket holding the artifact sets
    pub bucket: String,
    /// Optional bearer token
    pub token: Option<String>,
}

impl Default for RemoteStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            bucket: "fraud-models".to_string(),
            token: None,
        }
    }
}

/// Bounded retry for remote store calls
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Per-request timeout
    pub request_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 2_000,
            request_timeout_ms: 5_000,
        }
    }
}

/// Promotion cycle configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Seconds between scheduled cycles
    pub interval_secs: u64,
    /// Run a single cycle and exit
    pub run_once: bool,
    /// Directory the training job exports candidates into
    pub candidate_dir: PathBuf,
    /// Number of evenly spaced thresholds scanned during calibration
    pub calibration_steps: usize,
    /// Promote when candidate and champion scores are equal
    pub promote_on_tie: bool,
    /// Base URL of the inference service; unset means no reload notification
    pub reload_url: Option<String>,
    pub notify_timeout_ms: u64,
    pub promote_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 7 * 24 * 60 * 60,
            run_once: false,
            candidate_dir: PathBuf::from("export/candidate"),
            calibration_steps: 100,
            promote_on_tie: false,
            reload_url: None,
            notify_timeout_ms: 10_000,
            promote_timeout_ms: 60_000,
        }
    }
}

impl OrchestratorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }

    pub fn promote_timeout(&self) -> Duration {
        Duration::from_millis(self.promote_timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `FRAUD_CONFIG` or the default path, then environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path; a missing file falls back to defaults.
    ///
    /// Environment variables such as `FRAUD__SERVER__LISTEN_ADDR` override file values.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(Environment::with_prefix("FRAUD").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}
