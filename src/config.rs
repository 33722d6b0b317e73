//! Service and background-removal configuration
//!
//! Configuration is layered: defaults, then an optional JSON file, then
//! `BG_CHANGER_*` environment variables. The binary applies its command-line flags
//! on top of the result.

use crate::{
    error::{BgChangerError, Result},
    models::{ModelSource, PreprocessingConfig},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "BG_CHANGER_";

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

impl std::str::FromStr for ExecutionProvider {
    type Err = BgChangerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "coreml" => Ok(Self::CoreMl),
            other => Err(BgChangerError::invalid_config(format!(
                "unknown execution provider '{}' (expected auto, cpu, cuda or coreml)",
                other
            ))),
        }
    }
}

/// Inference engine used for segmentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// ONNX Runtime
    Onnx,
    /// Tract (pure Rust)
    Tract,
}

impl Default for BackendType {
    fn default() -> Self {
        if cfg!(feature = "onnx") {
            Self::Onnx
        } else {
            Self::Tract
        }
    }
}

impl std::str::FromStr for BackendType {
    type Err = BgChangerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "onnx" => Ok(Self::Onnx),
            "tract" => Ok(Self::Tract),
            other => Err(BgChangerError::invalid_config(format!(
                "unknown backend '{}' (expected onnx or tract)",
                other
            ))),
        }
    }
}

/// Configuration of the segmentation session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemovalConfig {
    /// Inference engine
    pub backend: BackendType,

    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,

    /// Model path or URL
    pub model: ModelSource,

    /// Optional SHA-256 hex digest the model must match
    pub model_sha256: Option<String>,

    /// Model input preprocessing
    pub preprocessing: PreprocessingConfig,

    /// Stretch the predicted mask to the full `[0, 1]` range before use
    pub normalize_mask: bool,

    /// How many times the extractor runs on its own output (1 = single pass)
    pub passes: u8,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,
}

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            execution_provider: ExecutionProvider::default(),
            model: ModelSource::default(),
            model_sha256: None,
            preprocessing: PreprocessingConfig::default(),
            normalize_mask: true,
            passes: 1,
            intra_threads: 0,
            inter_threads: 0,
        }
    }
}

impl RemovalConfig {
    /// Validate segmentation parameters
    ///
    /// # Errors
    /// - `passes` outside 1-4
    /// - Invalid preprocessing parameters
    pub fn validate(&self) -> Result<()> {
        if !(1..=4).contains(&self.passes) {
            return Err(BgChangerError::config_value_error(
                "passes",
                self.passes,
                "1-4",
                Some(1),
            ));
        }
        self.preprocessing.validate()
    }
}

/// Azure Blob Storage settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage account name
    pub account_name: String,
    /// Shared access signature query string (without the leading `?`)
    pub sas_token: String,
    /// Container used when a request names none
    pub default_container: Option<String>,
    /// Endpoint override, e.g. an Azurite emulator (`http://127.0.0.1:10000/devstoreaccount1`)
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl StorageConfig {
    /// Base URL of the blob service
    #[must_use]
    pub fn service_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{}.blob.core.windows.net", self.account_name),
        }
    }
}

/// Configuration of the HTTP service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    /// Number of job workers
    pub workers: usize,
    /// Deployment environment name
    pub environment: String,
    /// Directory for inputs, cutouts and composites
    pub media_dir: PathBuf,
    /// Directory for uploaded backgrounds
    pub background_dir: PathBuf,
    /// Base URL prepended to media paths in responses
    pub public_base_url: String,
    /// Maximum accepted upload size in bytes
    pub max_upload_bytes: usize,
    /// Accepted upload content types
    pub supported_formats: Vec<String>,
    /// JPEG quality for composites and fetched inputs (0-100)
    pub jpeg_quality: u8,
    /// Timeout for remote image fetches in seconds
    pub fetch_timeout_secs: u64,
    /// How long finished jobs stay queryable, in seconds
    pub job_retention_secs: u64,
    /// Segmentation session settings
    pub removal: RemovalConfig,
    /// Blob storage, disabled when absent
    pub storage: Option<StorageConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            workers: 1,
            environment: "dev".to_string(),
            media_dir: PathBuf::from("media"),
            background_dir: PathBuf::from("media/backgrounds"),
            public_base_url: "http://localhost:8000".to_string(),
            max_upload_bytes: 100 * 1024 * 1024,
            supported_formats: vec!["image/jpeg".to_string(), "image/png".to_string()],
            jpeg_quality: 90,
            fetch_timeout_secs: 30,
            job_retention_secs: 3600,
            removal: RemovalConfig::default(),
            storage: None,
        }
    }
}

impl ServiceConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// Load defaults, an optional JSON file and environment overrides, then validate
    ///
    /// # Errors
    /// - Unreadable or malformed config file
    /// - Malformed environment values
    /// - Validation failures
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file; missing fields take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BgChangerError::file_io_error("read config file", path, &e))?;
        serde_json::from_str(&content).map_err(|e| {
            BgChangerError::invalid_config(format!("{}: {}", path.display(), e))
        })
    }

    /// Apply `BG_CHANGER_*` overrides from an iterator of variables
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "HOST" => self.host = value,
                "PORT" => self.port = parse_env(&key, &value)?,
                "WORKERS" => self.workers = parse_env(&key, &value)?,
                "ENVIRONMENT" => self.environment = value,
                "MEDIA_DIR" => self.media_dir = PathBuf::from(value),
                "BACKGROUND_DIR" => self.background_dir = PathBuf::from(value),
                "PUBLIC_BASE_URL" => self.public_base_url = value,
                "MAX_UPLOAD_BYTES" => self.max_upload_bytes = parse_env(&key, &value)?,
                "JPEG_QUALITY" => self.jpeg_quality = parse_env(&key, &value)?,
                "FETCH_TIMEOUT_SECS" => self.fetch_timeout_secs = parse_env(&key, &value)?,
                "JOB_RETENTION_SECS" => self.job_retention_secs = parse_env(&key, &value)?,
                "MODEL" => self.removal.model = ModelSource::parse(&value),
                "MODEL_SHA256" => self.removal.model_sha256 = Some(value),
                "BACKEND" => self.removal.backend = value.parse()?,
                "EXECUTION_PROVIDER" => self.removal.execution_provider = value.parse()?,
                "PASSES" => self.removal.passes = parse_env(&key, &value)?,
                "THREADS" => {
                    let threads: usize = parse_env(&key, &value)?;
                    self.removal.intra_threads = threads;
                    self.removal.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
                },
                "AZURE_ACCOUNT_NAME" => self.storage_mut().account_name = value,
                "AZURE_SAS_TOKEN" => {
                    self.storage_mut().sas_token = value.trim_start_matches('?').to_string();
                },
                "AZURE_CONTAINER" => self.storage_mut().default_container = Some(value),
                "AZURE_ENDPOINT" => self.storage_mut().endpoint = Some(value),
                _ => tracing::debug!(variable = %key, "ignoring unknown environment override"),
            }
        }
        Ok(())
    }

    fn storage_mut(&mut self) -> &mut StorageConfig {
        self.storage.get_or_insert_with(|| StorageConfig {
            account_name: String::new(),
            sas_token: String::new(),
            default_container: None,
            endpoint: None,
        })
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - `workers` is zero
    /// - JPEG quality above 100
    /// - Empty public base URL
    /// - Storage configured without account or token
    /// - Invalid removal settings
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(BgChangerError::config_value_error(
                "workers",
                self.workers,
                ">= 1",
                Some(1),
            ));
        }
        if self.jpeg_quality > 100 {
            return Err(BgChangerError::config_value_error(
                "JPEG quality",
                self.jpeg_quality,
                "0-100",
                Some(90),
            ));
        }
        if self.public_base_url.trim().is_empty() {
            return Err(BgChangerError::invalid_config("public_base_url must not be empty"));
        }
        if let Some(storage) = &self.storage {
            if storage.account_name.is_empty() && storage.endpoint.is_none() {
                return Err(BgChangerError::invalid_config(
                    "storage requires an account name or an endpoint",
                ));
            }
            if storage.sas_token.is_empty() {
                return Err(BgChangerError::invalid_config("storage requires a SAS token"));
            }
        }
        self.removal.validate()
    }

    /// Retention of finished job records
    #[must_use]
    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    /// Socket address string for binding
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| {
        BgChangerError::invalid_config(format!("{}='{}': {}", key, value, e))
    })
}

/// Builder for `ServiceConfig`
#[derive(Debug, Default)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    #[must_use]
    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.config.host = host.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Set the media directory; the background directory follows as `<media>/backgrounds`
    #[must_use]
    pub fn media_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        let dir = dir.into();
        self.config.background_dir = dir.join("backgrounds");
        self.config.media_dir = dir;
        self
    }

    #[must_use]
    pub fn background_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.background_dir = dir.into();
        self
    }

    #[must_use]
    pub fn public_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.public_base_url = url.into();
        self
    }

    #[must_use]
    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    /// Set JPEG quality (clamped to 100)
    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.min(100);
        self
    }

    /// Set how long finished jobs stay queryable
    #[must_use]
    pub fn job_retention(mut self, retention: Duration) -> Self {
        self.config.job_retention_secs = retention.as_secs();
        self
    }

    #[must_use]
    pub fn removal(mut self, removal: RemovalConfig) -> Self {
        self.config.removal = removal;
        self
    }

    #[must_use]
    pub fn storage(mut self, storage: Option<StorageConfig>) -> Self {
        self.config.storage = storage;
        self
    }

    /// Build and validate
    pub fn build(self) -> Result<ServiceConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_address(), "127.0.0.1:8000");
        assert_eq!(config.removal.passes, 1);
        assert_eq!(config.background_dir, PathBuf::from("media/backgrounds"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ServiceConfig::default();
        config
            .apply_env(vars(&[
                ("BG_CHANGER_PORT", "9000"),
                ("BG_CHANGER_WORKERS", "4"),
                ("BG_CHANGER_JOB_RETENTION_SECS", "600"),
                ("BG_CHANGER_MODEL", "models/rmbg.onnx"),
                ("BG_CHANGER_EXECUTION_PROVIDER", "CPU"),
                ("BG_CHANGER_AZURE_ACCOUNT_NAME", "images"),
                ("BG_CHANGER_AZURE_SAS_TOKEN", "?sv=2022&sig=abc"),
                ("PATH", "/usr/bin"),
            ]))
            .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.workers, 4);
        assert_eq!(config.job_retention_secs, 600);
        assert_eq!(config.removal.model, ModelSource::parse("models/rmbg.onnx"));
        assert_eq!(config.removal.execution_provider, ExecutionProvider::Cpu);
        let storage = config.storage.as_ref().unwrap();
        assert_eq!(storage.sas_token, "sv=2022&sig=abc");
        assert_eq!(storage.service_url(), "https://images.blob.core.windows.net");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_malformed_env_value() {
        let mut config = ServiceConfig::default();
        let err = config
            .apply_env(vars(&[("BG_CHANGER_PORT", "eighty")]))
            .unwrap_err();
        assert!(err.to_string().contains("BG_CHANGER_PORT"));
    }

    #[test]
    fn test_validation_failures() {
        assert!(ServiceConfig::builder().workers(0).build().is_err());

        let mut removal = RemovalConfig::default();
        removal.passes = 0;
        let err = ServiceConfig::builder().removal(removal).build().unwrap_err();
        assert!(err.to_string().contains("passes"));

        let storage = StorageConfig {
            account_name: "images".to_string(),
            sas_token: String::new(),
            default_container: None,
            endpoint: None,
        };
        assert!(ServiceConfig::builder().storage(Some(storage)).build().is_err());
    }

    #[test]
    fn test_partial_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"port": 8080, "removal": {"backend": "tract", "passes": 2}}"#,
        )
        .unwrap();

        let config = ServiceConfig::from_file(&path).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.removal.backend, BackendType::Tract);
        assert_eq!(config.removal.passes, 2);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn test_builder_media_dir_sets_backgrounds() {
        let config = ServiceConfig::builder()
            .media_dir("/srv/media")
            .jpeg_quality(150)
            .job_retention(Duration::from_secs(90))
            .build()
            .unwrap();
        assert_eq!(config.background_dir, PathBuf::from("/srv/media/backgrounds"));
        assert_eq!(config.job_retention(), Duration::from_secs(90));
        assert_eq!(config.jpeg_quality, 100);
    }
}
