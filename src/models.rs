//! Segmentation model sources and preprocessing parameters

use crate::{
    download::ModelDownloader,
    error::{BgChangerError, Result},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default model: BRIA RMBG-1.4 exported to ONNX
pub const DEFAULT_MODEL_URL: &str =
    "https://huggingface.co/briaai/RMBG-1.4/resolve/main/onnx/model.onnx";

/// Where the ONNX model bytes come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModelSource {
    /// Local `.onnx` file
    Path(PathBuf),
    /// HTTP(S) URL downloaded into the model cache on first use
    Url(String),
}

impl ModelSource {
    /// Interpret a CLI/config string as either a URL or a local path
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.starts_with("https://") || value.starts_with("http://") {
            Self::Url(value.to_string())
        } else {
            Self::Path(PathBuf::from(value))
        }
    }

    /// Human-readable name for logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            Self::Path(path) => format!("file:{}", path.display()),
            Self::Url(url) => format!("url:{}", url),
        }
    }
}

impl Default for ModelSource {
    fn default() -> Self {
        Self::Url(DEFAULT_MODEL_URL.to_string())
    }
}

impl From<String> for ModelSource {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<ModelSource> for String {
    fn from(source: ModelSource) -> Self {
        match source {
            ModelSource::Path(path) => path.display().to_string(),
            ModelSource::Url(url) => url,
        }
    }
}

/// Model input preprocessing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Model input size `[width, height]` (square models only use the first entry)
    pub target_size: [u32; 2],
    /// Per-channel mean subtracted after scaling to `[0, 1]`
    pub normalization_mean: [f32; 3],
    /// Per-channel standard deviation divided after mean subtraction
    pub normalization_std: [f32; 3],
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            target_size: [1024, 1024],
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [1.0, 1.0, 1.0],
        }
    }
}

impl PreprocessingConfig {
    /// Validate sizes and divisors
    pub fn validate(&self) -> Result<()> {
        if self.target_size[0] == 0 || self.target_size[1] == 0 {
            return Err(BgChangerError::config_value_error(
                "target size",
                format!("{}x{}", self.target_size[0], self.target_size[1]),
                "non-zero",
                None,
            ));
        }
        if self.normalization_std.iter().any(|s| !s.is_finite() || *s == 0.0) {
            return Err(BgChangerError::invalid_config(
                "normalization std values must be finite and non-zero",
            ));
        }
        Ok(())
    }
}

/// Resolves a [`ModelSource`] to model bytes
#[derive(Debug, Clone)]
pub struct ModelManager {
    source: ModelSource,
    expected_sha256: Option<String>,
}

impl ModelManager {
    #[must_use]
    pub fn new(source: ModelSource, expected_sha256: Option<String>) -> Self {
        Self {
            source,
            expected_sha256,
        }
    }

    #[must_use]
    pub fn source(&self) -> &ModelSource {
        &self.source
    }

    /// Local path of the model, downloading it first when the source is a URL
    ///
    /// # Errors
    /// - Local path does not exist
    /// - Download or checksum verification failures
    pub async fn resolve(&self) -> Result<PathBuf> {
        match &self.source {
            ModelSource::Path(path) => {
                if !path.exists() {
                    return Err(BgChangerError::model(format!(
                        "model file '{}' does not exist",
                        path.display()
                    )));
                }
                Ok(path.clone())
            },
            ModelSource::Url(url) => {
                let downloader = ModelDownloader::new()?;
                downloader.ensure_model(url, self.expected_sha256.as_deref()).await
            },
        }
    }

    /// Read model bytes from a resolved path
    pub fn load_model(path: &Path) -> Result<Vec<u8>> {
        let data = std::fs::read(path)
            .map_err(|e| BgChangerError::file_io_error("read model", path, &e))?;
        if data.is_empty() {
            return Err(BgChangerError::model(format!(
                "model file '{}' is empty",
                path.display()
            )));
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_parsing() {
        assert_eq!(
            ModelSource::parse("https://example.com/model.onnx"),
            ModelSource::Url("https://example.com/model.onnx".to_string())
        );
        assert_eq!(
            ModelSource::parse("models/u2net.onnx"),
            ModelSource::Path(PathBuf::from("models/u2net.onnx"))
        );
    }

    #[test]
    fn test_source_serializes_as_string() {
        let json = serde_json::to_string(&ModelSource::parse("models/a.onnx")).unwrap();
        assert_eq!(json, "\"models/a.onnx\"");
        let source: ModelSource = serde_json::from_str("\"http://host/m.onnx\"").unwrap();
        assert!(matches!(source, ModelSource::Url(_)));
    }

    #[test]
    fn test_preprocessing_validation() {
        assert!(PreprocessingConfig::default().validate().is_ok());
        let config = PreprocessingConfig {
            normalization_std: [1.0, 0.0, 1.0],
            ..PreprocessingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_missing_local_model() {
        let manager = ModelManager::new(ModelSource::parse("/nonexistent/model.onnx"), None);
        let err = manager.resolve().await.unwrap_err();
        assert!(matches!(err, BgChangerError::Model(_)));
    }

    #[test]
    fn test_load_model_rejects_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = ModelManager::load_model(file.path()).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }
}
