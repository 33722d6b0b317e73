//! ONNX Runtime backend
//!
//! Runs segmentation models through ONNX Runtime with CPU, CUDA or `CoreML` execution
//! providers. Providers that are requested but unavailable fall back to CPU with a
//! warning rather than failing session creation.

use crate::config::{ExecutionProvider, RemovalConfig};
use crate::error::{BgChangerError, Result};
use crate::inference::{to_array4, InferenceBackend};
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};
use ort::value::Value;
use std::time::{Duration, Instant};

/// ONNX Runtime backend for running background removal models
#[derive(Debug, Default)]
pub struct OnnxBackend {
    session: Option<Session>,
}

impl OnnxBackend {
    /// Create a new uninitialized ONNX backend
    #[must_use]
    pub fn new() -> Self {
        Self { session: None }
    }

    /// List ONNX Runtime execution providers with availability and a description
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!(
            "🔍 Checking execution providers on {} ({})",
            std::env::consts::OS,
            std::env::consts::ARCH
        );

        let cuda_available =
            OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
        let coreml_available =
            OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                .unwrap_or(false);

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available,
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml_available,
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }

    fn configure_providers(
        session_builder: SessionBuilder,
        provider: ExecutionProvider,
    ) -> Result<SessionBuilder> {
        let cuda = CUDAExecutionProvider::default();
        let cuda_available = OrtExecutionProvider::is_available(&cuda).unwrap_or(false);
        let coreml = CoreMLExecutionProvider::default().with_subgraphs(true);
        let coreml_available = OrtExecutionProvider::is_available(&coreml).unwrap_or(false);

        let providers = match provider {
            ExecutionProvider::Auto => {
                let mut providers = Vec::new();
                if cuda_available {
                    log::info!("🚀 CUDA execution provider is available and will be used");
                    providers.push(cuda.build());
                }
                if coreml_available {
                    log::info!("🍎 CoreML execution provider is available and will be used");
                    providers.push(coreml.build());
                }
                if providers.is_empty() {
                    log::info!("No hardware acceleration available, using CPU");
                }
                providers
            },
            ExecutionProvider::Cpu => {
                log::info!("Using CPU execution provider");
                Vec::new()
            },
            ExecutionProvider::Cuda if cuda_available => {
                log::info!("Using CUDA execution provider");
                vec![cuda.build()]
            },
            ExecutionProvider::CoreMl if coreml_available => {
                log::info!("🍎 Using CoreML execution provider");
                vec![coreml.build()]
            },
            ExecutionProvider::Cuda | ExecutionProvider::CoreMl => {
                log::warn!(
                    "⚠️ {} execution provider requested but not available, falling back to CPU",
                    provider
                );
                Vec::new()
            },
        };

        if providers.is_empty() {
            return Ok(session_builder);
        }
        session_builder
            .with_execution_providers(providers)
            .map_err(|e| {
                BgChangerError::inference(format!("Failed to set execution providers: {e}"))
            })
    }

    fn thread_counts(config: &RemovalConfig) -> (usize, usize) {
        let cores = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(8);
        let intra = if config.intra_threads > 0 {
            config.intra_threads
        } else {
            cores
        };
        let inter = if config.inter_threads > 0 {
            config.inter_threads
        } else {
            (cores / 4).max(1)
        };
        (intra, inter)
    }
}

impl InferenceBackend for OnnxBackend {
    fn initialize(
        &mut self,
        model_data: &[u8],
        config: &RemovalConfig,
    ) -> Result<Option<Duration>> {
        if self.session.is_some() {
            return Ok(None);
        }

        let model_load_start = Instant::now();
        let session_builder = Session::builder()
            .map_err(|e| {
                BgChangerError::inference(format!("Failed to create session builder: {e}"))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                BgChangerError::inference(format!("Failed to set optimization level: {e}"))
            })?;
        let session_builder =
            Self::configure_providers(session_builder, config.execution_provider)?;

        let (intra_threads, inter_threads) = Self::thread_counts(config);
        let session = session_builder
            .with_parallel_execution(true)
            .map_err(|e| {
                BgChangerError::inference(format!("Failed to enable parallel execution: {e}"))
            })?
            .with_intra_threads(intra_threads)
            .map_err(|e| BgChangerError::inference(format!("Failed to set intra threads: {e}")))?
            .with_inter_threads(inter_threads)
            .map_err(|e| BgChangerError::inference(format!("Failed to set inter threads: {e}")))?
            .commit_from_memory(model_data)
            .map_err(|e| {
                BgChangerError::model(format!("Failed to create session from model data: {e}"))
            })?;

        log::debug!("✅ ONNX Runtime session created");
        log::debug!("  - Requested provider: {}", config.execution_provider);
        log::debug!("  - Threading: {intra_threads} intra-op, {inter_threads} inter-op");
        log::debug!(
            "  - Model size: {:.2} MB",
            model_data.len() as f64 / (1024.0 * 1024.0)
        );

        self.session = Some(session);
        let model_load_time = model_load_start.elapsed();
        log::info!(
            "📊 Model loading complete: {:.0}ms",
            model_load_time.as_secs_f64() * 1000.0
        );
        Ok(Some(model_load_time))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| BgChangerError::inference("ONNX session not initialized"))?;

        let inference_start = Instant::now();
        log::debug!("🚀 Starting inference with input shape: {:?}", input.dim());

        let input_value = Value::from_array(input.clone())
            .map_err(|e| {
                BgChangerError::inference(format!("Failed to convert input tensor: {e}"))
            })?;

        // Positional inputs keep the backend independent of tensor names
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| BgChangerError::inference(format!("ONNX inference failed: {e}")))?;

        let first_key = outputs
            .keys()
            .next()
            .map(ToString::to_string)
            .ok_or_else(|| BgChangerError::inference("No output tensors found"))?;
        let output_tensor = outputs
            .get(first_key.as_str())
            .ok_or_else(|| BgChangerError::inference("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| {
                BgChangerError::inference(format!("Failed to extract output tensor: {e}"))
            })?;

        let shape = output_tensor.shape().to_vec();
        let data = output_tensor.view().to_owned().into_raw_vec_and_offset().0;
        let result = to_array4(&shape, data)?;

        log::info!(
            "📊 Inference complete: {:.2}ms total",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(result)
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    fn name(&self) -> &'static str {
        "onnx"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uninitialized_backend() {
        let mut backend = OnnxBackend::new();
        assert!(!backend.is_initialized());
        let err = backend.infer(&Array4::zeros((1, 3, 4, 4))).unwrap_err();
        assert!(matches!(err, BgChangerError::Inference(_)));
    }

    #[test]
    fn test_invalid_model_bytes() {
        let mut backend = OnnxBackend::new();
        let config = RemovalConfig {
            execution_provider: ExecutionProvider::Cpu,
            ..RemovalConfig::default()
        };
        assert!(backend.initialize(b"not an onnx model", &config).is_err());
        assert!(!backend.is_initialized());
    }

    #[test]
    fn test_thread_counts() {
        let config = RemovalConfig {
            intra_threads: 6,
            inter_threads: 2,
            ..RemovalConfig::default()
        };
        assert_eq!(OnnxBackend::thread_counts(&config), (6, 2));
        let (intra, inter) = OnnxBackend::thread_counts(&RemovalConfig::default());
        assert!(intra >= 1 && inter >= 1);
    }

    #[test]
    fn test_cpu_provider_always_listed() {
        let providers = OnnxBackend::list_providers();
        assert!(providers.iter().any(|(name, available, _)| name == "CPU" && *available));
    }
}
