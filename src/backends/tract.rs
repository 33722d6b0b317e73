//! Tract backend
//!
//! Pure Rust inference through `tract-onnx`. Slower than ONNX Runtime but needs no
//! native libraries, which makes it the fallback for minimal deployments.

use crate::config::RemovalConfig;
use crate::error::{BgChangerError, Result};
use crate::inference::{to_array4, InferenceBackend};
use ndarray::Array4;
use std::time::{Duration, Instant};
use tract_onnx::prelude::*;

type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract backend for running background removal models using pure Rust inference
#[derive(Debug, Default)]
pub struct TractBackend {
    model: Option<TractModel>,
    input_size: Option<(usize, usize)>,
}

impl TractBackend {
    /// Create a new uninitialized Tract backend
    #[must_use]
    pub fn new() -> Self {
        Self {
            model: None,
            input_size: None,
        }
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(
        &mut self,
        model_data: &[u8],
        config: &RemovalConfig,
    ) -> Result<Option<Duration>> {
        if self.model.is_some() {
            return Ok(None);
        }

        let model_load_start = Instant::now();
        let [width, height] = config.preprocessing.target_size;
        log::info!("🚀 Initializing Tract backend");
        log::info!(
            "📏 Model size: {:.2} MB",
            model_data.len() as f64 / (1024.0 * 1024.0)
        );

        // RMBG exports have symbolic spatial dims; pin them so tract can optimize
        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| BgChangerError::model(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(
                0,
                f32::fact([1, 3, height as usize, width as usize]).into(),
            )
            .map_err(|e| BgChangerError::model(format!("Failed to set input shape: {e}")))?
            .into_optimized()
            .map_err(|e| BgChangerError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| BgChangerError::model(format!("Failed to create runnable model: {e}")))?;

        self.model = Some(model);
        self.input_size = Some((height as usize, width as usize));

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "✅ Tract backend initialized in {:.2}ms",
            model_load_time.as_millis()
        );
        Ok(Some(model_load_time))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| BgChangerError::inference("Tract model not initialized"))?;

        if let Some((height, width)) = self.input_size {
            let (_, _, h, w) = input.dim();
            if (h, w) != (height, width) {
                return Err(BgChangerError::inference(format!(
                    "Tract model expects {}x{} input, got {}x{}",
                    width, height, w, h
                )));
            }
        }

        log::debug!("🔮 Running Tract inference on {:?}", input.shape());
        let inference_start = Instant::now();

        let outputs = model
            .run(tvec![Tensor::from(input.clone()).into()])
            .map_err(|e| BgChangerError::inference(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| BgChangerError::inference("No output tensor found"))?
            .into_arc_tensor();
        let output_data = output_tensor
            .to_array_view::<f32>()
            .map_err(|e| {
                BgChangerError::inference(format!("Failed to convert output tensor: {e}"))
            })?;

        let shape = output_data.shape().to_vec();
        let result = to_array4(&shape, output_data.iter().copied().collect())?;

        log::debug!(
            "✅ Tract inference completed in {:.2}ms",
            inference_start.elapsed().as_millis()
        );
        Ok(result)
    }

    fn is_initialized(&self) -> bool {
        self.model.is_some()
    }

    fn name(&self) -> &'static str {
        "tract"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uninitialized_backend() {
        let mut backend = TractBackend::new();
        assert!(!backend.is_initialized());
        assert!(backend.infer(&Array4::zeros((1, 3, 4, 4))).is_err());
    }

    #[test]
    fn test_invalid_model_bytes() {
        let mut backend = TractBackend::new();
        let err = backend
            .initialize(b"definitely not protobuf", &RemovalConfig::default())
            .unwrap_err();
        assert!(matches!(err, BgChangerError::Model(_)));
        assert!(!backend.is_initialized());
    }
}
