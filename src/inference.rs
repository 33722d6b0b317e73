//! Inference backend abstraction

use crate::{config::RemovalConfig, error::Result};
use ndarray::Array4;
use std::time::Duration;

/// Trait for inference backends
///
/// Backends take an NCHW float tensor and return the raw model output (a single-channel
/// mask tensor for segmentation models). They are owned by a [`crate::Segmenter`] and
/// called from blocking worker threads, hence the `Send` bound.
pub trait InferenceBackend: Send {
    /// Load the model from `model_data` and prepare the backend for inference
    ///
    /// Returns the load time, or `None` when the backend was already initialized.
    ///
    /// # Errors
    /// - Model parsing or optimization failures
    /// - Execution provider configuration failures
    fn initialize(&mut self, model_data: &[u8], config: &RemovalConfig) -> Result<Option<Duration>>;

    /// Run inference on the input tensor
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures
    /// - Output tensor is not four-dimensional
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

/// Copy a dynamic-rank output view into an `Array4`, rejecting other ranks
pub(crate) fn to_array4(shape: &[usize], data: Vec<f32>) -> Result<Array4<f32>> {
    let [n, c, h, w] = shape else {
        return Err(crate::error::BgChangerError::inference(format!(
            "Expected 4D output tensor, got {}D",
            shape.len()
        )));
    };
    Array4::from_shape_vec((*n, *c, *h, *w), data).map_err(|e| {
        crate::error::BgChangerError::inference(format!("Failed to reshape output tensor: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockBackend;

    #[test]
    fn test_to_array4_rejects_wrong_rank() {
        assert!(to_array4(&[1, 4, 4], vec![0.0; 16]).is_err());
        assert!(to_array4(&[1, 1, 2, 2], vec![0.0; 3]).is_err());
        let array = to_array4(&[1, 1, 2, 2], vec![0.0, 0.25, 0.5, 1.0]).unwrap();
        assert_eq!(array[[0, 0, 1, 1]], 1.0);
    }

    #[test]
    fn test_backend_trait_object() {
        let mut backend: Box<dyn InferenceBackend> = Box::new(MockBackend::new());
        assert!(!backend.is_initialized());
        assert!(backend.infer(&Array4::zeros((1, 3, 8, 8))).is_err());

        let load = backend
            .initialize(b"mock", &RemovalConfig::default())
            .unwrap();
        assert!(load.is_some());
        assert!(backend.is_initialized());
        assert!(backend
            .initialize(b"mock", &RemovalConfig::default())
            .unwrap()
            .is_none());

        let output = backend.infer(&Array4::zeros((1, 3, 8, 8))).unwrap();
        assert_eq!(output.shape(), &[1, 1, 8, 8]);
        assert_eq!(backend.name(), "mock");
    }
}
