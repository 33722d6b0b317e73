//! Mock backend for tests and model-free benchmarking
//!
//! Produces deterministic masks without loading a model, so the whole pipeline (and the
//! HTTP service) can be exercised in tests.

use crate::{
    config::RemovalConfig,
    error::{BgChangerError, Result},
    inference::InferenceBackend,
};
use ndarray::Array4;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mask produced by [`MockBackend`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockMask {
    /// 1.0 wherever the input is not pure white (the letterbox padding colour), 0.0 elsewhere
    Content,
    /// The same value for every pixel
    Constant(f32),
}

/// Deterministic stand-in for a segmentation model
#[derive(Debug, Clone)]
pub struct MockBackend {
    mask: MockMask,
    white_level: [f32; 3],
    initialized: bool,
    call_history: Arc<Mutex<Vec<String>>>,
    should_fail_init: bool,
    should_fail_inference: bool,
}

impl MockBackend {
    /// Mock backend producing a [`MockMask::Content`] mask
    #[must_use]
    pub fn new() -> Self {
        Self::with_mask(MockMask::Content)
    }

    #[must_use]
    pub fn with_mask(mask: MockMask) -> Self {
        Self {
            mask,
            white_level: [0.5; 3],
            initialized: false,
            call_history: Arc::new(Mutex::new(Vec::new())),
            should_fail_init: false,
            should_fail_inference: false,
        }
    }

    /// Mock backend whose `initialize` fails
    #[must_use]
    pub fn new_failing_init() -> Self {
        Self {
            should_fail_init: true,
            ..Self::new()
        }
    }

    /// Mock backend whose `infer` fails
    #[must_use]
    pub fn new_failing_inference() -> Self {
        Self {
            should_fail_inference: true,
            ..Self::new()
        }
    }

    /// Shared handle to the recorded calls, usable after the backend is moved
    #[must_use]
    pub fn call_history(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.call_history)
    }

    /// Number of `infer` calls recorded so far
    #[must_use]
    pub fn inference_count(&self) -> usize {
        self.call_history
            .lock()
            .map(|history| history.iter().filter(|call| *call == "infer").count())
            .unwrap_or(0)
    }

    fn record_call(&self, method: &str) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(method.to_string());
        }
    }

    fn is_white(&self, input: &Array4<f32>, b: usize, y: usize, x: usize) -> bool {
        self.white_level
            .iter()
            .enumerate()
            .all(|(c, level)| (input[[b, c, y, x]] - level).abs() < 1e-3)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(
        &mut self,
        _model_data: &[u8],
        config: &RemovalConfig,
    ) -> Result<Option<Duration>> {
        self.record_call("initialize");
        if self.should_fail_init {
            return Err(BgChangerError::model("Mock backend initialization failed"));
        }
        if self.initialized {
            return Ok(None);
        }

        let preprocessing = &config.preprocessing;
        for c in 0..3 {
            self.white_level[c] =
                (1.0 - preprocessing.normalization_mean[c]) / preprocessing.normalization_std[c];
        }
        self.initialized = true;
        Ok(Some(Duration::from_millis(1)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.record_call("infer");
        if !self.initialized {
            return Err(BgChangerError::inference("Mock backend not initialized"));
        }
        if self.should_fail_inference {
            return Err(BgChangerError::inference("Mock inference failed"));
        }

        let (batch, channels, height, width) = input.dim();
        if channels != 3 {
            return Err(BgChangerError::inference(format!(
                "Mock backend expects 3 input channels, got {}",
                channels
            )));
        }

        let output = match self.mask {
            MockMask::Constant(value) => Array4::from_elem((batch, 1, height, width), value),
            MockMask::Content => Array4::from_shape_fn((batch, 1, height, width), |(b, _, y, x)| {
                if self.is_white(input, b, y, x) {
                    0.0
                } else {
                    1.0
                }
            }),
        };
        Ok(output)
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_mask() {
        let mut backend = MockBackend::new();
        backend.initialize(&[], &RemovalConfig::default()).unwrap();

        let mut input = Array4::from_elem((1, 3, 2, 2), 0.5);
        input[[0, 0, 1, 0]] = -0.5;
        let mask = backend.infer(&input).unwrap();
        assert_eq!(mask[[0, 0, 0, 0]], 0.0);
        assert_eq!(mask[[0, 0, 1, 0]], 1.0);
    }

    #[test]
    fn test_failure_modes() {
        let mut backend = MockBackend::new_failing_init();
        assert!(backend.initialize(&[], &RemovalConfig::default()).is_err());

        let mut backend = MockBackend::new_failing_inference();
        backend.initialize(&[], &RemovalConfig::default()).unwrap();
        assert!(backend.infer(&Array4::zeros((1, 3, 2, 2))).is_err());
    }

    #[test]
    fn test_call_history_is_shared() {
        let mut backend = MockBackend::with_mask(MockMask::Constant(0.25));
        let history = backend.call_history();
        backend.initialize(&[], &RemovalConfig::default()).unwrap();
        backend.infer(&Array4::zeros((1, 3, 2, 2))).unwrap();

        assert_eq!(*history.lock().unwrap(), vec!["initialize", "infer"]);
        assert_eq!(backend.inference_count(), 1);
    }
}
