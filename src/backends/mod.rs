//! Backend implementations for different inference engines
//!
//! - ONNX Runtime backend (high performance, GPU acceleration)
//! - Tract backend (pure Rust, no external dependencies)
//! - Mock backend (deterministic masks, no model)

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

pub mod mock;

use crate::{
    config::BackendType,
    error::{BgChangerError, Result},
    inference::InferenceBackend,
};

pub use self::mock::{MockBackend, MockMask};

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;

#[cfg(feature = "tract")]
pub use self::tract::TractBackend;

/// Instantiate an uninitialized backend for `backend_type`
///
/// # Errors
/// - The backend was not compiled in
pub fn create_backend(backend_type: BackendType) -> Result<Box<dyn InferenceBackend>> {
    match backend_type {
        #[cfg(feature = "onnx")]
        BackendType::Onnx => Ok(Box::new(OnnxBackend::new())),
        #[cfg(feature = "tract")]
        BackendType::Tract => Ok(Box::new(TractBackend::new())),
        #[allow(unreachable_patterns)]
        other => Err(BgChangerError::invalid_config(format!(
            "backend {:?} is not available in this build (enable the '{}' feature)",
            other,
            format!("{:?}", other).to_lowercase()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "tract")]
    #[test]
    fn test_create_tract_backend() {
        let backend = create_backend(BackendType::Tract).unwrap();
        assert_eq!(backend.name(), "tract");
        assert!(!backend.is_initialized());
    }

    #[cfg(feature = "onnx")]
    #[test]
    fn test_create_onnx_backend() {
        let backend = create_backend(BackendType::Onnx).unwrap();
        assert_eq!(backend.name(), "onnx");
    }
}
