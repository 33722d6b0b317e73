//! Error types for background replacement operations

use thiserror::Error;

/// Result type alias for background replacement operations
pub type Result<T> = std::result::Result<T, BgChangerError>;

/// Error types for every stage of the pipeline
#[derive(Error, Debug)]
pub enum BgChangerError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encoding errors raised by the image crate
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Image data that could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Caller-supplied value outside its allowed domain
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unsupported file or content format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Backend inference errors
    #[error("Inference error: {0}")]
    Inference(String),

    /// Model loading or initialization errors
    #[error("Model error: {0}")]
    Model(String),

    /// Remote fetch or download errors
    #[error("Network error: {0}")]
    Network(String),

    /// Blob storage upload errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Lookup of something that does not exist (job ids, media files)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Processing errors
    #[error("Processing error: {0}")]
    Processing(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BgChangerError {
    /// Create a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new invalid argument error
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new unsupported format error
    pub fn unsupported_format<S: Into<String>>(format: S) -> Self {
        Self::UnsupportedFormat(format.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new not found error
    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a new processing error
    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Self::Processing(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        Self::Io(std::io::Error::new(
            error.kind(),
            format!(
                "Failed to {} '{}': {}",
                operation,
                path.as_ref().display(),
                error
            ),
        ))
    }

    /// Create network error from any displayable source
    pub fn network_error<E: std::fmt::Display>(context: &str, error: E) -> Self {
        Self::Network(format!("{}: {}", context, error))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Create processing error with stage context
    pub fn processing_stage_error(stage: &str, details: &str, input_info: Option<&str>) -> Self {
        let input_context = match input_info {
            Some(info) => format!(" (input: {})", info),
            None => String::new(),
        };

        Self::Processing(format!(
            "Processing failed at stage '{}'{}: {}",
            stage, input_context, details
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_error_creation() {
        let err = BgChangerError::invalid_argument("scale_factor out of range");
        assert!(matches!(err, BgChangerError::InvalidArgument(_)));

        let err = BgChangerError::decode("truncated jpeg");
        assert!(matches!(err, BgChangerError::Decode(_)));
    }

    #[test]
    fn test_error_display() {
        let err = BgChangerError::invalid_config("workers must be at least 1");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: workers must be at least 1"
        );
    }

    #[test]
    fn test_contextual_errors() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err =
            BgChangerError::file_io_error("write composite", Path::new("media/out.jpg"), &io_error);
        let message = err.to_string();
        assert!(message.contains("write composite"));
        assert!(message.contains("media/out.jpg"));

        let err = BgChangerError::config_value_error("passes", 9, "1-4", Some(1));
        let message = err.to_string();
        assert!(message.contains("passes"));
        assert!(message.contains("1-4"));
        assert!(message.contains("Recommended: 1"));

        let err = BgChangerError::network_error("GET https://example.com/car.jpg", "status 404");
        assert_eq!(
            err.to_string(),
            "Network error: GET https://example.com/car.jpg: status 404"
        );

        let err = BgChangerError::processing_stage_error("composite", "empty cutout", Some("0x0"));
        assert!(err.to_string().contains("'composite' (input: 0x0)"));
    }
}
