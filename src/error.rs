//! Error types for volume data access

use thiserror::Error;

/// Main error type for VDS operations
#[derive(Error, Debug, Clone)]
pub enum VdsError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Buffer too small: {required} bytes required, {actual} provided")]
    BufferTooSmall { required: usize, actual: usize },

    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    #[error("Failed to fetch chunk {chunk}: {reason}")]
    ChunkFetchFailure { chunk: i64, reason: String },

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Request canceled: {0}")]
    Canceled(String),

    #[error("Invalid VDS format: {0}")]
    InvalidFormat(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl VdsError {
    /// Whether this error was raised by argument or size validation
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            VdsError::InvalidArgument(_) | VdsError::OutOfRange(_) | VdsError::BufferTooSmall { .. }
        )
    }
}

/// Specialized Result type for VDS operations
pub type Result<T> = std::result::Result<T, VdsError>;

impl From<std::io::Error> for VdsError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => VdsError::NotFound(err.to_string()),
            _ => VdsError::Io(err.to_string()),
        }
    }
}

impl From<bincode::Error> for VdsError {
    fn from(err: bincode::Error) -> Self {
        VdsError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for VdsError {
    fn from(err: serde_json::Error) -> Self {
        VdsError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let err: VdsError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, VdsError::NotFound(_)));

        let err: VdsError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert!(matches!(err, VdsError::Io(_)));
    }

    #[test]
    fn test_buffer_too_small_message() {
        let err = VdsError::BufferTooSmall {
            required: 3600,
            actual: 100,
        };
        assert_eq!(
            err.to_string(),
            "Buffer too small: 3600 bytes required, 100 provided"
        );
        assert!(err.is_validation_error());
        assert!(!VdsError::Canceled("x".into()).is_validation_error());
    }
}
