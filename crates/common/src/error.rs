//! Error types shared across Cutline crates.

use std::path::PathBuf;

/// Top-level error type for Cutline operations.
#[derive(Debug, thiserror::Error)]
pub enum CutlineError {
    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Sink error: {message}")]
    Sink { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The frame canvas could not be allocated.
    #[error("Failed to allocate {bytes} bytes for a frame buffer")]
    Allocation { bytes: usize },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using CutlineError.
pub type CutlineResult<T> = Result<T, CutlineError>;

impl CutlineError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Whether the error is fatal for a whole composition rather than a single clip.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Allocation { .. } | Self::Sink { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructor_messages() {
        let err = CutlineError::decode("eof in header");
        assert_eq!(err.to_string(), "Decode error: eof in header");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_allocation_is_fatal() {
        let err = CutlineError::Allocation { bytes: 42 };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("42 bytes"));
    }

    #[test]
    fn test_foreign_errors_wrap_as_other() {
        let err: CutlineError = anyhow::anyhow!("unknown track 3").into();
        assert!(matches!(err, CutlineError::Other(_)));
        assert_eq!(err.to_string(), "unknown track 3");
        assert!(!err.is_fatal());
    }
}
