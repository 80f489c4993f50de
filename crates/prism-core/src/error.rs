//! Error types for the Prism image variant pipeline.
//!
//! Errors are classified at the point where they occur. Every pipeline error
//! maps onto exactly one [`ErrorKind`], and the kind alone decides whether the
//! external delivery mechanism should redeliver the event.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for Prism operations.
#[derive(Error, Debug)]
pub enum PrismError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Pipeline processing errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Errors reported by an object store collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The object (or its container) does not exist
    #[error("Object not found: {container}/{key}")]
    NotFound { container: String, key: String },

    /// The caller is not allowed to read or write the object
    #[error("Access denied: {container}/{key}")]
    AccessDenied { container: String, key: String },

    /// The key cannot address an object in this store
    #[error("Invalid object key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    /// Network failure, throttling, or any other condition worth retrying
    #[error("Transient store failure: {0}")]
    Transient(String),
}

impl StoreError {
    /// Whether repeating the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Classification of a failure, as reported in a processing outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidEvent,
    SourceUnavailable,
    SourceTransient,
    UnsupportedFormat,
    CorruptInput,
    InputTooLarge,
    EncodingError,
    AnnotationFailure,
    PublishTransient,
    PublishPermanent,
    Timeout,
}

impl ErrorKind {
    /// Whether an invocation that failed with this kind is eligible for redelivery.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::SourceTransient | ErrorKind::PublishTransient | ErrorKind::Timeout
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidEvent => "invalid_event",
            ErrorKind::SourceUnavailable => "source_unavailable",
            ErrorKind::SourceTransient => "source_transient",
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::CorruptInput => "corrupt_input",
            ErrorKind::InputTooLarge => "input_too_large",
            ErrorKind::EncodingError => "encoding_error",
            ErrorKind::AnnotationFailure => "annotation_failure",
            ErrorKind::PublishTransient => "publish_transient",
            ErrorKind::PublishPermanent => "publish_permanent",
            ErrorKind::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline processing errors, organized by stage.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    /// The inbound event is missing required fields
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Source object does not exist or cannot be read with our permissions
    #[error("Source unavailable: {location}: {message}")]
    SourceUnavailable { location: String, message: String },

    /// Source fetch failed in a way that may succeed on redelivery
    #[error("Source fetch failed for {location}: {message}")]
    SourceTransient { location: String, message: String },

    /// Bytes are not a raster format we can decode
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Format recognized but the pixel data is truncated or invalid
    #[error("Corrupt input: {0}")]
    CorruptInput(String),

    /// Source exceeds the configured byte or pixel limits
    #[error("Input too large: {0}")]
    InputTooLarge(String),

    /// A single variant could not be resized or encoded
    #[error("Encoding failed for variant {variant}: {message}")]
    Encoding { variant: String, message: String },

    /// Every configured variant failed to encode
    #[error("No variants could be generated ({failed} failed)")]
    NoVariants { failed: usize },

    /// Label detection failed (always absorbed by the annotator)
    #[error("Label detection failed: {message}")]
    Labeling {
        message: String,
        status_code: Option<u16>,
    },

    /// The label service could not be reached (refused, reset, or timed out)
    #[error("Label service unreachable: {message}")]
    LabelServiceUnreachable { message: String },

    /// Output write failed in a way that may succeed on redelivery
    #[error("Publish failed for {key}: {message}")]
    PublishTransient { key: String, message: String },

    /// Output write rejected (bad key, permissions)
    #[error("Publish rejected for {key}: {message}")]
    PublishPermanent { key: String, message: String },

    /// Operation timed out
    #[error("Timeout in {stage} stage after {timeout_ms}ms")]
    Timeout { stage: String, timeout_ms: u64 },
}

impl PipelineError {
    /// The outcome classification for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidEvent(_) => ErrorKind::InvalidEvent,
            PipelineError::SourceUnavailable { .. } => ErrorKind::SourceUnavailable,
            PipelineError::SourceTransient { .. } => ErrorKind::SourceTransient,
            PipelineError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            PipelineError::CorruptInput(_) => ErrorKind::CorruptInput,
            PipelineError::InputTooLarge(_) => ErrorKind::InputTooLarge,
            PipelineError::Encoding { .. } | PipelineError::NoVariants { .. } => {
                ErrorKind::EncodingError
            }
            PipelineError::Labeling { .. } | PipelineError::LabelServiceUnreachable { .. } => {
                ErrorKind::AnnotationFailure
            }
            PipelineError::PublishTransient { .. } => ErrorKind::PublishTransient,
            PipelineError::PublishPermanent { .. } => ErrorKind::PublishPermanent,
            PipelineError::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Classify a failed source read.
    pub fn from_source_error(location: &str, error: StoreError) -> Self {
        if error.is_transient() {
            PipelineError::SourceTransient {
                location: location.to_string(),
                message: error.to_string(),
            }
        } else {
            PipelineError::SourceUnavailable {
                location: location.to_string(),
                message: error.to_string(),
            }
        }
    }

    /// Classify a failed output write.
    pub fn from_publish_error(key: &str, error: StoreError) -> Self {
        if error.is_transient() {
            PipelineError::PublishTransient {
                key: key.to_string(),
                message: error.to_string(),
            }
        } else {
            PipelineError::PublishPermanent {
                key: key.to_string(),
                message: error.to_string(),
            }
        }
    }
}

/// Convenience type alias for Prism results.
pub type Result<T> = std::result::Result<T, PrismError>;

/// Convenience type alias for pipeline-specific results.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
