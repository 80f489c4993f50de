//! Sub-configuration structs with their defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Output store and encoding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Container (bucket) that receives variants and metadata records
    pub container: String,

    /// Encoding applied to every variant
    pub format: EncodeFormat,

    /// Lossy quality (1-100). Only JPEG honours it; PNG and WebP are lossless.
    pub quality: u8,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            container: "derived".to_string(),
            format: EncodeFormat::Jpeg,
            quality: 85,
        }
    }
}

/// Single fixed output format for all variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodeFormat {
    Jpeg,
    Png,
    /// Always lossless: the `image` encoder has no lossy WebP mode, so
    /// `quality` is ignored for this format
    #[serde(rename = "webp")]
    WebP,
}

impl EncodeFormat {
    /// MIME type written alongside each variant.
    pub fn content_type(self) -> &'static str {
        match self {
            EncodeFormat::Jpeg => "image/jpeg",
            EncodeFormat::Png => "image/png",
            EncodeFormat::WebP => "image/webp",
        }
    }
}

/// One resized output: its name (the key prefix) and the bounding box it must fit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantSpec {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

impl VariantSpec {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
        }
    }

    /// The default large/medium/small ladder.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("large", 1024, 1024),
            Self::new("medium", 512, 512),
            Self::new("small", 256, 256),
        ]
    }
}

/// Label annotation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelsConfig {
    /// Whether to call the labeling service at all
    pub enabled: bool,

    /// Label provider ("none" or "http")
    pub provider: String,

    /// Endpoint of the HTTP label service
    pub endpoint: String,

    /// API key for the label service. `${VAR}` is resolved from the environment.
    pub api_key: String,

    /// Maximum number of labels attached to an outcome
    pub max_labels: usize,

    /// Labels below this confidence (0.0-1.0) are dropped
    pub min_confidence: f32,

    /// Retries for retryable label service failures
    pub retry_attempts: u32,

    /// Base backoff delay in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for LabelsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: "none".to_string(),
            endpoint: String::new(),
            api_key: "${PRISM_LABELS_API_KEY}".to_string(),
            max_labels: 10,
            min_confidence: 0.0,
            retry_attempts: 2,
            retry_delay_ms: 250,
        }
    }
}

/// Resource limits and per-call timeout budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum source object size in megabytes
    pub max_source_size_mb: u64,

    /// Maximum decoded image dimension (width or height)
    pub max_image_dimension: u32,

    /// Source store read timeout in milliseconds
    pub fetch_timeout_ms: u64,

    /// Decode timeout in milliseconds
    pub decode_timeout_ms: u64,

    /// Label service call timeout in milliseconds
    pub label_timeout_ms: u64,

    /// Output store write timeout in milliseconds (per object)
    pub put_timeout_ms: u64,

    /// Wall-clock budget for a whole invocation in milliseconds
    pub invocation_timeout_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_source_size_mb: 50,
            max_image_dimension: 16384,
            fetch_timeout_ms: 10_000,
            decode_timeout_ms: 10_000,
            label_timeout_ms: 5_000,
            put_timeout_ms: 10_000,
            invocation_timeout_ms: 60_000,
        }
    }
}

/// Local object store used by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory; each container is a subdirectory
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("~/.prism/store"),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,

    /// Log format (pretty, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
