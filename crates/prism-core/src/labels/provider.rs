//! Label detector trait and the factory that builds one from config.

use async_trait::async_trait;

use crate::config::LabelsConfig;
use crate::error::{ConfigError, PipelineError};
use crate::event::SourceLocation;
use crate::types::LabelResult;

/// External labeling collaborator.
///
/// Uses `async_trait` because native async fn in trait is not object-safe
/// (we need `Box<dyn LabelDetector>` for dynamic dispatch).
#[async_trait]
pub trait LabelDetector: Send + Sync {
    /// Provider name for logging (e.g., "http").
    fn name(&self) -> &str;

    /// Detect up to `max_labels` labels for the object at `source`.
    async fn detect_labels(
        &self,
        source: &SourceLocation,
        max_labels: usize,
    ) -> Result<Vec<LabelResult>, PipelineError>;
}

/// Resolve `${ENV_VAR}` references in config strings.
pub fn resolve_env_var(value: &str) -> Option<String> {
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        std::env::var(var_name).ok().filter(|v| !v.is_empty())
    } else if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Factory that creates the configured label detector.
pub struct LabelDetectorFactory;

impl LabelDetectorFactory {
    /// Returns `None` when labeling is disabled or the provider is "none".
    pub fn create(config: &LabelsConfig) -> Result<Option<Box<dyn LabelDetector>>, ConfigError> {
        if !config.enabled {
            return Ok(None);
        }
        match config.provider.as_str() {
            "none" => Ok(None),
            "http" => {
                if config.endpoint.trim().is_empty() {
                    return Err(ConfigError::ValidationError(
                        "labels.endpoint is required for the http provider".into(),
                    ));
                }
                let api_key = resolve_env_var(&config.api_key);
                Ok(Some(Box::new(super::http::HttpLabelDetector::new(
                    &config.endpoint,
                    api_key,
                ))))
            }
            other => Err(ConfigError::ValidationError(format!(
                "Unknown label provider: {other}"
            ))),
        }
    }
}
