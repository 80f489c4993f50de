//! Configuration validation with range checks.

use std::collections::HashSet;

use crate::error::ConfigError;

use super::Config;

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.output.container.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "output.container must not be empty".into(),
            ));
        }
        if !(1..=100).contains(&self.output.quality) {
            return Err(ConfigError::ValidationError(
                "output.quality must be between 1 and 100".into(),
            ));
        }
        self.validate_variants()?;

        if self.labels.max_labels == 0 {
            return Err(ConfigError::ValidationError(
                "labels.max_labels must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.labels.min_confidence) {
            return Err(ConfigError::ValidationError(
                "labels.min_confidence must be between 0.0 and 1.0".into(),
            ));
        }
        match self.labels.provider.as_str() {
            "none" => {}
            "http" => {
                if self.labels.enabled && self.labels.endpoint.trim().is_empty() {
                    return Err(ConfigError::ValidationError(
                        "labels.endpoint is required for the http provider".into(),
                    ));
                }
            }
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "labels.provider must be \"none\" or \"http\", got {other:?}"
                )));
            }
        }

        let timeouts = [
            ("limits.fetch_timeout_ms", self.limits.fetch_timeout_ms),
            ("limits.decode_timeout_ms", self.limits.decode_timeout_ms),
            ("limits.label_timeout_ms", self.limits.label_timeout_ms),
            ("limits.put_timeout_ms", self.limits.put_timeout_ms),
            (
                "limits.invocation_timeout_ms",
                self.limits.invocation_timeout_ms,
            ),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!("{name} must be > 0")));
            }
        }
        if self.limits.max_source_size_mb == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_source_size_mb must be > 0".into(),
            ));
        }
        if self.limits.max_image_dimension == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_image_dimension must be > 0".into(),
            ));
        }
        Ok(())
    }

    fn validate_variants(&self) -> Result<(), ConfigError> {
        if self.variants.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one [[variants]] entry is required".into(),
            ));
        }

        let mut seen = HashSet::new();
        for spec in &self.variants {
            let name = spec.name.trim();
            if name.is_empty() || name.contains('/') || name == "." || name == ".." {
                return Err(ConfigError::ValidationError(format!(
                    "variant name {:?} is not usable as a key prefix",
                    spec.name
                )));
            }
            // "metadata/" holds the metadata records
            if name == "metadata" {
                return Err(ConfigError::ValidationError(
                    "variant name \"metadata\" is reserved".into(),
                ));
            }
            if !seen.insert(name) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate variant name {name:?}"
                )));
            }
            if spec.width == 0 || spec.height == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "variant {name:?} must have non-zero width and height"
                )));
            }
        }
        Ok(())
    }
}
