//! Artifact publication to the output store.
//!
//! Output keys are a pure function of the variant name and the source key,
//! so a redelivered event overwrites the same objects instead of adding new
//! ones.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::error::PipelineError;
use crate::store::ObjectStore;
use crate::types::{MetadataRecord, PublishedVariant, Variant};

/// Key prefix for metadata records.
pub const METADATA_PREFIX: &str = "metadata";

/// Output key for a variant: `<variant name>/<source key>`.
pub fn variant_key(variant_name: &str, source_key: &str) -> String {
    format!("{variant_name}/{source_key}")
}

/// Output key for the metadata record: `metadata/<source key>.json`.
pub fn metadata_key(source_key: &str) -> String {
    format!("{METADATA_PREFIX}/{source_key}.json")
}

/// Result of attempting every variant.
#[derive(Debug, Default)]
pub struct PublishReport {
    /// Acknowledged variants, in input order
    pub published: Vec<PublishedVariant>,
    /// (variant name, key, error) for every rejected or failed write
    pub failures: Vec<(String, String, PipelineError)>,
}

impl PublishReport {
    pub fn published_keys(&self) -> Vec<String> {
        self.published.iter().map(|p| p.key.clone()).collect()
    }

    /// Whether any write failed in a way redelivery cannot fix.
    pub fn has_permanent_failure(&self) -> bool {
        self.failures.iter().any(|(_, _, e)| !e.is_retryable())
    }
}

/// Writes variants and metadata records to one output container.
pub struct ArtifactPublisher {
    store: Arc<dyn ObjectStore>,
    container: String,
    put_timeout_ms: u64,
}

impl ArtifactPublisher {
    pub fn new(store: Arc<dyn ObjectStore>, container: impl Into<String>, put_timeout_ms: u64) -> Self {
        Self {
            store,
            container: container.into(),
            put_timeout_ms,
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Attempt every variant; a failure on one does not stop the others.
    pub async fn publish(&self, source_key: &str, variants: &[Variant]) -> PublishReport {
        let mut report = PublishReport::default();

        for variant in variants {
            let key = variant_key(&variant.name, source_key);
            match self.put(&key, &variant.bytes, &variant.content_type).await {
                Ok(()) => {
                    tracing::debug!("Published {}/{key} to {}", self.container, self.store.name());
                    report.published.push(PublishedVariant {
                        name: variant.name.clone(),
                        key,
                        width: variant.width,
                        height: variant.height,
                        content_type: variant.content_type.clone(),
                        size_bytes: variant.bytes.len() as u64,
                    });
                }
                Err(e) => {
                    tracing::warn!("Publish of {}/{key} to {} failed: {e}", self.container, self.store.name());
                    report.failures.push((variant.name.clone(), key, e));
                }
            }
        }

        report
    }

    /// Write the metadata record. Returns the key it was written under.
    pub async fn publish_metadata(
        &self,
        source_key: &str,
        record: &MetadataRecord,
    ) -> Result<String, PipelineError> {
        let key = metadata_key(source_key);
        let body = serde_json::to_vec_pretty(record).map_err(|e| PipelineError::PublishPermanent {
            key: key.clone(),
            message: format!("cannot serialize metadata: {e}"),
        })?;
        self.put(&key, &body, "application/json").await?;
        Ok(key)
    }

    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), PipelineError> {
        let result = timeout(
            Duration::from_millis(self.put_timeout_ms),
            self.store.put(&self.container, key, bytes, content_type),
        )
        .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PipelineError::from_publish_error(key, e)),
            Err(_) => Err(PipelineError::PublishTransient {
                key: key.to_string(),
                message: format!("put timed out after {}ms", self.put_timeout_ms),
            }),
        }
    }
}
