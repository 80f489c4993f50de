//! Pipeline orchestration - drives one inbound event through every stage.
//!
//! ```text
//! Fetching → Decoding → Generating → Annotating → Publishing → Completed | Failed
//! ```
//!
//! Every invocation is independent: the orchestrator owns no state that
//! outlives a call to [`Pipeline::process`], and its only side effects are
//! overwrites at deterministic keys in the output container.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::config::{Config, LimitsConfig, VariantSpec};
use crate::error::{ConfigError, ErrorKind, PipelineError};
use crate::event::{InboundEvent, SourceLocation};
use crate::labels::{AnnotateOptions, LabelAnnotator, LabelDetectorFactory};
use crate::store::{ObjectStore, StoredObject};
use crate::types::{
    Disposition, MetadataRecord, OutcomeStatus, ProcessingOutcome, Stage, VariantFailure,
};

use super::decode::ImageDecoder;
use super::publish::{ArtifactPublisher, PublishReport};
use super::variants::{GenerationReport, VariantGenerator};

/// The image variant pipeline for one deployment configuration.
pub struct Pipeline {
    source_store: Arc<dyn ObjectStore>,
    decoder: ImageDecoder,
    generator: Arc<VariantGenerator>,
    annotator: LabelAnnotator,
    publisher: ArtifactPublisher,
    variants: Arc<[VariantSpec]>,
    limits: LimitsConfig,
    max_labels: usize,
}

/// Final classification of a run that reached the publishing stage.
struct Verdict {
    status: OutcomeStatus,
    disposition: Disposition,
    error_kind: Option<ErrorKind>,
    error: Option<String>,
}

impl Pipeline {
    /// Build a pipeline with an explicit annotator.
    pub fn new(
        config: &Config,
        source_store: Arc<dyn ObjectStore>,
        output_store: Arc<dyn ObjectStore>,
        annotator: LabelAnnotator,
    ) -> Self {
        tracing::debug!(
            "Pipeline: source store {}, output store {}, labels {}",
            source_store.name(),
            output_store.name(),
            if annotator.is_enabled() { "enabled" } else { "disabled" }
        );
        Self {
            source_store,
            decoder: ImageDecoder::new(config.limits.clone()),
            generator: Arc::new(VariantGenerator::new(&config.output)),
            annotator,
            publisher: ArtifactPublisher::new(
                output_store,
                config.output.container.clone(),
                config.limits.put_timeout_ms,
            ),
            variants: Arc::from(config.variants.clone()),
            limits: config.limits.clone(),
            max_labels: config.labels.max_labels,
        }
    }

    /// Build a pipeline whose annotator comes from the `[labels]` section.
    pub fn from_config(
        config: &Config,
        source_store: Arc<dyn ObjectStore>,
        output_store: Arc<dyn ObjectStore>,
    ) -> Result<Self, ConfigError> {
        let annotator = match LabelDetectorFactory::create(&config.labels)? {
            Some(detector) => LabelAnnotator::new(
                detector,
                AnnotateOptions::from_config(&config.labels, &config.limits),
            ),
            None => LabelAnnotator::disabled(),
        };
        Ok(Self::new(config, source_store, output_store, annotator))
    }

    /// The configured variant ladder, in publication order.
    pub fn variants(&self) -> &[VariantSpec] {
        &self.variants
    }

    pub fn output_container(&self) -> &str {
        self.publisher.container()
    }

    /// Process one event. Never fails: every error is folded into the outcome.
    ///
    /// The whole run is bounded by `limits.invocation_timeout_ms`; running out
    /// of budget is reported like any other transient failure.
    pub async fn process(&self, event: &InboundEvent) -> ProcessingOutcome {
        let start = Instant::now();
        let stage = Mutex::new(Stage::Fetching);
        let budget_ms = self.limits.invocation_timeout_ms;

        match timeout(Duration::from_millis(budget_ms), self.run(event, &stage, start)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let reached = *stage.lock().unwrap_or_else(|p| p.into_inner());
                let err = PipelineError::Timeout {
                    stage: format!("{reached:?}").to_lowercase(),
                    timeout_ms: budget_ms,
                };
                tracing::warn!(event_id = %event.event_id, "Invocation for {} abandoned: {err}", event.source);
                ProcessingOutcome::failed(event, reached, &err, elapsed_ms(start))
            }
        }
    }

    async fn run(&self, event: &InboundEvent, stage: &Mutex<Stage>, start: Instant) -> ProcessingOutcome {
        tracing::debug!(event_id = %event.event_id, "Processing: {}", event.source);

        if let Err(e) = event.validate() {
            return self.fail(event, Stage::Fetching, e, start);
        }

        // Fetch
        let fetch_start = Instant::now();
        let source = match self.fetch(&event.source).await {
            Ok(source) => source,
            Err(e) => return self.fail(event, Stage::Fetching, e, start),
        };
        tracing::trace!(
            "  Fetch: {:?} ({} bytes from {})",
            fetch_start.elapsed(),
            source.bytes.len(),
            self.source_store.name()
        );

        let content_hash = blake3::hash(&source.bytes).to_hex().to_string();
        let source_content_type = source.content_type.clone();

        // Decode
        enter(stage, event, Stage::Decoding);
        let decode_start = Instant::now();
        let normalized = match self.decoder.decode(source.bytes, source.content_type).await {
            Ok(normalized) => normalized,
            Err(e) => return self.fail(event, Stage::Decoding, e, start),
        };
        let (source_width, source_height) = (normalized.width, normalized.height);
        tracing::trace!(
            "  Decode: {:?} ({}x{}, orientation {})",
            decode_start.elapsed(),
            source_width,
            source_height,
            normalized.applied_orientation.exif_value()
        );

        // Generate
        enter(stage, event, Stage::Generating);
        let generate_start = Instant::now();
        let generator = self.generator.clone();
        let specs = self.variants.clone();
        let generated: GenerationReport =
            match tokio::task::spawn_blocking(move || generator.generate(&normalized, &specs)).await {
                Ok(report) => report,
                Err(e) => {
                    let err = PipelineError::Encoding {
                        variant: "*".to_string(),
                        message: format!("generator task failed: {e}"),
                    };
                    return self.fail(event, Stage::Generating, err, start);
                }
            };
        tracing::trace!("  Generate: {:?}", generate_start.elapsed());

        let mut variant_failures: Vec<VariantFailure> = generated
            .failures
            .iter()
            .map(|(name, e)| VariantFailure::new(name.as_str(), None, e))
            .collect();

        if generated.is_empty() {
            let err = PipelineError::NoVariants {
                failed: generated.failures.len(),
            };
            let mut outcome = self.fail(event, Stage::Generating, err, start);
            outcome.variant_failures = variant_failures;
            return outcome;
        }

        // Annotate (best-effort, never fails, never eats the publish reserve)
        enter(stage, event, Stage::Annotating);
        let label_budget = self.label_budget(start);
        let annotation = self
            .annotator
            .annotate_within(&event.source, self.max_labels, label_budget)
            .await;

        // Publish variants, then metadata regardless of variant results
        enter(stage, event, Stage::Publishing);
        let publish_start = Instant::now();
        let published = self.publisher.publish(&event.source.key, &generated.variants).await;
        variant_failures.extend(
            published
                .failures
                .iter()
                .map(|(name, key, e)| VariantFailure::new(name.as_str(), Some(key.clone()), e)),
        );

        let mut verdict = settle(self.variants.len(), &generated, &published);

        let record = MetadataRecord {
            event_id: event.event_id.clone(),
            source: event.source.clone(),
            status: verdict.status,
            source_content_type,
            source_width,
            source_height,
            content_hash,
            variants: published.published.clone(),
            labels: annotation.labels.clone(),
            labels_degraded: annotation.degraded,
            variant_failures: variant_failures.clone(),
        };
        let metadata_key = match self.publisher.publish_metadata(&event.source.key, &record).await {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::warn!(event_id = %event.event_id, "Metadata publish failed: {e}");
                verdict.absorb_metadata_failure(&e);
                None
            }
        };
        tracing::trace!("  Publish: {:?}", publish_start.elapsed());

        let outcome = ProcessingOutcome {
            event_id: event.event_id.clone(),
            source: event.source.clone(),
            status: verdict.status,
            disposition: verdict.disposition,
            published_variant_keys: published.published_keys(),
            metadata_key,
            labels: annotation.labels,
            labels_degraded: annotation.degraded,
            error_kind: verdict.error_kind,
            error: verdict.error,
            failed_stage: (verdict.disposition != Disposition::Completed).then_some(Stage::Publishing),
            variant_failures,
            processing_ms: elapsed_ms(start),
        };

        if outcome.disposition == Disposition::Completed {
            enter(stage, event, Stage::Completed);
            tracing::info!(
                event_id = %event.event_id,
                "Processed {} in {}ms: {} variants, {} labels ({:?})",
                event.source,
                outcome.processing_ms,
                outcome.published_variant_keys.len(),
                outcome.labels.len(),
                outcome.status
            );
        } else {
            enter(stage, event, Stage::Failed);
            tracing::warn!(
                event_id = %event.event_id,
                "Publishing for {} failed ({:?}): {}",
                event.source,
                outcome.disposition,
                outcome.reason()
            );
        }
        outcome
    }

    /// Time annotation may spend: what is left of the invocation budget,
    /// minus one put timeout per variant and one for the metadata record.
    /// At least half of the remaining time is always kept for publishing.
    fn label_budget(&self, start: Instant) -> Duration {
        let remaining = Duration::from_millis(self.limits.invocation_timeout_ms)
            .saturating_sub(start.elapsed());
        let puts = self.variants.len() as u32 + 1;
        let reserve = Duration::from_millis(self.limits.put_timeout_ms)
            .saturating_mul(puts)
            .min(remaining / 2);
        remaining - reserve
    }

    async fn fetch(&self, source: &SourceLocation) -> Result<StoredObject, PipelineError> {
        let location = source.to_string();
        let result = timeout(
            Duration::from_millis(self.limits.fetch_timeout_ms),
            self.source_store.get(&source.container, &source.key),
        )
        .await;

        let object = match result {
            Ok(Ok(object)) => object,
            Ok(Err(e)) => return Err(PipelineError::from_source_error(&location, e)),
            Err(_) => {
                return Err(PipelineError::SourceTransient {
                    location,
                    message: format!("fetch timed out after {}ms", self.limits.fetch_timeout_ms),
                })
            }
        };

        let max_bytes = self.limits.max_source_size_mb.saturating_mul(1024 * 1024);
        if object.bytes.len() as u64 > max_bytes {
            return Err(PipelineError::InputTooLarge(format!(
                "{location} is {} bytes (limit {}MB)",
                object.bytes.len(),
                self.limits.max_source_size_mb
            )));
        }
        Ok(object)
    }

    fn fail(&self, event: &InboundEvent, stage: Stage, error: PipelineError, start: Instant) -> ProcessingOutcome {
        let outcome = ProcessingOutcome::failed(event, stage, &error, elapsed_ms(start));
        tracing::warn!(
            event_id = %event.event_id,
            "{:?} failed for {} ({:?}): {error}",
            stage,
            event.source,
            outcome.disposition
        );
        outcome
    }
}

fn enter(stage: &Mutex<Stage>, event: &InboundEvent, next: Stage) {
    *stage.lock().unwrap_or_else(|p| p.into_inner()) = next;
    tracing::debug!(event_id = %event.event_id, "  -> {next:?}");
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Decide status and disposition once every variant write has been attempted.
///
/// - all configured variants published: success, completed
/// - any permanent publish failure: permanent
/// - otherwise any transient publish failure: retryable
/// - only encoding failures: partial but completed, since re-running a pure
///   encoder cannot change the result
fn settle(expected: usize, generated: &GenerationReport, published: &PublishReport) -> Verdict {
    let count = published.published.len();
    let status = if count == expected && published.failures.is_empty() {
        OutcomeStatus::Success
    } else if count > 0 {
        OutcomeStatus::Partial
    } else {
        OutcomeStatus::Failure
    };

    let first_failure = if published.has_permanent_failure() {
        published.failures.iter().find(|(_, _, e)| !e.is_retryable())
    } else {
        published.failures.first()
    };

    if let Some((_, _, e)) = first_failure {
        return Verdict {
            status,
            disposition: Disposition::for_error(e.kind()),
            error_kind: Some(e.kind()),
            error: Some(e.to_string()),
        };
    }
    if let Some((_, e)) = generated.failures.first() {
        return Verdict {
            status,
            disposition: Disposition::Completed,
            error_kind: Some(e.kind()),
            error: Some(e.to_string()),
        };
    }
    Verdict {
        status,
        disposition: Disposition::Completed,
        error_kind: None,
        error: None,
    }
}

impl Verdict {
    /// Fold a failed metadata write into an otherwise settled verdict.
    ///
    /// The reported error always belongs to the failure that decided the
    /// disposition; an equally severe earlier failure keeps its place.
    fn absorb_metadata_failure(&mut self, error: &PipelineError) {
        if self.status == OutcomeStatus::Success {
            self.status = OutcomeStatus::Partial;
        }
        let disposition = Disposition::for_error(error.kind());
        if disposition > self.disposition || self.error_kind.is_none() {
            self.error_kind = Some(error.kind());
            self.error = Some(error.to_string());
        }
        self.disposition = self.disposition.max(disposition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PublishedVariant, Variant};

    fn published(names: &[&str]) -> Vec<PublishedVariant> {
        names
            .iter()
            .map(|n| PublishedVariant {
                name: n.to_string(),
                key: format!("{n}/a.jpg"),
                width: 1,
                height: 1,
                content_type: "image/jpeg".into(),
                size_bytes: 1,
            })
            .collect()
    }

    fn generated(ok: &[&str], failed: &[&str]) -> GenerationReport {
        GenerationReport {
            variants: ok
                .iter()
                .map(|n| Variant {
                    name: n.to_string(),
                    bytes: vec![],
                    content_type: "image/jpeg".into(),
                    width: 1,
                    height: 1,
                })
                .collect(),
            failures: failed
                .iter()
                .map(|n| {
                    (
                        n.to_string(),
                        PipelineError::Encoding {
                            variant: n.to_string(),
                            message: "boom".into(),
                        },
                    )
                })
                .collect(),
        }
    }

    fn transient(name: &str) -> (String, String, PipelineError) {
        let key = format!("{name}/a.jpg");
        (
            name.to_string(),
            key.clone(),
            PipelineError::PublishTransient {
                key,
                message: "throttled".into(),
            },
        )
    }

    fn permanent(name: &str) -> (String, String, PipelineError) {
        let key = format!("{name}/a.jpg");
        (
            name.to_string(),
            key.clone(),
            PipelineError::PublishPermanent {
                key,
                message: "denied".into(),
            },
        )
    }

    #[test]
    fn test_settle_all_published() {
        let report = PublishReport {
            published: published(&["l", "m", "s"]),
            failures: vec![],
        };
        let verdict = settle(3, &generated(&["l", "m", "s"], &[]), &report);
        assert_eq!(verdict.status, OutcomeStatus::Success);
        assert_eq!(verdict.disposition, Disposition::Completed);
        assert!(verdict.error_kind.is_none());
    }

    #[test]
    fn test_settle_one_transient_failure_is_partial_retryable() {
        let report = PublishReport {
            published: published(&["l", "s"]),
            failures: vec![transient("m")],
        };
        let verdict = settle(3, &generated(&["l", "m", "s"], &[]), &report);
        assert_eq!(verdict.status, OutcomeStatus::Partial);
        assert_eq!(verdict.disposition, Disposition::Retryable);
        assert_eq!(verdict.error_kind, Some(ErrorKind::PublishTransient));
    }

    #[test]
    fn test_settle_permanent_failure_wins() {
        let report = PublishReport {
            published: published(&["l"]),
            failures: vec![transient("m"), permanent("s")],
        };
        let verdict = settle(3, &generated(&["l", "m", "s"], &[]), &report);
        assert_eq!(verdict.disposition, Disposition::Permanent);
        assert_eq!(verdict.error_kind, Some(ErrorKind::PublishPermanent));
    }

    #[test]
    fn test_settle_all_transient_is_failure_retryable() {
        let report = PublishReport {
            published: vec![],
            failures: vec![transient("l")],
        };
        let verdict = settle(1, &generated(&["l"], &[]), &report);
        assert_eq!(verdict.status, OutcomeStatus::Failure);
        assert_eq!(verdict.disposition, Disposition::Retryable);
    }

    #[test]
    fn test_settle_encoding_failure_is_partial_completed() {
        let report = PublishReport {
            published: published(&["l", "s"]),
            failures: vec![],
        };
        let verdict = settle(3, &generated(&["l", "s"], &["m"]), &report);
        assert_eq!(verdict.status, OutcomeStatus::Partial);
        assert_eq!(verdict.disposition, Disposition::Completed);
        assert_eq!(verdict.error_kind, Some(ErrorKind::EncodingError));
    }

    #[test]
    fn test_metadata_failure_downgrades_success() {
        let mut verdict = Verdict {
            status: OutcomeStatus::Success,
            disposition: Disposition::Completed,
            error_kind: None,
            error: None,
        };
        verdict.absorb_metadata_failure(&PipelineError::PublishTransient {
            key: "metadata/a.jpg.json".into(),
            message: "reset".into(),
        });
        assert_eq!(verdict.status, OutcomeStatus::Partial);
        assert_eq!(verdict.disposition, Disposition::Retryable);
        assert_eq!(verdict.error_kind, Some(ErrorKind::PublishTransient));
    }

    #[test]
    fn test_metadata_permanent_failure_escalates_retryable() {
        let mut verdict = Verdict {
            status: OutcomeStatus::Partial,
            disposition: Disposition::Retryable,
            error_kind: Some(ErrorKind::PublishTransient),
            error: Some("throttled".into()),
        };
        verdict.absorb_metadata_failure(&PipelineError::PublishPermanent {
            key: "metadata/a.jpg.json".into(),
            message: "denied".into(),
        });
        assert_eq!(verdict.disposition, Disposition::Permanent);
        assert_eq!(verdict.error_kind, Some(ErrorKind::PublishPermanent));
        assert!(verdict.error.as_deref().unwrap().contains("denied"));
        assert!(!verdict.error_kind.unwrap().is_retryable());
    }

    #[test]
    fn test_metadata_transient_failure_keeps_permanent_cause() {
        let mut verdict = Verdict {
            status: OutcomeStatus::Partial,
            disposition: Disposition::Permanent,
            error_kind: Some(ErrorKind::PublishPermanent),
            error: Some("denied".into()),
        };
        verdict.absorb_metadata_failure(&PipelineError::PublishTransient {
            key: "metadata/a.jpg.json".into(),
            message: "reset".into(),
        });
        assert_eq!(verdict.disposition, Disposition::Permanent);
        assert_eq!(verdict.error_kind, Some(ErrorKind::PublishPermanent));
        assert_eq!(verdict.error.as_deref(), Some("denied"));
    }

    #[test]
    fn test_metadata_failure_after_encoding_failure_reports_publish_error() {
        let mut verdict = Verdict {
            status: OutcomeStatus::Partial,
            disposition: Disposition::Completed,
            error_kind: Some(ErrorKind::EncodingError),
            error: Some("boom".into()),
        };
        verdict.absorb_metadata_failure(&PipelineError::PublishTransient {
            key: "metadata/a.jpg.json".into(),
            message: "reset".into(),
        });
        assert_eq!(verdict.disposition, Disposition::Retryable);
        assert_eq!(verdict.error_kind, Some(ErrorKind::PublishTransient));
    }
}
