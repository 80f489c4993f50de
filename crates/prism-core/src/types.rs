//! Core data types for the Prism pipeline.
//!
//! These types describe what one invocation produces: the encoded variants,
//! the labels, and the classified outcome handed back to the invoker.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ErrorKind, PipelineError};
use crate::event::{InboundEvent, SourceLocation};

/// A semantic label with its confidence score (0.0 to 1.0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelResult {
    pub label: String,
    pub confidence: f32,
}

impl LabelResult {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// One resized, re-encoded derivative of the source image.
#[derive(Clone, PartialEq, Eq)]
pub struct Variant {
    pub name: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub width: u32,
    pub height: u32,
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variant")
            .field("name", &self.name)
            .field("bytes", &self.bytes.len())
            .field("content_type", &self.content_type)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Pipeline state for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetching,
    Decoding,
    Generating,
    Annotating,
    Publishing,
    Completed,
    Failed,
}

/// How much of the requested work landed in the output store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Every configured variant and the metadata record were published
    Success,
    /// Some, but not all, artifacts were published
    Partial,
    /// Nothing was published
    Failure,
}

/// What the invoking mechanism should do with the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Processing finished; do not redeliver
    Completed,
    /// Failed, safe and worthwhile to redeliver
    Retryable,
    /// Failed, redelivery cannot help; route to the dead-letter channel
    Permanent,
}

impl Disposition {
    pub fn for_error(kind: ErrorKind) -> Self {
        if kind.is_retryable() {
            Disposition::Retryable
        } else {
            Disposition::Permanent
        }
    }
}

/// A variant that was not produced or not published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantFailure {
    pub variant: String,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl VariantFailure {
    pub fn new(variant: impl Into<String>, key: Option<String>, error: &PipelineError) -> Self {
        Self {
            variant: variant.into(),
            kind: error.kind(),
            message: error.to_string(),
            key,
        }
    }
}

/// A variant that was acknowledged by the output store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedVariant {
    pub name: String,
    pub key: String,
    pub width: u32,
    pub height: u32,
    pub content_type: String,
    pub size_bytes: u64,
}

/// The classified result of one invocation, returned to the invoker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingOutcome {
    pub event_id: String,
    pub source: SourceLocation,
    pub status: OutcomeStatus,
    pub disposition: Disposition,

    /// Keys acknowledged by the output store, in variant order
    pub published_variant_keys: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_key: Option<String>,

    pub labels: Vec<LabelResult>,

    /// True when the label service failed and labels were dropped
    #[serde(default)]
    pub labels_degraded: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variant_failures: Vec<VariantFailure>,

    pub processing_ms: u64,
}

impl ProcessingOutcome {
    /// Outcome for an invocation that stopped before anything was published.
    pub fn failed(event: &InboundEvent, stage: Stage, error: &PipelineError, elapsed_ms: u64) -> Self {
        let kind = error.kind();
        Self {
            event_id: event.event_id.clone(),
            source: event.source.clone(),
            status: OutcomeStatus::Failure,
            disposition: Disposition::for_error(kind),
            published_variant_keys: Vec::new(),
            metadata_key: None,
            labels: Vec::new(),
            labels_degraded: false,
            error_kind: Some(kind),
            error: Some(error.to_string()),
            failed_stage: Some(stage),
            variant_failures: Vec::new(),
            processing_ms: elapsed_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    pub fn is_retryable(&self) -> bool {
        self.disposition == Disposition::Retryable
    }

    /// One-line reason suitable for an operator.
    pub fn reason(&self) -> String {
        match (&self.error_kind, &self.error) {
            (Some(kind), Some(message)) => format!("{kind}: {message}"),
            (Some(kind), None) => kind.to_string(),
            _ => format!("{:?}", self.status).to_lowercase(),
        }
    }
}

/// The metadata record written next to the variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub event_id: String,
    pub source: SourceLocation,
    pub status: OutcomeStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_content_type: Option<String>,

    pub source_width: u32,
    pub source_height: u32,

    /// BLAKE3 hash of the source bytes
    pub content_hash: String,

    pub variants: Vec<PublishedVariant>,
    pub labels: Vec<LabelResult>,
    pub labels_degraded: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variant_failures: Vec<VariantFailure>,
}

/// An event that will not be processed again, with the reason it was given up on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub event: InboundEvent,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    pub attempts: u32,
}

impl DeadLetter {
    pub fn from_outcome(event: &InboundEvent, outcome: &ProcessingOutcome, attempts: u32) -> Self {
        Self {
            event: event.clone(),
            reason: outcome.reason(),
            error_kind: outcome.error_kind,
            failed_stage: outcome.failed_stage,
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> InboundEvent {
        InboundEvent::new("evt-1", SourceLocation::new("uploads", "cat.jpg"))
    }

    #[test]
    fn test_failed_outcome_classification() {
        let err = PipelineError::SourceUnavailable {
            location: "uploads/cat.jpg".into(),
            message: "not found".into(),
        };
        let outcome = ProcessingOutcome::failed(&sample_event(), Stage::Fetching, &err, 3);
        assert_eq!(outcome.status, OutcomeStatus::Failure);
        assert_eq!(outcome.disposition, Disposition::Permanent);
        assert_eq!(outcome.error_kind, Some(ErrorKind::SourceUnavailable));
        assert_eq!(outcome.failed_stage, Some(Stage::Fetching));
        assert!(!outcome.is_retryable());
    }

    #[test]
    fn test_transient_failure_is_retryable() {
        let err = PipelineError::Timeout {
            stage: "fetch".into(),
            timeout_ms: 100,
        };
        let outcome = ProcessingOutcome::failed(&sample_event(), Stage::Fetching, &err, 100);
        assert!(outcome.is_retryable());
    }

    #[test]
    fn test_dead_letter_carries_event_and_reason() {
        let event = sample_event();
        let err = PipelineError::CorruptInput("unexpected end of file".into());
        let outcome = ProcessingOutcome::failed(&event, Stage::Decoding, &err, 5);
        let letter = DeadLetter::from_outcome(&event, &outcome, 1);

        assert_eq!(letter.event, event);
        assert!(letter.reason.starts_with("corrupt_input:"));
        assert!(letter.reason.contains("unexpected end of file"));
        assert_eq!(letter.failed_stage, Some(Stage::Decoding));
    }

    #[test]
    fn test_outcome_json_omits_empty_fields() {
        let event = sample_event();
        let err = PipelineError::InvalidEvent("event id is empty".into());
        let mut outcome = ProcessingOutcome::failed(&event, Stage::Fetching, &err, 0);
        outcome.error = None;
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["disposition"], "permanent");
        assert!(json.get("variant_failures").is_none());
        assert!(json.get("metadata_key").is_none());
    }

    #[test]
    fn test_variant_debug_hides_bytes() {
        let variant = Variant {
            name: "small".into(),
            bytes: vec![0; 2048],
            content_type: "image/jpeg".into(),
            width: 256,
            height: 128,
        };
        let debug = format!("{variant:?}");
        assert!(debug.contains("bytes: 2048"));
    }
}
