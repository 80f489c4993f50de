//! Inbound object-created events.
//!
//! The delivery mechanism hands the pipeline a notification document. Two
//! shapes are accepted: the common `{"Records": [...]}` object-created
//! notification, and a bare [`InboundEvent`] (what a dead letter carries, so
//! an operator can replay it unchanged).

use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PipelineError;

/// Container + key reference to an object in a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub container: String,
    pub key: String,
}

impl SourceLocation {
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.key)
    }
}

/// One object-created notification: exactly one source reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub event_id: String,
    pub source: SourceLocation,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(event_id: impl Into<String>, source: SourceLocation) -> Self {
        Self {
            event_id: event_id.into(),
            source,
            received_at: Utc::now(),
        }
    }

    /// Reject events that are missing required fields. Performs no I/O.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.event_id.trim().is_empty() {
            return Err(PipelineError::InvalidEvent("event id is empty".into()));
        }
        if self.source.container.trim().is_empty() {
            return Err(PipelineError::InvalidEvent(
                "source container is empty".into(),
            ));
        }
        if self.source.key.is_empty() || self.source.key.ends_with('/') {
            return Err(PipelineError::InvalidEvent(format!(
                "source key {:?} does not name an object",
                self.source.key
            )));
        }
        Ok(())
    }
}

// --- Notification wire types ---

#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope {
    Notification(Notification),
    Single(InboundEvent),
}

#[derive(Deserialize)]
struct Notification {
    #[serde(rename = "Records")]
    records: Vec<Record>,
}

#[derive(Deserialize)]
struct Record {
    #[serde(rename = "eventID")]
    event_id: Option<String>,
    #[serde(rename = "eventTime")]
    event_time: Option<DateTime<Utc>>,
    s3: Option<ObjectEntity>,
}

#[derive(Deserialize)]
struct ObjectEntity {
    bucket: Option<BucketRef>,
    object: Option<ObjectRef>,
}

#[derive(Deserialize)]
struct BucketRef {
    name: Option<String>,
}

#[derive(Deserialize)]
struct ObjectRef {
    key: Option<String>,
    sequencer: Option<String>,
}

/// Parse a notification document into one event per record.
///
/// Each record becomes an independent [`InboundEvent`]; a record that lacks
/// a container, key, or identity fails the whole document with `InvalidEvent`.
pub fn parse_events(json: &str) -> Result<Vec<InboundEvent>, PipelineError> {
    let envelope: Envelope = serde_json::from_str(json)
        .map_err(|e| PipelineError::InvalidEvent(format!("unrecognized event payload: {e}")))?;

    let events = match envelope {
        Envelope::Single(event) => vec![event],
        Envelope::Notification(notification) => {
            if notification.records.is_empty() {
                return Err(PipelineError::InvalidEvent(
                    "notification contains no records".into(),
                ));
            }
            notification
                .records
                .into_iter()
                .enumerate()
                .map(|(index, record)| record_to_event(index, record))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    for event in &events {
        event.validate()?;
    }
    Ok(events)
}

fn record_to_event(index: usize, record: Record) -> Result<InboundEvent, PipelineError> {
    let missing = |field: &str| PipelineError::InvalidEvent(format!("record {index}: missing {field}"));

    let entity = record.s3.ok_or_else(|| missing("s3"))?;
    let container = entity
        .bucket
        .and_then(|b| b.name)
        .ok_or_else(|| missing("s3.bucket.name"))?;
    let object = entity.object.ok_or_else(|| missing("s3.object"))?;
    let raw_key = object.key.ok_or_else(|| missing("s3.object.key"))?;
    let key = decode_object_key(&raw_key)?;

    // Object-store notifications may omit a record id; the per-object
    // sequencer is stable across redeliveries of the same record.
    let event_id = match (record.event_id, object.sequencer) {
        (Some(id), _) if !id.is_empty() => id,
        (_, Some(sequencer)) => format!("{container}/{key}@{sequencer}"),
        _ => return Err(missing("eventID or s3.object.sequencer")),
    };

    Ok(InboundEvent {
        event_id,
        source: SourceLocation::new(container, key),
        received_at: record.event_time.unwrap_or_else(Utc::now),
    })
}

/// Decode a form-url-encoded object key (`+` is a space, `%XX` escapes).
pub fn decode_object_key(raw: &str) -> Result<String, PipelineError> {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|key| key.into_owned())
        .map_err(|e| PipelineError::InvalidEvent(format!("object key {raw:?} is not UTF-8: {e}")))
}
