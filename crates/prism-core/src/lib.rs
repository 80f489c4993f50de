//! Prism Core - event-driven image variant pipeline.
//!
//! Prism reacts to "an image object was created" notifications: it fetches
//! the source image, produces a fixed set of resized variants, optionally
//! asks an external service for descriptive labels, and publishes the
//! variants plus a metadata record to an output container.
//!
//! # Architecture
//!
//! ```text
//! Event → Fetch → Decode → Generate variants → Annotate → Publish → Outcome
//! ```
//!
//! Invocations are stateless. Output keys are a pure function of the source
//! key, so redelivering an event overwrites the same objects.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prism_core::{Config, FsStore, Prism};
//!
//! #[tokio::main]
//! async fn main() -> prism_core::Result<()> {
//!     let config = Config::load()?;
//!     let store = Arc::new(FsStore::new(config.storage_root()));
//!     let prism = Prism::new(config, store.clone(), store)?;
//!
//!     let json = std::fs::read_to_string("event.json")?;
//!     for outcome in prism.handle_notification(&json).await? {
//!         println!("{}: {:?}", outcome.source, outcome.status);
//!     }
//!     Ok(())
//! }
//! ```

// Module declarations
pub mod config;
pub mod error;
pub mod event;
pub mod labels;
pub mod output;
pub mod pipeline;
pub mod retry;
pub mod store;
pub mod types;

use std::sync::Arc;

// Re-exports for convenient access
pub use config::Config;
pub use error::{ConfigError, ErrorKind, PipelineError, PipelineResult, PrismError, Result, StoreError};
pub use event::{parse_events, InboundEvent, SourceLocation};
pub use labels::{LabelAnnotator, LabelDetector};
pub use output::{DeadLetterLog, OutputFormat, OutputWriter};
pub use pipeline::Pipeline;
pub use store::{FsStore, MemoryStore, ObjectStore};
pub use types::{
    DeadLetter, Disposition, LabelResult, MetadataRecord, OutcomeStatus, ProcessingOutcome, Stage,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prism handler - the main entry point for processing notifications.
pub struct Prism {
    config: Config,
    pipeline: Pipeline,
}

impl Prism {
    /// Create a handler reading sources from `source_store` and publishing to
    /// `output_store`. The label detector is built from `config.labels`.
    pub fn new(
        config: Config,
        source_store: Arc<dyn ObjectStore>,
        output_store: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        tracing::debug!("Initializing Prism v{}", VERSION);
        let pipeline = Pipeline::from_config(&config, source_store, output_store)?;
        Ok(Self { config, pipeline })
    }

    /// Create a handler with an explicit annotator.
    pub fn with_annotator(
        config: Config,
        source_store: Arc<dyn ObjectStore>,
        output_store: Arc<dyn ObjectStore>,
        annotator: LabelAnnotator,
    ) -> Self {
        let pipeline = Pipeline::new(&config, source_store, output_store, annotator);
        Self { config, pipeline }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Process one event.
    pub async fn process(&self, event: &InboundEvent) -> ProcessingOutcome {
        self.pipeline.process(event).await
    }

    /// Parse a notification document and process every event it carries.
    ///
    /// Records are processed one at a time and independently; the result
    /// has one outcome per record, in document order. Only a malformed
    /// document is an `Err`.
    pub async fn handle_notification(&self, json: &str) -> Result<Vec<ProcessingOutcome>> {
        let events = parse_events(json)?;
        let mut outcomes = Vec::with_capacity(events.len());
        for event in &events {
            outcomes.push(self.pipeline.process(event).await);
        }
        Ok(outcomes)
    }
}
