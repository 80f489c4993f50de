//! Image variant pipeline components.
//!
//! The stages one invocation runs through:
//! - **decode**: Sniff the format and decode bytes into pixels
//! - **orientation**: Honor the EXIF orientation tag
//! - **variants**: Resize and re-encode each configured variant
//! - **publish**: Write variants and the metadata record under deterministic keys
//! - **processor**: Orchestrates the full pipeline for one event

pub mod decode;
pub mod orientation;
pub mod processor;
pub mod publish;
pub mod variants;

// Re-exports for convenient access
pub use decode::{ImageDecoder, NormalizedImage};
pub use orientation::Orientation;
pub use processor::Pipeline;
pub use publish::{metadata_key, variant_key, ArtifactPublisher, PublishReport};
pub use variants::{fit_within, GenerationReport, VariantGenerator};
