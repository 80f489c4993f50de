//! Label annotation against an external labeling collaborator.
//!
//! Provides the detector abstraction, an HTTP implementation, and the
//! best-effort annotator the pipeline calls.

pub(crate) mod annotator;
pub(crate) mod http;
pub(crate) mod provider;

pub use annotator::{AnnotateOptions, Annotation, LabelAnnotator};
pub use http::HttpLabelDetector;
pub use provider::{resolve_env_var, LabelDetector, LabelDetectorFactory};
