//! Best-effort label annotation.
//!
//! The annotator wraps a [`LabelDetector`] with a per-call timeout and a
//! bounded retry loop. It never fails: any error after the last attempt is
//! logged as a soft failure and reported as an empty, degraded annotation.

use std::sync::Arc;
use std::time::Duration;

use super::provider::LabelDetector;
use crate::config::{LabelsConfig, LimitsConfig};
use crate::event::SourceLocation;
use crate::retry;
use crate::types::LabelResult;

/// Tuning for annotation calls.
#[derive(Debug, Clone)]
pub struct AnnotateOptions {
    /// Labels below this confidence are dropped
    pub min_confidence: f32,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    /// Maximum retries per invocation
    pub retry_attempts: u32,
    /// Base backoff delay in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for AnnotateOptions {
    fn default() -> Self {
        Self {
            min_confidence: 0.0,
            timeout_ms: 5_000,
            retry_attempts: 2,
            retry_delay_ms: 250,
        }
    }
}

impl AnnotateOptions {
    pub fn from_config(labels: &LabelsConfig, limits: &LimitsConfig) -> Self {
        Self {
            min_confidence: labels.min_confidence,
            timeout_ms: limits.label_timeout_ms,
            retry_attempts: labels.retry_attempts,
            retry_delay_ms: labels.retry_delay_ms,
        }
    }
}

/// Labels for one source, and whether they were lost to a service failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotation {
    pub labels: Vec<LabelResult>,
    /// True when the detector failed and the empty result is a fallback
    pub degraded: bool,
}

/// Optional enrichment step in front of the labeling collaborator.
pub struct LabelAnnotator {
    detector: Option<Arc<dyn LabelDetector>>,
    options: AnnotateOptions,
}

impl LabelAnnotator {
    pub fn new(detector: Box<dyn LabelDetector>, options: AnnotateOptions) -> Self {
        Self {
            detector: Some(Arc::from(detector)),
            options,
        }
    }

    /// An annotator that never calls out and always returns no labels.
    pub fn disabled() -> Self {
        Self {
            detector: None,
            options: AnnotateOptions::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.detector.is_some()
    }

    /// Fetch up to `max_labels` labels for `source`.
    pub async fn annotate(&self, source: &SourceLocation, max_labels: usize) -> Annotation {
        let Some(detector) = &self.detector else {
            return Annotation::default();
        };
        if max_labels == 0 {
            return Annotation::default();
        }

        let options = &self.options;
        let mut last_error = String::new();

        for attempt in 0..=options.retry_attempts {
            if attempt > 0 {
                let delay = retry::backoff_duration(attempt - 1, options.retry_delay_ms);
                tracing::debug!(
                    "Label retry {attempt}/{} for {source} after {delay:?}",
                    options.retry_attempts
                );
                tokio::time::sleep(delay).await;
            }

            match tokio::time::timeout(
                Duration::from_millis(options.timeout_ms),
                detector.detect_labels(source, max_labels),
            )
            .await
            {
                Ok(Ok(labels)) => {
                    return Annotation {
                        labels: self.select(labels, max_labels),
                        degraded: false,
                    };
                }
                Ok(Err(e)) => {
                    last_error = e.to_string();
                    if !retry::is_retryable_call(&e) {
                        break;
                    }
                }
                Err(_) => {
                    last_error = format!("Timeout after {}ms", options.timeout_ms);
                }
            }
        }

        tracing::warn!(
            provider = detector.name(),
            "Labeling skipped for {source}: {last_error}"
        );
        Annotation {
            labels: Vec::new(),
            degraded: true,
        }
    }

    /// Like [`annotate`](Self::annotate), but gives up once `budget` has
    /// elapsed across every attempt and backoff.
    pub async fn annotate_within(
        &self,
        source: &SourceLocation,
        max_labels: usize,
        budget: Duration,
    ) -> Annotation {
        match tokio::time::timeout(budget, self.annotate(source, max_labels)).await {
            Ok(annotation) => annotation,
            Err(_) => {
                tracing::warn!(
                    provider = self.detector.as_ref().map_or("none", |d| d.name()),
                    "Labeling skipped for {source}: out of time after {budget:?}"
                );
                Annotation {
                    labels: Vec::new(),
                    degraded: true,
                }
            }
        }
    }

    /// Filter by confidence, order by descending confidence, cap the count.
    fn select(&self, mut labels: Vec<LabelResult>, max_labels: usize) -> Vec<LabelResult> {
        labels.retain(|l| l.confidence >= self.options.min_confidence);
        labels.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        labels.truncate(max_labels);
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// A configurable mock detector.
    ///
    /// Each call invokes the response factory with the current call index,
    /// so tests can return different results per attempt.
    struct MockDetector {
        response_fn: Box<dyn Fn(u32) -> Result<Vec<LabelResult>, PipelineError> + Send + Sync>,
        call_count: Arc<AtomicU32>,
        delay: Option<Duration>,
    }

    impl MockDetector {
        fn labels(labels: Vec<LabelResult>) -> Self {
            Self {
                response_fn: Box::new(move |_| Ok(labels.clone())),
                call_count: Arc::new(AtomicU32::new(0)),
                delay: None,
            }
        }

        fn failing(status_code: Option<u16>, message: &str) -> Self {
            let message = message.to_string();
            Self {
                response_fn: Box::new(move |_| {
                    Err(PipelineError::Labeling {
                        message: message.clone(),
                        status_code,
                    })
                }),
                call_count: Arc::new(AtomicU32::new(0)),
                delay: None,
            }
        }

        fn fail_then_succeed(status_code: u16, labels: Vec<LabelResult>) -> Self {
            Self {
                response_fn: Box::new(move |idx| {
                    if idx == 0 {
                        Err(PipelineError::Labeling {
                            message: format!("HTTP {status_code}"),
                            status_code: Some(status_code),
                        })
                    } else {
                        Ok(labels.clone())
                    }
                }),
                call_count: Arc::new(AtomicU32::new(0)),
                delay: None,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::labels(vec![LabelResult::new("late", 0.9)])
            }
        }

        fn calls(&self) -> Arc<AtomicU32> {
            self.call_count.clone()
        }
    }

    #[async_trait]
    impl LabelDetector for MockDetector {
        fn name(&self) -> &str {
            "mock"
        }

        async fn detect_labels(
            &self,
            _source: &SourceLocation,
            _max_labels: usize,
        ) -> Result<Vec<LabelResult>, PipelineError> {
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            (self.response_fn)(idx)
        }
    }

    fn fast_options() -> AnnotateOptions {
        AnnotateOptions {
            min_confidence: 0.0,
            timeout_ms: 200,
            retry_attempts: 2,
            retry_delay_ms: 1,
        }
    }

    fn source() -> SourceLocation {
        SourceLocation::new("uploads", "beach.jpg")
    }

    #[tokio::test]
    async fn test_labels_sorted_filtered_and_capped() {
        let detector = MockDetector::labels(vec![
            LabelResult::new("sand", 0.40),
            LabelResult::new("beach", 0.95),
            LabelResult::new("blur", 0.05),
            LabelResult::new("sea", 0.80),
        ]);
        let options = AnnotateOptions {
            min_confidence: 0.1,
            ..fast_options()
        };
        let annotator = LabelAnnotator::new(Box::new(detector), options);

        let annotation = annotator.annotate(&source(), 2).await;
        assert!(!annotation.degraded);
        let names: Vec<&str> = annotation.labels.iter().map(|l| l.label.as_str()).collect();
        assert_eq!(names, vec!["beach", "sea"]);
    }

    #[tokio::test]
    async fn test_empty_response_is_not_degraded() {
        let annotator = LabelAnnotator::new(Box::new(MockDetector::labels(vec![])), fast_options());
        let annotation = annotator.annotate(&source(), 5).await;
        assert!(annotation.labels.is_empty());
        assert!(!annotation.degraded);
    }

    #[tokio::test]
    async fn test_non_retryable_error_degrades_without_retry() {
        let detector = MockDetector::failing(Some(401), "HTTP 401: unauthorized");
        let calls = detector.calls();
        let annotator = LabelAnnotator::new(Box::new(detector), fast_options());

        let annotation = annotator.annotate(&source(), 5).await;
        assert!(annotation.labels.is_empty());
        assert!(annotation.degraded);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retryable_error_exhausts_attempts() {
        let detector = MockDetector::failing(Some(503), "HTTP 503: unavailable");
        let calls = detector.calls();
        let annotator = LabelAnnotator::new(Box::new(detector), fast_options());

        let annotation = annotator.annotate(&source(), 5).await;
        assert!(annotation.degraded);
        // 1 initial + 2 retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_recovers_after_throttling() {
        let detector = MockDetector::fail_then_succeed(429, vec![LabelResult::new("dog", 0.7)]);
        let calls = detector.calls();
        let annotator = LabelAnnotator::new(Box::new(detector), fast_options());

        let annotation = annotator.annotate(&source(), 5).await;
        assert_eq!(annotation.labels, vec![LabelResult::new("dog", 0.7)]);
        assert!(!annotation.degraded);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_degrades() {
        let options = AnnotateOptions {
            timeout_ms: 10,
            retry_attempts: 0,
            ..fast_options()
        };
        let annotator =
            LabelAnnotator::new(Box::new(MockDetector::slow(Duration::from_secs(5))), options);

        let annotation = annotator.annotate(&source(), 5).await;
        assert!(annotation.degraded);
        assert!(annotation.labels.is_empty());
    }

    #[tokio::test]
    async fn test_budget_caps_total_time_across_retries() {
        // Three 200ms attempts would take 600ms; the budget stops at 50ms
        let detector = MockDetector::slow(Duration::from_secs(5));
        let calls = detector.calls();
        let annotator = LabelAnnotator::new(Box::new(detector), fast_options());

        let started = std::time::Instant::now();
        let annotation = annotator
            .annotate_within(&source(), 5, Duration::from_millis(50))
            .await;

        assert!(annotation.degraded);
        assert!(annotation.labels.is_empty());
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_does_not_affect_fast_detector() {
        let detector = MockDetector::labels(vec![LabelResult::new("kite", 0.8)]);
        let annotator = LabelAnnotator::new(Box::new(detector), fast_options());

        let annotation = annotator
            .annotate_within(&source(), 5, Duration::from_secs(1))
            .await;
        assert_eq!(annotation.labels, vec![LabelResult::new("kite", 0.8)]);
        assert!(!annotation.degraded);
    }

    #[tokio::test]
    async fn test_disabled_annotator() {
        let annotator = LabelAnnotator::disabled();
        assert!(!annotator.is_enabled());
        let annotation = annotator.annotate(&source(), 5).await;
        assert_eq!(annotation, Annotation::default());
    }
}
