//! Retry utilities: classification of retryable label service failures and
//! exponential backoff shared by the annotator and the CLI redelivery loop.

use crate::error::PipelineError;
use std::time::Duration;

/// Upper bound for any single backoff delay.
const MAX_BACKOFF_MS: u64 = 30_000;

/// Determine whether a label service error is worth retrying within one invocation.
///
/// Retryable errors: timeouts, rate limits (429), server errors (5xx),
/// connection failures. Non-retryable: auth failures, bad requests.
pub fn is_retryable_call(error: &PipelineError) -> bool {
    match error {
        PipelineError::Timeout { .. } | PipelineError::LabelServiceUnreachable { .. } => true,
        PipelineError::Labeling {
            status_code: Some(code),
            ..
        } => *code == 429 || (500..=599).contains(code),
        _ => false,
    }
}

/// Calculate exponential backoff duration for a given attempt.
///
/// Uses `base_delay * 2^attempt` with a cap at 30 seconds.
pub fn backoff_duration(attempt: u32, base_delay_ms: u64) -> Duration {
    let delay = base_delay_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(delay.min(MAX_BACKOFF_MS))
}
