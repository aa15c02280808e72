//! Failure classification for external tool diagnostics
//!
//! The media tool reports failures as free-form text on stderr. This module
//! maps that text onto the closed [`FailureReason`] set so the retry policy
//! never has to know about the matching heuristics. The classifier is a plain
//! function pointer so alternative heuristics can be swapped in.

use crate::types::FailureReason;

/// Classifier function type: raw diagnostic text to a failure reason.
pub type Classifier = fn(&str) -> FailureReason;

/// Default classifier for yt-dlp diagnostic output.
///
/// Matching is substring-based, mirroring the messages the tool actually
/// emits. Timeouts are classified by the invoker from elapsed timers, never
/// from text, so this function never returns [`FailureReason::Timeout`].
pub fn classify_diagnostic(text: &str) -> FailureReason {
    if text.contains("429") || text.contains("Too Many Requests") {
        return FailureReason::RateLimited;
    }

    if text.contains("Video unavailable") || text.contains("not available") {
        return FailureReason::Unavailable;
    }

    if text.contains("age-restricted") || text.contains("Sign in") {
        return FailureReason::AccessRestricted;
    }

    FailureReason::Unknown
}
