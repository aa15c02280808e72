//! Core types for tube-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Unique identifier for a download job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a fresh random JobId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Audio encoding for extracted audio tracks
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// MP3 (default)
    #[default]
    Mp3,
    /// AAC
    Aac,
    /// FLAC (lossless)
    Flac,
    /// WAV (uncompressed)
    Wav,
    /// Ogg Vorbis
    Ogg,
    /// Opus
    Opus,
    /// M4A container
    M4a,
}

impl AudioFormat {
    /// Format name as passed to the external tool's `--audio-format` flag
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Aac => "aac",
            AudioFormat::Flac => "flac",
            AudioFormat::Wav => "wav",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Opus => "opus",
            AudioFormat::M4a => "m4a",
        }
    }
}

/// One unit of work: an external content identifier plus the requested
/// output kinds. Immutable once enqueued.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Item {
    /// Opaque external identifier (URL-like string)
    pub url: String,
    /// Extract an audio track
    pub audio: bool,
    /// Download the muxed video
    pub video: bool,
    /// Fetch the subtitle/transcript track
    pub transcripts: bool,
    /// Audio encoding choice (only used when `audio` is set)
    pub audio_format: AudioFormat,
    /// Per-query output subdirectory (already sanitized)
    pub subdir: String,
}

/// Closed set of failure classifications for one tool invocation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// External "too many requests" throttling signal
    RateLimited,
    /// Content does not exist or was removed
    Unavailable,
    /// Content requires sign-in or is age-restricted
    AccessRestricted,
    /// Tool invocation exceeded its timeout
    Timeout,
    /// Any other non-zero tool exit
    Unknown,
}

impl FailureReason {
    /// Terminal classifications must never be retried: retrying cannot change
    /// tool-side availability or access state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FailureReason::Unavailable | FailureReason::AccessRestricted
        )
    }

    /// Short human-readable error text for the item result
    pub fn summary(&self) -> &'static str {
        match self {
            FailureReason::RateLimited => "Rate limited",
            FailureReason::Unavailable => "Video unavailable",
            FailureReason::AccessRestricted => "Age-restricted (need cookies)",
            FailureReason::Timeout => "Timeout - video too large or connection slow",
            FailureReason::Unknown => "Download failed",
        }
    }
}

/// Result of one Fetcher invocation for one item
#[derive(Clone, Debug, PartialEq)]
pub enum AttemptOutcome {
    /// All requested output kinds were produced
    Success {
        /// Measured output size in MiB (0.0 when not measurable)
        size_mb: f64,
    },
    /// Transient failure worth retrying
    Retryable {
        /// Failure classification
        reason: FailureReason,
        /// Raw diagnostic text from the tool
        detail: String,
    },
    /// Failure that must not be retried
    Terminal {
        /// Failure classification
        reason: FailureReason,
        /// Raw diagnostic text from the tool
        detail: String,
    },
}

/// Final status of one item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// All requested outputs were produced
    Success,
    /// The retry loop terminated without success
    Failed,
}

/// Terminal record for one item. Created once when the item's retry loop
/// terminates; immutable thereafter; owned by the job state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ItemResult {
    /// The item's external identifier
    pub url: String,
    /// Resolved display title ("Unknown" when the probe failed)
    pub title: String,
    /// Final status
    pub status: ItemStatus,
    /// Human-readable error when failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of failed attempts before termination
    pub retries: u32,
    /// Wall-clock duration of the whole retry loop in seconds
    pub duration_secs: f64,
    /// Measured output size in MiB (0.0 when not measurable)
    pub size_mb: f64,
    /// Completion timestamp
    pub timestamp: DateTime<Utc>,
}

/// Job lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Registered, waiting for worker pickup
    Queued,
    /// Items are being resolved and fetched
    Downloading,
    /// All items have a terminal result
    Complete,
    /// Fatal orchestration error (per-item failures do not fail the job)
    Failed,
}

impl JobStatus {
    /// Terminal states are final; no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

/// Consistent point-in-time view of a job, returned to polling callers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct JobSnapshot {
    /// Job identifier
    pub job_id: JobId,
    /// Original query
    pub query: String,
    /// Lifecycle status
    pub status: JobStatus,
    /// Progress percentage, floor(100 * completed / total)
    pub progress: u8,
    /// Human-readable status message
    pub message: String,
    /// Total item count (0 until resolution finishes)
    pub total_items: usize,
    /// Items that terminated successfully
    pub succeeded: usize,
    /// Items that terminated in failure
    pub failed: usize,
    /// Submission timestamp
    pub started_at: DateTime<Utc>,
    /// Elapsed wall-clock seconds (frozen once terminal)
    pub elapsed_secs: f64,
    /// Per-item terminal records in completion order
    pub results: Vec<ItemResult>,
}

/// Request body for POST /api/download
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloadRequest {
    /// Search query, or a direct URL when `is_url` is set
    pub query: String,
    /// Extract audio tracks (default: true)
    #[serde(default = "default_true")]
    pub audio: bool,
    /// Download muxed video
    #[serde(default)]
    pub video: bool,
    /// Fetch subtitle/transcript tracks
    #[serde(default)]
    pub transcripts: bool,
    /// Audio encoding
    #[serde(default)]
    pub format: AudioFormat,
    /// Maximum number of search results to fetch (default: 50)
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Requested worker concurrency (clamped to the system cap)
    #[serde(default = "default_concurrent")]
    pub concurrent_downloads: usize,
    /// Treat `query` as a direct URL, skipping search
    #[serde(default)]
    pub is_url: bool,
    /// Explicit item URLs; when present, search is skipped entirely
    #[serde(default)]
    pub urls: Option<Vec<String>>,
}

/// Request body for POST /api/search
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct SearchRequest {
    /// Search query, or a direct URL when `is_url` is set
    pub query: String,
    /// Maximum number of results (default: 50)
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Treat `query` as a direct URL
    #[serde(default)]
    pub is_url: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_results() -> usize {
    50
}

fn default_concurrent() -> usize {
    3
}

/// Event emitted during the job lifecycle
///
/// Events are broadcast to all subscribers; with no subscribers they are
/// silently dropped and the job continues.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Job registered
    JobQueued {
        /// Job ID
        id: JobId,
        /// Original query
        query: String,
    },
    /// Item resolution started
    Searching {
        /// Job ID
        id: JobId,
    },
    /// One item reached a terminal result
    ItemCompleted {
        /// Job ID
        id: JobId,
        /// Item URL
        url: String,
        /// Terminal item status
        status: ItemStatus,
    },
    /// The worker pool paused intake and requested identity rotation
    RotatingIdentity {
        /// Job ID
        id: JobId,
    },
    /// Job reached Complete
    JobComplete {
        /// Job ID
        id: JobId,
        /// Successful item count
        succeeded: usize,
        /// Failed item count
        failed: usize,
    },
    /// Job reached Failed
    JobFailed {
        /// Job ID
        id: JobId,
        /// Orchestration error message
        error: String,
    },
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_roundtrips_through_display_and_parse() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn terminal_reasons_are_exactly_unavailable_and_access_restricted() {
        assert!(FailureReason::Unavailable.is_terminal());
        assert!(FailureReason::AccessRestricted.is_terminal());
        assert!(!FailureReason::RateLimited.is_terminal());
        assert!(!FailureReason::Timeout.is_terminal());
        assert!(!FailureReason::Unknown.is_terminal());
    }

    #[test]
    fn job_status_terminality() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Downloading.is_terminal());
        assert!(JobStatus::Complete.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn download_request_defaults_match_api_contract() {
        let req: DownloadRequest = serde_json::from_str(r#"{"query": "lofi"}"#).unwrap();
        assert!(req.audio);
        assert!(!req.video);
        assert!(!req.transcripts);
        assert_eq!(req.format, AudioFormat::Mp3);
        assert_eq!(req.max_results, 50);
        assert_eq!(req.concurrent_downloads, 3);
        assert!(!req.is_url);
        assert!(req.urls.is_none());
    }

    #[test]
    fn audio_format_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&AudioFormat::Flac).unwrap(),
            r#""flac""#
        );
        let f: AudioFormat = serde_json::from_str(r#""opus""#).unwrap();
        assert_eq!(f, AudioFormat::Opus);
        assert_eq!(f.as_str(), "opus");
    }

    #[test]
    fn item_result_omits_error_when_successful() {
        let result = ItemResult {
            url: "https://example.com/watch?v=abc".into(),
            title: "demo".into(),
            status: ItemStatus::Success,
            error: None,
            retries: 0,
            duration_secs: 1.5,
            size_mb: 3.2,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("error").is_none());
    }
}
