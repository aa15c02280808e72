//! Configuration types for tube-dl

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use utoipa::ToSchema;

/// System-wide ceiling for worker concurrency, regardless of per-request asks
pub const SYSTEM_MAX_CONCURRENT: usize = 3;

/// Download behavior configuration (output layout, concurrency, cookies)
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloadConfig {
    /// Output root directory (default: "./output"); audio/, video/,
    /// transcripts/ and logs/ are created beneath it
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Maximum concurrent item fetches (default: 3, hard-capped at 3)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Netscape-format cookies file passed to the media tool (optional)
    #[serde(default)]
    pub cookies_file: Option<PathBuf>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_concurrent_downloads: default_max_concurrent(),
            cookies_file: None,
        }
    }
}

/// Retry configuration for transient per-item failures
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RetryConfig {
    /// Maximum number of attempts per item (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff before the first retry (default: 2 seconds)
    #[serde(default = "default_initial_backoff", with = "duration_serde")]
    pub initial_backoff: Duration,

    /// Cap for exponential backoff delays (default: 60 seconds)
    #[serde(default = "default_max_backoff", with = "duration_serde")]
    pub max_backoff: Duration,

    /// Add random jitter to backoff sleeps (default: false, keeping the
    /// documented 2,4,8,... ladder exact)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            jitter: false,
        }
    }
}

/// Throttle tracking and circuit-breaker configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RateLimitConfig {
    /// Consecutive throttling signals before identity rotation is requested
    /// (default: 3)
    #[serde(default = "default_threshold")]
    pub rotation_threshold: u32,

    /// Base backoff window after the first throttling signal (default: 2s)
    #[serde(default = "default_initial_backoff", with = "duration_serde")]
    pub initial_backoff: Duration,

    /// Cap for the backoff window (default: 60s)
    #[serde(default = "default_max_backoff", with = "duration_serde")]
    pub max_backoff: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rotation_threshold: default_threshold(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

/// External media tool invocation settings
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct FetchConfig {
    /// Path to the yt-dlp executable (searched on PATH if None)
    #[serde(default)]
    pub tool_path: Option<PathBuf>,

    /// Timeout for audio extraction (default: 300s)
    #[serde(default = "default_audio_timeout", with = "duration_serde")]
    pub audio_timeout: Duration,

    /// Timeout for muxed video download (default: 600s)
    #[serde(default = "default_video_timeout", with = "duration_serde")]
    pub video_timeout: Duration,

    /// Timeout for transcript extraction (default: 60s)
    #[serde(default = "default_transcript_timeout", with = "duration_serde")]
    pub transcript_timeout: Duration,

    /// Timeout for title probes (default: 15s)
    #[serde(default = "default_title_timeout", with = "duration_serde")]
    pub title_timeout: Duration,

    /// Socket timeout passed through to the tool, in seconds (default: 30)
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            tool_path: None,
            audio_timeout: default_audio_timeout(),
            video_timeout: default_video_timeout(),
            transcript_timeout: default_transcript_timeout(),
            title_timeout: default_title_timeout(),
            socket_timeout_secs: default_socket_timeout(),
        }
    }
}

/// Anonymizing proxy and circuit-control settings
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ProxyConfig {
    /// Route tool and search traffic through the SOCKS proxy (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// SOCKS5 proxy URL (default: "socks5h://127.0.0.1:9050")
    #[serde(default = "default_socks_url")]
    pub socks_url: String,

    /// Circuit-control host (default: 127.0.0.1)
    #[serde(default = "default_control_host")]
    pub control_host: String,

    /// Circuit-control port (default: 9051)
    #[serde(default = "default_control_port")]
    pub control_port: u16,

    /// Circuit-control password (default: none — cookie/no auth)
    #[serde(default)]
    pub control_password: Option<String>,

    /// Wait after a NEWNYM signal for the new circuit to settle (default: 8s)
    #[serde(default = "default_settle_wait", with = "duration_serde")]
    pub settle_wait: Duration,

    /// Pause after an in-pool rotation before resuming intake (default: 3s)
    #[serde(default = "default_rotation_pause", with = "duration_serde")]
    pub rotation_pause: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            socks_url: default_socks_url(),
            control_host: default_control_host(),
            control_port: default_control_port(),
            control_password: None,
            settle_wait: default_settle_wait(),
            rotation_pause: default_rotation_pause(),
        }
    }
}

/// Search back-end settings
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct SearchConfig {
    /// Per-back-end HTTP timeout (default: 30s)
    #[serde(default = "default_search_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Hard cap on results per search regardless of request (default: 100)
    #[serde(default = "default_max_results_cap")]
    pub max_results_cap: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            timeout: default_search_timeout(),
            max_results_cap: default_max_results_cap(),
        }
    }
}

/// REST API server settings
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Bind address (default: 127.0.0.1:8000)
    #[serde(default = "default_bind_address")]
    #[schema(value_type = String)]
    pub bind_address: SocketAddr,

    /// Enable CORS (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins; "*" allows any (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Serve interactive Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

/// Main configuration for TubeDownloader
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig) — output layout, concurrency, cookies
/// - [`retry`](RetryConfig) — per-item retry/backoff policy
/// - [`rate_limit`](RateLimitConfig) — throttle tracking and rotation threshold
/// - [`fetch`](FetchConfig) — external tool path and timeouts
/// - [`proxy`](ProxyConfig) — SOCKS proxy and circuit control
/// - [`search`](SearchConfig) — search back-end behavior
/// - [`api`](ApiConfig) — REST API server
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Retry policy for transient per-item failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Throttle tracking and circuit breaking
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// External media tool settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Anonymizing proxy settings
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Search back-end settings
    #[serde(default)]
    pub search: SearchConfig,

    /// REST API server settings
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Effective worker concurrency for a request: clamped to [1, system max]
    /// and never above the configured ceiling.
    pub fn effective_concurrency(&self, requested: usize) -> usize {
        let ceiling = self
            .download
            .max_concurrent_downloads
            .clamp(1, SYSTEM_MAX_CONCURRENT);
        requested.clamp(1, ceiling)
    }

    /// Audio output root
    pub fn audio_dir(&self) -> PathBuf {
        self.download.output_dir.join("audio")
    }

    /// Video output root
    pub fn video_dir(&self) -> PathBuf {
        self.download.output_dir.join("video")
    }

    /// Transcript output root
    pub fn transcripts_dir(&self) -> PathBuf {
        self.download.output_dir.join("transcripts")
    }

    /// Completed-job log directory
    pub fn logs_dir(&self) -> PathBuf {
        self.download.output_dir.join("logs")
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}

fn default_max_concurrent() -> usize {
    3
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_secs(2)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(60)
}

fn default_threshold() -> u32 {
    3
}

fn default_audio_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_video_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_transcript_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_title_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_socket_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_socks_url() -> String {
    "socks5h://127.0.0.1:9050".to_string()
}

fn default_control_host() -> String {
    "127.0.0.1".to_string()
}

fn default_control_port() -> u16 {
    9051
}

fn default_settle_wait() -> Duration {
    Duration::from_secs(8)
}

fn default_rotation_pause() -> Duration {
    Duration::from_secs(3)
}

fn default_search_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_results_cap() -> usize {
    100
}

fn default_bind_address() -> SocketAddr {
    use std::net::{IpAddr, Ipv4Addr};
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000)
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
