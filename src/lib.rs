//! # tube-dl
//!
//! Privacy-focused media download job engine. Queries are resolved through a
//! chain of search back-ends, downloaded by an external media tool under
//! bounded concurrency, and tracked as asynchronous jobs with retry,
//! adaptive rate-limit backoff and automatic network identity rotation
//! through a local Tor daemon.
//!
//! ## Features
//!
//! - **Async job engine**: submit returns immediately; poll progress or
//!   subscribe to lifecycle events
//! - **Layered search**: tool-native search with HTML-scrape fallbacks
//! - **Adaptive throttle handling**: consecutive 429s trigger exponential
//!   backoff and, past a threshold, a fresh Tor circuit
//! - **Per-item retry**: transient failures retry with exponential backoff;
//!   unavailable or access-restricted items fail fast
//! - **REST API**: optional axum server with OpenAPI documentation
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tube_dl::{Config, DownloadRequest, TubeDownloader};
//!
//! #[tokio::main]
//! async fn main() -> tube_dl::Result<()> {
//!     let downloader = Arc::new(TubeDownloader::new(Config::default())?);
//!
//!     let request: DownloadRequest = serde_json::from_value(serde_json::json!({
//!         "query": "lofi hip hop",
//!         "audio": true,
//!         "max_results": 5,
//!     }))?;
//!     let job_id = downloader.submit(request)?;
//!
//!     loop {
//!         let snapshot = downloader.progress(job_id)?;
//!         println!("{:?}: {}% - {}", snapshot.status, snapshot.progress, snapshot.message);
//!         if snapshot.status.is_terminal() {
//!             break;
//!         }
//!         tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! To expose the engine over HTTP instead, hand it to the API server:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use tube_dl::{Config, TubeDownloader};
//! # #[tokio::main]
//! # async fn main() -> tube_dl::Result<()> {
//! let downloader = Arc::new(TubeDownloader::new(Config::default())?);
//! tube_dl::api::start_api_server(downloader).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod api;
pub mod classify;
pub mod config;
pub mod downloader;
pub mod error;
pub mod fetch;
pub mod job;
pub mod proxy;
pub mod rate_limit;
pub mod retry;
pub mod search;
pub mod types;
pub mod util;
pub mod worker_pool;

pub use config::Config;
pub use downloader::{SystemStatus, TubeDownloader};
pub use error::{Error, Result};
pub use types::{
    DownloadRequest, Event, ItemResult, ItemStatus, JobId, JobSnapshot, JobStatus, SearchRequest,
};
