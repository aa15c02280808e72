//! Main downloader orchestrator
//!
//! [`TubeDownloader`] wires the collaborators together: the job registry, the
//! shared throttle tracker, the media-tool fetcher, the search fallback chain
//! and the identity rotator. Submitting a request registers a job and spawns
//! a background task that resolves the query into items, runs them through
//! the worker pool, and finalizes the job with an on-disk completion log.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::broadcast;
use utoipa::ToSchema;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetch::{Fetcher, YtDlpFetcher};
use crate::job::{JobHandle, JobRegistry};
use crate::proxy::{IdentityRotator, NoProxyRotator, TorRotator};
use crate::rate_limit::RateLimiter;
use crate::search::{HttpSearchProvider, SearchProvider};
use crate::types::{DownloadRequest, Event, Item, JobId, JobSnapshot};
use crate::util;
use crate::worker_pool::{BatchParams, BatchUpdate, run_batch};

/// Capacity of the lifecycle event channel; slow subscribers lose old events
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Concurrency for title probes when previewing search results
const TITLE_PROBE_CONCURRENCY: usize = 3;

/// System status report for GET /api/status
///
/// The proxy fields serialize under their established `tor_*` wire names so
/// existing clients keep working.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct SystemStatus {
    /// Always "ok" when the process can answer at all
    pub status: String,
    /// Whether traffic is verifiably routed through the proxy
    #[serde(rename = "tor_connected")]
    pub proxy_active: bool,
    /// Current exit address, when determinable
    #[serde(rename = "tor_ip")]
    pub exit_ip: Option<String>,
    /// Whether a cookies file is configured and present on disk
    #[serde(rename = "cookies")]
    pub cookies_present: bool,
    /// Jobs not yet terminal
    pub active_jobs: usize,
    /// All jobs ever submitted this process lifetime
    pub total_jobs: usize,
    /// Output root directory
    pub output_dir: String,
}

/// Completion log written next to the outputs when a job finishes
#[derive(Serialize)]
struct JobLog<'a> {
    job_id: JobId,
    query: &'a str,
    duration_secs: f64,
    succeeded: usize,
    failed: usize,
    results: &'a [crate::types::ItemResult],
}

/// The download job engine.
///
/// Cheap to share: every collaborator lives behind an `Arc`, and all public
/// methods take `&self`.
pub struct TubeDownloader {
    config: Arc<Config>,
    registry: Arc<JobRegistry>,
    limiter: Arc<RateLimiter>,
    fetcher: Arc<dyn Fetcher>,
    search: Arc<dyn SearchProvider>,
    rotator: Arc<dyn IdentityRotator>,
    event_tx: broadcast::Sender<Event>,
}

impl TubeDownloader {
    /// Build a downloader with production collaborators.
    ///
    /// Creates the output directory layout, locates the media tool, and wires
    /// the search chain and identity rotator according to the proxy settings.
    pub fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);

        for dir in [
            config.audio_dir(),
            config.video_dir(),
            config.transcripts_dir(),
            config.logs_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }

        let fetcher = YtDlpFetcher::new(Arc::clone(&config))?;
        let socks_url = config
            .proxy
            .enabled
            .then(|| config.proxy.socks_url.clone());
        let search = HttpSearchProvider::new(
            config.search.clone(),
            Some(fetcher.tool_path().to_path_buf()),
            socks_url.as_deref(),
        )?;
        let rotator: Arc<dyn IdentityRotator> = if config.proxy.enabled {
            Arc::new(TorRotator::new(config.proxy.clone())?)
        } else {
            Arc::new(NoProxyRotator)
        };

        Ok(Self::with_collaborators(
            config,
            Arc::new(fetcher),
            Arc::new(search),
            rotator,
        ))
    }

    /// Build a downloader around explicit collaborators.
    ///
    /// This is the seam integration tests use to substitute scripted
    /// fetchers, search providers and rotators.
    pub fn with_collaborators(
        config: Arc<Config>,
        fetcher: Arc<dyn Fetcher>,
        search: Arc<dyn SearchProvider>,
        rotator: Arc<dyn IdentityRotator>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            config,
            registry: Arc::new(JobRegistry::new()),
            limiter,
            fetcher,
            search,
            rotator,
            event_tx,
        }
    }

    /// The active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Subscribe to job lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Validate and register a download request, spawning its background job.
    ///
    /// Returns immediately with the job ID; poll [`progress`](Self::progress)
    /// or subscribe to events to follow the job.
    pub fn submit(self: &Arc<Self>, request: DownloadRequest) -> Result<JobId> {
        if !(request.audio || request.video || request.transcripts) {
            return Err(Error::Validation(
                "select at least one of audio, video or transcripts".to_string(),
            ));
        }
        let has_urls = request
            .urls
            .as_ref()
            .is_some_and(|urls| !urls.is_empty());
        if request.query.trim().is_empty() && !has_urls {
            return Err(Error::Validation("query must not be empty".to_string()));
        }
        if request.is_url && url::Url::parse(request.query.trim()).is_err() {
            return Err(Error::Validation(format!(
                "not a valid URL: {}",
                request.query
            )));
        }

        let id = JobId::new();
        let handle = Arc::new(JobHandle::new(id, request.query.clone()));
        self.registry.insert(Arc::clone(&handle));
        self.emit(Event::JobQueued {
            id,
            query: request.query.clone(),
        });
        tracing::info!(job_id = %id, query = %request.query, "Job submitted");

        let downloader = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(error) = downloader.run_job(Arc::clone(&handle), request).await {
                let message = util::truncate_error(&error.to_string());
                handle.fail(message.clone());
                downloader.emit(Event::JobFailed { id: handle.id(), error: message });
                tracing::error!(job_id = %handle.id(), %error, "Job failed");
            }
        });

        Ok(id)
    }

    /// Snapshot of a job's current state.
    pub fn progress(&self, id: JobId) -> Result<JobSnapshot> {
        Ok(self.registry.get(id)?.snapshot())
    }

    /// System status for health dashboards.
    pub async fn status(&self) -> SystemStatus {
        let proxy_active = self.rotator.is_active().await;
        let exit_ip = self
            .rotator
            .current_identity()
            .await
            .map(|ip| ip.to_string());
        let cookies_present = self
            .config
            .download
            .cookies_file
            .as_ref()
            .is_some_and(|path| path.exists());

        SystemStatus {
            status: "ok".to_string(),
            proxy_active,
            exit_ip,
            cookies_present,
            active_jobs: self.registry.active_count(),
            total_jobs: self.registry.total_count(),
            output_dir: self.config.download.output_dir.display().to_string(),
        }
    }

    /// Resolve a query to watch URLs and probe their titles.
    ///
    /// Title probes run concurrently but bounded, and a failed probe yields
    /// "Unknown" rather than failing the preview.
    pub async fn search_preview(
        &self,
        query: &str,
        max_results: usize,
        is_url: bool,
    ) -> Result<(Vec<String>, HashMap<String, String>)> {
        let urls = if is_url {
            vec![query.to_string()]
        } else {
            self.search.search(query, max_results).await?
        };

        let fetcher = Arc::clone(&self.fetcher);
        let titles: HashMap<String, String> = futures::stream::iter(urls.clone())
            .map(|url| {
                let fetcher = Arc::clone(&fetcher);
                async move {
                    let title = fetcher.probe_title(&url).await;
                    (url, title)
                }
            })
            .buffer_unordered(TITLE_PROBE_CONCURRENCY)
            .collect()
            .await;

        Ok((urls, titles))
    }

    /// Force an identity rotation outside any running batch.
    ///
    /// Returns the exit addresses before and after the rotation, either of
    /// which may be unknown.
    pub async fn rotate_identity(&self) -> Result<(Option<IpAddr>, Option<IpAddr>)> {
        let old_ip = self.rotator.current_identity().await;
        let new_ip = self.rotator.rotate().await?;
        self.limiter.clear_rotation_flag().await;
        Ok((old_ip, new_ip))
    }

    async fn run_job(&self, handle: Arc<JobHandle>, request: DownloadRequest) -> Result<()> {
        let id = handle.id();
        handle.mark_downloading("Resolving videos...");
        self.emit(Event::Searching { id });

        let urls = self.resolve_urls(&request).await?;
        if urls.is_empty() {
            handle.fail("No videos found");
            self.emit(Event::JobFailed {
                id,
                error: "No videos found".to_string(),
            });
            return Ok(());
        }

        let total = urls.len();
        handle.set_total(total);
        handle.set_message(format!("Downloading {total} videos..."));

        let subdir = util::sanitize_name(&request.query);
        let items: Vec<Item> = urls
            .into_iter()
            .map(|url| Item {
                url,
                audio: request.audio,
                video: request.video,
                transcripts: request.transcripts,
                audio_format: request.format,
                subdir: subdir.clone(),
            })
            .collect();

        let concurrency = self.config.effective_concurrency(request.concurrent_downloads);
        tracing::info!(job_id = %id, total, concurrency, "Starting batch");

        let params = BatchParams {
            items,
            concurrency,
            retry: self.config.retry.clone(),
            rotation_pause: self.config.proxy.rotation_pause,
        };

        let batch_handle = Arc::clone(&handle);
        run_batch(
            params,
            Arc::clone(&self.fetcher),
            Arc::clone(&self.limiter),
            Arc::clone(&self.rotator),
            |update| match update {
                BatchUpdate::Completed(result) => {
                    self.emit(Event::ItemCompleted {
                        id,
                        url: result.url.clone(),
                        status: result.status,
                    });
                    batch_handle.record_result(result);
                    let snap = batch_handle.snapshot();
                    batch_handle.set_message(format!(
                        "Downloaded {}/{} ({} ok, {} failed)",
                        snap.succeeded + snap.failed,
                        snap.total_items,
                        snap.succeeded,
                        snap.failed
                    ));
                }
                BatchUpdate::Rotating => {
                    batch_handle.set_message("Rate limited - rotating identity...");
                    self.emit(Event::RotatingIdentity { id });
                }
            },
        )
        .await;

        let snap = handle.snapshot();
        handle.complete(format!(
            "Complete: {} succeeded, {} failed",
            snap.succeeded, snap.failed
        ));
        self.emit(Event::JobComplete {
            id,
            succeeded: snap.succeeded,
            failed: snap.failed,
        });
        tracing::info!(
            job_id = %id,
            succeeded = snap.succeeded,
            failed = snap.failed,
            "Job complete"
        );

        if let Err(error) = self.write_job_log(&handle).await {
            // The completion log is informational; never fail a finished job
            tracing::warn!(job_id = %id, %error, "Could not write job log");
        }

        Ok(())
    }

    async fn resolve_urls(&self, request: &DownloadRequest) -> Result<Vec<String>> {
        if let Some(urls) = &request.urls
            && !urls.is_empty()
        {
            return Ok(urls.clone());
        }
        if request.is_url {
            return Ok(vec![request.query.clone()]);
        }
        self.search.search(&request.query, request.max_results).await
    }

    async fn write_job_log(&self, handle: &JobHandle) -> Result<()> {
        let snap = handle.snapshot();
        let log = JobLog {
            job_id: snap.job_id,
            query: &snap.query,
            duration_secs: snap.elapsed_secs,
            succeeded: snap.succeeded,
            failed: snap.failed,
            results: &snap.results,
        };

        let filename = format!(
            "job_{}_{}.json",
            snap.job_id,
            Utc::now().format("%Y%m%d_%H%M%S")
        );
        let path = self.config.logs_dir().join(filename);
        let body = serde_json::to_vec_pretty(&log)?;
        tokio::fs::create_dir_all(self.config.logs_dir()).await?;
        tokio::fs::write(&path, body).await?;
        tracing::debug!(path = %path.display(), "Job log written");
        Ok(())
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine; events are advisory
        let _ = self.event_tx.send(event);
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttemptOutcome, FailureReason, ItemStatus, JobStatus};
    use async_trait::async_trait;
    use std::time::Duration;

    struct StubFetcher {
        outcome: fn(&Item) -> AttemptOutcome,
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn probe_title(&self, url: &str) -> String {
            format!("Title for {url}")
        }

        async fn fetch(&self, item: &Item) -> AttemptOutcome {
            (self.outcome)(item)
        }
    }

    struct StubSearch {
        results: Vec<String>,
    }

    #[async_trait]
    impl SearchProvider for StubSearch {
        async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<String>> {
            Ok(self.results.iter().take(max_results).cloned().collect())
        }
    }

    fn watch_urls(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| format!("https://www.youtube.com/watch?v=stubvideo{i:02}"))
            .collect()
    }

    fn test_config(dir: &std::path::Path) -> Arc<Config> {
        let mut config = Config::default();
        config.download.output_dir = dir.to_path_buf();
        config.retry.initial_backoff = Duration::from_millis(1);
        config.retry.max_backoff = Duration::from_millis(5);
        config.proxy.enabled = false;
        config.proxy.rotation_pause = Duration::from_millis(1);
        Arc::new(config)
    }

    fn downloader(
        config: Arc<Config>,
        outcome: fn(&Item) -> AttemptOutcome,
        results: Vec<String>,
    ) -> Arc<TubeDownloader> {
        Arc::new(TubeDownloader::with_collaborators(
            config,
            Arc::new(StubFetcher { outcome }),
            Arc::new(StubSearch { results }),
            Arc::new(NoProxyRotator),
        ))
    }

    fn request(query: &str) -> DownloadRequest {
        DownloadRequest {
            query: query.to_string(),
            audio: true,
            video: false,
            transcripts: false,
            format: Default::default(),
            max_results: 50,
            concurrent_downloads: 2,
            is_url: false,
            urls: None,
        }
    }

    async fn wait_terminal(downloader: &TubeDownloader, id: JobId) -> JobSnapshot {
        for _ in 0..500 {
            let snap = downloader.progress(id).unwrap();
            if snap.status.is_terminal() {
                return snap;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never reached a terminal state");
    }

    #[tokio::test]
    async fn successful_job_completes_with_full_progress() {
        let dir = tempfile::tempdir().unwrap();
        let engine = downloader(
            test_config(dir.path()),
            |_| AttemptOutcome::Success { size_mb: 1.0 },
            watch_urls(5),
        );

        let id = engine.submit(request("lofi beats")).unwrap();
        let snap = wait_terminal(&engine, id).await;

        assert_eq!(snap.status, JobStatus::Complete);
        assert_eq!(snap.progress, 100);
        assert_eq!(snap.succeeded, 5);
        assert_eq!(snap.failed, 0);
        assert_eq!(snap.results.len(), 5);
    }

    #[tokio::test]
    async fn zero_search_results_fails_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let engine = downloader(
            test_config(dir.path()),
            |_| AttemptOutcome::Success { size_mb: 0.0 },
            Vec::new(),
        );

        let id = engine.submit(request("no such thing")).unwrap();
        let snap = wait_terminal(&engine, id).await;

        assert_eq!(snap.status, JobStatus::Failed);
        assert_eq!(snap.message, "No videos found");
        assert_eq!(snap.progress, 0);
        assert!(snap.results.is_empty());
    }

    #[tokio::test]
    async fn request_without_output_kinds_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = downloader(
            test_config(dir.path()),
            |_| AttemptOutcome::Success { size_mb: 0.0 },
            watch_urls(1),
        );

        let mut req = request("q");
        req.audio = false;
        let err = engine.submit(req).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(engine.registry.total_count(), 0, "rejected job must not register");
    }

    #[tokio::test]
    async fn direct_url_requests_skip_search() {
        let dir = tempfile::tempdir().unwrap();
        // Search returning nothing proves resolution used the URL directly
        let engine = downloader(
            test_config(dir.path()),
            |_| AttemptOutcome::Success { size_mb: 0.0 },
            Vec::new(),
        );

        let mut req = request("https://www.youtube.com/watch?v=direct00000");
        req.is_url = true;
        let id = engine.submit(req).unwrap();
        let snap = wait_terminal(&engine, id).await;

        assert_eq!(snap.status, JobStatus::Complete);
        assert_eq!(snap.total_items, 1);
        assert_eq!(snap.succeeded, 1);
    }

    #[tokio::test]
    async fn malformed_direct_url_is_rejected_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let engine = downloader(
            test_config(dir.path()),
            |_| AttemptOutcome::Success { size_mb: 0.0 },
            Vec::new(),
        );

        let mut req = request("definitely not a url");
        req.is_url = true;
        let err = engine.submit(req).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn explicit_urls_override_query_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let engine = downloader(
            test_config(dir.path()),
            |_| AttemptOutcome::Success { size_mb: 0.0 },
            Vec::new(),
        );

        let mut req = request("ignored query");
        req.urls = Some(watch_urls(3));
        let id = engine.submit(req).unwrap();
        let snap = wait_terminal(&engine, id).await;

        assert_eq!(snap.total_items, 3);
        assert_eq!(snap.succeeded, 3);
    }

    #[tokio::test]
    async fn terminal_item_failures_do_not_fail_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let engine = downloader(
            test_config(dir.path()),
            |_| AttemptOutcome::Terminal {
                reason: FailureReason::Unavailable,
                detail: "ERROR: Video unavailable".into(),
            },
            watch_urls(2),
        );

        let id = engine.submit(request("gone videos")).unwrap();
        let snap = wait_terminal(&engine, id).await;

        assert_eq!(snap.status, JobStatus::Complete);
        assert_eq!(snap.failed, 2);
        assert_eq!(snap.succeeded, 0);
        assert!(snap
            .results
            .iter()
            .all(|r| r.status == ItemStatus::Failed && r.retries == 0));
    }

    #[tokio::test]
    async fn completion_log_lands_in_logs_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let engine = downloader(
            config.clone(),
            |_| AttemptOutcome::Success { size_mb: 0.5 },
            watch_urls(1),
        );

        let id = engine.submit(request("logged")).unwrap();
        wait_terminal(&engine, id).await;
        // The log write happens after the terminal transition
        tokio::time::sleep(Duration::from_millis(100)).await;

        let logs: Vec<_> = std::fs::read_dir(config.logs_dir())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].starts_with(&format!("job_{id}_")));
        assert!(logs[0].ends_with(".json"));

        let body = std::fs::read_to_string(config.logs_dir().join(&logs[0])).unwrap();
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["query"], "logged");
        assert_eq!(json["succeeded"], 1);
        assert_eq!(json["results"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn events_cover_the_job_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let engine = downloader(
            test_config(dir.path()),
            |_| AttemptOutcome::Success { size_mb: 0.0 },
            watch_urls(2),
        );
        let mut events = engine.subscribe();

        let id = engine.submit(request("events")).unwrap();
        wait_terminal(&engine, id).await;

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(match event {
                Event::JobQueued { .. } => "queued",
                Event::Searching { .. } => "searching",
                Event::ItemCompleted { .. } => "item",
                Event::RotatingIdentity { .. } => "rotating",
                Event::JobComplete { .. } => "complete",
                Event::JobFailed { .. } => "failed",
            });
        }
        assert_eq!(kinds.first(), Some(&"queued"));
        assert!(kinds.contains(&"searching"));
        assert_eq!(kinds.iter().filter(|k| **k == "item").count(), 2);
        assert_eq!(kinds.last(), Some(&"complete"));
    }

    #[tokio::test]
    async fn search_preview_probes_titles() {
        let dir = tempfile::tempdir().unwrap();
        let engine = downloader(
            test_config(dir.path()),
            |_| AttemptOutcome::Success { size_mb: 0.0 },
            watch_urls(3),
        );

        let (urls, titles) = engine.search_preview("anything", 10, false).await.unwrap();
        assert_eq!(urls.len(), 3);
        for url in &urls {
            assert_eq!(titles[url], format!("Title for {url}"));
        }
    }
}
