//! External media tool invocation
//!
//! The [`Fetcher`] trait is the seam between the job engine and the external
//! media tool. The production implementation shells out to yt-dlp once per
//! requested output kind, each invocation under its own timeout, and folds the
//! tool's exit status and stderr into a structured [`AttemptOutcome`].
//!
//! No partial-file cleanup happens here: the tool is invoked with resumable
//! download flags, so an incomplete artifact left by a failed attempt is
//! picked up on retry.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::classify::{Classifier, classify_diagnostic};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{AttemptOutcome, FailureReason, Item};
use crate::util;

/// Default binary name searched on PATH when no explicit path is configured
const TOOL_BINARY: &str = "yt-dlp";

/// Fetches one item's requested outputs via the external media tool
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Resolve the display title for an item, best-effort.
    ///
    /// Returns "Unknown" on any failure; a title probe must never fail an
    /// attempt.
    async fn probe_title(&self, url: &str) -> String;

    /// Run one fetch attempt for the item, producing all requested outputs.
    async fn fetch(&self, item: &Item) -> AttemptOutcome;
}

/// Production [`Fetcher`] backed by the yt-dlp command-line tool
pub struct YtDlpFetcher {
    tool: PathBuf,
    config: Arc<Config>,
    classifier: Classifier,
}

/// Outcome of one tool invocation (one output kind)
enum StageOutcome {
    Ok,
    Failed(String),
    TimedOut,
}

impl YtDlpFetcher {
    /// Locate the media tool and build a fetcher.
    ///
    /// Uses the explicitly configured path when present, otherwise searches
    /// PATH via `which`.
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let tool = match &config.fetch.tool_path {
            Some(path) => path.clone(),
            None => which::which(TOOL_BINARY).map_err(|e| {
                Error::ToolMissing(format!("{TOOL_BINARY} not found on PATH: {e}"))
            })?,
        };

        tracing::info!(tool = %tool.display(), "Media tool located");

        Ok(Self {
            tool,
            config,
            classifier: classify_diagnostic,
        })
    }

    /// Replace the diagnostic classifier (heuristics are pluggable)
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Resolved path of the media tool binary
    pub fn tool_path(&self) -> &Path {
        &self.tool
    }

    /// Flags common to every download invocation
    fn base_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.config.proxy.enabled {
            args.push("--proxy".into());
            args.push(self.config.proxy.socks_url.clone());
        }

        args.extend(
            [
                "--socket-timeout",
                &self.config.fetch.socket_timeout_secs.to_string(),
                "--retries",
                "2",
                "--fragment-retries",
                "2",
                "--no-warnings",
                "--no-playlist",
                "--quiet",
                "--continue",
                "--no-abort-on-unavailable-fragments",
            ]
            .map(String::from),
        );

        if let Some(cookies) = &self.config.download.cookies_file {
            args.push("--cookies".into());
            args.push(cookies.display().to_string());
        }

        args
    }

    fn audio_args(&self, item: &Item, out_dir: &Path) -> Vec<String> {
        let mut args = self.base_args();
        args.extend(
            [
                "-x",
                "--audio-format",
                item.audio_format.as_str(),
                "--audio-quality",
                "0",
                "-o",
            ]
            .map(String::from),
        );
        args.push(output_template(out_dir));
        args.push(item.url.clone());
        args
    }

    fn video_args(&self, item: &Item, out_dir: &Path) -> Vec<String> {
        let mut args = self.base_args();
        args.extend(
            [
                "-f",
                "bestvideo+bestaudio/best",
                "--merge-output-format",
                "mp4",
                "-o",
            ]
            .map(String::from),
        );
        args.push(output_template(out_dir));
        args.push(item.url.clone());
        args
    }

    fn transcript_args(&self, item: &Item, out_dir: &Path) -> Vec<String> {
        let mut args = self.base_args();
        args.extend(
            [
                "--skip-download",
                "--write-auto-sub",
                "--sub-langs",
                "en",
                "--convert-subs",
                "txt",
                "-o",
            ]
            .map(String::from),
        );
        args.push(output_template(out_dir));
        args.push(item.url.clone());
        args
    }

    /// Run one tool invocation under a timeout.
    async fn run_stage(&self, args: &[String], timeout: Duration) -> StageOutcome {
        let mut cmd = Command::new(&self.tool);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Err(_) => return StageOutcome::TimedOut,
            Ok(Err(e)) => return StageOutcome::Failed(format!("failed to spawn tool: {e}")),
            Ok(Ok(output)) => output,
        };

        if output.status.success() {
            StageOutcome::Ok
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            StageOutcome::Failed(stderr.trim().to_string())
        }
    }

    /// Map a failed stage to an attempt outcome via the classifier.
    fn outcome_for_failure(&self, diagnostic: String) -> AttemptOutcome {
        let reason = (self.classifier)(&diagnostic);
        let detail = util::truncate_error(&diagnostic);

        if reason.is_terminal() {
            AttemptOutcome::Terminal { reason, detail }
        } else {
            AttemptOutcome::Retryable { reason, detail }
        }
    }
}

fn output_template(dir: &Path) -> String {
    dir.join("%(title)s.%(ext)s").display().to_string()
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    async fn probe_title(&self, url: &str) -> String {
        let mut cmd = Command::new(&self.tool);
        cmd.args(["--quiet", "--no-warnings", "-e", url])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(self.config.fetch.title_timeout, cmd.output()).await {
            Err(_) => "Unknown (timeout)".to_string(),
            Ok(Err(_)) => "Unknown".to_string(),
            Ok(Ok(output)) => {
                let title = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if title.is_empty() {
                    "Unknown".to_string()
                } else {
                    title
                }
            }
        }
    }

    async fn fetch(&self, item: &Item) -> AttemptOutcome {
        let audio_dir = self.config.audio_dir().join(&item.subdir);
        let video_dir = self.config.video_dir().join(&item.subdir);
        let transcript_dir = self.config.transcripts_dir().join(&item.subdir);

        // Stages run sequentially; the first failure decides the outcome.
        let stages: Vec<(bool, &Path, Vec<String>, Duration)> = vec![
            (
                item.audio,
                audio_dir.as_path(),
                self.audio_args(item, &audio_dir),
                self.config.fetch.audio_timeout,
            ),
            (
                item.video,
                video_dir.as_path(),
                self.video_args(item, &video_dir),
                self.config.fetch.video_timeout,
            ),
            (
                item.transcripts,
                transcript_dir.as_path(),
                self.transcript_args(item, &transcript_dir),
                self.config.fetch.transcript_timeout,
            ),
        ];

        for (requested, out_dir, args, timeout) in &stages {
            if !requested {
                continue;
            }

            if let Err(e) = tokio::fs::create_dir_all(out_dir).await {
                return AttemptOutcome::Retryable {
                    reason: FailureReason::Unknown,
                    detail: util::truncate_error(&format!(
                        "failed to create {}: {e}",
                        out_dir.display()
                    )),
                };
            }

            match self.run_stage(args, *timeout).await {
                StageOutcome::Ok => {}
                StageOutcome::TimedOut => {
                    return AttemptOutcome::Retryable {
                        reason: FailureReason::Timeout,
                        detail: format!("tool exceeded {}s timeout", timeout.as_secs()),
                    };
                }
                StageOutcome::Failed(diagnostic) => {
                    return self.outcome_for_failure(diagnostic);
                }
            }
        }

        let size_mb = if item.audio {
            util::dir_size_mb(&audio_dir)
        } else {
            0.0
        };

        AttemptOutcome::Success { size_mb }
    }
}
