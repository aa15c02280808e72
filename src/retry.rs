//! Per-item retry loop with exponential backoff
//!
//! Drives one item through up to `max_attempts` fetch attempts, consulting
//! the shared [`RateLimiter`] before each attempt and feeding every outcome
//! back into it. Produces the item's terminal [`ItemResult`].
//!
//! Classification rules:
//! - `Success` resets the rate limiter and terminates the loop.
//! - `Retryable(RateLimited)` records a throttle; if that pushes the tracker
//!   over its rotation threshold the item fails immediately instead of
//!   burning its remaining attempts while throttled.
//! - `Terminal(Unavailable | AccessRestricted)` fails immediately, no backoff.
//! - `Retryable(Timeout | Unknown)` sleeps `initial_backoff * 2^attempt` and
//!   retries while attempts remain.

use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;

use crate::config::RetryConfig;
use crate::fetch::Fetcher;
use crate::rate_limit::RateLimiter;
use crate::types::{AttemptOutcome, FailureReason, Item, ItemResult, ItemStatus};
use crate::util;

/// Run one item's full retry loop and return its terminal record.
pub async fn fetch_with_retry(
    fetcher: &dyn Fetcher,
    limiter: &RateLimiter,
    config: &RetryConfig,
    item: &Item,
) -> ItemResult {
    let start = Instant::now();
    let title = fetcher.probe_title(&item.url).await;
    let mut retries: u32 = 0;
    let mut last_error = String::new();

    for attempt in 0..config.max_attempts {
        // Global backoff window: the one suspension point tied to shared state
        if let Some(wait) = limiter.should_wait().await {
            tracing::warn!(
                url = %item.url,
                wait_secs = wait.as_secs_f64(),
                "Rate limit backoff before attempt"
            );
            tokio::time::sleep(wait).await;
        }

        match fetcher.fetch(item).await {
            AttemptOutcome::Success { size_mb } => {
                limiter.record_success().await;
                tracing::info!(url = %item.url, title = %title, retries, "Item fetched");
                return ItemResult {
                    url: item.url.clone(),
                    title,
                    status: ItemStatus::Success,
                    error: None,
                    retries,
                    duration_secs: start.elapsed().as_secs_f64(),
                    size_mb,
                    timestamp: Utc::now(),
                };
            }

            AttemptOutcome::Retryable {
                reason: FailureReason::RateLimited,
                detail,
            } => {
                retries += 1;
                last_error = detail;
                limiter.record_throttled().await;

                // Past the rotation threshold there is no point retrying this
                // item; the pool will rotate identity before new attempts.
                if limiter.rotation_needed().await {
                    tracing::warn!(url = %item.url, "Throttle threshold reached, abandoning item");
                    return failed(item, title, "Rate limited - identity rotation needed", retries, start);
                }

                if attempt + 1 < config.max_attempts {
                    let delay = backoff_delay(config, attempt);
                    tracing::info!(
                        url = %item.url,
                        attempt = attempt + 1,
                        max = config.max_attempts,
                        delay_secs = delay.as_secs(),
                        "Throttled, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }

            AttemptOutcome::Terminal { reason, .. } => {
                tracing::info!(url = %item.url, ?reason, "Terminal failure, not retrying");
                return failed(item, title, reason.summary(), retries, start);
            }

            AttemptOutcome::Retryable { reason, detail } => {
                retries += 1;
                last_error = if detail.is_empty() {
                    reason.summary().to_string()
                } else {
                    detail
                };

                if attempt + 1 < config.max_attempts {
                    let delay = backoff_delay(config, attempt);
                    tracing::warn!(
                        url = %item.url,
                        attempt = attempt + 1,
                        max = config.max_attempts,
                        delay_secs = delay.as_secs(),
                        error = %last_error,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    let message = if last_error.is_empty() {
        "Max retries exceeded".to_string()
    } else {
        util::truncate_error(&last_error)
    };
    failed(item, title, &message, retries, start)
}

fn failed(item: &Item, title: String, error: &str, retries: u32, start: Instant) -> ItemResult {
    ItemResult {
        url: item.url.clone(),
        title,
        status: ItemStatus::Failed,
        error: Some(error.to_string()),
        retries,
        duration_secs: start.elapsed().as_secs_f64(),
        size_mb: 0.0,
        timestamp: Utc::now(),
    }
}

/// Backoff before the retry following `attempt` (0-based):
/// `initial_backoff * 2^attempt`, capped, with optional jitter.
fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let shift = attempt.min(31);
    let base = config
        .initial_backoff
        .saturating_mul(1u32 << shift)
        .min(config.max_backoff);

    if config.jitter {
        let factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
        Duration::from_secs_f64(base.as_secs_f64() * (1.0 + factor)).min(config.max_backoff * 2)
    } else {
        base
    }
}
