//! Bounded-concurrency batch execution with in-band identity rotation
//!
//! Runs every item of a batch through [`fetch_with_retry`] under a semaphore,
//! delivering results in completion order. When the shared [`RateLimiter`]
//! raises its rotation flag, the collector grabs the rotation gate (blocking
//! any worker from starting its next fetch), rotates the network identity,
//! pauses briefly and resumes. In-flight fetches are never cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore, mpsc};

use crate::config::RetryConfig;
use crate::fetch::Fetcher;
use crate::proxy::IdentityRotator;
use crate::rate_limit::RateLimiter;
use crate::retry::fetch_with_retry;
use crate::types::{Item, ItemResult};

/// Everything a batch run needs besides its collaborators.
pub struct BatchParams {
    /// Items to fetch, in submission order
    pub items: Vec<Item>,
    /// Worker concurrency, already clamped by the caller
    pub concurrency: usize,
    /// Per-item retry policy
    pub retry: RetryConfig,
    /// Pause after a successful in-batch rotation before resuming intake
    pub rotation_pause: Duration,
}

/// Progress notifications emitted while a batch runs.
#[derive(Debug)]
pub enum BatchUpdate {
    /// One item reached a terminal state
    Completed(ItemResult),
    /// The pool is rotating the network identity; intake is paused
    Rotating,
}

/// Run a batch to completion, invoking `on_update` for every progress event.
///
/// Returns all item results in completion order. The update callback runs on
/// the collector task, so results are observed in the same order they are
/// returned.
pub async fn run_batch<F>(
    params: BatchParams,
    fetcher: Arc<dyn Fetcher>,
    limiter: Arc<RateLimiter>,
    rotator: Arc<dyn IdentityRotator>,
    mut on_update: F,
) -> Vec<ItemResult>
where
    F: FnMut(BatchUpdate),
{
    let total = params.items.len();
    let semaphore = Arc::new(Semaphore::new(params.concurrency.max(1)));
    let gate = Arc::new(Mutex::new(()));
    let (tx, mut rx) = mpsc::channel::<ItemResult>(total.max(1));

    for item in params.items {
        let semaphore = Arc::clone(&semaphore);
        let gate = Arc::clone(&gate);
        let fetcher = Arc::clone(&fetcher);
        let limiter = Arc::clone(&limiter);
        let retry = params.retry.clone();
        let tx = tx.clone();

        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire().await else {
                return; // semaphore closed, batch abandoned
            };

            // Wait out any in-progress identity rotation before starting
            drop(gate.lock().await);

            let result = fetch_with_retry(fetcher.as_ref(), &limiter, &retry, &item).await;
            let _ = tx.send(result).await;
        });
    }
    drop(tx);

    let mut results = Vec::with_capacity(total);
    while let Some(result) = rx.recv().await {
        results.push(result.clone());
        on_update(BatchUpdate::Completed(result));

        if limiter.rotation_needed().await && results.len() < total {
            on_update(BatchUpdate::Rotating);

            // Hold the gate so no worker starts a fetch mid-rotation
            let _guard = gate.lock().await;
            match rotator.rotate().await {
                Ok(identity) => {
                    limiter.clear_rotation_flag().await;
                    tracing::info!(exit = ?identity, "Identity rotated mid-batch");
                    tokio::time::sleep(params.rotation_pause).await;
                }
                Err(error) => {
                    // Flag stays raised; throttled items keep failing fast
                    // rather than hammering the same identity.
                    tracing::warn!(%error, "Identity rotation failed");
                }
            }
        }
    }

    results
}
