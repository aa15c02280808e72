//! Shared state for API handlers

use std::sync::Arc;

use crate::downloader::TubeDownloader;

/// State handed to every handler: the engine plus nothing else.
/// Cloning is cheap (one `Arc` bump).
#[derive(Clone)]
pub struct AppState {
    /// The download job engine
    pub downloader: Arc<TubeDownloader>,
}

impl AppState {
    /// Wrap a downloader for router construction
    pub fn new(downloader: Arc<TubeDownloader>) -> Self {
        Self { downloader }
    }
}
