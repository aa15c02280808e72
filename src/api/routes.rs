//! API route handlers

use std::collections::HashMap;

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::downloader::SystemStatus;
use crate::error::{Error, Result};
use crate::types::{DownloadRequest, JobId, JobSnapshot, JobStatus, SearchRequest};
use crate::util;

use super::state::AppState;

/// Response for POST /api/download
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloadResponse {
    /// Identifier for polling /api/progress/{job_id}
    pub job_id: JobId,
    /// Always "queued" on acceptance
    pub status: String,
    /// The submitted query, echoed back
    pub query: String,
    /// Human-readable confirmation
    pub message: String,
}

/// Response for POST /api/search
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct SearchResponse {
    /// The original query
    pub query: String,
    /// Number of results
    pub count: usize,
    /// Watch URLs in back-end order
    pub results: Vec<String>,
    /// Display titles keyed by URL ("Unknown" when the probe failed)
    pub titles: HashMap<String, String>,
    /// Whether the query was treated as a direct URL, echoed back
    pub is_url: bool,
    /// Sanitized per-query output subdirectory name
    pub subdir: String,
}

/// Response for GET /api/progress/{job_id}
///
/// Per-item results appear only once the job is terminal; while running,
/// callers follow the counters and message instead.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ProgressResponse {
    /// Job identifier
    pub job_id: JobId,
    /// Original query
    pub query: String,
    /// Lifecycle status
    pub status: JobStatus,
    /// Progress percentage
    pub progress: u8,
    /// Human-readable status message
    pub message: String,
    /// Resolved item count
    pub total_items: usize,
    /// Successful items so far
    pub succeeded: usize,
    /// Failed items so far
    pub failed: usize,
    /// Submission timestamp
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// Elapsed seconds (frozen once terminal)
    pub elapsed_secs: f64,
    /// Per-item terminal records (terminal jobs only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<crate::types::ItemResult>>,
}

impl From<JobSnapshot> for ProgressResponse {
    fn from(snap: JobSnapshot) -> Self {
        let terminal = snap.status.is_terminal();
        Self {
            job_id: snap.job_id,
            query: snap.query,
            status: snap.status,
            progress: snap.progress,
            message: snap.message,
            total_items: snap.total_items,
            succeeded: snap.succeeded,
            failed: snap.failed,
            started_at: snap.started_at,
            elapsed_secs: snap.elapsed_secs,
            results: terminal.then_some(snap.results),
        }
    }
}

/// Response for POST /api/rotate
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RotateResponse {
    /// True when the rotation went through
    pub success: bool,
    /// Exit address before the rotation, when determinable
    pub old_ip: Option<String>,
    /// Exit address after the rotation, when determinable
    pub new_ip: Option<String>,
}

/// Liveness response
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Always "healthy"
    pub status: String,
}

/// Liveness check
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "system",
    responses((status = 200, description = "Service is alive", body = HealthResponse))
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

/// System status: proxy state, job counts, output location
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "system",
    responses((status = 200, description = "Current system status", body = SystemStatus))
)]
pub async fn status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(state.downloader.status().await)
}

/// Resolve a query to watch URLs without downloading anything
#[utoipa::path(
    post,
    path = "/api/search",
    tag = "search",
    request_body = SearchRequest,
    responses(
        (status = 200, description = "Search results with titles", body = SearchResponse),
        (status = 404, description = "No results from any back-end", body = crate::error::ApiError),
    )
)]
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let (results, titles) = state
        .downloader
        .search_preview(&request.query, request.max_results, request.is_url)
        .await?;

    if results.is_empty() {
        return Err(Error::Search(format!(
            "no results for \"{}\"",
            request.query
        )));
    }

    Ok(Json(SearchResponse {
        count: results.len(),
        results,
        titles,
        is_url: request.is_url,
        subdir: util::sanitize_name(&request.query),
        query: request.query,
    }))
}

/// Queue a download job
#[utoipa::path(
    post,
    path = "/api/download",
    tag = "downloads",
    request_body = DownloadRequest,
    responses(
        (status = 200, description = "Job queued", body = DownloadResponse),
        (status = 400, description = "Invalid request", body = crate::error::ApiError),
    )
)]
pub async fn download(
    State(state): State<AppState>,
    Json(request): Json<DownloadRequest>,
) -> Result<Json<DownloadResponse>> {
    let query = request.query.clone();
    let job_id = state.downloader.submit(request)?;

    Ok(Json(DownloadResponse {
        job_id,
        status: "queued".to_string(),
        message: format!("Download job queued for \"{query}\""),
        query,
    }))
}

/// Poll a job's progress
#[utoipa::path(
    get,
    path = "/api/progress/{job_id}",
    tag = "downloads",
    params(("job_id" = String, Path, description = "Job identifier from /api/download")),
    responses(
        (status = 200, description = "Job progress snapshot", body = ProgressResponse),
        (status = 404, description = "Unknown job", body = crate::error::ApiError),
    )
)]
pub async fn progress(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ProgressResponse>> {
    let id: JobId = job_id
        .parse()
        .map_err(|_| Error::Validation(format!("invalid job id: {job_id}")))?;
    let snapshot = state.downloader.progress(id)?;
    Ok(Json(snapshot.into()))
}

/// Force an identity rotation
#[utoipa::path(
    post,
    path = "/api/rotate",
    tag = "system",
    responses(
        (status = 200, description = "Identity rotated", body = RotateResponse),
        (status = 502, description = "Rotation failed", body = crate::error::ApiError),
    )
)]
pub async fn rotate(State(state): State<AppState>) -> Result<Json<RotateResponse>> {
    let (old_ip, new_ip) = state.downloader.rotate_identity().await?;
    Ok(Json(RotateResponse {
        success: true,
        old_ip: old_ip.map(|ip| ip.to_string()),
        new_ip: new_ip.map(|ip| ip.to_string()),
    }))
}
