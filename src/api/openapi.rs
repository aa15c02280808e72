//! OpenAPI document assembly

use utoipa::OpenApi;

use super::routes;
use crate::config;
use crate::downloader::SystemStatus;
use crate::error::{ApiError, ErrorDetail};
use crate::types;

/// Top-level OpenAPI document for the REST API
#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health,
        routes::status,
        routes::search,
        routes::download,
        routes::progress,
        routes::rotate,
    ),
    components(schemas(
        types::JobId,
        types::AudioFormat,
        types::FailureReason,
        types::ItemStatus,
        types::ItemResult,
        types::JobStatus,
        types::JobSnapshot,
        types::DownloadRequest,
        types::SearchRequest,
        config::DownloadConfig,
        config::RetryConfig,
        SystemStatus,
        ApiError,
        ErrorDetail,
        routes::HealthResponse,
        routes::SearchResponse,
        routes::DownloadResponse,
        routes::ProgressResponse,
        routes::RotateResponse,
    )),
    tags(
        (name = "system", description = "Health, status and identity management"),
        (name = "search", description = "Query resolution without downloading"),
        (name = "downloads", description = "Job submission and progress"),
    )
)]
pub struct ApiDoc;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<_> = doc.paths.paths.keys().cloned().collect();
        for expected in [
            "/api/health",
            "/api/status",
            "/api/search",
            "/api/download",
            "/api/progress/{job_id}",
            "/api/rotate",
        ] {
            assert!(paths.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn document_serializes_to_json() {
        let json = ApiDoc::openapi().to_json().unwrap();
        assert!(json.contains("tube-dl"));
    }
}
