//! REST API server
//!
//! Thin HTTP surface over [`TubeDownloader`]: every handler validates input,
//! delegates to the engine, and renders domain errors through the shared
//! JSON envelope. Interactive documentation is served from `/swagger-ui`
//! when enabled.

mod error_response;
mod openapi;
mod routes;
mod state;

pub use openapi::ApiDoc;
pub use routes::{
    DownloadResponse, HealthResponse, ProgressResponse, RotateResponse, SearchResponse,
};
pub use state::AppState;

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::ApiConfig;
use crate::downloader::TubeDownloader;
use crate::error::{Error, Result};

/// Build the application router for the given engine.
pub fn create_router(downloader: Arc<TubeDownloader>) -> Router {
    let api_config = downloader.config().api.clone();
    let state = AppState::new(downloader);

    let mut router = Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/status", get(routes::status))
        .route("/api/search", post(routes::search))
        .route("/api/download", post(routes::download))
        .route("/api/progress/:job_id", get(routes::progress))
        .route("/api/rotate", post(routes::rotate))
        .route("/api/openapi.json", get(openapi_json))
        .with_state(state);

    if api_config.swagger_ui {
        router = router
            .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));
    }

    if api_config.cors_enabled {
        router = router.layer(build_cors_layer(&api_config));
    }

    router.layer(TraceLayer::new_for_http())
}

/// Serve the raw OpenAPI document
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    if config.cors_origins.iter().any(|origin| origin == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Bind the configured address and serve until interrupted.
///
/// Shuts down gracefully on Ctrl-C; in-flight requests complete, background
/// jobs keep running until the process exits.
pub async fn start_api_server(downloader: Arc<TubeDownloader>) -> Result<()> {
    let bind_address = downloader.config().api.bind_address;
    let router = create_router(downloader);

    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .map_err(|e| Error::ApiServerError(format!("cannot bind {bind_address}: {e}")))?;
    tracing::info!(%bind_address, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::ApiServerError(e.to_string()))
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "Cannot listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fetch::Fetcher;
    use crate::proxy::NoProxyRotator;
    use crate::search::SearchProvider;
    use crate::types::{AttemptOutcome, Item};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct OkFetcher;

    #[async_trait]
    impl Fetcher for OkFetcher {
        async fn probe_title(&self, url: &str) -> String {
            format!("Title for {url}")
        }

        async fn fetch(&self, _item: &Item) -> AttemptOutcome {
            AttemptOutcome::Success { size_mb: 1.0 }
        }
    }

    struct FixedSearch(Vec<String>);

    #[async_trait]
    impl SearchProvider for FixedSearch {
        async fn search(&self, _query: &str, _max: usize) -> crate::error::Result<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    fn test_router(results: Vec<String>) -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.download.output_dir = dir.path().to_path_buf();
        config.proxy.enabled = false;

        let downloader = Arc::new(TubeDownloader::with_collaborators(
            Arc::new(config),
            Arc::new(OkFetcher),
            Arc::new(FixedSearch(results)),
            Arc::new(NoProxyRotator),
        ));
        (create_router(downloader), dir)
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_returns_healthy() {
        let (router, _dir) = test_router(Vec::new());
        let response = router
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn status_reports_job_counts_and_proxy_state() {
        let (router, _dir) = test_router(Vec::new());
        let response = router
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "ok");
        // Proxy fields keep their established wire names
        assert_eq!(json["tor_connected"], false);
        assert!(json["tor_ip"].is_null());
        assert_eq!(json["cookies"], false);
        assert_eq!(json["active_jobs"], 0);
        assert_eq!(json["total_jobs"], 0);
        assert!(json.get("proxy_active").is_none());
    }

    #[tokio::test]
    async fn search_returns_results_with_titles() {
        let url = "https://www.youtube.com/watch?v=searchhit01".to_string();
        let (router, _dir) = test_router(vec![url.clone()]);
        let response = router
            .oneshot(post_json(
                "/api/search",
                serde_json::json!({"query": "lofi beats"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["count"], 1);
        assert_eq!(json["results"][0], url);
        assert_eq!(json["titles"][&url], format!("Title for {url}"));
        assert_eq!(json["is_url"], false);
        assert_eq!(json["subdir"], "lofi_beats");
    }

    #[tokio::test]
    async fn search_with_no_results_is_404() {
        let (router, _dir) = test_router(Vec::new());
        let response = router
            .oneshot(post_json(
                "/api/search",
                serde_json::json!({"query": "nothing"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"]["code"], "search_failed");
    }

    #[tokio::test]
    async fn download_queues_a_job_and_progress_tracks_it() {
        let (router, _dir) = test_router(vec![
            "https://www.youtube.com/watch?v=apiflow0001".to_string(),
        ]);

        let response = router
            .clone()
            .oneshot(post_json(
                "/api/download",
                serde_json::json!({"query": "api flow"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "queued");
        let job_id = json["job_id"].as_str().unwrap().to_string();

        // Poll until terminal
        for _ in 0..200 {
            let response = router
                .clone()
                .oneshot(
                    Request::get(format!("/api/progress/{job_id}"))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let json = json_body(response).await;
            assert!(json["started_at"].is_string(), "missing start timestamp");
            if json["status"] == "complete" {
                assert_eq!(json["progress"], 100);
                assert_eq!(json["succeeded"], 1);
                assert_eq!(json["results"].as_array().unwrap().len(), 1);
                return;
            }
            // Running jobs never expose per-item results
            assert!(json.get("results").is_none());
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("job never completed");
    }

    #[tokio::test]
    async fn download_without_output_kinds_is_400() {
        let (router, _dir) = test_router(Vec::new());
        let response = router
            .oneshot(post_json(
                "/api/download",
                serde_json::json!({"query": "q", "audio": false}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await["error"]["code"],
            "validation_error"
        );
    }

    #[tokio::test]
    async fn progress_of_unknown_job_is_404() {
        let (router, _dir) = test_router(Vec::new());
        let response = router
            .oneshot(
                Request::get("/api/progress/6f9619ff-8b86-4011-b42d-00c04fc964ff")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"]["code"], "job_not_found");
    }

    #[tokio::test]
    async fn progress_with_malformed_id_is_400() {
        let (router, _dir) = test_router(Vec::new());
        let response = router
            .oneshot(
                Request::get("/api/progress/not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn rotate_reports_success_with_old_and_new_ip() {
        let (router, _dir) = test_router(Vec::new());
        let response = router
            .oneshot(post_json("/api/rotate", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["success"], true);
        // The no-proxy rotator has no addresses to report, but the fields
        // are always present
        assert!(json["old_ip"].is_null());
        assert!(json["new_ip"].is_null());
    }

    struct AddressedRotator;

    #[async_trait]
    impl crate::proxy::IdentityRotator for AddressedRotator {
        async fn current_identity(&self) -> Option<std::net::IpAddr> {
            Some("10.0.0.1".parse().unwrap())
        }

        async fn rotate(&self) -> crate::error::Result<Option<std::net::IpAddr>> {
            Ok(Some("10.0.0.2".parse().unwrap()))
        }

        async fn is_active(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn rotate_returns_addresses_from_before_and_after() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.download.output_dir = dir.path().to_path_buf();

        let downloader = Arc::new(TubeDownloader::with_collaborators(
            Arc::new(config),
            Arc::new(OkFetcher),
            Arc::new(FixedSearch(Vec::new())),
            Arc::new(AddressedRotator),
        ));
        let router = create_router(downloader);

        let response = router
            .oneshot(post_json("/api/rotate", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["old_ip"], "10.0.0.1");
        assert_eq!(json["new_ip"], "10.0.0.2");
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let (router, _dir) = test_router(Vec::new());
        let response = router
            .oneshot(
                Request::get("/api/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert!(json["paths"].get("/api/download").is_some());
    }
}
