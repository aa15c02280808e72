//! Video search with layered fallback back-ends
//!
//! Resolution tries each back-end in order and returns the first non-empty
//! result set:
//!
//! 1. the media tool's own search (`ytsearchN:` pseudo-URL)
//! 2. DuckDuckGo's HTML endpoint, restricted to the video site
//! 3. the video site's results page, scraped by regex
//! 4. Bing video search, scraped the same way
//!
//! Scraping is deliberately regex-based: video IDs have a fixed 11-character
//! alphabet, which survives markup changes far better than DOM selectors.
//! Base URLs are overridable so tests can point the scrapers at a local
//! HTTP server.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use crate::config::SearchConfig;
use crate::error::{Error, Result};

const DUCKDUCKGO_BASE: &str = "https://html.duckduckgo.com";
const YOUTUBE_BASE: &str = "https://www.youtube.com";
const BING_BASE: &str = "https://www.bing.com";

const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";

fn video_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::unwrap_used)]
    RE.get_or_init(|| Regex::new(r"watch\?v=([A-Za-z0-9_-]{11})").unwrap())
}

fn uddg_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::unwrap_used)]
    RE.get_or_init(|| Regex::new(r#"uddg=([^&"'\s]+)"#).unwrap())
}

/// Seam for item resolution, mockable in tests.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Resolve a free-text query into watch URLs, at most `max_results`.
    /// An empty vector means every back-end came up dry.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>>;
}

/// Production search provider with the full fallback chain.
pub struct HttpSearchProvider {
    config: SearchConfig,
    client: reqwest::Client,
    tool: Option<PathBuf>,
    duckduckgo_base: String,
    youtube_base: String,
    bing_base: String,
}

impl HttpSearchProvider {
    /// Build a provider. `tool` enables the tool-native back-end;
    /// `socks_url` routes scraper traffic through the proxy.
    pub fn new(config: SearchConfig, tool: Option<PathBuf>, socks_url: Option<&str>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent("Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0");
        if let Some(url) = socks_url {
            let proxy = reqwest::Proxy::all(url).map_err(|source| Error::Config {
                message: format!("invalid SOCKS proxy URL: {source}"),
                key: Some("proxy.socks_url".to_string()),
            })?;
            builder = builder.proxy(proxy);
        }

        Ok(Self {
            config,
            client: builder.build()?,
            tool,
            duckduckgo_base: DUCKDUCKGO_BASE.to_string(),
            youtube_base: YOUTUBE_BASE.to_string(),
            bing_base: BING_BASE.to_string(),
        })
    }

    /// Point the HTML scrapers at different hosts (test hook).
    #[doc(hidden)]
    pub fn with_bases(
        mut self,
        duckduckgo: impl Into<String>,
        youtube: impl Into<String>,
        bing: impl Into<String>,
    ) -> Self {
        self.duckduckgo_base = duckduckgo.into();
        self.youtube_base = youtube.into();
        self.bing_base = bing.into();
        self
    }

    /// Tool-native search: `ytsearchN:<query>` in flat-playlist mode prints
    /// one video ID per line without touching the media streams.
    async fn tool_search(&self, query: &str, limit: usize) -> Vec<String> {
        let Some(tool) = &self.tool else {
            return Vec::new();
        };

        let mut command = Command::new(tool);
        command
            .arg("--quiet")
            .arg("--no-warnings")
            .arg("--flat-playlist")
            .arg("--print")
            .arg("%(id)s")
            .arg(format!("ytsearch{limit}:{query}"))
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.config.timeout, command.output()).await;
        match output {
            Ok(Ok(output)) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(|id| format!("{WATCH_URL_PREFIX}{id}"))
                    .collect()
            }
            Ok(Ok(output)) => {
                tracing::debug!(
                    status = ?output.status,
                    "Tool search exited non-zero"
                );
                Vec::new()
            }
            Ok(Err(error)) => {
                tracing::debug!(%error, "Tool search failed to launch");
                Vec::new()
            }
            Err(_) => {
                tracing::debug!("Tool search timed out");
                Vec::new()
            }
        }
    }

    /// DuckDuckGo HTML search. Result links are redirectors carrying the real
    /// target percent-encoded in their `uddg` parameter.
    async fn duckduckgo_search(&self, query: &str) -> Vec<String> {
        let url = format!(
            "{}/html/?q={}",
            self.duckduckgo_base,
            urlencoding::encode(&format!("{query} site:youtube.com"))
        );
        let Some(body) = self.get_text(&url).await else {
            return Vec::new();
        };

        let mut urls = Vec::new();
        for capture in uddg_pattern().captures_iter(&body) {
            let encoded = &capture[1];
            let Ok(decoded) = urlencoding::decode(encoded) else {
                continue;
            };
            if let Some(id_capture) = video_id_pattern().captures(&decoded) {
                urls.push(format!("{WATCH_URL_PREFIX}{}", &id_capture[1]));
            }
        }
        urls
    }

    /// Scrape the video site's own results page for watch links.
    async fn youtube_search(&self, query: &str) -> Vec<String> {
        let url = format!(
            "{}/results?search_query={}",
            self.youtube_base,
            urlencoding::encode(query)
        );
        self.scrape_watch_links(&url).await
    }

    /// Bing video search, last resort.
    async fn bing_search(&self, query: &str) -> Vec<String> {
        let url = format!(
            "{}/videos/search?q={}",
            self.bing_base,
            urlencoding::encode(&format!("{query} youtube"))
        );
        self.scrape_watch_links(&url).await
    }

    async fn scrape_watch_links(&self, url: &str) -> Vec<String> {
        let Some(body) = self.get_text(url).await else {
            return Vec::new();
        };
        video_id_pattern()
            .captures_iter(&body)
            .map(|capture| format!("{WATCH_URL_PREFIX}{}", &capture[1]))
            .collect()
    }

    async fn get_text(&self, url: &str) -> Option<String> {
        match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => response.text().await.ok(),
            Ok(response) => {
                tracing::debug!(url, status = %response.status(), "Search back-end HTTP error");
                None
            }
            Err(error) => {
                tracing::debug!(url, %error, "Search back-end request failed");
                None
            }
        }
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>> {
        if query.trim().is_empty() {
            return Err(Error::Validation("query must not be empty".to_string()));
        }
        let limit = max_results.clamp(1, self.config.max_results_cap);

        let tool = self.tool_search(query, limit).await;
        if let Some(urls) = non_empty(tool, limit, "tool", query) {
            return Ok(urls);
        }
        let ddg = self.duckduckgo_search(query).await;
        if let Some(urls) = non_empty(ddg, limit, "duckduckgo", query) {
            return Ok(urls);
        }
        let site = self.youtube_search(query).await;
        if let Some(urls) = non_empty(site, limit, "youtube", query) {
            return Ok(urls);
        }
        let bing = self.bing_search(query).await;
        if let Some(urls) = non_empty(bing, limit, "bing", query) {
            return Ok(urls);
        }

        tracing::warn!(query, "All search back-ends returned no results");
        Ok(Vec::new())
    }
}

fn non_empty(urls: Vec<String>, limit: usize, backend: &str, query: &str) -> Option<Vec<String>> {
    let urls = dedup_and_cap(urls, limit);
    if urls.is_empty() {
        None
    } else {
        tracing::info!(backend, count = urls.len(), query, "Search resolved");
        Some(urls)
    }
}

fn dedup_and_cap(urls: Vec<String>, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter(|url| seen.insert(url.clone()))
        .take(limit)
        .collect()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> HttpSearchProvider {
        HttpSearchProvider::new(SearchConfig::default(), None, None)
            .unwrap()
            .with_bases(server.uri(), server.uri(), server.uri())
    }

    fn watch(id: &str) -> String {
        format!("{WATCH_URL_PREFIX}{id}")
    }

    #[tokio::test]
    async fn duckduckgo_results_are_decoded_from_redirector_links() {
        let server = MockServer::start().await;
        let body = concat!(
            r#"<a href="/l/?uddg=https%3A%2F%2Fwww.youtube.com%2Fwatch%3Fv%3Dabcdefghij1&rut=x">one</a>"#,
            r#"<a href="/l/?uddg=https%3A%2F%2Fwww.youtube.com%2Fwatch%3Fv%3Dabcdefghij2">two</a>"#,
            r#"<a href="/l/?uddg=https%3A%2F%2Fexample.com%2Fnot-a-video">skip</a>"#,
        );
        Mock::given(method("GET"))
            .and(path("/html/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let urls = provider(&server).search("lofi beats", 10).await.unwrap();
        assert_eq!(urls, vec![watch("abcdefghij1"), watch("abcdefghij2")]);
    }

    #[tokio::test]
    async fn falls_back_to_site_scrape_when_duckduckgo_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/html/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>no links</html>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/results"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"url":"/watch?v=zzzzzzzzzz1"} {"url":"/watch?v=zzzzzzzzzz2"}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/videos/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .mount(&server)
            .await;

        let urls = provider(&server).search("anything", 10).await.unwrap();
        assert_eq!(urls, vec![watch("zzzzzzzzzz1"), watch("zzzzzzzzzz2")]);
    }

    #[tokio::test]
    async fn bing_is_the_last_resort() {
        let server = MockServer::start().await;
        for p in ["/html/", "/results"] {
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(ResponseTemplate::new(500))
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/videos/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<a href="https://www.youtube.com/watch?v=bingresult1">r</a>"#,
            ))
            .mount(&server)
            .await;

        let urls = provider(&server).search("rare query", 5).await.unwrap();
        assert_eq!(urls, vec![watch("bingresult1")]);
    }

    #[tokio::test]
    async fn duplicates_are_removed_and_limit_enforced() {
        let server = MockServer::start().await;
        let body: String = (0..30)
            .map(|i| format!(r#"/watch?v=duplicate{:02}"#, i % 5))
            .collect::<Vec<_>>()
            .join(" ");
        Mock::given(method("GET"))
            .and(path("/html/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("nothing"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/results"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let urls = provider(&server).search("dupes", 3).await.unwrap();
        assert_eq!(urls.len(), 3);
        let unique: HashSet<_> = urls.iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[tokio::test]
    async fn all_backends_dry_yields_empty_ok() {
        let server = MockServer::start().await;
        for p in ["/html/", "/results", "/videos/search"] {
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(ResponseTemplate::new(200).set_body_string("nope"))
                .mount(&server)
                .await;
        }

        let urls = provider(&server).search("nothing here", 5).await.unwrap();
        assert!(urls.is_empty());
    }

    #[tokio::test]
    async fn empty_query_is_a_validation_error() {
        let server = MockServer::start().await;
        let err = provider(&server).search("   ", 5).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn video_id_regex_requires_exactly_eleven_chars() {
        let captures: Vec<_> = video_id_pattern()
            .captures_iter("watch?v=exactly11ch watch?v=short watch?v=muchtoolong4sure")
            .map(|c| c[1].to_string())
            .collect();
        assert!(captures.contains(&"exactly11ch".to_string()));
        assert!(!captures.contains(&"short".to_string()));
    }
}
