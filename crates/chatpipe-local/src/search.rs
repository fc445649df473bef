use chatpipe_core::{Error, Result, SearchProvider, SearchQuery, SearchResponse, SearchResult};
use serde::Deserialize;
use crate::env;
use std::sync::Arc;
use std::time::Instant;

/// Items kept per query; the Custom Search API returns at most 10 per page.
pub const DEFAULT_MAX_RESULTS: usize = 5;

fn timeout_ms_from_query(q: &SearchQuery) -> u64 {
    // Provider requests can hang indefinitely without an explicit timeout.
    q.timeout_ms.unwrap_or(20_000).clamp(1_000, 60_000)
}

#[derive(Debug, Clone)]
pub struct GoogleSearchProvider {
    client: reqwest::Client,
    api_key: String,
    engine_id: String,
    endpoint: String,
}

#[derive(Debug, Clone)]
pub struct SearxngSearchProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl GoogleSearchProvider {
    pub fn new(client: reqwest::Client, api_key: String, engine_id: String) -> Self {
        Self {
            client,
            api_key,
            engine_id,
            endpoint: "https://www.googleapis.com/customsearch/v1".to_string(),
        }
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = env("CHATPIPE_GOOGLE_API_KEY").ok_or_else(|| {
            Error::NotConfigured("missing CHATPIPE_GOOGLE_API_KEY".to_string())
        })?;
        let engine_id = env("CHATPIPE_GOOGLE_CX")
            .ok_or_else(|| Error::NotConfigured("missing CHATPIPE_GOOGLE_CX".to_string()))?;
        let p = Self::new(client, api_key, engine_id);
        Ok(match env("CHATPIPE_GOOGLE_ENDPOINT") {
            Some(ep) => p.with_endpoint(ep),
            None => p,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl SearxngSearchProvider {
    pub fn new(client: reqwest::Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let endpoint = env("CHATPIPE_SEARXNG_ENDPOINT").ok_or_else(|| {
            Error::NotConfigured("missing CHATPIPE_SEARXNG_ENDPOINT".to_string())
        })?;
        Ok(Self::new(client, endpoint))
    }

    fn endpoint_search(&self) -> String {
        // Accept either a base URL (…/), or a full /search endpoint.
        let mut base = self.endpoint.trim().trim_end_matches('/').to_string();
        if !base.ends_with("/search") {
            base.push_str("/search");
        }
        base
    }
}

/// Pick the web search transport from the environment: Google when keyed, else SearXNG.
pub fn provider_from_env(client: reqwest::Client) -> Result<Arc<dyn SearchProvider>> {
    match GoogleSearchProvider::from_env(client.clone()) {
        Ok(p) => Ok(Arc::new(p)),
        Err(google_err) => match SearxngSearchProvider::from_env(client) {
            Ok(p) => Ok(Arc::new(p)),
            Err(_) => Err(Error::NotConfigured(format!(
                "no web search provider ({google_err}; or set CHATPIPE_SEARXNG_ENDPOINT)"
            ))),
        },
    }
}

#[derive(Debug, Deserialize)]
struct GoogleSearchResponse {
    // Absent when the query has no hits.
    items: Option<Vec<GoogleItem>>,
}

#[derive(Debug, Deserialize)]
struct GoogleItem {
    link: Option<String>,
    title: Option<String>,
    snippet: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorEnvelope {
    error: Option<GoogleError>,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    message: Option<String>,
}

#[async_trait::async_trait]
impl SearchProvider for GoogleSearchProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse> {
        let t0 = Instant::now();
        let max_results = q.max_results.unwrap_or(DEFAULT_MAX_RESULTS).min(10);
        let timeout_ms = timeout_ms_from_query(q);

        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.engine_id.as_str()),
                ("q", q.query.as_str()),
            ])
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            // The API puts a human-readable reason in error.message.
            let detail = resp
                .json::<GoogleErrorEnvelope>()
                .await
                .ok()
                .and_then(|e| e.error)
                .and_then(|e| e.message)
                .unwrap_or_else(|| "search API error".to_string());
            return Err(Error::Search(format!("google search HTTP {status}: {detail}")));
        }

        let parsed: GoogleSearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;

        let mut out = Vec::new();
        for item in parsed.items.unwrap_or_default().into_iter().take(max_results) {
            let Some(url) = item.link else { continue };
            out.push(SearchResult {
                url,
                title: item.title,
                snippet: item.snippet,
            });
        }

        tracing::debug!(
            query = %q.query,
            hits = out.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "google search done"
        );

        Ok(SearchResponse { results: out })
    }
}

#[derive(Debug, Deserialize)]
struct SearxngSearchResponse {
    results: Option<Vec<SearxngResult>>,
}

#[derive(Debug, Deserialize)]
struct SearxngResult {
    url: Option<String>,
    title: Option<String>,
    // SearXNG uses `content` for snippets in JSON format.
    content: Option<String>,
}

#[async_trait::async_trait]
impl SearchProvider for SearxngSearchProvider {
    fn name(&self) -> &'static str {
        "searxng"
    }

    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse> {
        let t0 = Instant::now();
        let max_results = q.max_results.unwrap_or(DEFAULT_MAX_RESULTS).min(20);
        let timeout_ms = timeout_ms_from_query(q);

        let resp = self
            .client
            .get(self.endpoint_search())
            .query(&[("q", q.query.as_str()), ("format", "json")])
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Search(format!("searxng search HTTP {status}")));
        }

        let parsed: SearxngSearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;

        let mut out = Vec::new();
        for r in parsed.results.unwrap_or_default().into_iter().take(max_results) {
            let Some(url) = r.url else { continue };
            out.push(SearchResult {
                url,
                title: r.title,
                snippet: r.content,
            });
        }

        tracing::debug!(
            query = %q.query,
            hits = out.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "searxng search done"
        );

        Ok(SearchResponse { results: out })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, http::StatusCode, routing::get, Json, Router};
    use std::collections::HashMap;
    use std::net::SocketAddr;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[test]
    fn parses_minimal_google_shape() {
        let js = r#"
        {
          "items": [
            {"link":"https://example.com","title":"Example","snippet":"Hello"}
          ]
        }
        "#;
        let parsed: GoogleSearchResponse = serde_json::from_str(js).unwrap();
        let items = parsed.items.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].link.as_deref(), Some("https://example.com"));

        // No `items` key at all means "no hits", not a parse error.
        let parsed: GoogleSearchResponse =
            serde_json::from_str(r#"{"searchInformation":{}}"#).unwrap();
        assert!(parsed.items.is_none());
    }

    #[test]
    fn searxng_endpoint_accepts_base_or_full_path() {
        let c = reqwest::Client::new();
        let p = SearxngSearchProvider::new(c.clone(), "http://a/".to_string());
        assert_eq!(p.endpoint_search(), "http://a/search");
        let p = SearxngSearchProvider::new(c, "http://a/search".to_string());
        assert_eq!(p.endpoint_search(), "http://a/search");
    }

    #[tokio::test]
    async fn google_provider_sends_key_cx_and_caps_results() {
        let app = Router::new().route(
            "/customsearch/v1",
            get(|q: Query<HashMap<String, String>>| async move {
                if q.get("key").map(String::as_str) != Some("k")
                    || q.get("cx").map(String::as_str) != Some("cx1")
                {
                    return (StatusCode::FORBIDDEN, Json(serde_json::json!({})));
                }
                let items: Vec<_> = (0..8)
                    .map(|i| {
                        serde_json::json!({
                            "title": format!("T{i}"),
                            "link": format!("https://e.com/{i}"),
                            "snippet": q.get("q").cloned().unwrap_or_default(),
                        })
                    })
                    .collect();
                (StatusCode::OK, Json(serde_json::json!({ "items": items })))
            }),
        );
        let addr = serve(app).await;

        let p = GoogleSearchProvider::new(reqwest::Client::new(), "k".into(), "cx1".into())
            .with_endpoint(format!("http://{addr}/customsearch/v1"));
        let r = p.search(&SearchQuery::new("rust lang")).await.unwrap();
        assert_eq!(p.name(), "google");
        assert_eq!(r.results.len(), DEFAULT_MAX_RESULTS);
        assert_eq!(r.results[0].url, "https://e.com/0");
        assert_eq!(r.results[0].snippet.as_deref(), Some("rust lang"));
    }

    #[tokio::test]
    async fn google_provider_surfaces_api_error_message() {
        let app = Router::new().route(
            "/",
            get(|| async {
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(serde_json::json!({"error": {"message": "Quota exceeded"}})),
                )
            }),
        );
        let addr = serve(app).await;

        let p = GoogleSearchProvider::new(reqwest::Client::new(), "k".into(), "cx".into())
            .with_endpoint(format!("http://{addr}/"));
        let err = p.search(&SearchQuery::new("x")).await.unwrap_err();
        match err {
            Error::Search(msg) => assert!(msg.contains("Quota exceeded"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn searxng_provider_maps_results() {
        let app = Router::new().route(
            "/search",
            get(|| async {
                Json(serde_json::json!({
                    "results": [
                        {"url": "https://example.com/a", "title": "A", "content": "alpha"},
                        {"title": "no url"}
                    ]
                }))
            }),
        );
        let addr = serve(app).await;

        let p = SearxngSearchProvider::new(reqwest::Client::new(), format!("http://{addr}"));
        let r = p.search(&SearchQuery::new("hello")).await.unwrap();
        assert_eq!(r.results.len(), 1);
        assert_eq!(r.results[0].title.as_deref(), Some("A"));
        assert_eq!(r.results[0].snippet.as_deref(), Some("alpha"));
    }
}
