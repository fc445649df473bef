use chatpipe_core::{Error, FetchBackend, FetchRequest, FetchResponse, Result};
use std::time::Duration;

pub mod cancel;
pub mod classify;
pub mod config;
pub mod conversation;
pub mod docsearch;
pub mod extract;
pub mod local_search;
pub mod openai_compat;
pub mod prompt;
pub mod research;
pub mod search;
pub mod similarity;
pub mod stream;

/// Read an env var, treating blank values as unset.
pub(crate) fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Shared HTTP client defaults for every outbound call (model server, search, scraping).
pub fn default_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent("chatpipe/0.1")
        .redirect(reqwest::redirect::Policy::limited(10))
        // Avoid "hang forever" on DNS/TLS stalls. No overall timeout here: model streams
        // are long-lived and bounded by cancellation instead.
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| Error::Fetch(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct LocalFetcher {
    client: reqwest::Client,
}

impl LocalFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl FetchBackend for LocalFetcher {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse> {
        let url = url::Url::parse(&req.url).map_err(|e| Error::InvalidUrl(e.to_string()))?;

        let mut rb = self.client.get(url);
        if let Some(to) = req.timeout() {
            rb = rb.timeout(to);
        }
        let resp = rb.send().await.map_err(|e| Error::Fetch(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Fetch(format!("HTTP {} for {}", status.as_u16(), resp.url())));
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let max_bytes = req.max_bytes.unwrap_or(u64::MAX) as usize;
        let mut truncated = false;
        let mut bytes = Vec::new();
        let mut stream = resp.bytes_stream();
        use futures_util::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Fetch(e.to_string()))?;
            if bytes.len().saturating_add(chunk.len()) > max_bytes {
                let can_take = max_bytes.saturating_sub(bytes.len());
                bytes.extend_from_slice(&chunk[..can_take]);
                truncated = true;
                break;
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(FetchResponse {
            url: req.url.clone(),
            content_type,
            bytes,
            truncated,
        })
    }
}
