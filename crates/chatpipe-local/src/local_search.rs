//! Client for the local document search service.

use crate::config::SearchConfig;
use chatpipe_core::{
    DocSearchHit, DocSearchRequest, DocSearchResponse, Error, Result, ValidatePathRequest,
    ValidatePathResponse,
};
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct LocalSearchClient {
    client: reqwest::Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

impl LocalSearchClient {
    pub fn new(client: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.api_base.trim_end_matches('/'))
    }

    async fn post_validate(&self, path: &str) -> Result<reqwest::Response> {
        self.client
            .post(self.endpoint("validate-path"))
            .timeout(REQUEST_TIMEOUT)
            .json(&ValidatePathRequest {
                path: path.to_string(),
            })
            .send()
            .await
            .map_err(|e| Error::LocalSearch(e.to_string()))
    }

    /// True when the service answers a trivial validation request.
    pub async fn is_running(&self) -> bool {
        matches!(self.post_validate(".").await, Ok(r) if r.status().is_success())
    }

    async fn ensure_running(&self) -> Result<()> {
        if self.is_running().await {
            Ok(())
        } else {
            Err(Error::LocalSearch(format!(
                "search server is not running at {} (start it with `chatpipe docs-serve`)",
                self.api_base
            )))
        }
    }

    async fn error_detail(resp: reqwest::Response, fallback: &str) -> String {
        let status = resp.status();
        let body = resp.json::<ErrorBody>().await.ok();
        let msg = body
            .and_then(|b| b.message.or(b.error))
            .unwrap_or_else(|| fallback.to_string());
        format!("{msg} (HTTP {status})")
    }

    pub async fn validate_path(&self, path: &str) -> Result<bool> {
        self.ensure_running().await?;
        let resp = self.post_validate(path).await?;
        if !resp.status().is_success() {
            return Err(Error::LocalSearch(
                Self::error_detail(resp, "failed to validate path").await,
            ));
        }
        let parsed: ValidatePathResponse = resp
            .json()
            .await
            .map_err(|e| Error::LocalSearch(e.to_string()))?;
        Ok(parsed.is_valid)
    }

    pub async fn search(&self, query: &str, cfg: &SearchConfig) -> Result<Vec<DocSearchHit>> {
        if cfg.search_paths.is_empty() {
            return Err(Error::LocalSearch(
                "no search paths configured (add one with `chatpipe config add-path`)".to_string(),
            ));
        }
        if cfg.file_types.is_empty() {
            return Err(Error::LocalSearch("no file types selected".to_string()));
        }
        self.ensure_running().await?;

        let req = DocSearchRequest {
            query: query.to_string(),
            search_paths: cfg.search_paths.clone(),
            file_types: cfg.file_types.clone(),
        };
        let resp = self
            .client
            .post(self.endpoint("search"))
            .timeout(REQUEST_TIMEOUT)
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::LocalSearch(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Error::LocalSearch(
                Self::error_detail(resp, "failed to search documents").await,
            ));
        }
        let parsed: DocSearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::LocalSearch(format!("invalid response from server: {e}")))?;
        tracing::debug!(hits = parsed.results.len(), roots = ?parsed.search_paths, "local search");
        Ok(parsed.results)
    }
}
