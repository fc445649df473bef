//! Web research for a turn: query fan-out, page scraping, relevance filter, URL dedup.

use crate::extract;
use crate::similarity::names_similar;
use chatpipe_core::{
    Error, FetchBackend, FetchRequest, ResearchMode, ResearchResult, Result, SearchProvider,
    SearchQuery, SearchResult,
};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;

/// Platform-scoped query templates for person and social research, `{}` = quoted subject.
const PLATFORM_TEMPLATES: &[&str] = &[
    // professional network
    "{} site:linkedin.com",
    // microblogging
    "{} (site:twitter.com OR site:x.com)",
    "{} site:facebook.com",
    // image/video
    "{} site:instagram.com",
    "{} site:tiktok.com",
    "{} site:youtube.com",
    // publishing
    "{} site:medium.com",
    "{} site:substack.com",
    "{} (personal website OR blog)",
    // code hosting
    "{} site:github.com",
    "{} (news OR interview OR feature)",
];

pub fn platform_queries(subject: &str) -> Vec<String> {
    let quoted = format!("\"{subject}\"");
    PLATFORM_TEMPLATES
        .iter()
        .map(|t| t.replacen("{}", &quoted, 1))
        .collect()
}

/// True if a hit plausibly concerns `subject`: fuzzy title match or verbatim mention.
pub fn is_relevant(subject: &str, r: &ResearchResult) -> bool {
    if names_similar(subject, &r.title) {
        return true;
    }
    let hay = format!("{} {}", r.title, r.snippet).to_lowercase();
    hay.contains(&subject.to_lowercase())
}

/// Deduplicate by URL: a URL keeps the position of its first occurrence and the value of its
/// last one.
pub fn dedup_by_url(items: Vec<ResearchResult>) -> Vec<ResearchResult> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<ResearchResult> = Vec::with_capacity(items.len());
    for item in items {
        match index.get(&item.url) {
            Some(&i) => out[i] = item,
            None => {
                index.insert(item.url.clone(), out.len());
                out.push(item);
            }
        }
    }
    out
}

#[derive(Debug, Clone)]
struct ResearchOptions {
    max_results_per_query: usize,
    search_timeout_ms: u64,
    scrape_timeout_ms: u64,
    scrape_max_bytes: u64,
    max_page_chars: usize,
}

impl Default for ResearchOptions {
    fn default() -> Self {
        Self {
            max_results_per_query: crate::search::DEFAULT_MAX_RESULTS,
            search_timeout_ms: 20_000,
            scrape_timeout_ms: 10_000,
            scrape_max_bytes: 2_000_000,
            max_page_chars: extract::MAX_PAGE_TEXT_CHARS,
        }
    }
}

#[derive(Clone)]
pub struct Researcher {
    search: Arc<dyn SearchProvider>,
    fetch: Arc<dyn FetchBackend>,
    opts: ResearchOptions,
}

impl Researcher {
    pub fn new(search: Arc<dyn SearchProvider>, fetch: Arc<dyn FetchBackend>) -> Self {
        Self {
            search,
            fetch,
            opts: ResearchOptions::default(),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.search.name()
    }

    /// Fetch one page and reduce it to bounded visible text. Failures degrade to "".
    async fn scrape(&self, url: &str) -> String {
        let mut req = FetchRequest::new(url);
        req.timeout_ms = Some(self.opts.scrape_timeout_ms);
        req.max_bytes = Some(self.opts.scrape_max_bytes);
        match self.fetch.fetch(&req).await {
            Ok(resp) => {
                if resp.truncated {
                    tracing::debug!(%url, max_bytes = self.opts.scrape_max_bytes, "page body truncated");
                }
                extract::page_text(&resp, self.opts.max_page_chars)
            }
            Err(e) => {
                tracing::debug!(%url, error = %e, "scrape failed; using empty content");
                String::new()
            }
        }
    }

    async fn hydrate(&self, hit: SearchResult) -> ResearchResult {
        let scraped_content = self.scrape(&hit.url).await;
        ResearchResult {
            title: hit.title.unwrap_or_default(),
            snippet: hit.snippet.unwrap_or_default(),
            url: hit.url,
            scraped_content,
        }
    }

    /// One search plus concurrent scraping of every hit.
    pub async fn search_and_scrape(&self, query: &str) -> Result<Vec<ResearchResult>> {
        let q = SearchQuery {
            query: query.to_string(),
            max_results: Some(self.opts.max_results_per_query),
            timeout_ms: Some(self.opts.search_timeout_ms),
        };
        let resp = self.search.search(&q).await?;
        Ok(join_all(resp.results.into_iter().map(|hit| self.hydrate(hit))).await)
    }

    /// Run every query concurrently. Individual failures are logged and skipped; the batch
    /// fails only when no query succeeded.
    async fn fan_out(&self, queries: &[String]) -> Result<Vec<ResearchResult>> {
        let settled = join_all(queries.iter().map(|q| self.search_and_scrape(q))).await;
        let mut merged = Vec::new();
        let mut last_err = None;
        let mut ok = 0usize;
        for (q, r) in queries.iter().zip(settled) {
            match r {
                Ok(items) => {
                    ok += 1;
                    merged.extend(items);
                }
                Err(e) => {
                    tracing::warn!(query = %q, error = %e, "research query failed");
                    last_err = Some(e);
                }
            }
        }
        match (ok, last_err) {
            (0, Some(e)) => Err(e),
            _ => Ok(merged),
        }
    }

    fn filter_relevant(subject: &str, items: Vec<ResearchResult>) -> Vec<ResearchResult> {
        dedup_by_url(
            items
                .into_iter()
                .filter(|r| is_relevant(subject, r))
                .collect(),
        )
    }

    /// Research a classified turn.
    ///
    /// Errors: `Error::Search` when the transport is unusable, `Error::NoResults` when nothing
    /// relevant survived (including the single broad fallback query).
    pub async fn research(
        &self,
        mode: ResearchMode,
        subject: &str,
        cleaned_query: &str,
    ) -> Result<Vec<ResearchResult>> {
        let results = match mode {
            ResearchMode::None => return Ok(Vec::new()),
            ResearchMode::Generic => dedup_by_url(self.search_and_scrape(cleaned_query).await?),
            ResearchMode::PersonLookup | ResearchMode::SocialAnalysis => {
                let queries = platform_queries(subject);
                tracing::debug!(%subject, queries = queries.len(), "person research fan-out");
                let merged = self.fan_out(&queries).await?;
                let relevant = Self::filter_relevant(subject, merged);
                if relevant.is_empty() {
                    tracing::debug!(%subject, "no relevant hits; trying broad fallback query");
                    let broad = self.search_and_scrape(subject).await?;
                    Self::filter_relevant(subject, broad)
                } else {
                    relevant
                }
            }
        };

        if results.is_empty() {
            return Err(Error::NoResults);
        }
        tracing::debug!(results = results.len(), "research done");
        Ok(results)
    }
}
