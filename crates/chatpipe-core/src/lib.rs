use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shown when the research phase fails for any reason other than "nothing found".
pub const WEB_SEARCH_APOLOGY: &str =
    "Sorry, there was an error performing the web search. Please try again.";
/// Shown when the model request fails before any content arrived.
pub const MODEL_APOLOGY: &str = "Sorry, an error occurred while processing your message.";
pub const NO_RESULTS_MESSAGE: &str =
    "I couldn't find any search results for your query. Please try a different search term.";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("no search results")]
    NoResults,
    #[error("model stream failed: {0}")]
    Stream(String),
    #[error("local search failed: {0}")]
    LocalSearch(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

impl Error {
    /// True for failures that belong to the research phase of a turn.
    pub fn is_research(&self) -> bool {
        matches!(self, Error::Search(_) | Error::NoResults | Error::Fetch(_))
    }

    /// Single user-facing line for a failed turn.
    pub fn user_message(&self) -> String {
        match self {
            Error::NoResults => NO_RESULTS_MESSAGE.to_string(),
            Error::Search(e) | Error::Fetch(e) => {
                format!("Sorry, I encountered an error while searching: {e}. Please try again later.")
            }
            Error::Stream(e) => format!("Model request failed: {e}"),
            other => other.to_string(),
        }
    }

    /// Content an empty assistant turn is finalized with after this error.
    pub fn apology(&self) -> &'static str {
        match self {
            Error::NoResults => NO_RESULTS_MESSAGE,
            e if e.is_research() => WEB_SEARCH_APOLOGY,
            _ => MODEL_APOLOGY,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// Conversation

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    pub is_streaming: bool,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            model_id: None,
            is_streaming: false,
        }
    }

    /// Empty assistant placeholder that streamed content is written into.
    pub fn assistant_placeholder(model_id: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            model_id: Some(model_id.into()),
            is_streaming: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResearchMode {
    None,
    Generic,
    PersonLookup,
    SocialAnalysis,
}

impl ResearchMode {
    pub fn is_research(self) -> bool {
        !matches!(self, ResearchMode::None)
    }

    /// Person and social modes fan out over platform-scoped queries.
    pub fn is_subject_scoped(self) -> bool {
        matches!(self, ResearchMode::PersonLookup | ResearchMode::SocialAnalysis)
    }
}

/// Output of the query classifier for one turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Classification {
    pub mode: ResearchMode,
    /// Raw text for `ResearchMode::None`, otherwise the text with the trigger removed.
    pub cleaned_query: String,
    pub subject: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Best-effort visible page text; empty when the page could not be fetched.
    pub scraped_content: String,
}

// ---------------------------------------------------------------------------
// Streaming notifications

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamChunk {
    /// Full accumulated content so far (not a delta).
    pub content: String,
    pub done: bool,
}

/// Receiver of incremental turn output.
pub trait ChunkSink: Send {
    fn emit(&mut self, chunk: StreamChunk);
}

impl<F> ChunkSink for F
where
    F: FnMut(StreamChunk) + Send,
{
    fn emit(&mut self, chunk: StreamChunk) {
        self(chunk)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnOutcome {
    Completed { content: String },
    Aborted { content: String },
}

impl TurnOutcome {
    pub fn content(&self) -> &str {
        match self {
            TurnOutcome::Completed { content } | TurnOutcome::Aborted { content } => content,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, TurnOutcome::Aborted { .. })
    }
}

// ---------------------------------------------------------------------------
// Fetch

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    /// Timeout for the operation (network + processing).
    pub timeout_ms: Option<u64>,
    /// Hard cap on bytes read from the response body.
    pub max_bytes: Option<u64>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_ms: None,
            max_bytes: None,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResponse {
    pub url: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    /// The body hit `max_bytes` and was cut short.
    pub truncated: bool,
}

impl FetchResponse {
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).to_string()
    }
}

#[async_trait::async_trait]
pub trait FetchBackend: Send + Sync {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse>;
}

// ---------------------------------------------------------------------------
// Search

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub max_results: Option<usize>,
    pub timeout_ms: Option<u64>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_results: None,
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
}

#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse>;
}

// ---------------------------------------------------------------------------
// Local document search (HTTP contract shared by client and server)

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DocSearchRequest {
    pub query: String,
    pub search_paths: Vec<String>,
    pub file_types: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MatchType {
    #[serde(rename = "filename and content")]
    FilenameAndContent,
    #[serde(rename = "filename only")]
    FilenameOnly,
    #[serde(rename = "content only")]
    ContentOnly,
}

impl MatchType {
    pub fn from_flags(filename: bool, content: bool) -> Option<Self> {
        match (filename, content) {
            (true, true) => Some(MatchType::FilenameAndContent),
            (true, false) => Some(MatchType::FilenameOnly),
            (false, true) => Some(MatchType::ContentOnly),
            (false, false) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocSearchHit {
    pub file_path: String,
    pub file_name: String,
    /// Lowercased extension including the dot, or "" when the file has none.
    pub file_type: String,
    pub snippet: String,
    /// RFC 3339 modification time.
    pub last_modified: String,
    pub relevance_score: f64,
    pub match_type: MatchType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocSearchResponse {
    pub results: Vec<DocSearchHit>,
    /// Roots that passed validation.
    pub search_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidatePathRequest {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidatePathResponse {
    pub is_valid: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_type_serializes_to_wire_labels() {
        let v = serde_json::to_value(MatchType::FilenameAndContent).unwrap();
        assert_eq!(v, serde_json::json!("filename and content"));
        let v = serde_json::to_value(MatchType::ContentOnly).unwrap();
        assert_eq!(v, serde_json::json!("content only"));
        assert_eq!(MatchType::from_flags(false, false), None);
    }

    #[test]
    fn doc_search_request_uses_camel_case() {
        let js = r#"{"query":"q","searchPaths":["/tmp"],"fileTypes":[".txt",""]}"#;
        let req: DocSearchRequest = serde_json::from_str(js).unwrap();
        assert_eq!(req.search_paths, vec!["/tmp".to_string()]);
        assert_eq!(req.file_types, vec![".txt".to_string(), String::new()]);
    }

    #[test]
    fn apology_distinguishes_research_from_model_failures() {
        assert_eq!(Error::Search("down".into()).apology(), WEB_SEARCH_APOLOGY);
        assert_eq!(Error::Stream("HTTP 500".into()).apology(), MODEL_APOLOGY);
        assert_eq!(Error::NoResults.apology(), NO_RESULTS_MESSAGE);
    }

    #[test]
    fn closures_are_chunk_sinks() {
        let mut seen = Vec::new();
        {
            let mut sink = |c: StreamChunk| seen.push(c.content);
            sink.emit(StreamChunk {
                content: "a".to_string(),
                done: false,
            });
        }
        assert_eq!(seen, vec!["a".to_string()]);
    }
}
