use crate::cancel::TurnToken;
use crate::prompt::ComposedPrompt;
use crate::stream::consume_stream;
use chatpipe_core::{ChunkSink, Error, ResearchResult, Result, StreamChunk, TurnOutcome};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:1234";

const PROBE_TIMEOUT: Duration = Duration::from_secs(15);
const LIST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sampling parameters sent with every chat turn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    pub temperature: f64,
    pub max_tokens: u64,
    pub top_p: f64,
    pub presence_penalty: f64,
    pub frequency_penalty: f64,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 2000,
            top_p: 1.0,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub owned_by: String,
}

/// Client for a local OpenAI-compatible model server (LM Studio and friends).
#[derive(Debug, Clone)]
pub struct ModelClient {
    client: reqwest::Client,
    base_url: String,
    sampling: Sampling,
}

impl ModelClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            sampling: Sampling::default(),
        }
    }

    pub fn with_sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.base_url.trim_end_matches('/'))
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let resp = self
            .client
            .get(self.endpoint("models"))
            .timeout(LIST_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::Stream(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Stream(format!("models HTTP {status}")));
        }
        let parsed: ModelList = resp
            .json()
            .await
            .map_err(|e| Error::Stream(e.to_string()))?;
        Ok(parsed.data)
    }

    /// True iff the server accepts a one-token completion for `model`.
    pub async fn probe(&self, model: &str) -> bool {
        let req = ChatCompletionsRequest {
            model: model.to_string(),
            messages: vec![Message::new("user", "test")],
            stream: false,
            temperature: None,
            max_tokens: Some(1),
            top_p: None,
            presence_penalty: None,
            frequency_penalty: None,
        };
        match self
            .client
            .post(self.endpoint("chat/completions"))
            .timeout(PROBE_TIMEOUT)
            .json(&req)
            .send()
            .await
        {
            Ok(resp) => {
                tracing::debug!(model, status = %resp.status(), "model probe");
                resp.status().is_success()
            }
            Err(e) => {
                tracing::debug!(model, error = %e, "model probe failed");
                false
            }
        }
    }

    /// Stream one completion into `sink`.
    ///
    /// The request is raced against `token`; an abort before the first byte ends the turn
    /// with an empty terminal chunk.
    pub async fn stream_chat(
        &self,
        model: &str,
        prompt: &ComposedPrompt,
        sources: &[ResearchResult],
        token: &TurnToken,
        sink: &mut dyn ChunkSink,
    ) -> Result<TurnOutcome> {
        let s = self.sampling;
        let req = ChatCompletionsRequest {
            model: model.to_string(),
            messages: vec![
                Message::new("system", &prompt.system),
                Message::new("user", &prompt.user),
            ],
            stream: true,
            temperature: Some(s.temperature),
            max_tokens: Some(s.max_tokens),
            top_p: Some(s.top_p),
            presence_penalty: Some(s.presence_penalty),
            frequency_penalty: Some(s.frequency_penalty),
        };

        let send = self
            .client
            .post(self.endpoint("chat/completions"))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&req)
            .send();
        let resp = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(aborted_empty(sink)),
            r = send => r.map_err(|e| Error::Stream(e.to_string()))?,
        };
        let status = resp.status();
        if !status.is_success() {
            let body = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(aborted_empty(sink)),
                b = resp.text() => b.unwrap_or_default(),
            };
            let detail = body.trim();
            return Err(Error::Stream(if detail.is_empty() {
                format!("HTTP {status}")
            } else {
                format!("HTTP {status}: {}", crate::extract::truncate_chars(detail, 300))
            }));
        }
        tracing::debug!(model, "model stream opened");

        consume_stream(resp.bytes_stream(), sources, token, sink).await
    }
}

fn aborted_empty(sink: &mut dyn ChunkSink) -> TurnOutcome {
    sink.emit(StreamChunk {
        content: String::new(),
        done: true,
    });
    TurnOutcome::Aborted {
        content: String::new(),
    }
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelInfo>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

impl Message {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, response::IntoResponse, routing::get, routing::post, Json, Router};
    use std::net::SocketAddr;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn prompt() -> ComposedPrompt {
        ComposedPrompt {
            system: "sys".to_string(),
            user: "hi".to_string(),
        }
    }

    #[tokio::test]
    async fn streams_completion_with_sampling_parameters() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<serde_json::Value>| async move {
                if body["stream"] != true
                    || body["temperature"] != 0.3
                    || body["max_tokens"] != 2000
                    || body["messages"][0]["role"] != "system"
                    || body["messages"][1]["content"] != "hi"
                {
                    return (StatusCode::BAD_REQUEST, String::new()).into_response();
                }
                let sse = concat!(
                    "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
                    "data: [DONE]\n\n",
                );
                ([(axum::http::header::CONTENT_TYPE, "text/event-stream")], sse).into_response()
            }),
        );
        let addr = serve(app).await;

        let m = ModelClient::new(reqwest::Client::new(), format!("http://{addr}"));
        let token = TurnToken::new();
        let mut seen = Vec::new();
        let out = m
            .stream_chat("m1", &prompt(), &[], &token, &mut |c: StreamChunk| seen.push(c))
            .await
            .unwrap();
        assert_eq!(out, TurnOutcome::Completed { content: "Hello".to_string() });
        assert!(seen.last().unwrap().done);
    }

    #[tokio::test]
    async fn sampling_overrides_reach_the_request() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<serde_json::Value>| async move {
                if body["max_tokens"] != 64 || body["temperature"] != 0.9 {
                    return (StatusCode::BAD_REQUEST, "wrong sampling").into_response();
                }
                "data: [DONE]\n\n".into_response()
            }),
        );
        let addr = serve(app).await;

        let sampling = Sampling {
            temperature: 0.9,
            max_tokens: 64,
            ..Sampling::default()
        };
        let m = ModelClient::new(reqwest::Client::new(), format!("http://{addr}")).with_sampling(sampling);
        let out = m
            .stream_chat("m1", &prompt(), &[], &TurnToken::new(), &mut |_c: StreamChunk| {})
            .await
            .unwrap();
        assert_eq!(out, TurnOutcome::Completed { content: String::new() });
    }

    #[tokio::test]
    async fn non_success_status_is_a_stream_error() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "model not loaded") }),
        );
        let addr = serve(app).await;

        let m = ModelClient::new(reqwest::Client::new(), format!("http://{addr}/"));
        let err = m
            .stream_chat("m1", &prompt(), &[], &TurnToken::new(), &mut |_c: StreamChunk| {})
            .await
            .unwrap_err();
        match err {
            Error::Stream(msg) => {
                assert!(msg.contains("500"), "{msg}");
                assert!(msg.contains("model not loaded"), "{msg}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn abort_before_response_ends_turn_empty() {
        let m = ModelClient::new(reqwest::Client::new(), "http://127.0.0.1:9");
        let token = TurnToken::new();
        token.abort();
        let mut seen = Vec::new();
        let out = m
            .stream_chat("m1", &prompt(), &[], &token, &mut |c: StreamChunk| seen.push(c))
            .await
            .unwrap();
        assert!(out.is_aborted());
        assert_eq!(seen, vec![StreamChunk { content: String::new(), done: true }]);
    }

    #[tokio::test]
    async fn abort_while_reading_error_body_ends_turn_empty() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                let never = futures_util::stream::pending::<std::result::Result<Vec<u8>, std::io::Error>>();
                (StatusCode::INTERNAL_SERVER_ERROR, axum::body::Body::from_stream(never))
            }),
        );
        let addr = serve(app).await;

        let m = ModelClient::new(reqwest::Client::new(), format!("http://{addr}"));
        let token = TurnToken::new();
        let aborter = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            aborter.abort();
        });
        let mut seen = Vec::new();
        let out = tokio::time::timeout(
            std::time::Duration::from_secs(3),
            m.stream_chat("m1", &prompt(), &[], &token, &mut |c: StreamChunk| seen.push(c)),
        )
        .await
        .expect("abort must interrupt the error body read")
        .unwrap();
        assert_eq!(out, TurnOutcome::Aborted { content: String::new() });
        assert_eq!(seen, vec![StreamChunk { content: String::new(), done: true }]);
    }

    #[tokio::test]
    async fn lists_models_and_probes() {
        let app = Router::new()
            .route(
                "/v1/models",
                get(|| async {
                    Json(serde_json::json!({
                        "data": [{"id": "qwen2.5-7b", "object": "model", "owned_by": "organization_owner"}]
                    }))
                }),
            )
            .route(
                "/v1/chat/completions",
                post(|Json(body): Json<serde_json::Value>| async move {
                    if body["model"] == "qwen2.5-7b" && body["max_tokens"] == 1 && body["stream"] == false {
                        StatusCode::OK
                    } else {
                        StatusCode::NOT_FOUND
                    }
                }),
            );
        let addr = serve(app).await;

        let m = ModelClient::new(reqwest::Client::new(), format!("http://{addr}"));
        let models = m.list_models().await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "qwen2.5-7b");
        assert!(m.probe("qwen2.5-7b").await);
        assert!(!m.probe("missing").await);

        let dead = ModelClient::new(reqwest::Client::new(), "http://127.0.0.1:9");
        assert!(!dead.probe("qwen2.5-7b").await);
    }
}
