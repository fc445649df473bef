//! Incremental decoding of an OpenAI-style `text/event-stream` chat completion.

use crate::cancel::TurnToken;
use chatpipe_core::{ChunkSink, Error, ResearchResult, Result, StreamChunk, TurnOutcome};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;

const DATA_PREFIX: &str = "data: ";
const DONE_PAYLOAD: &str = "[DONE]";

/// Splits raw body bytes into complete lines.
///
/// Bytes are buffered, not strings, so a multi-byte character split across two reads
/// is decoded only once both halves have arrived.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a read and drain every complete line. The trailing partial line stays buffered.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let Some(last_nl) = self.buf.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let rest = self.buf.split_off(last_nl + 1);
        let complete = std::mem::replace(&mut self.buf, rest);
        String::from_utf8_lossy(&complete)
            .split('\n')
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Whatever is left once the body has ended.
    pub fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.buf);
        String::from_utf8_lossy(&rest)
            .split('\n')
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Delta(String),
    Done,
    /// Comments, keep-alives, non-data fields and payloads that fail to parse.
    Ignored,
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

pub fn parse_line(line: &str) -> Frame {
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Frame::Ignored;
    };
    let payload = payload.trim();
    if payload == DONE_PAYLOAD {
        return Frame::Done;
    }
    match serde_json::from_str::<ChunkPayload>(payload) {
        Ok(p) => p
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta)
            .and_then(|d| d.content)
            .filter(|s| !s.is_empty())
            .map(Frame::Delta)
            .unwrap_or(Frame::Ignored),
        Err(e) => {
            tracing::debug!(error = %e, "skipping malformed stream frame");
            Frame::Ignored
        }
    }
}

/// Markdown "Sources" trailer appended after a research-backed answer.
pub fn sources_section(results: &[ResearchResult]) -> String {
    let mut out = String::from("\n\n## Sources\n");
    for r in results {
        out.push_str(&format!("- [{}]({})\n", r.title, r.url));
    }
    out
}

fn progress(sink: &mut dyn ChunkSink, content: &str) {
    sink.emit(StreamChunk {
        content: content.to_string(),
        done: false,
    });
}

fn aborted(sink: &mut dyn ChunkSink, content: String) -> TurnOutcome {
    tracing::debug!(chars = content.len(), "turn aborted");
    sink.emit(StreamChunk {
        content: content.clone(),
        done: true,
    });
    TurnOutcome::Aborted { content }
}

/// Drive a streaming response body to completion, abort, or failure.
///
/// Every frame that adds text emits the accumulated content. On completion the sources
/// trailer (when `sources` is non-empty) is appended, then exactly one `done` chunk follows.
/// On abort a single `done` chunk with the content so far is emitted and nothing after it.
/// The body is dropped on every exit path.
pub async fn consume_stream<S, B, E>(
    mut body: S,
    sources: &[ResearchResult],
    token: &TurnToken,
    sink: &mut dyn ChunkSink,
) -> Result<TurnOutcome>
where
    S: Stream<Item = std::result::Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut decoder = SseDecoder::new();
    let mut content = String::new();

    loop {
        if token.is_aborted() {
            return Ok(aborted(sink, content));
        }
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(aborted(sink, content)),
            n = body.next() => n,
        };
        let bytes = match next {
            None => break,
            Some(Ok(b)) => b,
            Some(Err(e)) => return Err(Error::Stream(e.to_string())),
        };
        for line in decoder.push(bytes.as_ref()) {
            if token.is_aborted() {
                return Ok(aborted(sink, content));
            }
            match parse_line(&line) {
                Frame::Delta(d) => {
                    content.push_str(&d);
                    progress(sink, &content);
                }
                // Anything after the terminator in the same read is dropped.
                Frame::Done => break,
                Frame::Ignored => {}
            }
        }
    }
    drop(body);

    for line in decoder.finish() {
        if let Frame::Delta(d) = parse_line(&line) {
            content.push_str(&d);
            progress(sink, &content);
        }
    }

    if !token.complete() && token.is_aborted() {
        return Ok(aborted(sink, content));
    }

    if !sources.is_empty() {
        content.push_str(&sources_section(sources));
        progress(sink, &content);
    }
    sink.emit(StreamChunk {
        content: content.clone(),
        done: true,
    });
    Ok(TurnOutcome::Completed { content })
}
