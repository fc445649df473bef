//! One chat conversation: classify, research, compose, stream.

use crate::cancel::{TurnController, TurnToken};
use crate::classify::classify;
use crate::openai_compat::ModelClient;
use crate::prompt::compose;
use crate::research::Researcher;
use chatpipe_core::{
    ChatTurn, ChunkSink, Error, ResearchResult, Result, StreamChunk, TurnOutcome,
};
use std::sync::{Mutex, MutexGuard};

/// Conversation state shared between the turn driver and whoever may abort it.
///
/// `submit` takes `&self` so an `Arc<Conversation>` can be aborted from another task
/// (a Ctrl-C handler, a newer turn) while a turn is streaming.
pub struct Conversation {
    model: ModelClient,
    researcher: Option<Researcher>,
    controller: TurnController,
    turns: Mutex<Vec<ChatTurn>>,
}

/// Mirrors every chunk into the assistant turn before forwarding it.
struct TurnSink<'a> {
    turns: &'a Mutex<Vec<ChatTurn>>,
    idx: usize,
    inner: &'a mut dyn ChunkSink,
}

impl ChunkSink for TurnSink<'_> {
    fn emit(&mut self, chunk: StreamChunk) {
        if let Some(turn) = lock(self.turns).get_mut(self.idx) {
            turn.content.clone_from(&chunk.content);
            turn.is_streaming = !chunk.done;
        }
        self.inner.emit(chunk);
    }
}

fn lock(turns: &Mutex<Vec<ChatTurn>>) -> MutexGuard<'_, Vec<ChatTurn>> {
    turns.lock().unwrap_or_else(|e| e.into_inner())
}

impl Conversation {
    pub fn new(model: ModelClient, researcher: Option<Researcher>) -> Self {
        Self {
            model,
            researcher,
            controller: TurnController::new(),
            turns: Mutex::new(Vec::new()),
        }
    }

    pub fn turns(&self) -> Vec<ChatTurn> {
        lock(&self.turns).clone()
    }

    pub fn clear(&self) {
        self.controller.abort_active();
        lock(&self.turns).clear();
    }

    /// Abort the in-flight turn, if any.
    pub fn abort(&self) -> bool {
        self.controller.abort_active()
    }

    pub fn is_busy(&self) -> bool {
        self.controller.has_active()
    }

    /// Run one user turn to completion, abort, or failure.
    ///
    /// Starting a turn aborts any turn still in flight. On failure the assistant turn keeps
    /// whatever streamed before the error, or the matching apology when nothing did, and one
    /// terminal chunk carrying that text is emitted before the error is returned.
    pub async fn submit(
        &self,
        text: &str,
        model_id: &str,
        sink: &mut dyn ChunkSink,
    ) -> Result<TurnOutcome> {
        let token = self.controller.begin();
        let idx = {
            let mut turns = lock(&self.turns);
            turns.push(ChatTurn::user(text));
            turns.push(ChatTurn::assistant_placeholder(model_id));
            turns.len() - 1
        };
        let mut turn_sink = TurnSink {
            turns: &self.turns,
            idx,
            inner: sink,
        };

        let result = self.run_turn(text, model_id, &token, &mut turn_sink).await;
        self.controller.finish(&token);

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let partial = lock(&self.turns)
                    .get(idx)
                    .map(|t| t.content.clone())
                    .unwrap_or_default();
                let content = if partial.is_empty() {
                    e.apology().to_string()
                } else {
                    partial
                };
                tracing::warn!(error = %e, "turn failed");
                turn_sink.emit(StreamChunk {
                    content,
                    done: true,
                });
                Err(e)
            }
        }
    }

    async fn run_turn(
        &self,
        text: &str,
        model_id: &str,
        token: &TurnToken,
        sink: &mut dyn ChunkSink,
    ) -> Result<TurnOutcome> {
        let classification = classify(text);
        tracing::debug!(mode = ?classification.mode, "classified turn");

        let mut sources: Vec<ResearchResult> = Vec::new();
        if classification.mode.is_research() {
            let researcher = self.researcher.as_ref().ok_or_else(|| {
                Error::Search("no web search provider configured".to_string())
            })?;
            let subject = classification
                .subject
                .as_deref()
                .unwrap_or(&classification.cleaned_query);
            let research =
                researcher.research(classification.mode, subject, &classification.cleaned_query);
            sources = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    sink.emit(StreamChunk { content: String::new(), done: true });
                    return Ok(TurnOutcome::Aborted { content: String::new() });
                }
                r = research => r?,
            };
        }

        let prompt = compose(&classification, &sources);
        self.model
            .stream_chat(model_id, &prompt, &sources, token, sink)
            .await
    }
}
