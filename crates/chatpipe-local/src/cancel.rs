//! Per-turn cancellation.

use chatpipe_core::{ChunkSink, StreamChunk};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Active,
    Aborted,
    Completed,
}

const ACTIVE: u8 = 0;
const ABORTED: u8 = 1;
const COMPLETED: u8 = 2;

/// Cancellation handle for one turn. Clones share state.
///
/// The first transition out of `Active` wins: aborting a completed turn is a no-op and vice versa.
#[derive(Debug, Clone)]
pub struct TurnToken {
    cancel: CancellationToken,
    state: Arc<AtomicU8>,
}

impl Default for TurnToken {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnToken {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            state: Arc::new(AtomicU8::new(ACTIVE)),
        }
    }

    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(ACTIVE, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Request cancellation. Returns false if the turn had already ended.
    pub fn abort(&self) -> bool {
        if self.transition(ABORTED) {
            self.cancel.cancel();
            true
        } else {
            false
        }
    }

    pub fn complete(&self) -> bool {
        self.transition(COMPLETED)
    }

    pub fn state(&self) -> TurnState {
        match self.state.load(Ordering::Acquire) {
            ACTIVE => TurnState::Active,
            ABORTED => TurnState::Aborted,
            _ => TurnState::Completed,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.state() == TurnState::Aborted
    }

    /// Resolves once `abort` has been called.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// Keeps at most one active turn per conversation.
#[derive(Debug, Default)]
pub struct TurnController {
    active: Mutex<Option<TurnToken>>,
}

impl TurnController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new turn, aborting whichever turn was still running.
    pub fn begin(&self) -> TurnToken {
        let token = TurnToken::new();
        let prev = self.lock().replace(token.clone());
        if let Some(prev) = prev {
            if prev.abort() {
                tracing::debug!("aborted previous in-flight turn");
            }
        }
        token
    }

    /// Abort the in-flight turn, if any. Returns whether something was aborted.
    pub fn abort_active(&self) -> bool {
        self.lock().as_ref().is_some_and(TurnToken::abort)
    }

    /// Release `token` if it is still the active one.
    pub fn finish(&self, token: &TurnToken) {
        let mut guard = self.lock();
        if guard
            .as_ref()
            .is_some_and(|t| Arc::ptr_eq(&t.state, &token.state))
        {
            *guard = None;
        }
    }

    pub fn has_active(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|t| t.state() == TurnState::Active)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<TurnToken>> {
        // A poisoned slot still holds a valid token.
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Forwards chunks into a tokio channel; a dropped receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink(pub tokio::sync::mpsc::UnboundedSender<StreamChunk>);

impl ChunkSink for ChannelSink {
    fn emit(&mut self, chunk: StreamChunk) {
        let _ = self.0.send(chunk);
    }
}
