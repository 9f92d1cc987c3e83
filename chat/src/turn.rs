use argus_types::{ChatMessage, Role};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

use crate::grounding::{build_prompt, read_grounding};
use crate::llm::{ApiMessage, ChatBackend};
use crate::session::{Session, SessionError, TurnId};

/// Prefix of the assistant message shown when the model cannot be reached.
pub const REPLY_ERROR_PREFIX: &str = "Error communicating with the chat model";

const FRAGMENT_BUFFER: usize = 64;

/// A user message accepted into the transcript, waiting for its reply.
#[derive(Debug)]
pub struct PendingTurn {
    pub id: TurnId,
    pub user: ChatMessage,
    history: Vec<ApiMessage>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// Reply text received so far.
    Partial(String),
    Done(ChatMessage),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed(ChatMessage),
    /// The conversation was cleared while the reply was in flight.
    Discarded,
}

/// Runs chat turns against one backend, grounded in one detection log.
pub struct TurnRunner<B> {
    backend: Arc<B>,
    log_path: PathBuf,
    with_history: bool,
}

impl<B> Clone for TurnRunner<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            log_path: self.log_path.clone(),
            with_history: self.with_history,
        }
    }
}

impl<B: ChatBackend> TurnRunner<B> {
    pub fn new(backend: B, log_path: PathBuf, with_history: bool) -> Self {
        Self {
            backend: Arc::new(backend),
            log_path,
            with_history,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Records the user message. `None` for blank input.
    pub async fn begin(
        &self,
        session: &Mutex<Session>,
        user_text: &str,
    ) -> Result<Option<PendingTurn>, SessionError> {
        let mut guard = session.lock().await;
        let Some(id) = guard.submit_user(user_text)? else {
            return Ok(None);
        };
        let user = guard.messages()[guard.messages().len() - 1].clone();
        let history = if self.with_history {
            guard.history_for_api()
        } else {
            Vec::new()
        };
        Ok(Some(PendingTurn { id, user, history }))
    }

    /// Buffered reply. Always ends the turn with exactly one assistant message
    /// unless the conversation was cleared meanwhile.
    pub async fn finish(&self, session: &Mutex<Session>, turn: PendingTurn) -> TurnOutcome {
        let id = turn.id;
        let messages = self.grounded_messages(turn).await;
        let reply = match self.backend.complete(messages).await {
            Ok(text) => text,
            Err(e) => error_reply(&e),
        };
        settle(session, id, reply).await
    }

    /// Streamed reply. `events` sees the running text after every fragment
    /// and then the final message. Dropping the receiver cancels the request.
    pub async fn finish_streamed(
        &self,
        session: &Mutex<Session>,
        turn: PendingTurn,
        events: mpsc::Sender<TurnEvent>,
    ) -> TurnOutcome {
        let id = turn.id;
        let messages = self.grounded_messages(turn).await;
        let (frag_tx, mut frag_rx) = mpsc::channel::<String>(FRAGMENT_BUFFER);

        let request = self.backend.complete_stream(messages, frag_tx);
        let relay = async {
            let mut text = String::new();
            while let Some(fragment) = frag_rx.recv().await {
                text.push_str(&fragment);
                if events.send(TurnEvent::Partial(text.clone())).await.is_err() {
                    // Closing our end makes the backend's next send fail.
                    frag_rx.close();
                    return (text, true);
                }
            }
            (text, false)
        };
        let cancelled = || error_reply(&anyhow::anyhow!("reply cancelled before completion"));

        // A listener that goes away drops the request right away, even before
        // the first fragment.
        let reply = tokio::select! {
            (result, (text, dropped)) = async { tokio::join!(request, relay) } => match result {
                _ if dropped => cancelled(),
                Ok(()) => text,
                Err(e) => error_reply(&e),
            },
            _ = events.closed() => cancelled(),
        };
        let outcome = settle(session, id, reply).await;
        if let TurnOutcome::Completed(msg) = &outcome {
            let _ = events.send(TurnEvent::Done(msg.clone())).await;
        }
        outcome
    }

    /// Buffered turn from start to finish. `Ok(None)` for blank input.
    pub async fn handle(
        &self,
        session: &Mutex<Session>,
        user_text: &str,
    ) -> Result<Option<TurnOutcome>, SessionError> {
        let Some(turn) = self.begin(session, user_text).await? else {
            return Ok(None);
        };
        Ok(Some(self.finish(session, turn).await))
    }

    async fn grounded_messages(&self, turn: PendingTurn) -> Vec<ApiMessage> {
        let context = read_grounding(&self.log_path).await;
        let prompt = build_prompt(&context, &turn.user.content);
        tracing::debug!(
            turn = turn.id,
            grounded = context.is_present(),
            prompt_len = prompt.len(),
            history = turn.history.len(),
            "built grounding prompt"
        );
        let mut messages = turn.history;
        messages.push(ApiMessage {
            role: Role::User,
            content: prompt,
        });
        messages
    }
}

fn error_reply(err: &anyhow::Error) -> String {
    tracing::warn!(err = ?err, "chat completion failed");
    format!("{REPLY_ERROR_PREFIX}: {err:#}")
}

async fn settle(session: &Mutex<Session>, id: TurnId, reply: String) -> TurnOutcome {
    let mut guard = session.lock().await;
    match guard.complete(id, reply) {
        Ok(msg) => TurnOutcome::Completed(msg.clone()),
        Err(_) => {
            tracing::info!(turn = id, "conversation cleared; discarding reply");
            TurnOutcome::Discarded
        }
    }
}
