use argus_types::ChatMessage;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::llm::ApiMessage;

pub type TurnId = u64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("a reply is still being generated for this conversation")]
    TurnInProgress,
    #[error("no turn is waiting for this reply")]
    NoPendingTurn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    AwaitingReply(TurnId),
}

/// Transcript of one chat session.
///
/// Transitions: `submit_user` (Idle → AwaitingReply), `complete`
/// (AwaitingReply → Idle) and `clear` (any → Idle, empty transcript).
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    messages: Vec<ChatMessage>,
    phase: Phase,
    last_turn: TurnId,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            messages: Vec::new(),
            phase: Phase::Idle,
            last_turn: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn awaiting_reply(&self) -> bool {
        matches!(self.phase, Phase::AwaitingReply(_))
    }

    /// Records the user's literal text and opens a turn. Blank input is a no-op.
    pub fn submit_user(&mut self, text: &str) -> Result<Option<TurnId>, SessionError> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        if self.awaiting_reply() {
            return Err(SessionError::TurnInProgress);
        }
        self.last_turn += 1;
        self.messages.push(ChatMessage::user(text));
        self.phase = Phase::AwaitingReply(self.last_turn);
        Ok(Some(self.last_turn))
    }

    /// Appends the reply for `turn`. Replies for turns wiped by `clear` are rejected.
    pub fn complete(
        &mut self,
        turn: TurnId,
        content: impl Into<String>,
    ) -> Result<&ChatMessage, SessionError> {
        if self.phase != Phase::AwaitingReply(turn) {
            return Err(SessionError::NoPendingTurn);
        }
        self.messages.push(ChatMessage::assistant(content));
        self.phase = Phase::Idle;
        Ok(&self.messages[self.messages.len() - 1])
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.phase = Phase::Idle;
    }

    /// Prior conversation to send ahead of the grounded prompt. The pending
    /// user message is left out; the prompt replaces it.
    pub fn history_for_api(&self) -> Vec<ApiMessage> {
        let prior = match self.phase {
            Phase::AwaitingReply(_) => &self.messages[..self.messages.len().saturating_sub(1)],
            Phase::Idle => &self.messages[..],
        };
        prior.iter().map(ApiMessage::from).collect()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedSession = Arc<Mutex<Session>>;

pub const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_MAX_SESSIONS: usize = 256;

struct Entry {
    session: SharedSession,
    last_seen: Instant,
}

/// Live sessions keyed by id. Sessions idle past `idle_ttl` expire, and the
/// least recently used one is evicted when `max_sessions` is reached.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, Entry>>>,
    idle_ttl: Duration,
    max_sessions: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_IDLE, DEFAULT_MAX_SESSIONS)
    }
}

impl SessionStore {
    pub fn new(idle_ttl: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            idle_ttl,
            max_sessions: max_sessions.max(1),
        }
    }

    pub async fn create(&self) -> (Uuid, SharedSession) {
        let session = Session::new();
        let id = session.id();
        let shared = Arc::new(Mutex::new(session));

        let mut sessions = self.sessions.write().await;
        let now = Instant::now();
        expire(&mut sessions, now, self.idle_ttl);
        while sessions.len() >= self.max_sessions {
            let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, e)| e.last_seen)
                .map(|(id, _)| *id)
            else {
                break;
            };
            sessions.remove(&oldest);
            tracing::info!(session = %oldest, "session evicted; store full");
        }
        sessions.insert(
            id,
            Entry {
                session: shared.clone(),
                last_seen: now,
            },
        );
        (id, shared)
    }

    /// Looks a session up and marks it as used.
    pub async fn get(&self, id: Uuid) -> Option<SharedSession> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(&id)?;
        entry.last_seen = Instant::now();
        Some(entry.session.clone())
    }

    /// Drops sessions idle past the ttl. Returns how many went.
    pub async fn sweep(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        expire(&mut sessions, Instant::now(), self.idle_ttl)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn expire(sessions: &mut HashMap<Uuid, Entry>, now: Instant, idle_ttl: Duration) -> usize {
    let before = sessions.len();
    sessions.retain(|_, e| now.duration_since(e.last_seen) < idle_ttl);
    let expired = before - sessions.len();
    if expired > 0 {
        tracing::info!(expired, live = sessions.len(), "expired idle sessions");
    }
    expired
}
