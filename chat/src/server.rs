use async_stream::stream;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{
        Html, IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use argus_types::ChatMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::llm::ChatBackend;
use crate::session::{SessionError, SessionStore, SharedSession};
use crate::turn::{TurnEvent, TurnOutcome, TurnRunner};

const EVENT_BUFFER: usize = 64;

pub struct AppState<B> {
    pub sessions: SessionStore,
    pub runner: TurnRunner<B>,
}

impl<B> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            sessions: self.sessions.clone(),
            runner: self.runner.clone(),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    UnknownSession(Uuid),
    Session(SessionError),
    Cleared,
    TurnAborted(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::UnknownSession(id) => (StatusCode::NOT_FOUND, format!("error: unknown session {id}")),
            ApiError::Session(e) => (StatusCode::CONFLICT, format!("error: {e}")),
            ApiError::Cleared => (
                StatusCode::CONFLICT,
                "error: conversation was cleared before the reply arrived".to_string(),
            ),
            ApiError::TurnAborted(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("error: chat turn aborted: {e}"),
            ),
        };
        (status, body).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        ApiError::Session(e)
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionCreated {
    pub id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptResponse {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub awaiting_reply: bool,
    pub messages: Vec<ChatMessage>,
}

pub fn router<B: ChatBackend>(state: AppState<B>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(|| async { "ok" }))
        .route("/api/sessions", post(create_session::<B>))
        .route(
            "/api/sessions/:id/messages",
            get(get_messages::<B>).post(post_message::<B>),
        )
        .route("/api/sessions/:id/stream", post(stream_message::<B>))
        .route("/api/sessions/:id/clear", post(clear_session::<B>))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn index() -> Html<&'static str> {
    Html(include_str!("index.html"))
}

async fn lookup<B>(state: &AppState<B>, id: Uuid) -> ApiResult<SharedSession> {
    state
        .sessions
        .get(id)
        .await
        .ok_or(ApiError::UnknownSession(id))
}

async fn create_session<B: ChatBackend>(State(state): State<AppState<B>>) -> Json<SessionCreated> {
    let (id, _) = state.sessions.create().await;
    let live = state.sessions.len().await;
    tracing::info!(session = %id, live, "session created");
    Json(SessionCreated { id })
}

async fn get_messages<B: ChatBackend>(
    State(state): State<AppState<B>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TranscriptResponse>> {
    let session = lookup(&state, id).await?;
    let guard = session.lock().await;
    Ok(Json(TranscriptResponse {
        id,
        created_at: guard.created_at(),
        awaiting_reply: guard.awaiting_reply(),
        messages: guard.messages().to_vec(),
    }))
}

async fn post_message<B: ChatBackend>(
    State(state): State<AppState<B>>,
    Path(id): Path<Uuid>,
    Json(body): Json<MessageBody>,
) -> ApiResult<Response> {
    let session = lookup(&state, id).await?;
    let Some(turn) = state.runner.begin(&session, &body.content).await? else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    // Settled on its own task: a client hanging up must not strand the
    // session in the awaiting state.
    let runner = state.runner.clone();
    let settled = tokio::spawn(async move { runner.finish(&session, turn).await });
    match settled.await {
        Ok(TurnOutcome::Completed(reply)) => Ok(Json(reply).into_response()),
        Ok(TurnOutcome::Discarded) => Err(ApiError::Cleared),
        Err(e) => Err(ApiError::TurnAborted(e.to_string())),
    }
}

/// Server-sent events: `user`, then `fragment` with the running text, then `done`.
async fn stream_message<B: ChatBackend>(
    State(state): State<AppState<B>>,
    Path(id): Path<Uuid>,
    Json(body): Json<MessageBody>,
) -> ApiResult<Response> {
    let session = lookup(&state, id).await?;
    let Some(turn) = state.runner.begin(&session, &body.content).await? else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };
    let user = turn.user.clone();

    let (tx, mut rx) = mpsc::channel::<TurnEvent>(EVENT_BUFFER);
    let runner = state.runner.clone();
    // The turn runs on its own so a client going away still settles it.
    tokio::spawn(async move {
        let outcome = runner.finish_streamed(&session, turn, tx).await;
        if outcome == TurnOutcome::Discarded {
            tracing::info!(session = %id, "streamed reply discarded after clear");
        }
    });

    let events = stream! {
        yield Event::default().event("user").json_data(&user);
        while let Some(event) = rx.recv().await {
            match event {
                TurnEvent::Partial(text) => {
                    yield Event::default().event("fragment").json_data(serde_json::json!({ "text": text }));
                }
                TurnEvent::Done(msg) => {
                    yield Event::default().event("done").json_data(&msg);
                }
            }
        }
    };
    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}

async fn clear_session<B: ChatBackend>(
    State(state): State<AppState<B>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let session = lookup(&state, id).await?;
    session.lock().await.clear();
    tracing::info!(session = %id, "transcript cleared");
    Ok(StatusCode::NO_CONTENT)
}
