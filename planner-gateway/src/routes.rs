//! Route definitions for the planner gateway.
//!
//! - `GET /health` liveness probe
//! - `GET /` chat page, issues the session cookie
//! - `POST /api/chat` one chat turn

use crate::composer::ResponseComposer;
use crate::session::SessionStore;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json},
    routing::{get, post},
    Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use planner_common::logging::generate_trace_id;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::Instrument;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "sp_session_id";

/// Session id used when a chat request carries no cookie.
pub const ANONYMOUS_SESSION: &str = "anon";

/// Session cookie lifetime.
pub const SESSION_COOKIE_MAX_AGE: time::Duration = time::Duration::days(30);

const INDEX_HTML: &str = include_str!("../assets/index.html");

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: SessionStore,
    pub composer: Arc<ResponseComposer>,
}

impl AppState {
    pub fn new(store: SessionStore, composer: ResponseComposer) -> Self {
        Self {
            store,
            composer: Arc::new(composer),
        }
    }
}

/// Chat request body.
#[derive(Debug, Default, Deserialize)]
pub struct ChatBody {
    #[serde(default)]
    pub message: Option<String>,
}

/// Chat response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Build the complete router.
pub fn build_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/chat", post(chat_handler))
        .with_state(state)
        .merge(health_routes())
}

/// Build health check routes.
pub fn health_routes() -> Router {
    Router::new().route("/health", get(health_handler))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
    })
}

/// Serve the chat page, issuing a session cookie on first visit.
async fn index_handler(jar: CookieJar) -> impl IntoResponse {
    let has_session = jar
        .get(SESSION_COOKIE)
        .is_some_and(|c| !c.value().is_empty());

    let jar = if has_session {
        jar
    } else {
        let session_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!(session_id = %session_id, "Issuing session cookie");
        jar.add(
            Cookie::build((SESSION_COOKIE, session_id))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax)
                .max_age(SESSION_COOKIE_MAX_AGE),
        )
    };

    (jar, Html(INDEX_HTML))
}

/// Run one chat turn: load history, compose a reply, save history.
async fn chat_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Json<ChatReply>, (StatusCode, Json<ErrorResponse>)> {
    // Unparsable bodies are treated like a missing message.
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let message = body.message.as_deref().map(str::trim).unwrap_or_default();

    if message.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "No message provided".into(),
            }),
        ));
    }
    let message = message.to_string();

    let session_id = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| ANONYMOUS_SESSION.to_string());

    let trace_id = generate_trace_id();
    let span = planner_common::request_span!("chat", trace_id, session_id = %session_id);

    async move {
        let history = state.store.load(&session_id).await;
        tracing::debug!(history_len = history.len(), "History loaded");

        let composed = state.composer.compose(&message, history).await;
        state.store.save(&session_id, composed.history).await;

        Ok(Json(ChatReply {
            response: composed.reply,
        }))
    }
    .instrument(span)
    .await
}
