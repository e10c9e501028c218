//! HTTP Surface
//!
//! Two endpoints face the outside world: the webhook the proof provider
//! calls back with a submitted proof, and a health probe. Everything else
//! the process does flows through the chat transport.

use crate::chat::{ChatId, ChatTransport, UserId};
use crate::router::{EventRouter, ProofOutcome};
use crate::session::SessionStore;
use crate::verify::{ProfileLookup, ProofProtocol};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Shared state behind the HTTP handlers
pub struct AppState<T: ChatTransport, P: ProofProtocol, L: ProfileLookup> {
    pub router: Arc<EventRouter<T, P, L>>,
    pub store: Arc<SessionStore>,
}

/// Query parameters the proof provider echoes back on its callback
#[derive(Debug, Deserialize)]
pub struct ProofCallbackParams {
    pub user_id: i64,
    pub chat_id: i64,
    /// Token minted into the callback URL when the request was built;
    /// compared against the session's issued token before any processing
    #[serde(default)]
    pub token: Option<String>,
}

/// POST /receive-proofs - proof webhook callback
pub async fn receive_proofs_handler<T, P, L>(
    State(state): State<Arc<AppState<T, P, L>>>,
    Query(params): Query<ProofCallbackParams>,
    body: String,
) -> (StatusCode, Json<Value>)
where
    T: ChatTransport,
    P: ProofProtocol,
    L: ProfileLookup,
{
    debug!(
        user_id = params.user_id,
        token = ?params.token,
        bytes = body.len(),
        "proof callback received"
    );
    let outcome = state
        .router
        .handle_proof(
            UserId(params.user_id),
            ChatId(params.chat_id),
            params.token.as_deref(),
            &body,
        )
        .await;

    let (status, label) = match outcome {
        ProofOutcome::Verified => (StatusCode::OK, "verified"),
        ProofOutcome::Rejected => (StatusCode::OK, "rejected"),
        ProofOutcome::NoSession => (StatusCode::NOT_FOUND, "no-session"),
        ProofOutcome::Malformed => (StatusCode::BAD_REQUEST, "malformed"),
    };
    (status, Json(json!({ "status": label })))
}

/// GET /health - liveness probe with a live-session gauge
pub async fn health_handler<T, P, L>(State(state): State<Arc<AppState<T, P, L>>>) -> Json<Value>
where
    T: ChatTransport,
    P: ProofProtocol,
    L: ProfileLookup,
{
    let live_sessions = state.store.live_count().await;
    Json(json!({ "status": "ok", "live_sessions": live_sessions }))
}

/// Build the webhook router over shared state
pub fn webhook_routes<T, P, L>(state: Arc<AppState<T, P, L>>) -> Router
where
    T: ChatTransport,
    P: ProofProtocol,
    L: ProfileLookup,
{
    Router::new()
        .route("/receive-proofs", post(receive_proofs_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Bind and serve the webhook surface until the task is aborted
pub async fn serve<T, P, L>(bind_addr: &str, state: Arc<AppState<T, P, L>>) -> std::io::Result<()>
where
    T: ChatTransport,
    P: ProofProtocol,
    L: ProfileLookup,
{
    let app = webhook_routes(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %listener.local_addr()?, "webhook listener up");
    axum::serve(listener, app).await
}
