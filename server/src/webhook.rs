//! Trigger Ingest: a small Axum HTTP surface that turns an external webhook POST into
//! a synthetic inbound message on the shared `Bridge`, the same one the Telegram
//! dispatcher feeds. Grounded on the teacher's `web_server.rs` Axum `Router`/`State`
//! shape, trimmed down to the one route this system needs.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use common::bridge::Bridge;
use common::im::telegram::TelegramTransport;
use common::log::prefix;

/// POST /trigger body: who to reply to and what prompt to run, as if it had arrived
/// over the IM channel directly.
#[derive(serde::Deserialize)]
struct TriggerBody {
    channel_id: String,
    chat_id: String,
    #[serde(default)]
    owner_id: Option<String>,
    text: String,
}

#[derive(Clone)]
struct WebhookState {
    bridge: Arc<Bridge<TelegramTransport>>,
}

async fn trigger_handler(
    State(state): State<WebhookState>,
    Json(body): Json<TriggerBody>,
) -> Result<StatusCode, (StatusCode, String)> {
    if body.text.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "text must not be empty".into()));
    }
    let owner_id = body.owner_id.unwrap_or_else(|| body.chat_id.clone());
    eprintln!(
        "{} channel_id={} event=trigger_received",
        prefix("webhook"),
        body.channel_id
    );
    state
        .bridge
        .handle_message(body.channel_id, body.chat_id, owner_id, body.text)
        .await;
    Ok(StatusCode::ACCEPTED)
}

/// Run the Trigger Ingest webhook server. Binds to `bind_addr` (127.0.0.1 by default —
/// see `Config::webhook_bind`) and never returns under normal operation.
pub async fn run_webhook_server(
    bind_addr: SocketAddr,
    bridge: Arc<Bridge<TelegramTransport>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = WebhookState { bridge };
    let app = Router::new()
        .route("/trigger", post(trigger_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    eprintln!("{} event=listening addr={}", prefix("webhook"), bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
