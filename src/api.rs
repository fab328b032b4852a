use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    models::HealthResponse, normalize::normalize, store::StatsStore, tracker::SideEffect,
};

const DEFAULT_RECENT_LIMIT: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<StatsStore>,
    pub tx: broadcast::Sender<String>,
}

impl AppState {
    pub fn new(store: Arc<StatsStore>, tx: broadcast::Sender<String>) -> Self {
        Self { store, tx }
    }

    /// Push one frame to all WS clients as a `{type, payload}` envelope.
    pub fn broadcast<T: Serialize>(&self, channel: &str, payload: &T) {
        if let Ok(frame) = serde_json::to_string(&json!({ "type": channel, "payload": payload })) {
            // Ignore the error: it means no receivers are connected.
            let _ = self.tx.send(frame);
        }
    }
}

pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Ingest one hook event payload. The body is arbitrary JSON; anything
/// unrecognizable degrades to an Unknown event rather than an error.
pub async fn post_event(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    let mut event = normalize(payload);

    info!(
        kind = ?event.kind,
        session_id = event.session_id.as_deref().unwrap_or("-"),
        "Received hook event"
    );

    let effect = state.store.handle_event(&mut event).await;

    // The event carries its session summary by now if it closed a session.
    state.broadcast("rpg:event", &event);
    if effect != SideEffect::NoOp {
        let session = state.store.active_session().await;
        state.broadcast("rpg:session_update", &session);
    }

    Json(json!({ "received": true }))
}

pub async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.stats().await)
}

pub async fn get_active_session(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.active_session().await)
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

pub async fn get_recent_sessions(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    Json(state.store.recent_sessions(limit).await)
}

#[derive(Debug, Serialize)]
pub struct ToolRank {
    pub tool: String,
    pub count: u64,
}

/// Tool usage ranking, highest count first (ties broken by name so the
/// output is deterministic).
pub async fn get_tool_ranking(State(state): State<AppState>) -> impl IntoResponse {
    let mut ranking: Vec<ToolRank> = state
        .store
        .tool_ranking()
        .await
        .into_iter()
        .map(|(tool, count)| ToolRank { tool, count })
        .collect();
    ranking.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tool.cmp(&b.tool)));
    Json(ranking)
}
