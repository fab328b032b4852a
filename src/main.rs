mod api;
mod models;
mod normalize;
mod store;
mod tracker;
mod ws;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use api::AppState;
use store::StatsStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "claude_rpg=info,tower_http=info".into()),
        )
        .init();

    // Resolve the stats directory.
    let home = dirs::home_dir().context("could not determine home directory")?;
    let stats_dir = home.join(".claude");
    std::fs::create_dir_all(&stats_dir)
        .with_context(|| format!("failed to create {}", stats_dir.display()))?;

    let stats_path = stats_dir.join("rpg-stats.json");
    info!("Using stats file at {}", stats_path.display());

    let store = Arc::new(StatsStore::new(stats_path));
    store.load().await;

    let (tx, _rx) = broadcast::channel::<String>(100);
    let state = AppState::new(store.clone(), tx);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/api/events", post(api::post_event))
        .route("/api/stats", get(api::get_stats))
        .route("/api/stats/session", get(api::get_active_session))
        .route("/api/stats/sessions", get(api::get_recent_sessions))
        .route("/api/stats/ranking/tools", get(api::get_tool_ranking))
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3333")
        .await
        .context("failed to bind to port 3333")?;

    info!("Claude RPG server listening on http://0.0.0.0:3333");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Final flush so no tracked activity is lost on SIGINT/SIGTERM.
    store.shutdown().await;
    info!("Tracking data flushed, goodbye");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
