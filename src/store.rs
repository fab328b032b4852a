//! Durable store for the aggregate state.
//!
//! Owns the tracker behind a mutex (one event in flight at a time) and a
//! debounced, single-flight persistence timer. Writes go through a temp
//! file + atomic rename so a crash mid-write leaves the previous document
//! intact. Persistence failures are logged and swallowed; the in-memory
//! state stays authoritative.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::models::{RpgEvent, Session, TrackingData};
use crate::tracker::{SideEffect, Tracker};

const PERSIST_DEBOUNCE: Duration = Duration::from_secs(5);

pub struct StatsStore {
    path: PathBuf,
    tracker: Mutex<Tracker>,
    /// At most one pending flush timer; mutations during the window do not
    /// re-arm it.
    flush_timer: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl StatsStore {
    pub fn new(path: PathBuf) -> Self {
        StatsStore {
            path,
            tracker: Mutex::new(Tracker::new()),
            flush_timer: std::sync::Mutex::new(None),
        }
    }

    /// Read the persisted document. A missing or corrupt file starts an
    /// empty aggregate state; load never fails.
    pub async fn load(&self) {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => match serde_json::from_str::<TrackingData>(&raw) {
                Ok(data) => {
                    info!(
                        sessions = data.total_sessions,
                        tool_uses = data.total_tool_uses,
                        "Loaded tracking data from {}",
                        self.path.display()
                    );
                    self.tracker.lock().await.restore(data);
                }
                Err(e) => warn!("Corrupt stats file, starting fresh: {e}"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No tracking data found, starting fresh");
            }
            Err(e) => warn!("Failed to read stats file, starting fresh: {e}"),
        }
    }

    /// Ingest one canonical event: apply it under the lock, then schedule
    /// a debounced flush. The event gets its session summary attached when
    /// it closed a session.
    pub async fn handle_event(self: &Arc<Self>, event: &mut RpgEvent) -> SideEffect {
        let effect = self.tracker.lock().await.apply(event);
        self.schedule_persist();
        effect
    }

    fn schedule_persist(self: &Arc<Self>) {
        let mut slot = self.flush_timer.lock().unwrap();
        if slot.is_some() {
            return;
        }
        let store = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(PERSIST_DEBOUNCE).await;
            // Release the slot before writing so mutations arriving during
            // the write can arm the next timer.
            store.flush_timer.lock().unwrap().take();
            store.flush().await;
        }));
    }

    /// Write the aggregate state if dirty.
    pub async fn flush(&self) {
        let snapshot = self.tracker.lock().await.snapshot_if_dirty();
        let Some(data) = snapshot else { return };
        if let Err(e) = write_atomic(&self.path, &data).await {
            warn!("Failed to persist tracking data: {e:#}");
        }
    }

    /// Cancel any pending timer and do one final flush.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.flush_timer.lock().unwrap().take() {
            handle.abort();
        }
        self.flush().await;
    }

    // ── read-only snapshots for the query surface ───────────────────────

    pub async fn stats(&self) -> TrackingData {
        self.tracker.lock().await.stats()
    }

    pub async fn active_session(&self) -> Option<Session> {
        self.tracker.lock().await.active_session()
    }

    pub async fn recent_sessions(&self, limit: usize) -> Vec<Session> {
        self.tracker.lock().await.recent_sessions(limit)
    }

    pub async fn tool_ranking(&self) -> BTreeMap<String, u64> {
        self.tracker.lock().await.tool_ranking()
    }
}

async fn write_atomic(path: &Path, data: &TrackingData) -> Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let parent = path
            .parent()
            .context("stats path has no parent directory")?;
        let mut tmp = NamedTempFile::new_in(parent)
            .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&path)
            .map_err(|e| e.error)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    })
    .await
    .context("persist task panicked")?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use serde_json::json;
    use tempfile::tempdir;

    fn store_at(dir: &Path) -> Arc<StatsStore> {
        Arc::new(StatsStore::new(dir.join("rpg-stats.json")))
    }

    async fn ingest(store: &Arc<StatsStore>, payload: serde_json::Value) -> RpgEvent {
        let mut event = normalize(payload);
        store.handle_event(&mut event).await;
        event
    }

    async fn run_one_session(store: &Arc<StatsStore>, id: &str) {
        ingest(
            store,
            json!({ "hook_event_name": "UserPromptSubmit", "session_id": id, "prompt": "go" }),
        )
        .await;
        ingest(
            store,
            json!({ "hook_event_name": "PostToolUse", "session_id": id, "tool_name": "Edit" }),
        )
        .await;
        ingest(store, json!({ "hook_event_name": "Stop", "session_id": id })).await;
    }

    #[tokio::test]
    async fn round_trip_reproduces_equal_state() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        run_one_session(&store, "S1").await;
        let before = store.stats().await;
        store.shutdown().await;

        let reloaded = store_at(dir.path());
        reloaded.load().await;
        assert_eq!(reloaded.stats().await, before);
    }

    #[tokio::test]
    async fn missing_file_loads_empty_state() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        store.load().await;
        assert_eq!(store.stats().await, TrackingData::empty());
    }

    #[tokio::test]
    async fn corrupt_file_loads_empty_state() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("rpg-stats.json"), "{not json").unwrap();
        let store = store_at(dir.path());
        store.load().await;
        assert_eq!(store.stats().await, TrackingData::empty());
    }

    #[tokio::test]
    async fn legacy_unversioned_document_loads() {
        let dir = tempdir().unwrap();
        let legacy = json!({
            "totalSessions": 7,
            "totalToolUses": 42,
            "totalAgentSpawns": 3,
            "totalDurationMs": 90000,
            "totalChainTriggers": 1,
            "toolRanking": { "Edit": 30, "Read": 12 },
            "agentRanking": { "explorer": 3 },
            "chainTriggers": { "c1": 1 },
            "dailyActivity": [{ "date": "2026-02-10", "sessions": 2, "tools": 9 }],
            "recentSessions": [],
        });
        std::fs::write(
            dir.path().join("rpg-stats.json"),
            serde_json::to_string_pretty(&legacy).unwrap(),
        )
        .unwrap();

        let store = store_at(dir.path());
        store.load().await;
        let stats = store.stats().await;
        assert_eq!(stats.total_sessions, 7);
        assert_eq!(stats.total_tool_uses, 42);
        assert_eq!(stats.tool_ranking.get("Edit"), Some(&30));
        assert_eq!(stats.version, 1);
    }

    #[tokio::test]
    async fn writes_are_deferred_until_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rpg-stats.json");
        let store = store_at(dir.path());
        run_one_session(&store, "S1").await;

        // Nothing on disk yet: persistence is debounced, not synchronous.
        assert!(!path.exists());

        store.shutdown().await;
        assert!(path.exists());
        let written: TrackingData =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.total_sessions, 1);
    }

    #[tokio::test]
    async fn flush_without_mutations_writes_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rpg-stats.json");
        let store = store_at(dir.path());
        store.flush().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn shutdown_after_shutdown_is_harmless() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        run_one_session(&store, "S1").await;
        store.shutdown().await;
        store.shutdown().await;
    }

    #[tokio::test]
    async fn persisted_document_is_pretty_printed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rpg-stats.json");
        let store = store_at(dir.path());
        run_one_session(&store, "S1").await;
        store.shutdown().await;

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\n  \"totalSessions\": 1"));
    }
}
