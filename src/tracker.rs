//! Session reconstruction and lifetime aggregates.
//!
//! One `Tracker` owns both the open-session map and the aggregate totals;
//! nothing else mutates them. `apply` is synchronous and is serialized by
//! the store's mutex, so there is exactly one event in flight at a time.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;

use crate::models::{
    AgentSpawn, EventKind, RpgEvent, Session, SessionStatus, SessionSummary, TrackingData,
};

const MAX_RECENT_SESSIONS: usize = 50;
const MAX_DAILY_ACTIVITY: usize = 30;

/// What one applied event did to the session view.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    SessionOpened,
    SessionUpdated,
    SessionClosed(SessionSummary),
    NoOp,
}

pub struct Tracker {
    data: TrackingData,
    active: HashMap<String, Session>,
    /// Most recently touched open session, tracked explicitly rather than
    /// inferred from map iteration order.
    last_touched: Option<String>,
    dirty: bool,
}

impl Tracker {
    pub fn new() -> Self {
        Tracker {
            data: TrackingData::empty(),
            active: HashMap::new(),
            last_touched: None,
            dirty: false,
        }
    }

    /// Replace the aggregate state with a freshly loaded document.
    pub fn restore(&mut self, data: TrackingData) {
        self.data = data;
    }

    /// Apply one canonical event. Sessions transition
    /// Absent → Active → Completed and never reverse; out-of-order or
    /// inconsistent events are benign no-ops.
    pub fn apply(&mut self, event: &mut RpgEvent) -> SideEffect {
        match event.kind {
            EventKind::PromptSubmit => self.start_session(event),
            // PreToolUse is not counted as a tool use; counting happens
            // once, on PostToolUse.
            EventKind::ToolPre => self.touch_session(event.session_id.as_deref()),
            EventKind::ToolPost | EventKind::ToolFailure => self.record_tool_use(event),
            EventKind::AgentSpawnStart => self.record_agent_spawn(event),
            EventKind::AgentSpawnStop => self.record_agent_stop(event),
            EventKind::Stop | EventKind::SessionEnd => self.end_session(event),
            EventKind::ChainTrigger => self.record_chain_trigger(event),
            _ => self.touch_session(event.session_id.as_deref()),
        }
    }

    fn start_session(&mut self, event: &RpgEvent) -> SideEffect {
        let Some(id) = event.session_id.clone() else {
            return SideEffect::NoOp;
        };

        if let Some(existing) = self.active.get_mut(&id) {
            // Same session re-prompted without a Stop in between: merge
            // into the open session instead of opening a second one.
            existing.prompt = event.prompt.clone();
            existing.event_count += 1;
            self.last_touched = Some(id);
            return SideEffect::SessionUpdated;
        }

        let session = Session {
            id: id.clone(),
            started_at: event.timestamp,
            ended_at: None,
            duration_ms: None,
            prompt: event.prompt.clone(),
            cwd: event.cwd.clone(),
            tool_usage: BTreeMap::new(),
            agent_spawns: Vec::new(),
            event_count: 1,
            status: SessionStatus::Active,
        };
        self.active.insert(id.clone(), session);
        self.last_touched = Some(id);
        SideEffect::SessionOpened
    }

    fn end_session(&mut self, event: &mut RpgEvent) -> SideEffect {
        let Some(id) = event.session_id.clone() else {
            return SideEffect::NoOp;
        };
        // Close-after-close and stop-for-unknown-id are idempotent no-ops.
        let Some(mut session) = self.active.remove(&id) else {
            return SideEffect::NoOp;
        };

        // Timestamps are caller-supplied; a skewed clock can make this
        // negative, which is tolerated on the session record.
        let duration_ms = (event.timestamp - session.started_at).num_milliseconds();
        session.ended_at = Some(event.timestamp);
        session.duration_ms = Some(duration_ms);
        session.status = SessionStatus::Completed;

        let summary = SessionSummary {
            tool_count: session.tool_count(),
            agent_count: session.agent_spawns.len() as u64,
            duration_ms,
        };
        event.session_summary = Some(summary.clone());

        self.data.total_sessions += 1;
        self.data.total_duration_ms += duration_ms.max(0);
        self.data.recent_sessions.insert(0, session);
        self.data.recent_sessions.truncate(MAX_RECENT_SESSIONS);
        self.bump_daily(today(), summary.tool_count);

        if self.last_touched.as_deref() == Some(id.as_str()) {
            self.last_touched = self
                .active
                .values()
                .max_by_key(|s| s.started_at)
                .map(|s| s.id.clone());
        }
        self.dirty = true;
        SideEffect::SessionClosed(summary)
    }

    fn record_tool_use(&mut self, event: &RpgEvent) -> SideEffect {
        let Some(tool) = event.tool.clone() else {
            return SideEffect::NoOp;
        };

        // Orphan tool events (no session id) still count toward lifetime
        // totals; only the per-session breakdown is skipped.
        *self.data.tool_ranking.entry(tool.clone()).or_insert(0) += 1;
        self.data.total_tool_uses += 1;
        self.dirty = true;

        let Some(session) = self.open_session_mut(event.session_id.as_deref()) else {
            return SideEffect::NoOp;
        };
        *session.tool_usage.entry(tool).or_insert(0) += 1;
        session.event_count += 1;
        self.last_touched = event.session_id.clone();
        SideEffect::SessionUpdated
    }

    fn record_agent_spawn(&mut self, event: &RpgEvent) -> SideEffect {
        let Some(agent_type) = event.agent_type.clone() else {
            return SideEffect::NoOp;
        };

        *self.data.agent_ranking.entry(agent_type.clone()).or_insert(0) += 1;
        self.data.total_agent_spawns += 1;
        self.dirty = true;

        let timestamp = event.timestamp;
        let agent_id = event
            .agent_id
            .clone()
            .unwrap_or_else(|| format!("agent-{}", timestamp.timestamp_millis()));
        let Some(session) = self.open_session_mut(event.session_id.as_deref()) else {
            return SideEffect::NoOp;
        };
        session.agent_spawns.push(AgentSpawn {
            agent_id,
            agent_type,
            started_at: timestamp,
            ended_at: None,
            duration_ms: None,
        });
        session.event_count += 1;
        self.last_touched = event.session_id.clone();
        SideEffect::SessionUpdated
    }

    fn record_agent_stop(&mut self, event: &RpgEvent) -> SideEffect {
        let (Some(session_id), Some(agent_id)) =
            (event.session_id.clone(), event.agent_id.clone())
        else {
            return SideEffect::NoOp;
        };
        let timestamp = event.timestamp;
        let Some(session) = self.active.get_mut(&session_id) else {
            return SideEffect::NoOp;
        };

        // Close the most recent still-open spawn with this agent id; an
        // unmatched stop leaves the spawn list untouched.
        if let Some(spawn) = session
            .agent_spawns
            .iter_mut()
            .rev()
            .find(|s| s.agent_id == agent_id && s.ended_at.is_none())
        {
            spawn.ended_at = Some(timestamp);
            spawn.duration_ms = Some((timestamp - spawn.started_at).num_milliseconds());
        }
        session.event_count += 1;
        self.last_touched = Some(session_id);
        SideEffect::SessionUpdated
    }

    fn record_chain_trigger(&mut self, event: &RpgEvent) -> SideEffect {
        let chain_id = event.chain_id.clone().unwrap_or_else(|| "unknown".to_string());
        *self.data.chain_triggers.entry(chain_id).or_insert(0) += 1;
        self.data.total_chain_triggers += 1;
        self.dirty = true;
        SideEffect::NoOp
    }

    fn touch_session(&mut self, session_id: Option<&str>) -> SideEffect {
        let Some(id) = session_id else {
            return SideEffect::NoOp;
        };
        let Some(session) = self.active.get_mut(id) else {
            return SideEffect::NoOp;
        };
        session.event_count += 1;
        self.last_touched = Some(id.to_string());
        SideEffect::SessionUpdated
    }

    fn open_session_mut(&mut self, session_id: Option<&str>) -> Option<&mut Session> {
        session_id.and_then(|id| self.active.get_mut(id))
    }

    fn bump_daily(&mut self, date: String, tool_count: u64) {
        match self.data.daily_activity.iter_mut().find(|d| d.date == date) {
            Some(entry) => {
                entry.sessions += 1;
                entry.tools += tool_count;
            }
            None => self.data.daily_activity.push(crate::models::DailyActivity {
                date,
                sessions: 1,
                tools: tool_count,
            }),
        }

        // Keep the 30 most recent recorded dates; date strings sort
        // chronologically.
        if self.data.daily_activity.len() > MAX_DAILY_ACTIVITY {
            self.data
                .daily_activity
                .sort_by(|a, b| b.date.cmp(&a.date));
            self.data.daily_activity.truncate(MAX_DAILY_ACTIVITY);
        }
    }

    // ── queries (all copy-out) ──────────────────────────────────────────

    pub fn active_session(&self) -> Option<Session> {
        self.last_touched
            .as_ref()
            .and_then(|id| self.active.get(id))
            .or_else(|| self.active.values().max_by_key(|s| s.started_at))
            .cloned()
    }

    pub fn stats(&self) -> TrackingData {
        self.data.clone()
    }

    pub fn recent_sessions(&self, limit: usize) -> Vec<Session> {
        self.data.recent_sessions.iter().take(limit).cloned().collect()
    }

    pub fn tool_ranking(&self) -> BTreeMap<String, u64> {
        self.data.tool_ranking.clone()
    }

    /// Snapshot the aggregate state for persistence and clear the dirty
    /// flag; `None` when nothing changed since the last snapshot.
    pub fn snapshot_if_dirty(&mut self) -> Option<TrackingData> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(self.data.clone())
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Tracker::new()
    }
}

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}
