use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical event kind. Serialized with the hook event names the
/// assistant emits so the frontend sees familiar strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "PreToolUse")]
    ToolPre,
    #[serde(rename = "PostToolUse")]
    ToolPost,
    #[serde(rename = "PostToolUseFailure")]
    ToolFailure,
    #[serde(rename = "UserPromptSubmit")]
    PromptSubmit,
    Stop,
    #[serde(rename = "SubagentStart")]
    AgentSpawnStart,
    #[serde(rename = "SubagentStop")]
    AgentSpawnStop,
    Notification,
    SessionStart,
    SessionEnd,
    ChainTrigger,
    Unknown,
}

/// Summary attached to the event that closed a session, for broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub tool_count: u64,
    pub agent_count: u64,
    pub duration_ms: i64,
}

/// One normalized lifecycle occurrence, independent of wire shape.
///
/// Produced once by the normalizer; the tracker only ever adds the
/// `session_summary` when the event closes a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpgEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub rpg_message: String,
    pub rpg_icon: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_input_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_summary: Option<SessionSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
}

/// One agent spawn within a session, closed by a matching SubagentStop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpawn {
    pub agent_id: String,
    pub agent_type: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

/// One bounded unit of assistant activity, from first prompt to Stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default)]
    pub tool_usage: BTreeMap<String, u64>,
    #[serde(default)]
    pub agent_spawns: Vec<AgentSpawn>,
    pub event_count: u64,
    pub status: SessionStatus,
}

impl Session {
    /// Total tool invocations recorded in this session.
    pub fn tool_count(&self) -> u64 {
        self.tool_usage.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyActivity {
    pub date: String,
    pub sessions: u64,
    pub tools: u64,
}

fn schema_version() -> u32 {
    1
}

/// Lifetime aggregate state, persisted as `~/.claude/rpg-stats.json`.
///
/// Every field is serde-defaulted so the unversioned legacy document
/// (and partially written older shapes) still loads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingData {
    #[serde(default = "schema_version")]
    pub version: u32,
    #[serde(default)]
    pub total_sessions: u64,
    #[serde(default)]
    pub total_tool_uses: u64,
    #[serde(default)]
    pub total_agent_spawns: u64,
    #[serde(default)]
    pub total_duration_ms: i64,
    #[serde(default)]
    pub total_chain_triggers: u64,
    #[serde(default)]
    pub tool_ranking: BTreeMap<String, u64>,
    #[serde(default)]
    pub agent_ranking: BTreeMap<String, u64>,
    #[serde(default)]
    pub chain_triggers: BTreeMap<String, u64>,
    #[serde(default)]
    pub daily_activity: Vec<DailyActivity>,
    #[serde(default)]
    pub recent_sessions: Vec<Session>,
}

impl TrackingData {
    pub fn empty() -> Self {
        TrackingData {
            version: schema_version(),
            ..TrackingData::default()
        }
    }
}

/// Rich incoming payload: the structured shape the assistant's hooks POST,
/// identified by the `hook_event_name` field.
#[derive(Debug, Deserialize)]
pub struct RichPayload {
    pub hook_event_name: String,
    pub timestamp: Option<String>,
    pub session_id: Option<String>,
    pub cwd: Option<String>,
    pub tool_name: Option<String>,
    pub tool_input: Option<serde_json::Value>,
    pub prompt: Option<String>,
    pub error: Option<String>,
    pub agent_type: Option<String>,
    pub agent_id: Option<String>,
    pub chain_id: Option<String>,
    pub chain_name: Option<String>,
    pub message: Option<String>,
}

/// Legacy flat payload: a short type tag plus flat tool/agent fields,
/// still emitted by older hook scripts.
#[derive(Debug, Deserialize)]
pub struct LegacyPayload {
    #[serde(rename = "type")]
    pub tag: String,
    pub timestamp: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    pub tool: Option<String>,
    #[serde(rename = "agentType")]
    pub agent_type: Option<String>,
    #[serde(rename = "agentId")]
    pub agent_id: Option<String>,
    pub prompt: Option<String>,
    pub cwd: Option<String>,
}

/// The two wire shapes the ingestion endpoint accepts. Untagged: the rich
/// variant wins when `hook_event_name` is present, the legacy variant when
/// only the short `type` tag is.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum IncomingPayload {
    Rich(RichPayload),
    Legacy(LegacyPayload),
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}
