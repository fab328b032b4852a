//! Maps the two incoming wire shapes onto one canonical [`RpgEvent`].
//!
//! Normalization is total: anything the tagged-union decode rejects becomes
//! an `Unknown` event instead of an error, so the ingestion path never
//! bounces a payload back at the hook scripts.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{EventKind, IncomingPayload, LegacyPayload, RichPayload, RpgEvent};

pub const MAX_PROMPT_LEN: usize = 100;
const MAX_COMMAND_LEN: usize = 40;
const MAX_PATTERN_LEN: usize = 30;

/// Cut `s` down to `max` characters. Longer strings keep `max - 3`
/// characters and an `...` marker, so the result is exactly `max` long.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// Normalize one untyped payload into a canonical event. Never fails.
pub fn normalize(payload: Value) -> RpgEvent {
    match serde_json::from_value::<IncomingPayload>(payload) {
        Ok(IncomingPayload::Rich(rich)) => normalize_rich(rich),
        Ok(IncomingPayload::Legacy(legacy)) => normalize_legacy(legacy),
        Err(_) => {
            let mut ev = blank_event(EventKind::Unknown, Utc::now());
            ev.rpg_message = "Unknown event: unrecognized payload".to_string();
            ev.rpg_icon = "question".to_string();
            ev
        }
    }
}

fn normalize_rich(rich: RichPayload) -> RpgEvent {
    let kind = match rich.hook_event_name.as_str() {
        "PreToolUse" => EventKind::ToolPre,
        "PostToolUse" => EventKind::ToolPost,
        "PostToolUseFailure" => EventKind::ToolFailure,
        "UserPromptSubmit" => EventKind::PromptSubmit,
        "Stop" => EventKind::Stop,
        "SubagentStart" => EventKind::AgentSpawnStart,
        "SubagentStop" => EventKind::AgentSpawnStop,
        "Notification" => EventKind::Notification,
        "SessionStart" => EventKind::SessionStart,
        "SessionEnd" => EventKind::SessionEnd,
        "ChainTrigger" => EventKind::ChainTrigger,
        _ => EventKind::Unknown,
    };

    let mut ev = blank_event(kind, parse_timestamp(rich.timestamp.as_deref()));
    ev.session_id = rich.session_id;
    ev.cwd = rich.cwd;
    ev.tool_input_summary = rich
        .tool_name
        .as_deref()
        .zip(rich.tool_input.as_ref())
        .and_then(|(tool, input)| summarize_tool_input(tool, input));
    ev.tool = rich.tool_name;
    ev.agent_type = rich.agent_type;
    ev.agent_id = rich.agent_id;
    ev.prompt = rich.prompt.as_deref().map(|p| truncate(p, MAX_PROMPT_LEN));
    ev.error = rich.error;
    ev.chain_id = rich.chain_id;
    ev.chain_name = rich.chain_name;

    let (message, icon) = presentation(&ev, &rich.hook_event_name, rich.message.as_deref());
    ev.rpg_message = message;
    ev.rpg_icon = icon;
    ev
}

fn normalize_legacy(legacy: LegacyPayload) -> RpgEvent {
    let kind = match legacy.tag.as_str() {
        "pre_tool" => EventKind::ToolPre,
        "post_tool" => EventKind::ToolPost,
        "stop" => EventKind::Stop,
        "user_prompt" => EventKind::PromptSubmit,
        "subagent_start" => EventKind::AgentSpawnStart,
        "subagent_end" => EventKind::AgentSpawnStop,
        _ => EventKind::Unknown,
    };

    let mut ev = blank_event(kind, parse_timestamp(legacy.timestamp.as_deref()));
    ev.session_id = legacy.session_id;
    ev.cwd = legacy.cwd;
    ev.tool = legacy.tool;
    ev.agent_type = legacy.agent_type;
    ev.agent_id = legacy.agent_id;
    ev.prompt = legacy
        .prompt
        .as_deref()
        .map(|p| truncate(p, MAX_PROMPT_LEN));

    let (message, icon) = presentation(&ev, &legacy.tag, None);
    ev.rpg_message = message;
    ev.rpg_icon = icon;
    ev
}

fn blank_event(kind: EventKind, timestamp: DateTime<Utc>) -> RpgEvent {
    RpgEvent {
        id: Uuid::new_v4(),
        timestamp,
        kind,
        rpg_message: String::new(),
        rpg_icon: String::new(),
        tool: None,
        tool_input_summary: None,
        agent_type: None,
        agent_id: None,
        session_id: None,
        cwd: None,
        prompt: None,
        error: None,
        chain_id: None,
        chain_name: None,
        session_summary: None,
    }
}

fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

/// Presentation metadata per event kind: a battle-log message and an icon
/// tag. Downstream accounting never reads these.
fn presentation(ev: &RpgEvent, raw_name: &str, notification: Option<&str>) -> (String, String) {
    let tool = ev.tool.as_deref().unwrap_or("Unknown");
    let agent = ev.agent_type.as_deref().unwrap_or("Unknown");

    let (message, icon) = match ev.kind {
        EventKind::ToolPre => (format!("Enchant [PreToolUse] cast! {tool}"), "shield"),
        EventKind::ToolPost => (format!("[{tool}] skill landed!"), "sword"),
        EventKind::ToolFailure => (format!("[{tool}] skill failed!"), "break"),
        EventKind::PromptSubmit => ("The adventurer's command arrives!".to_string(), "lightning"),
        EventKind::Stop => ("Battle over! XP gained".to_string(), "skull"),
        EventKind::AgentSpawnStart => (format!("Summon [{agent}] called forth!"), "summon"),
        EventKind::AgentSpawnStop => {
            (format!("Summon [{agent}] mission complete"), "vanish")
        }
        EventKind::Notification => (
            notification
                .map(|m| m.to_string())
                .unwrap_or_else(|| "A notification arrives".to_string()),
            "bell",
        ),
        EventKind::SessionStart => ("A new adventure begins".to_string(), "door"),
        EventKind::SessionEnd => ("The adventure comes to a close".to_string(), "exit"),
        EventKind::ChainTrigger => {
            let name = ev.chain_name.as_deref().or(ev.chain_id.as_deref());
            (
                format!("Combo chain [{}] triggered!", name.unwrap_or("unknown")),
                "combo",
            )
        }
        EventKind::Unknown => (format!("Unknown event: {raw_name}"), "question"),
    };

    (message, icon.to_string())
}

/// Tool-specific short summary of structured tool arguments. Tools without
/// a rule yield no summary.
fn summarize_tool_input(tool: &str, input: &Value) -> Option<String> {
    match tool {
        "Read" | "Write" | "Edit" | "NotebookEdit" => {
            input.get("file_path").and_then(Value::as_str).map(tail_path)
        }
        "Bash" => input
            .get("command")
            .and_then(Value::as_str)
            .map(|c| truncate(c, MAX_COMMAND_LEN)),
        "Grep" | "Glob" => input
            .get("pattern")
            .and_then(Value::as_str)
            .map(|p| format!("\"{}\"", truncate(p, MAX_PATTERN_LEN))),
        _ => None,
    }
}

/// Keep the last 3 path segments so deep absolute paths stay readable.
fn tail_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() <= 3 {
        return path.to_string();
    }
    segments[segments.len() - 3..].join("/")
}
