//! Parsing of individual rollout JSONL lines and their translation into
//! canonical session messages (§4.9 step 3-4).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One parsed line of a rollout file. Unrecognized `type`s are skipped
/// by the caller, not represented here.
#[derive(Debug, Clone)]
pub enum RolloutRecord {
    /// Establishes the session's identity, working directory and branch.
    SessionMeta(SessionMeta),
    /// A single agent-loop item: message, tool call, tool result, etc.
    ResponseItem(Value),
    /// An out-of-band event, e.g. `token_count`.
    EventMsg {
        /// The event's `type` discriminant.
        kind: String,
        /// The full original record.
        body: Value,
    },
}

/// `session_meta` payload (§4.9 step 4).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionMeta {
    /// The rollout's session id.
    pub id: String,
    /// Working directory the agent was launched in.
    pub cwd: String,
    /// Git branch at launch, if any.
    #[serde(default)]
    pub git_branch: Option<String>,
    /// Record timestamp, used for the startup-window tracking heuristic.
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Parse one complete JSONL line. Malformed lines are skipped silently
/// by returning `None` (§4.9 step 3); this function never errors.
#[must_use]
pub fn parse_line(line: &str) -> Option<RolloutRecord> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(trimmed).ok()?;
    let kind = value.get("type")?.as_str()?;

    match kind {
        "session_meta" => {
            let payload = value.get("payload").unwrap_or(&value);
            let meta = extract_session_meta(payload)?;
            Some(RolloutRecord::SessionMeta(meta))
        }
        "response_item" => {
            let payload = value.get("payload").cloned().unwrap_or(value);
            Some(RolloutRecord::ResponseItem(payload))
        }
        "event_msg" => {
            let payload = value.get("payload").cloned().unwrap_or_else(|| value.clone());
            let event_kind = payload.get("type").and_then(Value::as_str).unwrap_or("unknown").to_string();
            Some(RolloutRecord::EventMsg { kind: event_kind, body: payload })
        }
        _ => None,
    }
}

fn extract_session_meta(payload: &Value) -> Option<SessionMeta> {
    let id = payload.get("id")?.as_str()?.to_string();
    let cwd = payload.get("cwd")?.as_str()?.to_string();
    let git_branch = payload.pointer("/git/branch").and_then(Value::as_str).map(str::to_string);
    let timestamp = payload.get("timestamp").and_then(Value::as_str).map(str::to_string);
    Some(SessionMeta { id, cwd, git_branch, timestamp })
}

/// Kinds of `response_item` that translate to a tool-call envelope rather
/// than a plain assistant message (§4.9 step 4).
const TOOL_CALL_TYPES: &[&str] =
    &["function_call", "function_call_output", "custom_tool_call", "custom_tool_call_output", "local_shell_call", "web_search_call"];

/// Translate a raw `response_item` payload into the canonical session
/// message envelope forwarded to the sync link. Returns `None` for item
/// types this scanner does not forward.
#[must_use]
pub fn translate_response_item(item: &Value) -> Option<Value> {
    let kind = item.get("type").and_then(Value::as_str)?;
    if kind == "message" {
        return Some(serde_json::json!({"type": "message", "item": item}));
    }
    if TOOL_CALL_TYPES.contains(&kind) {
        let envelope_kind = if kind.ends_with("_output") { "tool-call-result" } else { "tool-call" };
        return Some(serde_json::json!({"type": envelope_kind, "item": item}));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_line_is_skipped_silently() {
        assert!(parse_line("{not json").is_none());
        assert!(parse_line("").is_none());
        assert!(parse_line("   ").is_none());
    }

    #[test]
    fn session_meta_extracts_id_cwd_and_branch() {
        let line = r#"{"type":"session_meta","payload":{"id":"abc","cwd":"/work","git":{"branch":"main"}}}"#;
        let Some(RolloutRecord::SessionMeta(meta)) = parse_line(line) else { panic!("expected session_meta") };
        assert_eq!(meta.id, "abc");
        assert_eq!(meta.cwd, "/work");
        assert_eq!(meta.git_branch.as_deref(), Some("main"));
    }

    #[test]
    fn assistant_message_translates_to_message_envelope() {
        let item = serde_json::json!({"type": "message", "role": "assistant", "content": []});
        let envelope = translate_response_item(&item).unwrap();
        assert_eq!(envelope["type"], "message");
    }

    #[test]
    fn function_call_translates_to_tool_call() {
        let item = serde_json::json!({"type": "function_call", "name": "shell"});
        let envelope = translate_response_item(&item).unwrap();
        assert_eq!(envelope["type"], "tool-call");
    }

    #[test]
    fn function_call_output_translates_to_tool_call_result() {
        let item = serde_json::json!({"type": "function_call_output"});
        let envelope = translate_response_item(&item).unwrap();
        assert_eq!(envelope["type"], "tool-call-result");
    }

    #[test]
    fn unrecognized_response_item_type_is_dropped() {
        let item = serde_json::json!({"type": "reasoning"});
        assert!(translate_response_item(&item).is_none());
    }

    #[test]
    fn event_msg_token_count_round_trips() {
        let line = r#"{"type":"event_msg","payload":{"type":"token_count","tokens":42}}"#;
        let Some(RolloutRecord::EventMsg { kind, body }) = parse_line(line) else { panic!("expected event_msg") };
        assert_eq!(kind, "token_count");
        assert_eq!(body["tokens"], 42);
    }
}
