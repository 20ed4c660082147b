//! Agent driver trait (§6.3): the stdio MCP-like process that actually
//! runs the Codex agent loop. The supervisor owns exactly one live
//! connection; the remote-mode turn loop talks to it exclusively through
//! this trait so it can be faked in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use happy_core::version::{ElicitationResponseStyle, Version, elicitation_response_style};

use crate::error::SessionResult;

/// Parameters the driver is started with for a brand-new turn sequence.
#[derive(Debug, Clone, Serialize)]
pub struct StartSessionParams {
    /// The first user prompt.
    pub prompt: String,
    /// Codex sandbox string (from [`crate::policy::approval_policy_and_sandbox`]).
    pub sandbox: &'static str,
    /// Codex approval-policy string (from the same mapping).
    pub approval_policy: &'static str,
    /// MCP server config block passed through verbatim.
    pub config: Value,
    /// Working directory the agent should run in.
    pub cwd: String,
    /// Sticky model override, if any.
    pub model: Option<String>,
    /// Existing rollout path to resume from, if any.
    pub resume_path: Option<String>,
}

/// One incoming notification from the agent driver's event stream (§4.6
/// "event routing table").
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentNotification {
    /// A complete assistant message.
    AgentMessage {
        /// Message payload, forwarded to the sync link as-is.
        body: Value,
    },
    /// An incremental reasoning token.
    AgentReasoningDelta {
        /// Delta payload.
        body: Value,
    },
    /// A shell/tool command is about to run.
    ExecCommandBegin {
        /// Command payload.
        body: Value,
    },
    /// A shell/tool command finished.
    ExecCommandEnd {
        /// Result payload.
        body: Value,
    },
    /// A patch is about to be applied.
    PatchApplyBegin {
        /// Patch payload.
        body: Value,
    },
    /// A patch application finished.
    PatchApplyEnd {
        /// Result payload.
        body: Value,
    },
    /// A unified diff summarizing the turn's changes.
    TurnDiff {
        /// Diff payload.
        body: Value,
    },
    /// A token-usage update.
    TokenCount {
        /// Usage payload.
        body: Value,
    },
    /// The agent accepted the turn and started working.
    TaskStarted {
        /// Payload.
        body: Value,
    },
    /// The agent finished the turn normally.
    TaskComplete {
        /// Payload.
        body: Value,
    },
    /// The turn was aborted (by us or by the agent itself).
    TurnAborted {
        /// Payload.
        body: Value,
    },
}

/// Codex's own elicitation discriminant (`codex_elicitation`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ElicitationKind {
    /// Approval to run a shell command.
    ExecApproval,
    /// Approval to apply a patch.
    PatchApproval,
}

/// One elicitation request from the agent driver, routed to the
/// permission broker (§6.3).
#[derive(Debug, Clone, Deserialize)]
pub struct ElicitationRequest {
    /// Human-readable prompt text.
    pub message: String,
    /// Which kind of approval this is.
    pub codex_elicitation: ElicitationKind,
    /// Codex's own tool-call id for this request.
    pub codex_call_id: String,
    /// The MCP tool-call id wrapping it, if different.
    #[serde(default)]
    pub codex_mcp_tool_call_id: Option<String>,
    /// Codex's own event id.
    pub codex_event_id: String,
    /// Shell command argv, only present for `exec-approval`.
    #[serde(default)]
    pub codex_command: Option<Vec<String>>,
    /// Working directory the command would run in.
    #[serde(default)]
    pub codex_cwd: Option<String>,
    /// Parsed-command summary, if Codex computed one.
    #[serde(default)]
    pub codex_parsed_cmd: Option<Value>,
    /// Cached exec-policy amendment Codex would apply if approved.
    #[serde(default)]
    pub proposed_execpolicy_amendment: Option<Vec<String>>,
    /// Why the patch needs elevated access, only for `patch-approval`.
    #[serde(default)]
    pub codex_reason: Option<String>,
    /// Whether the patch needs root, only for `patch-approval`.
    #[serde(default)]
    pub codex_grant_root: Option<bool>,
    /// The patch's changeset, only for `patch-approval`.
    #[serde(default)]
    pub codex_changes: Option<Value>,
}

/// Build the elicitation response body in the shape the connected
/// agent's own version expects (§6.3).
#[must_use]
pub fn encode_elicitation_response(
    agent_version: &Version,
    decision: &str,
    exec_policy_amendment: Option<&[String]>,
) -> Value {
    let decision_value = match exec_policy_amendment {
        Some(amendment) if decision == "approved" => serde_json::json!({
            "approved_execpolicy_amendment": {"proposed_execpolicy_amendment": amendment},
        }),
        _ => Value::String(decision.to_string()),
    };

    match elicitation_response_style(agent_version) {
        ElicitationResponseStyle::Legacy => serde_json::json!({"decision": decision_value}),
        ElicitationResponseStyle::Tagged => {
            let action = match decision {
                "abort" => "cancel",
                "denied" => "decline",
                _ => "accept",
            };
            serde_json::json!({
                "action": action,
                "decision": decision_value,
                "content": {},
            })
        }
    }
}

/// The stdio MCP-like process driving one Codex agent loop.
///
/// Implementations own the child process lifecycle; `disconnect` must be
/// idempotent since cleanup may call it after an already-dead child.
#[async_trait]
pub trait AgentDriver: Send + Sync {
    /// Establish the stdio connection (spawn the child, if not already running).
    ///
    /// # Errors
    ///
    /// Returns an error if the child process cannot be spawned or the
    /// handshake fails.
    async fn connect(&mut self) -> SessionResult<Version>;

    /// Tear down the connection. Never closes anything the §9 "abort vs
    /// kill" boundary reserves for session teardown — callers decide
    /// when this is invoked.
    async fn disconnect(&mut self);

    /// Start a brand-new turn sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver is not connected or the request is rejected.
    async fn start_session(&mut self, params: StartSessionParams) -> SessionResult<()>;

    /// Continue an already-started turn sequence with a new prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver is not connected or the request is rejected.
    async fn continue_session(&mut self, prompt: &str) -> SessionResult<()>;

    /// Receive the next notification or elicitation request, whichever
    /// arrives first. Returns `None` once the driver's stream ends
    /// (child exited).
    async fn next_event(&mut self) -> Option<DriverEvent>;

    /// Send a resolved elicitation response back to the agent for the
    /// tool call identified by `call_id` (§6.3). A no-op if `call_id` is
    /// unknown to the driver (already answered, or never outstanding).
    ///
    /// # Errors
    ///
    /// Returns an error if the driver is not connected.
    async fn respond_to_elicitation(&mut self, call_id: &str, response: Value) -> SessionResult<()>;
}

/// One item pulled off an [`AgentDriver`]'s event stream.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    /// A routed agent-loop notification.
    Notification(AgentNotification),
    /// A request for tool-call approval.
    Elicitation(ElicitationRequest),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_style_is_bare_decision() {
        let body = encode_elicitation_response(&Version::new(0, 77, 0), "approved", None);
        assert_eq!(body, serde_json::json!({"decision": "approved"}));
    }

    #[test]
    fn tagged_style_wraps_decision_with_action_and_content() {
        let body = encode_elicitation_response(&Version::new(0, 78, 0), "denied", None);
        assert_eq!(body["action"], "decline");
        assert_eq!(body["decision"], "denied");
        assert_eq!(body["content"], serde_json::json!({}));
    }

    #[test]
    fn approved_with_amendment_is_tagged_decision_object() {
        let amendment = vec!["--yes".to_string()];
        let body = encode_elicitation_response(&Version::new(1, 0, 0), "approved", Some(&amendment));
        assert_eq!(
            body["decision"]["approved_execpolicy_amendment"]["proposed_execpolicy_amendment"],
            serde_json::json!(["--yes"])
        );
    }

    #[test]
    fn abort_maps_to_cancel_action() {
        let body = encode_elicitation_response(&Version::new(1, 0, 0), "abort", None);
        assert_eq!(body["action"], "cancel");
    }
}
