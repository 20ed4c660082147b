//! The permission broker itself (§4.5): turns a synchronous "may I run
//! this tool?" call into an async round-trip, with a process-global
//! timeout and atomic `requests` → `completedRequests` state projection.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use happy_core::model::{AgentState, CompletedPermissionRequest, PermissionRequest};
use tokio::sync::oneshot;

use crate::error::ApprovalError;
use crate::types::{Decision, PermissionResponse, PermissionResult, map_response_to_decision};

struct Pending {
    sender: oneshot::Sender<PermissionResult>,
}

struct State {
    agent_state: AgentState,
    pending: HashMap<String, Pending>,
}

/// Turns `handle_tool_call` into an async round-trip over whatever
/// real-time link the caller wires `permission` responses in from.
pub struct PermissionBroker {
    state: Mutex<State>,
    timeout: Duration,
}

impl PermissionBroker {
    /// Build a broker with the given per-request timeout
    /// (`HAPPY_PERMISSION_TIMEOUT_MS`, default 120 s).
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                agent_state: AgentState::default(),
                pending: HashMap::new(),
            }),
            timeout,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("permission broker state poisoned")
    }

    /// Snapshot the wire-visible agent state (for projecting into a
    /// Session's `agentState`).
    #[must_use]
    pub fn agent_state_snapshot(&self) -> AgentState {
        self.lock().agent_state.clone()
    }

    /// Request approval for one tool call, blocking until a matching
    /// `permission` response arrives, the per-request timeout elapses, or
    /// [`Self::reset`] is called.
    pub async fn handle_tool_call(
        &self,
        tool_call_id: &str,
        tool: &str,
        input: serde_json::Value,
    ) -> PermissionResult {
        let (tx, rx) = oneshot::channel();
        let created_at = now_ms();
        {
            let mut state = self.lock();
            state.agent_state.requests.insert(
                tool_call_id.to_string(),
                PermissionRequest {
                    id: tool_call_id.to_string(),
                    tool: tool.to_string(),
                    input,
                    created_at,
                },
            );
            state.pending.insert(tool_call_id.to_string(), Pending { sender: tx });
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_canceled)) => {
                // Sender dropped without sending: treat like a reset.
                self.complete(tool_call_id, Decision::Abort, "broker shut down".into());
                PermissionResult::abort("broker shut down")
            }
            Err(_elapsed) => {
                let reason = format!(
                    "permission request timed out after {} ms",
                    self.timeout.as_millis()
                );
                // First writer wins: complete() only acts if the entry is
                // still pending, so a racing resolve() can't be clobbered.
                self.complete(tool_call_id, Decision::Abort, reason.clone());
                PermissionResult::abort(reason)
            }
        }
    }

    /// Resolve a pending request from an inbound `permission` RPC
    /// response. No-op (logged) if no pending entry matches `id`.
    pub fn resolve(&self, response: PermissionResponse) {
        let decision = map_response_to_decision(&response);
        let reason = (!response.approved).then(|| "denied by operator".to_string());
        let amendment = response.exec_policy_amendment.clone();

        let sender = {
            let mut state = self.lock();
            let Some(pending) = state.pending.remove(&response.id) else {
                tracing::debug!(tool_call_id = %response.id, "permission response for unknown/settled request, dropping");
                return;
            };
            move_to_completed(&mut state.agent_state, &response.id, decision, reason.clone());
            pending.sender
        };

        let _ = sender.send(PermissionResult {
            decision,
            amendment,
            reason,
        });
    }

    /// Complete a pending request locally (timeout or internal abort),
    /// returning `true` if an entry was actually resolved here.
    fn complete(&self, tool_call_id: &str, decision: Decision, reason: String) -> bool {
        let mut state = self.lock();
        let Some(_pending) = state.pending.remove(tool_call_id) else {
            return false;
        };
        move_to_completed(&mut state.agent_state, tool_call_id, decision, Some(reason));
        true
    }

    /// Reject every in-flight request with a reset error, clear the
    /// pending table, and mark all live requests canceled in agent state.
    pub fn reset(&self) {
        let mut state = self.lock();
        let ids: Vec<String> = state.agent_state.requests.keys().cloned().collect();
        for id in &ids {
            move_to_completed(
                &mut state.agent_state,
                id,
                Decision::Abort,
                Some("session reset".to_string()),
            );
        }
        for (_, pending) in state.pending.drain() {
            // Dropping the sender resolves the receiver with a Canceled
            // error; handle_tool_call's Ok(Err(_)) branch turns that into
            // an abort result, so this is equivalent to sending directly.
            drop(pending.sender);
        }
    }
}

fn move_to_completed(
    agent_state: &mut AgentState,
    tool_call_id: &str,
    decision: Decision,
    reason: Option<String>,
) {
    if let Some(request) = agent_state.requests.remove(tool_call_id) {
        let completed = CompletedPermissionRequest {
            id: request.id,
            tool: request.tool,
            input: request.input,
            created_at: request.created_at,
            completed_at: now_ms(),
            status: decision_status(decision).to_string(),
            decision: Some(decision_status(decision).to_string()),
            reason,
        };
        agent_state.completed_requests.insert(tool_call_id.to_string(), completed);
    }
}

fn decision_status(decision: Decision) -> &'static str {
    match decision {
        Decision::Approved => "approved",
        Decision::ApprovedForSession => "approved_for_session",
        Decision::ApprovedWithAmendment => "approved_with_amendment",
        Decision::Denied => "denied",
        Decision::Abort => "canceled",
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
