//! Wire-level types for the permission round-trip (§4.5).

use serde::{Deserialize, Serialize};

/// Outcome of a tool-call approval round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Approved for this call only.
    Approved,
    /// Approved for the remainder of the session; future matching calls
    /// should not prompt again.
    ApprovedForSession,
    /// Approved, but the caller substituted an amended command.
    ApprovedWithAmendment,
    /// Explicitly denied.
    Denied,
    /// The call should be aborted (explicit abort, or a timeout/reset).
    Abort,
}

/// Final result delivered to whatever called `handle_tool_call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionResult {
    /// The resolved decision.
    pub decision: Decision,
    /// Present only when `decision == ApprovedWithAmendment`: the
    /// normalized, amended command spec to run instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amendment: Option<serde_json::Value>,
    /// Human-readable reason, populated on timeout/reset/deny.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PermissionResult {
    /// Build a plain `approved` result with no amendment or reason.
    #[must_use]
    pub fn approved() -> Self {
        Self {
            decision: Decision::Approved,
            amendment: None,
            reason: None,
        }
    }

    /// Build an `abort` result carrying a human-readable reason.
    #[must_use]
    pub fn abort(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Abort,
            amendment: None,
            reason: Some(reason.into()),
        }
    }
}

/// Body of the inbound `permission` RPC the session registers a handler
/// for: `{ id, approved, decision?, execPolicyAmendment? }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionResponse {
    /// The tool-call id this response resolves.
    pub id: String,
    /// Coarse approve/deny bit.
    pub approved: bool,
    /// Optional fine-grained decision tag from the remote caller.
    #[serde(default)]
    pub decision: Option<String>,
    /// Present when `decision == "approved_execpolicy_amendment"`.
    #[serde(default)]
    pub exec_policy_amendment: Option<serde_json::Value>,
}

/// Map an inbound [`PermissionResponse`] to the [`Decision`] the pending
/// promise resolves with (§4.5 "Response RPC" mapping table).
#[must_use]
pub fn map_response_to_decision(response: &PermissionResponse) -> Decision {
    if response.approved {
        match response.decision.as_deref() {
            Some("approved_execpolicy_amendment") if response.exec_policy_amendment.is_some() => {
                Decision::ApprovedWithAmendment
            }
            Some("approved_for_session") => Decision::ApprovedForSession,
            _ => Decision::Approved,
        }
    } else if response.decision.as_deref() == Some("abort") {
        Decision::Abort
    } else {
        Decision::Denied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(approved: bool, decision: Option<&str>, amendment: bool) -> PermissionResponse {
        PermissionResponse {
            id: "c1".into(),
            approved,
            decision: decision.map(str::to_string),
            exec_policy_amendment: amendment.then(|| serde_json::json!({"cmd": ["ls", "-la"]})),
        }
    }

    #[test]
    fn approved_with_amendment_requires_both_fields() {
        let r = response(true, Some("approved_execpolicy_amendment"), true);
        assert_eq!(map_response_to_decision(&r), Decision::ApprovedWithAmendment);
    }

    #[test]
    fn approved_amendment_tag_without_payload_falls_back_to_plain_approval() {
        let r = response(true, Some("approved_execpolicy_amendment"), false);
        assert_eq!(map_response_to_decision(&r), Decision::Approved);
    }

    #[test]
    fn approved_for_session() {
        let r = response(true, Some("approved_for_session"), false);
        assert_eq!(map_response_to_decision(&r), Decision::ApprovedForSession);
    }

    #[test]
    fn plain_approved() {
        let r = response(true, None, false);
        assert_eq!(map_response_to_decision(&r), Decision::Approved);
    }

    #[test]
    fn denied_by_default() {
        let r = response(false, None, false);
        assert_eq!(map_response_to_decision(&r), Decision::Denied);
    }

    #[test]
    fn explicit_abort() {
        let r = response(false, Some("abort"), false);
        assert_eq!(map_response_to_decision(&r), Decision::Abort);
    }
}
