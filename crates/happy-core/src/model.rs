//! Shared data model: credentials, machines, sessions, tracked child
//! processes, permission requests and the on-disk daemon state file.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroize;

/// Symmetric encryption descriptor attached to [`Credentials`].
///
/// `legacy` carries one key used for every payload; `dataKey` carries a
/// machine key, a per-entity content key, and the backend public key used
/// to wrap content keys for new entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "camelCase")]
pub enum EncryptionDescriptor {
    /// Single 32-byte symmetric key used for all payloads.
    Legacy {
        /// The shared symmetric key.
        key: SecretBytes,
    },
    /// Per-entity content keys wrapped under a machine key.
    DataKey {
        /// 32-byte machine key.
        machine_key: SecretBytes,
        /// 32-byte content key for this entity.
        content_key: SecretBytes,
        /// Backend public key used to seal content keys for new entities.
        backend_public_key: SecretBytes,
    },
}

/// A 32-byte secret value that zeroizes on drop and never appears in debug
/// output.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    /// Wrap raw bytes.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Borrow the underlying bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretBytes(..)")
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Authentication bearer plus encryption descriptor, persisted once at
/// enrollment time and read by every process. Immutable once written;
/// rotation happens by re-enrolling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Opaque bearer token sent on every backend request.
    pub token: String,
    /// Encryption descriptor (legacy or data-key variant).
    pub encryption: EncryptionDescriptor,
}

/// One physical workstation, confirmed by the backend at registration time
/// and never renamed or reassigned afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    /// Locally generated, backend-confirmed identifier.
    pub id: Uuid,
    /// Arbitrary machine metadata (host name, platform, etc).
    pub metadata: serde_json::Value,
    /// Monotonic version; increases strictly on each accepted metadata write.
    pub metadata_version: i64,
    /// Daemon state snapshot as last reported to the backend.
    pub daemon_state: Option<serde_json::Value>,
    /// Monotonic version; increases strictly on each accepted daemon-state write.
    pub daemon_state_version: i64,
    /// Machine-scoped encryption key (base64, variant-dependent framing).
    pub encryption_key: String,
    /// Which [`EncryptionDescriptor`] variant this key belongs to.
    pub encryption_variant: EncryptionVariant,
}

/// Discriminates which encryption scheme a Machine/Session's stored key
/// belongs to, independent of the local process's own credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EncryptionVariant {
    /// Single shared symmetric key.
    Legacy,
    /// Per-entity content key wrapped under a machine key.
    DataKey,
}

/// Lifecycle state carried in a [`Session`]'s metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionLifecycle {
    /// Session has an active (or recently active) agent process.
    Running,
    /// Session has been explicitly retired; no further writes expected.
    Archived,
}

/// Metadata carried on a [`Session`]: host, working directory, which agent
/// flavor is driving it, and its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// Hostname of the machine running the session.
    pub host: String,
    /// Working directory the agent was started in.
    pub path: String,
    /// Which agent implementation is driving this session.
    pub flavor: String,
    /// Current lifecycle state.
    pub lifecycle: SessionLifecycle,
}

/// One pending or completed permission (tool-call approval) request,
/// keyed by the agent's own tool-call id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    /// Agent tool-call id; unique within `requests` ∪ `completedRequests`.
    pub id: String,
    /// Tool name the agent is asking permission to invoke.
    pub tool: String,
    /// Tool input payload, opaque to this layer.
    pub input: serde_json::Value,
    /// Wall-clock creation time (ms since epoch, matching wire encoding).
    pub created_at: i64,
}

/// One permission request that has already been resolved (approval,
/// denial, timeout or reset), carrying the original request fields plus
/// the resolution (§3 `PermissionRequest`, §4.5 state projection:
/// `completedRequests[toolCallId] = { …original, completedAt, status,
/// decision?, reason? }`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPermissionRequest {
    /// Agent tool-call id; unique within `requests` ∪ `completedRequests`.
    pub id: String,
    /// Tool name the agent asked permission to invoke.
    pub tool: String,
    /// Original tool input payload, unmodified from the pending request.
    pub input: serde_json::Value,
    /// Wall-clock creation time (ms since epoch) of the original request.
    pub created_at: i64,
    /// Wall-clock time (ms since epoch) the request was resolved.
    pub completed_at: i64,
    /// Coarse resolution status (`approved`, `approved_for_session`,
    /// `approved_with_amendment`, `denied`, `canceled`).
    pub status: String,
    /// The resolving decision, when one was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    /// Human-readable reason, populated on denial/timeout/reset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Wire-visible agent state: in-flight and completed permission requests
/// plus the operator-facing control bit.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    /// Requests awaiting a decision, keyed by tool-call id.
    #[serde(default)]
    pub requests: HashMap<String, PermissionRequest>,
    /// Requests a decision has already been recorded for, keyed by tool-call id.
    #[serde(default)]
    pub completed_requests: HashMap<String, CompletedPermissionRequest>,
    /// True when a human operator is driving the session directly (local
    /// mode); false when driven remotely.
    pub controlled_by_user: bool,
}

/// A session: one running (or previously running) agent conversation,
/// exclusively owned by one session supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Backend-assigned session id.
    pub id: Uuid,
    /// Client-chosen idempotency key; re-posting the same tag returns the
    /// same session.
    pub tag: Uuid,
    /// Monotonic sequence number for ordering session events.
    pub seq: i64,
    /// Session metadata (host, path, flavor, lifecycle).
    pub metadata: SessionMetadata,
    /// Monotonic version; increases strictly on each accepted metadata write.
    pub metadata_version: i64,
    /// Wire-visible agent state (permission requests, control bit).
    pub agent_state: AgentState,
    /// Monotonic version; increases strictly on each accepted agent-state write.
    pub agent_state_version: i64,
    /// Session-scoped encryption key (base64, variant-dependent framing).
    pub encryption_key: String,
    /// Which [`EncryptionDescriptor`] variant this key belongs to.
    pub encryption_variant: EncryptionVariant,
}

/// Who started a tracked child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StartedBy {
    /// Spawned by the daemon itself (`spawn-happy-session`).
    Daemon,
    /// An independently started CLI process that self-registered.
    External,
}

/// A daemon-local record of one live child CLI process, indexed by pid.
/// Entries disappear when the child exits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedSession {
    /// OS process id of the child.
    pub pid: u32,
    /// Whether the daemon spawned this child or merely observed it.
    pub started_by: StartedBy,
    /// Backend session id, populated once the child self-registers.
    pub session_id: Option<Uuid>,
    /// Free-form metadata supplied at spawn time (includes `hostPid`).
    pub metadata: Option<serde_json::Value>,
}

/// On-disk daemon liveness record, written atomically
/// (write-temp-then-rename). Presence alone does not mean the daemon is
/// alive — callers must also check the pid exists and the version matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStateFile {
    /// OS process id of the running daemon.
    pub pid: u32,
    /// Port the loopback control surface is listening on.
    pub http_port: u16,
    /// Wall-clock start time (ms since epoch).
    pub start_time: i64,
    /// CLI version string the daemon was started with.
    pub started_with_cli_version: String,
    /// Last heartbeat timestamp (ms since epoch), if any heartbeat has fired yet.
    pub last_heartbeat: Option<i64>,
    /// Path to the daemon's own log file.
    pub daemon_log_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_request_round_trips() {
        let req = PermissionRequest {
            id: "tool-call-1".into(),
            tool: "bash".into(),
            input: serde_json::json!({"command": "ls"}),
            created_at: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: PermissionRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, req.id);
        assert_eq!(back.tool, req.tool);
    }

    #[test]
    fn secret_bytes_debug_does_not_leak() {
        let secret = SecretBytes::new(vec![1, 2, 3, 4]);
        let rendered = format!("{secret:?}");
        assert_eq!(rendered, "SecretBytes(..)");
    }

    #[test]
    fn agent_state_default_is_empty_and_uncontrolled() {
        let state = AgentState::default();
        assert!(state.requests.is_empty());
        assert!(state.completed_requests.is_empty());
        assert!(!state.controlled_by_user);
    }

    #[test]
    fn daemon_state_file_round_trips_through_json() {
        let state = DaemonStateFile {
            pid: 4242,
            http_port: 8771,
            start_time: 1_700_000_000_000,
            started_with_cli_version: "0.1.0".into(),
            last_heartbeat: Some(1_700_000_060_000),
            daemon_log_path: "/home/user/.happy/logs/daemon.log".into(),
        };
        let json = serde_json::to_string(&state).unwrap();
        let back: DaemonStateFile = serde_json::from_str(&json).unwrap();
        assert_eq!(back.pid, state.pid);
        assert_eq!(back.http_port, state.http_port);
        assert_eq!(back.last_heartbeat, state.last_heartbeat);
    }
}
