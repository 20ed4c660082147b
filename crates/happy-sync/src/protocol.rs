//! Shared wire envelope shapes for both sync clients (§4.3, §4.4, §6.4).

use serde::{Deserialize, Serialize};

/// Outermost tagged frame exchanged over either link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Session-scoped patch or inbound message, see [`UpdateBody`].
    #[serde(rename = "update")]
    Update {
        /// Which kind of update this is.
        body: UpdateBody,
    },
    /// An inbound RPC call the client must answer.
    #[serde(rename = "rpc-request")]
    RpcRequest {
        /// RPC id this response must echo.
        id: String,
        /// Namespaced method name.
        method: String,
        /// Base64 envelope of the encrypted params.
        params_encrypted: String,
    },
    /// Reply to an `rpc-request`.
    #[serde(rename = "rpc-response")]
    RpcResponse {
        /// Echoes the request id.
        id: String,
        /// Base64 envelope of the encrypted result or error.
        result_encrypted: String,
    },
    /// Handler registration announcement.
    #[serde(rename = "rpc-register")]
    RpcRegister {
        /// Namespaced method name now available.
        method: String,
    },
    /// Outbound agent message.
    #[serde(rename = "message")]
    Message {
        /// Session id this message belongs to.
        session_id: String,
        /// Base64 envelope of the encrypted content.
        content_encrypted: String,
    },
    /// Outbound usage report.
    #[serde(rename = "usage-report")]
    UsageReport {
        /// Usage payload, already shaped per §4.3 `sendUsageReport`.
        #[serde(flatten)]
        body: serde_json::Value,
    },
    /// Optimistic-concurrency metadata/agent-state write.
    #[serde(rename = "update-metadata")]
    UpdateMetadata {
        /// Correlates with the eventual [`Frame::WriteAck`].
        id: String,
        /// Which field this write targets.
        field: MetadataField,
        /// Version the writer last observed.
        expected_version: i64,
        /// Base64 envelope of the encrypted new value.
        encrypted_value: String,
    },
    /// Reply to an `update-metadata` write.
    #[serde(rename = "write-ack")]
    WriteAck {
        /// Echoes the request id.
        id: String,
        /// The outcome.
        #[serde(flatten)]
        ack: WriteAck,
    },
    /// Unreliable liveness ping; also used by `flush()`.
    #[serde(rename = "ping")]
    Ping {
        /// Present only when the caller wants an acked reply (`flush()`).
        #[serde(default)]
        id: Option<String>,
        /// Extra fields (`mode`, `thinking`, `machineId`, `time`, ...).
        #[serde(flatten)]
        extra: serde_json::Value,
    },
    /// Reply to an acked ping.
    #[serde(rename = "pong")]
    Pong {
        /// Echoes the ping's id.
        id: String,
    },
}

/// Which versioned field an `update-metadata` write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetadataField {
    /// Session/machine `metadata`.
    Metadata,
    /// Session `agentState`.
    AgentState,
    /// Machine `daemonState`.
    DaemonState,
}

/// Body of an inbound `update` frame (§4.3 "Inbound events").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum UpdateBody {
    /// A new encrypted user message.
    NewMessage {
        /// Base64 envelope of the encrypted payload.
        content_encrypted: String,
    },
    /// A versioned metadata/agent-state patch for a session.
    UpdateSession {
        /// New metadata, if changed.
        #[serde(default)]
        metadata_encrypted: Option<String>,
        /// Version accompanying `metadata_encrypted`.
        #[serde(default)]
        metadata_version: Option<i64>,
        /// New agent state, if changed.
        #[serde(default)]
        agent_state_encrypted: Option<String>,
        /// Version accompanying `agent_state_encrypted`.
        #[serde(default)]
        agent_state_version: Option<i64>,
    },
    /// Machine-scoped patch arriving on the wrong link; log and ignore.
    UpdateMachine {
        /// Opaque payload, never interpreted.
        #[serde(flatten)]
        _ignored: serde_json::Value,
    },
}

/// Reply shape for an optimistic-concurrency write (§4.3 `updateMetadata`/`updateAgentState`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum WriteAck {
    /// Write accepted as-is.
    Success {
        /// Server-confirmed new version.
        version: i64,
        /// Server-confirmed value (normally echoes what was sent).
        encrypted_value: String,
    },
    /// Write rejected; server version is ahead of what the caller expected.
    VersionMismatch {
        /// The version the server actually holds.
        version: i64,
        /// The server's current value, to adopt before retrying.
        encrypted_value: String,
    },
    /// Transient failure; do not retry indefinitely.
    Error {
        /// Human-readable failure reason.
        message: String,
    },
}

/// Apply a last-writer-wins-by-version patch: returns `Some(new_value)`
/// only if `incoming_version` strictly exceeds `current_version` (§5).
#[must_use]
pub fn apply_if_newer<T>(current_version: i64, incoming_version: i64, new_value: T) -> Option<(T, i64)> {
    if incoming_version > current_version {
        Some((new_value, incoming_version))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strictly_newer_version_applies() {
        assert_eq!(apply_if_newer(1, 2, "v2"), Some(("v2", 2)));
    }

    #[test]
    fn equal_version_is_dropped_not_reapplied() {
        assert_eq!(apply_if_newer(2, 2, "v2"), None);
    }

    #[test]
    fn older_version_is_dropped() {
        assert_eq!(apply_if_newer(3, 2, "v2"), None);
    }
}
