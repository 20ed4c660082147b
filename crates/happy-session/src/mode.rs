//! Supervisor mode and the sticky per-session overrides layered on top of
//! it (§4.6 "core state").

use serde::{Deserialize, Serialize};

/// Which surface is currently driving the conversation.
///
/// `Local`: the agent is attached directly to this process's TTY, with a
/// transcript scanner mirroring its rollout to the sync link.
/// `Remote`: the agent is driven through the MCP-like stdio driver, with
/// every tool call routed through the permission broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Operator is typing directly into the agent's TTY.
    Local,
    /// A remote client drives the conversation over the sync link.
    Remote,
}

impl Mode {
    /// Stable wire string, matching `agentState`/event payload encoding.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Local => "local",
            Mode::Remote => "remote",
        }
    }
}

/// Why the mode loop is ending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// A remote `switch` RPC moved control back to local, or vice versa.
    Switch,
    /// The session is shutting down entirely.
    Exit,
}

/// Sticky overrides that persist across turns once set by the operator,
/// until explicitly cleared (§4.6).
#[derive(Debug, Clone, Default)]
pub struct StickyOverrides {
    /// Permission mode override (e.g. `"plan"`, `"auto"`), if the operator
    /// pinned one this session.
    pub permission_mode: Option<String>,
    /// Model override, if the operator pinned one this session.
    pub model: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_wire_strings_are_lowercase() {
        assert_eq!(Mode::Local.as_str(), "local");
        assert_eq!(Mode::Remote.as_str(), "remote");
    }

    #[test]
    fn sticky_overrides_default_to_none() {
        let overrides = StickyOverrides::default();
        assert!(overrides.permission_mode.is_none());
        assert!(overrides.model.is_none());
    }
}
