//! Approval-policy / sandbox mapping table (§4.6).
//!
//! The session supervisor never lets the agent driver choose its own
//! sandbox; it derives both from the operator-facing permission mode.

use serde::{Deserialize, Serialize};

/// Operator-facing permission mode, carried in session metadata and
/// settable via the `permission-mode-changed` session event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionMode {
    /// Prompt for anything not already allow-listed.
    Default,
    /// Never execute; every write or exec is denied outright.
    ReadOnly,
    /// Auto-approve everything except commands that fail once, which then
    /// fall back to a prompt.
    SafeYolo,
    /// Full autonomy: the agent never blocks on a prompt.
    Yolo,
}

/// Codex's own approval-policy string.
pub type ApprovalPolicy = &'static str;
/// Codex's own sandbox string.
pub type Sandbox = &'static str;

/// Map a [`PermissionMode`] to the `(approval-policy, sandbox)` pair the
/// agent driver is started with (§4.6 table).
#[must_use]
pub fn approval_policy_and_sandbox(mode: PermissionMode) -> (ApprovalPolicy, Sandbox) {
    match mode {
        PermissionMode::Default => ("untrusted", "workspace-write"),
        PermissionMode::ReadOnly => ("never", "read-only"),
        PermissionMode::SafeYolo => ("on-failure", "workspace-write"),
        PermissionMode::Yolo => ("on-failure", "danger-full-access"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mode_is_untrusted_workspace_write() {
        assert_eq!(
            approval_policy_and_sandbox(PermissionMode::Default),
            ("untrusted", "workspace-write")
        );
    }

    #[test]
    fn read_only_never_executes() {
        assert_eq!(
            approval_policy_and_sandbox(PermissionMode::ReadOnly),
            ("never", "read-only")
        );
    }

    #[test]
    fn safe_yolo_still_workspace_write() {
        assert_eq!(
            approval_policy_and_sandbox(PermissionMode::SafeYolo),
            ("on-failure", "workspace-write")
        );
    }

    #[test]
    fn yolo_grants_full_access() {
        assert_eq!(
            approval_policy_and_sandbox(PermissionMode::Yolo),
            ("on-failure", "danger-full-access")
        );
    }
}
