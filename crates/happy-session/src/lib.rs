//! Session supervisor (§4.6): the per-session startup sequence, the
//! local/remote mode loop, the agent driver contract, and the
//! approval-policy/sandbox mapping table.
//!
//! This crate owns exactly one running session's lifecycle. It depends
//! on [`happy_sync`] for the encrypted session-scoped link, on
//! [`happy_approval`] for the permission broker, on [`happy_rollout`]
//! for the local-mode transcript scanner, and on [`happy_daemon`] only
//! for the loopback RPC client types used by the startup sequence's
//! self-registration webhook.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod agent_driver;
pub mod error;
pub mod local;
pub mod mode;
pub mod policy;
pub mod startup;
pub mod stdio_driver;
pub mod supervisor;

pub use error::{SessionError, SessionResult};
pub use mode::{ExitReason, Mode, StickyOverrides};
pub use policy::{ApprovalPolicy, PermissionMode, Sandbox, approval_policy_and_sandbox};
pub use startup::{StartedBy, StartupContext, StartupOutcome, run_mode_loop, run_startup};
pub use stdio_driver::CodexStdioDriver;
pub use supervisor::SessionSupervisor;
