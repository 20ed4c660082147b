//! Permission broker (§4.5): turns a synchronous tool-call approval
//! check into an async round-trip through the session's real-time link,
//! with a process-wide timeout and atomic state projection into
//! `agentState.requests` / `agentState.completedRequests`.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod broker;
mod error;
mod types;

pub use broker::PermissionBroker;
pub use error::{ApprovalError, ApprovalResult};
pub use types::{Decision, PermissionResponse, PermissionResult, map_response_to_decision};
