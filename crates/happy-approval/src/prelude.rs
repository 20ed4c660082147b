//! Commonly used types for convenient import: `use happy_approval::prelude::*;`.

pub use crate::{ApprovalError, ApprovalResult};
pub use crate::{Decision, PermissionBroker, PermissionResponse, PermissionResult};
