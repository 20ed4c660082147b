//! Core types, paths and telemetry shared by every Happy local-runtime crate.
//!
//! This crate has no knowledge of the network or crypto layers; it only
//! defines the data model (§3), where state lives on disk (§6.5), how it
//! is written without tearing (atomic rename), and how logging is wired.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod atomic_file;
pub mod config;
pub mod dirs;
pub mod env;
mod error;
pub mod model;
pub mod rest;
pub mod telemetry;
pub mod version;

pub use atomic_file::{read_json_tolerant, write_json_atomic};
pub use error::{CoreError, CoreResult};
pub use model::{
    AgentState, Credentials, DaemonStateFile, EncryptionDescriptor, EncryptionVariant, Machine,
    PermissionRequest, SecretBytes, Session, SessionLifecycle, SessionMetadata, StartedBy,
    TrackedSession,
};
