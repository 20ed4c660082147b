//! Singleton machine daemon (§4.7, §4.8): lock file, state file,
//! heartbeat/self-upgrade check, child process tracking, and the
//! loopback control surface other local processes talk to.
//!
//! This crate has no opinion on how credentials or the machine key are
//! obtained — callers (the `happy` CLI's `daemon start` command) build
//! a [`daemon::DaemonContext`] from `~/.happy` and pass it to
//! [`daemon::run`].

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod children;
pub mod daemon;
pub mod error;
pub mod heartbeat;
pub mod lock;
pub mod process;
pub mod rpc;
pub mod spawn;
pub mod state;

pub use daemon::{DaemonContext, run};
pub use error::{DaemonError, DaemonResult};
