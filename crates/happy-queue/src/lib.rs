//! Coordination primitives shared across the session supervisor, sync
//! clients and rollout reader (§4.2): a mode-partitioned message queue,
//! a single-slot async lock, a debounced single-flight executor, and
//! full-jitter exponential backoff.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod async_lock;
mod backoff;
mod invalidate_sync;
mod mode_queue;

pub use async_lock::AsyncLock;
pub use backoff::{Backoff, RetryDecision, backoff};
pub use invalidate_sync::InvalidateSync;
pub use mode_queue::{Batch, ModeQueue};
