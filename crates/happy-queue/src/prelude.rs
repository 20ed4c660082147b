//! Commonly used types for convenient import: `use happy_queue::prelude::*;`.

pub use crate::{AsyncLock, Backoff, Batch, InvalidateSync, ModeQueue, RetryDecision, backoff};
