//! Commonly used types for convenient import: `use happy_rollout::prelude::*;`.

pub use crate::{RolloutError, RolloutResult};
pub use crate::{ResumeEntry, list_resumable};
pub use crate::{RolloutRecord, RolloutScanner, RolloutWatcher};
pub use crate::{parse_line, translate_response_item};
