//! Convenience re-exports for crates that consume `happy-sync`.

pub use crate::error::{SyncError, SyncResult};
pub use crate::handler_table::HandlerTable;
pub use crate::machine_client::MachineSyncClient;
pub use crate::protocol::{Frame, MetadataField, UpdateBody, WriteAck, apply_if_newer};
pub use crate::session_client::{SessionSyncClient, UserMessageCallback};
pub use crate::transport::RealtimeLink;
