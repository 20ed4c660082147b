//! Encrypted, auto-reconnecting real-time links to the Happy backend.
//!
//! Two link flavors share the same wire protocol ([`protocol`]) and
//! transport ([`transport`]): [`session_client::SessionSyncClient`]
//! (§4.3, one per running session) and
//! [`machine_client::MachineSyncClient`] (§4.4, one per daemon).

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod handler_table;
pub mod machine_client;
pub mod protocol;
pub mod session_client;
pub mod transport;

pub mod prelude;
