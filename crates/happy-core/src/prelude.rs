//! Commonly used types for convenient import: `use happy_core::prelude::*;`.

pub use crate::{CoreError, CoreResult};

pub use crate::dirs::{CodexHome, HappyHome};

pub use crate::model::{
    AgentState, Credentials, DaemonStateFile, EncryptionDescriptor, EncryptionVariant, Machine,
    PermissionRequest, SecretBytes, Session, SessionLifecycle, SessionMetadata, StartedBy,
    TrackedSession,
};

pub use crate::version::{
    ElicitationResponseStyle, Version, current_cli_version, elicitation_response_style,
};

pub use crate::telemetry::{LogConfig, LogFormat, TelemetryError, TelemetryResult, setup_logging};

pub use crate::atomic_file::{read_json_tolerant, write_json_atomic};

pub use crate::rest::{BackendClient, RestError, RestResult};
