//! The loopback control surface (§4.8): an unauthenticated `jsonrpsee`
//! server bound to `127.0.0.1` only, exposing the daemon's five
//! endpoints as RPC methods. Binding to loopback is the trust boundary
//! — see the Open Questions note on this in `DESIGN.md`.

use std::path::PathBuf;
use std::time::Instant;

use happy_core::model::{StartedBy, TrackedSession};
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::children::{self, ChildTable, SPAWN_WEBHOOK_TIMEOUT};
use crate::daemon::ShutdownSource;
use crate::spawn::SpawnConfig;

/// Body of the `/session-started` self-registration webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStartedBody {
    /// Backend-assigned session id.
    pub session_id: uuid::Uuid,
    /// Free-form bootstrap metadata; must include `hostPid` for the
    /// daemon to correlate it with a spawned child.
    pub metadata: serde_json::Value,
}

/// Body of `/spawn-session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnSessionBody {
    /// Working directory to run the agent session in.
    pub directory: PathBuf,
    /// Optional pre-assigned session id (primarily for tests).
    #[serde(default)]
    pub session_id: Option<uuid::Uuid>,
}

/// Body of `/stop-session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopSessionBody {
    /// `happySessionId` (UUID) or the `PID-<n>` fallback form.
    pub session_id: String,
}

/// Wire projection of a [`TrackedSession`] for `GET /list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedSessionInfo {
    /// OS pid of the child.
    pub pid: u32,
    /// Backend session id, if the child has self-registered yet.
    pub session_id: Option<uuid::Uuid>,
    /// Who started this child.
    pub started_by: StartedBy,
}

impl From<TrackedSession> for TrackedSessionInfo {
    fn from(value: TrackedSession) -> Self {
        Self {
            pid: value.pid,
            session_id: value.session_id,
            started_by: value.started_by,
        }
    }
}

fn internal_error(message: impl std::fmt::Display) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(-32000, message.to_string(), None::<()>)
}

fn not_found(message: impl std::fmt::Display) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(-32001, message.to_string(), None::<()>)
}

/// The loopback control surface's RPC API (§4.8), one method per
/// documented endpoint.
#[rpc(server, client, namespace = "happy")]
pub trait LoopbackRpc {
    /// `POST /session-started`.
    #[method(name = "sessionStarted")]
    async fn session_started(&self, body: SessionStartedBody) -> Result<(), ErrorObjectOwned>;

    /// `GET /list`.
    #[method(name = "list")]
    async fn list(&self) -> Result<Vec<TrackedSessionInfo>, ErrorObjectOwned>;

    /// `POST /spawn-session`.
    #[method(name = "spawnSession")]
    async fn spawn_session(
        &self,
        body: SpawnSessionBody,
    ) -> Result<TrackedSessionInfo, ErrorObjectOwned>;

    /// `POST /stop-session`.
    #[method(name = "stopSession")]
    async fn stop_session(&self, body: StopSessionBody) -> Result<(), ErrorObjectOwned>;

    /// `POST /stop`.
    #[method(name = "stop")]
    async fn stop(&self) -> Result<(), ErrorObjectOwned>;
}

/// Server-side implementation, holding the child table and the signal
/// the daemon's main loop waits on for graceful shutdown.
pub struct LoopbackRpcImpl {
    children: ChildTable,
    spawn_config: SpawnConfig,
    shutdown: CancellationToken,
    shutdown_source: ShutdownSource,
}

impl LoopbackRpcImpl {
    /// Build the RPC implementation.
    #[must_use]
    pub fn new(children: ChildTable, spawn_config: SpawnConfig, shutdown: CancellationToken, shutdown_source: ShutdownSource) -> Self {
        Self {
            children,
            spawn_config,
            shutdown,
            shutdown_source,
        }
    }
}

#[jsonrpsee::core::async_trait]
impl LoopbackRpcServer for LoopbackRpcImpl {
    async fn session_started(&self, body: SessionStartedBody) -> Result<(), ErrorObjectOwned> {
        let host_pid = body
            .metadata
            .get("hostPid")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| internal_error("metadata.hostPid missing or not a number"))?;
        self.children
            .session_started(host_pid as u32, body.session_id, body.metadata)
            .await;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<TrackedSessionInfo>, ErrorObjectOwned> {
        Ok(self.children.list().await.into_iter().map(Into::into).collect())
    }

    async fn spawn_session(
        &self,
        body: SpawnSessionBody,
    ) -> Result<TrackedSessionInfo, ErrorObjectOwned> {
        let directory_created =
            children::ensure_directory(&body.directory).map_err(internal_error)?;
        if directory_created {
            info!(directory = %body.directory.display(), "created session working directory");
        }

        let metadata = serde_json::json!({ "directoryCreated": directory_created });
        let mut child = self
            .spawn_config
            .spawn(&body.directory, body.session_id)
            .map_err(internal_error)?;
        let pid = child.id().ok_or_else(|| internal_error("spawned child has no pid"))?;

        let started = Instant::now();
        let rx = self.children.register_spawned(pid, child, metadata).await;

        match tokio::time::timeout(SPAWN_WEBHOOK_TIMEOUT, rx).await {
            Ok(Ok(tracked)) => Ok(tracked.into()),
            Ok(Err(_)) => {
                warn!(pid, "spawn awaiter dropped without resolving");
                Err(internal_error("spawned child disappeared before registering"))
            }
            Err(_) => {
                warn!(
                    pid,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "spawn-session: self-registration webhook timed out, returning incomplete record"
                );
                Ok(TrackedSessionInfo {
                    pid,
                    session_id: None,
                    started_by: StartedBy::Daemon,
                })
            }
        }
    }

    async fn stop_session(&self, body: StopSessionBody) -> Result<(), ErrorObjectOwned> {
        let Some(pid) = self.children.find_pid(&body.session_id).await else {
            return Err(not_found(format!("no session matching {}", body.session_id)));
        };
        if let Err(err) = crate::process::terminate(pid) {
            warn!(pid, error = %err, "failed to SIGTERM tracked child");
        }
        self.children.remove(pid);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ErrorObjectOwned> {
        self.shutdown_source.fire("cli", &self.shutdown);
        Ok(())
    }
}
