//! Daemon orchestration (§4.7): the full startup sequence from
//! probing an existing state file through to graceful shutdown, with a
//! version-aware singleton check and machine-link registration layered
//! on top of the bind-then-write-state-file shape.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use happy_core::dirs::HappyHome;
use happy_core::model::{DaemonStateFile, Machine};
use happy_core::rest::{BackendClient, RestError};
use happy_core::telemetry::warn_offline_once;
use happy_core::version::current_cli_version;
use happy_sync::machine_client::MachineSyncClient;
use jsonrpsee::http_client::HttpClientBuilder;
use jsonrpsee::server::Server;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::children::ChildTable;
use crate::error::{DaemonError, DaemonResult};
use crate::heartbeat;
use crate::lock::DaemonLock;
use crate::process;
use crate::rpc::{LoopbackRpcClient, LoopbackRpcImpl, LoopbackRpcServer};
use crate::spawn::SpawnConfig;
use crate::state::{self, ProbedDaemon};

/// Hard ceiling on graceful shutdown (§4.7 step 9): whatever hasn't
/// finished by then is abandoned so the process can still exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);
/// How long to wait for a superseded daemon's pid to disappear after
/// asking it to stop, before escalating to `SIGKILL` (§4.7 step 1).
const SUPERSEDE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Which of the four triggers (§4.7 step 9, §8 E6) asked the daemon to
/// shut down: the loopback `/stop` method, the machine-scoped
/// `stop-daemon` RPC, an OS signal, or (default) none recorded yet.
/// Shared between [`await_shutdown_signal`], [`LoopbackRpcImpl::stop`]
/// and the `stop-daemon` handler so whichever one actually cancels the
/// shutdown token also records why.
#[derive(Clone)]
pub struct ShutdownSource(Arc<StdMutex<Option<&'static str>>>);

impl ShutdownSource {
    /// Start with no trigger recorded yet.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(StdMutex::new(None)))
    }

    /// Record `source` (first writer wins) and cancel `shutdown`.
    pub fn fire(&self, source: &'static str, shutdown: &CancellationToken) {
        let mut guard = self.0.lock().expect("shutdown source lock poisoned");
        if guard.is_none() {
            *guard = Some(source);
        }
        drop(guard);
        shutdown.cancel();
    }

    /// The recorded trigger, or `"unknown"` if shutdown hasn't been fired.
    #[must_use]
    pub fn get(&self) -> &'static str {
        self.0.lock().expect("shutdown source lock poisoned").unwrap_or("unknown")
    }
}

impl Default for ShutdownSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything [`run`] needs that isn't discoverable from the Happy home
/// alone: the backend connection and the machine's own identity/key.
pub struct DaemonContext {
    /// Resolved `~/.happy` (or `$HAPPY_HOME_DIR`) root.
    pub home: HappyHome,
    /// `HAPPY_SERVER_URL`.
    pub server_url: String,
    /// Bearer token from `credentials.json`.
    pub token: String,
    /// This machine's locally generated id.
    pub machine_id: uuid::Uuid,
    /// Machine-scoped symmetric key, unwrapped from `credentials.json`.
    pub machine_key: [u8; 32],
    /// How to spawn session-supervisor children.
    pub spawn_config: SpawnConfig,
}

/// Run the daemon to completion: startup, serve, and a graceful
/// shutdown once `shutdown` is cancelled (by a signal, the loopback
/// `/stop` method, or the `stop-daemon` machine RPC).
///
/// # Errors
///
/// Returns [`DaemonError::AlreadyRunning`] if a live daemon on the same
/// CLI version already holds the lock, or [`DaemonError::FatalStartupError`]
/// if any unrecoverable startup step fails.
pub async fn run(ctx: DaemonContext, shutdown: CancellationToken) -> DaemonResult<()> {
    let current_version = current_cli_version();
    let state_path = ctx.home.daemon_state_path();
    let lock_path = ctx.home.daemon_lock_path();

    match state::probe(&state_path, &current_version) {
        ProbedDaemon::RunningSameVersion(state) => {
            return Err(DaemonError::AlreadyRunning(state.pid));
        }
        ProbedDaemon::RunningDifferentVersion(state) => {
            info!(pid = state.pid, port = state.http_port, "superseding older daemon generation");
            supersede(&state).await;
            state::remove(&state_path);
        }
        ProbedDaemon::Stale(state) => {
            info!(pid = state.pid, "removing stale daemon state file");
            state::remove(&state_path);
        }
        ProbedDaemon::Absent => {}
    }

    let lock = DaemonLock::acquire(&lock_path)?;
    caffeinate_noop();

    let backend = BackendClient::new(ctx.server_url.clone(), ctx.token.clone());
    let machine = register_machine(&backend, &ctx).await;

    let shutdown_source = ShutdownSource::new();

    let children = ChildTable::new();
    let rpc_impl = LoopbackRpcImpl::new(children.clone(), ctx.spawn_config.clone(), shutdown.clone(), shutdown_source.clone());

    let server = Server::builder()
        .build("127.0.0.1:0")
        .await
        .map_err(|e| DaemonError::BindFailed(e.to_string()))?;
    let addr = server.local_addr().map_err(|e| DaemonError::BindFailed(e.to_string()))?;
    let server_handle = server.start(rpc_impl.into_rpc());

    let start_time = chrono::Utc::now().timestamp_millis();
    let state = DaemonStateFile {
        pid: std::process::id(),
        http_port: addr.port(),
        start_time,
        started_with_cli_version: current_version.to_string(),
        last_heartbeat: None,
        daemon_log_path: ctx.home.logs_dir().join("daemon.log").display().to_string(),
    };
    state::write(&state_path, &state)?;
    info!(port = addr.port(), pid = state.pid, "daemon loopback control surface listening");

    let machine_link =
        MachineSyncClient::spawn(ctx.server_url.clone(), ctx.machine_id.to_string(), ctx.token.clone(), ctx.machine_key);
    register_machine_handlers(
        &machine_link,
        children.clone(),
        ctx.spawn_config.clone(),
        ctx.machine_key,
        shutdown.clone(),
        shutdown_source.clone(),
    )
    .await;
    if let Some(machine) = &machine {
        let _ = machine_link
            .update_metadata_advisory(serde_json::json!({"status": "running", "metadataVersion": machine.metadata_version}))
            .await;
    }

    let heartbeat_handle = {
        let children = children.clone();
        let state_path = state_path.clone();
        let home_root = ctx.home.root().to_path_buf();
        let shutdown = shutdown.clone();
        let interval = happy_core::env::daemon_heartbeat_interval();
        let respawn_exe = ctx.spawn_config.cli_exe.clone();
        let respawn_log = ctx.home.logs_dir().join("daemon.log");
        tokio::spawn(heartbeat::run(
            children,
            state_path.clone(),
            home_root,
            interval,
            shutdown,
            move || happy_core::read_json_tolerant::<DaemonStateFile>(&state_path),
            move |newer| async move {
                info!(version = %newer, "newer CLI install detected, spawning fresh daemon generation");
                match spawn_fresh_daemon(&respawn_exe, &respawn_log) {
                    Ok(()) => {
                        info!("fresh daemon generation spawned, awaiting supersession");
                        // The new generation will probe this process's state
                        // file, send it a stop request, and SIGKILL it if
                        // that doesn't land in time (§4.7 step 1). Block
                        // here rather than returning so this task doesn't
                        // race the supersession with a second self-upgrade
                        // attempt next tick.
                        std::future::pending::<()>().await;
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to spawn fresh daemon generation; staying on the current version");
                    }
                }
            },
        ))
    };

    await_shutdown_signal(&shutdown, &shutdown_source).await;
    let shutdown_requested_at = chrono::Utc::now().timestamp_millis();
    info!(source = shutdown_source.get(), "daemon shutting down");

    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = machine_link
            .update_metadata_advisory(serde_json::json!({
                "status": "shutting-down",
                "shutdownSource": shutdown_source.get(),
                "shutdownRequestedAt": shutdown_requested_at,
            }))
            .await;
        heartbeat_handle.abort();
        let _ = server_handle.stop();
        server_handle.stopped().await;
    })
    .await;

    state::remove(&state_path);
    lock.release();
    Ok(())
}

async fn await_shutdown_signal(shutdown: &CancellationToken, source: &ShutdownSource) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        tokio::select! {
            () = shutdown.cancelled() => {}
            _ = sigterm.recv() => source.fire("os-signal", shutdown),
            _ = sigint.recv() => source.fire("os-signal", shutdown),
        }
        return;
    }
    #[cfg(not(unix))]
    {
        shutdown.cancelled().await;
    }
}

/// Ask a superseded daemon to stop via its own loopback surface, then
/// wait for its pid to disappear, escalating to `SIGKILL` if it doesn't
/// (§4.7 step 1: "send a stop request, fall back to SIGKILL").
async fn supersede(old: &DaemonStateFile) {
    let url = format!("http://127.0.0.1:{}", old.http_port);
    if let Ok(client) = HttpClientBuilder::default().build(&url)
        && LoopbackRpcClient::stop(&client).await.is_err()
    {
        warn!(pid = old.pid, "old daemon did not answer /stop cleanly");
    }

    let deadline = tokio::time::Instant::now() + SUPERSEDE_STOP_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if !process::is_alive(old.pid) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    if process::is_alive(old.pid) {
        warn!(pid = old.pid, "superseded daemon still alive, sending SIGKILL");
        let _ = process::kill(old.pid);
    }
}

/// Spawn a fresh, detached `daemon start-sync` generation of this same
/// binary (§4.7 step 8). The new process probes the state file this
/// (outdated) process still owns, supersedes it per step 1, and takes
/// over the lock and loopback port.
fn spawn_fresh_daemon(cli_exe: &Path, log_path: &Path) -> std::io::Result<()> {
    let mut command = tokio::process::Command::new(cli_exe);
    command
        .arg("daemon")
        .arg("start-sync")
        .stdin(Stdio::null())
        .kill_on_drop(false);
    match std::fs::OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(log) => {
            let log_err = log.try_clone()?;
            command.stdout(Stdio::from(log)).stderr(Stdio::from(log_err));
        }
        Err(_) => {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
    }
    command.spawn()?;
    Ok(())
}

/// No-op on every platform this binary targets. On macOS a `caffeinate`
/// child would be held open for the daemon's lifetime to prevent App
/// Nap from throttling it; there is no equivalent concern on Linux, so
/// this is a deliberate no-op kept as a single call site per §4.7
/// step 3.
fn caffeinate_noop() {
    tracing::debug!("caffeinate: no-op on this platform");
}

/// §4.7 step 4: register (or re-fetch) this machine with the backend.
/// A 404 is expected when the backend endpoint isn't available yet and
/// is not treated as fatal — the daemon runs in offline mode with a
/// synthesized local identity until the next successful contact.
async fn register_machine(backend: &BackendClient, ctx: &DaemonContext) -> Option<Machine> {
    let metadata = serde_json::json!({"host": hostname(), "platform": std::env::consts::OS});
    match backend.get_or_create_machine(ctx.machine_id, &metadata, None, None).await {
        Ok(machine) => Some(machine),
        Err(RestError::EndpointMissing) => {
            info!("machine registration endpoint unavailable, continuing offline");
            None
        }
        Err(err) => {
            warn_offline_once();
            warn!(error = %err, "machine registration failed");
            None
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}

/// §4.7 step 7: register the three canonical daemon RPC methods on the
/// machine-scoped link. Machine-scoped handlers receive raw
/// `{"params_encrypted": <b64>}` (unlike session-scoped handlers, which
/// are pre-decrypted) — each closure below decrypts with the machine
/// key before acting.
async fn register_machine_handlers(
    link: &MachineSyncClient,
    children: ChildTable,
    spawn_config: SpawnConfig,
    machine_key: [u8; 32],
    shutdown: CancellationToken,
    shutdown_source: ShutdownSource,
) {
    {
        let children = children.clone();
        let spawn_config = spawn_config.clone();
        link.register_handler("spawn-happy-session", move |raw| {
            let children = children.clone();
            let spawn_config = spawn_config.clone();
            async move {
                let Some(params) = decrypt_params(&machine_key, &raw) else {
                    return error_reply("failed to decrypt params");
                };
                let Some(directory) = params.get("directory").and_then(|v| v.as_str()) else {
                    return error_reply("missing directory");
                };
                let directory = PathBuf::from(directory);
                if let Err(err) = crate::children::ensure_directory(&directory) {
                    return error_reply(&err.to_string());
                }
                match spawn_config.spawn(&directory, None) {
                    Ok(child) => {
                        let Some(pid) = child.id() else {
                            return error_reply("spawned child has no pid");
                        };
                        let rx = children.register_spawned(pid, child, serde_json::json!({})).await;
                        match tokio::time::timeout(crate::children::SPAWN_WEBHOOK_TIMEOUT, rx).await {
                            Ok(Ok(tracked)) => serde_json::json!({"pid": tracked.pid, "sessionId": tracked.session_id}),
                            _ => serde_json::json!({"pid": pid, "sessionId": null}),
                        }
                    }
                    Err(err) => error_reply(&err.to_string()),
                }
            }
        })
        .await;
    }

    {
        let children = children.clone();
        link.register_handler("stop-session", move |raw| {
            let children = children.clone();
            async move {
                let Some(params) = decrypt_params(&machine_key, &raw) else {
                    return error_reply("failed to decrypt params");
                };
                let Some(session_ref) = params.get("sessionId").and_then(|v| v.as_str()) else {
                    return error_reply("missing sessionId");
                };
                let Some(pid) = children.find_pid(session_ref).await else {
                    return error_reply("no such session");
                };
                let _ = process::terminate(pid);
                children.remove(pid);
                serde_json::json!({"ok": true})
            }
        })
        .await;
    }

    {
        let shutdown = shutdown.clone();
        let shutdown_source = shutdown_source.clone();
        link.register_handler("stop-daemon", move |raw| {
            let shutdown = shutdown.clone();
            let shutdown_source = shutdown_source.clone();
            async move {
                if decrypt_params(&machine_key, &raw).is_none() {
                    return error_reply("failed to decrypt params");
                }
                shutdown_source.fire("mobile-app", &shutdown);
                serde_json::json!({"ok": true})
            }
        })
        .await;
    }
}

fn decrypt_params(key: &[u8; 32], raw: &serde_json::Value) -> Option<serde_json::Value> {
    let encoded = raw.get("params_encrypted")?.as_str()?;
    let bytes = happy_crypto::decode_b64(encoded).ok()?;
    happy_crypto::decrypt::<serde_json::Value>(key, &bytes).ok().flatten()
}

fn error_reply(message: &str) -> serde_json::Value {
    serde_json::json!({"error": message})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_reply_shape() {
        assert_eq!(error_reply("boom"), serde_json::json!({"error": "boom"}));
    }

    #[test]
    fn decrypt_params_round_trips() {
        let key = [9u8; 32];
        let value = serde_json::json!({"directory": "/tmp/x"});
        let envelope = happy_crypto::encrypt(&key, &value).unwrap();
        let raw = serde_json::json!({"params_encrypted": happy_crypto::encode_b64(&envelope)});
        assert_eq!(decrypt_params(&key, &raw), Some(value));
    }

    #[tokio::test]
    async fn spawn_fresh_daemon_runs_configured_binary() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("daemon.log");
        spawn_fresh_daemon(&PathBuf::from("true"), &log_path).unwrap();
    }

    #[test]
    fn decrypt_params_rejects_wrong_key() {
        let key = [9u8; 32];
        let wrong = [1u8; 32];
        let envelope = happy_crypto::encrypt(&key, &serde_json::json!({"a": 1})).unwrap();
        let raw = serde_json::json!({"params_encrypted": happy_crypto::encode_b64(&envelope)});
        assert_eq!(decrypt_params(&wrong, &raw), None);
    }
}
