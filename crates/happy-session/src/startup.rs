//! Per-session startup sequence (§4.6 "core state" / startup steps):
//! resolve the machine id, register (or offline-synthesize) the Machine
//! and Session, derive the session's symmetric key, open the
//! session-scoped sync link, wire the abort/switch/permission RPC
//! handlers, notify the daemon's loopback webhook, and hand back a
//! ready [`SessionSupervisor`] plus a top-level mode-loop driver.

use std::path::PathBuf;
use std::sync::Arc;

use happy_approval::PermissionBroker;
use happy_core::config::Settings;
use happy_core::dirs::HappyHome;
use happy_core::model::{
    Credentials, DaemonStateFile, EncryptionDescriptor, Session, SessionLifecycle, SessionMetadata,
};
use happy_core::rest::{BackendClient, RestError};
use happy_core::telemetry::warn_offline_once;
use happy_daemon::rpc::{LoopbackRpcClient, SessionStartedBody};
use happy_sync::session_client::SessionSyncClient;
use jsonrpsee::http_client::HttpClientBuilder;
use tokio::sync::Notify;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent_driver::AgentDriver;
use crate::error::{SessionError, SessionResult};
use crate::mode::{ExitReason, Mode};
use crate::supervisor::SessionSupervisor;

/// Who started this CLI invocation (`--started-by`), carried into the
/// self-registration webhook's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartedBy {
    /// Spawned by the daemon's `spawn-happy-session` endpoint.
    Daemon,
    /// Started directly from a terminal.
    Terminal,
}

impl StartedBy {
    /// Stable wire string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StartedBy::Daemon => "daemon",
            StartedBy::Terminal => "terminal",
        }
    }
}

/// Everything the startup sequence needs that it cannot resolve itself.
pub struct StartupContext {
    /// Resolved Happy home (`~/.happy`).
    pub home: HappyHome,
    /// `HAPPY_SERVER_URL`, if set; offline startup proceeds without it.
    pub server_url: Option<String>,
    /// Loaded `credentials.json`.
    pub credentials: Credentials,
    /// Working directory this session runs in.
    pub cwd: PathBuf,
    /// Agent flavor string (`"codex"`), carried into session metadata.
    pub flavor: String,
    /// Who started this process.
    pub started_by: StartedBy,
    /// Operator-requested starting surface (`--happy-starting-mode`).
    pub starting_surface: Mode,
    /// `--resume-session`, if supplied.
    pub resume_session_id: Option<Uuid>,
    /// `--metadata` (§6.1, §10.5): a base64-encoded JSON [`Session`]
    /// bootstrap payload, passed daemon -> CLI so a daemon-spawned
    /// session need not round-trip `POST /v1/sessions` for a session the
    /// caller already holds the record for. `None` is the common case
    /// (fresh `getOrCreateSession` call).
    pub prebuilt_metadata: Option<String>,
}

/// Result of a successful startup.
pub struct StartupOutcome {
    /// The ready supervisor, not yet driving any turns.
    pub supervisor: Arc<SessionSupervisor>,
    /// The backend-confirmed (or offline-synthesized) session record.
    pub session: Session,
    /// Session-scoped symmetric key, derived locally from credentials.
    pub session_key: [u8; 32],
    /// A clone of the session-scoped sync link, for the local-mode
    /// transcript forwarder.
    pub sync: SessionSyncClient,
    /// Fires once per message landing on the supervisor's queue; the
    /// local-mode branch uses this to notice an incoming remote message.
    pub queue_notify: Arc<Notify>,
    /// Operator-requested starting surface, carried through to
    /// [`run_mode_loop`].
    pub starting_surface: Mode,
}

/// Run the full per-session startup sequence.
///
/// # Errors
///
/// Returns [`SessionError::FatalStartupError`] if no `machineId` has
/// been persisted to `settings.json` yet (onboarding has not run).
pub async fn run_startup(ctx: StartupContext) -> SessionResult<StartupOutcome> {
    let settings = Settings::load(&ctx.home.settings_path());
    let machine_id = settings.machine_id.ok_or_else(|| {
        SessionError::FatalStartupError("no machineId in settings.json; run onboarding first".into())
    })?;

    let server_url = ctx.server_url.clone().unwrap_or_default();
    let backend = BackendClient::new(server_url.clone(), ctx.credentials.token.clone());

    let machine_metadata = serde_json::json!({
        "host": settings.machine_host,
        "platform": std::env::consts::OS,
    });
    register_machine(&backend, machine_id, &machine_metadata).await;

    let metadata = SessionMetadata {
        host: settings.machine_host.clone().unwrap_or_else(|| "unknown-host".into()),
        path: ctx.cwd.display().to_string(),
        flavor: ctx.flavor.clone(),
        lifecycle: SessionLifecycle::Running,
    };
    let tag = ctx.resume_session_id.unwrap_or_else(Uuid::new_v4);
    let session = match decode_prebuilt_session(ctx.prebuilt_metadata.as_deref()) {
        Some(session) => {
            info!(session_id = %session.id, "using pre-decrypted --metadata bootstrap, skipping session registration");
            session
        }
        None => match get_or_create_session(&backend, tag, &metadata, &ctx.credentials.encryption).await {
            Some(session) => session,
            // getOrCreateSession is offline-tolerant but, unlike
            // getOrCreateMachine, does not itself synthesize anything
            // (§8 property 3 / E2): a `null` result here means the
            // caller — this startup sequence — is responsible for
            // proceeding with a locally-synthesized session so the
            // supervisor still has something to run against offline.
            None => synthesize_session(tag, metadata.clone(), &ctx.credentials.encryption),
        },
    };
    let session_key = session_symmetric_key(&ctx.credentials.encryption);

    let sync = SessionSyncClient::spawn(
        session_sync_url(&server_url),
        session.id.to_string(),
        ctx.credentials.token.clone(),
        session_key,
    );

    let broker = Arc::new(PermissionBroker::new(happy_core::env::permission_timeout()));
    // The supervisor's internal mode is a hash-partition key for turn
    // batching, not the top-level local/remote surface (that's
    // `starting_surface`, tracked independently by `run_mode_loop`). Every
    // real user message enqueued via `on_user_message` is tagged
    // `Mode::Remote`, so seeding with anything else would make the first
    // genuine remote message look like a mode change and get swallowed as
    // a resume hint.
    let supervisor = Arc::new(SessionSupervisor::new(
        sync.clone(),
        broker.clone(),
        Mode::Remote,
        ctx.cwd.display().to_string(),
    ));

    let queue_notify = Arc::new(Notify::new());
    register_handlers(&sync, &supervisor, &broker, &queue_notify).await;

    notify_daemon(&ctx.home, &session, &ctx.cwd).await;

    Ok(StartupOutcome {
        supervisor,
        session,
        session_key,
        sync,
        queue_notify,
        starting_surface: ctx.starting_surface,
    })
}

/// Drive the top-level local/remote mode loop until the session exits
/// for good. `make_driver` builds a fresh [`AgentDriver`] each time the
/// loop enters remote mode.
///
/// # Errors
///
/// Propagates any error from the remote turn loop or the local branch.
pub async fn run_mode_loop(
    outcome: &StartupOutcome,
    rollout_root: PathBuf,
    local_agent_exe: PathBuf,
    mut make_driver: impl FnMut() -> Box<dyn AgentDriver>,
) -> SessionResult<()> {
    let mut surface = outcome.starting_surface;
    loop {
        let reason = match surface {
            Mode::Local => {
                outcome.sync.set_mode("local");
                crate::local::run_local_branch(outcome, &rollout_root, &local_agent_exe).await?
            }
            Mode::Remote => {
                outcome.sync.set_mode("remote");
                let mut driver = make_driver();
                let agent_version = driver
                    .connect()
                    .await
                    .map_err(|e| SessionError::FatalStartupError(format!("agent driver failed to connect: {e}")))?;
                outcome.supervisor.set_agent_version(agent_version).await;
                outcome.supervisor.run_remote_loop(driver.as_mut()).await?;
                ExitReason::Exit
            }
        };
        match reason {
            ExitReason::Switch => {
                surface = match surface {
                    Mode::Local => Mode::Remote,
                    Mode::Remote => Mode::Local,
                };
            }
            ExitReason::Exit => break,
        }
    }
    Ok(())
}

async fn register_handlers(
    sync: &SessionSyncClient,
    supervisor: &Arc<SessionSupervisor>,
    broker: &Arc<PermissionBroker>,
    queue_notify: &Arc<Notify>,
) {
    let queue = supervisor.queue();
    {
        let queue = queue.clone();
        sync.on_user_message(move |value| {
            let text = value.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            queue.push(text, Mode::Remote);
        })
        .await;
    }
    queue.set_on_message({
        let queue_notify = queue_notify.clone();
        move || queue_notify.notify_one()
    });

    {
        let supervisor = supervisor.clone();
        sync.register_handler("abort", move |_params| {
            let supervisor = supervisor.clone();
            async move {
                supervisor.abort_current_turn().await;
                serde_json::json!({"ok": true})
            }
        })
        .await;
    }

    {
        let supervisor = supervisor.clone();
        sync.register_handler("switch", move |_params| {
            let supervisor = supervisor.clone();
            async move {
                supervisor.request_exit(ExitReason::Switch).await;
                serde_json::json!({"ok": true})
            }
        })
        .await;
    }

    {
        let broker = broker.clone();
        sync.register_handler("permission", move |params| {
            let broker = broker.clone();
            async move {
                match serde_json::from_value::<happy_approval::PermissionResponse>(params) {
                    Ok(response) => {
                        broker.resolve(response);
                        serde_json::json!({"ok": true})
                    }
                    Err(e) => serde_json::json!({"ok": false, "error": e.to_string()}),
                }
            }
        })
        .await;
    }
}

async fn register_machine(backend: &BackendClient, machine_id: Uuid, metadata: &serde_json::Value) {
    match backend.get_or_create_machine(machine_id, metadata, None, None).await {
        Ok(_machine) => {}
        Err(RestError::EndpointMissing) => {
            info!("machine registration endpoint unavailable, continuing offline");
        }
        Err(err) => {
            warn_offline_once();
            warn!(error = %err, "machine registration failed, continuing offline");
        }
    }
}

/// `getOrCreateSession` (§4.3/§8 property 3): registers (or confirms)
/// this session's backend record. Returns `None`, never a synthesized
/// stand-in, when the backend is unreachable — unlike
/// [`register_machine`]'s `getOrCreateMachine`, this call synthesizes
/// nothing itself (E2: "returns `null`... working in offline mode").
async fn get_or_create_session(
    backend: &BackendClient,
    tag: Uuid,
    metadata: &SessionMetadata,
    encryption: &EncryptionDescriptor,
) -> Option<Session> {
    let metadata_value = serde_json::to_value(metadata).expect("SessionMetadata always serializes");
    let data_encryption_key = wrapped_data_encryption_key_b64(encryption);
    match backend
        .get_or_create_session(tag, &metadata_value, &serde_json::json!({}), data_encryption_key.as_deref())
        .await
    {
        Ok(session) => Some(session),
        Err(RestError::EndpointMissing) => {
            info!("session registration endpoint unavailable, continuing offline");
            None
        }
        Err(err) => {
            warn_offline_once();
            warn!(error = %err, "session registration failed, continuing offline");
            None
        }
    }
}

/// Decode `--metadata`'s base64 JSON [`Session`] bootstrap payload, if
/// present and well-formed. Malformed input falls back to `None` rather
/// than a fatal error — a fresh `getOrCreateSession` round trip is
/// always a safe recovery since `tag` makes it idempotent.
fn decode_prebuilt_session(raw: Option<&str>) -> Option<Session> {
    let raw = raw?;
    let bytes = happy_crypto::decode_b64(raw).ok()?;
    match serde_json::from_slice::<Session>(&bytes) {
        Ok(session) => Some(session),
        Err(e) => {
            warn!(error = %e, "ignoring malformed --metadata bootstrap payload");
            None
        }
    }
}

fn synthesize_session(tag: Uuid, metadata: SessionMetadata, encryption: &EncryptionDescriptor) -> Session {
    let (encryption_key, encryption_variant) = local_key_b64(encryption);
    Session {
        id: tag,
        tag,
        seq: 0,
        metadata,
        metadata_version: 0,
        agent_state: happy_core::AgentState::default(),
        agent_state_version: 0,
        encryption_key,
        encryption_variant,
    }
}

fn local_key_b64(encryption: &EncryptionDescriptor) -> (String, happy_core::EncryptionVariant) {
    match encryption {
        EncryptionDescriptor::Legacy { key } => {
            (happy_crypto::encode_b64(key.as_bytes()), happy_core::EncryptionVariant::Legacy)
        }
        EncryptionDescriptor::DataKey { content_key, .. } => {
            (happy_crypto::encode_b64(content_key.as_bytes()), happy_core::EncryptionVariant::DataKey)
        }
    }
}

/// Derive the 32-byte symmetric key actually used to encrypt/decrypt
/// this session's envelopes. Lives here rather than in `happy-core`
/// because that crate has no knowledge of the crypto layer (see its
/// crate-level doc comment) — see `DESIGN.md` for the full rationale.
fn session_symmetric_key(encryption: &EncryptionDescriptor) -> [u8; 32] {
    let bytes = match encryption {
        EncryptionDescriptor::Legacy { key } => key.as_bytes(),
        EncryptionDescriptor::DataKey { content_key, .. } => content_key.as_bytes(),
    };
    let mut out = [0u8; 32];
    let len = bytes.len().min(32);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

/// Wrap the content key under the backend's public key for the
/// `dataKey` variant's `dataEncryptionKey` REST parameter (§6.4: base64
/// of `0x00 ‖ wrappedContentKey`). `None` for the `legacy` variant.
fn wrapped_data_encryption_key_b64(encryption: &EncryptionDescriptor) -> Option<String> {
    match encryption {
        EncryptionDescriptor::Legacy { .. } => None,
        EncryptionDescriptor::DataKey { content_key, backend_public_key, .. } => {
            happy_crypto::wrap_content_key(content_key.as_bytes(), backend_public_key.as_bytes())
                .ok()
                .map(|wrapped| happy_crypto::encode_b64(&wrapped))
        }
    }
}

fn session_sync_url(server_url: &str) -> String {
    if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{rest}/session-sync")
    } else if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{rest}/session-sync")
    } else {
        format!("ws://{server_url}/session-sync")
    }
}

async fn notify_daemon(home: &HappyHome, session: &Session, cwd: &std::path::Path) {
    let Some(state) = happy_core::read_json_tolerant::<DaemonStateFile>(&home.daemon_state_path()) else {
        tracing::debug!("no daemon state file found, skipping self-registration webhook");
        return;
    };
    let url = format!("http://127.0.0.1:{}", state.http_port);
    let Ok(client) = HttpClientBuilder::default().build(&url) else {
        warn!("failed to build loopback client for self-registration webhook");
        return;
    };
    let body = SessionStartedBody {
        session_id: session.id,
        metadata: serde_json::json!({
            "hostPid": std::process::id(),
            "cwd": cwd.display().to_string(),
        }),
    };
    if let Err(err) = LoopbackRpcClient::session_started(&client, body).await {
        warn!(error = %err, "failed to notify daemon of session start");
    }
}
