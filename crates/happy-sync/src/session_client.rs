//! Session-scoped real-time link (§4.3).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use happy_queue::{AsyncLock, Backoff, RetryDecision, backoff};
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{SyncError, SyncResult};
use crate::handler_table::HandlerTable;
use crate::protocol::{Frame, MetadataField, UpdateBody, WriteAck, apply_if_newer};
use crate::transport::RealtimeLink;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(2);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Callback invoked once per delivered user message (§4.3 "single-shot callback").
pub type UserMessageCallback = Box<dyn Fn(serde_json::Value) + Send + Sync>;

struct PendingAck {
    sender: oneshot::Sender<Frame>,
}

struct Shared {
    session_id: String,
    token: String,
    key: [u8; 32],
    outbound: mpsc::UnboundedSender<Frame>,
    handlers: HandlerTable,
    pending_acks: Mutex<std::collections::HashMap<String, PendingAck>>,
    metadata_lock: AsyncLock,
    agent_state_lock: AsyncLock,
    metadata_version: AtomicI64,
    agent_state_version: AtomicI64,
    metadata_value: Mutex<serde_json::Value>,
    agent_state_value: Mutex<serde_json::Value>,
    on_user_message: RwLock<Option<UserMessageCallback>>,
    next_id: AtomicI64,
    /// Current `thinking`/`mode` projection reported by every keep-alive
    /// ping until the supervisor updates it again (§4.3 `keepAlive`,
    /// §4.6 core state).
    thinking: AtomicBool,
    mode: StdMutex<String>,
    /// Fired by [`SessionSyncClient::close`]; stops the reconnect and
    /// keep-alive loops so a session that has torn itself down (§4.6
    /// "Cleanup ordering on shutdown") stops holding the socket open.
    shutdown: CancellationToken,
}

impl Shared {
    fn fresh_id(&self) -> String {
        format!("{}-{}", self.session_id, self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

/// Authenticated, auto-reconnecting, encrypted link scoped to one
/// session (§4.3).
#[derive(Clone)]
pub struct SessionSyncClient {
    shared: Arc<Shared>,
}

impl SessionSyncClient {
    /// Connect to `url` and start the background reconnect/keep-alive
    /// loop. Returns immediately; the first connection attempt happens
    /// asynchronously.
    #[must_use]
    pub fn spawn(url: impl Into<String>, session_id: impl Into<String>, token: impl Into<String>, key: [u8; 32]) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            session_id: session_id.into(),
            token: token.into(),
            key,
            outbound: outbound_tx,
            handlers: HandlerTable::default(),
            pending_acks: Mutex::new(std::collections::HashMap::new()),
            metadata_lock: AsyncLock::new(),
            agent_state_lock: AsyncLock::new(),
            metadata_version: AtomicI64::new(0),
            agent_state_version: AtomicI64::new(0),
            metadata_value: Mutex::new(serde_json::Value::Null),
            agent_state_value: Mutex::new(serde_json::Value::Null),
            on_user_message: RwLock::new(None),
            next_id: AtomicI64::new(0),
            thinking: AtomicBool::new(false),
            mode: StdMutex::new("remote".to_string()),
            shutdown: CancellationToken::new(),
        });

        let client = Self { shared: shared.clone() };
        let url = url.into();
        tokio::spawn(run_loop(url, shared, outbound_rx));
        tokio::spawn(keep_alive_loop(client.clone()));
        client
    }

    /// Stop the reconnect and keep-alive loops and detach from the
    /// transport (§4.3 "`close()` simply detaches" — there is no server
    /// handshake for this). Idempotent.
    pub fn close(&self) {
        self.shared.shutdown.cancel();
    }

    /// Register the single-shot callback fired once per delivered user message.
    pub async fn on_user_message(&self, callback: impl Fn(serde_json::Value) + Send + Sync + 'static) {
        *self.shared.on_user_message.write().await = Some(Box::new(callback));
    }

    /// Register an RPC handler. Namespaced automatically with the session id.
    pub async fn register_handler<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = serde_json::Value> + Send + 'static,
    {
        let namespaced = format!("{}:{}", self.shared.session_id, method.into());
        self.shared.handlers.register(namespaced.clone(), handler).await;
        let _ = self.shared.outbound.send(Frame::RpcRegister { method: namespaced });
    }

    /// Encrypt and transmit `content` as an agent message.
    pub fn send_agent_message(&self, content: &serde_json::Value) -> SyncResult<()> {
        let encrypted = happy_crypto::encrypt(&self.shared.key, content)
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        self.emit(Frame::Message {
            session_id: self.shared.session_id.clone(),
            content_encrypted: happy_crypto::encode_b64(&encrypted),
        })
    }

    /// Emit a session event (`switch`, `message`, `permission-mode-changed`, `ready`).
    pub fn send_session_event(&self, event: &serde_json::Value) -> SyncResult<()> {
        let envelope = serde_json::json!({
            "role": "agent",
            "content": {"id": self.shared.fresh_id(), "type": "event", "data": event},
        });
        self.send_agent_message(&envelope)
    }

    /// Transform and emit a usage report.
    pub fn send_usage_report(&self, usage: &serde_json::Value) -> SyncResult<()> {
        self.emit(Frame::UsageReport {
            body: serde_json::json!({"key": self.shared.fresh_id(), "sessionId": self.shared.session_id, "usage": usage}),
        })
    }

    /// Best-effort terminal marker.
    pub fn send_session_death(&self) {
        let _ = self.emit(Frame::UsageReport {
            body: serde_json::json!({"sessionId": self.shared.session_id, "event": "death"}),
        });
    }

    /// Unreliable keep-alive ping.
    pub fn keep_alive(&self, thinking: bool, mode: &str) -> SyncResult<()> {
        self.emit(Frame::Ping {
            id: None,
            extra: serde_json::json!({"thinking": thinking, "mode": mode}),
        })
    }

    /// Update the `thinking` flag the background keep-alive loop reports
    /// on every subsequent ping, until set again.
    pub fn set_thinking(&self, thinking: bool) {
        self.shared.thinking.store(thinking, Ordering::SeqCst);
    }

    /// Update the mode label the background keep-alive loop reports on
    /// every subsequent ping, until set again.
    pub fn set_mode(&self, mode: impl Into<String>) {
        *self.shared.mode.lock().expect("session sync mode lock poisoned") = mode.into();
    }

    /// `flush()`: send an acked ping, resolve on ack or a 10 s timeout.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::FlushTimeout`] if no ack arrives in time.
    pub async fn flush(&self) -> SyncResult<()> {
        let id = self.shared.fresh_id();
        let rx = self.register_pending(id.clone()).await;
        self.emit(Frame::Ping { id: Some(id), extra: serde_json::json!({}) })?;
        match tokio::time::timeout(FLUSH_TIMEOUT, rx).await {
            Ok(Ok(_)) => Ok(()),
            _ => Err(SyncError::FlushTimeout),
        }
    }

    /// Optimistic-concurrency metadata write, serialized through an
    /// async lock and wrapped in full-jitter backoff so a
    /// version-mismatch triggers a full retry against the adopted state.
    pub async fn update_metadata(&self, apply: impl Fn(&serde_json::Value) -> serde_json::Value + Send + Sync) -> SyncResult<serde_json::Value> {
        self.optimistic_write(
            MetadataField::Metadata,
            &self.shared.metadata_lock,
            &self.shared.metadata_version,
            &self.shared.metadata_value,
            apply,
        )
        .await
    }

    /// Optimistic-concurrency agent-state write; same contract as
    /// [`Self::update_metadata`].
    pub async fn update_agent_state(&self, apply: impl Fn(&serde_json::Value) -> serde_json::Value + Send + Sync) -> SyncResult<serde_json::Value> {
        self.optimistic_write(
            MetadataField::AgentState,
            &self.shared.agent_state_lock,
            &self.shared.agent_state_version,
            &self.shared.agent_state_value,
            apply,
        )
        .await
    }

    async fn optimistic_write(
        &self,
        field: MetadataField,
        lock: &AsyncLock,
        version_cell: &AtomicI64,
        value_cell: &Mutex<serde_json::Value>,
        apply: impl Fn(&serde_json::Value) -> serde_json::Value + Send + Sync,
    ) -> SyncResult<serde_json::Value> {
        lock.in_lock(|| async {
            backoff(|| async {
                let expected_version = version_cell.load(Ordering::SeqCst);
                let current_value = value_cell.lock().await.clone();
                let new_value = apply(&current_value);
                let encrypted = match happy_crypto::encrypt(&self.shared.key, &new_value) {
                    Ok(bytes) => happy_crypto::encode_b64(&bytes),
                    Err(e) => return Err((SyncError::Transport(e.to_string()), RetryDecision::Permanent)),
                };

                let id = self.shared.fresh_id();
                let rx = self.register_pending(id.clone()).await;
                if self
                    .emit(Frame::UpdateMetadata { id, field, expected_version, encrypted_value: encrypted })
                    .is_err()
                {
                    return Err((SyncError::Transport("link unavailable".into()), RetryDecision::Retry));
                }

                let Ok(Frame::WriteAck { ack, .. }) = rx.await else {
                    return Err((SyncError::Transport("write ack channel closed".into()), RetryDecision::Retry));
                };

                match ack {
                    WriteAck::Success { version, .. } => {
                        version_cell.store(version, Ordering::SeqCst);
                        *value_cell.lock().await = new_value.clone();
                        Ok(new_value)
                    }
                    WriteAck::VersionMismatch { version, encrypted_value } => {
                        version_cell.store(version, Ordering::SeqCst);
                        if let Some(adopted) = happy_crypto::decode_b64(&encrypted_value)
                            .ok()
                            .and_then(|bytes| happy_crypto::decrypt::<serde_json::Value>(&self.shared.key, &bytes).ok().flatten())
                        {
                            *value_cell.lock().await = adopted;
                        }
                        Err((SyncError::VersionMismatch { server_version: version }, RetryDecision::Retry))
                    }
                    WriteAck::Error { message } => {
                        Err((SyncError::Transport(message), RetryDecision::Permanent))
                    }
                }
            })
            .await
        })
        .await
    }

    async fn register_pending(&self, id: String) -> oneshot::Receiver<Frame> {
        let (tx, rx) = oneshot::channel();
        self.shared.pending_acks.lock().await.insert(id, PendingAck { sender: tx });
        rx
    }

    fn emit(&self, frame: Frame) -> SyncResult<()> {
        self.shared
            .outbound
            .send(frame)
            .map_err(|_| SyncError::Transport("sync client run loop has stopped".into()))
    }
}

async fn keep_alive_loop(client: SessionSyncClient) {
    let mut interval = tokio::time::interval(KEEP_ALIVE_INTERVAL);
    loop {
        tokio::select! {
            () = client.shared.shutdown.cancelled() => return,
            _ = interval.tick() => {
                let thinking = client.shared.thinking.load(Ordering::SeqCst);
                let mode = client.shared.mode.lock().expect("session sync mode lock poisoned").clone();
                let _ = client.keep_alive(thinking, &mode);
            }
        }
    }
}

async fn run_loop(url: String, shared: Arc<Shared>, mut outbound_rx: mpsc::UnboundedReceiver<Frame>) {
    let mut policy = Backoff::default();
    loop {
        if shared.shutdown.is_cancelled() {
            return;
        }
        let mut link = tokio::select! {
            () = shared.shutdown.cancelled() => return,
            connected = RealtimeLink::connect(&url) => match connected {
                Ok(link) => link,
                Err(e) => {
                    tracing::warn!(error = %e, "session sync link connect failed, backing off");
                    tokio::time::sleep(policy.next_delay()).await;
                    continue;
                }
            },
        };
        policy.reset();

        let auth = serde_json::json!({
            "token": shared.token,
            "clientType": "session-scoped",
            "sessionId": shared.session_id,
        });
        if link.send(&auth).await.is_err() {
            continue;
        }
        for method in shared.handlers.registered_methods().await {
            let _ = link.send(&serde_json::to_value(Frame::RpcRegister { method }).unwrap()).await;
        }

        loop {
            tokio::select! {
                () = shared.shutdown.cancelled() => return,
                outbound = outbound_rx.recv() => {
                    let Some(frame) = outbound else { return };
                    let Ok(value) = serde_json::to_value(&frame) else { continue };
                    if link.send(&value).await.is_err() {
                        break;
                    }
                }
                inbound = link.recv() => {
                    match inbound {
                        Ok(Some(value)) => {
                            if let Ok(frame) = serde_json::from_value::<Frame>(value) {
                                handle_inbound(&shared, &mut link, frame).await;
                            }
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
            }
        }
    }
}

fn decrypt_field(key: &[u8; 32], encrypted: Option<&str>) -> Option<serde_json::Value> {
    let bytes = happy_crypto::decode_b64(encrypted?).ok()?;
    happy_crypto::decrypt::<serde_json::Value>(key, &bytes).ok().flatten()
}

async fn handle_inbound(shared: &Arc<Shared>, link: &mut RealtimeLink, frame: Frame) {
    match frame {
        Frame::Update { body: UpdateBody::NewMessage { content_encrypted } } => {
            let Some(bytes) = happy_crypto::decode_b64(&content_encrypted).ok() else { return };
            let Ok(Some(value)) = happy_crypto::decrypt::<serde_json::Value>(&shared.key, &bytes) else { return };
            if let Some(callback) = shared.on_user_message.read().await.as_ref() {
                callback(value);
            }
        }
        Frame::Update {
            body:
                UpdateBody::UpdateSession {
                    metadata_encrypted,
                    metadata_version,
                    agent_state_encrypted,
                    agent_state_version,
                },
        } => {
            if let Some(v) = metadata_version {
                let current = shared.metadata_version.load(Ordering::SeqCst);
                if let Some((value, version)) = apply_if_newer(current, v, metadata_encrypted).and_then(|(enc, version)| {
                    decrypt_field(&shared.key, enc.as_deref()).map(|value| (value, version))
                }) {
                    shared.metadata_version.store(version, Ordering::SeqCst);
                    *shared.metadata_value.lock().await = value;
                }
            }
            if let Some(v) = agent_state_version {
                let current = shared.agent_state_version.load(Ordering::SeqCst);
                if let Some((value, version)) = apply_if_newer(current, v, agent_state_encrypted).and_then(|(enc, version)| {
                    decrypt_field(&shared.key, enc.as_deref()).map(|value| (value, version))
                }) {
                    shared.agent_state_version.store(version, Ordering::SeqCst);
                    *shared.agent_state_value.lock().await = value;
                }
            }
        }
        Frame::Update { body: UpdateBody::UpdateMachine { .. } } => {
            tracing::debug!("update-machine on session link, ignoring");
        }
        Frame::RpcRequest { id, method, params_encrypted } => {
            let reply = match happy_crypto::decode_b64(&params_encrypted)
                .ok()
                .and_then(|bytes| happy_crypto::decrypt::<serde_json::Value>(&shared.key, &bytes).ok().flatten())
            {
                Some(params) => match shared.handlers.dispatch(&method, params).await {
                    Some(result) => result,
                    None => serde_json::json!({"error": "Method not found"}),
                },
                None => serde_json::json!({"error": "failed to decrypt params"}),
            };
            if let Ok(bytes) = happy_crypto::encrypt(&shared.key, &reply) {
                let _ = link
                    .send(&serde_json::json!({
                        "type": "rpc-response",
                        "id": id,
                        "result_encrypted": happy_crypto::encode_b64(&bytes),
                    }))
                    .await;
            }
        }
        Frame::WriteAck { .. } | Frame::Pong { .. } => {
            let id = match &frame {
                Frame::WriteAck { id, .. } | Frame::Pong { id } => id.clone(),
                _ => unreachable!(),
            };
            if let Some(pending) = shared.pending_acks.lock().await.remove(&id) {
                let _ = pending.sender.send(frame);
            }
        }
        _ => {}
    }
}
