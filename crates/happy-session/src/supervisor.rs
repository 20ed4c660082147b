//! The session supervisor's turn loop (§4.6).
//!
//! [`SessionSupervisor`] owns the mode-loop state machine: the current
//! [`Mode`], sticky overrides, the abort signal, and exit bookkeeping.
//! The remote-mode turn loop is the
//! most intricate piece: it drains [`happy_queue::ModeQueue`] batches,
//! tears down and resumes on a mode-hash mismatch, and routes every
//! driver notification to the sync link while elicitations go through
//! the [`happy_approval::PermissionBroker`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use happy_approval::{PermissionBroker, PermissionResult, map_response_to_decision};
use happy_core::version::Version;
use happy_queue::ModeQueue;
use happy_sync::session_client::SessionSyncClient;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::agent_driver::{
    AgentDriver, DriverEvent, ElicitationKind, ElicitationRequest, StartSessionParams,
    encode_elicitation_response,
};
use crate::error::{SessionError, SessionResult};
use crate::mode::{ExitReason, Mode, StickyOverrides};
use crate::policy::{self, PermissionMode};

/// Hard cap on cleanup at session end (§5, §9).
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-turn mutable state threaded through the remote loop.
struct RunState {
    mode: Mode,
    overrides: StickyOverrides,
    should_exit: bool,
    exit_reason: Option<ExitReason>,
    /// Set when a mode-hash mismatch tears a turn down mid-flight; carried
    /// into the next `start_session` as the resume path.
    resume_hint: Option<String>,
    /// Whether `start_session` has been called yet on the current driver
    /// connection; later turns use `continue_session` instead.
    turn_started: bool,
}

/// Coordinates one running session's mode loop, independent of whether
/// the agent is currently attached to a local TTY or driven remotely.
pub struct SessionSupervisor {
    sync: SessionSyncClient,
    broker: Arc<PermissionBroker>,
    cwd: String,
    queue: Arc<ModeQueue<Mode>>,
    /// Cancelled exactly once, by [`Self::request_exit`], to unblock a
    /// `wait_for_batch` parked with an empty queue.
    shutdown: CancellationToken,
    /// Replaced at the start of every turn; cancelling this aborts only
    /// the in-flight turn (§9 "abort vs kill" — never the sync link,
    /// loopback server, or MCP transport).
    turn_abort: Mutex<CancellationToken>,
    state: Mutex<RunState>,
    agent_version: Mutex<Version>,
    offline: AtomicBool,
}

impl SessionSupervisor {
    /// Build a supervisor around an already-connected sync link and
    /// permission broker, starting in `initial_mode`. `cwd` is the
    /// working directory the agent driver is started with.
    #[must_use]
    pub fn new(
        sync: SessionSyncClient,
        broker: Arc<PermissionBroker>,
        initial_mode: Mode,
        cwd: impl Into<String>,
    ) -> Self {
        let queue = Arc::new(ModeQueue::default());
        Self {
            sync,
            broker,
            cwd: cwd.into(),
            queue,
            shutdown: CancellationToken::new(),
            turn_abort: Mutex::new(CancellationToken::new()),
            state: Mutex::new(RunState {
                mode: initial_mode,
                overrides: StickyOverrides::default(),
                should_exit: false,
                exit_reason: None,
                resume_hint: None,
                turn_started: false,
            }),
            agent_version: Mutex::new(Version::new(0, 0, 0)),
            offline: AtomicBool::new(false),
        }
    }

    /// The queue user messages and remote RPCs are pushed onto.
    #[must_use]
    pub fn queue(&self) -> Arc<ModeQueue<Mode>> {
        self.queue.clone()
    }

    /// Cancellation token for the overall mode loop (cancelled once the
    /// process is shutting down); not the per-turn abort signal.
    #[must_use]
    pub fn abort_signal(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Abort only the currently in-flight turn, if any. Used when the
    /// operator explicitly cancels a turn or a mode switch preempts it.
    pub async fn abort_current_turn(&self) {
        self.turn_abort.lock().await.cancel();
    }

    /// Record the connected agent driver's version, used to gate
    /// elicitation response shape (§6.3).
    pub async fn set_agent_version(&self, version: Version) {
        *self.agent_version.lock().await = version;
    }

    /// Seed the resume path the first `start_session` call will carry,
    /// for a cold start into a prior rollout (`happy codex resume`)
    /// rather than the mid-session mode-switch carry that normally
    /// populates it.
    pub async fn set_resume_hint(&self, path: String) {
        self.state.lock().await.resume_hint = Some(path);
    }

    /// Request the mode loop exit after the current turn settles.
    pub async fn request_exit(&self, reason: ExitReason) {
        let mut state = self.state.lock().await;
        state.should_exit = true;
        state.exit_reason = Some(reason);
        drop(state);
        self.shutdown.cancel();
        self.turn_abort.lock().await.cancel();
    }

    /// Current mode.
    pub async fn mode(&self) -> Mode {
        self.state.lock().await.mode
    }

    /// Drive the remote-mode turn loop until `request_exit` is called or
    /// the driver's event stream ends.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AgentCrash`] if the driver's stream ends
    /// outside of a deliberate abort, or propagates a driver error from
    /// `start_session`/`continue_session`.
    pub async fn run_remote_loop(&self, driver: &mut dyn AgentDriver) -> SessionResult<()> {
        loop {
            let Some(batch) = self.queue.wait_for_batch(&self.shutdown).await else {
                break;
            };

            let mut state = self.state.lock().await;
            if state.should_exit {
                break;
            }
            let mode_changed = batch.mode != state.mode;
            if mode_changed {
                // A mode change always starts a fresh turn: carry the
                // batch as a resume hint rather than silently dropping it.
                state.mode = batch.mode;
                state.resume_hint = Some(batch.text.clone());
                state.turn_started = false;
                tracing::info!(new_mode = ?state.mode, "mode changed, starting fresh turn");
                drop(state);
                continue;
            }
            let resume_hint = state.resume_hint.take();
            let fresh_turn = !state.turn_started;
            state.turn_started = true;
            drop(state);

            // Fresh per-turn abort signal; aborting one turn must never
            // poison the next `wait_for_batch` (that's `shutdown`'s job).
            *self.turn_abort.lock().await = CancellationToken::new();

            match self.run_one_turn(driver, &batch.text, fresh_turn, resume_hint).await {
                Ok(()) => {}
                Err(SessionError::AbortError(reason)) => {
                    tracing::info!(%reason, "turn aborted");
                }
                Err(other) => return Err(other),
            }

            if self.state.lock().await.should_exit {
                break;
            }
        }

        self.cleanup(driver).await;
        Ok(())
    }

    /// Run one turn to completion, then unconditionally apply the
    /// per-turn `finally` (§4.6 step 6, §9): reset the permission broker
    /// so no request outlives the turn it belonged to, clear `thinking`,
    /// and push a keep-alive — regardless of whether the turn returned
    /// `Ok`, aborted, or crashed.
    async fn run_one_turn(
        &self,
        driver: &mut dyn AgentDriver,
        prompt: &str,
        fresh_turn: bool,
        resume_path: Option<String>,
    ) -> SessionResult<()> {
        let result = self.run_turn_body(driver, prompt, fresh_turn, resume_path).await;

        self.broker.reset();
        self.sync.set_thinking(false);
        let _ = self.sync.keep_alive(false, "remote");

        result
    }

    async fn run_turn_body(
        &self,
        driver: &mut dyn AgentDriver,
        prompt: &str,
        fresh_turn: bool,
        resume_path: Option<String>,
    ) -> SessionResult<()> {
        let overrides = self.state.lock().await.overrides.clone();
        if fresh_turn {
            let permission_mode = overrides
                .permission_mode
                .as_deref()
                .and_then(|s| serde_json::from_value::<PermissionMode>(serde_json::Value::String(s.to_string())).ok())
                .unwrap_or(PermissionMode::Default);
            let (approval_policy, sandbox) = policy::approval_policy_and_sandbox(permission_mode);
            let params = StartSessionParams {
                prompt: prompt.to_string(),
                sandbox,
                approval_policy,
                config: serde_json::json!({"mcp_servers": {}}),
                cwd: self.cwd.clone(),
                model: overrides.model.clone(),
                resume_path,
            };
            driver.start_session(params).await?;
        } else {
            driver.continue_session(prompt).await?;
        }

        let turn_abort = self.turn_abort.lock().await.clone();
        loop {
            tokio::select! {
                () = turn_abort.cancelled() => {
                    return Err(SessionError::AbortError("turn aborted".into()));
                }
                event = driver.next_event() => {
                    let Some(event) = event else {
                        return Err(SessionError::AgentCrash("agent driver stream ended".into()));
                    };
                    match event {
                        DriverEvent::Notification(notification) => {
                            let done = self.route_notification(&notification).await;
                            if done {
                                return Ok(());
                            }
                        }
                        DriverEvent::Elicitation(request) => {
                            self.route_elicitation(driver, request).await;
                        }
                    }
                }
            }
        }
    }

    async fn route_notification(&self, notification: &crate::agent_driver::AgentNotification) -> bool {
        use crate::agent_driver::AgentNotification as N;
        let (event_name, body, terminal) = match notification {
            N::AgentMessage { body } => ("agent-message", body, false),
            N::AgentReasoningDelta { body } => ("agent-reasoning-delta", body, false),
            N::ExecCommandBegin { body } => ("exec-command-begin", body, false),
            N::ExecCommandEnd { body } => ("exec-command-end", body, false),
            N::PatchApplyBegin { body } => ("patch-apply-begin", body, false),
            N::PatchApplyEnd { body } => ("patch-apply-end", body, false),
            N::TurnDiff { body } => ("turn-diff", body, false),
            N::TokenCount { body } => {
                let _ = self.sync.send_usage_report(body);
                return false;
            }
            N::TaskStarted { body } => {
                self.sync.set_thinking(true);
                let _ = self.sync.keep_alive(true, "remote");
                ("task-started", body, false)
            }
            N::TaskComplete { body } => ("task-complete", body, true),
            N::TurnAborted { body } => ("turn-aborted", body, true),
        };
        let event = serde_json::json!({"type": event_name, "data": body});
        if let Err(e) = self.sync.send_session_event(&event) {
            tracing::warn!(error = %e, "failed to forward agent event over sync link");
        }
        if terminal {
            // §4.6 step 4: `task_complete`/`turn_aborted` clear `thinking`
            // and emit a `ready` session event in addition to forwarding
            // the terminal notification itself. The external push
            // notification this also triggers is out of this core's
            // scope (§1).
            self.sync.set_thinking(false);
            if let Err(e) = self.sync.send_session_event(&serde_json::json!({"type": "ready"})) {
                tracing::warn!(error = %e, "failed to emit ready session event");
            }
        }
        terminal
    }

    async fn route_elicitation(&self, driver: &mut dyn AgentDriver, request: ElicitationRequest) {
        let tool = match request.codex_elicitation {
            ElicitationKind::ExecApproval => "Bash",
            ElicitationKind::PatchApproval => "ApplyPatch",
        };
        let input = serde_json::json!({
            "message": request.message,
            "command": request.codex_command,
            "cwd": request.codex_cwd,
            "changes": request.codex_changes,
        });

        let broker = self.broker.clone();
        let call_id = request.codex_call_id.clone();
        let spawn_call_id = call_id.clone();
        let tool_owned = tool.to_string();
        let handle = tokio::spawn(async move { broker.handle_tool_call(&spawn_call_id, &tool_owned, input).await });

        // `handle_tool_call` registers the pending entry in `agent_state.requests`
        // before it awaits a response; yield once so that registration has run,
        // then project it onto the wire so a remote operator can see the
        // pending request (§4.5 state projection, testable property 5/E3).
        tokio::task::yield_now().await;
        self.publish_agent_state().await;

        let result: PermissionResult = match handle.await {
            Ok(result) => result,
            Err(_) => PermissionResult::abort("permission broker task panicked"),
        };

        // The resolution (approval/denial/timeout) just moved the entry into
        // `completedRequests`; project that too.
        self.publish_agent_state().await;

        let agent_version = *self.agent_version.lock().await;
        let decision_str = decision_to_wire(&result);
        let amendment = request
            .proposed_execpolicy_amendment
            .as_deref()
            .filter(|_| result.decision == happy_approval::Decision::ApprovedWithAmendment);
        let response_body = encode_elicitation_response(&agent_version, decision_str, amendment);
        tracing::debug!(call_id = %call_id, response = %response_body, "elicitation resolved");
        if let Err(e) = driver.respond_to_elicitation(&call_id, response_body).await {
            tracing::warn!(call_id = %call_id, error = %e, "failed to deliver elicitation response to driver");
        }
    }

    /// Push the broker's current pending/completed permission requests
    /// onto the session-scoped sync link so a remote operator sees the
    /// same state this process acts on, not just a local snapshot.
    async fn publish_agent_state(&self) {
        let snapshot = self.broker.agent_state_snapshot();
        let result = self
            .sync
            .update_agent_state(move |_| serde_json::to_value(&snapshot).unwrap_or(serde_json::Value::Null))
            .await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to publish agent state to sync link");
        }
    }

    /// Cleanup ordering with a 2 s hard timeout (§4.6, §9): abort the
    /// in-flight turn first, then disconnect the driver. Never touches the
    /// sync link, loopback server or MCP transport — only full session
    /// teardown does that.
    async fn cleanup(&self, driver: &mut dyn AgentDriver) {
        self.turn_abort.lock().await.cancel();
        if tokio::time::timeout(CLEANUP_TIMEOUT, driver.disconnect()).await.is_err() {
            tracing::warn!("agent driver did not disconnect within the cleanup timeout");
        }
    }
}

fn decision_to_wire(result: &PermissionResult) -> &'static str {
    use happy_approval::Decision;
    match result.decision {
        Decision::Approved => "approved",
        Decision::ApprovedForSession => "approved_for_session",
        Decision::ApprovedWithAmendment => "approved",
        Decision::Denied => "denied",
        Decision::Abort => "abort",
    }
}
