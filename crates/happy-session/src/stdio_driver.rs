//! Concrete [`AgentDriver`] over a child process's stdio (§6.3): the
//! supervisor's only implementation that actually spawns and talks to
//! an agent binary, as opposed to the test stub used elsewhere in this
//! crate's own tests.
//!
//! Framing mirrors [`happy_rollout::tail::FileTail`]'s newline-delimited
//! JSON discipline (one JSON value per line, a buffered partial tail
//! carried across reads) rather than introducing a second wire format:
//! every line written to the child's stdin or read from its stdout is a
//! complete JSON object. Three shapes cross this boundary:
//!
//! - `{"kind":"notification", ...AgentNotification}` — routed straight
//!   into [`AgentNotification`] via its own `type` tag.
//! - `{"kind":"elicitation","requestId":N, ...ElicitationRequest}` — a
//!   tool-approval request; the driver answers by writing
//!   `{"kind":"elicitationResponse","requestId":N,"response":...}`.
//! - `{"kind":"hello","version":"1.2.3"}` — sent once at connect time so
//!   the driver can cache the agent's version for elicitation-style
//!   gating (§6.3).

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc;
use tracing::warn;

use happy_core::version::Version;

use crate::agent_driver::{
    AgentDriver, AgentNotification, DriverEvent, ElicitationKind, ElicitationRequest,
    StartSessionParams,
};
use crate::error::{SessionError, SessionResult};

/// One parsed line from the agent child's stdout.
enum WireLine {
    Hello { version: Version },
    Notification(AgentNotification),
    Elicitation { request_id: u64, request: ElicitationRequest },
}

fn parse_line(line: &str) -> Option<WireLine> {
    if line.trim().is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(line).ok()?;
    match value.get("kind").and_then(Value::as_str)? {
        "hello" => {
            let raw = value.get("version").and_then(Value::as_str)?;
            Some(WireLine::Hello { version: Version::parse(raw).ok()? })
        }
        "notification" => serde_json::from_value(value).ok().map(WireLine::Notification),
        "elicitation" => {
            let request_id = value.get("requestId").and_then(Value::as_u64)?;
            let request: ElicitationRequest = serde_json::from_value(value).ok()?;
            Some(WireLine::Elicitation { request_id, request })
        }
        other => {
            warn!(kind = other, "ignoring unrecognized stdio line from agent driver");
            None
        }
    }
}

/// An [`AgentDriver`] backed by a real Codex-flavored child process
/// speaking the newline-delimited JSON protocol documented above.
pub struct CodexStdioDriver {
    agent_exe: std::path::PathBuf,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    events: Option<mpsc::Receiver<WireEvent>>,
    pending_elicitations: std::collections::HashMap<String, u64>,
}

enum WireEvent {
    Notification(AgentNotification),
    Elicitation { request_id: u64, request: ElicitationRequest },
    Closed,
}

impl CodexStdioDriver {
    /// Build a driver that will exec `agent_exe` on [`connect`](Self::connect).
    #[must_use]
    pub fn new(agent_exe: impl Into<std::path::PathBuf>) -> Self {
        Self {
            agent_exe: agent_exe.into(),
            child: None,
            stdin: None,
            events: None,
            pending_elicitations: std::collections::HashMap::new(),
        }
    }

    async fn write_line(&mut self, value: &Value) -> SessionResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| SessionError::AgentCrash("agent driver stdin not connected".into()))?;
        let mut line = serde_json::to_string(value)
            .map_err(|e| SessionError::AgentCrash(format!("failed to encode driver request: {e}")))?;
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| SessionError::AgentCrash(format!("failed to write to agent driver stdin: {e}")))
    }
}

#[async_trait]
impl AgentDriver for CodexStdioDriver {
    async fn connect(&mut self) -> SessionResult<Version> {
        let mut child = tokio::process::Command::new(&self.agent_exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SessionError::FatalStartupError(format!("failed to spawn agent driver: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::FatalStartupError("agent driver child has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::FatalStartupError("agent driver child has no stdout".into()))?;

        let (tx, rx) = mpsc::channel(64);
        let (hello_tx, hello_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            let mut hello_tx = Some(hello_tx);
            loop {
                match reader.next_line().await {
                    Ok(Some(line)) => match parse_line(&line) {
                        Some(WireLine::Hello { version }) => {
                            if let Some(tx) = hello_tx.take() {
                                let _ = tx.send(version);
                            }
                        }
                        Some(WireLine::Notification(notification)) => {
                            if tx.send(WireEvent::Notification(notification)).await.is_err() {
                                break;
                            }
                        }
                        Some(WireLine::Elicitation { request_id, request }) => {
                            if tx.send(WireEvent::Elicitation { request_id, request }).await.is_err() {
                                break;
                            }
                        }
                        None => {}
                    },
                    Ok(None) => {
                        let _ = tx.send(WireEvent::Closed).await;
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "agent driver stdout read error");
                        let _ = tx.send(WireEvent::Closed).await;
                        break;
                    }
                }
            }
        });

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.events = Some(rx);

        hello_rx
            .await
            .map_err(|_| SessionError::FatalStartupError("agent driver closed before handshake".into()))
    }

    async fn disconnect(&mut self) {
        self.stdin = None;
        self.events = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }

    async fn start_session(&mut self, params: StartSessionParams) -> SessionResult<()> {
        let value = serde_json::json!({"kind": "start_session", "params": params});
        self.write_line(&value).await
    }

    async fn continue_session(&mut self, prompt: &str) -> SessionResult<()> {
        let value = serde_json::json!({"kind": "continue_session", "prompt": prompt});
        self.write_line(&value).await
    }

    async fn next_event(&mut self) -> Option<DriverEvent> {
        loop {
            let events = self.events.as_mut()?;
            match events.recv().await? {
                WireEvent::Notification(notification) => return Some(DriverEvent::Notification(notification)),
                WireEvent::Elicitation { request_id, request } => {
                    self.pending_elicitations.insert(request.codex_call_id.clone(), request_id);
                    return Some(DriverEvent::Elicitation(request));
                }
                WireEvent::Closed => return None,
            }
        }
    }

    /// Write the elicitation response for `call_id` back to the agent's
    /// stdin, looking up the request id the wire-level reader cached
    /// when the request first arrived. No-ops (with a warning) if the
    /// call id is unknown, mirroring the broker's idempotent-drop rule
    /// for unmatched permission responses (§4.5).
    async fn respond_to_elicitation(&mut self, call_id: &str, response: Value) -> SessionResult<()> {
        let Some(request_id) = self.pending_elicitations.remove(call_id) else {
            warn!(call_id, "no pending elicitation for this call id, dropping response");
            return Ok(());
        };
        let value = serde_json::json!({
            "kind": "elicitationResponse",
            "requestId": request_id,
            "response": response,
        });
        self.write_line(&value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hello_line() {
        let line = r#"{"kind":"hello","version":"1.2.3"}"#;
        match parse_line(line) {
            Some(WireLine::Hello { version }) => assert_eq!(version, Version::new(1, 2, 3)),
            _ => panic!("expected hello"),
        }
    }

    #[test]
    fn parses_notification_line() {
        let line = r#"{"kind":"notification","type":"task_started","body":{}}"#;
        match parse_line(line) {
            Some(WireLine::Notification(AgentNotification::TaskStarted { .. })) => {}
            _ => panic!("expected task_started notification"),
        }
    }

    #[test]
    fn parses_elicitation_line() {
        let line = r#"{"kind":"elicitation","requestId":7,"message":"run ls?","codex_elicitation":"exec-approval","codex_call_id":"c1","codex_event_id":"e1","codex_command":["ls"]}"#;
        match parse_line(line) {
            Some(WireLine::Elicitation { request_id, request }) => {
                assert_eq!(request_id, 7);
                assert_eq!(request.codex_call_id, "c1");
                assert_eq!(request.codex_elicitation, ElicitationKind::ExecApproval);
            }
            _ => panic!("expected elicitation"),
        }
    }

    #[test]
    fn ignores_unrecognized_kind() {
        let line = r#"{"kind":"something_else"}"#;
        assert!(parse_line(line).is_none());
    }

    #[test]
    fn blank_line_is_ignored() {
        assert!(parse_line("   ").is_none());
    }
}
