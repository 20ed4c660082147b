//! Local mode (§4.6, §4.9): the agent runs attached directly to this
//! process's TTY while a [`happy_rollout::RolloutScanner`] mirrors its
//! transcript to the session-scoped sync link. The branch ends when the
//! child exits, the operator issues a remote `switch`, or a message
//! lands on the supervisor's queue while we're still local — whichever
//! comes first.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use happy_rollout::{RolloutScanner, RolloutWatcher};
use tracing::{info, warn};

use crate::error::{SessionError, SessionResult};
use crate::mode::ExitReason;
use crate::startup::StartupOutcome;

/// Run one local-mode branch to completion.
///
/// # Errors
///
/// Returns [`SessionError::FatalStartupError`] if the agent binary
/// cannot be spawned.
pub async fn run_local_branch(
    outcome: &StartupOutcome,
    rollout_root: &Path,
    agent_exe: &Path,
) -> SessionResult<ExitReason> {
    let cwd = outcome.session.metadata.path.clone();

    let mut child = tokio::process::Command::new(agent_exe)
        .current_dir(&cwd)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SessionError::FatalStartupError(format!("failed to spawn local agent: {e}")))?;

    let sync = outcome.sync.clone();
    let scanner = Arc::new(RolloutScanner::new(
        rollout_root.to_path_buf(),
        cwd.clone(),
        chrono::Utc::now(),
        None,
        false,
        move |record| {
            if let Err(e) = sync.send_session_event(&record) {
                warn!(error = %e, "failed to forward local transcript record");
            }
        },
    ));
    let watcher = RolloutWatcher::spawn(rollout_root.to_path_buf(), scanner.clone())
        .map_err(|e| SessionError::FatalStartupError(e.to_string()))?;

    let reason = tokio::select! {
        status = child.wait() => {
            info!(?status, "local agent process exited");
            ExitReason::Exit
        }
        () = outcome.queue_notify.notified() => {
            info!("message arrived on the session queue while in local mode, switching to remote");
            let _ = child.start_kill();
            ExitReason::Switch
        }
        () = outcome.supervisor.abort_signal().cancelled() => {
            info!("session shutting down, terminating local agent");
            let _ = child.start_kill();
            ExitReason::Exit
        }
    };

    drop(watcher);
    Ok(reason)
}
