//! `happy start` / `happy codex [resume]` (§6.1): resolve the home
//! directory and credentials, run the session startup sequence, then
//! drive the local/remote mode loop to completion.

use std::path::PathBuf;
use std::time::Duration;

use happy_core::dirs::{CodexHome, HappyHome};
use happy_rollout::list_resumable;
use happy_session::{CodexStdioDriver, Mode, StartedBy, StartupContext, StartupOutcome, run_mode_loop, run_startup};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cli::{SessionArgs, StartedByArg, StartingMode};
use crate::credentials;
use crate::error::CliResult;
use crate::session_map::SessionMap;

/// Which Codex rollout (if any) `happy codex resume` should attach to.
#[derive(Debug, Clone, Default)]
pub struct CodexResume {
    /// Explicit Codex rollout session id, if the operator named one.
    pub session_id: Option<String>,
    /// List every resumable rollout under `CODEX_HOME`, not just ones
    /// matching `cwd`.
    pub all: bool,
}

/// Run a session supervisor to completion for one `start`/`codex` invocation.
///
/// # Errors
///
/// Returns an error if the home directory cannot be resolved, credentials
/// cannot be loaded, or the startup sequence / mode loop fails.
pub async fn run(args: SessionArgs, flavor: &str, resume: Option<CodexResume>) -> CliResult<()> {
    let home = resolve_home()?;
    home.ensure().ok();
    let credentials = credentials::load(&home)?;

    let cwd = args.directory.clone().unwrap_or(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let codex_home = CodexHome::resolve().unwrap_or_else(|_| CodexHome::from_path("/tmp/.codex"));
    let rollout_root = codex_home.rollouts_dir();

    let mut starting_surface = starting_mode(args.starting_mode);
    let mut resume_session_id = args.resume_session;
    let mut codex_resume_path: Option<String> = None;
    let mut codex_rollout_id: Option<Uuid> = None;

    if let Some(resume) = resume {
        let session_map_path = home.codex_session_map_path();
        let session_map = SessionMap::load(&session_map_path);
        let entry = resolve_codex_entry(&rollout_root, &cwd, &resume)?;
        if let Some(entry) = entry {
            if let Ok(id) = entry.session_id.parse::<Uuid>() {
                codex_rollout_id = Some(id);
                resume_session_id = resume_session_id.or_else(|| session_map.tag_for(id));
            }
            codex_resume_path = Some(entry.path.display().to_string());
            info!(path = %entry.path.display(), "resuming codex rollout");
            // `start_session`'s resume-path field only exists on the
            // remote-mode driver (§6.3); a cold resume always enters
            // through the stdio driver even if `--happy-starting-mode`
            // asked for local.
            starting_surface = Mode::Remote;
        } else {
            warn!("no resumable codex rollout found, starting a fresh session");
        }
    }

    let ctx = StartupContext {
        home: home.clone(),
        server_url: happy_core::env::server_url(),
        credentials,
        cwd: cwd.clone(),
        flavor: flavor.to_string(),
        started_by: started_by(args.started_by),
        starting_surface,
        resume_session_id,
        prebuilt_metadata: args.metadata.clone(),
    };

    let outcome = run_startup(ctx).await?;

    if let Some(id) = codex_rollout_id {
        let mut session_map = SessionMap::load(&home.codex_session_map_path());
        if let Err(e) = session_map.record(&home.codex_session_map_path(), id, outcome.session.tag) {
            warn!(error = %e, "failed to persist codex-session-map.json");
        }
    }
    if let Some(path) = codex_resume_path {
        outcome.supervisor.set_resume_hint(path).await;
    }

    let local_agent_exe = resolve_agent_exe(flavor);
    let mode_loop_result = run_mode_loop(&outcome, rollout_root, local_agent_exe, move || {
        Box::new(CodexStdioDriver::new(resolve_agent_exe(flavor)))
    })
    .await;

    shutdown_session(&outcome).await;

    mode_loop_result?;
    Ok(())
}

/// Cleanup ordering on shutdown (§4.6): mark the session archived, send a
/// session-death marker, flush and close the sync link. Bounded by a 2 s
/// hard timeout so a hung socket never blocks process exit; any step that
/// doesn't complete in time is abandoned rather than awaited further.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

async fn shutdown_session(outcome: &StartupOutcome) {
    let metadata = serde_json::to_value(&outcome.session.metadata).unwrap_or(serde_json::Value::Null);
    let teardown = async {
        let archive = move |current: &serde_json::Value| {
            let mut merged = if current.is_object() { current.clone() } else { metadata.clone() };
            if let Some(obj) = merged.as_object_mut() {
                obj.insert("lifecycle".into(), serde_json::json!("archived"));
                obj.insert("archivedBy".into(), serde_json::json!("cli"));
                obj.insert("archiveReason".into(), serde_json::json!("session supervisor exited"));
            }
            merged
        };
        if let Err(e) = outcome.sync.update_metadata(archive).await {
            warn!(error = %e, "failed to mark session archived on shutdown");
        }
        outcome.sync.send_session_death();
        if let Err(e) = outcome.sync.flush().await {
            warn!(error = %e, "failed to flush sync link before shutdown");
        }
        outcome.sync.close();
    };

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, teardown).await.is_err() {
        warn!("session shutdown sequence exceeded its 2s hard timeout, exiting anyway");
    }
}

fn resolve_home() -> CliResult<HappyHome> {
    HappyHome::resolve().map_err(|e| crate::error::CliError::HomeUnavailable(e.to_string()))
}

fn starting_mode(mode: StartingMode) -> Mode {
    match mode {
        StartingMode::Local => Mode::Local,
        StartingMode::Remote => Mode::Remote,
    }
}

fn started_by(value: StartedByArg) -> StartedBy {
    match value {
        StartedByArg::Daemon => StartedBy::Daemon,
        StartedByArg::Terminal => StartedBy::Terminal,
    }
}

/// The Codex binary this process drives. Not one of the documented
/// environment variables (§6.2) since it names a local executable
/// rather than a runtime knob; `HAPPY_CODEX_EXE` lets an operator point
/// at a non-`PATH` Codex build during development.
fn resolve_agent_exe(_flavor: &str) -> PathBuf {
    std::env::var("HAPPY_CODEX_EXE").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("codex"))
}

/// Pick the rollout `happy codex resume` should attach to. With no
/// explicit id, falls back to the most recently touched resumable
/// rollout rather than prompting interactively — this layer renders no
/// UI of its own (§1 non-goals).
fn resolve_codex_entry(
    rollout_root: &std::path::Path,
    cwd: &std::path::Path,
    resume: &CodexResume,
) -> CliResult<Option<happy_rollout::ResumeEntry>> {
    let cwd_str = cwd.display().to_string();
    let entries = list_resumable(rollout_root, &cwd_str, resume.all)?;

    if let Some(session_id) = &resume.session_id {
        return Ok(entries.into_iter().find(|e| &e.session_id == session_id));
    }
    Ok(entries.into_iter().next_back())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_agent_exe_defaults_to_codex_on_path() {
        // SAFETY: single-threaded test, no concurrent env mutation.
        unsafe { std::env::remove_var("HAPPY_CODEX_EXE") };
        assert_eq!(resolve_agent_exe("codex"), PathBuf::from("codex"));
    }

    #[test]
    fn resolve_agent_exe_honors_override() {
        // SAFETY: single-threaded test, no concurrent env mutation.
        unsafe { std::env::set_var("HAPPY_CODEX_EXE", "/opt/codex/bin/codex") };
        assert_eq!(resolve_agent_exe("codex"), PathBuf::from("/opt/codex/bin/codex"));
        unsafe { std::env::remove_var("HAPPY_CODEX_EXE") };
    }
}
