//! The daemon heartbeat loop (§4.7 step 8): prune dead children, detect a
//! newer on-disk CLI install, and keep `lastHeartbeat` fresh in the state
//! file.

use std::path::{Path, PathBuf};

use happy_core::model::DaemonStateFile;
use happy_core::version::{current_cli_version, Version};

use crate::children::ChildTable;
use crate::state;

/// Name of the marker file an installer/updater writes with the latest
/// available CLI version, read from the `happy` home directory. Distinct
/// from `Cargo.toml`'s compiled-in version, which only changes when this
/// binary is rebuilt.
pub const INSTALLED_VERSION_FILE: &str = "installed-version";

/// Outcome of one heartbeat tick, returned so the caller (the daemon's
/// own shutdown orchestration) can react to a detected upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Nothing notable; state file's `lastHeartbeat` was refreshed.
    Ok,
    /// A newer CLI version is installed on disk than this process is
    /// running. The caller must spawn a fresh detached daemon and then
    /// await its own death (§4.7 step 8).
    NewerVersionInstalled(Version),
}

/// Read the installed-version marker at `home_dir`/`INSTALLED_VERSION_FILE`.
/// Absent or unparsable contents are treated as "no newer version known" —
/// the heartbeat never fails the process over this.
#[must_use]
pub fn installed_version(home_dir: &Path) -> Option<Version> {
    let raw = std::fs::read_to_string(home_dir.join(INSTALLED_VERSION_FILE)).ok()?;
    Version::parse(raw.trim()).ok()
}

/// Run one heartbeat tick: prune exited children, refresh the state file,
/// and report whether a newer CLI install was detected.
pub async fn tick(
    children: &ChildTable,
    state_path: &Path,
    home_dir: &Path,
    current: DaemonStateFile,
) -> crate::error::DaemonResult<HeartbeatOutcome> {
    children.prune_dead().await;

    let refreshed = DaemonStateFile {
        last_heartbeat: Some(chrono::Utc::now().timestamp_millis()),
        ..current
    };
    state::write(state_path, &refreshed)?;

    let outcome = match installed_version(home_dir) {
        Some(installed) if installed.is_newer_than(&current_cli_version()) => {
            HeartbeatOutcome::NewerVersionInstalled(installed)
        }
        _ => HeartbeatOutcome::Ok,
    };
    Ok(outcome)
}

/// Drive the heartbeat on a fixed interval until cancelled, calling
/// `on_upgrade` (expected to spawn a fresh detached daemon and terminate
/// this process) the first time a newer CLI install is observed.
pub async fn run<F, Fut>(
    children: ChildTable,
    state_path: PathBuf,
    home_dir: PathBuf,
    interval: std::time::Duration,
    shutdown: tokio_util::sync::CancellationToken,
    mut load_current: impl FnMut() -> Option<DaemonStateFile> + Send,
    on_upgrade: F,
) where
    F: FnOnce(Version) -> Fut + Send,
    Fut: std::future::Future<Output = ()> + Send,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                let Some(current) = load_current() else {
                    tracing::warn!("heartbeat: state file missing or unreadable, skipping tick");
                    continue;
                };
                match tick(&children, &state_path, &home_dir, current).await {
                    Ok(HeartbeatOutcome::Ok) => {}
                    Ok(HeartbeatOutcome::NewerVersionInstalled(v)) => {
                        tracing::info!(version = %v, "newer CLI version installed, self-upgrading");
                        on_upgrade(v).await;
                        return;
                    }
                    Err(err) => tracing::warn!(error = %err, "heartbeat tick failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state(start_time: i64) -> DaemonStateFile {
        DaemonStateFile {
            pid: std::process::id(),
            http_port: 9090,
            start_time,
            started_with_cli_version: current_cli_version().to_string(),
            last_heartbeat: None,
            daemon_log_path: "/tmp/daemon.log".to_string(),
        }
    }

    #[tokio::test]
    async fn tick_refreshes_last_heartbeat_and_reports_ok_with_no_marker() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("daemon.state.json");
        let children = ChildTable::new();

        let outcome = tick(&children, &state_path, dir.path(), sample_state(1_700_000_000_000))
            .await
            .unwrap();
        assert_eq!(outcome, HeartbeatOutcome::Ok);

        let written: DaemonStateFile = happy_core::atomic_file::read_json_tolerant(&state_path).unwrap();
        assert!(written.last_heartbeat.is_some());
    }

    #[tokio::test]
    async fn tick_detects_newer_installed_version() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("daemon.state.json");
        let children = ChildTable::new();

        let newer = Version::new(
            current_cli_version().to_string().split('.').next().unwrap().parse::<u64>().unwrap() + 1,
            0,
            0,
        );
        std::fs::write(dir.path().join(INSTALLED_VERSION_FILE), newer.to_string()).unwrap();

        let outcome = tick(&children, &state_path, dir.path(), sample_state(1_700_000_000_000))
            .await
            .unwrap();
        assert_eq!(outcome, HeartbeatOutcome::NewerVersionInstalled(newer));
    }

    #[tokio::test]
    async fn tick_prunes_dead_children() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("daemon.state.json");
        let children = ChildTable::new();

        let mut child = tokio::process::Command::new("true").spawn().unwrap();
        let pid = child.id().unwrap();
        child.wait().await.unwrap();
        let _rx = children.register_spawned(pid, child, serde_json::json!({})).await;

        tick(&children, &state_path, dir.path(), sample_state(1_700_000_000_000))
            .await
            .unwrap();
        assert!(children.list().await.is_empty());
    }

    #[test]
    fn installed_version_is_none_when_marker_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(installed_version(dir.path()), None);
    }
}
