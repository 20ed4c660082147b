//! Reading and writing [`DaemonStateFile`] with the liveness semantics
//! §3/§4.7 require: presence alone never means a daemon is alive — the
//! pid must exist *and*, where relevant, the recorded CLI version must
//! match the caller's own.

use std::path::Path;

use happy_core::model::DaemonStateFile;
use happy_core::version::Version;
use happy_core::{read_json_tolerant, write_json_atomic};

use crate::error::DaemonResult;
use crate::process::is_alive;

/// Result of probing the on-disk state file against process liveness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbedDaemon {
    /// No state file, or it failed to parse — nothing to act on.
    Absent,
    /// A state file exists but its pid is not alive; safe to clean up
    /// and proceed as if absent.
    Stale(DaemonStateFile),
    /// A live daemon, running the same CLI version as the caller.
    RunningSameVersion(DaemonStateFile),
    /// A live daemon running a different (older, by convention) CLI
    /// version — the caller should request its shutdown before starting
    /// a fresh one (§4.7 step 1).
    RunningDifferentVersion(DaemonStateFile),
}

/// Read the state file at `path` and classify it against process
/// liveness and `current_version` (§4.7 step 1).
#[must_use]
pub fn probe(path: &Path, current_version: &Version) -> ProbedDaemon {
    let Some(state) = read_json_tolerant::<DaemonStateFile>(path) else {
        return ProbedDaemon::Absent;
    };
    if !is_alive(state.pid) {
        return ProbedDaemon::Stale(state);
    }
    match Version::parse(&state.started_with_cli_version) {
        Ok(v) if v == *current_version => ProbedDaemon::RunningSameVersion(state),
        _ => ProbedDaemon::RunningDifferentVersion(state),
    }
}

/// Write (or rewrite) the state file atomically.
///
/// # Errors
///
/// Returns a [`crate::error::DaemonError`] if the write fails.
pub fn write(path: &Path, state: &DaemonStateFile) -> DaemonResult<()> {
    write_json_atomic(path, state)?;
    Ok(())
}

/// Remove the state file, ignoring a missing-file error (idempotent, as
/// shutdown cleanup must be).
pub fn remove(path: &Path) {
    let _ = std::fs::remove_file(path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use happy_core::model::DaemonStateFile;

    fn sample(pid: u32, version: &str) -> DaemonStateFile {
        DaemonStateFile {
            pid,
            http_port: 9090,
            start_time: 1_700_000_000_000,
            started_with_cli_version: version.to_string(),
            last_heartbeat: None,
            daemon_log_path: "/tmp/daemon.log".to_string(),
        }
    }

    #[test]
    fn absent_when_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.state.json");
        assert_eq!(probe(&path, &Version::new(1, 0, 0)), ProbedDaemon::Absent);
    }

    #[test]
    fn absent_when_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.state.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert_eq!(probe(&path, &Version::new(1, 0, 0)), ProbedDaemon::Absent);
    }

    #[test]
    fn stale_when_pid_dead() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.state.json");
        let state = sample(u32::MAX - 1, "1.0.0");
        write(&path, &state).unwrap();
        assert_eq!(probe(&path, &Version::new(1, 0, 0)), ProbedDaemon::Stale(state));
    }

    #[test]
    fn running_same_version_when_pid_alive_and_version_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.state.json");
        let state = sample(std::process::id(), "1.0.0");
        write(&path, &state).unwrap();
        assert_eq!(
            probe(&path, &Version::new(1, 0, 0)),
            ProbedDaemon::RunningSameVersion(state)
        );
    }

    #[test]
    fn running_different_version_when_pid_alive_and_version_mismatches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.state.json");
        let state = sample(std::process::id(), "0.9.0");
        write(&path, &state).unwrap();
        assert_eq!(
            probe(&path, &Version::new(1, 0, 0)),
            ProbedDaemon::RunningDifferentVersion(state)
        );
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.state.json");
        remove(&path);
        write(&path, &sample(1, "1.0.0")).unwrap();
        remove(&path);
        remove(&path);
        assert!(!path.exists());
    }
}
