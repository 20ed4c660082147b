//! Builds the detached child-process command used by `spawn-happy-session`
//! (§4.7 "spawn the CLI in 'remote-started-by-daemon' mode as a detached
//! process with pipes for stdout/stderr to the daemon's log").

use std::path::{Path, PathBuf};
use std::process::Stdio;

/// How the daemon invokes the session-supervisor binary for a
/// daemon-spawned child. `cli_exe` defaults to the daemon's own
/// executable path, matching the single-binary CLI/daemon split where
/// the same binary dispatches on its first argument.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Path to the `happy` CLI binary to exec for each session.
    pub cli_exe: PathBuf,
    /// Path the daemon's own log file lives at; child stdout/stderr are
    /// appended here rather than inherited.
    pub log_path: Option<PathBuf>,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            cli_exe: std::env::current_exe().unwrap_or_else(|_| PathBuf::from("happy")),
            log_path: None,
        }
    }
}

impl SpawnConfig {
    /// Spawn one detached session-supervisor child rooted at `directory`,
    /// in "remote-started-by-daemon" mode. `session_id`, if supplied by
    /// the caller, is passed through as a resume hint.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the child cannot be spawned.
    pub fn spawn(
        &self,
        directory: &Path,
        session_id: Option<uuid::Uuid>,
    ) -> std::io::Result<tokio::process::Child> {
        let mut command = tokio::process::Command::new(&self.cli_exe);
        command
            .current_dir(directory)
            .arg("start")
            .arg("--started-by")
            .arg("daemon")
            .stdin(Stdio::null())
            .kill_on_drop(false);

        if let Some(session_id) = session_id {
            command.arg("--resume-session").arg(session_id.to_string());
        }

        match self.log_path.as_ref().and_then(|p| open_append(p)) {
            Some(log) => {
                let log_err = log.try_clone()?;
                command.stdout(Stdio::from(log)).stderr(Stdio::from(log_err));
            }
            None => {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        command.spawn()
    }
}

fn open_append(path: &Path) -> Option<std::fs::File> {
    std::fs::OpenOptions::new().create(true).append(true).open(path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_runs_configured_binary_in_target_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = SpawnConfig {
            cli_exe: PathBuf::from("true"),
            log_path: None,
        };
        let mut child = config.spawn(dir.path(), None).unwrap();
        let status = child.wait().await.unwrap();
        assert!(status.success());
    }

    #[test]
    fn default_cli_exe_falls_back_when_current_exe_unavailable() {
        let config = SpawnConfig::default();
        assert!(config.cli_exe.as_os_str().len() > 0);
    }
}
