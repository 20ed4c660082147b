//! Directory resolution for the Happy home and the Codex rollout root.
//!
//! - [`HappyHome`]: config/state root at `~/.happy/` (or `$HAPPY_HOME_DIR`).
//!   Holds `credentials.json`, `settings.json`, `daemon.state.json`,
//!   `daemon.lock` and `codex-session-map.json` (§6.5).
//! - [`CodexHome`]: root for Codex's own rollout transcripts at `~/.codex/`
//!   (or `$CODEX_HOME`), read (never written) by the rollout reader (§4.9).

use std::io;
use std::path::{Path, PathBuf};

/// Local config/state root for the Happy CLI and daemon.
#[derive(Debug, Clone)]
pub struct HappyHome {
    root: PathBuf,
}

impl HappyHome {
    /// Resolve the home directory: `$HAPPY_HOME_DIR` if set (must be
    /// absolute), else `$HOME/.happy`.
    ///
    /// # Errors
    ///
    /// Returns an error if `HAPPY_HOME_DIR` is set but relative, or if
    /// neither `HAPPY_HOME_DIR` nor `HOME` can be read.
    pub fn resolve() -> io::Result<Self> {
        if let Ok(custom) = std::env::var("HAPPY_HOME_DIR") {
            let p = PathBuf::from(&custom);
            if !p.is_absolute() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "HAPPY_HOME_DIR must be an absolute path",
                ));
            }
            return Ok(Self { root: p });
        }

        let home = std::env::var("HOME").map_err(|_| {
            io::Error::new(
                io::ErrorKind::NotFound,
                "neither HAPPY_HOME_DIR nor HOME environment variable is set",
            )
        })?;
        Ok(Self {
            root: PathBuf::from(home).join(".happy"),
        })
    }

    /// Build from an explicit path (tests, and `--happy-home` overrides).
    #[must_use]
    pub fn from_path(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory with owner-only permissions on Unix.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or permissions
    /// cannot be set.
    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.root, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(())
    }

    /// Root directory (`~/.happy/` by default).
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to `credentials.json`.
    #[must_use]
    pub fn credentials_path(&self) -> PathBuf {
        self.root.join("credentials.json")
    }

    /// Path to `settings.json`.
    #[must_use]
    pub fn settings_path(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    /// Path to `daemon.state.json`.
    #[must_use]
    pub fn daemon_state_path(&self) -> PathBuf {
        self.root.join("daemon.state.json")
    }

    /// Path to `daemon.lock`.
    #[must_use]
    pub fn daemon_lock_path(&self) -> PathBuf {
        self.root.join("daemon.lock")
    }

    /// Path to `codex-session-map.json`.
    #[must_use]
    pub fn codex_session_map_path(&self) -> PathBuf {
        self.root.join("codex-session-map.json")
    }

    /// Directory for daemon and session log files.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

/// Root of the Codex agent's own rollout (JSONL transcript) tree.
#[derive(Debug, Clone)]
pub struct CodexHome {
    root: PathBuf,
}

impl CodexHome {
    /// Resolve `$CODEX_HOME` if set, else `$HOME/.codex`.
    ///
    /// # Errors
    ///
    /// Returns an error if neither `CODEX_HOME` nor `HOME` can be read.
    pub fn resolve() -> io::Result<Self> {
        if let Ok(custom) = std::env::var("CODEX_HOME") {
            return Ok(Self {
                root: PathBuf::from(custom),
            });
        }
        let home = std::env::var("HOME").map_err(|_| {
            io::Error::new(
                io::ErrorKind::NotFound,
                "neither CODEX_HOME nor HOME environment variable is set",
            )
        })?;
        Ok(Self {
            root: PathBuf::from(home).join(".codex"),
        })
    }

    /// Build from an explicit path (tests).
    #[must_use]
    pub fn from_path(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the Codex home.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory under which session rollout `.jsonl` files are nested.
    #[must_use]
    pub fn rollouts_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn happy_home_resolve_with_env() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        // SAFETY: serialized by ENV_MUTEX
        unsafe { std::env::set_var("HAPPY_HOME_DIR", &path) };
        let home = HappyHome::resolve().unwrap();
        assert_eq!(home.root(), path);
        unsafe { std::env::remove_var("HAPPY_HOME_DIR") };
    }

    #[test]
    fn happy_home_rejects_relative_env() {
        let _guard = ENV_MUTEX.lock().unwrap();
        unsafe { std::env::set_var("HAPPY_HOME_DIR", "relative/path") };
        let result = HappyHome::resolve();
        assert!(result.is_err());
        unsafe { std::env::remove_var("HAPPY_HOME_DIR") };
    }

    #[test]
    fn happy_home_default_under_home() {
        let _guard = ENV_MUTEX.lock().unwrap();
        unsafe { std::env::remove_var("HAPPY_HOME_DIR") };
        let home = HappyHome::resolve().unwrap();
        let expected = PathBuf::from(std::env::var("HOME").unwrap()).join(".happy");
        assert_eq!(home.root(), expected);
    }

    #[test]
    fn happy_home_ensure_sets_owner_only_perms() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let dir = tempfile::tempdir().unwrap();
            let home = HappyHome::from_path(dir.path().join("happy"));
            home.ensure().unwrap();
            let perms = std::fs::metadata(home.root()).unwrap().permissions();
            assert_eq!(perms.mode() & 0o777, 0o700);
        }
    }

    #[test]
    fn happy_home_path_accessors() {
        let home = HappyHome::from_path("/tmp/happy-test");
        assert_eq!(
            home.credentials_path(),
            PathBuf::from("/tmp/happy-test/credentials.json")
        );
        assert_eq!(
            home.daemon_state_path(),
            PathBuf::from("/tmp/happy-test/daemon.state.json")
        );
        assert_eq!(
            home.daemon_lock_path(),
            PathBuf::from("/tmp/happy-test/daemon.lock")
        );
    }

    #[test]
    fn codex_home_resolve_with_env() {
        let _guard = ENV_MUTEX.lock().unwrap();
        unsafe { std::env::set_var("CODEX_HOME", "/custom/codex") };
        let home = CodexHome::resolve().unwrap();
        assert_eq!(home.root(), Path::new("/custom/codex"));
        assert_eq!(home.rollouts_dir(), PathBuf::from("/custom/codex/sessions"));
        unsafe { std::env::remove_var("CODEX_HOME") };
    }
}
