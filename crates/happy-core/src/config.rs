//! Layered configuration (§6.2, §6.5): environment variables take
//! precedence over `settings.json`, which takes precedence over
//! built-in defaults.
//!
//! `settings.json` itself only carries the fields §6.5 names —
//! onboarding/enrollment identity, not operational knobs. Those
//! (timeouts, intervals, the server URL) are env-only and live in
//! [`crate::env`]; this module's "layering" is the one place an
//! env-supplied machine host can override what was last persisted.

use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::atomic_file::{read_json_tolerant, write_json_atomic};
use crate::error::CoreResult;

/// Persisted local settings (§6.5): `settings.json` under the Happy home.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Whether the first-run onboarding/enrollment flow has completed.
    #[serde(default)]
    pub onboarding_completed: bool,
    /// Locally generated machine id, once assigned.
    #[serde(default)]
    pub machine_id: Option<Uuid>,
    /// Whether the backend has confirmed `machine_id` (§4.1).
    #[serde(default)]
    pub machine_id_confirmed_by_server: bool,
    /// Hostname recorded at enrollment time.
    #[serde(default)]
    pub machine_host: Option<String>,
    /// Optional UI theme hint, opaque to this layer.
    #[serde(default)]
    pub theme: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            onboarding_completed: false,
            machine_id: None,
            machine_id_confirmed_by_server: false,
            machine_host: None,
            theme: None,
        }
    }
}

impl Settings {
    /// Load `settings.json` from `path`, falling back to defaults if
    /// absent or corrupt (tolerant read, per §6.5's atomic-file discipline).
    #[must_use]
    pub fn load(path: &Path) -> Self {
        read_json_tolerant(path).unwrap_or_default()
    }

    /// Apply the current hostname as `machine_host` if unset, and return
    /// whether anything changed. Env (`HOSTNAME`, falling back to the OS)
    /// takes precedence over a previously persisted value only the first
    /// time it is observed — once set, `machine_host` is sticky.
    pub fn ensure_machine_host(&mut self) -> bool {
        if self.machine_host.is_some() {
            return false;
        }
        self.machine_host = hostname();
        self.machine_host.is_some()
    }

    /// Persist atomically to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError`] if the write fails.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        write_json_atomic(path, self)?;
        Ok(())
    }
}

fn hostname() -> Option<String> {
    std::env::var("HOSTNAME").ok().or_else(|| {
        std::process::Command::new("hostname")
            .output()
            .ok()
            .filter(|o| o.status.success())
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .map(|s| s.trim().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_returns_defaults_when_file_absent() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("settings.json"));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn load_returns_defaults_when_file_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert_eq!(Settings::load(&path), Settings::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut settings = Settings::default();
        settings.onboarding_completed = true;
        settings.machine_id = Some(Uuid::new_v4());
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path);
        assert_eq!(loaded, settings);
    }

    #[test]
    fn ensure_machine_host_is_sticky() {
        let mut settings = Settings {
            machine_host: Some("fixed-host".to_string()),
            ..Settings::default()
        };
        assert!(!settings.ensure_machine_host());
        assert_eq!(settings.machine_host.as_deref(), Some("fixed-host"));
    }
}
