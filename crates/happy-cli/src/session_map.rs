//! `codex-session-map.json` (§6.5): a map from Codex's own rollout
//! session UUID to the backend session-tag UUID, so resuming the same
//! Codex rollout always lands on the same backend session instead of
//! minting a fresh one each time.

use std::collections::HashMap;
use std::path::Path;

use happy_core::{read_json_tolerant, write_json_atomic};
use uuid::Uuid;

/// In-memory view of `codex-session-map.json`, keyed by Codex session id.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SessionMap(HashMap<Uuid, Uuid>);

impl SessionMap {
    /// Load the map from `path`, defaulting to empty if absent or corrupt.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        read_json_tolerant(path).unwrap_or_default()
    }

    /// Look up the backend session tag for a Codex session id.
    #[must_use]
    pub fn tag_for(&self, codex_session_id: Uuid) -> Option<Uuid> {
        self.0.get(&codex_session_id).copied()
    }

    /// Record (or overwrite) the tag for a Codex session id and persist
    /// the map atomically.
    ///
    /// # Errors
    ///
    /// Returns [`happy_core::CoreError`] if the write fails.
    pub fn record(&mut self, path: &Path, codex_session_id: Uuid, tag: Uuid) -> happy_core::CoreResult<()> {
        self.0.insert(codex_session_id, tag);
        write_json_atomic(path, &self.0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let map = SessionMap::load(&dir.path().join("codex-session-map.json"));
        assert!(map.tag_for(Uuid::new_v4()).is_none());
    }

    #[test]
    fn record_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codex-session-map.json");
        let codex_id = Uuid::new_v4();
        let tag = Uuid::new_v4();

        let mut map = SessionMap::load(&path);
        map.record(&path, codex_id, tag).unwrap();

        let reloaded = SessionMap::load(&path);
        assert_eq!(reloaded.tag_for(codex_id), Some(tag));
    }
}
