//! Child-process tracking table (§3 "TrackedSession", §4.7 "Child
//! tracking", §4.8).
//!
//! Indexed by pid; entries disappear when the child exits. Each entry optionally carries a live [`tokio::process::Child`]
//! handle (daemon-spawned children only; externally-started sessions that
//! merely self-register via the webhook have no handle to wait on).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use happy_core::model::{StartedBy, TrackedSession};
use tokio::sync::{Mutex, oneshot};

/// Fallback timeout for a daemon-spawned child's self-registration
/// webhook (§4.7 "Child tracking", §5).
pub const SPAWN_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

struct Entry {
    tracked: TrackedSession,
    child: Option<tokio::process::Child>,
    awaiter: Option<oneshot::Sender<TrackedSession>>,
}

/// The daemon's live view of every child process it spawned or has
/// observed self-register.
#[derive(Clone, Default)]
pub struct ChildTable {
    entries: Arc<DashMap<u32, Mutex<Entry>>>,
}

impl ChildTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly spawned child, returning a receiver that
    /// resolves once the child's self-registration webhook arrives (or
    /// the spawn timeout elapses — the caller is responsible for racing
    /// the two, per §4.7's "one-shot awaiter").
    pub async fn register_spawned(
        &self,
        pid: u32,
        child: tokio::process::Child,
        metadata: serde_json::Value,
    ) -> oneshot::Receiver<TrackedSession> {
        let (tx, rx) = oneshot::channel();
        let tracked = TrackedSession {
            pid,
            started_by: StartedBy::Daemon,
            session_id: None,
            metadata: Some(metadata),
        };
        self.entries.insert(
            pid,
            Mutex::new(Entry {
                tracked,
                child: Some(child),
                awaiter: Some(tx),
            }),
        );
        rx
    }

    /// Handle a `POST /session-started` webhook (§4.8): look up a tracked
    /// entry by `host_pid`. If found and daemon-spawned, populate the
    /// session id and resolve its awaiter; else register a new
    /// externally-started entry.
    pub async fn session_started(&self, host_pid: u32, session_id: uuid::Uuid, metadata: serde_json::Value) {
        if let Some(entry) = self.entries.get(&host_pid) {
            let mut guard = entry.lock().await;
            if guard.tracked.started_by == StartedBy::Daemon {
                guard.tracked.session_id = Some(session_id);
                guard.tracked.metadata = Some(metadata);
                let snapshot = guard.tracked.clone();
                if let Some(tx) = guard.awaiter.take() {
                    let _ = tx.send(snapshot);
                }
                return;
            }
        }
        self.entries.insert(
            host_pid,
            Mutex::new(Entry {
                tracked: TrackedSession {
                    pid: host_pid,
                    started_by: StartedBy::External,
                    session_id: Some(session_id),
                    metadata: Some(metadata),
                },
                child: None,
                awaiter: None,
            }),
        );
    }

    /// Snapshot every tracked entry (`GET /list`).
    pub async fn list(&self) -> Vec<TrackedSession> {
        let mut out = Vec::with_capacity(self.entries.len());
        for entry in self.entries.iter() {
            out.push(entry.value().lock().await.tracked.clone());
        }
        out
    }

    /// Find a tracked entry by backend session id or the `PID-<n>`
    /// fallback form (§4.7 "On `stop-session`").
    pub async fn find_pid(&self, session_ref: &str) -> Option<u32> {
        if let Some(rest) = session_ref.strip_prefix("PID-")
            && let Ok(pid) = rest.parse::<u32>()
        {
            return self.entries.contains_key(&pid).then_some(pid);
        }
        let Ok(wanted) = uuid::Uuid::parse_str(session_ref) else {
            return None;
        };
        for entry in self.entries.iter() {
            if entry.value().lock().await.tracked.session_id == Some(wanted) {
                return Some(*entry.key());
            }
        }
        None
    }

    /// Remove an entry (child exited, or stop-session succeeded).
    pub fn remove(&self, pid: u32) {
        self.entries.remove(&pid);
    }

    /// Take the live child handle for `pid`, if the daemon spawned it,
    /// so the caller can `SIGTERM`/wait on it without holding the table
    /// lock.
    pub async fn take_child(&self, pid: u32) -> Option<tokio::process::Child> {
        let entry = self.entries.get(&pid)?;
        entry.value().lock().await.child.take()
    }

    /// Prune entries whose daemon-spawned child has exited
    /// (§4.7 step 8 "prune-dead-children").
    pub async fn prune_dead(&self) {
        let mut dead = Vec::new();
        for entry in self.entries.iter() {
            let mut guard = entry.value().lock().await;
            let Some(child) = guard.child.as_mut() else { continue };
            if matches!(child.try_wait(), Ok(Some(_))) {
                dead.push(*entry.key());
            }
        }
        for pid in dead {
            self.entries.remove(&pid);
        }
    }

    /// Count of currently tracked children, for heartbeat/status reporting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ensure `directory` exists, creating it recursively if absent, per
/// §4.7's `spawn-happy-session` "ensure the working directory exists"
/// step. Returns whether the directory had to be created.
///
/// # Errors
///
/// Returns the underlying I/O error if creation fails.
pub fn ensure_directory(directory: &std::path::Path) -> std::io::Result<bool> {
    if directory.exists() {
        return Ok(false);
    }
    std::fs::create_dir_all(directory)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_started_resolves_daemon_spawned_awaiter() {
        let table = ChildTable::new();
        let child = tokio::process::Command::new("true").spawn().unwrap();
        let pid = child.id().unwrap();
        let rx = table.register_spawned(pid, child, serde_json::json!({"hostPid": pid})).await;

        let session_id = uuid::Uuid::new_v4();
        table.session_started(pid, session_id, serde_json::json!({"hostPid": pid})).await;

        let resolved = rx.await.unwrap();
        assert_eq!(resolved.session_id, Some(session_id));
        assert_eq!(resolved.started_by, StartedBy::Daemon);
    }

    #[tokio::test]
    async fn session_started_registers_external_entries() {
        let table = ChildTable::new();
        let session_id = uuid::Uuid::new_v4();
        table.session_started(4242, session_id, serde_json::json!({})).await;

        let listed = table.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].started_by, StartedBy::External);
        assert_eq!(listed[0].session_id, Some(session_id));
    }

    #[tokio::test]
    async fn find_pid_resolves_by_session_id_and_fallback_form() {
        let table = ChildTable::new();
        let session_id = uuid::Uuid::new_v4();
        table.session_started(99, session_id, serde_json::json!({})).await;

        assert_eq!(table.find_pid(&session_id.to_string()).await, Some(99));
        assert_eq!(table.find_pid("PID-99").await, Some(99));
        assert_eq!(table.find_pid("PID-100").await, None);
        assert_eq!(table.find_pid(&uuid::Uuid::new_v4().to_string()).await, None);
    }

    #[tokio::test]
    async fn prune_dead_removes_exited_children() {
        let table = ChildTable::new();
        let mut child = tokio::process::Command::new("true").spawn().unwrap();
        let pid = child.id().unwrap();
        child.wait().await.unwrap();
        let _rx = table.register_spawned(pid, child, serde_json::json!({})).await;

        table.prune_dead().await;
        assert!(table.list().await.is_empty());
    }

    #[test]
    fn ensure_directory_creates_missing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        assert!(ensure_directory(&nested).unwrap());
        assert!(nested.exists());
        assert!(!ensure_directory(&nested).unwrap());
    }
}
