//! Tracked-file state machine deciding which rollouts get forwarded to the
//! session link (§4.9 steps 3-4).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::record::{RolloutRecord, parse_line, translate_response_item};
use crate::tail::FileTail;
use crate::walk::enumerate_jsonl;

/// Per-file tracking bookkeeping: once a rollout is recognized as
/// belonging to this supervisor, every subsequent `response_item` and
/// `token_count` record is forwarded.
struct TrackedFile {
    session_id: Option<String>,
    tracked: bool,
}

struct State {
    tails: HashMap<PathBuf, FileTail>,
    tracked: HashMap<PathBuf, TrackedFile>,
}

/// Decides which rollout files under a root are "this supervisor's", and
/// forwards their translated records to a caller-supplied sink.
///
/// Construct one per session supervisor instance; pair with
/// [`crate::watcher::RolloutWatcher`] to drive [`Self::scan_once`] on
/// both filesystem change notifications and a poll backstop.
pub struct RolloutScanner {
    root: PathBuf,
    cwd: String,
    startup_time: DateTime<Utc>,
    resume_session_id: Option<String>,
    allow_all: bool,
    forward: Box<dyn Fn(Value) + Send + Sync>,
    state: Mutex<State>,
}

impl RolloutScanner {
    /// Build a scanner rooted at `root`, tied to the supervisor's working
    /// directory and startup time. `resume_session_id`, when set, marks
    /// that rollout tracked regardless of cwd/timestamp matching.
    /// `allow_all` bypasses tracking heuristics entirely (used by the
    /// `--all` resume mode).
    #[must_use]
    pub fn new(
        root: PathBuf,
        cwd: impl Into<String>,
        startup_time: DateTime<Utc>,
        resume_session_id: Option<String>,
        allow_all: bool,
        forward: impl Fn(Value) + Send + Sync + 'static,
    ) -> Self {
        Self {
            root,
            cwd: cwd.into(),
            startup_time,
            resume_session_id,
            allow_all,
            forward: Box::new(forward),
            state: Mutex::new(State {
                tails: HashMap::new(),
                tracked: HashMap::new(),
            }),
        }
    }

    /// Re-enumerate the rollout root, drain new lines from every file,
    /// and forward translated records for files tracked so far. Never
    /// errors: unreadable files and malformed lines are logged and
    /// skipped (§4.9 step 3).
    pub async fn scan_once(&self) {
        let files = match enumerate_jsonl(&self.root) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(error = %e, "rollout scan: root unreadable");
                return;
            }
        };

        let mut state = self.state.lock().expect("rollout scanner state poisoned");
        for file in files {
            if !state.tails.contains_key(&file) {
                match FileTail::at_eof(file.clone()) {
                    Ok(tail) => {
                        state.tails.insert(file.clone(), tail);
                    }
                    Err(e) => {
                        tracing::warn!(path = %file.display(), error = %e, "failed to open rollout file for tailing");
                        continue;
                    }
                }
            }
            state
                .tracked
                .entry(file.clone())
                .or_insert(TrackedFile { session_id: None, tracked: false });

            let lines = {
                let tail = state.tails.get_mut(&file).expect("just inserted above");
                match tail.poll() {
                    Ok(lines) => lines,
                    Err(e) => {
                        tracing::warn!(path = %file.display(), error = %e, "failed to poll rollout file");
                        continue;
                    }
                }
            };

            for line in lines {
                let Some(record) = parse_line(&line) else { continue };
                let entry = state.tracked.get_mut(&file).expect("entry inserted above");
                self.handle_record(entry, record);
            }
        }
    }

    fn handle_record(&self, entry: &mut TrackedFile, record: RolloutRecord) {
        match record {
            RolloutRecord::SessionMeta(meta) => {
                entry.session_id = Some(meta.id.clone());
                if self.allow_all {
                    entry.tracked = true;
                } else if self.resume_session_id.as_deref() == Some(meta.id.as_str()) {
                    entry.tracked = true;
                } else if meta.cwd == self.cwd && self.timestamp_near_startup(meta.timestamp.as_deref()) {
                    entry.tracked = true;
                }
            }
            RolloutRecord::ResponseItem(item) => {
                if entry.tracked {
                    if let Some(envelope) = translate_response_item(&item) {
                        (self.forward)(envelope);
                    }
                }
            }
            RolloutRecord::EventMsg { kind, body } => {
                if entry.tracked && kind == "token_count" {
                    (self.forward)(body);
                }
            }
        }
    }

    fn timestamp_near_startup(&self, timestamp: Option<&str>) -> bool {
        let Some(ts) = timestamp else { return false };
        let Ok(parsed) = DateTime::parse_from_rfc3339(ts) else { return false };
        (parsed.with_timezone(&Utc) - self.startup_time).num_seconds().abs() <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex as StdMutex};

    fn write_line(path: &std::path::Path, line: &str) {
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path).unwrap();
        writeln!(file, "{line}").unwrap();
    }

    #[tokio::test]
    async fn cwd_and_startup_window_match_tracks_file() {
        let dir = tempfile::tempdir().unwrap();
        let rollout = dir.path().join("r.jsonl");
        std::fs::write(&rollout, "").unwrap();

        let startup = Utc::now();
        let forwarded = Arc::new(StdMutex::new(Vec::new()));
        let sink = forwarded.clone();
        let scanner = RolloutScanner::new(
            dir.path().to_path_buf(),
            "/work",
            startup,
            None,
            false,
            move |v| sink.lock().unwrap().push(v),
        );

        let meta_line = format!(
            r#"{{"type":"session_meta","payload":{{"id":"s1","cwd":"/work","timestamp":"{}"}}}}"#,
            startup.to_rfc3339()
        );
        write_line(&rollout, &meta_line);
        write_line(&rollout, r#"{"type":"response_item","payload":{"type":"message","role":"assistant"}}"#);
        scanner.scan_once().await;

        assert_eq!(forwarded.lock().unwrap().len(), 1);
        assert_eq!(forwarded.lock().unwrap()[0]["type"], "message");
    }

    #[tokio::test]
    async fn mismatched_cwd_is_never_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let rollout = dir.path().join("r.jsonl");
        std::fs::write(&rollout, "").unwrap();

        let forwarded = Arc::new(StdMutex::new(Vec::new()));
        let sink = forwarded.clone();
        let scanner = RolloutScanner::new(
            dir.path().to_path_buf(),
            "/work",
            Utc::now(),
            None,
            false,
            move |v| sink.lock().unwrap().push(v),
        );

        write_line(&rollout, r#"{"type":"session_meta","payload":{"id":"s1","cwd":"/elsewhere"}}"#);
        write_line(&rollout, r#"{"type":"response_item","payload":{"type":"message"}}"#);
        scanner.scan_once().await;

        assert!(forwarded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn resume_session_id_tracks_regardless_of_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let rollout = dir.path().join("r.jsonl");
        std::fs::write(&rollout, "").unwrap();

        let forwarded = Arc::new(StdMutex::new(Vec::new()));
        let sink = forwarded.clone();
        let scanner = RolloutScanner::new(
            dir.path().to_path_buf(),
            "/work",
            Utc::now(),
            Some("s1".to_string()),
            false,
            move |v| sink.lock().unwrap().push(v),
        );

        write_line(&rollout, r#"{"type":"session_meta","payload":{"id":"s1","cwd":"/elsewhere"}}"#);
        write_line(&rollout, r#"{"type":"response_item","payload":{"type":"message"}}"#);
        scanner.scan_once().await;

        assert_eq!(forwarded.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn allow_all_tracks_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let rollout = dir.path().join("r.jsonl");
        std::fs::write(&rollout, "").unwrap();

        let forwarded = Arc::new(StdMutex::new(Vec::new()));
        let sink = forwarded.clone();
        let scanner = RolloutScanner::new(
            dir.path().to_path_buf(),
            "/work",
            Utc::now(),
            None,
            true,
            move |v| sink.lock().unwrap().push(v),
        );

        write_line(&rollout, r#"{"type":"session_meta","payload":{"id":"s1","cwd":"/elsewhere"}}"#);
        write_line(&rollout, r#"{"type":"event_msg","payload":{"type":"token_count","tokens":10}}"#);
        scanner.scan_once().await;

        assert_eq!(forwarded.lock().unwrap().len(), 1);
        assert_eq!(forwarded.lock().unwrap()[0]["tokens"], 10);
    }

    #[tokio::test]
    async fn content_before_session_meta_is_never_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let rollout = dir.path().join("r.jsonl");
        std::fs::write(&rollout, "").unwrap();

        let forwarded = Arc::new(StdMutex::new(Vec::new()));
        let sink = forwarded.clone();
        let scanner = RolloutScanner::new(
            dir.path().to_path_buf(),
            "/work",
            Utc::now(),
            None,
            true,
            move |v| sink.lock().unwrap().push(v),
        );

        write_line(&rollout, r#"{"type":"response_item","payload":{"type":"message"}}"#);
        scanner.scan_once().await;
        assert!(forwarded.lock().unwrap().is_empty());
    }
}
