//! Filesystem watching for the rollout root, coalesced through
//! [`happy_queue::InvalidateSync`] with a poll backstop (§4.9 step 2).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use happy_queue::InvalidateSync;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::{RolloutError, RolloutResult};
use crate::scanner::RolloutScanner;

const POLL_BACKSTOP: Duration = Duration::from_secs(3);

/// Owns the filesystem watch and poll-backstop task that keep a
/// [`RolloutScanner`] re-scanning as the rollout root changes. Dropping
/// this stops both.
pub struct RolloutWatcher {
    _fs_watcher: RecommendedWatcher,
    poll_handle: tokio::task::JoinHandle<()>,
}

impl RolloutWatcher {
    /// Install a recursive watch on `root` and a 3s poll backstop, both
    /// coalesced through one [`InvalidateSync`] wrapping `scanner`'s
    /// [`RolloutScanner::scan_once`]. Runs one initial scan immediately.
    ///
    /// # Errors
    ///
    /// Returns [`RolloutError::Watch`] if the underlying OS watch cannot
    /// be installed (e.g. the root does not exist).
    pub fn spawn(root: PathBuf, scanner: Arc<RolloutScanner>) -> RolloutResult<Self> {
        let invalidate = InvalidateSync::new(move || {
            let scanner = scanner.clone();
            async move { scanner.scan_once().await }
        });
        invalidate.invalidate();

        let invalidate_for_fs = invalidate.clone();
        let mut fs_watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if res.is_ok() {
                invalidate_for_fs.invalidate();
            }
        })
        .map_err(|e| RolloutError::Watch(e.to_string()))?;
        fs_watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| RolloutError::Watch(e.to_string()))?;

        let invalidate_for_poll = invalidate;
        let poll_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(POLL_BACKSTOP);
            loop {
                interval.tick().await;
                invalidate_for_poll.invalidate();
            }
        });

        Ok(Self { _fs_watcher: fs_watcher, poll_handle })
    }
}

impl Drop for RolloutWatcher {
    fn drop(&mut self) {
        self.poll_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn spawn_runs_an_initial_scan() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("r.jsonl"), r#"{"type":"session_meta","payload":{"id":"s1","cwd":"/w"}}
"#)
            .unwrap();

        let forwarded = Arc::new(StdMutex::new(Vec::new()));
        let sink = forwarded.clone();
        let scanner = Arc::new(RolloutScanner::new(
            dir.path().to_path_buf(),
            "/w",
            chrono::Utc::now(),
            None,
            true,
            move |v| sink.lock().unwrap().push(v),
        ));

        let _watcher = RolloutWatcher::spawn(dir.path().to_path_buf(), scanner.clone()).unwrap();
        // Give the coalesced initial scan a tick to run.
        tokio::time::sleep(Duration::from_millis(50)).await;
        // session_meta alone forwards nothing (no response_item yet), but
        // the scan must have run without panicking or erroring.
        assert!(forwarded.lock().unwrap().is_empty());
    }
}
