//! Debounced single-flight executor (§4.2.3).
//!
//! `invalidate()` schedules one run of the underlying work; if a run is
//! already in progress, exactly one more follow-up run is scheduled (not
//! one per extra call — this is what coalesces a burst of file-change
//! notifications into a single re-scan). Used by the rollout reader.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
    RunningPending,
}

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Shared {
    state: std::sync::Mutex<RunState>,
    completed_generation: AtomicU64,
    notify: Notify,
    work: Box<dyn Fn() -> BoxFuture + Send + Sync>,
}

/// A debounced, single-flight executor over some idempotent work
/// function (e.g. "re-scan the rollout directory").
#[derive(Clone)]
pub struct InvalidateSync {
    shared: Arc<Shared>,
}

impl InvalidateSync {
    /// Wrap `work` as the function re-run on each coalesced invalidation.
    pub fn new<F, Fut>(work: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                state: std::sync::Mutex::new(RunState::Idle),
                completed_generation: AtomicU64::new(0),
                notify: Notify::new(),
                work: Box::new(move || Box::pin(work())),
            }),
        }
    }

    /// Schedule a run, coalescing with any run already in progress.
    /// Returns the generation the caller must observe via
    /// [`Self::completed_generation`] to know their invalidation has
    /// fully taken effect.
    pub fn invalidate(&self) -> u64 {
        let base = self.shared.completed_generation.load(Ordering::SeqCst);
        let mut state = self.shared.state.lock().expect("invalidate_sync state poisoned");
        match *state {
            RunState::Idle => {
                *state = RunState::Running;
                drop(state);
                self.spawn_run_loop();
                base + 1
            }
            RunState::Running => {
                *state = RunState::RunningPending;
                base + 2
            }
            RunState::RunningPending => base + 2,
        }
    }

    /// Schedule a run and wait until a run that started at or after this
    /// call has completed.
    pub async fn invalidate_and_await(&self) {
        let target = self.invalidate();
        while self.shared.completed_generation.load(Ordering::SeqCst) < target {
            self.shared.notify.notified().await;
        }
    }

    /// Current completed-run counter, for tests and callers polling
    /// [`Self::invalidate`]'s returned generation manually.
    #[must_use]
    pub fn completed_generation(&self) -> u64 {
        self.shared.completed_generation.load(Ordering::SeqCst)
    }

    fn spawn_run_loop(&self) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            loop {
                (shared.work)().await;
                let mut state = shared.state.lock().expect("invalidate_sync state poisoned");
                match *state {
                    RunState::Running => {
                        *state = RunState::Idle;
                        drop(state);
                        shared.completed_generation.fetch_add(1, Ordering::SeqCst);
                        shared.notify.notify_waiters();
                        break;
                    }
                    RunState::RunningPending => {
                        *state = RunState::Running;
                        drop(state);
                        shared.completed_generation.fetch_add(1, Ordering::SeqCst);
                        shared.notify.notify_waiters();
                    }
                    RunState::Idle => unreachable!("run loop active implies Running or RunningPending"),
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn single_invalidate_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counted = count.clone();
        let sync = InvalidateSync::new(move || {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
            }
        });
        sync.invalidate_and_await().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn burst_while_running_coalesces_to_one_followup() {
        let count = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(tokio::sync::Notify::new());
        let counted = count.clone();
        let gated = gate.clone();
        let sync = InvalidateSync::new(move || {
            let counted = counted.clone();
            let gated = gated.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                gated.notified().await;
            }
        });

        // Kick off the first (slow, gated) run.
        sync.invalidate();
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Three more calls while it's in flight must coalesce into a
        // single follow-up run, not three.
        sync.invalidate();
        sync.invalidate();
        sync.invalidate();

        gate.notify_waiters(); // let the first run finish
        tokio::task::yield_now().await;
        gate.notify_waiters(); // let the follow-up run finish
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
