//! Mode-partitioned FIFO message queue (§4.2.1).
//!
//! Entries are `(text, mode)` pairs where `mode` hashes deterministically.
//! A batch is all consecutive entries sharing the first entry's hash — a
//! mode change always forces a partition boundary, even mid-queue.

use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, RwLock};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// One drained batch: concatenated text from every entry sharing a mode,
/// plus that shared mode's hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<M> {
    /// Entry texts joined with the queue's chosen separator.
    pub text: String,
    /// The mode shared by every entry in this batch.
    pub mode: M,
    /// Deterministic hash of `mode`, used to detect partition boundaries.
    pub hash: u64,
}

struct Entry<M> {
    text: String,
    mode: M,
    hash: u64,
}

struct Inner<M> {
    entries: VecDeque<Entry<M>>,
}

/// A FIFO queue of `(text, mode)` pairs that drains in mode-partitioned
/// batches. Cloneable: clones share the same underlying queue.
pub struct ModeQueue<M> {
    inner: Mutex<Inner<M>>,
    notify: Notify,
    separator: String,
    on_message: RwLock<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl<M: Clone + Hash> Default for ModeQueue<M> {
    fn default() -> Self {
        Self::new("\n")
    }
}

impl<M: Clone + Hash> ModeQueue<M> {
    /// Create an empty queue, joining batched entries with `separator`.
    #[must_use]
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
            }),
            notify: Notify::new(),
            separator: separator.into(),
            on_message: RwLock::new(None),
        }
    }

    /// Register an edge-triggered callback fired synchronously after each
    /// [`Self::push`] (used by the local-mode launcher to pre-empt the
    /// current turn). Replaces any previously registered callback.
    pub fn set_on_message(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.on_message.write().expect("on_message lock poisoned") = Some(Box::new(callback));
    }

    fn hash_of(mode: &M) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        mode.hash(&mut hasher);
        hasher.finish()
    }

    /// Append an entry and wake any task blocked in [`Self::wait_for_batch`].
    pub fn push(&self, text: impl Into<String>, mode: M) {
        let hash = Self::hash_of(&mode);
        {
            let mut inner = self.inner.lock().expect("mode queue mutex poisoned");
            inner.entries.push_back(Entry {
                text: text.into(),
                mode,
                hash,
            });
        }
        self.notify.notify_waiters();
        self.notify.notify_one();
        if let Some(callback) = self.on_message.read().expect("on_message lock poisoned").as_ref() {
            callback();
        }
    }

    /// Number of entries currently queued.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.lock().expect("mode queue mutex poisoned").entries.len()
    }

    /// Discard all queued entries.
    pub fn reset(&self) {
        self.inner.lock().expect("mode queue mutex poisoned").entries.clear();
    }

    /// Block until at least one entry exists, then drain and return every
    /// consecutive entry sharing the first entry's mode hash. Returns
    /// `None` if `cancel` fires while the queue is empty.
    pub async fn wait_for_batch(&self, cancel: &CancellationToken) -> Option<Batch<M>> {
        loop {
            if let Some(batch) = self.try_drain_batch() {
                return Some(batch);
            }
            tokio::select! {
                () = self.notify.notified() => continue,
                () = cancel.cancelled() => {
                    // A push may have raced the cancellation; check once more.
                    return self.try_drain_batch();
                }
            }
        }
    }

    fn try_drain_batch(&self) -> Option<Batch<M>> {
        let mut inner = self.inner.lock().expect("mode queue mutex poisoned");
        let first = inner.entries.front()?;
        let target_hash = first.hash;

        let mut texts = Vec::new();
        let mut mode = None;
        while let Some(front) = inner.entries.front() {
            if front.hash != target_hash {
                break;
            }
            let entry = inner.entries.pop_front().expect("front just matched");
            texts.push(entry.text);
            mode = Some(entry.mode);
        }

        Some(Batch {
            text: texts.join(&self.separator),
            mode: mode.expect("at least one entry matched target_hash"),
            hash: target_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mode_change_forces_partition() {
        let queue: ModeQueue<&'static str> = ModeQueue::default();
        queue.push("m1", "A");
        queue.push("m2", "A");
        queue.push("m3", "B");
        queue.push("m4", "A");

        let cancel = CancellationToken::new();
        let b1 = queue.wait_for_batch(&cancel).await.unwrap();
        assert_eq!(b1.text, "m1\nm2");
        assert_eq!(b1.mode, "A");

        let b2 = queue.wait_for_batch(&cancel).await.unwrap();
        assert_eq!(b2.text, "m3");
        assert_eq!(b2.mode, "B");

        let b3 = queue.wait_for_batch(&cancel).await.unwrap();
        assert_eq!(b3.text, "m4");
        assert_eq!(b3.mode, "A");
    }

    #[tokio::test]
    async fn wait_for_batch_blocks_until_push() {
        let queue: std::sync::Arc<ModeQueue<&'static str>> =
            std::sync::Arc::new(ModeQueue::default());
        let cancel = CancellationToken::new();

        let waiter_queue = queue.clone();
        let waiter_cancel = cancel.clone();
        let waiter = tokio::spawn(async move { waiter_queue.wait_for_batch(&waiter_cancel).await });

        tokio::task::yield_now().await;
        queue.push("hello", "mode");

        let batch = waiter.await.unwrap().unwrap();
        assert_eq!(batch.text, "hello");
    }

    #[tokio::test]
    async fn cancel_on_empty_queue_returns_none() {
        let queue: ModeQueue<&'static str> = ModeQueue::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = queue.wait_for_batch(&cancel).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn cancel_race_with_push_still_drains() {
        let queue: ModeQueue<&'static str> = ModeQueue::default();
        queue.push("already-there", "mode");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = queue.wait_for_batch(&cancel).await;
        assert_eq!(result.unwrap().text, "already-there");
    }

    #[test]
    fn on_message_fires_on_every_push() {
        let queue: ModeQueue<&'static str> = ModeQueue::default();
        let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = count.clone();
        queue.set_on_message(move || {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        queue.push("a", "m");
        queue.push("b", "m");
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn reset_discards_all_entries() {
        let queue: ModeQueue<&'static str> = ModeQueue::default();
        queue.push("a", "m");
        queue.push("b", "m");
        assert_eq!(queue.size(), 2);
        queue.reset();
        assert_eq!(queue.size(), 0);
    }
}
