//! Single-slot async mutex (§4.2.2).
//!
//! Serializes a session's metadata/agent-state writes so optimistic
//! concurrency versioning (§5) never observes an interleaved update.

use tokio::sync::Mutex;

/// Wraps `tokio::sync::Mutex` with a narrower `in_lock` entry point so
/// callers can't forget to hold the guard for the whole critical section.
#[derive(Debug, Default)]
pub struct AsyncLock {
    slot: Mutex<()>,
}

impl AsyncLock {
    /// Create an unlocked `AsyncLock`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access, serialized against every other
    /// `in_lock` call on this instance.
    pub async fn in_lock<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let _guard = self.slot.lock().await;
        f().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn serializes_concurrent_critical_sections() {
        let lock = Arc::new(AsyncLock::new());
        let counter = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let lock = lock.clone();
            let counter = counter.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                lock.in_lock(|| async {
                    let inside = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(inside, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    counter.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn returns_closure_value() {
        let lock = AsyncLock::new();
        let value = lock.in_lock(|| async { 42 }).await;
        assert_eq!(value, 42);
    }
}
