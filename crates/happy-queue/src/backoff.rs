//! Exponential backoff with full jitter (§4.2.4): base 1s, cap 30s.

use std::future::Future;
use std::time::Duration;

/// Marker a retried closure can return to stop retrying immediately,
/// distinct from a transient failure that should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the next backoff delay.
    Retry,
    /// Stop retrying; this error is permanent.
    Permanent,
}

const DEFAULT_BASE_MS: u64 = 1_000;
const DEFAULT_MAX_MS: u64 = 30_000;

/// Tracks attempt count and produces full-jitter exponential delays.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_MS, DEFAULT_MAX_MS)
    }
}

impl Backoff {
    /// Build a backoff with an explicit base and cap, in milliseconds.
    #[must_use]
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            attempt: 0,
        }
    }

    /// Compute the next delay and advance the attempt counter.
    ///
    /// `exp = base * 2^attempt` (saturating), `capped = min(exp, max)`,
    /// `delay = uniform(0..=capped)` (full jitter).
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.base_ms.saturating_mul(1u64 << self.attempt.min(63));
        let capped = exp.min(self.max_ms);
        self.attempt = self.attempt.saturating_add(1);
        let jittered = if capped == 0 { 0 } else { fastrand::u64(0..=capped) };
        Duration::from_millis(jittered)
    }

    /// Reset the attempt counter back to zero (call on success).
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Run `f` in a loop with full-jitter exponential backoff between
/// attempts, until it returns `Ok` or reports [`RetryDecision::Permanent`]
/// via `Err((error, RetryDecision::Permanent))`.
///
/// # Errors
///
/// Returns the last error if `f` reports it as permanent.
pub async fn backoff<F, Fut, T, E>(mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, (E, RetryDecision)>>,
{
    let mut policy = Backoff::default();
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err((error, RetryDecision::Permanent)) => return Err(error),
            Err((_error, RetryDecision::Retry)) => {
                tokio::time::sleep(policy.next_delay()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_never_exceeds_cap() {
        let mut b = Backoff::new(1_000, 30_000);
        for _ in 0..20 {
            let delay = b.next_delay();
            assert!(delay.as_millis() <= 30_000);
        }
    }

    #[test]
    fn delay_grows_with_attempt_on_average() {
        let mut early = Backoff::new(1_000, 30_000);
        let mut late = early.clone();
        for _ in 0..5 {
            late.next_delay();
        }
        // Can't assert a single sample is larger (full jitter), but the
        // theoretical ceiling for the later attempt must be >= the early one.
        let early_delay = early.next_delay();
        let late_delay = late.next_delay();
        assert!(early_delay.as_millis() <= 1_000);
        assert!(late_delay.as_millis() <= 30_000);
    }

    #[test]
    fn reset_returns_to_base_ceiling() {
        let mut b = Backoff::new(1_000, 30_000);
        for _ in 0..10 {
            b.next_delay();
        }
        b.reset();
        let delay = b.next_delay();
        assert!(delay.as_millis() <= 1_000);
    }

    #[test]
    fn zero_base_never_delays() {
        let mut b = Backoff::new(0, 30_000);
        for _ in 0..5 {
            assert_eq!(b.next_delay(), Duration::from_millis(0));
        }
    }

    #[test]
    fn attempt_counter_saturates_without_overflow() {
        let mut b = Backoff::new(1_000, 30_000);
        b.attempt = u32::MAX;
        let delay = b.next_delay();
        assert!(delay.as_millis() <= 30_000);
    }

    #[tokio::test]
    async fn backoff_fn_retries_until_success() {
        let attempts = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counted = attempts.clone();
        let result: Result<&'static str, ()> = backoff(move || {
            let counted = counted.clone();
            async move {
                let n = counted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if n < 2 {
                    Err(((), RetryDecision::Retry))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result, Ok("done"));
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn backoff_fn_stops_on_permanent_error() {
        let result: Result<(), &'static str> =
            backoff(|| async { Err::<(), _>(("permanent failure", RetryDecision::Permanent)) })
                .await;
        assert_eq!(result, Err("permanent failure"));
    }
}
