//! Admission and pacing gates for outbound calls
//!
//! Two independent bounded-resource abstractions wrap every call that
//! leaves the process: [`ConcurrencyLimiter`] caps how many calls are in
//! flight at once, and [`RateGate`] enforces minimum spacing between
//! generation calls. Both are shared across all hypotheses in a run.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

/// Counting admission gate with capacity K.
///
/// `admit()` suspends the caller (without busy-waiting) until one of the K
/// slots is free. The returned [`Slot`] releases its permit on drop, so
/// release is guaranteed on every exit path, including errors and panics
/// inside the gated call.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyLimiter {
    /// Create a limiter with the given capacity (clamped to at least 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot.
    pub async fn admit(&self) -> Slot {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .expect("limiter semaphore is never closed");
        Slot { _permit: permit }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free; diagnostic only.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// RAII admission slot; dropping it frees the permit.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

/// Pacing gate enforcing minimum spacing between successive grants.
///
/// Callers are delayed, never rejected. The last-grant instant is held
/// under an async mutex across the pacing sleep, which serializes grants
/// and keeps the spacing guarantee under concurrent bursts.
#[derive(Debug)]
pub struct RateGate {
    interval: Duration,
    last_grant: Mutex<Option<Instant>>,
}

impl RateGate {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_grant: Mutex::new(None),
        }
    }

    /// Wait until at least `interval` has elapsed since the previous grant.
    pub async fn pace(&self) {
        let mut last_grant = self.last_grant.lock().await;
        if let Some(previous) = *last_grant {
            let since = previous.elapsed();
            if since < self.interval {
                tokio::time::sleep(self.interval - since).await;
            }
        }
        *last_grant = Some(Instant::now());
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::JoinSet;
    use tokio::time::timeout;

    #[tokio::test]
    async fn never_admits_more_than_capacity() {
        let limiter = Arc::new(ConcurrencyLimiter::new(2));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            tasks.spawn(async move {
                let _slot = limiter.admit().await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }
        while tasks.join_next().await.is_some() {}

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(active.load(Ordering::SeqCst), 0);
        assert_eq!(limiter.available(), 2);
    }

    #[tokio::test]
    async fn slot_released_when_gated_call_fails() {
        let limiter = ConcurrencyLimiter::new(1);

        let failing = async {
            let _slot = limiter.admit().await;
            Err::<(), &str>("synchronous failure inside the gated call")
        };
        assert!(failing.await.is_err());

        // The slot must be free again despite the error path.
        let reacquired = timeout(Duration::from_millis(100), limiter.admit()).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn capacity_is_clamped_to_one() {
        let limiter = ConcurrencyLimiter::new(0);
        assert_eq!(limiter.capacity(), 1);
    }

    #[tokio::test]
    async fn enforces_minimum_spacing() {
        let gate = RateGate::new(Duration::from_millis(40));
        let start = Instant::now();
        gate.pace().await;
        gate.pace().await;
        gate.pace().await;
        // First grant is immediate, the next two each wait the interval.
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn spacing_holds_under_concurrent_burst() {
        let gate = Arc::new(RateGate::new(Duration::from_millis(30)));
        let start = Instant::now();

        let mut tasks = JoinSet::new();
        for _ in 0..4 {
            let gate = Arc::clone(&gate);
            tasks.spawn(async move { gate.pace().await });
        }
        while tasks.join_next().await.is_some() {}

        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn first_grant_is_not_delayed() {
        let gate = RateGate::new(Duration::from_millis(200));
        let start = Instant::now();
        gate.pace().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
