//! Concurrency bound on generator calls

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::warn;

/// Caps in-flight generator calls at `max` and records the observed peak
#[derive(Debug)]
pub struct CallLimiter {
    semaphore: Semaphore,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    max: usize,
}

impl CallLimiter {
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            semaphore: Semaphore::new(max),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            max,
        }
    }

    pub fn shared(max: usize) -> Arc<Self> {
        Arc::new(Self::new(max))
    }

    /// Wait for a free slot; the slot is released when the guard drops
    pub async fn acquire(&self) -> CallSlot<'_> {
        let permit = match self.semaphore.acquire().await {
            Ok(permit) => Some(permit),
            Err(_) => {
                warn!("Call limiter closed; proceeding without a slot");
                None
            }
        };
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        CallSlot {
            limiter: self,
            _permit: permit,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously held slots so far
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

/// One held slot
#[derive(Debug)]
pub struct CallSlot<'a> {
    limiter: &'a CallLimiter,
    _permit: Option<SemaphorePermit<'a>>,
}

impl Drop for CallSlot<'_> {
    fn drop(&mut self) {
        self.limiter.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_slots_are_counted() {
        let limiter = CallLimiter::new(2);
        {
            let _a = limiter.acquire().await;
            let _b = limiter.acquire().await;
            assert_eq!(limiter.in_flight(), 2);
        }
        assert_eq!(limiter.in_flight(), 0);
        assert_eq!(limiter.peak(), 2);
        assert_eq!(CallLimiter::new(0).max(), 1);
    }

    #[tokio::test]
    async fn test_peak_never_exceeds_bound() {
        let limiter = CallLimiter::shared(3);
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..12 {
            let limiter = Arc::clone(&limiter);
            tasks.spawn(async move {
                let _slot = limiter.acquire().await;
                tokio::time::sleep(Duration::from_millis(5)).await;
            });
        }
        while tasks.join_next().await.is_some() {}
        assert!(limiter.peak() <= 3);
        assert!(limiter.peak() >= 1);
    }
}
