//! RPC admission control (C1).
//!
//! A single process-wide gate shared by every chain's head-block tracker and
//! block processor: a fair semaphore bounds total concurrent RPC calls, and a
//! separate spacing lock keeps head-block polls from hammering a provider
//! when several chains want `eth_blockNumber` at once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

/// Process-wide admission gate for outbound RPC calls.
///
/// Cloning is cheap: the semaphore and spacing lock are held behind `Arc`, so
/// every chain worker shares the same budget.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    head_spacing: Arc<Mutex<Instant>>,
    min_spacing: Duration,
}

impl AdmissionController {
    /// Create a controller allowing up to `max_concurrent` simultaneous RPC
    /// calls, with at least `min_spacing` between head-block queries.
    #[must_use]
    pub fn new(max_concurrent: u32, min_spacing: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent as usize)),
            // Starts in the past so the first head-block acquire never waits.
            head_spacing: Arc::new(Mutex::new(Instant::now() - min_spacing)),
            min_spacing,
        }
    }

    /// Acquire a general-purpose RPC permit. Waits in FIFO order if the
    /// budget is exhausted. Dropping the returned permit releases it.
    ///
    /// # Panics
    ///
    /// Panics only if the underlying semaphore was closed, which this type
    /// never does.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("admission semaphore is never closed")
    }

    /// Acquire a permit for a head-block query, additionally waiting until
    /// `min_spacing` has elapsed since the last head-block acquisition.
    pub async fn acquire_headblock(&self) -> OwnedSemaphorePermit {
        let permit = self.acquire().await;

        let mut last = self.head_spacing.lock().await;
        let elapsed = last.elapsed();
        if elapsed < self.min_spacing {
            tokio::time::sleep(self.min_spacing - elapsed).await;
        }
        *last = Instant::now();
        drop(last);

        permit
    }

    /// Number of permits currently available, for diagnostics.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn acquire_releases_permit_on_drop() {
        let admission = AdmissionController::new(1, Duration::from_millis(0));
        assert_eq!(admission.available_permits(), 1);

        let permit = admission.acquire().await;
        assert_eq!(admission.available_permits(), 0);

        drop(permit);
        assert_eq!(admission.available_permits(), 1);
    }

    #[tokio::test]
    async fn concurrent_acquires_are_bounded() {
        let admission = AdmissionController::new(2, Duration::from_millis(0));
        let p1 = admission.acquire().await;
        let p2 = admission.acquire().await;
        assert_eq!(admission.available_permits(), 0);

        let admission2 = admission.clone();
        let waiter = tokio::spawn(async move {
            let _permit = admission2.acquire().await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(p1);
        drop(p2);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn headblock_acquire_enforces_minimum_spacing() {
        let admission = AdmissionController::new(4, Duration::from_millis(50));

        let start = Instant::now();
        drop(admission.acquire_headblock().await);
        drop(admission.acquire_headblock().await);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
