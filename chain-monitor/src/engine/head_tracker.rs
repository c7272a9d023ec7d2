//! Head-block tracking (C2).
//!
//! Per-chain authoritative "latest block", sourced primarily from the
//! streaming subscriber (C3) pushing new block numbers as they arrive, with
//! a cache-aged fallback to a direct RPC call through C1 when the stream has
//! gone quiet.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Notify, RwLock};
use tracing::{debug, instrument};

use crate::error::Result;
use crate::types::primitives::BlockNumber;

struct ChainHead {
    value: RwLock<(BlockNumber, Instant)>,
    notify: Notify,
}

impl ChainHead {
    fn new() -> Self {
        Self {
            value: RwLock::new((BlockNumber::new(0), Instant::now() - Duration::from_secs(3600))),
            notify: Notify::new(),
        }
    }
}

/// Source of a head-block value a caller can report back for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadSource {
    /// Returned from the in-process cache, no work done.
    Cached,
    /// A fresher value arrived on the stream while waiting.
    Pushed,
    /// Fell back to a direct `eth_blockNumber` call.
    Polled,
}

/// Tracks the latest observed block number per chain.
///
/// `update()` is called by the streaming subscriber on every new block;
/// `current_head()` is called by the block processor and implements the
/// three-step cache/wait/poll contract.
#[derive(Debug)]
pub struct HeadBlockTracker {
    chains: RwLock<HashMap<u64, Arc<ChainHead>>>,
    block_cache_max_age: Duration,
    wait_bound: Duration,
}

impl HeadBlockTracker {
    /// Create a tracker. `block_cache_max_age` bounds how stale a cached head
    /// may be before a fresh lookup is attempted; `wait_bound` caps how long
    /// `current_head` waits on the stream's `Notify` before falling back to a
    /// direct RPC call.
    #[must_use]
    pub fn new(block_cache_max_age: Duration, wait_bound: Duration) -> Self {
        Self {
            chains: RwLock::new(HashMap::new()),
            block_cache_max_age,
            wait_bound,
        }
    }

    async fn chain_head(&self, chain_id: u64) -> Arc<ChainHead> {
        if let Some(head) = self.chains.read().await.get(&chain_id) {
            return Arc::clone(head);
        }
        let mut chains = self.chains.write().await;
        Arc::clone(
            chains
                .entry(chain_id)
                .or_insert_with(|| Arc::new(ChainHead::new())),
        )
    }

    /// Record a newly observed block number for `chain_id`. Monotonic: a
    /// number not strictly greater than the cached one is ignored.
    #[instrument(skip(self), fields(chain_id))]
    pub async fn update(&self, chain_id: u64, block: BlockNumber) {
        let head = self.chain_head(chain_id).await;
        let mut current = head.value.write().await;
        if block > current.0 {
            *current = (block, Instant::now());
            drop(current);
            head.notify.notify_waiters();
        }
    }

    /// Return the current head for `chain_id`, following the cache/wait/poll
    /// contract. `poll` performs the `eth_blockNumber` fallback (gated by C1
    /// at the call site) and is injected so this module stays transport-free.
    ///
    /// # Errors
    ///
    /// Returns an error only if the `poll` fallback fails.
    pub async fn current_head<F, Fut>(&self, chain_id: u64, poll: F) -> Result<(BlockNumber, HeadSource)>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<BlockNumber>>,
    {
        let head = self.chain_head(chain_id).await;

        {
            let current = head.value.read().await;
            if current.1.elapsed() < self.block_cache_max_age {
                return Ok((current.0, HeadSource::Cached));
            }
        }

        let notified = head.notify.notified();
        tokio::select! {
            () = notified => {
                let current = head.value.read().await;
                if current.1.elapsed() < self.block_cache_max_age {
                    return Ok((current.0, HeadSource::Pushed));
                }
            }
            () = tokio::time::sleep(self.wait_bound) => {}
        }

        debug!(chain_id, "head tracker falling back to direct poll");
        let polled = poll().await?;
        self.update(chain_id, polled).await;
        Ok((polled, HeadSource::Polled))
    }

    /// Seed a chain's head from persisted state on startup, without treating
    /// it as a push from the stream.
    pub async fn seed(&self, chain_id: u64, block: BlockNumber) {
        self.update(chain_id, block).await;
    }

    /// Read whatever head is currently cached for `chain_id`, regardless of
    /// staleness, without triggering the poll fallback. Used for
    /// diagnostics snapshots, where a slightly stale value is fine and an
    /// extra RPC call is not worth it.
    pub async fn cached_head(&self, chain_id: u64) -> Option<BlockNumber> {
        let chains = self.chains.read().await;
        let head = chains.get(&chain_id)?;
        Some(head.value.read().await.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_is_monotonic() {
        let tracker = HeadBlockTracker::new(Duration::from_secs(2), Duration::from_millis(50));
        tracker.update(1, BlockNumber::new(100)).await;
        tracker.update(1, BlockNumber::new(50)).await;

        let (head, source) = tracker
            .current_head(1, || async { Ok(BlockNumber::new(0)) })
            .await
            .unwrap();
        assert_eq!(head.get(), 100);
        assert_eq!(source, HeadSource::Cached);
    }

    #[tokio::test]
    async fn fresh_cache_avoids_poll() {
        let tracker = HeadBlockTracker::new(Duration::from_secs(10), Duration::from_millis(50));
        tracker.update(1, BlockNumber::new(10)).await;

        let (head, source) = tracker
            .current_head(1, || async { panic!("should not poll") })
            .await
            .unwrap();
        assert_eq!(head.get(), 10);
        assert_eq!(source, HeadSource::Cached);
    }

    #[tokio::test]
    async fn stale_cache_falls_back_to_poll() {
        let tracker = HeadBlockTracker::new(Duration::from_millis(1), Duration::from_millis(10));
        tracker.update(1, BlockNumber::new(10)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let (head, source) = tracker
            .current_head(1, || async { Ok(BlockNumber::new(20)) })
            .await
            .unwrap();
        assert_eq!(head.get(), 20);
        assert_eq!(source, HeadSource::Polled);
    }

    #[tokio::test]
    async fn push_during_wait_window_is_observed() {
        let tracker = Arc::new(HeadBlockTracker::new(
            Duration::from_millis(1),
            Duration::from_millis(200),
        ));
        tracker.update(1, BlockNumber::new(10)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let tracker2 = Arc::clone(&tracker);
        let pusher = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tracker2.update(1, BlockNumber::new(99)).await;
        });

        let (head, source) = tracker
            .current_head(1, || async { Ok(BlockNumber::new(0)) })
            .await
            .unwrap();
        pusher.await.unwrap();
        assert_eq!(head.get(), 99);
        assert_eq!(source, HeadSource::Pushed);
    }

    #[tokio::test]
    async fn cached_head_is_none_for_unknown_chain() {
        let tracker = HeadBlockTracker::new(Duration::from_secs(2), Duration::from_millis(50));
        assert_eq!(tracker.cached_head(1).await, None);
    }

    #[tokio::test]
    async fn cached_head_returns_last_value_without_polling() {
        let tracker = HeadBlockTracker::new(Duration::from_millis(1), Duration::from_millis(50));
        tracker.update(1, BlockNumber::new(42)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(tracker.cached_head(1).await, Some(BlockNumber::new(42)));
    }

    #[tokio::test]
    async fn seed_does_not_regress_an_existing_head() {
        let tracker = HeadBlockTracker::new(Duration::from_secs(10), Duration::from_millis(50));
        tracker.update(1, BlockNumber::new(100)).await;
        tracker.seed(1, BlockNumber::new(40)).await;

        let (head, _) = tracker
            .current_head(1, || async { Ok(BlockNumber::new(0)) })
            .await
            .unwrap();
        assert_eq!(head.get(), 100);
    }
}
