//! Caching port for in-memory data access.
//!
//! Defines the contract for caching frequently accessed data to reduce RPC
//! load and enforce request-rate limits.

// ═══════════════════════════════════════════════════════════════════════════════
// CACHE
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for in-memory caching.
///
/// Provides fast access to frequently queried data:
/// - Cached chain head block numbers (C2), keyed by chain
/// - Rate limiting counters (inbound API, outbound RPC)
///
/// # Cache Invalidation
///
/// Head-block entries carry an age the caller checks against
/// `BLOCK_CACHE_MAX_AGE`; a stale entry is treated the same as a miss rather
/// than being proactively evicted.
///
/// # Implementation Notes
///
/// Implementations should:
/// - Use TTL-based freshness for head blocks, not hard eviction
/// - Be thread-safe (this trait requires `Send + Sync`)
pub trait Cache: Send + Sync {
    /// Get the cached head block for a chain, with its age in milliseconds.
    ///
    /// Returns `None` on cache miss. Callers compare the age against
    /// `BLOCK_CACHE_MAX_AGE` themselves; the cache never expires an entry on
    /// its own.
    fn get_head_block(&self, chain_id: u64) -> Option<(u64, u64)>;

    /// Cache a freshly observed head block for a chain.
    fn set_head_block(&self, chain_id: u64, block: u64);

    /// Invalidate the cached head block for a chain.
    ///
    /// Call after a reorg rollback.
    fn invalidate_head_block(&self, chain_id: u64);

    /// Invalidate all cached head blocks.
    fn invalidate_all_head_blocks(&self);

    /// Check rate limit and record attempt.
    ///
    /// Returns `true` if the request is allowed (under limit).
    /// Returns `false` if rate limited.
    ///
    /// # Arguments
    ///
    /// * `key` - Rate limit key (e.g., chain id, user id)
    /// * `limit` - Maximum requests allowed
    /// * `window_secs` - Time window in seconds
    fn check_rate_limit(&self, key: &str, limit: u32, window_secs: u64) -> bool;

    /// Get remaining rate limit quota.
    ///
    /// Returns `None` if key hasn't been seen.
    fn get_rate_limit_remaining(&self, key: &str, limit: u32, window_secs: u64) -> Option<u32>;

    /// Clear all cached data.
    ///
    /// Use sparingly - typically after a reorg rollback.
    fn clear_all(&self);

    /// Get cache statistics for monitoring.
    fn stats(&self) -> CacheStats;
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of chains with a cached head block.
    pub head_block_count: usize,
}

impl CacheStats {
    /// Calculate the cache hit rate as a percentage.
    ///
    /// Precision loss in f64 conversion is acceptable for statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[allow(
    clippy::expect_used, // Test-only code; panicking on lock poison is acceptable
    clippy::significant_drop_tightening // Lock patterns are clear in test code
)]
pub mod mocks {
    //! Mock implementations for testing.

    use std::collections::HashMap;
    use std::sync::RwLock;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::{Cache, CacheStats};

    /// Simple in-memory cache for testing.
    #[derive(Debug, Default)]
    pub struct MockCache {
        head_blocks: RwLock<HashMap<u64, (u64, u64)>>, // chain_id -> (block, observed_at_ms)
        rate_limits: RwLock<HashMap<String, (u32, u64)>>, // (count, window_start)
        hits: AtomicU64,
        misses: AtomicU64,
    }

    impl MockCache {
        /// Create a new mock cache.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn now_ms() -> u64 {
            u64::try_from(
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .expect("time went backwards")
                    .as_millis(),
            )
            .unwrap_or(u64::MAX)
        }
    }

    impl Cache for MockCache {
        fn get_head_block(&self, chain_id: u64) -> Option<(u64, u64)> {
            let blocks = self.head_blocks.read().expect("lock poisoned");
            match blocks.get(&chain_id) {
                Some((block, observed_at)) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    Some((*block, Self::now_ms().saturating_sub(*observed_at)))
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            }
        }

        fn set_head_block(&self, chain_id: u64, block: u64) {
            let mut blocks = self.head_blocks.write().expect("lock poisoned");
            blocks.insert(chain_id, (block, Self::now_ms()));
        }

        fn invalidate_head_block(&self, chain_id: u64) {
            let mut blocks = self.head_blocks.write().expect("lock poisoned");
            blocks.remove(&chain_id);
        }

        fn invalidate_all_head_blocks(&self) {
            let mut blocks = self.head_blocks.write().expect("lock poisoned");
            blocks.clear();
        }

        fn check_rate_limit(&self, key: &str, limit: u32, window_secs: u64) -> bool {
            let mut limits = self.rate_limits.write().expect("lock poisoned");
            let now = Self::now_ms() / 1000;

            let (count, window_start) = limits.entry(key.to_string()).or_insert((0, now));

            if now - *window_start >= window_secs {
                *count = 0;
                *window_start = now;
            }

            if *count < limit {
                *count += 1;
                true
            } else {
                false
            }
        }

        fn get_rate_limit_remaining(&self, key: &str, limit: u32, window_secs: u64) -> Option<u32> {
            let limits = self.rate_limits.read().expect("lock poisoned");
            let now = Self::now_ms() / 1000;

            limits.get(key).map(|(count, window_start)| {
                if now - *window_start >= window_secs {
                    limit
                } else {
                    limit.saturating_sub(*count)
                }
            })
        }

        fn clear_all(&self) {
            self.head_blocks.write().expect("lock poisoned").clear();
            self.rate_limits.write().expect("lock poisoned").clear();
        }

        fn stats(&self) -> CacheStats {
            CacheStats {
                hits: self.hits.load(Ordering::Relaxed),
                misses: self.misses.load(Ordering::Relaxed),
                head_block_count: self.head_blocks.read().expect("lock poisoned").len(),
            }
        }
    }
}
