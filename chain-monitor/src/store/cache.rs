//! In-memory cache implementation using moka and dashmap.
//!
//! Provides fast access to hot data without database round-trips:
//! - Cached chain head blocks (C2), one entry per chain
//! - Rate limiting counters (inbound API, outbound RPC)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   MemoryCache                     │
//! │                                                   │
//! │   ┌─────────────────┐   ┌─────────────────┐      │
//! │   │  Head Block     │   │  Rate Limiter   │      │
//! │   │  Cache (moka)   │   │  (dashmap)      │      │
//! │   └─────────────────┘   └─────────────────┘      │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! # TTL Strategy
//!
//! The head-block cache itself never expires entries on a timer: the
//! `Cache` port returns the entry's age alongside its value and callers
//! compare that age against `BLOCK_CACHE_MAX_AGE` (a runtime setting, not a
//! compile-time TTL). Moka's `max_capacity` bounds memory in case chains are
//! added and removed over the process lifetime; an 8-hour idle TTL reclaims
//! entries for chains that stop being polled.
//!
//! # Rate Limiting
//!
//! Uses dashmap for high-concurrency rate limiting with sliding window:
//! - Key format: `{identifier}:{window_start}`
//! - Windows roll over lazily on next access; no background sweep.
//!
//! # Usage
//!
//! ```ignore
//! use chain_monitor::store::MemoryCache;
//! use chain_monitor::ports::Cache;
//!
//! let cache = MemoryCache::new();
//!
//! cache.set_head_block(8453, 12_345_678);
//!
//! if cache.check_rate_limit("api:127.0.0.1", 100, 60) {
//!     // process request
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use moka::sync::Cache as MokaCache;
use tracing::debug;

use crate::ports::{Cache, CacheStats};

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Head-block cache max capacity (one entry per monitored chain).
const HEAD_BLOCK_MAX_CAPACITY: u64 = 64;

/// Head-block entries are reclaimed if unread for this long, independent of
/// the caller's `BLOCK_CACHE_MAX_AGE` freshness check.
const HEAD_BLOCK_IDLE_RECLAIM: Duration = Duration::from_secs(8 * 3600);

// ═══════════════════════════════════════════════════════════════════════════════
// MEMORY CACHE
// ═══════════════════════════════════════════════════════════════════════════════

/// High-performance in-memory cache using moka and dashmap.
///
/// Implements the `Cache` port trait with production-ready features:
/// - LRU/idle eviction bounding memory use
/// - Thread-safe concurrent access
/// - Hit/miss statistics for monitoring
///
/// # Thread Safety
///
/// All operations are thread-safe. The cache can be shared across tasks
/// via `Arc<MemoryCache>`.
#[derive(Debug)]
pub struct MemoryCache {
    /// Head block cache by chain id. Value: (block, observed-at unix ms).
    head_blocks: MokaCache<u64, (u64, u64)>,

    /// Rate limiter: key -> (window_start, count).
    /// Key format: `{identifier}:{window_start}`.
    rate_limits: Arc<DashMap<String, (u64, u32)>>,

    /// Cache hit counter.
    hits: AtomicU64,

    /// Cache miss counter.
    misses: AtomicU64,
}

impl MemoryCache {
    /// Create a new memory cache with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            head_blocks: MokaCache::builder()
                .max_capacity(HEAD_BLOCK_MAX_CAPACITY)
                .time_to_idle(HEAD_BLOCK_IDLE_RECLAIM)
                .build(),
            rate_limits: Arc::new(DashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Clean up old rate limit entries.
    ///
    /// Should be called periodically (e.g., every minute) to prevent memory growth.
    ///
    /// # Arguments
    ///
    /// * `max_age_secs` - Remove entries older than this many seconds
    ///
    /// # Returns
    ///
    /// Number of entries removed.
    pub fn cleanup_rate_limits(&self, max_age_secs: u64) -> usize {
        let now = current_timestamp_ms() / 1000;
        let cutoff = now.saturating_sub(max_age_secs);

        let before = self.rate_limits.len();
        self.rate_limits
            .retain(|_, (window_start, _)| *window_start > cutoff);
        let after = self.rate_limits.len();

        let removed = before.saturating_sub(after);
        if removed > 0 {
            debug!(removed, "cleaned up rate limit entries");
        }
        removed
    }

    /// Get the number of rate limit entries (for monitoring).
    #[must_use]
    pub fn rate_limit_entry_count(&self) -> usize {
        self.rate_limits.len()
    }

    /// Run pending cache maintenance tasks.
    ///
    /// Moka performs maintenance lazily; this forces it to run immediately.
    /// Useful for tests or before taking memory measurements.
    pub fn run_pending_tasks(&self) {
        self.head_blocks.run_pending_tasks();
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CACHE TRAIT IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════════

impl Cache for MemoryCache {
    fn get_head_block(&self, chain_id: u64) -> Option<(u64, u64)> {
        match self.head_blocks.get(&chain_id) {
            Some((block, observed_at)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some((block, current_timestamp_ms().saturating_sub(observed_at)))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn set_head_block(&self, chain_id: u64, block: u64) {
        self.head_blocks
            .insert(chain_id, (block, current_timestamp_ms()));
        debug!(chain_id, block, "cached head block");
    }

    fn invalidate_head_block(&self, chain_id: u64) {
        self.head_blocks.invalidate(&chain_id);
        debug!(chain_id, "invalidated head block cache");
    }

    fn invalidate_all_head_blocks(&self) {
        self.head_blocks.invalidate_all();
        debug!("invalidated all head block cache entries");
    }

    fn check_rate_limit(&self, key: &str, limit: u32, window_secs: u64) -> bool {
        let now = current_timestamp_ms() / 1000;
        let window_start = now - (now % window_secs);
        let cache_key = format!("{key}:{window_start}");

        let mut entry = self
            .rate_limits
            .entry(cache_key)
            .or_insert((window_start, 0));

        if entry.0 != window_start {
            *entry = (window_start, 1);
            true
        } else if entry.1 < limit {
            entry.1 += 1;
            true
        } else {
            false
        }
    }

    fn get_rate_limit_remaining(&self, key: &str, limit: u32, window_secs: u64) -> Option<u32> {
        let now = current_timestamp_ms() / 1000;
        let window_start = now - (now % window_secs);
        let cache_key = format!("{key}:{window_start}");

        self.rate_limits.get(&cache_key).map(|entry| {
            if entry.0 == window_start {
                limit.saturating_sub(entry.1)
            } else {
                limit
            }
        })
    }

    fn clear_all(&self) {
        self.head_blocks.invalidate_all();
        self.rate_limits.clear();

        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);

        debug!("cleared all caches");
    }

    fn stats(&self) -> CacheStats {
        #[allow(clippy::cast_possible_truncation)]
        let head_block_count = self.head_blocks.entry_count() as usize;

        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            head_block_count,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Get current Unix timestamp in milliseconds.
fn current_timestamp_ms() -> u64 {
    u64::try_from(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0),
    )
    .unwrap_or(u64::MAX)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::thread::sleep;

    use super::*;

    #[test]
    fn head_block_cache_hit() {
        let cache = MemoryCache::new();
        cache.set_head_block(8453, 100);

        let (block, age_ms) = cache.get_head_block(8453).expect("should hit");
        assert_eq!(block, 100);
        assert!(age_ms < 1000);

        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn head_block_cache_miss() {
        let cache = MemoryCache::new();
        assert!(cache.get_head_block(1).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn head_block_invalidate() {
        let cache = MemoryCache::new();
        cache.set_head_block(1, 50);
        cache.invalidate_head_block(1);
        assert!(cache.get_head_block(1).is_none());
    }

    #[test]
    fn head_block_invalidate_all() {
        let cache = MemoryCache::new();
        cache.set_head_block(1, 50);
        cache.set_head_block(2, 60);
        cache.run_pending_tasks();
        assert_eq!(cache.stats().head_block_count, 2);

        cache.invalidate_all_head_blocks();
        cache.run_pending_tasks();
        assert_eq!(cache.stats().head_block_count, 0);
    }

    #[test]
    fn rate_limit_basic() {
        let cache = MemoryCache::new();

        assert!(cache.check_rate_limit("test_key", 3, 60));
        assert!(cache.check_rate_limit("test_key", 3, 60));
        assert!(cache.check_rate_limit("test_key", 3, 60));

        assert!(!cache.check_rate_limit("test_key", 3, 60));
    }

    #[test]
    fn rate_limit_separate_keys() {
        let cache = MemoryCache::new();

        assert!(cache.check_rate_limit("key1", 1, 60));
        assert!(!cache.check_rate_limit("key1", 1, 60));

        assert!(cache.check_rate_limit("key2", 1, 60));
    }

    #[test]
    fn rate_limit_remaining() {
        let cache = MemoryCache::new();

        assert!(cache.get_rate_limit_remaining("new_key", 5, 60).is_none());

        cache.check_rate_limit("new_key", 5, 60);
        cache.check_rate_limit("new_key", 5, 60);

        let remaining = cache.get_rate_limit_remaining("new_key", 5, 60);
        assert_eq!(remaining, Some(3));
    }

    #[test]
    fn rate_limit_cleanup() {
        let cache = MemoryCache::new();

        cache.check_rate_limit("key1", 10, 60);
        cache.check_rate_limit("key2", 10, 60);

        assert!(cache.rate_limit_entry_count() >= 2);

        let removed = cache.cleanup_rate_limits(0);
        assert!(removed >= 2);
        assert_eq!(cache.rate_limit_entry_count(), 0);
    }

    #[test]
    fn clear_all() {
        let cache = MemoryCache::new();

        cache.set_head_block(1, 100);
        cache.check_rate_limit("test", 10, 60);
        cache.get_head_block(1);

        cache.clear_all();
        cache.run_pending_tasks();

        let stats = cache.stats();
        assert_eq!(stats.head_block_count, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(cache.rate_limit_entry_count(), 0);
    }

    #[test]
    fn hit_rate_calculation() {
        let cache = MemoryCache::new();
        cache.set_head_block(1, 100);

        cache.get_head_block(1);
        cache.get_head_block(1);
        cache.get_head_block(1);
        cache.get_head_block(2);

        let stats = cache.stats();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn head_block_ttl_is_caller_enforced() {
        let cache = MemoryCache::new();
        cache.set_head_block(1, 100);
        sleep(Duration::from_millis(20));
        let (block, age_ms) = cache.get_head_block(1).expect("should hit");
        assert_eq!(block, 100);
        assert!(age_ms >= 10);
    }
}
