//! Port definitions for dependency injection and testability.
//!
//! Ports are trait definitions that describe what the domain layer needs.
//! Following hexagonal architecture, adapters (in the infrastructure layer)
//! implement these traits to provide concrete functionality.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Domain Layer                            │
//! │                                                                 │
//! │  Uses ports (traits) to define what it needs                   │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐            │
//! │  │ WalletStore │  │ActivityStore│  │ChainStateStore│          │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘            │
//! │         │                │                │                    │
//! └─────────┼────────────────┼────────────────┼────────────────────┘
//!           │                │                │
//!           ▼                ▼                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Infrastructure Layer                        │
//! │                                                                 │
//! │  Provides adapters (implementations) for ports                 │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐            │
//! │  │PostgresStore│  │PostgresStore│  │PostgresStore│            │
//! │  │(implements  │  │(implements  │  │(implements  │            │
//! │  │WalletStore) │  │ActivityStore│  │ChainStateStore│          │
//! │  └─────────────┘  └─────────────┘  └─────────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Port Categories
//!
//! | Category | Ports | Purpose |
//! |----------|-------|---------|
//! | Storage | [`WalletStore`], [`ActivityStore`], [`ChainStateStore`] | Data persistence |
//! | Streaming | [`EventPublisher`] | Event broadcasting |
//! | Caching | [`Cache`] | Head-block cache, rate limiting |
//! | Time | [`Clock`] | Testable time operations |
//!
//! # Usage
//!
//! ```ignore
//! use chain_monitor::ports::{WalletStore, Clock, SystemClock};
//!
//! // Application code depends on traits, not implementations
//! async fn load_wallets<S: WalletStore, C: Clock>(store: &S, clock: &C) -> Result<()> {
//!     let page = store.load_wallets_page(0, 500).await?;
//!     let now = clock.now();
//!     // ...
//!     Ok(())
//! }
//!
//! // In production, use real implementations
//! let store = PostgresStore::new(pool);
//! let clock = SystemClock;
//!
//! // In tests, use mocks
//! let store = MockWalletStore::new();
//! let clock = FakeClock::new(fixed_time);
//! ```

mod cache;
mod clock;
mod store;
mod streaming;

// Re-export all port traits
pub use cache::Cache;
pub use clock::{Clock, SystemClock};
pub use store::{ActivityStore, ChainStateStore, WalletStore};
pub use streaming::EventPublisher;

// Re-export test utilities for tests and downstream crates using test-utils feature
#[cfg(any(test, feature = "test-utils"))]
pub use clock::FakeClock;
#[cfg(any(test, feature = "test-utils"))]
pub use cache::mocks as cache_mocks;
#[cfg(any(test, feature = "test-utils"))]
pub use streaming::mocks as streaming_mocks;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_ports_are_send_sync() {
        // Compile-time check that all port traits require Send + Sync
        fn assert_send_sync<T: Send + Sync>() {}

        fn check_wallet_store<T: WalletStore>() {
            assert_send_sync::<T>();
        }
        fn check_activity_store<T: ActivityStore>() {
            assert_send_sync::<T>();
        }
        fn check_chain_state_store<T: ChainStateStore>() {
            assert_send_sync::<T>();
        }
        fn check_event_publisher<T: EventPublisher>() {
            assert_send_sync::<T>();
        }
        fn check_cache<T: Cache>() {
            assert_send_sync::<T>();
        }
        fn check_clock<T: Clock>() {
            assert_send_sync::<T>();
        }
    }
}
