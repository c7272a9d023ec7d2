//! Multi-chain embedded-wallet activity monitor.
//!
//! Watches a configurable set of EVM chains for deposits into and withdrawals
//! from wallets this service custodies, persists every detected activity, and
//! streams it out over Apache Iggy for downstream consumers. Withdrawals are
//! signed and broadcast by this service itself, from keys it derives
//! on demand rather than storing.
//!
//! # Architecture
//!
//! One `tokio` task per configured chain, built from a shared set of
//! hexagonal ports:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        CHAIN WORKER (×N)                        │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │  HeadBlock   │  │    Block     │  │ Persistence  │          │
//! │  │   Tracker    │─▶│  Processor   │─▶│  & Emitter   │          │
//! │  └──────────────┘  └──────┬───────┘  └──────────────┘          │
//! │                           │                                     │
//! │              ┌────────────┼─────────────┐                      │
//! │              ▼            ▼             ▼                      │
//! │       ┌──────────┐ ┌────────────┐ ┌───────────┐                │
//! │       │ Throttle │ │  Wallet    │ │ Admission  │                │
//! │       │ Breaker  │ │  Registry  │ │ Controller │                │
//! │       └──────────┘ └────────────┘ └───────────┘                │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!              ┌──────────────────────────────┐
//!              │   ports (Store/Cache/Stream)  │
//!              └──────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`types`] - Domain types (enums, events, entities, primitives)
//! - [`error`] - Layered error types
//! - [`config`] - Configuration loading and validation
//! - [`engine`] - Per-chain monitoring, throttling and withdrawal logic
//! - [`ports`] - Trait boundaries implemented by `store`/`streaming`
//! - [`store`] - Data persistence (`PostgreSQL`, in-memory cache)
//! - [`streaming`] - Apache Iggy integration
//! - [`api`] - REST API for wallet registration, withdrawals and diagnostics
//!
//! # Getting Started
//!
//! ```bash
//! # Set up environment
//! cp .env.example .env
//! # Edit .env with your configuration
//!
//! # Run migrations
//! sqlx migrate run
//!
//! # Start the monitor
//! cargo run -- run
//! ```

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod ports;
pub mod store;
pub mod streaming;
pub mod types;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version string
#[must_use]
pub const fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
        assert!(version().starts_with("0."));
    }
}
