//! Data persistence and caching adapters.
//!
//! This module provides concrete implementations of the ports defined in
//! [`crate::ports`]. The primary store implementation uses `PostgreSQL`; the
//! cache implementation uses moka and dashmap for in-process, per-chain
//! head-block caching and rate limiting.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Store Adapters                            │
//! │                                                                 │
//! │   ┌──────────────────────────────────────────────────────────┐  │
//! │   │                  PostgresStore                            │  │
//! │   │   ┌──────────────┐  ┌──────────────┐  ┌──────────────┐   │  │
//! │   │   │ WalletStore  │  │ActivityStore │  │ChainStateStore│  │  │
//! │   │   └──────────────┘  └──────────────┘  └──────────────┘   │  │
//! │   └──────────────────────────────────────────────────────────┘  │
//! │                               │                                  │
//! │                               ▼                                  │
//! │   ┌──────────────────────────────────────────────────────────┐  │
//! │   │              SQLx Connection Pool (PostgreSQL)            │  │
//! │   └──────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use chain_monitor::store::{PostgresStore, MemoryCache};
//! use sqlx::postgres::PgPoolOptions;
//!
//! let pool = PgPoolOptions::new()
//!     .max_connections(10)
//!     .connect("postgres://localhost/chain_monitor")
//!     .await?;
//!
//! sqlx::migrate!("./migrations").run(&pool).await?;
//!
//! let store = PostgresStore::new(pool);
//! let cache = MemoryCache::new();
//! ```
//!
//! # Migrations
//!
//! Migrations are located in `migrations/` and run via `sqlx migrate run`.
//! See individual migration files for schema details.

mod cache;
mod postgres;

pub use cache::MemoryCache;
pub use postgres::PostgresStore;

// Re-export commonly used types for convenience
pub use sqlx::postgres::PgPool;
