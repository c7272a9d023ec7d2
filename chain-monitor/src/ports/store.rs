//! Storage port traits for data persistence.
//!
//! These traits define the contract for persisting and retrieving domain
//! entities. Infrastructure adapters implement these traits using concrete
//! storage backends (e.g., `PostgreSQL`).

use alloy::primitives::{B256, TxHash};
use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::entities::{Activity, Wallet};
use crate::types::enums::ActivityType;
use crate::types::primitives::{Amount, BlockNumber, EthAddress};

// ═══════════════════════════════════════════════════════════════════════════════
// WALLET STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for embedded wallet persistence.
///
/// Backs C8's startup page-load and the wallet-registration inbound
/// operation.
///
/// # Implementation Notes
///
/// Implementations should:
/// - Index on `(chain_id, address)` for fast lookups
/// - Treat `insert_wallet` as idempotent (unique on `(chain_id, address)`)
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Page through every registered wallet, ordered by insertion.
    ///
    /// Called repeatedly with an advancing `offset` until a page shorter
    /// than `limit` is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn load_wallets_page(&self, offset: u64, limit: u32) -> Result<Vec<Wallet>>;

    /// Register a wallet for monitoring. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_wallet(&self, wallet: &Wallet) -> Result<()>;

    /// Look up the wallet registered for `(chain_id, address)`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn get_wallet(&self, chain_id: u64, address: &EthAddress) -> Result<Option<Wallet>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// ACTIVITY STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for detected-activity persistence.
///
/// # Implementation Notes
///
/// Implementations must enforce uniqueness on
/// `(tx_hash, chain_id, wallet_address, activity_type)` and treat a
/// conflicting insert as a successful no-op rather than an error (see
/// `Activity::dedup_key`).
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Insert a detected activity row.
    ///
    /// Returns `true` if a new row was inserted, `false` if the row already
    /// existed (the insert was a duplicate and must not be treated as an
    /// error).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails for a reason other
    /// than the uniqueness constraint.
    async fn insert_activity(&self, activity: &Activity) -> Result<bool>;

    /// Backfill gas fields on an already-inserted activity, once the
    /// transaction receipt is known.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn record_gas(&self, id: Uuid, gas_used: u64, gas_cost: Amount) -> Result<()>;

    /// Look up an activity by its dedup key, for tests and diagnostics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn get_activity(
        &self,
        tx_hash: TxHash,
        chain_id: u64,
        wallet_address: &EthAddress,
        activity_type: ActivityType,
    ) -> Result<Option<Activity>>;

    /// Get recent activities for a wallet, most recent first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn get_recent_activities(
        &self,
        wallet_address: &EthAddress,
        chain_id: u64,
        limit: u32,
    ) -> Result<Vec<Activity>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHAIN STATE STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for per-chain indexer progress and reorg bookkeeping.
///
/// # Reorg Handling
///
/// The store keeps a sliding window of recent block hashes per chain to
/// detect reorgs:
/// 1. When processing a block, check if its parent hash matches the stored
///    hash for the prior block.
/// 2. If mismatched, find the fork point.
/// 3. Roll back state to the fork point.
/// 4. Reprocess from the fork point.
///
/// # Implementation Notes
///
/// Implementations should:
/// - Keep a sliding window of recent block hashes per chain (e.g. 256 blocks)
/// - Use a transaction for reorg rollback
#[async_trait]
pub trait ChainStateStore: Send + Sync {
    /// Get the last successfully processed block for a chain.
    ///
    /// Returns `BlockNumber(0)` if the chain has never been processed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn get_last_block(&self, chain_id: u64) -> Result<BlockNumber>;

    /// Set the last processed block for a chain.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn set_last_block(&self, chain_id: u64, block: BlockNumber, hash: B256) -> Result<()>;

    /// Insert a block hash for reorg detection.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_block_hash(
        &self,
        chain_id: u64,
        block: BlockNumber,
        hash: B256,
        parent: B256,
        timestamp: u64,
    ) -> Result<()>;

    /// Get the stored block hash for a chain/block, for reorg checks.
    ///
    /// Returns `None` if the block is outside the stored window.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn get_block_hash(&self, chain_id: u64, block: BlockNumber) -> Result<Option<B256>>;

    /// Roll back a chain's state to `fork_point`: deletes block-hash rows
    /// past it and clamps `last_checked_block` back down to it. Activity
    /// rows are left alone — a reorg that drops a deposit's block leaves a
    /// stale-but-harmless row rather than erasing user-facing history; the
    /// next pass over the new canonical chain re-detects any activity that
    /// still applies.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    async fn execute_reorg_rollback(&self, chain_id: u64, fork_point: BlockNumber) -> Result<()>;

    /// Prune block-hash rows for a chain beyond the retention window.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn prune_old_blocks(&self, chain_id: u64, keep_blocks: u64) -> Result<u64>;
}
