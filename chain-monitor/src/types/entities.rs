//! Domain entities for database persistence.
//!
//! These structs represent the application's core domain objects that are
//! persisted to the database. They differ from events in that they represent
//! durable records rather than transient notifications.

use alloy::primitives::TxHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{ActivityStatus, ActivityType};
use super::primitives::{Amount, BlockNumber, EthAddress};

// ═══════════════════════════════════════════════════════════════════════════════
// WALLET
// ═══════════════════════════════════════════════════════════════════════════════

/// An embedded wallet this service monitors for deposits and withdrawals.
///
/// Inserted when a user is provisioned with an embedded wallet or first logs
/// in; never removed during a process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// The monitored address.
    pub address: EthAddress,
    /// Chain this wallet is monitored on.
    pub chain_id: u64,
    /// Owning user.
    pub user_id: Uuid,
}

impl Wallet {
    /// Construct a new wallet record.
    #[must_use]
    pub const fn new(address: EthAddress, chain_id: u64, user_id: Uuid) -> Self {
        Self {
            address,
            chain_id,
            user_id,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ACTIVITY
// ═══════════════════════════════════════════════════════════════════════════════

/// A detected deposit or withdrawal.
///
/// Uniqueness is enforced on `(tx_hash, chain_id, wallet_address,
/// activity_type)`; a conflicting insert is a no-op and must not surface as
/// an error — see [`crate::store::postgres::PostgresStore::insert_activity`].
/// Never updated after creation except to backfill `gas_used`/`gas_cost`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    /// Unique identifier.
    pub id: Uuid,
    /// Deposit or withdraw.
    pub activity_type: ActivityType,
    /// The monitored wallet this activity belongs to.
    pub wallet_address: EthAddress,
    /// Sender of the underlying transaction.
    pub from_address: EthAddress,
    /// Recipient of the underlying transaction.
    pub to_address: EthAddress,
    /// Base-unit value moved.
    pub amount: Amount,
    /// Transaction hash.
    pub tx_hash: TxHash,
    /// Block the transaction was included in.
    pub block_number: BlockNumber,
    /// Block timestamp.
    pub block_timestamp: DateTime<Utc>,
    /// Chain the transaction occurred on.
    pub chain_id: u64,
    /// Lifecycle status.
    pub status: ActivityStatus,
    /// Gas consumed, once known.
    pub gas_used: Option<u64>,
    /// Gas cost in the chain's native asset, once known.
    pub gas_cost: Option<Amount>,
    /// Owning user, if the wallet is mapped to one.
    pub user_id: Option<Uuid>,
}

impl Activity {
    /// The natural idempotency key for this activity.
    #[must_use]
    pub fn dedup_key(&self) -> (TxHash, u64, EthAddress, ActivityType) {
        (
            self.tx_hash,
            self.chain_id,
            self.wallet_address,
            self.activity_type,
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIAGNOSTICS SNAPSHOT
// ═══════════════════════════════════════════════════════════════════════════════

/// Point-in-time snapshot of one chain's monitoring state, returned by
/// `GET /diagnostics`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainDiagnostics {
    /// Chain this snapshot describes.
    pub chain_id: u64,
    /// Highest block fully processed.
    pub last_checked_block: BlockNumber,
    /// Most recently observed chain head.
    pub last_known_head: BlockNumber,
    /// Number of monitored wallets on this chain.
    pub wallet_count: usize,
    /// Whether the streaming subscriber currently has a live connection.
    pub stream_healthy: bool,
    /// Current throttle policy name (`normal`, `moderate`, `aggressive`, `open`).
    pub policy: &'static str,
    /// Consecutive rate-limit errors observed.
    pub consecutive_rate_limit_errors: u32,
    /// Seconds remaining until the circuit breaker resets, if open.
    pub breaker_reopen_in_secs: Option<u64>,
}
