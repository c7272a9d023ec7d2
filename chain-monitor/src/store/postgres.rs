//! PostgreSQL implementation of store ports using SQLx.
//!
//! # Type Conversions
//!
//! PostgreSQL uses signed integers (i16, i32, i64) for numeric columns while our
//! domain uses unsigned types. These casts are safe because:
//! - Chain IDs and block numbers won't exceed i64::MAX
//! - Activity/status enum discriminants are 0-2 (fit in i16)
//! - Gas used won't exceed i64::MAX
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless,
    clippy::use_self
)]

use alloy::primitives::{B256, TxHash};
use async_trait::async_trait;
use sqlx::{FromRow, postgres::PgPool};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{InfraError, Result};
use crate::ports::{ActivityStore, ChainStateStore, WalletStore};
use crate::types::entities::{Activity, Wallet};
use crate::types::enums::{ActivityStatus, ActivityType};
use crate::types::primitives::{Amount, BlockNumber, EthAddress};

// ═══════════════════════════════════════════════════════════════════════════════
// POSTGRES STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// PostgreSQL-based store implementation.
///
/// Implements all store port traits using SQLx for database access.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| InfraError::Internal(format!("migration error: {e}")))?;
        Ok(())
    }
}

fn address_from_db(bytes: Vec<u8>) -> std::result::Result<EthAddress, InfraError> {
    EthAddress::from_slice(&bytes)
        .map_err(|_| InfraError::Internal("invalid address length in DB".into()))
}

fn tx_hash_from_db(bytes: Vec<u8>) -> std::result::Result<TxHash, InfraError> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| InfraError::Internal("invalid tx hash length in DB".into()))?;
    Ok(TxHash::from(arr))
}

// ═══════════════════════════════════════════════════════════════════════════════
// WALLET STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, FromRow)]
struct WalletRow {
    address: Vec<u8>,
    chain_id: i64,
    user_id: Uuid,
}

impl TryFrom<WalletRow> for Wallet {
    type Error = InfraError;

    fn try_from(row: WalletRow) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            address: address_from_db(row.address)?,
            chain_id: row.chain_id as u64,
            user_id: row.user_id,
        })
    }
}

#[async_trait]
impl WalletStore for PostgresStore {
    #[instrument(skip(self), fields(offset, limit))]
    async fn load_wallets_page(&self, offset: u64, limit: u32) -> Result<Vec<Wallet>> {
        let rows = sqlx::query_as::<_, WalletRow>(
            r#"
            SELECT address, chain_id, user_id
            FROM wallets
            ORDER BY chain_id, address
            OFFSET $1
            LIMIT $2
            "#,
        )
        .bind(offset as i64)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        rows.into_iter()
            .map(|r| Wallet::try_from(r).map_err(Into::into))
            .collect()
    }

    #[instrument(skip(self, wallet), fields(address = %wallet.address, chain_id = wallet.chain_id))]
    async fn insert_wallet(&self, wallet: &Wallet) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO wallets (address, chain_id, user_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (address, chain_id) DO NOTHING
            "#,
        )
        .bind(wallet.address.as_slice())
        .bind(wallet.chain_id as i64)
        .bind(wallet.user_id)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        debug!("wallet registered");
        Ok(())
    }

    #[instrument(skip(self), fields(chain_id, address = %address))]
    async fn get_wallet(&self, chain_id: u64, address: &EthAddress) -> Result<Option<Wallet>> {
        let row = sqlx::query_as::<_, WalletRow>(
            r#"
            SELECT address, chain_id, user_id
            FROM wallets
            WHERE chain_id = $1 AND address = $2
            "#,
        )
        .bind(chain_id as i64)
        .bind(address.as_slice())
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        match row {
            Some(r) => Ok(Some(r.try_into()?)),
            None => Ok(None),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ACTIVITY STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, FromRow)]
struct ActivityRow {
    id: Uuid,
    activity_type: i16,
    wallet_address: Vec<u8>,
    from_address: Vec<u8>,
    to_address: Vec<u8>,
    amount: String,
    tx_hash: Vec<u8>,
    block_number: i64,
    block_timestamp: chrono::DateTime<chrono::Utc>,
    chain_id: i64,
    status: i16,
    gas_used: Option<i64>,
    gas_cost: Option<String>,
    user_id: Option<Uuid>,
}

impl TryFrom<ActivityRow> for Activity {
    type Error = InfraError;

    fn try_from(row: ActivityRow) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            activity_type: ActivityType::try_from(row.activity_type as u8)
                .map_err(|e| InfraError::Internal(format!("invalid activity type in DB: {e}")))?,
            wallet_address: address_from_db(row.wallet_address)?,
            from_address: address_from_db(row.from_address)?,
            to_address: address_from_db(row.to_address)?,
            amount: Amount::parse(&row.amount)
                .map_err(|e| InfraError::Internal(format!("invalid amount in DB: {e}")))?,
            tx_hash: tx_hash_from_db(row.tx_hash)?,
            block_number: BlockNumber::new(row.block_number as u64),
            block_timestamp: row.block_timestamp,
            chain_id: row.chain_id as u64,
            status: ActivityStatus::try_from(row.status as u8)
                .map_err(|e| InfraError::Internal(format!("invalid status in DB: {e}")))?,
            gas_used: row.gas_used.map(|g| g as u64),
            gas_cost: row
                .gas_cost
                .map(|g| Amount::parse(&g))
                .transpose()
                .map_err(|e| InfraError::Internal(format!("invalid gas cost in DB: {e}")))?,
            user_id: row.user_id,
        })
    }
}

#[async_trait]
impl ActivityStore for PostgresStore {
    #[instrument(skip(self, activity), fields(tx_hash = %activity.tx_hash, chain_id = activity.chain_id))]
    async fn insert_activity(&self, activity: &Activity) -> Result<bool> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO activities (
                id, activity_type, wallet_address, from_address, to_address,
                amount, tx_hash, block_number, block_timestamp, chain_id,
                status, gas_used, gas_cost, user_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (tx_hash, chain_id, wallet_address, activity_type) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(activity.id)
        .bind(i16::from(activity.activity_type))
        .bind(activity.wallet_address.as_slice())
        .bind(activity.from_address.as_slice())
        .bind(activity.to_address.as_slice())
        .bind(activity.amount.to_string())
        .bind(activity.tx_hash.as_slice())
        .bind(activity.block_number.value() as i64)
        .bind(activity.block_timestamp)
        .bind(activity.chain_id as i64)
        .bind(i16::from(activity.status))
        .bind(activity.gas_used.map(|g| g as i64))
        .bind(activity.gas_cost.map(|g| g.to_string()))
        .bind(activity.user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        let inserted = row.is_some();
        debug!(inserted, "activity insert attempted");
        Ok(inserted)
    }

    #[instrument(skip(self), fields(id = %id, gas_used))]
    async fn record_gas(&self, id: Uuid, gas_used: u64, gas_cost: Amount) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE activities SET gas_used = $2, gas_cost = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(gas_used as i64)
        .bind(gas_cost.to_string())
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        Ok(())
    }

    #[instrument(skip(self), fields(tx_hash = %tx_hash, chain_id, wallet_address = %wallet_address))]
    async fn get_activity(
        &self,
        tx_hash: TxHash,
        chain_id: u64,
        wallet_address: &EthAddress,
        activity_type: ActivityType,
    ) -> Result<Option<Activity>> {
        let row = sqlx::query_as::<_, ActivityRow>(
            r#"
            SELECT id, activity_type, wallet_address, from_address, to_address,
                   amount, tx_hash, block_number, block_timestamp, chain_id,
                   status, gas_used, gas_cost, user_id
            FROM activities
            WHERE tx_hash = $1 AND chain_id = $2 AND wallet_address = $3 AND activity_type = $4
            "#,
        )
        .bind(tx_hash.as_slice())
        .bind(chain_id as i64)
        .bind(wallet_address.as_slice())
        .bind(i16::from(activity_type))
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        match row {
            Some(r) => Ok(Some(r.try_into()?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(wallet_address = %wallet_address, chain_id, limit))]
    async fn get_recent_activities(
        &self,
        wallet_address: &EthAddress,
        chain_id: u64,
        limit: u32,
    ) -> Result<Vec<Activity>> {
        let rows = sqlx::query_as::<_, ActivityRow>(
            r#"
            SELECT id, activity_type, wallet_address, from_address, to_address,
                   amount, tx_hash, block_number, block_timestamp, chain_id,
                   status, gas_used, gas_cost, user_id
            FROM activities
            WHERE wallet_address = $1 AND chain_id = $2
            ORDER BY block_timestamp DESC
            LIMIT $3
            "#,
        )
        .bind(wallet_address.as_slice())
        .bind(chain_id as i64)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        rows.into_iter()
            .map(|r| Activity::try_from(r).map_err(Into::into))
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHAIN STATE STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl ChainStateStore for PostgresStore {
    #[instrument(skip(self), fields(chain_id))]
    async fn get_last_block(&self, chain_id: u64) -> Result<BlockNumber> {
        let row: Option<i64> = sqlx::query_scalar(
            "SELECT block_number FROM chain_state WHERE chain_id = $1",
        )
        .bind(chain_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        Ok(BlockNumber::new(row.unwrap_or(0) as u64))
    }

    #[instrument(skip(self), fields(chain_id, block = %block.value()))]
    async fn set_last_block(&self, chain_id: u64, block: BlockNumber, hash: B256) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chain_state (chain_id, block_number, block_hash, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (chain_id) DO UPDATE SET
                block_number = EXCLUDED.block_number,
                block_hash = EXCLUDED.block_hash,
                updated_at = NOW()
            "#,
        )
        .bind(chain_id as i64)
        .bind(block.value() as i64)
        .bind(hash.as_slice())
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        debug!("last block set");
        Ok(())
    }

    #[instrument(skip(self), fields(chain_id, block = %block.value()))]
    async fn insert_block_hash(
        &self,
        chain_id: u64,
        block: BlockNumber,
        hash: B256,
        parent: B256,
        timestamp: u64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO block_hashes (chain_id, block_number, block_hash, parent_hash, timestamp)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (chain_id, block_number) DO UPDATE SET
                block_hash = EXCLUDED.block_hash,
                parent_hash = EXCLUDED.parent_hash,
                timestamp = EXCLUDED.timestamp
            "#,
        )
        .bind(chain_id as i64)
        .bind(block.value() as i64)
        .bind(hash.as_slice())
        .bind(parent.as_slice())
        .bind(timestamp as i64)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        Ok(())
    }

    #[instrument(skip(self), fields(chain_id, block = %block.value()))]
    async fn get_block_hash(&self, chain_id: u64, block: BlockNumber) -> Result<Option<B256>> {
        let row: Option<Vec<u8>> = sqlx::query_scalar(
            "SELECT block_hash FROM block_hashes WHERE chain_id = $1 AND block_number = $2",
        )
        .bind(chain_id as i64)
        .bind(block.value() as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        match row {
            Some(bytes) => {
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| InfraError::Internal("invalid block hash length in DB".into()))?;
                Ok(Some(B256::from(arr)))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(chain_id, fork_point = %fork_point.value()))]
    async fn execute_reorg_rollback(&self, chain_id: u64, fork_point: BlockNumber) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;

        sqlx::query("DELETE FROM block_hashes WHERE chain_id = $1 AND block_number > $2")
            .bind(chain_id as i64)
            .bind(fork_point.value() as i64)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;

        sqlx::query(
            r#"
            UPDATE chain_state SET block_number = $2, updated_at = NOW()
            WHERE chain_id = $1 AND block_number > $2
            "#,
        )
        .bind(chain_id as i64)
        .bind(fork_point.value() as i64)
        .execute(&mut *tx)
        .await
        .map_err(InfraError::Database)?;

        tx.commit().await.map_err(InfraError::Database)?;

        debug!("reorg rollback executed");
        Ok(())
    }

    #[instrument(skip(self), fields(chain_id, keep_blocks))]
    async fn prune_old_blocks(&self, chain_id: u64, keep_blocks: u64) -> Result<u64> {
        let max_block: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(block_number) FROM block_hashes WHERE chain_id = $1",
        )
        .bind(chain_id as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        let Some(max) = max_block else {
            return Ok(0);
        };

        let cutoff = max - keep_blocks as i64;
        if cutoff <= 0 {
            return Ok(0);
        }

        let result = sqlx::query("DELETE FROM block_hashes WHERE chain_id = $1 AND block_number < $2")
            .bind(chain_id as i64)
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(InfraError::Database)?;

        debug!(pruned = result.rows_affected(), "old blocks pruned");
        Ok(result.rows_affected())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    // Full integration tests require a PostgreSQL database and live in
    // tests/store_integration.rs.

    #[test]
    fn postgres_store_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PostgresStore>();
    }
}
