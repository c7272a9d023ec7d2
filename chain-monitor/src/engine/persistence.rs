//! Persistence and emission (C7).
//!
//! Idempotent activity insert, followed by best-effort event emission and a
//! fresh balance fetch. A publish or balance-fetch failure is logged but
//! never rolls back the activity row: the row is the durable fact, the
//! events are a courtesy.

use std::collections::HashSet;

use chrono::Utc;
use evm_provider::ChainProvider;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::ports::{ActivityStore, EventPublisher};
use crate::types::entities::Activity;
use crate::types::events::{
    ActivityEvent, BalanceUpdateEvent, DepositDetectedEvent, WithdrawDetectedEvent,
};
use crate::types::primitives::Amount;

/// Persists detected activity and emits the corresponding events.
///
/// Generic over the provider so it can refresh balances through whichever
/// chain's `ChainProvider` the owning worker holds.
pub struct Persistence<A, E, P> {
    activity_store: A,
    publisher: E,
    provider: P,
}

impl<A, E, P> Persistence<A, E, P>
where
    A: ActivityStore,
    E: EventPublisher,
    P: ChainProvider,
{
    /// Wire a persistence/emitter instance from its three collaborators.
    pub const fn new(activity_store: A, publisher: E, provider: P) -> Self {
        Self {
            activity_store,
            publisher,
            provider,
        }
    }

    /// Insert a detected activity row and, if it was newly inserted, emit
    /// `depositDetected`/`withdrawDetected` followed by a refreshed
    /// `balanceUpdate`.
    ///
    /// Returns `true` if the row was newly inserted (a duplicate is a
    /// successful no-op, matching the SQL-layer `ON CONFLICT DO NOTHING`
    /// contract).
    ///
    /// # Errors
    ///
    /// Returns an error only if the database insert itself fails; publish
    /// and balance-fetch failures are logged and swallowed.
    #[instrument(skip(self, activity), fields(chain_id = activity.chain_id, tx_hash = %activity.tx_hash))]
    pub async fn record(&self, activity: &Activity) -> Result<bool> {
        self.record_if(activity, true).await
    }

    /// Like [`record`](Self::record), but only refreshes the balance when
    /// `refresh_balance` is `true`. Lets a caller processing many activities
    /// in one pass coalesce refreshes per `(chain, wallet)` via
    /// [`BalanceRefreshBatch`] instead of firing one per activity.
    ///
    /// # Errors
    ///
    /// Returns an error only if the database insert itself fails; publish
    /// and balance-fetch failures are logged and swallowed.
    #[instrument(skip(self, activity), fields(chain_id = activity.chain_id, tx_hash = %activity.tx_hash))]
    pub async fn record_if(&self, activity: &Activity, refresh_balance: bool) -> Result<bool> {
        let inserted = self.activity_store.insert_activity(activity).await?;
        if !inserted {
            return Ok(false);
        }

        let activity_event = activity_event_for(activity);
        if let Err(err) = self.publisher.publish(&activity_event).await {
            warn!(error = %err, "failed to publish activity event");
        }

        if refresh_balance {
            if let Some(user_id) = activity.user_id {
                self.refresh_balance(activity.wallet_address, activity.chain_id, user_id)
                    .await;
            }
        }

        Ok(true)
    }

    /// Backfill gas usage/cost on a previously-inserted activity, once the
    /// transaction receipt is known.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub async fn record_gas(&self, id: Uuid, gas_used: u64, gas_cost: Amount) -> Result<()> {
        self.activity_store.record_gas(id, gas_used, gas_cost).await
    }

    async fn refresh_balance(&self, wallet_address: crate::types::primitives::EthAddress, chain_id: u64, user_id: Uuid) {
        match self.provider.get_balance(wallet_address.into()).await {
            Ok(balance) => {
                let event = ActivityEvent::BalanceUpdate(BalanceUpdateEvent::new(
                    wallet_address,
                    Amount::from(balance),
                    chain_id,
                    user_id,
                    Utc::now(),
                ));
                if let Err(err) = self.publisher.publish(&event).await {
                    warn!(error = %err, "failed to publish balance update");
                }
            }
            Err(err) => {
                warn!(error = %err, %wallet_address, "balance refresh failed, activity row already committed");
            }
        }
    }
}

fn activity_event_for(activity: &Activity) -> ActivityEvent {
    match activity.activity_type {
        crate::types::enums::ActivityType::Deposit => {
            ActivityEvent::DepositDetected(DepositDetectedEvent::new(
                activity.wallet_address,
                activity.from_address,
                activity.amount,
                activity.tx_hash,
                activity.block_number,
                activity.block_timestamp,
                activity.chain_id,
                activity.user_id,
            ))
        }
        crate::types::enums::ActivityType::Withdraw => {
            ActivityEvent::WithdrawDetected(WithdrawDetectedEvent::new(
                activity.wallet_address,
                activity.to_address,
                activity.amount,
                activity.tx_hash,
                activity.block_number,
                activity.block_timestamp,
                activity.chain_id,
                activity.user_id,
            ))
        }
    }
}

/// Coalesces balance-refresh requests within a single batch so the same
/// `(chain, wallet)` pair is fetched at most once per pass, per §4.7.
#[derive(Debug, Default)]
pub struct BalanceRefreshBatch {
    seen: HashSet<(u64, crate::types::primitives::EthAddress)>,
}

impl BalanceRefreshBatch {
    /// Create an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time `(chain_id, address)` is seen in this
    /// batch, `false` on every subsequent call for the same pair.
    pub fn should_refresh(&mut self, chain_id: u64, address: crate::types::primitives::EthAddress) -> bool {
        self.seen.insert((chain_id, address))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use evm_provider::mock::MockProvider;

    use super::*;
    use crate::ports::streaming_mocks::MockEventPublisher;
    use crate::types::enums::{ActivityStatus, ActivityType};
    use crate::types::primitives::{BlockNumber, EthAddress};

    #[derive(Default)]
    struct FakeActivityStore {
        inserted: tokio::sync::Mutex<Vec<Activity>>,
        duplicate_next: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl ActivityStore for FakeActivityStore {
        async fn insert_activity(&self, activity: &Activity) -> Result<bool> {
            if self
                .duplicate_next
                .swap(false, std::sync::atomic::Ordering::SeqCst)
            {
                return Ok(false);
            }
            self.inserted.lock().await.push(*activity);
            Ok(true)
        }

        async fn record_gas(&self, _id: Uuid, _gas_used: u64, _gas_cost: Amount) -> Result<()> {
            Ok(())
        }

        async fn get_activity(
            &self,
            _tx_hash: alloy::primitives::TxHash,
            _chain_id: u64,
            _wallet_address: &EthAddress,
            _activity_type: ActivityType,
        ) -> Result<Option<Activity>> {
            Ok(None)
        }

        async fn get_recent_activities(
            &self,
            _wallet_address: &EthAddress,
            _chain_id: u64,
            _limit: u32,
        ) -> Result<Vec<Activity>> {
            Ok(vec![])
        }
    }

    fn sample_activity(user_id: Option<Uuid>) -> Activity {
        Activity {
            id: Uuid::new_v4(),
            activity_type: ActivityType::Deposit,
            wallet_address: EthAddress::new([1u8; 20]),
            from_address: EthAddress::new([2u8; 20]),
            to_address: EthAddress::new([1u8; 20]),
            amount: Amount::parse("1000").unwrap(),
            tx_hash: alloy::primitives::TxHash::ZERO,
            block_number: BlockNumber::new(10),
            block_timestamp: Utc::now(),
            chain_id: 8453,
            status: ActivityStatus::Confirmed,
            gas_used: None,
            gas_cost: None,
            user_id,
        }
    }

    #[tokio::test]
    async fn new_activity_publishes_event_and_refreshes_balance() {
        let persistence = Persistence::new(
            FakeActivityStore::default(),
            MockEventPublisher::default(),
            MockProvider::with_chain_id(8453),
        );

        let user_id = Uuid::new_v4();
        let inserted = persistence.record(&sample_activity(Some(user_id))).await.unwrap();
        assert!(inserted);
        assert_eq!(
            persistence
                .publisher
                .publish_count
                .load(std::sync::atomic::Ordering::SeqCst),
            2,
            "expected a depositDetected and a balanceUpdate publish"
        );
    }

    #[tokio::test]
    async fn duplicate_insert_does_not_publish() {
        let store = FakeActivityStore::default();
        store
            .duplicate_next
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let persistence = Persistence::new(store, MockEventPublisher::default(), MockProvider::with_chain_id(8453));

        let inserted = persistence.record(&sample_activity(None)).await.unwrap();
        assert!(!inserted);
        assert_eq!(
            persistence
                .publisher
                .publish_count
                .load(std::sync::atomic::Ordering::SeqCst),
            0
        );
    }

    #[tokio::test]
    async fn no_owning_user_skips_balance_refresh() {
        let persistence = Persistence::new(
            FakeActivityStore::default(),
            MockEventPublisher::default(),
            MockProvider::with_chain_id(8453),
        );

        persistence.record(&sample_activity(None)).await.unwrap();
        assert_eq!(
            persistence
                .publisher
                .publish_count
                .load(std::sync::atomic::Ordering::SeqCst),
            1,
            "only the depositDetected event fires without a known user"
        );
    }

    #[tokio::test]
    async fn record_if_skips_refresh_when_already_seen_in_batch() {
        let persistence = Persistence::new(
            FakeActivityStore::default(),
            MockEventPublisher::default(),
            MockProvider::with_chain_id(8453),
        );

        let user_id = Uuid::new_v4();
        let mut activity = sample_activity(Some(user_id));
        let mut batch = BalanceRefreshBatch::new();

        let first_refresh = batch.should_refresh(activity.chain_id, activity.wallet_address);
        persistence.record_if(&activity, first_refresh).await.unwrap();
        assert_eq!(
            persistence
                .publisher
                .publish_count
                .load(std::sync::atomic::Ordering::SeqCst),
            2,
            "first deposit into a wallet still gets a balance refresh"
        );

        activity.id = Uuid::new_v4();
        activity.tx_hash = alloy::primitives::TxHash::from([1u8; 32]);
        let second_refresh = batch.should_refresh(activity.chain_id, activity.wallet_address);
        persistence.record_if(&activity, second_refresh).await.unwrap();
        assert_eq!(
            persistence
                .publisher
                .publish_count
                .load(std::sync::atomic::Ordering::SeqCst),
            3,
            "second deposit into the same wallet this pass publishes depositDetected but not another balanceUpdate"
        );
    }

    #[test]
    fn balance_refresh_batch_dedupes_within_a_pass() {
        let mut batch = BalanceRefreshBatch::new();
        let addr = EthAddress::new([9u8; 20]);
        assert!(batch.should_refresh(8453, addr));
        assert!(!batch.should_refresh(8453, addr));
        assert!(batch.should_refresh(1, addr), "different chain is a distinct key");
    }
}
