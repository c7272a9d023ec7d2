//! In-memory wallet registry (C8).
//!
//! Each chain worker owns a [`WalletRegistry`] snapshotting every embedded
//! wallet monitored on that chain. Reads (the block processor's hot path)
//! take a copy-on-read `Arc<HashSet<_>>` so a concurrent registration never
//! blocks or is blocked by an in-progress check pass.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::instrument;
use uuid::Uuid;

use crate::error::Result;
use crate::ports::WalletStore;
use crate::types::entities::Wallet;
use crate::types::primitives::EthAddress;

/// A newly-registered wallet whose recent history should be backfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacklogCheck {
    /// Chain the wallet was registered on.
    pub chain_id: u64,
    /// The registered address.
    pub address: EthAddress,
}

/// In-memory, per-chain registry of monitored wallets.
#[derive(Debug)]
pub struct WalletRegistry {
    chain_id: u64,
    addresses: RwLock<Arc<HashSet<EthAddress>>>,
    owners: RwLock<Arc<HashMap<EthAddress, Uuid>>>,
}

impl WalletRegistry {
    /// Create an empty registry for `chain_id`.
    #[must_use]
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            addresses: RwLock::new(Arc::new(HashSet::new())),
            owners: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Page through every wallet on this chain via `store`, building the
    /// initial snapshot. Called once at startup.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    #[instrument(skip(self, store), fields(chain_id = self.chain_id))]
    pub async fn load_all(&self, store: &dyn WalletStore, db_batch_size: u32) -> Result<usize> {
        let mut addresses = HashSet::new();
        let mut owners = HashMap::new();
        let mut offset = 0u64;

        loop {
            let page = store.load_wallets_page(offset, db_batch_size).await?;
            let page_len = page.len();
            for wallet in page {
                if wallet.chain_id != self.chain_id {
                    continue;
                }
                addresses.insert(wallet.address);
                owners.insert(wallet.address, wallet.user_id);
            }
            if page_len < db_batch_size as usize {
                break;
            }
            offset += u64::from(db_batch_size);
        }

        let count = addresses.len();
        *self.addresses.write() = Arc::new(addresses);
        *self.owners.write() = Arc::new(owners);
        Ok(count)
    }

    /// Snapshot of monitored addresses, safe to hold across a whole check
    /// pass without blocking concurrent registrations.
    #[must_use]
    pub fn snapshot(&self) -> Arc<HashSet<EthAddress>> {
        Arc::clone(&self.addresses.read())
    }

    /// Owning user for an address, if known.
    #[must_use]
    pub fn owner_of(&self, address: &EthAddress) -> Option<Uuid> {
        self.owners.read().get(address).copied()
    }

    /// Number of wallets currently monitored on this chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.addresses.read().len()
    }

    /// Whether the registry has no monitored wallets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a wallet for monitoring. Idempotent: re-registering an
    /// already-known address is a no-op and returns `None`. A genuinely new
    /// address returns a [`BacklogCheck`] the caller schedules over
    /// `NEW_WALLET_WINDOW` recent blocks.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting the wallet fails. The in-memory
    /// registry is updated only after the write succeeds.
    #[instrument(skip(self, store), fields(chain_id = self.chain_id))]
    pub async fn add(
        &self,
        store: &dyn WalletStore,
        address: EthAddress,
        user_id: Uuid,
    ) -> Result<Option<BacklogCheck>> {
        if self.addresses.read().contains(&address) {
            return Ok(None);
        }

        store
            .insert_wallet(&Wallet::new(address, self.chain_id, user_id))
            .await?;

        let mut next = (*self.addresses.read()).clone();
        let is_new = next.insert(address);
        *self.addresses.write() = Arc::new(next);

        let mut owners = (*self.owners.read()).clone();
        owners.insert(address, user_id);
        *self.owners.write() = Arc::new(owners);

        Ok(is_new.then_some(BacklogCheck {
            chain_id: self.chain_id,
            address,
        }))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::Mutex as AsyncMutex;

    use super::*;

    #[derive(Default)]
    struct FakeStore {
        wallets: AsyncMutex<Vec<Wallet>>,
    }

    #[async_trait]
    impl WalletStore for FakeStore {
        async fn load_wallets_page(&self, offset: u64, limit: u32) -> Result<Vec<Wallet>> {
            let wallets = self.wallets.lock().await;
            let start = offset as usize;
            if start >= wallets.len() {
                return Ok(vec![]);
            }
            let end = (start + limit as usize).min(wallets.len());
            Ok(wallets[start..end].to_vec())
        }

        async fn insert_wallet(&self, wallet: &Wallet) -> Result<()> {
            self.wallets.lock().await.push(*wallet);
            Ok(())
        }

        async fn get_wallet(&self, chain_id: u64, address: &EthAddress) -> Result<Option<Wallet>> {
            Ok(self
                .wallets
                .lock()
                .await
                .iter()
                .find(|w| w.chain_id == chain_id && &w.address == address)
                .copied())
        }
    }

    fn addr(byte: u8) -> EthAddress {
        EthAddress::new([byte; 20])
    }

    #[tokio::test]
    async fn load_all_filters_by_chain() {
        let store = FakeStore::default();
        store
            .insert_wallet(&Wallet::new(addr(1), 8453, Uuid::new_v4()))
            .await
            .unwrap();
        store
            .insert_wallet(&Wallet::new(addr(2), 1, Uuid::new_v4()))
            .await
            .unwrap();

        let registry = WalletRegistry::new(8453);
        let count = registry.load_all(&store, 500).await.unwrap();
        assert_eq!(count, 1);
        assert!(registry.snapshot().contains(&addr(1)));
        assert!(!registry.snapshot().contains(&addr(2)));
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let store = FakeStore::default();
        let registry = WalletRegistry::new(8453);
        let user = Uuid::new_v4();

        let first = registry.add(&store, addr(1), user).await.unwrap();
        assert!(first.is_some());

        let second = registry.add(&store, addr(1), user).await.unwrap();
        assert!(second.is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn add_returns_backlog_check_for_new_wallet() {
        let store = FakeStore::default();
        let registry = WalletRegistry::new(8453);
        let user = Uuid::new_v4();

        let backlog = registry.add(&store, addr(5), user).await.unwrap().unwrap();
        assert_eq!(backlog.chain_id, 8453);
        assert_eq!(backlog.address, addr(5));
        assert_eq!(registry.owner_of(&addr(5)), Some(user));
    }

    #[tokio::test]
    async fn snapshot_is_stable_across_mutation() {
        let store = FakeStore::default();
        let registry = WalletRegistry::new(8453);
        registry.add(&store, addr(1), Uuid::new_v4()).await.unwrap();

        let snapshot = registry.snapshot();
        registry.add(&store, addr(2), Uuid::new_v4()).await.unwrap();

        assert_eq!(snapshot.len(), 1, "prior snapshot must not observe later writes");
        assert_eq!(registry.len(), 2);
    }
}
