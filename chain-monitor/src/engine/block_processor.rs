//! Block processor (C5) — the heart of the engine.
//!
//! Grounded on `indexer/block_processor.rs`'s concurrent-fetch/batching
//! structure, adapted from log-filter matching to per-transaction matching,
//! and on `indexer/checkpoint.rs`'s progress-persistence idiom for
//! `last_checked_block`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use alloy::eips::BlockNumberOrTag;
use alloy::providers::Provider;
use alloy::rpc::types::{BlockTransactions, BlockTransactionsKind};
use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::engine::admission::AdmissionController;
use crate::engine::head_tracker::HeadBlockTracker;
use crate::engine::persistence::{BalanceRefreshBatch, Persistence};
use crate::engine::throttle::Throttle;
use crate::engine::wallet_registry::WalletRegistry;
use crate::error::{InfraError, Result};
use crate::ports::{ActivityStore, ChainStateStore, EventPublisher};
use crate::types::entities::Activity;
use crate::types::enums::{ActivityStatus, ActivityType};
use crate::types::primitives::{Amount, BlockNumber, EthAddress};

/// Long-gap logging threshold: beyond this many blocks in one window, the
/// gap is logged but still processed in full (truncation only happens on
/// stream reconnect, in C3).
const LONG_GAP_LOG_THRESHOLD: u64 = 1_000;

/// How far back a fork point search walks before giving up and rolling back
/// to the floor of the window instead. Matches `ports/store.rs`'s
/// documented 256-block retention, quartered since a fork this deep would
/// mean the chain itself is unstable well beyond what a rollback here can
/// meaningfully recover from.
const REORG_MAX_DEPTH: u64 = 64;

/// A deposit detected while matching one block's transactions.
struct DepositCandidate {
    wallet: EthAddress,
    from: EthAddress,
    amount: Amount,
    tx_hash: alloy::primitives::TxHash,
    block: BlockNumber,
    timestamp: DateTime<Utc>,
    user_id: Option<Uuid>,
}

/// Tunable knobs for a check pass, sourced from `EngineSettings`.
#[derive(Debug, Clone, Copy)]
pub struct BlockProcessorConfig {
    /// Max retries per block fetch before giving up on that block.
    pub max_retries: u32,
    /// Base exponential back-off delay.
    pub retry_base: Duration,
    /// Cap on exponential back-off delay.
    pub retry_max: Duration,
}

/// Drives one chain's block-by-block deposit matching.
///
/// `P` is the raw alloy transport provider used for block/transaction
/// fetches; `A`/`E`/`Prov` parameterize the [`Persistence`] collaborator
/// used to record matches.
pub struct BlockProcessor<P, A, E, Prov> {
    chain_id: u64,
    provider: Arc<P>,
    admission: Arc<AdmissionController>,
    throttle: Arc<Throttle>,
    head_tracker: Arc<HeadBlockTracker>,
    wallet_registry: Arc<WalletRegistry>,
    chain_state_store: Arc<dyn ChainStateStore>,
    persistence: Arc<Persistence<A, E, Prov>>,
    check_lock: AsyncMutex<()>,
    blocks_in_flight: SyncMutex<HashSet<u64>>,
    config: BlockProcessorConfig,
}

impl<P, A, E, Prov> BlockProcessor<P, A, E, Prov>
where
    P: Provider + Send + Sync + 'static,
    A: ActivityStore,
    E: EventPublisher,
    Prov: evm_provider::ChainProvider,
{
    /// Wire a block processor for `chain_id`.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        chain_id: u64,
        provider: Arc<P>,
        admission: Arc<AdmissionController>,
        throttle: Arc<Throttle>,
        head_tracker: Arc<HeadBlockTracker>,
        wallet_registry: Arc<WalletRegistry>,
        chain_state_store: Arc<dyn ChainStateStore>,
        persistence: Arc<Persistence<A, E, Prov>>,
        config: BlockProcessorConfig,
    ) -> Self {
        Self {
            chain_id,
            provider,
            admission,
            throttle,
            head_tracker,
            wallet_registry,
            chain_state_store,
            persistence,
            check_lock: AsyncMutex::new(()),
            blocks_in_flight: SyncMutex::new(HashSet::new()),
            config,
        }
    }

    /// Run one check pass: single-flight, breaker-gated, batches the window
    /// `[last_checked_block + 1, head]` and commits progress to the highest
    /// block actually processed.
    ///
    /// # Errors
    ///
    /// Returns an error only if reading `last_checked_block` or committing
    /// progress fails; per-block fetch/match failures are retried and
    /// otherwise swallowed (the block is simply left unprocessed).
    #[instrument(skip(self, concurrent_blocks, batch_pause), fields(chain_id = self.chain_id))]
    pub async fn check(
        &self,
        head_hint: Option<BlockNumber>,
        concurrent_blocks: u32,
        batch_pause: Duration,
    ) -> Result<()> {
        let Ok(_guard) = self.check_lock.try_lock() else {
            debug!(chain_id = self.chain_id, "check already in progress, skipping");
            return Ok(());
        };

        if let Some(reopen) = self.throttle.breaker_reopen_in_secs() {
            debug!(chain_id = self.chain_id, reopen, "breaker open, skipping check");
            return Ok(());
        }

        let mut last_checked = self.chain_state_store.get_last_block(self.chain_id).await?;
        let head = match head_hint {
            Some(h) => h,
            None => self.current_head().await?,
        };

        if head.get() <= last_checked.get() {
            return Ok(());
        }

        if last_checked.get() > 0 {
            if let Some(stored_hash) = self.chain_state_store.get_block_hash(self.chain_id, last_checked).await? {
                let next = last_checked.get() + 1;
                if next <= head.get() && !self.block_parent_matches(next, stored_hash).await? {
                    let fork_point = self.find_fork_point(last_checked.get()).await?;
                    warn!(
                        chain_id = self.chain_id,
                        previous = last_checked.get(),
                        fork_point,
                        "chain reorg detected, rolling back"
                    );
                    self.chain_state_store
                        .execute_reorg_rollback(self.chain_id, BlockNumber::new(fork_point))
                        .await?;
                    last_checked = BlockNumber::new(fork_point);
                }
            }
        }

        let gap = head.get() - last_checked.get();
        if gap > LONG_GAP_LOG_THRESHOLD {
            warn!(chain_id = self.chain_id, gap, "processing a large block window");
        }

        let mut highest_processed = last_checked.get();
        let mut stalled = false;
        let mut block = last_checked.get() + 1;
        let refresh_batch = SyncMutex::new(BalanceRefreshBatch::new());

        while block <= head.get() {
            let chunk_end = (block + u64::from(concurrent_blocks) - 1).min(head.get());
            let chunk: Vec<u64> = (block..=chunk_end).collect();

            let results = futures::future::join_all(
                chunk
                    .iter()
                    .copied()
                    .map(|b| self.process_one_block(b, last_checked.get(), &refresh_batch)),
            )
            .await;

            if !stalled {
                let (advanced, chunk_stalled) = advance_contiguous(highest_processed, chunk.iter().copied().zip(results));
                highest_processed = advanced;
                stalled = chunk_stalled;
            }

            block = chunk_end + 1;
            if block <= head.get() {
                tokio::time::sleep(batch_pause).await;
            }
        }

        if highest_processed > last_checked.get() {
            let hash = self
                .chain_state_store
                .get_block_hash(self.chain_id, BlockNumber::new(highest_processed))
                .await?
                .unwrap_or(alloy::primitives::B256::ZERO);
            self.chain_state_store
                .set_last_block(self.chain_id, BlockNumber::new(highest_processed), hash)
                .await?;
        }

        Ok(())
    }

    /// Whether `block_number`'s parent hash matches `expected_parent`. `true`
    /// when the block can't be fetched, since a transient fetch failure here
    /// shouldn't itself trigger a rollback — the next pass will retry.
    async fn block_parent_matches(&self, block_number: u64, expected_parent: alloy::primitives::B256) -> Result<bool> {
        let fetched = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(block_number), BlockTransactionsKind::Hashes)
            .await
            .map_err(|err| InfraError::TransientRpc(err.to_string()))?;
        Ok(fetched.is_none_or(|b| b.header.parent_hash == expected_parent))
    }

    /// Walk backward from `from` looking for the most recent block whose
    /// stored hash still matches the live chain, bounded by
    /// [`REORG_MAX_DEPTH`].
    async fn find_fork_point(&self, from: u64) -> Result<u64> {
        let floor = from.saturating_sub(REORG_MAX_DEPTH);
        let mut candidate = from;
        while candidate > floor {
            candidate -= 1;
            let Some(stored_hash) = self.chain_state_store.get_block_hash(self.chain_id, BlockNumber::new(candidate)).await? else {
                continue;
            };
            let fetched = self
                .provider
                .get_block_by_number(BlockNumberOrTag::Number(candidate), BlockTransactionsKind::Hashes)
                .await
                .map_err(|err| InfraError::TransientRpc(err.to_string()))?;
            if fetched.is_some_and(|b| b.header.hash == stored_hash) {
                return Ok(candidate);
            }
        }
        Ok(floor)
    }

    /// Fetch, match, and persist deposits for one block. Returns whether the
    /// block was successfully processed (and so can advance
    /// `last_checked_block`).
    async fn process_one_block(&self, b: u64, last_checked_block: u64, refresh_batch: &SyncMutex<BalanceRefreshBatch>) -> bool {
        if b <= last_checked_block {
            return false;
        }
        {
            let mut in_flight = self.blocks_in_flight.lock();
            if !in_flight.insert(b) {
                return false;
            }
        }

        let outcome = self.fetch_and_match_with_retry(b, refresh_batch).await;
        self.blocks_in_flight.lock().remove(&b);

        match outcome {
            Ok(()) => true,
            Err(err) => {
                warn!(chain_id = self.chain_id, block = b, error = %err, "block processing failed, will retry next pass");
                false
            }
        }
    }

    async fn fetch_and_match_with_retry(&self, b: u64, refresh_batch: &SyncMutex<BalanceRefreshBatch>) -> Result<()> {
        let candidates = self.fetch_candidates_with_retry(b).await?;
        for candidate in candidates {
            self.persist_candidate(candidate, refresh_batch).await?;
        }
        Ok(())
    }

    async fn fetch_candidates_with_retry(&self, b: u64) -> Result<Vec<DepositCandidate>> {
        let mut attempt = 0u32;
        loop {
            let permit = self.admission.acquire().await;
            let result = self.fetch_candidates(b).await;
            drop(permit);

            match result {
                Ok(candidates) => {
                    self.throttle.record_success();
                    return Ok(candidates);
                }
                Err(err) if is_rate_limited(&err) => {
                    self.throttle.record_rate_limited();
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        return Err(err);
                    }
                    let delay = backoff_delay(attempt, self.config.retry_base, self.config.retry_max);
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Fetch block `b` and apply the matching rule against the current
    /// monitored-wallet snapshot, recording its hash for reorg checks.
    /// Returns every candidate found; the caller decides what to persist.
    async fn fetch_candidates(&self, b: u64) -> Result<Vec<DepositCandidate>> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(b), BlockTransactionsKind::Full)
            .await
            .map_err(|err| InfraError::TransientRpc(err.to_string()))?
            .ok_or_else(|| InfraError::MalformedBlock(b, "block not found".into()))?;

        let timestamp = DateTime::<Utc>::from_timestamp(
            i64::try_from(block.header.timestamp).unwrap_or(i64::MAX),
            0,
        )
        .unwrap_or_else(Utc::now);

        self.chain_state_store
            .insert_block_hash(
                self.chain_id,
                BlockNumber::new(b),
                block.header.hash,
                block.header.parent_hash,
                block.header.timestamp,
            )
            .await?;

        let transactions = match &block.transactions {
            BlockTransactions::Full(txs) => txs.clone(),
            BlockTransactions::Hashes(hashes) => {
                let admission = Arc::clone(&self.admission);
                let mut fetched = Vec::with_capacity(hashes.len());
                for hash in hashes {
                    let _permit = admission.acquire().await;
                    let tx = self
                        .provider
                        .get_transaction_by_hash(*hash)
                        .await
                        .map_err(|err| InfraError::TransientRpc(err.to_string()))?
                        .ok_or_else(|| InfraError::MalformedBlock(b, format!("missing tx {hash}")))?;
                    fetched.push(tx);
                }
                fetched
            }
            BlockTransactions::Uncle => {
                return Err(InfraError::MalformedBlock(b, "uncle block has no transactions".into()).into());
            }
        };

        let wallet_set = self.wallet_registry.snapshot();
        let mut candidates = Vec::new();
        for tx in &transactions {
            if let Some(candidate) = match_transaction(tx, &wallet_set, BlockNumber::new(b), timestamp, &self.wallet_registry) {
                candidates.push(candidate);
            }
        }

        Ok(candidates)
    }

    /// Persist one candidate, refreshing the wallet's balance only the
    /// first time `refresh_batch` sees this `(chain, wallet)` pair.
    async fn persist_candidate(&self, candidate: DepositCandidate, refresh_batch: &SyncMutex<BalanceRefreshBatch>) -> Result<()> {
        let activity = Activity {
            id: Uuid::new_v4(),
            activity_type: ActivityType::Deposit,
            wallet_address: candidate.wallet,
            from_address: candidate.from,
            to_address: candidate.wallet,
            amount: candidate.amount,
            tx_hash: candidate.tx_hash,
            block_number: candidate.block,
            block_timestamp: candidate.timestamp,
            chain_id: self.chain_id,
            status: ActivityStatus::Confirmed,
            gas_used: None,
            gas_cost: None,
            user_id: candidate.user_id,
        };
        let refresh = refresh_batch.lock().should_refresh(self.chain_id, candidate.wallet);
        self.persistence.record_if(&activity, refresh).await?;
        Ok(())
    }

    /// Resolve this chain's current head through C2, polling through C1 on a
    /// cache miss.
    ///
    /// # Errors
    ///
    /// Returns an error if the fallback poll fails.
    pub async fn current_head(&self) -> Result<BlockNumber> {
        let admission = Arc::clone(&self.admission);
        let provider = Arc::clone(&self.provider);
        let (head, _source) = self
            .head_tracker
            .current_head(self.chain_id, || async move {
                let _permit = admission.acquire_headblock().await;
                let number = provider
                    .get_block_number()
                    .await
                    .map_err(|err| InfraError::TransientRpc(err.to_string()))?;
                Ok(BlockNumber::new(number))
            })
            .await?;
        Ok(head)
    }

    /// Re-scan the `window` blocks up to and including `head` for deposits
    /// into `wallet`, without advancing `last_checked_block` — that range
    /// has already been committed by earlier passes, so only candidates for
    /// the newly-registered wallet are persisted; the idempotent insert
    /// means a later regular pass covering the same blocks again is a
    /// harmless no-op.
    #[instrument(skip(self))]
    pub async fn scan_wallet_backlog(&self, wallet: EthAddress, window: u64, head: BlockNumber) -> Result<()> {
        let from = head.get().saturating_sub(window.saturating_sub(1)).max(1);
        let refresh_batch = SyncMutex::new(BalanceRefreshBatch::new());
        for b in from..=head.get() {
            let candidates = self.fetch_candidates_with_retry(b).await?;
            for candidate in candidates.into_iter().filter(|c| c.wallet == wallet) {
                self.persist_candidate(candidate, &refresh_batch).await?;
            }
        }
        Ok(())
    }
}

/// The five-point matching rule, isolated from transaction decoding so it
/// can be exercised directly against plain addresses: skip contract
/// creation (no `to`), skip zero-value, skip self-transfer, skip transfers
/// between two monitored wallets, match only transfers into a monitored
/// wallet from an unmonitored sender.
fn classify_transfer(to: Option<EthAddress>, from: EthAddress, value_is_zero: bool, wallet_set: &HashSet<EthAddress>) -> Option<EthAddress> {
    let to = to?;
    if value_is_zero {
        return None;
    }
    if from == to {
        return None;
    }
    if wallet_set.contains(&from) {
        return None;
    }
    if !wallet_set.contains(&to) {
        return None;
    }
    Some(to)
}

/// Applies the five-point matching rule from a decoded transaction.
fn match_transaction(
    tx: &alloy::rpc::types::Transaction,
    wallet_set: &HashSet<EthAddress>,
    block: BlockNumber,
    timestamp: DateTime<Utc>,
    registry: &WalletRegistry,
) -> Option<DepositCandidate> {
    use alloy::consensus::Transaction as _;

    let to = tx.to().map(EthAddress::from);
    let value = tx.value();
    let from = EthAddress::from(tx.from);
    let wallet = classify_transfer(to, from, value.is_zero(), wallet_set)?;

    Some(DepositCandidate {
        wallet,
        from,
        amount: Amount::from(value),
        tx_hash: tx.hash,
        block,
        timestamp,
        user_id: registry.owner_of(&wallet),
    })
}

/// Folds one chunk's `(block, processed)` pairs, in ascending order, into
/// the new contiguous high-water mark starting from `highest`. Returns the
/// updated mark and whether the contiguous run ended within this chunk (a
/// block that failed, or one that succeeded out of order).
fn advance_contiguous(highest: u64, ordered: impl IntoIterator<Item = (u64, bool)>) -> (u64, bool) {
    let mut highest = highest;
    for (b, processed) in ordered {
        if processed && b == highest + 1 {
            highest = b;
        } else {
            return (highest, true);
        }
    }
    (highest, false)
}

fn is_rate_limited(err: &crate::error::AppError) -> bool {
    matches!(
        err,
        crate::error::AppError::Infra(InfraError::RateLimited | InfraError::TransientRpc(_))
    )
}

fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let scaled = base.saturating_mul(1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX));
    scaled.min(cap)
}
