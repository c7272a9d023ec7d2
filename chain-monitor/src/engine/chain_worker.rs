//! Per-chain worker task.
//!
//! Owns every C1–C9 component for one configured chain and drives them to
//! completion under a single [`CancellationToken`]. Wiring follows
//! `indexer/realtime_processor.rs`'s subscribe-plus-poll shape: the
//! streaming subscriber and poll scheduler both dispatch into the same
//! coalescing channel, and a dedicated task drains it into block-processor
//! checks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{ChainConfig, EngineSettings, WithdrawalSettings};
use crate::engine::admission::AdmissionController;
use crate::engine::block_processor::{BlockProcessor, BlockProcessorConfig};
use crate::engine::head_tracker::HeadBlockTracker;
use crate::engine::persistence::Persistence;
use crate::engine::poll_scheduler::{PollScheduler, StreamHealth};
use crate::engine::streaming_subscriber::{AlloyBlockNumberSource, StreamingSubscriber};
use crate::engine::throttle::Throttle;
use crate::engine::wallet_registry::WalletRegistry;
use crate::engine::withdrawal::{WithdrawOutcome, WithdrawRequest, WithdrawalService};
use crate::error::{InfraError, Result};
use crate::ports::{ActivityStore, ChainStateStore, EventPublisher, WalletStore};
use crate::types::primitives::BlockNumber;
use evm_provider::{ChainProvider, LocalNonceManager, StandardEvmProvider};

/// Everything every chain worker shares, gathered so callers don't have to
/// pass a sprawling argument list per chain.
pub struct ChainWorkerDeps<A, E> {
    pub wallet_store: Arc<dyn WalletStore>,
    pub activity_store: Arc<A>,
    pub chain_state_store: Arc<dyn ChainStateStore>,
    pub publisher: Arc<E>,
    pub engine: EngineSettings,
    pub withdrawal: WithdrawalSettings,
}

/// Live handle to a running chain worker, held by the API layer to service
/// wallet-registration and withdrawal requests against the right chain.
pub struct ChainWorkerHandle<P, A, E> {
    chain_id: u64,
    wallet_registry: Arc<WalletRegistry>,
    wallet_store: Arc<dyn WalletStore>,
    throttle: Arc<Throttle>,
    head_tracker: Arc<HeadBlockTracker>,
    chain_state_store: Arc<dyn ChainStateStore>,
    stream_health: Arc<StreamHealth>,
    block_processor: Arc<BlockProcessor<RootProvider, A, E, P>>,
    withdrawal_service: Arc<WithdrawalService<P, A, E>>,
    new_wallet_window: u64,
    concurrent_blocks: u32,
    batch_pause: Duration,
}

impl<P, A, E> ChainWorkerHandle<P, A, E>
where
    P: ChainProvider + Clone,
    A: ActivityStore,
    E: EventPublisher,
{
    /// Register a wallet for monitoring on this chain, scheduling a backlog
    /// scan over `NEW_WALLET_WINDOW` recent blocks when it's genuinely new.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting the wallet fails or the backlog scan
    /// itself errors.
    pub async fn register_wallet(&self, address: crate::types::primitives::EthAddress, user_id: Uuid) -> Result<()> {
        let backlog = self.wallet_registry.add(self.wallet_store.as_ref(), address, user_id).await?;
        if backlog.is_none() {
            return Ok(());
        }

        info!(chain_id = self.chain_id, %address, "new wallet registered, scanning backlog window");
        let head = self.block_processor.current_head().await?;
        self.block_processor.scan_wallet_backlog(address, self.new_wallet_window, head).await
    }

    /// Force one immediate check pass over the configured block window,
    /// bypassing the debounce/poll cadence. Used for operational probing.
    ///
    /// # Errors
    ///
    /// Returns an error if the check pass fails.
    pub async fn trigger_check(&self) -> Result<()> {
        let (concurrent, pause) = self.throttle.batch_params(self.concurrent_blocks, self.batch_pause);
        self.block_processor.check(None, concurrent, pause).await
    }

    /// Originate a withdrawal on this chain.
    ///
    /// # Errors
    ///
    /// See [`WithdrawalService::withdraw`].
    pub async fn withdraw(&self, request: WithdrawRequest) -> Result<WithdrawOutcome> {
        self.withdrawal_service.withdraw(request).await
    }

    /// Snapshot diagnostics for this chain, per §6's `GET /diagnostics`.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the last-checked block from storage
    /// fails.
    pub async fn diagnostics(&self) -> Result<crate::types::entities::ChainDiagnostics> {
        let last_checked_block = self.chain_state_store.get_last_block(self.chain_id).await?;
        let last_known_head = self
            .head_tracker
            .cached_head(self.chain_id)
            .await
            .unwrap_or(last_checked_block);

        Ok(crate::types::entities::ChainDiagnostics {
            chain_id: self.chain_id,
            last_checked_block,
            last_known_head,
            wallet_count: self.wallet_registry.len(),
            stream_healthy: self.stream_health.is_healthy(),
            policy: self.throttle.current_policy().name(),
            consecutive_rate_limit_errors: self.throttle.consecutive_rate_limit_errors(),
            breaker_reopen_in_secs: self.throttle.breaker_reopen_in_secs(),
        })
    }
}

/// Build and run one chain's worker until `shutdown` is cancelled.
///
/// `ready` is fired with the worker's handle as soon as startup (wallet
/// registry load, provider connect, head seed) completes, so a caller can
/// start routing API requests before the worker has processed a single
/// block.
///
/// # Errors
///
/// Returns an error only if the initial wallet-registry load or the HTTP
/// provider connection fails; once running, per-pass failures are retried
/// internally and never surface here.
#[instrument(skip(chain, deps, admission, shutdown, ready), fields(chain_id = chain.chain_id))]
pub async fn run_chain_worker<A, E>(
    chain: ChainConfig,
    deps: Arc<ChainWorkerDeps<A, E>>,
    admission: Arc<AdmissionController>,
    shutdown: CancellationToken,
    ready: oneshot::Sender<Arc<ChainWorkerHandle<StandardEvmProvider, A, E>>>,
) -> Result<()>
where
    A: ActivityStore + Clone + 'static,
    E: EventPublisher + Clone + 'static,
{
    let chain_id = chain.chain_id;
    let engine = &deps.engine;

    let http_provider = StandardEvmProvider::new(&chain.rpc_url)
        .await
        .map_err(|err| InfraError::TransientRpc(format!("chain {chain_id}: {err}")))?;
    let parsed_rpc_url = chain
        .rpc_url
        .parse()
        .map_err(|err| InfraError::TransientRpc(format!("chain {chain_id}: invalid rpc url: {err}")))?;
    let alloy_provider: Arc<RootProvider> = Arc::new(ProviderBuilder::new().connect_http(parsed_rpc_url));

    let wallet_registry = Arc::new(WalletRegistry::new(chain_id));
    let loaded = wallet_registry
        .load_all(deps.wallet_store.as_ref(), engine.db_batch_size)
        .await?;
    info!(chain_id, wallets = loaded, "wallet registry loaded");

    let throttle = Arc::new(Throttle::new(
        engine.breaker_threshold,
        engine.breaker_cooldown(),
        engine.errors_per_minute_cap,
    ));
    let head_tracker = Arc::new(HeadBlockTracker::new(
        engine.block_cache_max_age(),
        engine.min_headblock_spacing().max(Duration::from_millis(50)),
    ));

    let last_block = deps.chain_state_store.get_last_block(chain_id).await?;
    let start_block = if last_block.get() == 0 {
        let tip = alloy_provider
            .get_block_number()
            .await
            .map_err(|err| InfraError::TransientRpc(format!("chain {chain_id}: {err}")))?;
        BlockNumber::new(tip.saturating_sub(engine.initial_window))
    } else {
        last_block
    };
    head_tracker.seed(chain_id, start_block).await;

    let nonce_manager = Arc::new(LocalNonceManager::new(http_provider.clone()));
    let persistence = Arc::new(Persistence::new(
        (*deps.activity_store).clone(),
        (*deps.publisher).clone(),
        http_provider.clone(),
    ));

    let block_processor = Arc::new(BlockProcessor::new(
        chain_id,
        Arc::clone(&alloy_provider),
        Arc::clone(&admission),
        Arc::clone(&throttle),
        Arc::clone(&head_tracker),
        Arc::clone(&wallet_registry),
        Arc::clone(&deps.chain_state_store),
        Arc::clone(&persistence),
        BlockProcessorConfig {
            max_retries: engine.max_retries,
            retry_base: engine.retry_base(),
            retry_max: engine.retry_max(),
        },
    ));

    let withdrawal_service = Arc::new(WithdrawalService::new(
        chain_id,
        http_provider.clone(),
        Arc::clone(&nonce_manager),
        Arc::clone(&wallet_registry),
        Arc::clone(&deps.wallet_store),
        Arc::clone(&persistence),
        deps.withdrawal.key_derivation_secret.clone(),
        deps.withdrawal.receipt_timeout(),
    ));

    let stream_health = Arc::new(StreamHealth::new(engine.poll_interval()));

    let handle = Arc::new(ChainWorkerHandle {
        chain_id,
        wallet_registry: Arc::clone(&wallet_registry),
        wallet_store: Arc::clone(&deps.wallet_store),
        throttle: Arc::clone(&throttle),
        head_tracker: Arc::clone(&head_tracker),
        chain_state_store: Arc::clone(&deps.chain_state_store),
        stream_health: Arc::clone(&stream_health),
        block_processor: Arc::clone(&block_processor),
        withdrawal_service,
        new_wallet_window: engine.new_wallet_window,
        concurrent_blocks: engine.concurrent_blocks,
        batch_pause: engine.batch_pause(),
    });
    let _ = ready.send(Arc::clone(&handle));

    let (dispatch_tx, mut dispatch_rx) = mpsc::channel::<()>(1);

    let check_task = {
        let block_processor = Arc::clone(&block_processor);
        let throttle = Arc::clone(&throttle);
        let shutdown = shutdown.clone();
        let concurrent_blocks = engine.concurrent_blocks;
        let batch_pause = engine.batch_pause();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => return,
                    signal = dispatch_rx.recv() => {
                        if signal.is_none() {
                            return;
                        }
                        let (concurrent, pause) = throttle.batch_params(concurrent_blocks, batch_pause);
                        if let Err(err) = block_processor.check(None, concurrent, pause).await {
                            warn!(chain_id, error = %err, "check pass failed");
                        }
                    }
                }
            }
        })
    };

    let subscriber_task = chain.streaming_url.clone().map(|ws_url| {
        let source = AlloyBlockNumberSource::new(ws_url);
        let subscriber = StreamingSubscriber::new(
            chain_id,
            source,
            Arc::clone(&head_tracker),
            Arc::clone(&throttle),
            dispatch_tx.clone(),
            engine.debounce(),
            engine.initial_window,
        )
        .with_health(Arc::clone(&stream_health));
        let shutdown = shutdown.clone();
        tokio::spawn(async move { subscriber.run(&shutdown).await })
    });

    let poll_scheduler = PollScheduler::new(
        chain_id,
        engine.poll_interval(),
        Duration::from_millis(chain_id % 1000),
        Arc::clone(&stream_health),
        dispatch_tx.clone(),
    );
    let poll_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { poll_scheduler.run(&shutdown).await })
    };

    let interval_task = {
        let dispatch_tx = dispatch_tx.clone();
        let shutdown = shutdown.clone();
        let period = engine.check_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        let _ = dispatch_tx.try_send(());
                    }
                }
            }
        })
    };

    shutdown.cancelled().await;
    drop(dispatch_tx);

    if let Some(task) = subscriber_task {
        let _ = task.await;
    }
    let _ = poll_task.await;
    let _ = interval_task.await;
    if let Err(err) = check_task.await {
        error!(chain_id, error = %err, "check task panicked");
    }

    Ok(())
}

/// Spawn one worker per configured chain. Returns the per-chain handles
/// (ready as soon as each worker finishes startup) together with a join
/// handle that resolves once every worker has exited — normally only after
/// `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if any chain worker's startup phase fails; the other
/// workers' startup is still awaited before returning.
pub async fn run_chain_workers<A, E>(
    chains: Vec<ChainConfig>,
    deps: Arc<ChainWorkerDeps<A, E>>,
    admission: Arc<AdmissionController>,
    shutdown: CancellationToken,
) -> Result<(
    HashMap<u64, Arc<ChainWorkerHandle<StandardEvmProvider, A, E>>>,
    JoinHandle<Result<()>>,
)>
where
    A: ActivityStore + Clone + 'static,
    E: EventPublisher + Clone + 'static,
{
    let mut worker_tasks = Vec::with_capacity(chains.len());
    let mut ready_rxs = Vec::with_capacity(chains.len());

    for chain in chains {
        let chain_id = chain.chain_id;
        let deps = Arc::clone(&deps);
        let admission = Arc::clone(&admission);
        let shutdown = shutdown.clone();
        let (ready_tx, ready_rx) = oneshot::channel();
        ready_rxs.push((chain_id, ready_rx));
        worker_tasks.push(tokio::spawn(async move {
            run_chain_worker(chain, deps, admission, shutdown, ready_tx).await
        }));
    }

    let mut handles = HashMap::with_capacity(ready_rxs.len());
    for (chain_id, ready_rx) in ready_rxs {
        match ready_rx.await {
            Ok(handle) => {
                handles.insert(chain_id, handle);
            }
            Err(_) => {
                return Err(InfraError::TransientRpc(format!(
                    "chain {chain_id}: worker exited before completing startup"
                ))
                .into());
            }
        }
    }

    let supervisor = tokio::spawn(async move {
        let mut first_err = None;
        for task in worker_tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(error = %err, "chain worker exited with an error");
                    first_err.get_or_insert(err);
                }
                Err(join_err) => error!(error = %join_err, "chain worker task panicked"),
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    });

    Ok((handles, supervisor))
}
