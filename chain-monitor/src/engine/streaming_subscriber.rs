//! Streaming subscriber (C3).
//!
//! Grounded on `indexer/realtime_processor.rs`'s subscribe-with-reconnect
//! shape, adapted from log subscription to a plain new-block-number stream.
//! Every number received updates the head tracker and schedules a debounced
//! dispatch; a stream error or close triggers a reconnect after a delay
//! derived from the chain's breaker state.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::engine::head_tracker::HeadBlockTracker;
use crate::engine::poll_scheduler::StreamHealth;
use crate::engine::throttle::Throttle;
use crate::error::{InfraError, Result};
use crate::types::primitives::BlockNumber;

/// Long-gap-on-reconnect threshold, as a multiple of `INITIAL_WINDOW`: if the
/// stream was down long enough that the head advanced by more than this many
/// initial windows, the reorg-scan distance is truncated rather than
/// replaying every missed block.
const LONG_GAP_WINDOWS: u64 = 4;

/// Delay before the first reconnect attempt when the breaker is not open.
const BASE_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// A live stream of newly observed block numbers for one chain.
pub type BlockNumberStream = Pin<Box<dyn Stream<Item = Result<u64>> + Send>>;

/// Abstraction over "connect and subscribe to new block numbers", so the
/// reconnect/debounce loop below can be driven by a fake stream in tests.
#[async_trait]
pub trait BlockNumberSource: Send + Sync {
    /// Open a subscription, returning a stream of block numbers as they
    /// arrive. Each stream item is one "new head" notification.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection itself cannot be established.
    async fn subscribe(&self) -> Result<BlockNumberStream>;
}

/// `BlockNumberSource` backed by an alloy WebSocket `newHeads` subscription.
#[derive(Debug, Clone)]
pub struct AlloyBlockNumberSource {
    ws_url: String,
}

impl AlloyBlockNumberSource {
    /// Create a source that connects to `ws_url` on each (re)subscribe.
    #[must_use]
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self { ws_url: ws_url.into() }
    }
}

#[async_trait]
impl BlockNumberSource for AlloyBlockNumberSource {
    async fn subscribe(&self) -> Result<BlockNumberStream> {
        let connect = WsConnect::new(&self.ws_url);
        let provider = ProviderBuilder::new()
            .connect_ws(connect)
            .await
            .map_err(|err| InfraError::StreamClosed(err.to_string()))?;

        let subscription = provider
            .subscribe_blocks()
            .await
            .map_err(|err| InfraError::StreamClosed(err.to_string()))?;

        let stream = subscription
            .into_stream()
            .map(|header| Ok(header.number));

        Ok(Box::pin(stream))
    }
}

/// Outcome of one subscription session, fed back into the reconnect loop.
enum SessionOutcome {
    /// Cancellation was observed; the subscriber should stop entirely.
    ShuttingDown,
    /// The stream ended or errored; the caller should reconnect.
    Disconnected,
}

/// Drives a single chain's push subscription: reconnects with breaker-aware
/// backoff, truncates the scan window after a long gap, and notifies a
/// dispatch channel (debounced) every time new blocks are observed.
pub struct StreamingSubscriber<S> {
    chain_id: u64,
    source: S,
    head_tracker: Arc<HeadBlockTracker>,
    throttle: Arc<Throttle>,
    dispatch: mpsc::Sender<()>,
    debounce: Duration,
    initial_window: u64,
    health: Option<Arc<StreamHealth>>,
}

impl<S: BlockNumberSource> StreamingSubscriber<S> {
    /// Wire a subscriber for `chain_id`. `dispatch` receives a unit signal
    /// each time a debounced batch of new blocks should trigger a block
    /// processor check; the receiving end is expected to coalesce bursts
    /// (a bounded channel of capacity 1 is sufficient).
    #[must_use]
    pub fn new(
        chain_id: u64,
        source: S,
        head_tracker: Arc<HeadBlockTracker>,
        throttle: Arc<Throttle>,
        dispatch: mpsc::Sender<()>,
        debounce: Duration,
        initial_window: u64,
    ) -> Self {
        Self {
            chain_id,
            source,
            head_tracker,
            throttle,
            dispatch,
            debounce,
            initial_window,
            health: None,
        }
    }

    /// Attach the polling scheduler's health tracker (C4), so every block
    /// observed here marks the stream healthy and keeps the safety-net
    /// poller quiet.
    #[must_use]
    pub fn with_health(mut self, health: Arc<StreamHealth>) -> Self {
        self.health = Some(health);
        self
    }

    /// Run until `shutdown` is cancelled, reconnecting indefinitely on
    /// stream failure. Never returns an error: subscription failure must
    /// never block chain progress, since the polling scheduler (C4) keeps
    /// dispatching checks in the meantime.
    #[instrument(skip(self, shutdown), fields(chain_id = self.chain_id))]
    pub async fn run(&self, shutdown: &CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                return;
            }

            match self.source.subscribe().await {
                Ok(stream) => match self.drain(stream, shutdown).await {
                    SessionOutcome::ShuttingDown => return,
                    SessionOutcome::Disconnected => {}
                },
                Err(err) => {
                    warn!(chain_id = self.chain_id, error = %err, "stream connect failed");
                }
            }

            if shutdown.is_cancelled() {
                return;
            }
            self.wait_before_reconnect(shutdown).await;
        }
    }

    async fn wait_before_reconnect(&self, shutdown: &CancellationToken) {
        let delay = self
            .throttle
            .breaker_reopen_in_secs()
            .map_or(BASE_RECONNECT_DELAY, Duration::from_secs);

        tokio::select! {
            () = shutdown.cancelled() => {}
            () = tokio::time::sleep(delay) => {}
        }
    }

    async fn drain(&self, mut stream: BlockNumberStream, shutdown: &CancellationToken) -> SessionOutcome {
        info!(chain_id = self.chain_id, "stream subscription established");
        let mut debounce_pending = false;

        loop {
            let debounce_timer = async {
                if debounce_pending {
                    tokio::time::sleep(self.debounce).await;
                } else {
                    std::future::pending::<()>().await;
                }
            };

            tokio::select! {
                () = shutdown.cancelled() => return SessionOutcome::ShuttingDown,
                item = stream.next() => {
                    match item {
                        Some(Ok(number)) => {
                            self.on_new_block(number).await;
                            debounce_pending = true;
                        }
                        Some(Err(err)) => {
                            warn!(chain_id = self.chain_id, error = %err, "stream item error");
                            return SessionOutcome::Disconnected;
                        }
                        None => {
                            warn!(chain_id = self.chain_id, "stream ended");
                            return SessionOutcome::Disconnected;
                        }
                    }
                }
                () = debounce_timer => {
                    debounce_pending = false;
                    let _ = self.dispatch.try_send(());
                }
            }
        }
    }

    async fn on_new_block(&self, number: u64) {
        debug!(chain_id = self.chain_id, block = number, "head observed on stream");
        self.head_tracker.update(self.chain_id, BlockNumber::new(number)).await;
        if let Some(health) = &self.health {
            health.mark_pushed();
        }
    }

    /// Truncate `last_checked_block` after a long reconnect gap, returning
    /// the adjusted value. A gap wider than `LONG_GAP_WINDOWS *
    /// initial_window` is assumed to be a stale-restart scenario rather than
    /// a chain worth fully backfilling.
    #[must_use]
    pub fn truncate_after_gap(&self, last_checked: BlockNumber, head: BlockNumber) -> BlockNumber {
        let gap = head.get().saturating_sub(last_checked.get());
        let threshold = self.initial_window.saturating_mul(LONG_GAP_WINDOWS);
        if gap > threshold {
            BlockNumber::new(head.get().saturating_sub(self.initial_window))
        } else {
            last_checked
        }
    }
}
