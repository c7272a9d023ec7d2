//! Polling scheduler (C4).
//!
//! A safety net under the streaming subscriber (C3): a plain
//! `tokio::time::interval` tick that dispatches a block-processor check
//! whenever the stream hasn't reported a fresh head recently. Grounded
//! loosely on `fleet-core/scheduler/mod.rs`'s small dedicated ticking
//! struct, though the mechanism here is a bare interval, not jitter-based
//! timing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Tracks whether the stream has reported a fresh head recently, so the
/// poller can stay quiet while C3 is doing its job.
#[derive(Debug)]
pub struct StreamHealth {
    last_pushed: std::sync::Mutex<Instant>,
    max_silence: Duration,
}

impl StreamHealth {
    /// Create a health tracker considering the stream unhealthy once more
    /// than `max_silence` has elapsed since the last push.
    #[must_use]
    pub fn new(max_silence: Duration) -> Self {
        Self {
            last_pushed: std::sync::Mutex::new(Instant::now() - max_silence),
            max_silence,
        }
    }

    /// Record that the stream just delivered a fresh head.
    pub fn mark_pushed(&self) {
        *self.last_pushed.lock().expect("stream health lock poisoned") = Instant::now();
    }

    /// Whether the stream is currently considered healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.last_pushed.lock().expect("stream health lock poisoned").elapsed() < self.max_silence
    }
}

/// Dispatches a block-processor check on a fixed interval whenever the
/// stream has gone quiet.
pub struct PollScheduler {
    chain_id: u64,
    interval: Duration,
    startup_offset: Duration,
    health: Arc<StreamHealth>,
    dispatch: mpsc::Sender<()>,
}

impl PollScheduler {
    /// Create a scheduler for `chain_id`. `startup_offset` staggers the
    /// first tick across chains to avoid a startup thundering herd.
    #[must_use]
    pub fn new(
        chain_id: u64,
        interval: Duration,
        startup_offset: Duration,
        health: Arc<StreamHealth>,
        dispatch: mpsc::Sender<()>,
    ) -> Self {
        Self {
            chain_id,
            interval,
            startup_offset,
            health,
            dispatch,
        }
    }

    /// Run until `shutdown` is cancelled.
    #[instrument(skip(self, shutdown), fields(chain_id = self.chain_id))]
    pub async fn run(&self, shutdown: &CancellationToken) {
        tokio::select! {
            () = shutdown.cancelled() => return,
            () = tokio::time::sleep(self.startup_offset) => {}
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    if self.health.is_healthy() {
                        debug!(chain_id = self.chain_id, "skipping poll tick, stream is healthy");
                        continue;
                    }
                    let _ = self.dispatch.try_send(());
                }
            }
        }
    }
}
