//! Per-chain monitoring engine.
//!
//! Each configured chain is driven by one [`chain_worker`] task built from the
//! components below. They are kept as independent, independently-tested
//! units and wired together only in `chain_worker` and in the process
//! entrypoint.
//!
//! | Component | Responsibility |
//! |---|---|
//! | [`admission`] | Process-wide RPC concurrency/spacing gate (C1) |
//! | [`head_tracker`] | Authoritative latest-block-per-chain cache (C2) |
//! | [`streaming_subscriber`] | Persistent push channel for new blocks (C3) |
//! | [`poll_scheduler`] | Safety-net polling when the stream is unhealthy (C4) |
//! | [`block_processor`] | Per-block deposit/withdrawal detection (C5) |
//! | [`throttle`] | Adaptive rate-limit backoff and circuit breaker (C6) |
//! | [`persistence`] | Idempotent activity insert and event emission (C7) |
//! | [`wallet_registry`] | In-memory monitored-wallet snapshot (C8) |
//! | [`withdrawal`] | Keyed withdrawal signing and broadcast (C9) |

pub mod admission;
pub mod block_processor;
pub mod chain_worker;
pub mod head_tracker;
pub mod persistence;
pub mod poll_scheduler;
pub mod streaming_subscriber;
pub mod throttle;
pub mod wallet_registry;
pub mod withdrawal;

pub use admission::AdmissionController;
pub use block_processor::{BlockProcessor, BlockProcessorConfig};
pub use chain_worker::{run_chain_worker, run_chain_workers, ChainWorkerDeps, ChainWorkerHandle};
pub use head_tracker::{HeadBlockTracker, HeadSource};
pub use persistence::{BalanceRefreshBatch, Persistence};
pub use throttle::Throttle;
pub use wallet_registry::{BacklogCheck, WalletRegistry};
pub use withdrawal::{WithdrawOutcome, WithdrawRequest, WithdrawalService};
