//! Live network smoke test.
//!
//! Exercises `StandardEvmProvider` and a full `BlockProcessor` check pass
//! against a real public EVM RPC endpoint. Ignored by default since it
//! needs internet access and a live chain; run explicitly with:
//!
//! ```bash
//! cargo test --test live_network_test -- --ignored --nocapture
//! ```
//!
//! `LIVE_RPC_URL` overrides the default public endpoint (a free-tier Base
//! mainnet RPC). Point it at any HTTP JSON-RPC endpoint to test against a
//! different chain.

mod common;

use std::sync::Arc;
use std::time::Duration;

use alloy::providers::{Provider, ProviderBuilder, RootProvider};

use chain_monitor::engine::{
    AdmissionController, BlockProcessor, BlockProcessorConfig, HeadBlockTracker, Persistence,
    Throttle, WalletRegistry,
};
use chain_monitor::ports::ChainStateStore;
use chain_monitor::streaming::NoOpPublisher;
use common::fixtures::TestDb;
use evm_provider::StandardEvmProvider;

const DEFAULT_RPC: &str = "https://mainnet.base.org";

fn rpc_url() -> String {
    std::env::var("LIVE_RPC_URL").unwrap_or_else(|_| DEFAULT_RPC.to_string())
}

#[tokio::test]
#[ignore = "requires network access to a live RPC endpoint"]
async fn standard_provider_connects_and_reports_chain_id() {
    let provider = StandardEvmProvider::new(&rpc_url()).await.expect("failed to connect to RPC");
    assert!(evm_provider::ChainProvider::chain_id(&provider) > 0);
}

#[tokio::test]
#[ignore = "requires network access to a live RPC endpoint"]
async fn block_processor_advances_last_checked_block() {
    let db = TestDb::new().await;
    let url = rpc_url().parse().expect("valid RPC url");
    let raw_provider: Arc<RootProvider> = Arc::new(ProviderBuilder::new().connect_http(url));
    let chain_id = raw_provider.get_chain_id().await.expect("chain id query failed");

    let head = raw_provider.get_block_number().await.expect("block number query failed");
    // Start just behind the live head so the check pass has real work to do.
    db.store
        .set_last_block(chain_id, chain_monitor::types::primitives::BlockNumber::new(head.saturating_sub(2)), alloy::primitives::B256::ZERO)
        .await
        .unwrap();

    let standard_provider = StandardEvmProvider::new(&rpc_url()).await.expect("failed to connect to RPC");
    let wallet_registry = Arc::new(WalletRegistry::new(chain_id));
    let chain_state_store: Arc<dyn ChainStateStore> = Arc::new(db.store.clone());
    let persistence = Arc::new(Persistence::new(db.store.clone(), NoOpPublisher, standard_provider));
    let admission = Arc::new(AdmissionController::new(4, Duration::from_millis(50)));
    let throttle = Arc::new(Throttle::new(5, Duration::from_secs(30), 20));
    let head_tracker = Arc::new(HeadBlockTracker::new(Duration::from_secs(2), Duration::from_secs(5)));

    let processor = BlockProcessor::new(
        chain_id,
        raw_provider,
        admission,
        throttle,
        head_tracker,
        wallet_registry,
        chain_state_store,
        persistence,
        BlockProcessorConfig {
            max_retries: 3,
            retry_base: Duration::from_millis(100),
            retry_max: Duration::from_secs(2),
        },
    );

    processor.check(None, 4, Duration::from_millis(0)).await.expect("check pass failed");

    let last_checked = db.store.get_last_block(chain_id).await.unwrap();
    assert!(last_checked.get() >= head.saturating_sub(2), "check pass must not move last_checked_block backward");
}
