//! Integration tests for chain-state reorg bookkeeping against a real
//! `PostgreSQL` instance: block-hash recording, fork-point continuity
//! checks, and rollback.

mod common;

use alloy::primitives::B256;

use chain_monitor::ports::ChainStateStore;
use chain_monitor::types::primitives::BlockNumber;
use common::fixtures::TestDb;

const CHAIN_ID: u64 = 8453;

#[tokio::test]
async fn block_hash_roundtrips() {
    let db = TestDb::new().await;
    let hash = B256::from([0x11; 32]);
    let parent = B256::from([0x10; 32]);

    db.store
        .insert_block_hash(CHAIN_ID, BlockNumber::new(101), hash, parent, 1001)
        .await
        .unwrap();

    let found = db
        .store
        .get_block_hash(CHAIN_ID, BlockNumber::new(101))
        .await
        .unwrap();

    assert_eq!(found, Some(hash));
}

#[tokio::test]
async fn missing_block_hash_returns_none() {
    let db = TestDb::new().await;
    let found = db
        .store
        .get_block_hash(CHAIN_ID, BlockNumber::new(999))
        .await
        .unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn insert_block_hash_is_upsert() {
    let db = TestDb::new().await;
    let first = B256::from([0x01; 32]);
    let second = B256::from([0x02; 32]);

    db.store
        .insert_block_hash(CHAIN_ID, BlockNumber::new(50), first, B256::ZERO, 500)
        .await
        .unwrap();
    db.store
        .insert_block_hash(CHAIN_ID, BlockNumber::new(50), second, B256::ZERO, 501)
        .await
        .unwrap();

    let found = db
        .store
        .get_block_hash(CHAIN_ID, BlockNumber::new(50))
        .await
        .unwrap();
    assert_eq!(found, Some(second), "re-insert of same block number must overwrite, not duplicate");
}

#[tokio::test]
async fn chain_of_blocks_is_continuous() {
    let db = TestDb::new().await;
    let hash_100 = B256::from([0x10; 32]);
    let hash_101 = B256::from([0x11; 32]);
    let hash_102 = B256::from([0x12; 32]);

    db.store
        .insert_block_hash(CHAIN_ID, BlockNumber::new(100), hash_100, B256::ZERO, 1000)
        .await
        .unwrap();
    db.store
        .insert_block_hash(CHAIN_ID, BlockNumber::new(101), hash_101, hash_100, 1001)
        .await
        .unwrap();
    db.store
        .insert_block_hash(CHAIN_ID, BlockNumber::new(102), hash_102, hash_101, 1002)
        .await
        .unwrap();

    let stored_101 = db.store.get_block_hash(CHAIN_ID, BlockNumber::new(101)).await.unwrap().unwrap();
    assert_eq!(stored_101, hash_101);
}

#[tokio::test]
async fn reorg_rollback_deletes_blocks_past_fork_point() {
    let db = TestDb::new().await;

    for (n, byte) in [(100u64, 0x10u8), (101, 0x11), (102, 0x12), (103, 0x13)] {
        db.store
            .insert_block_hash(CHAIN_ID, BlockNumber::new(n), B256::from([byte; 32]), B256::ZERO, 1000 + n)
            .await
            .unwrap();
    }
    db.store
        .set_last_block(CHAIN_ID, BlockNumber::new(103), B256::from([0x13; 32]))
        .await
        .unwrap();

    db.store
        .execute_reorg_rollback(CHAIN_ID, BlockNumber::new(101))
        .await
        .unwrap();

    assert!(db.store.get_block_hash(CHAIN_ID, BlockNumber::new(101)).await.unwrap().is_some());
    assert!(
        db.store.get_block_hash(CHAIN_ID, BlockNumber::new(102)).await.unwrap().is_none(),
        "blocks past the fork point must be deleted"
    );
    assert!(db.store.get_block_hash(CHAIN_ID, BlockNumber::new(103)).await.unwrap().is_none());

    let last = db.store.get_last_block(CHAIN_ID).await.unwrap();
    assert_eq!(last.value(), 101, "last_checked_block must roll back to the fork point");
}

#[tokio::test]
async fn reorg_rollback_is_scoped_to_its_chain() {
    let db = TestDb::new().await;
    const OTHER_CHAIN: u64 = 1;

    db.store
        .insert_block_hash(CHAIN_ID, BlockNumber::new(200), B256::from([0x20; 32]), B256::ZERO, 2000)
        .await
        .unwrap();
    db.store
        .insert_block_hash(OTHER_CHAIN, BlockNumber::new(200), B256::from([0x21; 32]), B256::ZERO, 2000)
        .await
        .unwrap();

    db.store
        .execute_reorg_rollback(CHAIN_ID, BlockNumber::new(50))
        .await
        .unwrap();

    assert!(
        db.store.get_block_hash(CHAIN_ID, BlockNumber::new(200)).await.unwrap().is_none(),
        "rollback must clear the target chain's blocks past the fork point"
    );
    assert!(
        db.store.get_block_hash(OTHER_CHAIN, BlockNumber::new(200)).await.unwrap().is_some(),
        "rollback on one chain must not touch another chain's rows"
    );
}

#[tokio::test]
async fn prune_old_blocks_keeps_recent_window() {
    let db = TestDb::new().await;
    for n in 0u64..10 {
        db.store
            .insert_block_hash(CHAIN_ID, BlockNumber::new(n), B256::from([n as u8; 32]), B256::ZERO, n)
            .await
            .unwrap();
    }

    let pruned = db.store.prune_old_blocks(CHAIN_ID, 3).await.unwrap();

    assert!(pruned > 0);
    assert!(db.store.get_block_hash(CHAIN_ID, BlockNumber::new(0)).await.unwrap().is_none());
    assert!(db.store.get_block_hash(CHAIN_ID, BlockNumber::new(9)).await.unwrap().is_some());
}
