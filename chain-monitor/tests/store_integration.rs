//! Integration tests for `WalletStore`, `ActivityStore`, and `ChainStateStore`
//! against a real `PostgreSQL` instance.

mod common;

use alloy::primitives::B256;

use chain_monitor::ports::{ActivityStore, ChainStateStore, WalletStore};
use chain_monitor::types::enums::ActivityType;
use chain_monitor::types::primitives::{Amount, BlockNumber, EthAddress};
use common::fixtures::{TestDb, activity_fixtures, wallet_fixtures};

// ═══════════════════════════════════════════════════════════════════════════════
// WALLET STORE
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn wallet_insert_and_lookup() {
    let db = TestDb::new().await;
    let wallet =
        wallet_fixtures::create_test_wallet("0x1111111111111111111111111111111111111111", 8453);

    db.store.insert_wallet(&wallet).await.unwrap();

    let found = db
        .store
        .get_wallet(8453, &wallet.address)
        .await
        .unwrap()
        .expect("wallet should exist");

    assert_eq!(found.address, wallet.address);
    assert_eq!(found.user_id, wallet.user_id);
}

#[tokio::test]
async fn wallet_insert_is_idempotent() {
    let db = TestDb::new().await;
    let wallet =
        wallet_fixtures::create_test_wallet("0x2222222222222222222222222222222222222222", 8453);

    db.store.insert_wallet(&wallet).await.unwrap();
    db.store.insert_wallet(&wallet).await.unwrap();

    let page = db.store.load_wallets_page(0, 100).await.unwrap();
    let matches = page
        .iter()
        .filter(|w| w.address == wallet.address && w.chain_id == 8453)
        .count();
    assert_eq!(matches, 1, "duplicate insert must not create a second row");
}

#[tokio::test]
async fn wallet_same_address_different_chains_are_distinct() {
    let db = TestDb::new().await;
    let addr = EthAddress::from_hex("0x3333333333333333333333333333333333333333").unwrap();

    let wallet_a = wallet_fixtures::create_test_wallet(&addr.to_hex(), 8453);
    let wallet_b = wallet_fixtures::create_test_wallet(&addr.to_hex(), 1);

    db.store.insert_wallet(&wallet_a).await.unwrap();
    db.store.insert_wallet(&wallet_b).await.unwrap();

    assert!(db.store.get_wallet(8453, &addr).await.unwrap().is_some());
    assert!(db.store.get_wallet(1, &addr).await.unwrap().is_some());
}

#[tokio::test]
async fn wallet_lookup_missing_returns_none() {
    let db = TestDb::new().await;
    let addr = EthAddress::from_hex("0x4444444444444444444444444444444444444444").unwrap();
    assert!(db.store.get_wallet(8453, &addr).await.unwrap().is_none());
}

#[tokio::test]
async fn wallet_paging_advances_by_offset() {
    let db = TestDb::new().await;
    for i in 0..5u8 {
        let addr = format!("0x{:040x}", 0x5000 + u64::from(i));
        db.store
            .insert_wallet(&wallet_fixtures::create_test_wallet(&addr, 8453))
            .await
            .unwrap();
    }

    let page1 = db.store.load_wallets_page(0, 2).await.unwrap();
    let page2 = db.store.load_wallets_page(2, 2).await.unwrap();
    assert_eq!(page1.len(), 2);
    assert_eq!(page2.len(), 2);
    assert_ne!(page1[0].address, page2[0].address);
}

// ═══════════════════════════════════════════════════════════════════════════════
// ACTIVITY STORE
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn activity_insert_and_fetch() {
    let db = TestDb::new().await;
    let activity = activity_fixtures::create_test_deposit(
        "0x6666666666666666666666666666666666666666",
        "0x7777777777777777777777777777777777777777",
        8453,
        1_000_000_000_000_000_000,
        100,
    );

    let inserted = db.store.insert_activity(&activity).await.unwrap();
    assert!(inserted);

    let found = db
        .store
        .get_activity(
            activity.tx_hash,
            activity.chain_id,
            &activity.wallet_address,
            activity.activity_type,
        )
        .await
        .unwrap()
        .expect("activity should exist");

    assert_eq!(found.amount, activity.amount);
    assert_eq!(found.activity_type, ActivityType::Deposit);
}

#[tokio::test]
async fn duplicate_activity_insert_is_a_no_op() {
    let db = TestDb::new().await;
    let activity = activity_fixtures::create_test_deposit(
        "0x8888888888888888888888888888888888888888",
        "0x9999999999999999999999999999999999999999",
        8453,
        500,
        200,
    );

    let first = db.store.insert_activity(&activity).await.unwrap();
    let second = db.store.insert_activity(&activity).await.unwrap();

    assert!(first, "first insert should succeed");
    assert!(!second, "duplicate insert must report false, not error");

    let recent = db
        .store
        .get_recent_activities(&activity.wallet_address, activity.chain_id, 10)
        .await
        .unwrap();
    assert_eq!(recent.len(), 1);
}

#[tokio::test]
async fn record_gas_backfills_fields() {
    let db = TestDb::new().await;
    let activity = activity_fixtures::create_test_withdrawal(
        "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
        "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
        8453,
        2_000_000_000_000_000_000,
        300,
    );
    db.store.insert_activity(&activity).await.unwrap();

    let gas_cost = Amount::parse("21000000000000").unwrap();
    db.store
        .record_gas(activity.id, 21_000, gas_cost)
        .await
        .unwrap();

    let found = db
        .store
        .get_activity(
            activity.tx_hash,
            activity.chain_id,
            &activity.wallet_address,
            activity.activity_type,
        )
        .await
        .unwrap()
        .expect("activity should exist");

    assert_eq!(found.gas_used, Some(21_000));
    assert_eq!(found.gas_cost, Some(gas_cost));
}

#[tokio::test]
async fn recent_activities_ordered_most_recent_first() {
    let db = TestDb::new().await;
    let wallet = "0xcccccccccccccccccccccccccccccccccccccccc";

    for block in [100, 200, 300] {
        let activity = activity_fixtures::create_test_deposit(
            wallet,
            "0xdddddddddddddddddddddddddddddddddddddddd",
            8453,
            1,
            block,
        );
        db.store.insert_activity(&activity).await.unwrap();
    }

    let addr = EthAddress::from_hex(wallet).unwrap();
    let recent = db
        .store
        .get_recent_activities(&addr, 8453, 10)
        .await
        .unwrap();

    assert_eq!(recent.len(), 3);
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHAIN STATE STORE
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn last_block_defaults_to_zero() {
    let db = TestDb::new().await;
    let block = db.store.get_last_block(8453).await.unwrap();
    assert_eq!(block.value(), 0);
}

#[tokio::test]
async fn set_and_get_last_block() {
    let db = TestDb::new().await;
    let hash = B256::from([0xAA; 32]);
    db.store
        .set_last_block(8453, BlockNumber::new(100), hash)
        .await
        .unwrap();

    let block = db.store.get_last_block(8453).await.unwrap();
    assert_eq!(block.value(), 100);
}

#[tokio::test]
async fn block_hash_round_trip() {
    let db = TestDb::new().await;
    let hash = B256::from([0x11; 32]);
    let parent = B256::from([0x10; 32]);

    db.store
        .insert_block_hash(8453, BlockNumber::new(101), hash, parent, 1001)
        .await
        .unwrap();

    let found = db
        .store
        .get_block_hash(8453, BlockNumber::new(101))
        .await
        .unwrap();
    assert_eq!(found, Some(hash));
}

#[tokio::test]
async fn missing_block_hash_is_none() {
    let db = TestDb::new().await;
    let found = db
        .store
        .get_block_hash(8453, BlockNumber::new(999))
        .await
        .unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn reorg_rollback_clears_blocks_after_fork_point() {
    let db = TestDb::new().await;

    for i in 100u64..=105 {
        let hash = B256::from([i as u8; 32]);
        let parent = B256::from([(i - 1) as u8; 32]);
        db.store
            .insert_block_hash(8453, BlockNumber::new(i), hash, parent, i * 10)
            .await
            .unwrap();
    }
    db.store
        .set_last_block(8453, BlockNumber::new(105), B256::from([105u8; 32]))
        .await
        .unwrap();

    db.store
        .execute_reorg_rollback(8453, BlockNumber::new(102))
        .await
        .unwrap();

    for i in 103u64..=105 {
        let found = db
            .store
            .get_block_hash(8453, BlockNumber::new(i))
            .await
            .unwrap();
        assert!(found.is_none(), "block {i} should have been rolled back");
    }
    for i in 100u64..=102 {
        let found = db
            .store
            .get_block_hash(8453, BlockNumber::new(i))
            .await
            .unwrap();
        assert!(found.is_some(), "block {i} should still exist");
    }

    let last = db.store.get_last_block(8453).await.unwrap();
    assert_eq!(last.value(), 102, "chain_state should clamp to fork point");
}

#[tokio::test]
async fn reorg_rollback_is_scoped_to_its_chain() {
    let db = TestDb::new().await;

    db.store
        .insert_block_hash(
            8453,
            BlockNumber::new(100),
            B256::from([1u8; 32]),
            B256::ZERO,
            10,
        )
        .await
        .unwrap();
    db.store
        .insert_block_hash(
            1,
            BlockNumber::new(100),
            B256::from([2u8; 32]),
            B256::ZERO,
            10,
        )
        .await
        .unwrap();

    db.store
        .execute_reorg_rollback(8453, BlockNumber::new(50))
        .await
        .unwrap();

    assert!(
        db.store
            .get_block_hash(8453, BlockNumber::new(100))
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        db.store
            .get_block_hash(1, BlockNumber::new(100))
            .await
            .unwrap()
            .is_some(),
        "other chains must not be affected"
    );
}

#[tokio::test]
async fn prune_old_blocks_removes_below_cutoff() {
    let db = TestDb::new().await;

    for i in 1u64..=20 {
        db.store
            .insert_block_hash(
                8453,
                BlockNumber::new(i),
                B256::from([i as u8; 32]),
                B256::ZERO,
                i,
            )
            .await
            .unwrap();
    }

    let pruned = db.store.prune_old_blocks(8453, 5).await.unwrap();
    assert_eq!(
        pruned, 15,
        "should prune everything below block 15 (20 - 5)"
    );

    assert!(
        db.store
            .get_block_hash(8453, BlockNumber::new(15))
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        db.store
            .get_block_hash(8453, BlockNumber::new(16))
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn prune_old_blocks_on_empty_chain_is_a_no_op() {
    let db = TestDb::new().await;
    let pruned = db.store.prune_old_blocks(999, 5).await.unwrap();
    assert_eq!(pruned, 0);
}
