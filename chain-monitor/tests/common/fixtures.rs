//! Test fixtures for integration tests.

use sqlx::PgPool;
use testcontainers::ContainerAsync;
use testcontainers::runners::AsyncRunner;

use super::containers::{TestPostgres, build_connection_string};
use chain_monitor::store::PostgresStore;

/// A test database instance with pool and container.
///
/// The container is kept alive as long as this struct exists.
/// When dropped, the container is automatically stopped.
pub struct TestDb {
    /// The connection pool to the test database.
    pub pool: PgPool,
    /// The `PostgresStore` wrapping the pool.
    pub store: PostgresStore,
    /// The container (kept alive for the duration of the test).
    _container: ContainerAsync<TestPostgres>,
}

impl TestDb {
    /// Create a new test database with a fresh container.
    ///
    /// This will:
    /// 1. Start a `PostgreSQL` container
    /// 2. Connect to it
    /// 3. Run all migrations
    ///
    /// # Panics
    ///
    /// Panics if container startup, connection, or migrations fail.
    pub async fn new() -> Self {
        let container = TestPostgres::default()
            .start()
            .await
            .expect("Failed to start postgres container");

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("Failed to get port");

        let connection_string = build_connection_string(&host.to_string(), port);

        let pool = connect_with_retries(&connection_string, 30)
            .await
            .expect("Failed to connect to database");

        let store = PostgresStore::new(pool.clone());

        store
            .run_migrations()
            .await
            .expect("Failed to run migrations");

        Self {
            pool,
            store,
            _container: container,
        }
    }
}

/// Connect to the database with retries.
///
/// The container can take a moment to be fully ready even after the
/// "ready to accept connections" message appears.
async fn connect_with_retries(url: &str, max_attempts: u32) -> Result<PgPool, sqlx::Error> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match PgPool::connect(url).await {
            Ok(pool) => match sqlx::query("SELECT 1").execute(&pool).await {
                Ok(_) => return Ok(pool),
                Err(e) if attempts < max_attempts => {
                    tracing::debug!("Connection verify failed (attempt {attempts}): {e}");
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                }
                Err(e) => return Err(e),
            },
            Err(e) if attempts < max_attempts => {
                tracing::debug!("Connection failed (attempt {attempts}): {e}");
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Create test fixtures for monitored wallets.
pub mod wallet_fixtures {
    use chain_monitor::types::entities::Wallet;
    use chain_monitor::types::primitives::EthAddress;
    use uuid::Uuid;

    /// Create a test wallet on the given chain, owned by a fresh user.
    #[must_use]
    pub fn create_test_wallet(address: &str, chain_id: u64) -> Wallet {
        Wallet::new(
            EthAddress::from_hex(address).expect("valid address"),
            chain_id,
            Uuid::new_v4(),
        )
    }

    /// Create a test wallet owned by a specific user.
    #[must_use]
    pub fn create_wallet_for_user(address: &str, chain_id: u64, user_id: Uuid) -> Wallet {
        Wallet::new(
            EthAddress::from_hex(address).expect("valid address"),
            chain_id,
            user_id,
        )
    }
}

/// Create test fixtures for detected activity.
pub mod activity_fixtures {
    use alloy::primitives::{TxHash, keccak256};
    use chrono::Utc;
    use uuid::Uuid;

    use chain_monitor::types::entities::Activity;
    use chain_monitor::types::enums::{ActivityStatus, ActivityType};
    use chain_monitor::types::primitives::{Amount, BlockNumber, EthAddress};

    /// Create a pending deposit activity for the given wallet.
    #[must_use]
    pub fn create_test_deposit(
        wallet_address: &str,
        from_address: &str,
        chain_id: u64,
        amount_wei: u64,
        block_number: u64,
    ) -> Activity {
        let wallet = EthAddress::from_hex(wallet_address).expect("valid address");
        Activity {
            id: Uuid::new_v4(),
            activity_type: ActivityType::Deposit,
            wallet_address: wallet,
            from_address: EthAddress::from_hex(from_address).expect("valid address"),
            to_address: wallet,
            amount: Amount::from(amount_wei),
            tx_hash: unique_tx_hash(wallet_address, block_number, amount_wei),
            block_number: BlockNumber::new(block_number),
            block_timestamp: Utc::now(),
            chain_id,
            status: ActivityStatus::Confirmed,
            gas_used: None,
            gas_cost: None,
            user_id: Some(Uuid::new_v4()),
        }
    }

    /// Create a pending withdrawal activity originating from the given wallet.
    #[must_use]
    pub fn create_test_withdrawal(
        wallet_address: &str,
        to_address: &str,
        chain_id: u64,
        amount_wei: u64,
        block_number: u64,
    ) -> Activity {
        let wallet = EthAddress::from_hex(wallet_address).expect("valid address");
        Activity {
            id: Uuid::new_v4(),
            activity_type: ActivityType::Withdraw,
            wallet_address: wallet,
            from_address: wallet,
            to_address: EthAddress::from_hex(to_address).expect("valid address"),
            amount: Amount::from(amount_wei),
            tx_hash: unique_tx_hash(to_address, block_number, amount_wei),
            block_number: BlockNumber::new(block_number),
            block_timestamp: Utc::now(),
            chain_id,
            status: ActivityStatus::Pending,
            gas_used: None,
            gas_cost: None,
            user_id: Some(Uuid::new_v4()),
        }
    }

    /// Derive a unique-enough transaction hash from fixture inputs, so
    /// repeated calls in the same test produce distinct dedup keys.
    fn unique_tx_hash(seed: &str, block_number: u64, amount_wei: u64) -> TxHash {
        let bytes = format!("{seed}:{block_number}:{amount_wei}:{}", Uuid::new_v4());
        TxHash::from(keccak256(bytes.as_bytes()))
    }
}
