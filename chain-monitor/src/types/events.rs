//! Outbound activity events pushed to the emitter (C7).
//!
//! These are the only events this service emits: a deposit or withdraw is
//! announced once its activity row is durably inserted, followed by a
//! refreshed wallet balance. They are pure notifications — consumers learn
//! of state that has already been persisted, never the other way around.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::ActivityType;
use super::primitives::{Amount, BlockNumber, EthAddress};

/// Native asset decimals assumed when formatting `amount`/`balance` for
/// display. Every chain this service targets uses 18-decimal wei-like units.
pub const NATIVE_DECIMALS: u8 = 18;

// ═══════════════════════════════════════════════════════════════════════════════
// UNIFIED EVENT ENUM
// ═══════════════════════════════════════════════════════════════════════════════

/// Unified enum for every event this service publishes.
///
/// # Serialization
///
/// Events are serialized with a type tag for deserialization:
/// ```json
/// {"DepositDetected": {"walletAddress": "0x...", "amount": "1000", ...}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ActivityEvent {
    /// A deposit was detected and persisted.
    DepositDetected(DepositDetectedEvent),
    /// A withdrawal was detected and persisted (either chain-observed or
    /// self-originated via the withdrawal path).
    WithdrawDetected(WithdrawDetectedEvent),
    /// A wallet's balance was refreshed after an activity was recorded.
    BalanceUpdate(BalanceUpdateEvent),
}

impl ActivityEvent {
    /// Chain the event pertains to.
    #[must_use]
    pub const fn chain_id(&self) -> u64 {
        match self {
            Self::DepositDetected(e) => e.chain_id,
            Self::WithdrawDetected(e) => e.chain_id,
            Self::BalanceUpdate(e) => e.chain_id,
        }
    }

    /// Owning user, if the wallet is mapped to one.
    #[must_use]
    pub const fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::DepositDetected(e) => e.user_id,
            Self::WithdrawDetected(e) => e.user_id,
            Self::BalanceUpdate(e) => Some(e.user_id),
        }
    }

    /// Event type name, for logging/metrics and routing to a broadcast topic
    /// when no user is known.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::DepositDetected(_) => "depositDetected",
            Self::WithdrawDetected(_) => "withdrawDetected",
            Self::BalanceUpdate(_) => "balanceUpdate",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEPOSIT / WITHDRAW
// ═══════════════════════════════════════════════════════════════════════════════

/// A native asset transfer into a monitored wallet was detected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositDetectedEvent {
    /// The monitored wallet that received funds.
    pub wallet_address: EthAddress,
    /// Sender of the underlying transaction.
    pub from_address: EthAddress,
    /// Base-unit amount received.
    pub amount: Amount,
    /// `amount` scaled by [`NATIVE_DECIMALS`] for display.
    pub amount_formatted: String,
    /// Transaction hash.
    pub tx_hash: alloy::primitives::TxHash,
    /// Block the transaction was included in.
    pub block_number: BlockNumber,
    /// Block timestamp.
    pub block_timestamp: DateTime<Utc>,
    /// Chain the transaction occurred on.
    pub chain_id: u64,
    /// Owning user, if known.
    pub user_id: Option<Uuid>,
    /// Always [`ActivityType::Deposit`]; carried for a self-describing
    /// payload on the wire.
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
}

impl DepositDetectedEvent {
    /// Build from a persisted activity row, computing `amount_formatted`.
    #[must_use]
    pub fn new(
        wallet_address: EthAddress,
        from_address: EthAddress,
        amount: Amount,
        tx_hash: alloy::primitives::TxHash,
        block_number: BlockNumber,
        block_timestamp: DateTime<Utc>,
        chain_id: u64,
        user_id: Option<Uuid>,
    ) -> Self {
        Self {
            wallet_address,
            from_address,
            amount_formatted: amount.formatted(NATIVE_DECIMALS),
            amount,
            tx_hash,
            block_number,
            block_timestamp,
            chain_id,
            user_id,
            activity_type: ActivityType::Deposit,
        }
    }
}

/// A native asset transfer out of a monitored wallet was detected, whether
/// observed on-chain or originated by the withdrawal path (C9).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawDetectedEvent {
    /// The monitored wallet that sent funds.
    pub wallet_address: EthAddress,
    /// Recipient of the underlying transaction.
    pub to_address: EthAddress,
    /// Base-unit amount sent.
    pub amount: Amount,
    /// `amount` scaled by [`NATIVE_DECIMALS`] for display.
    pub amount_formatted: String,
    /// Transaction hash.
    pub tx_hash: alloy::primitives::TxHash,
    /// Block the transaction was included in.
    pub block_number: BlockNumber,
    /// Block timestamp.
    pub block_timestamp: DateTime<Utc>,
    /// Chain the transaction occurred on.
    pub chain_id: u64,
    /// Owning user, if known.
    pub user_id: Option<Uuid>,
    /// Always [`ActivityType::Withdraw`]; carried for a self-describing
    /// payload on the wire.
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
}

impl WithdrawDetectedEvent {
    /// Build from a persisted activity row, computing `amount_formatted`.
    #[must_use]
    pub fn new(
        wallet_address: EthAddress,
        to_address: EthAddress,
        amount: Amount,
        tx_hash: alloy::primitives::TxHash,
        block_number: BlockNumber,
        block_timestamp: DateTime<Utc>,
        chain_id: u64,
        user_id: Option<Uuid>,
    ) -> Self {
        Self {
            wallet_address,
            to_address,
            amount_formatted: amount.formatted(NATIVE_DECIMALS),
            amount,
            tx_hash,
            block_number,
            block_timestamp,
            chain_id,
            user_id,
            activity_type: ActivityType::Withdraw,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BALANCE UPDATE
// ═══════════════════════════════════════════════════════════════════════════════

/// A wallet's on-chain balance, refreshed after an activity was recorded.
///
/// Emission is best-effort: a balance-fetch failure must never roll back the
/// activity insert that triggered it, so this event may simply not fire for
/// a given activity. See `engine::persistence`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceUpdateEvent {
    /// The wallet whose balance was refreshed.
    pub wallet_address: EthAddress,
    /// Current base-unit balance.
    pub balance: Amount,
    /// `balance` scaled by [`NATIVE_DECIMALS`] for display.
    pub balance_formatted: String,
    /// Chain the balance was read from.
    pub chain_id: u64,
    /// Owning user.
    pub user_id: Uuid,
    /// When the balance was fetched.
    pub timestamp: DateTime<Utc>,
}

impl BalanceUpdateEvent {
    /// Build from a freshly-fetched balance, computing `balance_formatted`.
    #[must_use]
    pub fn new(
        wallet_address: EthAddress,
        balance: Amount,
        chain_id: u64,
        user_id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            wallet_address,
            balance_formatted: balance.formatted(NATIVE_DECIMALS),
            balance,
            chain_id,
            user_id,
            timestamp,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use alloy::primitives::TxHash;

    fn sample_wallet() -> EthAddress {
        EthAddress::from_slice(&[1u8; 20]).unwrap()
    }

    #[test]
    fn deposit_event_formats_amount() {
        let event = DepositDetectedEvent::new(
            sample_wallet(),
            EthAddress::ZERO,
            Amount::parse("1000000000000000000").unwrap(),
            TxHash::ZERO,
            BlockNumber::new(101),
            Utc::now(),
            8453,
            None,
        );

        assert_eq!(event.amount_formatted, "1");
        assert_eq!(event.activity_type, ActivityType::Deposit);
    }

    #[test]
    fn activity_event_type_name_and_user_routing() {
        let event = ActivityEvent::DepositDetected(DepositDetectedEvent::new(
            sample_wallet(),
            EthAddress::ZERO,
            Amount::ZERO,
            TxHash::ZERO,
            BlockNumber::new(1),
            Utc::now(),
            1,
            None,
        ));

        assert_eq!(event.type_name(), "depositDetected");
        assert_eq!(event.chain_id(), 1);
        assert!(event.user_id().is_none());
    }

    #[test]
    fn balance_update_always_has_user() {
        let user_id = Uuid::new_v4();
        let event = ActivityEvent::BalanceUpdate(BalanceUpdateEvent::new(
            sample_wallet(),
            Amount::parse("42").unwrap(),
            10,
            user_id,
            Utc::now(),
        ));

        assert_eq!(event.user_id(), Some(user_id));
    }

    #[test]
    fn json_shape_uses_camel_case_fields() {
        let event = WithdrawDetectedEvent::new(
            sample_wallet(),
            EthAddress::ZERO,
            Amount::parse("5").unwrap(),
            TxHash::ZERO,
            BlockNumber::new(1),
            Utc::now(),
            1,
            None,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("walletAddress").is_some());
        assert!(json.get("toAddress").is_some());
        assert!(json.get("amountFormatted").is_some());
    }
}
