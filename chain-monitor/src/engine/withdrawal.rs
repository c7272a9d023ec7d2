//! Withdrawal path (C9).
//!
//! Grounded on `crates/evm-provider/src/traits.rs`'s `ChainProvider` contract
//! (balance/gas estimate/send/receipt) and `crates/evm-provider/src/nonce.rs`'s
//! `LocalNonceManager` for nonce handling. The keyed-derivation shape itself
//! isn't drawn from any corpus file; no example re-derives a signer from a
//! `(user_id, email, secret)` tuple, so this follows the literal
//! `keccak256(user_id || "-" || email || "-" || secret)` construction via
//! `alloy::primitives::keccak256` directly.

use std::sync::Arc;
use std::time::Duration;

use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{keccak256, Bytes, TxKind, U256};
use alloy::signers::local::PrivateKeySigner;
use chrono::Utc;
use evm_provider::{ChainProvider, LocalNonceManager, NonceManager, TransactionRequest};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::engine::persistence::Persistence;
use crate::engine::wallet_registry::WalletRegistry;
use crate::error::{DomainError, Result};
use crate::ports::{ActivityStore, EventPublisher, WalletStore};
use crate::types::entities::Activity;
use crate::types::enums::{ActivityStatus, ActivityType};
use crate::types::primitives::{Amount, BlockNumber, EthAddress};

/// A user-originated withdrawal request.
#[derive(Debug, Clone)]
pub struct WithdrawRequest {
    /// Chain to send on.
    pub chain_id: u64,
    /// Authenticated caller.
    pub user_id: Uuid,
    /// Caller's email, as on file — re-derivation input, not display data.
    pub email: String,
    /// The embedded wallet's address as currently stored.
    pub stored_address: EthAddress,
    /// Withdrawal recipient.
    pub to: EthAddress,
    /// Amount to send, in base units.
    pub amount: Amount,
}

/// Outcome of a successful withdrawal, returned to the caller.
#[derive(Debug, Clone)]
pub struct WithdrawOutcome {
    /// The submitted transaction's hash.
    pub tx_hash: alloy::primitives::TxHash,
    /// Wallet the funds were sent from (the derived address, post-repair).
    pub from: EthAddress,
    /// Recipient.
    pub to: EthAddress,
    /// Amount sent.
    pub amount: Amount,
    /// Whether the receipt reported success.
    pub success: bool,
}

/// Re-derive the embedded wallet signer deterministically from
/// `(user_id, normalized_email, secret)`.
///
/// The normalized email is expected to already be lower-cased/trimmed by the
/// caller; this function does no normalization of its own.
fn derive_signer(user_id: Uuid, normalized_email: &str, secret: &str) -> Result<PrivateKeySigner> {
    let material = format!("{user_id}-{normalized_email}-{secret}");
    let digest = keccak256(material.as_bytes());
    PrivateKeySigner::from_bytes(&digest).map_err(|err| {
        DomainError::InvalidAddress(format!("derived key material is not a valid signer: {err}")).into()
    })
}

/// Originates outbound transfers from embedded wallets.
///
/// `P` is the `ChainProvider` shared with the owning chain worker's
/// [`Persistence`] collaborator, so balance refreshes after the withdraw
/// activity is recorded go through the same provider instance.
pub struct WithdrawalService<P, A, E> {
    chain_id: u64,
    provider: P,
    nonce_manager: Arc<LocalNonceManager<P>>,
    wallet_registry: Arc<WalletRegistry>,
    wallet_store: Arc<dyn WalletStore>,
    persistence: Arc<Persistence<A, E, P>>,
    key_derivation_secret: String,
    receipt_timeout: Duration,
}

impl<P, A, E> WithdrawalService<P, A, E>
where
    P: ChainProvider + Clone,
    A: ActivityStore,
    E: EventPublisher,
{
    /// Wire a withdrawal service for `chain_id`.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        chain_id: u64,
        provider: P,
        nonce_manager: Arc<LocalNonceManager<P>>,
        wallet_registry: Arc<WalletRegistry>,
        wallet_store: Arc<dyn WalletStore>,
        persistence: Arc<Persistence<A, E, P>>,
        key_derivation_secret: String,
        receipt_timeout: Duration,
    ) -> Self {
        Self {
            chain_id,
            provider,
            nonce_manager,
            wallet_registry,
            wallet_store,
            persistence,
            key_derivation_secret,
            receipt_timeout,
        }
    }

    /// Service one withdrawal request end to end: re-derive and verify the
    /// signer, check funds, send, await inclusion, persist, and emit.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InsufficientFunds`] or
    /// [`DomainError::SelfTransfer`] for request-level rejections,
    /// [`DomainError::WalletKeyMismatch`] if the derived key doesn't match
    /// the stored address and the auto-repair attempt itself fails, and an
    /// infra error for RPC/database failures.
    #[instrument(skip(self, request), fields(chain_id = self.chain_id, user_id = %request.user_id))]
    pub async fn withdraw(&self, request: WithdrawRequest) -> Result<WithdrawOutcome> {
        let signer = derive_signer(request.user_id, &request.email, &self.key_derivation_secret)?;
        let derived_address = EthAddress::from(signer.address());

        let from = if derived_address == request.stored_address {
            derived_address
        } else {
            self.repair_address(request.user_id, derived_address).await?
        };

        if from == request.to {
            return Err(DomainError::SelfTransfer(from.to_hex()).into());
        }

        let balance = Amount::from(self.provider.get_balance(from.into()).await?);

        let gas_estimate = TransactionRequest::new()
            .to(request.to.into())
            .value(request.amount.as_u256());
        let gas_limit = self.provider.estimate_gas(&gas_estimate).await?;
        let gas_price = self.provider.gas_price().await?;
        let gas_cost = Amount::from(U256::from(gas_limit).saturating_mul(U256::from(gas_price)));

        let required = request.amount.saturating_add(&gas_cost);
        if balance < required {
            return Err(DomainError::InsufficientFunds {
                balance: balance.to_string(),
                amount: request.amount.to_string(),
                gas_cost: gas_cost.to_string(),
            }
            .into());
        }

        let nonce = self.nonce_manager.get_and_increment(from.into()).await?;
        let raw = sign_transfer(&signer, self.chain_id, request.to, request.amount, nonce, gas_limit, gas_price);

        let tx_hash = self.provider.send_raw_transaction(raw).await?;
        let receipt = self.provider.wait_for_receipt(tx_hash, self.receipt_timeout).await?;

        let activity = Activity {
            id: Uuid::new_v4(),
            activity_type: ActivityType::Withdraw,
            wallet_address: from,
            from_address: from,
            to_address: request.to,
            amount: request.amount,
            tx_hash,
            block_number: BlockNumber::new(receipt.block_number),
            block_timestamp: Utc::now(),
            chain_id: self.chain_id,
            status: if receipt.success {
                ActivityStatus::Confirmed
            } else {
                ActivityStatus::Failed
            },
            gas_used: Some(receipt.gas_used),
            gas_cost: Some(gas_cost),
            user_id: Some(request.user_id),
        };
        self.persistence.record(&activity).await?;

        Ok(WithdrawOutcome {
            tx_hash,
            from,
            to: request.to,
            amount: request.amount,
            success: receipt.success,
        })
    }

    /// Migrate the stored wallet address to the freshly-derived one, per
    /// §4.9's auto-repair step. Returns the repaired address on success.
    async fn repair_address(&self, user_id: Uuid, derived_address: EthAddress) -> Result<EthAddress> {
        warn!(
            chain_id = self.chain_id,
            %user_id,
            derived = %derived_address,
            "derived wallet key does not match stored address, attempting auto-repair"
        );

        self.wallet_registry
            .add(self.wallet_store.as_ref(), derived_address, user_id)
            .await
            .map_err(|err| {
                warn!(chain_id = self.chain_id, %user_id, error = %err, "auto-repair failed");
                DomainError::WalletKeyMismatch {
                    user_id: user_id.to_string(),
                }
            })?;

        Ok(derived_address)
    }
}

/// Build, sign, and RLP-encode an EIP-1559 native transfer.
fn sign_transfer(
    signer: &PrivateKeySigner,
    chain_id: u64,
    to: EthAddress,
    amount: Amount,
    nonce: u64,
    gas_limit: u64,
    gas_price: u128,
) -> Bytes {
    let priority_fee = gas_price / 10;
    let mut tx = TxEip1559 {
        chain_id,
        nonce,
        gas_limit,
        max_fee_per_gas: gas_price,
        max_priority_fee_per_gas: priority_fee.min(gas_price),
        to: TxKind::Call(to.into()),
        value: amount.as_u256(),
        access_list: Default::default(),
        input: Bytes::new(),
    };

    let signature = signer
        .sign_transaction_sync(&mut tx)
        .expect("signing a well-formed EIP-1559 request never fails");
    let signed = tx.into_signed(signature);
    let envelope = TxEnvelope::Eip1559(signed);
    Bytes::from(envelope.encoded_2718())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_signer_is_deterministic() {
        let user_id = Uuid::new_v4();
        let a = derive_signer(user_id, "user@example.com", "secret").unwrap();
        let b = derive_signer(user_id, "user@example.com", "secret").unwrap();
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn derive_signer_is_sensitive_to_every_input() {
        let user_id = Uuid::new_v4();
        let base = derive_signer(user_id, "user@example.com", "secret").unwrap();
        let other_email = derive_signer(user_id, "other@example.com", "secret").unwrap();
        let other_secret = derive_signer(user_id, "user@example.com", "different").unwrap();
        assert_ne!(base.address(), other_email.address());
        assert_ne!(base.address(), other_secret.address());
    }

    #[test]
    fn sign_transfer_produces_2718_encoded_bytes() {
        let signer = PrivateKeySigner::random();
        let to = EthAddress::new([7u8; 20]);
        let raw = sign_transfer(&signer, 8453, to, Amount::from(1_000u64), 0, 21_000, 1_000_000_000);
        // A signed EIP-1559 envelope always starts with the 0x02 type byte.
        assert_eq!(raw.first(), Some(&0x02));
    }
}
