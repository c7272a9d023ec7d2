//! REST API for wallet registration, withdrawals and diagnostics.
//!
//! A thin `axum` layer over the per-chain [`ChainWorkerHandle`]s returned by
//! [`crate::engine::run_chain_workers`]. Authentication is out of scope (see
//! spec Non-goals): the `X-User-Id` header stands in for a real session,
//! trusted as-is. Everything else — validation, error shaping — goes through
//! [`ApiError`].

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::engine::ChainWorkerHandle;
use crate::error::ApiError;
use crate::ports::{ActivityStore, EventPublisher};
use crate::types::entities::ChainDiagnostics;
use crate::types::primitives::{Amount, EthAddress};
use evm_provider::StandardEvmProvider;

/// Shared state injected into every handler.
pub struct ApiState<A, E> {
    chains: HashMap<u64, Arc<ChainWorkerHandle<StandardEvmProvider, A, E>>>,
}

impl<A, E> ApiState<A, E> {
    #[must_use]
    pub const fn new(chains: HashMap<u64, Arc<ChainWorkerHandle<StandardEvmProvider, A, E>>>) -> Self {
        Self { chains }
    }
}

/// Build the router. Mounted by the process entrypoint under
/// `ApiSettings::{host, port}`.
pub fn router<A, E>(state: Arc<ApiState<A, E>>) -> Router
where
    A: ActivityStore + Clone + 'static,
    E: EventPublisher + Clone + 'static,
{
    Router::new()
        .route("/wallets", post(register_wallet::<A, E>))
        .route("/withdraw", post(withdraw::<A, E>))
        .route("/diagnostics", get(diagnostics::<A, E>))
        .route("/chains/:chain_id/check", post(trigger_check::<A, E>))
        .with_state(state)
}

fn user_id_from_headers(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    let raw = headers
        .get("X-User-Id")
        .ok_or(ApiError::Unauthorized)?
        .to_str()
        .map_err(|_| ApiError::Unauthorized)?;
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest("X-User-Id is not a valid uuid".into()))
}

fn chain_handle<A, E>(
    state: &ApiState<A, E>,
    chain_id: u64,
) -> Result<Arc<ChainWorkerHandle<StandardEvmProvider, A, E>>, ApiError> {
    state
        .chains
        .get(&chain_id)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("chain {chain_id} is not configured")))
}

// ═══════════════════════════════════════════════════════════════════════════════
// POST /wallets
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct RegisterWalletRequest {
    pub chain_id: u64,
    pub address: EthAddress,
}

#[derive(Debug, Serialize)]
pub struct RegisterWalletResponse {
    pub chain_id: u64,
    pub address: EthAddress,
}

#[instrument(skip(state, headers), fields(chain_id = request.chain_id))]
async fn register_wallet<A, E>(
    State(state): State<Arc<ApiState<A, E>>>,
    headers: HeaderMap,
    Json(request): Json<RegisterWalletRequest>,
) -> Result<Json<RegisterWalletResponse>, ApiError>
where
    A: ActivityStore + Clone + 'static,
    E: EventPublisher + Clone + 'static,
{
    let user_id = user_id_from_headers(&headers)?;
    let handle = chain_handle(&state, request.chain_id)?;
    handle.register_wallet(request.address, user_id).await?;
    Ok(Json(RegisterWalletResponse {
        chain_id: request.chain_id,
        address: request.address,
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// POST /withdraw
// ═══════════════════════════════════════════════════════════════════════════════

/// Stub-authenticated withdrawal request. `email` and `stored_address` are
/// supplied by the caller rather than looked up, since there is no user
/// directory behind the `X-User-Id` stub; a real deployment would resolve
/// both from the authenticated session instead.
#[derive(Debug, Deserialize)]
pub struct WithdrawApiRequest {
    pub chain_id: u64,
    pub email: String,
    pub stored_address: EthAddress,
    pub to_address: EthAddress,
    pub amount: Amount,
}

#[derive(Debug, Serialize)]
pub struct WithdrawApiResponse {
    pub tx_hash: String,
    pub from: EthAddress,
    pub to: EthAddress,
    pub amount: Amount,
    pub success: bool,
}

#[instrument(skip(state, headers), fields(chain_id = request.chain_id))]
async fn withdraw<A, E>(
    State(state): State<Arc<ApiState<A, E>>>,
    headers: HeaderMap,
    Json(request): Json<WithdrawApiRequest>,
) -> Result<Json<WithdrawApiResponse>, ApiError>
where
    A: ActivityStore + Clone + 'static,
    E: EventPublisher + Clone + 'static,
{
    let user_id = user_id_from_headers(&headers)?;
    let handle = chain_handle(&state, request.chain_id)?;

    let outcome = handle
        .withdraw(crate::engine::WithdrawRequest {
            chain_id: request.chain_id,
            user_id,
            email: request.email,
            stored_address: request.stored_address,
            to: request.to_address,
            amount: request.amount,
        })
        .await?;

    Ok(Json(WithdrawApiResponse {
        tx_hash: outcome.tx_hash.to_string(),
        from: outcome.from,
        to: outcome.to,
        amount: outcome.amount,
        success: outcome.success,
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// GET /diagnostics
// ═══════════════════════════════════════════════════════════════════════════════

#[instrument(skip(state))]
async fn diagnostics<A, E>(State(state): State<Arc<ApiState<A, E>>>) -> Result<Json<Vec<ChainDiagnostics>>, ApiError>
where
    A: ActivityStore + Clone + 'static,
    E: EventPublisher + Clone + 'static,
{
    let mut snapshots = Vec::with_capacity(state.chains.len());
    for handle in state.chains.values() {
        snapshots.push(handle.diagnostics().await?);
    }
    snapshots.sort_by_key(|d| d.chain_id);
    Ok(Json(snapshots))
}

// ═══════════════════════════════════════════════════════════════════════════════
// POST /chains/:chain_id/check
// ═══════════════════════════════════════════════════════════════════════════════

#[instrument(skip(state))]
async fn trigger_check<A, E>(
    State(state): State<Arc<ApiState<A, E>>>,
    Path(chain_id): Path<u64>,
) -> Result<StatusCode, ApiError>
where
    A: ActivityStore + Clone + 'static,
    E: EventPublisher + Clone + 'static,
{
    let handle = chain_handle(&state, chain_id)?;
    handle.trigger_check().await?;
    Ok(StatusCode::ACCEPTED)
}
