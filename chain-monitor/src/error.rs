//! Layered error types for the chain monitor.
//!
//! This module provides a hierarchical error system:
//!
//! - [`DomainError`] - Business logic errors (insufficient funds, etc.)
//! - [`InfraError`] - Infrastructure errors (database, RPC, streaming)
//! - [`AppError`] - Application-level errors combining domain and infra
//! - [`ApiError`] - HTTP API errors with status codes
//!
//! # Error Philosophy
//!
//! - Domain errors are recoverable and user-facing
//! - Infrastructure errors are logged but details hidden from users
//! - The `Result` type alias uses `AppError` for application code

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// DOMAIN ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Domain-level errors representing business logic violations.
///
/// These errors are recoverable and should be shown to users.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DomainError {
    /// Withdrawal requested more than `balance - gas_cost` allows.
    #[error("insufficient funds: balance {balance} cannot cover amount {amount} + gas {gas_cost}")]
    InsufficientFunds {
        /// Wallet balance at estimation time.
        balance: String,
        /// Requested withdrawal amount.
        amount: String,
        /// Estimated gas cost.
        gas_cost: String,
    },

    /// Withdrawal recipient is the same as the sending wallet.
    #[error("self-transfer rejected for wallet {0}")]
    SelfTransfer(String),

    /// The wallet address derived from `(user_id, email, secret)` does not
    /// match the address on file. Not itself fatal — the caller migrates
    /// the stored address and continues.
    #[error("derived wallet key for user {user_id} does not match stored address")]
    WalletKeyMismatch {
        /// The user whose key mismatched.
        user_id: String,
    },

    /// Invalid address format.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid amount (negative or malformed).
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

// ═══════════════════════════════════════════════════════════════════════════════
// INFRASTRUCTURE ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Infrastructure-level errors from external systems.
///
/// These errors are typically logged but their details are hidden from users.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InfraError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// RPC provider rate-limited the request (429 / provider-specific codes /
    /// repeated timeouts treated as rate limiting). Feeds the per-chain
    /// throttle (C6) and may trip the breaker.
    #[error("rate limited by RPC provider")]
    RateLimited,

    /// Transient RPC failure (network timeout, missing response) that a
    /// retry within the same pass may resolve.
    #[error("transient RPC error: {0}")]
    TransientRpc(String),

    /// A fetched block is missing required fields. Treated as
    /// no-transactions rather than a hard failure.
    #[error("malformed block {0}: {1}")]
    MalformedBlock(u64, String),

    /// The realtime subscription dropped and must be reconnected.
    #[error("stream closed: {0}")]
    StreamClosed(String),

    /// Publishing an event to the streaming backend failed.
    #[error("streaming error: {0}")]
    Streaming(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Configuration error — missing or invalid settings for a chain.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Catch-all for invariant violations surfaced from infrastructure code
    /// (corrupt row data, migration failures) that don't fit another variant.
    #[error("internal error: {0}")]
    Internal(String),
}

// ═══════════════════════════════════════════════════════════════════════════════
// APPLICATION ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Application-level errors combining domain and infrastructure errors.
///
/// This is the primary error type used throughout the application.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppError {
    /// Domain logic error.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Infrastructure error.
    #[error(transparent)]
    Infra(#[from] InfraError),

    /// Chain reorganization detected.
    #[error("chain reorg detected at block {0}")]
    ReorgDetected(u64),

    /// The per-chain circuit breaker is open; all processing for that chain
    /// is short-circuited until cooldown elapses.
    #[error("circuit breaker open for chain {chain_id}, reopens in {reopen_in_secs}s")]
    BreakerOpen {
        /// Chain whose breaker is open.
        chain_id: u64,
        /// Seconds remaining until the breaker resets.
        reopen_in_secs: u64,
    },

    /// Configuration error — fatal for the affected chain only; other
    /// chains proceed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Initialization error.
    #[error("initialization error: {0}")]
    Initialization(String),

    /// Graceful shutdown requested.
    #[error("shutdown requested")]
    ShutdownRequested,
}

/// Type alias for application Results.
pub type Result<T> = std::result::Result<T, AppError>;

// ═══════════════════════════════════════════════════════════════════════════════
// API ERRORS (HTTP-specific)
// ═══════════════════════════════════════════════════════════════════════════════

/// API-level errors with HTTP status codes.
///
/// These errors are converted to HTTP responses via [`IntoResponse`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    /// Wrapped application error.
    #[error(transparent)]
    App(#[from] AppError),

    /// Rate limit exceeded.
    #[error("rate limited: retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds until rate limit resets.
        retry_after_secs: u64,
    },

    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    BadRequest(String),

    /// Authentication required or failed.
    #[error("unauthorized")]
    Unauthorized,

    /// Requested chain or wallet is not known to this process.
    #[error("not found: {0}")]
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Self::App(AppError::Domain(
                DomainError::InsufficientFunds { .. } | DomainError::SelfTransfer(_),
            )) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", self.to_string()),

            Self::App(AppError::Domain(
                DomainError::InvalidAddress(_) | DomainError::InvalidAmount(_),
            ))
            | Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", self.to_string()),

            // A key mismatch is migrated and retried by the caller, not
            // surfaced as a hard failure; reaching the API layer at all
            // means the migration itself failed.
            Self::App(AppError::Domain(DomainError::WalletKeyMismatch { .. })) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "internal error".into(),
            ),

            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),

            Self::RateLimited { retry_after_secs } => {
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [("Retry-After", retry_after_secs.to_string())],
                    Json(json!({
                        "error": {
                            "code": "RATE_LIMITED",
                            "message": self.to_string(),
                            "retry_after_secs": retry_after_secs
                        }
                    })),
                )
                    .into_response();
            }

            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),

            Self::App(AppError::BreakerOpen { .. }) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "BREAKER_OPEN",
                self.to_string(),
            ),

            // Infrastructure and internal errors: log but don't expose details
            Self::App(
                AppError::Infra(_)
                | AppError::ReorgDetected(_)
                | AppError::Config(_)
                | AppError::Initialization(_)
                | AppError::ShutdownRequested,
            ) => {
                tracing::error!(error = ?self, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "internal error".into(),
                )
            }
        };

        (
            status,
            Json(json!({
                "error": {
                    "code": code,
                    "message": message
                }
            })),
        )
            .into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVM PROVIDER CONVERSIONS
// ═══════════════════════════════════════════════════════════════════════════════

impl From<evm_provider::ProviderError> for InfraError {
    fn from(err: evm_provider::ProviderError) -> Self {
        match &err {
            evm_provider::ProviderError::Rpc { code, .. } if *code == -32005 => Self::RateLimited,
            _ if err.is_retryable() => Self::TransientRpc(err.to_string()),
            _ => Self::Internal(err.to_string()),
        }
    }
}

impl From<evm_provider::ProviderError> for AppError {
    fn from(err: evm_provider::ProviderError) -> Self {
        Self::Infra(err.into())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONVENIENCE CONVERSIONS
// ═══════════════════════════════════════════════════════════════════════════════

impl From<crate::types::primitives::InvalidAddress> for DomainError {
    fn from(err: crate::types::primitives::InvalidAddress) -> Self {
        Self::InvalidAddress(err.to_string())
    }
}

impl From<crate::types::primitives::InvalidAmount> for DomainError {
    fn from(err: crate::types::primitives::InvalidAmount) -> Self {
        Self::InvalidAmount(err.to_string())
    }
}

impl From<crate::types::primitives::InvalidAddress> for AppError {
    fn from(err: crate::types::primitives::InvalidAddress) -> Self {
        Self::Domain(err.into())
    }
}

impl From<crate::types::primitives::InvalidAmount> for AppError {
    fn from(err: crate::types::primitives::InvalidAmount) -> Self {
        Self::Domain(err.into())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
