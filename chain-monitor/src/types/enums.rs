//! Activity classification enums.
//!
//! Each enum provides safe conversion from/to numeric values, database
//! serialization via `sqlx::Type`, and JSON serialization via `serde`.

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// ACTIVITY TYPE
// ═══════════════════════════════════════════════════════════════════════════════

/// Direction of a detected value movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[repr(i16)]
#[sqlx(type_name = "smallint")]
pub enum ActivityType {
    /// Native asset received into a monitored wallet.
    Deposit = 0,
    /// Native asset sent out from a monitored wallet via the withdrawal path.
    Withdraw = 1,
}

impl ActivityType {
    /// Human-readable name for display and event payloads.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdraw => "withdraw",
        }
    }
}

/// Error returned when an invalid activity type value is provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid activity type value: {0}")]
pub struct InvalidActivityType(pub u8);

impl TryFrom<u8> for ActivityType {
    type Error = InvalidActivityType;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Deposit),
            1 => Ok(Self::Withdraw),
            _ => Err(InvalidActivityType(value)),
        }
    }
}

impl From<ActivityType> for u8 {
    #[allow(clippy::cast_sign_loss)]
    fn from(t: ActivityType) -> Self {
        t as i16 as Self
    }
}

impl From<ActivityType> for i16 {
    fn from(t: ActivityType) -> Self {
        t as Self
    }
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ACTIVITY STATUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle status of an activity row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[repr(i16)]
#[sqlx(type_name = "smallint")]
pub enum ActivityStatus {
    /// Detected/submitted but not yet confirmed on-chain.
    Pending = 0,
    /// Observed with the configured confirmation depth.
    Confirmed = 1,
    /// Transaction reverted or withdrawal send failed.
    Failed = 2,
}

impl ActivityStatus {
    /// Human-readable name for display.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}

/// Error returned when an invalid activity status value is provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid activity status value: {0}")]
pub struct InvalidActivityStatus(pub u8);

impl TryFrom<u8> for ActivityStatus {
    type Error = InvalidActivityStatus;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Confirmed),
            2 => Ok(Self::Failed),
            _ => Err(InvalidActivityStatus(value)),
        }
    }
}

impl From<ActivityStatus> for u8 {
    #[allow(clippy::cast_sign_loss)]
    fn from(s: ActivityStatus) -> Self {
        s as i16 as Self
    }
}

impl From<ActivityStatus> for i16 {
    fn from(s: ActivityStatus) -> Self {
        s as Self
    }
}

impl std::fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// THROTTLE POLICY (C6)
// ═══════════════════════════════════════════════════════════════════════════════

/// Current admission/backoff posture for a chain, driven by recent RPC
/// error rates. See `engine::throttle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Policy {
    /// No recent rate-limit pressure; normal batch size and pacing.
    Normal,
    /// Minor pressure (`>3` rate-limit errors/min): small pause between batches.
    Moderate,
    /// Heavy pressure (`>6` rate-limit errors/min): single-block batches, longer pause.
    Aggressive,
    /// Breaker tripped: chain checks are suspended until cooldown elapses.
    Open,
}

impl Policy {
    /// Lowercase name for `ChainDiagnostics::policy` and logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Moderate => "moderate",
            Self::Aggressive => "aggressive",
            Self::Open => "open",
        }
    }

    /// Number of blocks to fetch concurrently per batch under this policy.
    #[must_use]
    pub const fn concurrent_blocks(&self, configured: u32) -> u32 {
        match self {
            Self::Normal | Self::Moderate => configured,
            Self::Aggressive | Self::Open => 1,
        }
    }
}

impl std::fmt::Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
