//! Configuration loading and validation for the chain monitor.
//!
//! Configuration is loaded from multiple sources in order of precedence:
//! 1. Environment variables (highest)
//! 2. Environment-specific file (e.g., `development.toml`)
//! 3. Default file (`default.toml`)
//!
//! # Example
//!
//! ```ignore
//! use chain_monitor::config::Settings;
//!
//! let settings = Settings::load("development")?;
//! println!("chains configured: {}", settings.chains.len());
//! ```

mod settings;

pub use settings::{
    ApiSettings, ChainConfig, DatabaseSettings, EngineSettings, IggySettings, LoggingSettings,
    MetricsSettings, RateLimitSettings, Settings, WithdrawalSettings,
};
