//! Settings structs and loading logic.
//!
//! All settings have sensible defaults and can be overridden via
//! environment variables or configuration files.

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Admission, throttle, and batching parameters shared by every chain.
    pub engine: EngineSettings,
    /// Per-chain configuration. At least one entry is required.
    pub chains: Vec<ChainConfig>,
    /// Database configuration.
    pub database: DatabaseSettings,
    /// Apache Iggy streaming configuration.
    pub iggy: IggySettings,
    /// API server configuration.
    pub api: ApiSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Metrics configuration.
    pub metrics: MetricsSettings,
    /// Withdrawal key-derivation configuration.
    pub withdrawal: WithdrawalSettings,
}

impl Settings {
    /// Load settings from configuration files and environment variables.
    ///
    /// Files are loaded in this order (later overrides earlier):
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (if exists)
    /// 3. Environment variables with the `MONITOR__` prefix
    ///
    /// Per-chain settings (`chains`) are array-of-table values and are not
    /// practically overridable through environment variables; set them via
    /// the TOML files.
    ///
    /// # Arguments
    /// * `environment` - Environment name (e.g., "development", "production")
    ///
    /// # Errors
    /// Returns `ConfigError` if configuration is invalid or cannot be loaded.
    pub fn load(environment: &str) -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".into());

        let builder = Config::builder()
            .set_default("engine.max_concurrent", 16)?
            .set_default("engine.min_headblock_spacing_ms", 200)?
            .set_default("engine.block_cache_max_age_ms", 2000)?
            .set_default("engine.poll_interval_ms", 4000)?
            .set_default("engine.check_interval_ms", 1000)?
            .set_default("engine.debounce_ms", 500)?
            .set_default("engine.concurrent_blocks", 8)?
            .set_default("engine.batch_pause_ms", 0)?
            .set_default("engine.initial_window", 200)?
            .set_default("engine.new_wallet_window", 100)?
            .set_default("engine.max_retries", 3)?
            .set_default("engine.retry_base_ms", 250)?
            .set_default("engine.retry_max_ms", 8000)?
            .set_default("engine.breaker_threshold", 12)?
            .set_default("engine.breaker_cooldown_ms", 120_000)?
            .set_default("engine.errors_per_minute_cap", 20)?
            .set_default("engine.db_batch_size", 500)?
            .set_default("database.url", "postgres://localhost/chain_monitor")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 1)?
            .set_default("database.connect_timeout_ms", 5000)?
            .set_default("database.idle_timeout_ms", 600_000)?
            .set_default("iggy.url", "tcp://localhost:8090")?
            .set_default("iggy.stream_name", "chain-monitor")?
            .set_default("iggy.partition_count", 3)?
            .set_default("iggy.replication_factor", 1)?
            .set_default("iggy.username", "iggy")?
            .set_default("iggy.password", "iggy")?
            .set_default("api.host", "0.0.0.0")?
            .set_default("api.port", 8080)?
            .set_default("api.cors_origins", vec!["http://localhost:5173"])?
            .set_default("api.request_timeout_ms", 30000)?
            .set_default("api.rate_limit.requests_per_second", 100)?
            .set_default("api.rate_limit.burst_size", 200)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .set_default("logging.file_path", Option::<String>::None)?
            .set_default("metrics.enabled", true)?
            .set_default("metrics.host", "0.0.0.0")?
            .set_default("metrics.port", 9090)?
            .add_source(File::with_name(&format!("{config_dir}/default")).required(false))
            .add_source(File::with_name(&format!("{config_dir}/{environment}")).required(false))
            .add_source(
                Environment::with_prefix("MONITOR")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load settings from a specific file path.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()
    }

    /// Validate settings and return any validation errors.
    ///
    /// # Errors
    /// Returns a list of validation error messages.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.chains.is_empty() {
            errors.push("at least one entry in `chains` is required".into());
        }
        for chain in &self.chains {
            if chain.rpc_url.is_empty() {
                errors.push(format!("chains[{}].rpc_url cannot be empty", chain.chain_id));
            }
            if chain.chain_id == 0 {
                errors.push("chain_id must be non-zero".into());
            }
            if chain.expected_block_time_ms == 0 {
                errors.push(format!(
                    "chains[{}].expected_block_time_ms must be non-zero",
                    chain.chain_id
                ));
            }
        }

        if self.engine.max_concurrent == 0 {
            errors.push("engine.max_concurrent must be non-zero".into());
        }
        if self.engine.concurrent_blocks == 0 {
            errors.push("engine.concurrent_blocks must be non-zero".into());
        }
        if self.engine.db_batch_size == 0 {
            errors.push("engine.db_batch_size must be non-zero".into());
        }
        if self.engine.breaker_threshold == 0 {
            errors.push("engine.breaker_threshold must be non-zero".into());
        }

        if self.database.url.is_empty() {
            errors.push("database.url cannot be empty".into());
        }
        if self.database.max_connections == 0 {
            errors.push("database.max_connections must be non-zero".into());
        }
        if self.database.min_connections > self.database.max_connections {
            errors.push("database.min_connections cannot exceed max_connections".into());
        }

        if self.api.port == 0 {
            errors.push("api.port must be non-zero".into());
        }
        if self.api.rate_limit.requests_per_second == 0 {
            errors.push("api.rate_limit.requests_per_second must be non-zero".into());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE SETTINGS
// ═══════════════════════════════════════════════════════════════════════════════

/// Cross-chain admission, throttle, and batching parameters.
///
/// Field names mirror the closed configuration set named throughout the
/// engine's design: `MAX_CONCURRENT`, `MIN_HEADBLOCK_SPACING`,
/// `BLOCK_CACHE_MAX_AGE`, `POLL_INTERVAL`, `CHECK_INTERVAL`, `DEBOUNCE`,
/// `CONCURRENT_BLOCKS`, `BATCH_PAUSE`, `INITIAL_WINDOW`, `NEW_WALLET_WINDOW`,
/// `MAX_RETRIES`, `RETRY_BASE`, `RETRY_MAX`, `BREAKER_THRESHOLD`,
/// `BREAKER_COOLDOWN`, `ERRORS_PER_MINUTE_CAP`, `DB_BATCH_SIZE`.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Process-wide RPC concurrency cap (C1).
    pub max_concurrent: u32,
    /// Minimum milliseconds between head-block RPCs (C1/C2).
    pub min_headblock_spacing_ms: u64,
    /// Freshness window for the cached head block, in milliseconds (C2).
    pub block_cache_max_age_ms: u64,
    /// Polling tick interval, in milliseconds (C4).
    pub poll_interval_ms: u64,
    /// Block-processor check interval, in milliseconds (C5).
    pub check_interval_ms: u64,
    /// Debounce window before a pass processes a new head, in milliseconds (C5).
    pub debounce_ms: u64,
    /// Concurrent block fetches per pass (C5).
    pub concurrent_blocks: u32,
    /// Pause between batches within a pass, in milliseconds (C5/C6).
    pub batch_pause_ms: u64,
    /// Blocks to scan on first start for a chain (C5).
    pub initial_window: u64,
    /// Blocks to scan when a wallet is newly registered (C8).
    pub new_wallet_window: u64,
    /// Maximum retries per RPC call (C5).
    pub max_retries: u32,
    /// Base back-off delay per retry, in milliseconds (C5).
    pub retry_base_ms: u64,
    /// Maximum back-off delay per retry, in milliseconds (C5).
    pub retry_max_ms: u64,
    /// Consecutive rate-limit errors that trip the breaker (C6).
    pub breaker_threshold: u32,
    /// Breaker cooldown duration, in milliseconds (C6).
    pub breaker_cooldown_ms: u64,
    /// Rate-limit errors per minute that trip the breaker (C6).
    pub errors_per_minute_cap: u32,
    /// Page size for paged database reads (C7/C8).
    pub db_batch_size: u32,
}

impl EngineSettings {
    /// Minimum spacing between head-block RPCs, as a `Duration`.
    #[must_use]
    pub const fn min_headblock_spacing(&self) -> Duration {
        Duration::from_millis(self.min_headblock_spacing_ms)
    }

    /// Head-block cache freshness window, as a `Duration`.
    #[must_use]
    pub const fn block_cache_max_age(&self) -> Duration {
        Duration::from_millis(self.block_cache_max_age_ms)
    }

    /// Polling tick interval, as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Block-processor check interval, as a `Duration`.
    #[must_use]
    pub const fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Debounce window, as a `Duration`.
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Pause between batches, as a `Duration`.
    #[must_use]
    pub const fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    /// Retry base delay, as a `Duration`.
    #[must_use]
    pub const fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    /// Retry max delay, as a `Duration`.
    #[must_use]
    pub const fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }

    /// Breaker cooldown, as a `Duration`.
    #[must_use]
    pub const fn breaker_cooldown(&self) -> Duration {
        Duration::from_millis(self.breaker_cooldown_ms)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PER-CHAIN CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for a single monitored chain.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Chain ID, used for labeling and as the primary key for chain state.
    pub chain_id: u64,
    /// HTTP JSON-RPC endpoint.
    pub rpc_url: String,
    /// WebSocket (or other push transport) endpoint for the realtime
    /// subscriber (C3). Optional: when absent, the chain runs polling-only.
    #[serde(default)]
    pub streaming_url: Option<String>,
    /// Expected block time, in milliseconds. Used to size default windows
    /// and to estimate stream-gap durations on reconnect.
    pub expected_block_time_ms: u64,
    /// Factory/entry-point contract address, carried for labeling only —
    /// this service does not decode factory events.
    #[serde(default)]
    pub factory_address: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// AMBIENT SETTINGS (database, streaming, api, logging, metrics)
// ═══════════════════════════════════════════════════════════════════════════════

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum connections in the pool.
    pub max_connections: u32,
    /// Minimum connections to maintain.
    pub min_connections: u32,
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Idle connection timeout in milliseconds.
    pub idle_timeout_ms: u64,
}

impl DatabaseSettings {
    /// Get the connection timeout as a `Duration`.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get the idle timeout as a `Duration`.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Apache Iggy streaming configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IggySettings {
    /// Iggy server URL.
    pub url: String,
    /// Stream name for activity events.
    pub stream_name: String,
    /// Number of partitions for the stream.
    pub partition_count: u32,
    /// Replication factor.
    pub replication_factor: u32,
    /// Username for authentication.
    pub username: String,
    /// Password for authentication.
    pub password: String,
}

/// API server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Rate limiting settings.
    pub rate_limit: RateLimitSettings,
}

impl ApiSettings {
    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Get the socket address string.
    #[must_use]
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Withdrawal signing key-derivation configuration.
#[derive(Clone, Deserialize)]
pub struct WithdrawalSettings {
    /// Service-wide secret mixed into the per-wallet key derivation.
    /// Never logged; `Debug` is implemented by hand to redact it.
    pub key_derivation_secret: String,
    /// Timeout awaiting a send's receipt, in milliseconds.
    pub receipt_timeout_ms: u64,
}

impl WithdrawalSettings {
    /// Receipt wait timeout, as a `Duration`.
    #[must_use]
    pub const fn receipt_timeout(&self) -> Duration {
        Duration::from_millis(self.receipt_timeout_ms)
    }
}

impl std::fmt::Debug for WithdrawalSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WithdrawalSettings")
            .field("key_derivation_secret", &"<redacted>")
            .field("receipt_timeout_ms", &self.receipt_timeout_ms)
            .finish()
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Maximum requests per second per client.
    pub requests_per_second: u32,
    /// Burst size (allows temporary spikes).
    pub burst_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Log format (json, pretty).
    pub format: String,
    /// Optional file path for log output.
    pub file_path: Option<String>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    /// Whether metrics are enabled.
    pub enabled: bool,
    /// Host to bind metrics server to.
    pub host: String,
    /// Port for metrics server.
    pub port: u16,
}

impl MetricsSettings {
    /// Get the metrics socket address string.
    #[must_use]
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
