//! Service configuration.
//!
//! Loaded from a TOML file with `${VAR}` environment expansion, validated
//! before use. Every tuning knob has a default so a minimal file only needs
//! the network section.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use alloy_primitives::U256;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use gauntlet_core::Address;

/// Main configuration for the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Chain endpoints and contract addresses.
    pub network: NetworkConfig,

    /// Watcher and projection tuning.
    #[serde(default)]
    pub indexer: IndexerConfig,

    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Bootstrap token rates.
    #[serde(default)]
    pub tokens: TokensConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Chain JSON-RPC endpoints; requests rotate to the next on failure.
    pub rpc_urls: Vec<String>,

    /// The agent registry contract.
    pub registry_address: Address,
}

/// Watcher and projection tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// First block to index, inclusive.
    #[serde(default)]
    pub starting_block: u64,

    /// Confirmation depth subtracted from the chain head.
    #[serde(default)]
    pub safe_block_delta: u64,

    /// Maximum blocks per event query window.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Poll interval at the tip, in milliseconds.
    #[serde(default = "default_event_tick_rate_ms")]
    pub event_tick_rate_ms: u64,

    /// Poll interval while catching up, in milliseconds.
    #[serde(default = "default_event_startup_tick_rate_ms")]
    pub event_startup_tick_rate_ms: u64,

    /// Balance refresh interval, in seconds.
    #[serde(default = "default_balance_tick_rate_secs")]
    pub balance_tick_rate_secs: u64,

    /// Oracle refresh interval, in seconds.
    #[serde(default = "default_price_tick_rate_secs")]
    pub price_tick_rate_secs: u64,

    /// Concurrent balance reads per refresh sweep.
    #[serde(default = "default_balance_workers")]
    pub balance_workers: usize,

    /// Per-agent prompt-history cap.
    #[serde(default = "default_max_prompts")]
    pub max_prompts: usize,

    /// Prompt correlation cache capacity.
    #[serde(default = "default_prompt_cache_size")]
    pub prompt_cache_size: usize,

    /// Prompt correlation cache TTL, in seconds.
    #[serde(default = "default_prompt_cache_ttl_secs")]
    pub prompt_cache_ttl_secs: u64,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_server_addr")]
    pub addr: String,

    /// Page size for paginated responses.
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

/// Bootstrap token rates, keyed by token address, valued as decimal
/// USD-per-unit strings scaled by 10^18. Served until a live oracle is
/// wired in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokensConfig {
    /// token address → rate.
    #[serde(default)]
    pub rates: HashMap<String, String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_chunk_size() -> u64 {
    1000
}

fn default_event_tick_rate_ms() -> u64 {
    5000
}

fn default_event_startup_tick_rate_ms() -> u64 {
    500
}

fn default_balance_tick_rate_secs() -> u64 {
    10
}

fn default_price_tick_rate_secs() -> u64 {
    60
}

fn default_balance_workers() -> usize {
    16
}

fn default_max_prompts() -> usize {
    10
}

fn default_prompt_cache_size() -> usize {
    10_000
}

fn default_prompt_cache_ttl_secs() -> u64 {
    30 * 60
}

fn default_server_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_page_size() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            starting_block: 0,
            safe_block_delta: 0,
            chunk_size: default_chunk_size(),
            event_tick_rate_ms: default_event_tick_rate_ms(),
            event_startup_tick_rate_ms: default_event_startup_tick_rate_ms(),
            balance_tick_rate_secs: default_balance_tick_rate_secs(),
            price_tick_rate_secs: default_price_tick_rate_secs(),
            balance_workers: default_balance_workers(),
            max_prompts: default_max_prompts(),
            prompt_cache_size: default_prompt_cache_size(),
            prompt_cache_ttl_secs: default_prompt_cache_ttl_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
            page_size: default_page_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, expanding `${VAR}` references
    /// from the environment first.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let expanded = expand_env_vars(&contents)?;
        let config: Config = toml::from_str(&expanded)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (no env expansion).
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml).context("failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.network.rpc_urls.is_empty() {
            bail!("network rpc_urls cannot be empty");
        }
        if self.network.rpc_urls.iter().any(|u| u.trim().is_empty()) {
            bail!("network rpc_urls entries cannot be empty");
        }
        if self.network.registry_address.is_zero() {
            bail!("network registry_address must be a non-zero address");
        }

        if self.indexer.chunk_size == 0 {
            bail!("indexer chunk_size must be > 0");
        }
        if self.indexer.event_tick_rate_ms == 0 || self.indexer.event_startup_tick_rate_ms == 0 {
            bail!("indexer event tick rates must be > 0");
        }
        if self.indexer.balance_tick_rate_secs == 0 {
            bail!("indexer balance_tick_rate_secs must be > 0");
        }
        if self.indexer.price_tick_rate_secs == 0 {
            bail!("indexer price_tick_rate_secs must be > 0");
        }
        if self.indexer.balance_workers == 0 {
            bail!("indexer balance_workers must be > 0");
        }
        if self.indexer.max_prompts == 0 {
            bail!("indexer max_prompts must be > 0");
        }
        if self.indexer.prompt_cache_size == 0 {
            bail!("indexer prompt_cache_size must be > 0");
        }

        if self.server.page_size == 0 {
            bail!("server page_size must be > 0");
        }
        if self.server.addr.trim().is_empty() {
            bail!("server addr cannot be empty");
        }

        self.token_rates().context("tokens rates failed to parse")?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            bail!(
                "logging level must be one of: {} (got '{}')",
                valid_levels.join(", "),
                self.logging.level
            );
        }
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            bail!(
                "logging format must be one of: {} (got '{}')",
                valid_formats.join(", "),
                self.logging.format
            );
        }

        Ok(())
    }

    /// The bootstrap rate table, parsed into typed form.
    pub fn token_rates(&self) -> Result<HashMap<Address, U256>> {
        let mut rates = HashMap::with_capacity(self.tokens.rates.len());
        for (token, rate) in &self.tokens.rates {
            let address: Address = token
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid token address {token}: {e}"))?;
            let rate = U256::from_str_radix(rate.trim(), 10)
                .with_context(|| format!("invalid rate for token {token}: {rate}"))?;
            rates.insert(address, rate);
        }
        Ok(rates)
    }

    /// Tip-poll interval.
    pub fn event_tick_rate(&self) -> Duration {
        Duration::from_millis(self.indexer.event_tick_rate_ms)
    }

    /// Catch-up poll interval.
    pub fn event_startup_tick_rate(&self) -> Duration {
        Duration::from_millis(self.indexer.event_startup_tick_rate_ms)
    }

    /// Balance refresh interval.
    pub fn balance_tick_rate(&self) -> Duration {
        Duration::from_secs(self.indexer.balance_tick_rate_secs)
    }

    /// Oracle refresh interval.
    pub fn price_tick_rate(&self) -> Duration {
        Duration::from_secs(self.indexer.price_tick_rate_secs)
    }

    /// Prompt cache TTL.
    pub fn prompt_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.indexer.prompt_cache_ttl_secs)
    }
}

/// Replace `${VAR}` references with environment values. An unset variable
/// is an error; a `$` not followed by `{` passes through unchanged.
fn expand_env_vars(input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .with_context(|| format!("unclosed environment placeholder near: ${{{after}"))?;
        let name = &after[..end];
        if name.is_empty() {
            bail!("empty environment variable name in placeholder");
        }
        let value = std::env::var(name)
            .with_context(|| format!("environment variable '{name}' is not set"))?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}
