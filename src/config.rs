//! Configuration management for the wallet client
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub node: NodeConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub chain_id: u64,
    pub rpc_urls: Vec<String>,
    #[serde(default = "default_native_symbol")]
    pub native_symbol: String,
    #[serde(default = "default_gas_price_strategy")]
    pub gas_price_strategy: GasPriceStrategy,
    #[serde(default = "default_max_gas_price_gwei")]
    pub max_gas_price_gwei: u64,
    #[serde(default = "default_confirmation_blocks")]
    pub confirmation_blocks: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_settlement_timeout_secs")]
    pub settlement_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub api_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Directory holding the persisted session
    pub storage_dir: PathBuf,
    pub fee_debounce_ms: u64,
    pub gas_limit_buffer_percent: u64,
    pub gas_price_buffer_percent: u64,
    /// Gas price multiplier for same-nonce replacements, in percent
    pub replacement_bump_percent: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub symbol: String,
    pub contract_address: String,
    /// Known precision; fetched from the contract when absent
    pub decimals: Option<u8>,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from(".wallet"),
            fee_debounce_ms: 500,
            gas_limit_buffer_percent: 20,
            gas_price_buffer_percent: 0,
            replacement_bump_percent: 125,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,custodial_wallet=debug,hyper=warn,reqwest=warn".to_string(),
            json: false,
        }
    }
}

fn default_native_symbol() -> String {
    "ETH".to_string()
}

fn default_gas_price_strategy() -> GasPriceStrategy {
    GasPriceStrategy::Legacy
}

fn default_max_gas_price_gwei() -> u64 {
    500
}

fn default_confirmation_blocks() -> u64 {
    1
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_settlement_timeout_secs() -> u64 {
    600
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("WALLET_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse settings from TOML text, substituting `${VAR}` references first
    pub fn from_toml(input: &str) -> Result<Self> {
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.node.rpc_urls.is_empty() {
            anyhow::bail!("No RPC URLs configured");
        }
        if self.backend.api_url.is_empty() {
            anyhow::bail!("Backend api_url must be set");
        }
        if self.wallet.replacement_bump_percent <= 100 {
            anyhow::bail!(
                "replacement_bump_percent must exceed 100, got {}",
                self.wallet.replacement_bump_percent
            );
        }

        for token in &self.tokens {
            if token.contract_address.is_empty() {
                anyhow::bail!("Token {} has no contract address", token.symbol);
            }
            if token.symbol.eq_ignore_ascii_case(&self.node.native_symbol) {
                anyhow::bail!("Token symbol {} clashes with the native asset", token.symbol);
            }
        }

        Ok(())
    }

    pub fn fee_debounce(&self) -> Duration {
        Duration::from_millis(self.wallet.fee_debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.node.poll_interval_ms)
    }

    pub fn settlement_timeout(&self) -> Duration {
        Duration::from_secs(self.node.settlement_timeout_secs)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
    }

    ENV_VAR
        .replace_all(input, |cap: &regex::Captures| {
            env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned()
}
