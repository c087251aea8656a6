#![allow(dead_code)]

use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use bigdecimal::BigDecimal;

use crate::types::Chain;

/// Main configuration for the coordinator
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub database: DatabaseConfig,
    pub evm: EvmConfig,
    pub tron: TronConfig,
    pub tokens: TokenContracts,
    pub trade: TradeConfig,
    pub fee_wallets: FeeWallets,
    pub watcher: WatcherConfig,
    pub timers: TimersConfig,
}

/// Telegram platform credentials and admin identity
#[derive(Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub admin_username: String,
    pub admin_user_id: i64,
    /// The only group where /deal is accepted.
    pub main_group_id: i64,
}

/// Custom Debug that redacts the bot token to prevent accidental log leakage.
impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<redacted>")
            .field("admin_username", &self.admin_username)
            .field("admin_user_id", &self.admin_user_id)
            .field("main_group_id", &self.main_group_id)
            .finish()
    }
}

/// Database configuration
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

/// One EVM chain RPC endpoint set
#[derive(Debug, Clone, Deserialize)]
pub struct EvmChainRpc {
    pub chain: Chain,
    pub rpc_url: String,
    /// Additional RPC URLs for fallback (tried in order when primary fails)
    #[serde(default)]
    pub rpc_fallback_urls: Vec<String>,
}

impl EvmChainRpc {
    /// All RPC URLs: primary followed by fallbacks.
    pub fn all_rpc_urls(&self) -> Vec<String> {
        let mut urls = vec![self.rpc_url.clone()];
        urls.extend(self.rpc_fallback_urls.iter().cloned());
        urls
    }
}

/// EVM configuration: per-chain endpoints plus the shared hot wallet
#[derive(Clone, Deserialize)]
pub struct EvmConfig {
    pub chains: Vec<EvmChainRpc>,
    pub hot_wallet_private_key: String,
    #[serde(default)]
    pub explorer_api_key: Option<String>,
}

/// Custom Debug that redacts the private key.
impl fmt::Debug for EvmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmConfig")
            .field("chains", &self.chains)
            .field("hot_wallet_private_key", &"<redacted>")
            .field(
                "explorer_api_key",
                &self.explorer_api_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl EvmConfig {
    pub fn rpc_for(&self, chain: Chain) -> Option<&EvmChainRpc> {
        self.chains.iter().find(|c| c.chain == chain)
    }
}

/// Tron configuration
#[derive(Clone, Deserialize)]
pub struct TronConfig {
    pub rpc_url: String,
    pub private_key: String,
    #[serde(default)]
    pub explorer_api_key: Option<String>,
}

/// Custom Debug that redacts the private key.
impl fmt::Debug for TronConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TronConfig")
            .field("rpc_url", &self.rpc_url)
            .field("private_key", &"<redacted>")
            .field(
                "explorer_api_key",
                &self.explorer_api_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Per-token deployed ERC20/TRC20 contract addresses
#[derive(Debug, Clone, Deserialize)]
pub struct TokenContracts {
    pub usdt_bsc: String,
    pub usdc_bsc: String,
    pub usdt_tron: String,
}

/// Trade bounds and fee tier
#[derive(Debug, Clone, Deserialize)]
pub struct TradeConfig {
    /// Fee as a decimal percent, e.g. "0.25" = 0.25%.
    pub fee_percent: String,
    /// Same fee in basis points. Must agree with fee_percent.
    pub fee_bps: u32,
    pub min_trade_amount: String,
    pub max_trade_amount: String,
    #[serde(default = "default_deposit_ttl_minutes")]
    pub deposit_address_ttl_minutes: u64,
}

/// Fee distribution wallets
#[derive(Debug, Clone, Deserialize)]
pub struct FeeWallets {
    pub wallet1: String,
    pub wallet2: String,
    pub wallet3: String,
}

/// Deposit watcher tuning
#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// After this many consecutive empty RPC scans, also query the explorer.
    #[serde(default = "default_explorer_fallback_polls")]
    pub explorer_fallback_after_empty_polls: u32,
}

/// Timer durations (seconds)
#[derive(Debug, Clone, Deserialize)]
pub struct TimersConfig {
    #[serde(default = "default_join_timeout")]
    pub join_timeout_secs: u64,
    #[serde(default = "default_message_ttl")]
    pub message_ttl_secs: u64,
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,
    #[serde(default = "default_recycle_grace")]
    pub recycle_grace_secs: u64,
}

fn default_poll_interval() -> u64 {
    7000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5000
}

fn default_explorer_fallback_polls() -> u32 {
    5
}

fn default_deposit_ttl_minutes() -> u64 {
    60
}

fn default_join_timeout() -> u64 {
    300
}

fn default_message_ttl() -> u64 {
    300
}

fn default_inactivity_timeout() -> u64 {
    3600
}

fn default_recycle_grace() -> u64 {
    120
}

/// Parse a comma-separated RPC URL string into individual trimmed URLs.
pub fn parse_rpc_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    /// Load configuration from environment variables.
    /// Loads .env file if present, then reads from environment.
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env").or_else(|_| Self::load_from_env())
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    fn load_from_env() -> Result<Self> {
        let telegram = TelegramConfig {
            bot_token: env::var("BOT_TOKEN")
                .map_err(|_| eyre!("BOT_TOKEN environment variable is required"))?,
            admin_username: env::var("ADMIN_USERNAME")
                .map_err(|_| eyre!("ADMIN_USERNAME environment variable is required"))?,
            admin_user_id: env::var("ADMIN_USER_ID")
                .map_err(|_| eyre!("ADMIN_USER_ID environment variable is required"))?
                .parse()
                .wrap_err("ADMIN_USER_ID must be a valid i64")?,
            main_group_id: env::var("ALLOWED_MAIN_GROUP_ID")
                .map_err(|_| eyre!("ALLOWED_MAIN_GROUP_ID environment variable is required"))?
                .parse()
                .wrap_err("ALLOWED_MAIN_GROUP_ID must be a valid i64")?,
        };

        let database = DatabaseConfig {
            url: env::var("DB_URI").map_err(|_| eyre!("DB_URI environment variable is required"))?,
        };

        // EVM chains come from {CHAIN}_RPC_URL; a chain with no URL is
        // simply not enabled. At least one must be configured.
        let mut chains = Vec::new();
        for chain in [Chain::Bsc, Chain::Eth, Chain::Polygon] {
            let var = format!("{}_RPC_URL", chain.as_str());
            if let Ok(raw) = env::var(&var) {
                let urls = parse_rpc_urls(&raw);
                if urls.is_empty() {
                    return Err(eyre!("{} cannot be empty", var));
                }
                chains.push(EvmChainRpc {
                    chain,
                    rpc_url: urls[0].clone(),
                    rpc_fallback_urls: urls[1..].to_vec(),
                });
            }
        }

        let evm = EvmConfig {
            chains,
            hot_wallet_private_key: env::var("HOT_WALLET_PRIVATE_KEY")
                .map_err(|_| eyre!("HOT_WALLET_PRIVATE_KEY environment variable is required"))?,
            explorer_api_key: env::var("ETHERSCAN_API_KEY").ok(),
        };

        let tron = TronConfig {
            rpc_url: env::var("TRON_RPC_URL")
                .map_err(|_| eyre!("TRON_RPC_URL environment variable is required"))?,
            private_key: env::var("TRC_PRIVATE_KEY")
                .map_err(|_| eyre!("TRC_PRIVATE_KEY environment variable is required"))?,
            explorer_api_key: env::var("TRONGRID_API_KEY").ok(),
        };

        let tokens = TokenContracts {
            usdt_bsc: env::var("USDT_BSC_CONTRACT")
                .map_err(|_| eyre!("USDT_BSC_CONTRACT environment variable is required"))?,
            usdc_bsc: env::var("USDC_BSC_CONTRACT")
                .map_err(|_| eyre!("USDC_BSC_CONTRACT environment variable is required"))?,
            usdt_tron: env::var("USDT_TRON_CONTRACT")
                .map_err(|_| eyre!("USDT_TRON_CONTRACT environment variable is required"))?,
        };

        let trade = TradeConfig {
            fee_percent: env::var("ESCROW_FEE_PERCENT")
                .map_err(|_| eyre!("ESCROW_FEE_PERCENT environment variable is required"))?,
            fee_bps: env::var("ESCROW_FEE_BPS")
                .map_err(|_| eyre!("ESCROW_FEE_BPS environment variable is required"))?
                .parse()
                .wrap_err("ESCROW_FEE_BPS must be a valid u32")?,
            min_trade_amount: env::var("MIN_TRADE_AMOUNT")
                .map_err(|_| eyre!("MIN_TRADE_AMOUNT environment variable is required"))?,
            max_trade_amount: env::var("MAX_TRADE_AMOUNT")
                .map_err(|_| eyre!("MAX_TRADE_AMOUNT environment variable is required"))?,
            deposit_address_ttl_minutes: env::var("DEPOSIT_ADDRESS_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_deposit_ttl_minutes()),
        };

        let fee_wallets = FeeWallets {
            wallet1: env::var("FEE_WALLET_1")
                .map_err(|_| eyre!("FEE_WALLET_1 environment variable is required"))?,
            wallet2: env::var("FEE_WALLET_2")
                .map_err(|_| eyre!("FEE_WALLET_2 environment variable is required"))?,
            wallet3: env::var("FEE_WALLET_3")
                .map_err(|_| eyre!("FEE_WALLET_3 environment variable is required"))?,
        };

        let watcher = WatcherConfig {
            poll_interval_ms: env::var("POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_poll_interval()),
            retry_attempts: env::var("RETRY_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_retry_attempts()),
            retry_delay_ms: env::var("RETRY_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_retry_delay()),
            explorer_fallback_after_empty_polls: env::var("EXPLORER_FALLBACK_AFTER_EMPTY_POLLS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_explorer_fallback_polls()),
        };

        let timers = TimersConfig {
            join_timeout_secs: env::var("JOIN_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_join_timeout()),
            message_ttl_secs: env::var("MESSAGE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_message_ttl()),
            inactivity_timeout_secs: env::var("INACTIVITY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_inactivity_timeout()),
            recycle_grace_secs: env::var("RECYCLE_GRACE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_recycle_grace()),
        };

        let config = Config {
            telegram,
            database,
            evm,
            tron,
            tokens,
            trade,
            fee_wallets,
            watcher,
            timers,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.is_empty() {
            return Err(eyre!("telegram.bot_token cannot be empty"));
        }

        if self.telegram.admin_username.is_empty() {
            return Err(eyre!("telegram.admin_username cannot be empty"));
        }

        if self.database.url.is_empty() {
            return Err(eyre!("database.url cannot be empty"));
        }

        if self.evm.chains.is_empty() {
            return Err(eyre!("at least one EVM chain RPC must be configured"));
        }

        for chain in &self.evm.chains {
            if chain.rpc_url.is_empty() {
                return Err(eyre!("{} rpc_url cannot be empty", chain.chain));
            }
        }

        if self.evm.hot_wallet_private_key.len() != 66
            || !self.evm.hot_wallet_private_key.starts_with("0x")
        {
            return Err(eyre!(
                "evm.hot_wallet_private_key must be 66 chars (0x + 64 hex chars)"
            ));
        }

        if self.tron.rpc_url.is_empty() {
            return Err(eyre!("tron.rpc_url cannot be empty"));
        }

        let tron_key = self.tron.private_key.strip_prefix("0x").unwrap_or(&self.tron.private_key);
        if tron_key.len() != 64 || !tron_key.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(eyre!("tron.private_key must be 64 hex chars"));
        }

        for (name, addr) in [
            ("tokens.usdt_bsc", &self.tokens.usdt_bsc),
            ("tokens.usdc_bsc", &self.tokens.usdc_bsc),
        ] {
            if addr.len() != 42 || !addr.starts_with("0x") {
                return Err(eyre!(
                    "{} must be a valid hex address (42 chars with 0x prefix)",
                    name
                ));
            }
        }

        if self.tokens.usdt_tron.len() != 34 || !self.tokens.usdt_tron.starts_with('T') {
            return Err(eyre!(
                "tokens.usdt_tron must be a base58 Tron address (34 chars starting with T)"
            ));
        }

        // The decimal and basis-point forms of the fee must agree.
        let fee_percent = BigDecimal::from_str(&self.trade.fee_percent)
            .map_err(|_| eyre!("trade.fee_percent must be a decimal number"))?;
        let implied_bps = &fee_percent * BigDecimal::from(100);
        if implied_bps != BigDecimal::from(self.trade.fee_bps) {
            return Err(eyre!(
                "ESCROW_FEE_BPS ({}) disagrees with ESCROW_FEE_PERCENT ({})",
                self.trade.fee_bps,
                self.trade.fee_percent
            ));
        }

        let min = BigDecimal::from_str(&self.trade.min_trade_amount)
            .map_err(|_| eyre!("trade.min_trade_amount must be a decimal number"))?;
        let max = BigDecimal::from_str(&self.trade.max_trade_amount)
            .map_err(|_| eyre!("trade.max_trade_amount must be a decimal number"))?;
        if min <= BigDecimal::from(0) {
            return Err(eyre!("trade.min_trade_amount must be positive"));
        }
        if min >= max {
            return Err(eyre!(
                "trade.min_trade_amount must be below trade.max_trade_amount"
            ));
        }

        for (name, addr) in [
            ("fee_wallets.wallet1", &self.fee_wallets.wallet1),
            ("fee_wallets.wallet2", &self.fee_wallets.wallet2),
            ("fee_wallets.wallet3", &self.fee_wallets.wallet3),
        ] {
            if addr.len() != 42 || !addr.starts_with("0x") {
                return Err(eyre!(
                    "{} must be a valid EVM address (42 chars with 0x prefix)",
                    name
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            telegram: TelegramConfig {
                bot_token: "123456:ABC".to_string(),
                admin_username: "admin".to_string(),
                admin_user_id: 1,
                main_group_id: -100123,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/escrow".to_string(),
            },
            evm: EvmConfig {
                chains: vec![EvmChainRpc {
                    chain: Chain::Bsc,
                    rpc_url: "http://localhost:8545".to_string(),
                    rpc_fallback_urls: vec![],
                }],
                hot_wallet_private_key:
                    "0x0000000000000000000000000000000000000000000000000000000000000001"
                        .to_string(),
                explorer_api_key: None,
            },
            tron: TronConfig {
                rpc_url: "http://localhost:9090".to_string(),
                private_key:
                    "0000000000000000000000000000000000000000000000000000000000000001".to_string(),
                explorer_api_key: None,
            },
            tokens: TokenContracts {
                usdt_bsc: "0x0000000000000000000000000000000000000011".to_string(),
                usdc_bsc: "0x0000000000000000000000000000000000000012".to_string(),
                usdt_tron: "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t".to_string(),
            },
            trade: TradeConfig {
                fee_percent: "0.25".to_string(),
                fee_bps: 25,
                min_trade_amount: "10".to_string(),
                max_trade_amount: "10000".to_string(),
                deposit_address_ttl_minutes: 60,
            },
            fee_wallets: FeeWallets {
                wallet1: "0x0000000000000000000000000000000000000021".to_string(),
                wallet2: "0x0000000000000000000000000000000000000022".to_string(),
                wallet3: "0x0000000000000000000000000000000000000023".to_string(),
            },
            watcher: WatcherConfig {
                poll_interval_ms: 7000,
                retry_attempts: 3,
                retry_delay_ms: 5000,
                explorer_fallback_after_empty_polls: 5,
            },
            timers: TimersConfig {
                join_timeout_secs: 300,
                message_ttl_secs: 300,
                inactivity_timeout_secs: 3600,
                recycle_grace_secs: 120,
            },
        }
    }

    #[test]
    fn test_defaults() {
        assert_eq!(default_poll_interval(), 7000);
        assert_eq!(default_retry_attempts(), 3);
        assert_eq!(default_join_timeout(), 300);
        assert_eq!(default_inactivity_timeout(), 3600);
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_fee_agreement_enforced() {
        let mut config = valid_config();
        config.trade.fee_bps = 50; // disagrees with 0.25%
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ESCROW_FEE_BPS"));
    }

    #[test]
    fn test_hot_wallet_key_format() {
        let mut config = valid_config();
        config.evm.hot_wallet_private_key = "0x123".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tron_key_accepts_optional_prefix() {
        let mut config = valid_config();
        config.tron.private_key = format!("0x{}", "1".repeat(64));
        assert!(config.validate().is_ok());
        config.tron.private_key = "1".repeat(64);
        assert!(config.validate().is_ok());
        config.tron.private_key = "xyz".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_trade_bounds_ordering() {
        let mut config = valid_config();
        config.trade.min_trade_amount = "10000".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_requires_one_evm_chain() {
        let mut config = valid_config();
        config.evm.chains.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tron_token_address_shape() {
        let mut config = valid_config();
        config.tokens.usdt_tron = "0x0000000000000000000000000000000000000011".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_rpc_urls() {
        let urls = parse_rpc_urls(" https://a.com , https://b.com ,, ");
        assert_eq!(urls, vec!["https://a.com", "https://b.com"]);
        assert!(parse_rpc_urls("").is_empty());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = valid_config();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("123456:ABC"));
        assert!(!rendered.contains("postgres://localhost"));
        assert!(rendered.contains("<redacted>"));
    }
}
