//! Chain gateway
//!
//! One uniform surface for release/refund/withdraw/balance/transfer-scan
//! across both chain families. Dispatch happens on `Chain::family()`: EVM
//! chains share the alloy driver (one instance per configured chain), Tron
//! gets its own HTTP driver. All amounts cross this boundary in base units.

#![allow(dead_code)]

pub mod contracts;
pub mod evm;
pub mod explorer;
pub mod tron;

use alloy::primitives::U256;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

use crate::config::Config;
use crate::error::{CoordError, CoordResult};
use crate::types::{base_units_to_human, human_to_base_units, Chain, ChainFamily, Token};

/// A token transfer credited to a watched address.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenTransfer {
    pub from: String,
    pub to: String,
    pub value_base_units: U256,
    pub value_decimal: String,
    pub tx_hash: String,
    pub block_number: u64,
    pub log_index: u32,
}

/// Result of a mined release/refund/withdraw submission.
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub transaction_hash: String,
}

/// Fee parameters read back from a deployed vault.
#[derive(Debug, Clone)]
pub struct FeeSettings {
    pub fee_wallet: String,
    pub fee_percent_bps: u64,
    pub accumulated_base_units: U256,
}

/// Static decimals per (token, chain) pair.
///
/// Unknown pairs are refused outright; defaulting to 18 silently corrupts
/// every amount on a 6-decimal token.
pub fn token_decimals(token: &Token, chain: Chain) -> CoordResult<u8> {
    match (token.as_str(), chain) {
        ("USDT", Chain::Bsc) => Ok(18),
        ("USDC", Chain::Bsc) => Ok(18),
        ("USDT", Chain::Eth) => Ok(6),
        ("USDC", Chain::Eth) => Ok(6),
        ("USDT", Chain::Polygon) => Ok(6),
        ("USDC", Chain::Polygon) => Ok(6),
        ("USDT", Chain::Tron) => Ok(6),
        _ => Err(CoordError::Validation(format!(
            "no decimals known for {} on {}",
            token, chain
        ))),
    }
}

/// Deployed token contract addresses per (token, chain) pair.
#[derive(Debug, Clone)]
pub struct TokenDirectory {
    entries: HashMap<(String, Chain), String>,
}

impl TokenDirectory {
    pub fn from_config(config: &Config) -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            ("USDT".to_string(), Chain::Bsc),
            config.tokens.usdt_bsc.clone(),
        );
        entries.insert(
            ("USDC".to_string(), Chain::Bsc),
            config.tokens.usdc_bsc.clone(),
        );
        entries.insert(
            ("USDT".to_string(), Chain::Tron),
            config.tokens.usdt_tron.clone(),
        );
        TokenDirectory { entries }
    }

    pub fn address_of(&self, token: &Token, chain: Chain) -> CoordResult<&str> {
        self.entries
            .get(&(token.as_str().to_string(), chain))
            .map(|s| s.as_str())
            .ok_or_else(|| {
                CoordError::Validation(format!(
                    "no token contract configured for {} on {}",
                    token, chain
                ))
            })
    }

    /// Tokens available on a given chain.
    pub fn tokens_on(&self, chain: Chain) -> Vec<Token> {
        let mut tokens: Vec<Token> = self
            .entries
            .keys()
            .filter(|(_, c)| *c == chain)
            .map(|(t, _)| Token::new(t))
            .collect();
        tokens.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        tokens
    }
}

/// Bounded retry for transient chain failures. Reverts and other permanent
/// errors pass through on the first attempt.
pub(crate) async fn with_chain_retry<T, F, Fut>(
    attempts: u32,
    initial_delay: Duration,
    mut operation: F,
) -> CoordResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = CoordResult<T>>,
{
    let mut last_error = None;

    for attempt in 0..attempts.max(1) {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                let backoff = initial_delay * 2u32.pow(attempt);
                warn!(
                    attempt = attempt + 1,
                    max = attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Transient chain error, retrying"
                );
                last_error = Some(e);
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error
        .unwrap_or_else(|| CoordError::Internal("retry loop exhausted without error".to_string())))
}

/// Unified gateway over the EVM and Tron drivers.
pub struct ChainGateway {
    evm: HashMap<Chain, evm::EvmDriver>,
    tron: tron::TronDriver,
    tokens: TokenDirectory,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl ChainGateway {
    pub fn new(config: &Config) -> eyre::Result<Self> {
        let mut evm = HashMap::new();
        for chain_rpc in &config.evm.chains {
            let driver = evm::EvmDriver::new(
                chain_rpc.chain,
                &chain_rpc.rpc_url,
                &config.evm.hot_wallet_private_key,
            )?;
            evm.insert(chain_rpc.chain, driver);
        }

        let tron = tron::TronDriver::new(&config.tron.rpc_url, &config.tron.private_key)?;

        Ok(ChainGateway {
            evm,
            tron,
            tokens: TokenDirectory::from_config(config),
            retry_attempts: config.watcher.retry_attempts,
            retry_delay: Duration::from_millis(config.watcher.retry_delay_ms),
        })
    }

    pub fn token_directory(&self) -> &TokenDirectory {
        &self.tokens
    }

    fn evm_driver(&self, chain: Chain) -> CoordResult<&evm::EvmDriver> {
        self.evm.get(&chain).ok_or_else(|| {
            CoordError::Validation(format!("chain {} is not configured", chain))
        })
    }

    /// Resolve the base-unit amount for a call: the exact override wins,
    /// otherwise the human amount is converted through the decimals table.
    fn resolve_amount(
        &self,
        token: &Token,
        chain: Chain,
        amount_human: &str,
        base_units_override: Option<U256>,
    ) -> CoordResult<U256> {
        if let Some(exact) = base_units_override {
            return Ok(exact);
        }
        let decimals = token_decimals(token, chain)?;
        human_to_base_units(amount_human, decimals)
    }

    /// Invoke `release(to, amount)` on the vault.
    pub async fn release_funds(
        &self,
        token: &Token,
        chain: Chain,
        vault_address: &str,
        to: &str,
        amount_human: &str,
        amount_base_units_override: Option<U256>,
    ) -> CoordResult<TxReceipt> {
        let amount = self.resolve_amount(token, chain, amount_human, amount_base_units_override)?;

        with_chain_retry(self.retry_attempts, self.retry_delay, move || async move {
            match chain.family() {
                ChainFamily::Evm => {
                    self.evm_driver(chain)?
                        .release(vault_address, to, amount)
                        .await
                }
                ChainFamily::Tron => self.tron.release(vault_address, to, amount).await,
            }
        })
        .await
    }

    /// Invoke `refund(to, amount)` on the vault.
    pub async fn refund_funds(
        &self,
        token: &Token,
        chain: Chain,
        vault_address: &str,
        to: &str,
        amount_human: &str,
        amount_base_units_override: Option<U256>,
    ) -> CoordResult<TxReceipt> {
        let amount = self.resolve_amount(token, chain, amount_human, amount_base_units_override)?;

        with_chain_retry(self.retry_attempts, self.retry_delay, move || async move {
            match chain.family() {
                ChainFamily::Evm => {
                    self.evm_driver(chain)?
                        .refund(vault_address, to, amount)
                        .await
                }
                ChainFamily::Tron => self.tron.refund(vault_address, to, amount).await,
            }
        })
        .await
    }

    /// Owner-only sweep of an arbitrary token out of a vault.
    pub async fn withdraw_token(
        &self,
        chain: Chain,
        vault_address: &str,
        token_contract: &str,
        to: &str,
    ) -> CoordResult<TxReceipt> {
        with_chain_retry(self.retry_attempts, self.retry_delay, move || async move {
            match chain.family() {
                ChainFamily::Evm => {
                    self.evm_driver(chain)?
                        .withdraw_token(vault_address, token_contract, to)
                        .await
                }
                ChainFamily::Tron => {
                    self.tron
                        .withdraw_token(vault_address, token_contract, to)
                        .await
                }
            }
        })
        .await
    }

    /// Token balance of an address, in human decimal.
    pub async fn token_balance(
        &self,
        token: &Token,
        chain: Chain,
        address: &str,
    ) -> CoordResult<String> {
        let decimals = token_decimals(token, chain)?;
        let token_contract = self.tokens.address_of(token, chain)?;

        let base = with_chain_retry(self.retry_attempts, self.retry_delay, move || async move {
            match chain.family() {
                ChainFamily::Evm => {
                    self.evm_driver(chain)?
                        .balance_of(token_contract, address)
                        .await
                }
                ChainFamily::Tron => self.tron.balance_of(token_contract, address).await,
            }
        })
        .await?;

        Ok(base_units_to_human(base, decimals))
    }

    /// Transfer events into `to` from `from_block` onward, oldest first.
    pub async fn token_transfers_via_rpc(
        &self,
        token: &Token,
        chain: Chain,
        to: &str,
        from_block: u64,
    ) -> CoordResult<Vec<TokenTransfer>> {
        let decimals = token_decimals(token, chain)?;
        let token_contract = self.tokens.address_of(token, chain)?;

        match chain.family() {
            ChainFamily::Evm => {
                self.evm_driver(chain)?
                    .scan_transfers(token_contract, to, from_block, decimals)
                    .await
            }
            ChainFamily::Tron => {
                self.tron
                    .scan_transfers(token_contract, to, from_block, decimals)
                    .await
            }
        }
    }

    pub async fn latest_block_number(&self, chain: Chain) -> CoordResult<u64> {
        match chain.family() {
            ChainFamily::Evm => self.evm_driver(chain)?.latest_block().await,
            ChainFamily::Tron => self.tron.latest_block().await,
        }
    }

    /// Fee parameters of a deployed vault.
    pub async fn fee_settings(
        &self,
        _token: &Token,
        chain: Chain,
        vault_address: &str,
    ) -> CoordResult<FeeSettings> {
        match chain.family() {
            ChainFamily::Evm => self.evm_driver(chain)?.fee_settings(vault_address).await,
            ChainFamily::Tron => self.tron.fee_settings(vault_address).await,
        }
    }

    /// Replay a stored receipt lookup after restart: was the submitted
    /// transaction mined successfully?
    pub async fn transaction_succeeded(
        &self,
        chain: Chain,
        tx_hash: &str,
    ) -> CoordResult<Option<bool>> {
        match chain.family() {
            ChainFamily::Evm => self.evm_driver(chain)?.check_tx_success(tx_hash).await,
            ChainFamily::Tron => self.tron.check_tx_success(tx_hash).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimals_table_known_pairs() {
        assert_eq!(token_decimals(&Token::new("USDT"), Chain::Bsc).unwrap(), 18);
        assert_eq!(token_decimals(&Token::new("USDC"), Chain::Bsc).unwrap(), 18);
        assert_eq!(token_decimals(&Token::new("USDT"), Chain::Tron).unwrap(), 6);
        assert_eq!(token_decimals(&Token::new("USDT"), Chain::Eth).unwrap(), 6);
    }

    #[test]
    fn test_decimals_table_refuses_unknown_pair() {
        let err = token_decimals(&Token::new("DOGE"), Chain::Bsc).unwrap_err();
        assert!(matches!(err, CoordError::Validation(_)));
        // USDC does not exist on Tron in this deployment.
        assert!(token_decimals(&Token::new("USDC"), Chain::Tron).is_err());
    }

    #[test]
    fn test_token_directory_lookup() {
        let mut entries = HashMap::new();
        entries.insert(
            ("USDT".to_string(), Chain::Bsc),
            "0x0000000000000000000000000000000000000011".to_string(),
        );
        let directory = TokenDirectory { entries };

        assert!(directory.address_of(&Token::new("USDT"), Chain::Bsc).is_ok());
        assert!(directory
            .address_of(&Token::new("USDT"), Chain::Tron)
            .is_err());
        assert_eq!(directory.tokens_on(Chain::Bsc), vec![Token::new("USDT")]);
        assert!(directory.tokens_on(Chain::Polygon).is_empty());
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_transient_attempts() {
        let calls = std::cell::Cell::new(0u32);
        let result: CoordResult<()> = with_chain_retry(3, Duration::from_millis(1), || {
            calls.set(calls.get() + 1);
            async { Err(CoordError::TransientChain("rpc timeout".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_error() {
        let calls = std::cell::Cell::new(0u32);
        let result: CoordResult<()> = with_chain_retry(3, Duration::from_millis(1), || {
            calls.set(calls.get() + 1);
            async { Err(CoordError::OnchainRevert("owner mismatch".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_retry_returns_first_success() {
        let calls = std::cell::Cell::new(0u32);
        let result = with_chain_retry(3, Duration::from_millis(1), || {
            calls.set(calls.get() + 1);
            let attempt = calls.get();
            async move {
                if attempt < 2 {
                    Err(CoordError::TransientChain("nonce too low".to_string()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
    }
}
