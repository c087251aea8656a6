//! EVM driver
//!
//! Owner-signed vault calls and ERC20 Transfer scans over one HTTP RPC per
//! chain. The hot wallet is shared by every release on a chain, so
//! submissions serialize behind `submit_lock` and the nonce is fetched fresh
//! under that lock, with a single refetch when the node reports a race.

use alloy::network::EthereumWallet;
use alloy::primitives::{keccak256, Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::Filter;
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::{Client, Http};
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::chain::contracts::{EscrowVault, ERC20};
use crate::chain::{TokenTransfer, TxReceipt};
use crate::error::{classify_chain_error, CoordError, CoordResult};
use crate::types::{base_units_to_human, Chain};

pub struct EvmDriver {
    chain: Chain,
    rpc_url: String,
    signer: PrivateKeySigner,
    /// Serializes hot-wallet submissions on this chain (nonce ordering).
    submit_lock: Mutex<()>,
}

impl EvmDriver {
    pub fn new(chain: Chain, rpc_url: &str, private_key: &str) -> eyre::Result<Self> {
        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| eyre::eyre!("Invalid hot wallet private key: {}", e))?;

        info!(
            chain = %chain,
            hot_wallet = %signer.address(),
            "EVM driver initialized"
        );

        Ok(Self {
            chain,
            rpc_url: rpc_url.to_string(),
            signer,
            submit_lock: Mutex::new(()),
        })
    }

    fn read_provider(&self) -> CoordResult<RootProvider<Http<Client>>> {
        let url = self
            .rpc_url
            .parse()
            .map_err(|e| CoordError::Internal(format!("invalid RPC URL: {}", e)))?;
        Ok(ProviderBuilder::new().on_http(url))
    }

    fn parse_address(raw: &str) -> CoordResult<Address> {
        Address::from_str(raw)
            .map_err(|_| CoordError::Validation(format!("bad EVM address: {}", raw)))
    }

    /// Invoke `release(to, amount)` on the vault.
    pub async fn release(&self, vault: &str, to: &str, amount: U256) -> CoordResult<TxReceipt> {
        let vault_address = Self::parse_address(vault)?;
        let to_address = Self::parse_address(to)?;

        let _guard = self.submit_lock.lock().await;

        let url = self
            .rpc_url
            .parse()
            .map_err(|e| CoordError::Internal(format!("invalid RPC URL: {}", e)))?;
        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new().wallet(wallet).on_http(url);
        let contract = EscrowVault::new(vault_address, provider.clone());

        let mut nonce_retried = false;
        loop {
            let nonce = provider
                .get_transaction_count(self.signer.address())
                .await
                .map_err(|e| classify_chain_error(&e.to_string()))?;

            match contract.release(to_address, amount).nonce(nonce).send().await {
                Ok(pending) => {
                    let receipt = pending
                        .get_receipt()
                        .await
                        .map_err(|e| classify_chain_error(&e.to_string()))?;
                    if !receipt.status() {
                        return Err(CoordError::OnchainRevert(format!(
                            "release reverted on {} (tx {:?})",
                            self.chain, receipt.transaction_hash
                        )));
                    }
                    info!(
                        chain = %self.chain,
                        vault = %vault_address,
                        to = %to_address,
                        amount = %amount,
                        tx_hash = %format!("{:?}", receipt.transaction_hash),
                        "Release submitted and mined"
                    );
                    return Ok(TxReceipt {
                        transaction_hash: format!("{:?}", receipt.transaction_hash),
                    });
                }
                Err(e) => {
                    let message = e.to_string();
                    let lower = message.to_lowercase();
                    if !nonce_retried
                        && (lower.contains("nonce too low") || lower.contains("already known"))
                    {
                        warn!(chain = %self.chain, "Nonce race on release, refetching once");
                        nonce_retried = true;
                        continue;
                    }
                    return Err(classify_chain_error(&message));
                }
            }
        }
    }

    /// Invoke `refund(to, amount)` on the vault.
    pub async fn refund(&self, vault: &str, to: &str, amount: U256) -> CoordResult<TxReceipt> {
        let vault_address = Self::parse_address(vault)?;
        let to_address = Self::parse_address(to)?;

        let _guard = self.submit_lock.lock().await;

        let url = self
            .rpc_url
            .parse()
            .map_err(|e| CoordError::Internal(format!("invalid RPC URL: {}", e)))?;
        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new().wallet(wallet).on_http(url);
        let contract = EscrowVault::new(vault_address, provider);

        let pending = contract
            .refund(to_address, amount)
            .send()
            .await
            .map_err(|e| classify_chain_error(&e.to_string()))?;
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| classify_chain_error(&e.to_string()))?;

        if !receipt.status() {
            return Err(CoordError::OnchainRevert(format!(
                "refund reverted on {} (tx {:?})",
                self.chain, receipt.transaction_hash
            )));
        }

        Ok(TxReceipt {
            transaction_hash: format!("{:?}", receipt.transaction_hash),
        })
    }

    /// Invoke `withdrawToken(token, to)` on the vault.
    pub async fn withdraw_token(
        &self,
        vault: &str,
        token_contract: &str,
        to: &str,
    ) -> CoordResult<TxReceipt> {
        let vault_address = Self::parse_address(vault)?;
        let token_address = Self::parse_address(token_contract)?;
        let to_address = Self::parse_address(to)?;

        let _guard = self.submit_lock.lock().await;

        let url = self
            .rpc_url
            .parse()
            .map_err(|e| CoordError::Internal(format!("invalid RPC URL: {}", e)))?;
        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new().wallet(wallet).on_http(url);
        let contract = EscrowVault::new(vault_address, provider);

        let pending = contract
            .withdrawToken(token_address, to_address)
            .send()
            .await
            .map_err(|e| classify_chain_error(&e.to_string()))?;
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| classify_chain_error(&e.to_string()))?;

        if !receipt.status() {
            return Err(CoordError::OnchainRevert(format!(
                "withdrawToken reverted on {}",
                self.chain
            )));
        }

        Ok(TxReceipt {
            transaction_hash: format!("{:?}", receipt.transaction_hash),
        })
    }

    /// ERC20 balance in base units.
    pub async fn balance_of(&self, token_contract: &str, account: &str) -> CoordResult<U256> {
        let token_address = Self::parse_address(token_contract)?;
        let account_address = Self::parse_address(account)?;

        let provider = self.read_provider()?;
        let contract = ERC20::new(token_address, provider);
        let balance = contract
            .balanceOf(account_address)
            .call()
            .await
            .map_err(|e| classify_chain_error(&e.to_string()))?;
        Ok(balance._0)
    }

    /// Scan ERC20 Transfer events into `to` from `from_block` to latest.
    ///
    /// The filter is by token contract address; the destination topic is
    /// checked per log so unrelated transfers in the same range are skipped.
    pub async fn scan_transfers(
        &self,
        token_contract: &str,
        to: &str,
        from_block: u64,
        decimals: u8,
    ) -> CoordResult<Vec<TokenTransfer>> {
        let token_address = Self::parse_address(token_contract)?;
        let watched = Self::parse_address(to)?;

        let provider = self.read_provider()?;
        let latest = provider
            .get_block_number()
            .await
            .map_err(|e| classify_chain_error(&e.to_string()))?;

        if from_block > latest {
            return Ok(Vec::new());
        }

        let filter = Filter::new()
            .address(token_address)
            .from_block(from_block)
            .to_block(latest);

        let logs = provider
            .get_logs(&filter)
            .await
            .map_err(|e| classify_chain_error(&e.to_string()))?;

        let transfer_signature = Self::transfer_signature();
        let watched_word: B256 = watched.into_word();
        let mut transfers = Vec::new();

        for log in logs {
            let topics = log.topics();
            if topics.len() < 3 || topics[0] != transfer_signature {
                continue;
            }
            if topics[2] != watched_word {
                continue;
            }

            let from = Address::from_word(topics[1]);
            let value = U256::from_be_slice(log.data().data.as_ref());

            let tx_hash = log
                .transaction_hash
                .ok_or_else(|| CoordError::Internal("transfer log missing tx hash".to_string()))?;
            let block_number = log.block_number.ok_or_else(|| {
                CoordError::Internal("transfer log missing block number".to_string())
            })?;
            let log_index = log
                .log_index
                .ok_or_else(|| CoordError::Internal("transfer log missing log index".to_string()))?;

            transfers.push(TokenTransfer {
                from: format!("{:?}", from),
                to: format!("{:?}", watched),
                value_base_units: value,
                value_decimal: base_units_to_human(value, decimals),
                tx_hash: format!("{:?}", tx_hash),
                block_number,
                log_index: log_index as u32,
            });
        }

        // Deposit accumulation is ordered by height, then (hash, index).
        transfers.sort_by(|a, b| {
            (a.block_number, &a.tx_hash, a.log_index)
                .cmp(&(b.block_number, &b.tx_hash, b.log_index))
        });

        Ok(transfers)
    }

    pub async fn latest_block(&self) -> CoordResult<u64> {
        let provider = self.read_provider()?;
        provider
            .get_block_number()
            .await
            .map_err(|e| classify_chain_error(&e.to_string()))
    }

    /// Read fee parameters from the vault.
    pub async fn fee_settings(&self, vault: &str) -> CoordResult<crate::chain::FeeSettings> {
        let vault_address = Self::parse_address(vault)?;
        let provider = self.read_provider()?;
        let contract = EscrowVault::new(vault_address, provider);

        let fee_bps = contract
            .feePercent()
            .call()
            .await
            .map_err(|e| classify_chain_error(&e.to_string()))?;
        let fee_wallet = contract
            .feeWallet1()
            .call()
            .await
            .map_err(|e| classify_chain_error(&e.to_string()))?;
        let accumulated = contract
            .accumulatedFees()
            .call()
            .await
            .map_err(|e| classify_chain_error(&e.to_string()))?;

        Ok(crate::chain::FeeSettings {
            fee_wallet: format!("{:?}", fee_wallet._0),
            fee_percent_bps: fee_bps._0.try_into().unwrap_or(u64::MAX),
            accumulated_base_units: accumulated._0,
        })
    }

    /// Whether a previously submitted transaction was mined successfully.
    pub async fn check_tx_success(&self, tx_hash: &str) -> CoordResult<Option<bool>> {
        let hash = B256::from_str(tx_hash)
            .map_err(|_| CoordError::Validation(format!("bad tx hash: {}", tx_hash)))?;
        let provider = self.read_provider()?;
        match provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| classify_chain_error(&e.to_string()))?
        {
            Some(receipt) => Ok(Some(receipt.status())),
            None => Ok(None),
        }
    }

    /// keccak256("Transfer(address,address,uint256)")
    fn transfer_signature() -> B256 {
        keccak256(b"Transfer(address,address,uint256)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_signature_matches_known_topic() {
        // Canonical ERC20 Transfer topic0.
        let sig = EvmDriver::transfer_signature();
        assert_eq!(
            format!("{:?}", sig),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn test_parse_address_rejects_garbage() {
        assert!(EvmDriver::parse_address("0x1234").is_err());
        assert!(EvmDriver::parse_address("not-an-address").is_err());
        assert!(
            EvmDriver::parse_address("0x000000000000000000000000000000000000dEaD").is_ok()
        );
    }
}
