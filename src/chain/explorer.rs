//! Explorer-API fallback for transfer scans
//!
//! When the RPC log scan keeps coming back empty past the configured window,
//! the watcher also asks the chain's public explorer for token transfers
//! into the vault. The explorer cannot supply block-wide log indexes, so
//! its results must never enter the ledger next to an RPC observation of
//! the same transfer: callers dedupe explorer entries by bare transaction
//! hash before crediting anything.

use alloy::primitives::U256;
use serde::Deserialize;
use std::time::Duration;

use crate::chain::TokenTransfer;
use crate::error::{CoordError, CoordResult};
use crate::types::{base_units_to_human, Chain};

#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    status: String,
    #[serde(default)]
    result: Vec<ExplorerTransfer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExplorerTransfer {
    hash: String,
    from: String,
    to: String,
    value: String,
    block_number: String,
}

pub struct ExplorerClient {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl ExplorerClient {
    pub fn new(api_key: Option<String>) -> Self {
        ExplorerClient {
            client: reqwest::Client::new(),
            api_key,
        }
    }

    fn base_url(chain: Chain) -> CoordResult<&'static str> {
        match chain {
            Chain::Bsc => Ok("https://api.bscscan.com/api"),
            Chain::Eth => Ok("https://api.etherscan.io/api"),
            Chain::Polygon => Ok("https://api.polygonscan.com/api"),
            Chain::Tron => Err(CoordError::Internal(
                "tron scans fall back through its own event API".to_string(),
            )),
        }
    }

    /// Token transfers into `to` since `from_block`, oldest first.
    ///
    /// The explorer token-transfer listing does not expose log indexes, so
    /// every entry carries index 0 and the usual `(tx_hash, log_index)` key
    /// cannot distinguish it from the RPC view of the same transfer. The
    /// caller must dedupe these entries by transaction hash against both
    /// the RPC batch and the credited ledger before counting them.
    pub async fn token_transfers(
        &self,
        chain: Chain,
        token_contract: &str,
        to: &str,
        from_block: u64,
        decimals: u8,
    ) -> CoordResult<Vec<TokenTransfer>> {
        let base = Self::base_url(chain)?;
        let mut url = format!(
            "{}?module=account&action=tokentx&contractaddress={}&address={}&startblock={}&sort=asc",
            base, token_contract, to, from_block
        );
        if let Some(key) = &self.api_key {
            url.push_str(&format!("&apikey={}", key));
        }

        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| CoordError::TransientChain(format!("explorer request: {}", e)))?;

        if !response.status().is_success() {
            return Err(CoordError::TransientChain(format!(
                "explorer returned {}",
                response.status()
            )));
        }

        let parsed: ExplorerResponse = response
            .json()
            .await
            .map_err(|e| CoordError::TransientChain(format!("explorer decode: {}", e)))?;

        // status "0" with an empty result is the explorer's way of saying
        // "no transfers"; anything else with status "0" is an API error.
        if parsed.status != "1" && !parsed.result.is_empty() {
            return Err(CoordError::TransientChain(
                "explorer rejected the query".to_string(),
            ));
        }

        let watched = to.to_lowercase();
        let mut transfers = Vec::new();
        for entry in parsed.result {
            if entry.to.to_lowercase() != watched {
                continue;
            }
            let value = U256::from_str_radix(&entry.value, 10).unwrap_or(U256::ZERO);
            if value.is_zero() {
                continue;
            }
            let block_number: u64 = entry.block_number.parse().unwrap_or(0);
            if block_number < from_block {
                continue;
            }
            transfers.push(TokenTransfer {
                from: entry.from,
                to: entry.to,
                value_base_units: value,
                value_decimal: base_units_to_human(value, decimals),
                tx_hash: entry.hash,
                block_number,
                log_index: 0,
            });
        }

        Ok(transfers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_per_chain() {
        assert!(ExplorerClient::base_url(Chain::Bsc).unwrap().contains("bscscan"));
        assert!(ExplorerClient::base_url(Chain::Eth).unwrap().contains("etherscan"));
        assert!(ExplorerClient::base_url(Chain::Polygon)
            .unwrap()
            .contains("polygonscan"));
        assert!(ExplorerClient::base_url(Chain::Tron).is_err());
    }

    #[test]
    fn test_response_shape_parses() {
        let payload = r#"{
            "status": "1",
            "message": "OK",
            "result": [{
                "hash": "0xabc",
                "from": "0x1111111111111111111111111111111111111111",
                "to": "0x2222222222222222222222222222222222222222",
                "value": "100000000000000000000",
                "blockNumber": "1234"
            }]
        }"#;
        let parsed: ExplorerResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed.status, "1");
        assert_eq!(parsed.result.len(), 1);
        assert_eq!(parsed.result[0].block_number, "1234");
    }
}
