//! Tron driver
//!
//! Talks to a Tron full node over its HTTP JSON API. Contract calls go
//! through `triggersmartcontract`; the returned transaction's txID (sha256
//! of raw_data) is signed with the TRC hot key and broadcast. Addresses are
//! stored base58 everywhere in the system; the hex `41…` form exists only
//! inside this module.

use alloy::primitives::{keccak256, B256, U256};
use alloy::signers::k256::elliptic_curve::sec1::ToEncodedPoint;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::chain::{TokenTransfer, TxReceipt};
use crate::error::{classify_chain_error, CoordError, CoordResult};
use crate::types::base_units_to_human;

/// USDT-TRON and every other TRC20 used here carry 6 decimals ("sun" scale).
pub const TRC20_DECIMALS: u8 = 6;

const FEE_LIMIT_SUN: u64 = 100_000_000;
const CONFIRM_POLL_INTERVAL: Duration = Duration::from_secs(3);
const CONFIRM_POLL_ATTEMPTS: u32 = 20;

// ============================================================================
// Address codec (base58check <-> hex 41…)
// ============================================================================

/// Decode a base58check Tron address into its 21-byte `41…` hex form.
pub fn base58_to_hex(address: &str) -> CoordResult<String> {
    let decoded = bs58::decode(address)
        .into_vec()
        .map_err(|_| CoordError::Validation(format!("bad Tron address: {}", address)))?;

    if decoded.len() != 25 {
        return Err(CoordError::Validation(format!(
            "bad Tron address length: {}",
            address
        )));
    }

    let (payload, checksum) = decoded.split_at(21);
    let expected = double_sha256(payload);
    if checksum != &expected[..4] {
        return Err(CoordError::Validation(format!(
            "bad Tron address checksum: {}",
            address
        )));
    }

    if payload[0] != 0x41 {
        return Err(CoordError::Validation(format!(
            "not a Tron mainnet address: {}",
            address
        )));
    }

    Ok(hex::encode(payload))
}

/// Encode a 21-byte `41…` hex address as base58check.
pub fn hex_to_base58(hex41: &str) -> CoordResult<String> {
    let raw = hex41.strip_prefix("0x").unwrap_or(hex41);
    let payload = hex::decode(raw)
        .map_err(|_| CoordError::Validation(format!("bad hex address: {}", hex41)))?;

    if payload.len() != 21 || payload[0] != 0x41 {
        return Err(CoordError::Validation(format!(
            "expected 21-byte 41-prefixed address, got: {}",
            hex41
        )));
    }

    let checksum = double_sha256(&payload);
    let mut full = payload;
    full.extend_from_slice(&checksum[..4]);
    Ok(bs58::encode(full).into_string())
}

/// Syntactic + checksum validation of a base58 Tron address.
pub fn is_valid_address(address: &str) -> bool {
    address.len() == 34 && address.starts_with('T') && base58_to_hex(address).is_ok()
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// The raw 20 address bytes behind a base58 Tron address.
fn address_body(address: &str) -> CoordResult<[u8; 20]> {
    let hex41 = base58_to_hex(address)?;
    let bytes = hex::decode(&hex41)
        .map_err(|_| CoordError::Internal(format!("codec produced bad hex for {}", address)))?;
    let mut body = [0u8; 20];
    body.copy_from_slice(&bytes[1..21]);
    Ok(body)
}

// ============================================================================
// ABI parameter encoding (no selector, 32-byte words)
// ============================================================================

fn encode_address_word(address: &str) -> CoordResult<[u8; 32]> {
    let body = address_body(address)?;
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&body);
    Ok(word)
}

fn encode_u256_word(value: U256) -> [u8; 32] {
    value.to_be_bytes::<32>()
}

// ============================================================================
// Node response shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct TriggerResponse {
    #[serde(default)]
    result: Option<TriggerResult>,
    #[serde(default)]
    transaction: Option<Value>,
    #[serde(default)]
    constant_result: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TriggerResult {
    #[serde(default)]
    result: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BroadcastResponse {
    #[serde(default)]
    result: Option<bool>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NowBlockResponse {
    block_header: BlockHeader,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    raw_data: BlockRawData,
}

#[derive(Debug, Deserialize)]
struct BlockRawData {
    #[serde(default)]
    number: u64,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    data: Vec<EventRecord>,
}

#[derive(Debug, Deserialize)]
struct EventRecord {
    #[serde(default)]
    block_number: u64,
    #[serde(default)]
    transaction_id: String,
    #[serde(default)]
    event_index: u32,
    #[serde(default)]
    result: Value,
}

// ============================================================================
// Driver
// ============================================================================

pub struct TronDriver {
    rpc_url: String,
    client: reqwest::Client,
    signer: PrivateKeySigner,
    /// Hot wallet in both encodings; derived once from the key.
    owner_base58: String,
    owner_hex: String,
    submit_lock: Mutex<()>,
}

impl TronDriver {
    pub fn new(rpc_url: &str, private_key: &str) -> eyre::Result<Self> {
        let normalized = if private_key.starts_with("0x") {
            private_key.to_string()
        } else {
            format!("0x{}", private_key)
        };
        let signer: PrivateKeySigner = normalized
            .parse()
            .map_err(|e| eyre::eyre!("Invalid TRC private key: {}", e))?;

        // Tron address = 0x41 || last 20 bytes of keccak256(uncompressed pubkey).
        let verifying_key = signer.credential().verifying_key();
        let encoded = verifying_key.to_encoded_point(false);
        let pubkey_hash = keccak256(&encoded.as_bytes()[1..]);
        let mut payload = vec![0x41u8];
        payload.extend_from_slice(&pubkey_hash[12..]);
        let owner_hex = hex::encode(&payload);
        let owner_base58 =
            hex_to_base58(&owner_hex).map_err(|e| eyre::eyre!("owner address: {}", e))?;

        info!(hot_wallet = %owner_base58, "Tron driver initialized");

        Ok(Self {
            rpc_url: rpc_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            signer,
            owner_base58,
            owner_hex,
            submit_lock: Mutex::new(()),
        })
    }

    pub fn owner_address(&self) -> &str {
        &self.owner_base58
    }

    async fn post(&self, path: &str, body: Value) -> CoordResult<Value> {
        let url = format!("{}{}", self.rpc_url, path);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| CoordError::TransientChain(format!("tron rpc {}: {}", path, e)))?;

        if !response.status().is_success() {
            return Err(CoordError::TransientChain(format!(
                "tron rpc {} returned {}",
                path,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| CoordError::TransientChain(format!("tron rpc {} decode: {}", path, e)))
    }

    /// Build, sign, and broadcast one contract call; wait until mined.
    async fn submit_call(
        &self,
        contract_base58: &str,
        selector: &str,
        parameter_hex: String,
    ) -> CoordResult<TxReceipt> {
        let _guard = self.submit_lock.lock().await;

        let contract_hex = base58_to_hex(contract_base58)?;
        let body = json!({
            "owner_address": self.owner_hex,
            "contract_address": contract_hex,
            "function_selector": selector,
            "parameter": parameter_hex,
            "fee_limit": FEE_LIMIT_SUN,
            "call_value": 0,
        });

        let raw: Value = self.post("/wallet/triggersmartcontract", body).await?;
        let trigger: TriggerResponse = serde_json::from_value(raw)
            .map_err(|e| CoordError::TransientChain(format!("trigger decode: {}", e)))?;

        match &trigger.result {
            Some(r) if r.result => {}
            Some(r) => {
                let detail = r
                    .message
                    .as_deref()
                    .map(decode_hex_message)
                    .unwrap_or_default();
                return Err(CoordError::OnchainRevert(format!(
                    "{} rejected: {}",
                    selector, detail
                )));
            }
            None => {
                return Err(CoordError::TransientChain(format!(
                    "{}: node returned no result",
                    selector
                )))
            }
        }

        let mut transaction = trigger
            .transaction
            .ok_or_else(|| CoordError::TransientChain("trigger returned no transaction".into()))?;

        let tx_id = transaction
            .get("txID")
            .and_then(Value::as_str)
            .ok_or_else(|| CoordError::TransientChain("transaction missing txID".into()))?
            .to_string();

        // txID is sha256(raw_data); signing it is signing the transaction.
        let tx_id_bytes = hex::decode(&tx_id)
            .map_err(|_| CoordError::Internal(format!("bad txID hex: {}", tx_id)))?;
        if tx_id_bytes.len() != 32 {
            return Err(CoordError::Internal(format!("bad txID length: {}", tx_id)));
        }
        let digest = B256::from_slice(&tx_id_bytes);
        let signature = self
            .signer
            .sign_hash(&digest)
            .await
            .map_err(|e| CoordError::Internal(format!("tron signing failed: {}", e)))?;

        let mut sig_bytes = signature.as_bytes();
        // Tron expects the recovery id as 0/1, not 27/28.
        if sig_bytes[64] >= 27 {
            sig_bytes[64] -= 27;
        }

        transaction
            .as_object_mut()
            .ok_or_else(|| CoordError::Internal("transaction is not an object".into()))?
            .insert("signature".to_string(), json!([hex::encode(sig_bytes)]));

        let raw: Value = self.post("/wallet/broadcasttransaction", transaction).await?;
        let broadcast: BroadcastResponse = serde_json::from_value(raw)
            .map_err(|e| CoordError::TransientChain(format!("broadcast decode: {}", e)))?;

        if broadcast.result != Some(true) {
            let detail = broadcast
                .message
                .as_deref()
                .map(decode_hex_message)
                .unwrap_or_default();
            let code = broadcast.code.unwrap_or_default();
            return Err(classify_chain_error(&format!(
                "broadcast failed ({}): {}",
                code, detail
            )));
        }

        self.wait_for_confirmation(&tx_id).await?;

        info!(tx_id = %tx_id, selector, "Tron call mined");
        Ok(TxReceipt {
            transaction_hash: tx_id,
        })
    }

    /// Poll until the transaction lands in a block or the window elapses.
    async fn wait_for_confirmation(&self, tx_id: &str) -> CoordResult<()> {
        for _ in 0..CONFIRM_POLL_ATTEMPTS {
            match self.check_tx_success(tx_id).await? {
                Some(true) => return Ok(()),
                Some(false) => {
                    return Err(CoordError::OnchainRevert(format!(
                        "tron transaction {} reverted",
                        tx_id
                    )))
                }
                None => tokio::time::sleep(CONFIRM_POLL_INTERVAL).await,
            }
        }
        Err(CoordError::TransientChain(format!(
            "tron transaction {} not confirmed in time",
            tx_id
        )))
    }

    pub async fn release(&self, vault: &str, to: &str, amount: U256) -> CoordResult<TxReceipt> {
        let mut parameter = Vec::with_capacity(64);
        parameter.extend_from_slice(&encode_address_word(to)?);
        parameter.extend_from_slice(&encode_u256_word(amount));
        self.submit_call(vault, "release(address,uint256)", hex::encode(parameter))
            .await
    }

    pub async fn refund(&self, vault: &str, to: &str, amount: U256) -> CoordResult<TxReceipt> {
        let mut parameter = Vec::with_capacity(64);
        parameter.extend_from_slice(&encode_address_word(to)?);
        parameter.extend_from_slice(&encode_u256_word(amount));
        self.submit_call(vault, "refund(address,uint256)", hex::encode(parameter))
            .await
    }

    pub async fn withdraw_token(
        &self,
        vault: &str,
        token_contract: &str,
        to: &str,
    ) -> CoordResult<TxReceipt> {
        let mut parameter = Vec::with_capacity(64);
        parameter.extend_from_slice(&encode_address_word(token_contract)?);
        parameter.extend_from_slice(&encode_address_word(to)?);
        self.submit_call(vault, "withdrawToken(address,address)", hex::encode(parameter))
            .await
    }

    /// Read-only contract call; returns the first 32-byte word.
    async fn constant_call(
        &self,
        contract_base58: &str,
        selector: &str,
        parameter_hex: String,
    ) -> CoordResult<[u8; 32]> {
        let contract_hex = base58_to_hex(contract_base58)?;
        let body = json!({
            "owner_address": self.owner_hex,
            "contract_address": contract_hex,
            "function_selector": selector,
            "parameter": parameter_hex,
        });

        let raw: Value = self.post("/wallet/triggerconstantcontract", body).await?;
        let trigger: TriggerResponse = serde_json::from_value(raw)
            .map_err(|e| CoordError::TransientChain(format!("constant decode: {}", e)))?;

        let word_hex = trigger
            .constant_result
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| {
                CoordError::TransientChain(format!("{}: empty constant_result", selector))
            })?;

        let bytes = hex::decode(&word_hex)
            .map_err(|_| CoordError::TransientChain(format!("{}: bad result hex", selector)))?;
        if bytes.len() < 32 {
            return Err(CoordError::TransientChain(format!(
                "{}: short result ({} bytes)",
                selector,
                bytes.len()
            )));
        }

        let mut word = [0u8; 32];
        word.copy_from_slice(&bytes[..32]);
        Ok(word)
    }

    pub async fn balance_of(&self, token_contract: &str, account: &str) -> CoordResult<U256> {
        let parameter = hex::encode(encode_address_word(account)?);
        let word = self
            .constant_call(token_contract, "balanceOf(address)", parameter)
            .await?;
        Ok(U256::from_be_bytes(word))
    }

    pub async fn latest_block(&self) -> CoordResult<u64> {
        let raw: Value = self.post("/wallet/getnowblock", json!({})).await?;
        let block: NowBlockResponse = serde_json::from_value(raw)
            .map_err(|e| CoordError::TransientChain(format!("getnowblock decode: {}", e)))?;
        Ok(block.block_header.raw_data.number)
    }

    /// TRC20 Transfer events into `to` since `from_block`, oldest first.
    ///
    /// Queried from the node's event API by token contract, then filtered by
    /// destination and block height here. The window is capped by the API's
    /// page size; the caller's dedupe ledger absorbs any overlap.
    pub async fn scan_transfers(
        &self,
        token_contract: &str,
        to: &str,
        from_block: u64,
        decimals: u8,
    ) -> CoordResult<Vec<TokenTransfer>> {
        let url = format!(
            "{}/v1/contracts/{}/events?event_name=Transfer&order_by=block_timestamp,desc&limit=200",
            self.rpc_url, token_contract
        );

        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| CoordError::TransientChain(format!("tron events: {}", e)))?;

        if !response.status().is_success() {
            return Err(CoordError::TransientChain(format!(
                "tron events returned {}",
                response.status()
            )));
        }

        let events: EventsResponse = response
            .json()
            .await
            .map_err(|e| CoordError::TransientChain(format!("tron events decode: {}", e)))?;

        let watched_body = hex::encode(address_body(to)?);
        let mut transfers = Vec::new();

        for event in events.data {
            if event.block_number < from_block {
                continue;
            }

            let result = &event.result;
            let to_raw = result
                .get("to")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_lowercase();
            if !to_raw.trim_start_matches("0x").ends_with(&watched_body) {
                continue;
            }

            let from_raw = result
                .get("from")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let value_raw = result
                .get("value")
                .and_then(Value::as_str)
                .unwrap_or("0");
            let value = U256::from_str_radix(value_raw, 10).unwrap_or(U256::ZERO);
            if value.is_zero() {
                continue;
            }

            let from_base58 = evm_style_to_base58(from_raw).unwrap_or_else(|_| from_raw.to_string());

            transfers.push(TokenTransfer {
                from: from_base58,
                to: to.to_string(),
                value_base_units: value,
                value_decimal: base_units_to_human(value, decimals),
                tx_hash: event.transaction_id.clone(),
                block_number: event.block_number,
                log_index: event.event_index,
            });
        }

        transfers.sort_by(|a, b| {
            (a.block_number, &a.tx_hash, a.log_index)
                .cmp(&(b.block_number, &b.tx_hash, b.log_index))
        });

        Ok(transfers)
    }

    pub async fn fee_settings(&self, vault: &str) -> CoordResult<crate::chain::FeeSettings> {
        let fee_bps = self
            .constant_call(vault, "feePercent()", String::new())
            .await?;
        let fee_wallet = self
            .constant_call(vault, "feeWallet1()", String::new())
            .await?;
        let accumulated = self
            .constant_call(vault, "accumulatedFees()", String::new())
            .await?;

        let mut wallet_payload = vec![0x41u8];
        wallet_payload.extend_from_slice(&fee_wallet[12..]);
        let fee_wallet_base58 = hex_to_base58(&hex::encode(wallet_payload))?;

        Ok(crate::chain::FeeSettings {
            fee_wallet: fee_wallet_base58,
            fee_percent_bps: U256::from_be_bytes(fee_bps).try_into().unwrap_or(u64::MAX),
            accumulated_base_units: U256::from_be_bytes(accumulated),
        })
    }

    /// Mined status of a transaction: None while unconfirmed.
    pub async fn check_tx_success(&self, tx_id: &str) -> CoordResult<Option<bool>> {
        let raw: Value = self
            .post("/wallet/gettransactioninfobyid", json!({ "value": tx_id }))
            .await?;

        let Some(object) = raw.as_object() else {
            return Ok(None);
        };
        if object.is_empty() || !object.contains_key("blockNumber") {
            return Ok(None);
        }

        let failed = object
            .get("receipt")
            .and_then(|r| r.get("result"))
            .and_then(Value::as_str)
            .map(|r| r != "SUCCESS")
            .unwrap_or(false)
            || object.get("result").and_then(Value::as_str) == Some("FAILED");

        if failed {
            warn!(tx_id, "Tron transaction failed on-chain");
        }
        Ok(Some(!failed))
    }
}

fn decode_hex_message(hex_message: &str) -> String {
    hex::decode(hex_message)
        .ok()
        .and_then(|b| String::from_utf8(b).ok())
        .unwrap_or_else(|| hex_message.to_string())
}

/// Convert an EVM-style 20-byte hex address (as the event API reports
/// senders) into base58.
fn evm_style_to_base58(evm_hex: &str) -> CoordResult<String> {
    let raw = evm_hex.trim_start_matches("0x");
    if raw.len() < 40 || !raw.is_ascii() {
        return Err(CoordError::Validation(format!("short address: {}", evm_hex)));
    }
    let body = &raw[raw.len() - 40..];
    hex_to_base58(&format!("41{}", body))
}

#[cfg(test)]
mod tests {
    use super::*;

    // USDT mainnet contract, the canonical fixture for this codec.
    const USDT_TRON: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";
    const USDT_TRON_HEX: &str = "41a614f803b6fd780986a42c78ec9c7f77e6ded13c";

    #[test]
    fn test_base58_to_hex_roundtrip() {
        let hex41 = base58_to_hex(USDT_TRON).unwrap();
        assert_eq!(hex41, USDT_TRON_HEX);
        assert_eq!(hex_to_base58(&hex41).unwrap(), USDT_TRON);
    }

    #[test]
    fn test_hex_to_base58_accepts_0x_prefix() {
        let with_prefix = format!("0x{}", USDT_TRON_HEX);
        assert_eq!(hex_to_base58(&with_prefix).unwrap(), USDT_TRON);
    }

    #[test]
    fn test_is_valid_address() {
        assert!(is_valid_address(USDT_TRON));
        assert!(!is_valid_address("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6u")); // bad checksum
        assert!(!is_valid_address("0x000000000000000000000000000000000000dEaD"));
        assert!(!is_valid_address("T"));
        assert!(!is_valid_address(""));
    }

    #[test]
    fn test_hex_rejects_wrong_prefix() {
        // 0x00-prefixed payload is not a Tron mainnet address.
        assert!(hex_to_base58("00a614f803b6fd780986a42c78ec9c7f77e6ded13c").is_err());
    }

    #[test]
    fn test_encode_address_word() {
        let word = encode_address_word(USDT_TRON).unwrap();
        assert_eq!(&word[..12], &[0u8; 12]);
        assert_eq!(hex::encode(&word[12..]), &USDT_TRON_HEX[2..]);
    }

    #[test]
    fn test_encode_u256_word() {
        let word = encode_u256_word(U256::from(1_000_000u64));
        assert_eq!(U256::from_be_bytes(word), U256::from(1_000_000u64));
    }

    #[test]
    fn test_evm_style_to_base58() {
        let evm = format!("0x{}", &USDT_TRON_HEX[2..]);
        assert_eq!(evm_style_to_base58(&evm).unwrap(), USDT_TRON);
    }

    #[test]
    fn test_decode_hex_message() {
        assert_eq!(decode_hex_message(&hex::encode("REVERT opcode")), "REVERT opcode");
        assert_eq!(decode_hex_message("zz-not-hex"), "zz-not-hex");
    }
}
