//! Vault contract registry
//!
//! Read-mostly catalogue of deployed vault contracts, loaded once at
//! startup. Rows are written by operator deployment tooling; the runtime
//! never creates addresses. Resolution for an escrow walks three steps:
//! room-pinned contract row, then the room's own pinned-contracts map
//! (legacy key shapes normalized at read), then any deployed contract on
//! the (token, chain, fee) tier.

#![allow(dead_code)]

use bigdecimal::num_bigint::BigInt;
use bigdecimal::BigDecimal;
use serde_json::Value;
use sqlx::PgPool;
use std::str::FromStr;
use tracing::{info, warn};

use crate::db::{self, RoomRow};
use crate::error::{CoordError, CoordResult};
use crate::types::{Chain, Token};

pub const VAULT_CONTRACT_NAME: &str = "EscrowVault";

/// One deployed vault.
#[derive(Debug, Clone)]
pub struct VaultContract {
    pub token: Token,
    pub chain: Chain,
    pub address: String,
    pub fee_percent: String,
    pub fee_bps: u32,
    /// 1:1 pinning to a specific room, when set.
    pub group_id: Option<i64>,
}

/// Convert a decimal fee percent ("0.25") into basis points (25), exactly.
pub fn fee_percent_to_bps(fee_percent: &str) -> CoordResult<u32> {
    let decimal = BigDecimal::from_str(fee_percent.trim())
        .map_err(|_| CoordError::Validation(format!("bad fee percent: {}", fee_percent)))?;
    let scaled = (decimal * BigDecimal::from(100)).normalized();
    let (mantissa, exponent) = scaled.as_bigint_and_exponent();
    // value = mantissa * 10^(-exponent); whole bps require exponent <= 0.
    if exponent > 0 {
        return Err(CoordError::Validation(format!(
            "fee percent {} does not map to whole basis points",
            fee_percent
        )));
    }
    let bps = mantissa * BigInt::from(10u32).pow((-exponent) as u32);
    bps.to_string()
        .parse::<u32>()
        .map_err(|_| CoordError::Validation(format!("fee percent out of range: {}", fee_percent)))
}

/// One normalized entry from a room's pinned-contracts map.
#[derive(Debug, Clone, PartialEq)]
pub struct PinnedEntry {
    pub token: Token,
    /// Bare legacy keys (`"USDT"`) carry no chain.
    pub chain: Option<Chain>,
    pub address: String,
}

/// Reduce a room's pinned-contracts JSON to normalized entries.
///
/// Accepted key shapes, oldest first: `"USDT"` (bare token),
/// `"USDT_TRON"` (token + chain), and the nested legacy value
/// `{"address": "0x…"}` in place of a plain string.
pub fn normalize_pinned_map(raw: &str) -> Vec<PinnedEntry> {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) else {
        return Vec::new();
    };

    let mut entries = Vec::new();
    for (key, value) in map {
        let address = match &value {
            Value::String(s) => s.clone(),
            Value::Object(nested) => match nested.get("address").and_then(Value::as_str) {
                Some(s) => s.to_string(),
                None => continue,
            },
            _ => continue,
        };
        if address.is_empty() {
            continue;
        }

        let (token_part, chain_part) = match key.split_once('_') {
            Some((token, chain)) => (token, Some(chain)),
            None => (key.as_str(), None),
        };

        let chain = match chain_part {
            Some(raw_chain) => match raw_chain.parse::<Chain>() {
                Ok(chain) => Some(chain),
                Err(_) => continue,
            },
            None => None,
        };

        entries.push(PinnedEntry {
            token: Token::new(token_part),
            chain,
            address,
        });
    }

    entries.sort_by(|a, b| {
        (a.token.as_str(), a.chain.map(|c| c.as_str()))
            .cmp(&(b.token.as_str(), b.chain.map(|c| c.as_str())))
    });
    entries
}

pub struct ContractRegistry {
    contracts: Vec<VaultContract>,
}

impl ContractRegistry {
    /// Load the deployed catalogue. A row whose decimal and basis-point fee
    /// forms disagree refuses the whole load: the registry is the one place
    /// the two representations are forced to match.
    pub async fn load(pool: &PgPool) -> eyre::Result<Self> {
        let rows = db::load_deployed_contracts(pool).await?;
        let mut contracts = Vec::with_capacity(rows.len());

        for row in rows {
            if row.name != VAULT_CONTRACT_NAME {
                continue;
            }

            let token = Token::new(&row.token);
            let chain = match row.chain.parse::<Chain>() {
                Ok(chain) => chain,
                Err(_) => {
                    warn!(contract = %row.address, chain = %row.chain, "Skipping contract on unknown chain");
                    continue;
                }
            };

            let implied_bps = fee_percent_to_bps(&row.fee_percent)
                .map_err(|e| eyre::eyre!("contract {}: {}", row.address, e))?;
            if implied_bps != row.fee_bps as u32 {
                return Err(eyre::eyre!(
                    "contract {} stores fee_percent {} but fee_bps {}",
                    row.address,
                    row.fee_percent,
                    row.fee_bps
                ));
            }

            contracts.push(VaultContract {
                token,
                chain,
                address: row.address,
                fee_percent: row.fee_percent,
                fee_bps: row.fee_bps as u32,
                group_id: row.group_id,
            });
        }

        info!(count = contracts.len(), "Contract registry loaded");
        Ok(ContractRegistry { contracts })
    }

    pub fn from_contracts(contracts: Vec<VaultContract>) -> Self {
        ContractRegistry { contracts }
    }

    /// Resolve the vault address that will receive an escrow's deposit.
    pub fn resolve_address(
        &self,
        token: &Token,
        chain: Chain,
        fee_bps: u32,
        room: Option<&RoomRow>,
    ) -> CoordResult<String> {
        // 1. Contract row pinned to this exact room.
        if let Some(room) = room {
            if let Some(pinned) = self.contracts.iter().find(|c| {
                c.group_id == Some(room.group_id) && c.token == *token && c.chain == chain
            }) {
                return Ok(pinned.address.clone());
            }

            // 2. The room's own pinned-contracts map.
            if let Some(raw) = &room.pinned_contracts {
                let entries = normalize_pinned_map(raw);
                // Chain-qualified key wins over the bare legacy key.
                if let Some(entry) = entries
                    .iter()
                    .find(|e| e.token == *token && e.chain == Some(chain))
                    .or_else(|| entries.iter().find(|e| e.token == *token && e.chain.is_none()))
                {
                    return Ok(entry.address.clone());
                }
            }
        }

        // 3. Any deployed contract on the tier.
        if let Some(tier) = self
            .contracts
            .iter()
            .find(|c| c.group_id.is_none() && c.token == *token && c.chain == chain && c.fee_bps == fee_bps)
        {
            return Ok(tier.address.clone());
        }

        Err(CoordError::NotFound(format!(
            "NO_VAULT_FOR_TIER: {} on {} at {} bps",
            token, chain, fee_bps
        )))
    }

    /// Chains with at least one deployed vault at this tier.
    pub fn supported_chains(&self, fee_bps: u32) -> Vec<Chain> {
        let mut chains: Vec<Chain> = self
            .contracts
            .iter()
            .filter(|c| c.fee_bps == fee_bps)
            .map(|c| c.chain)
            .collect();
        chains.sort_by_key(|c| c.as_str());
        chains.dedup();
        chains
    }

    /// Tokens with a deployed vault on this chain + tier.
    pub fn supported_tokens(&self, chain: Chain, fee_bps: u32) -> Vec<Token> {
        let mut tokens: Vec<Token> = self
            .contracts
            .iter()
            .filter(|c| c.chain == chain && c.fee_bps == fee_bps)
            .map(|c| c.token.clone())
            .collect();
        tokens.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        tokens.dedup();
        tokens
    }

    /// Look a vault up by its on-chain address (/verify).
    pub fn find_by_address(&self, address: &str) -> Option<&VaultContract> {
        self.contracts
            .iter()
            .find(|c| c.address.eq_ignore_ascii_case(address))
    }

    /// Rooms whose pinned contract matches the tier; preferred during
    /// room assignment.
    pub fn rooms_pinned_for_tier(&self, fee_bps: u32) -> Vec<i64> {
        let mut group_ids: Vec<i64> = self
            .contracts
            .iter()
            .filter(|c| c.fee_bps == fee_bps)
            .filter_map(|c| c.group_id)
            .collect();
        group_ids.sort_unstable();
        group_ids.dedup();
        group_ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::types::RoomStatus;

    fn contract(token: &str, chain: Chain, fee_bps: u32, group_id: Option<i64>) -> VaultContract {
        VaultContract {
            token: Token::new(token),
            chain,
            address: format!(
                "0xvault{}{}{}g{}",
                token,
                chain,
                fee_bps,
                group_id.unwrap_or(0)
            ),
            fee_percent: format!("{}", fee_bps as f64 / 100.0),
            fee_bps,
            group_id,
        }
    }

    fn room(group_id: i64, pinned: Option<&str>) -> RoomRow {
        RoomRow {
            group_id,
            status: RoomStatus::Assigned,
            assigned_escrow_id: Some("P2PMMX10000001".to_string()),
            assigned_at: Some(Utc::now()),
            completed_at: None,
            invite_link: None,
            pinned_contracts: pinned.map(|s| s.to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_fee_percent_to_bps() {
        assert_eq!(fee_percent_to_bps("0.25").unwrap(), 25);
        assert_eq!(fee_percent_to_bps("0.5").unwrap(), 50);
        assert_eq!(fee_percent_to_bps("0.75").unwrap(), 75);
        assert_eq!(fee_percent_to_bps("1").unwrap(), 100);
    }

    #[test]
    fn test_fee_percent_to_bps_rejects_sub_bps() {
        assert!(fee_percent_to_bps("0.255").is_err());
        assert!(fee_percent_to_bps("abc").is_err());
    }

    #[test]
    fn test_normalize_pinned_map_modern_keys() {
        let entries = normalize_pinned_map(r#"{"USDT_TRON": "Taddr", "USDC_BSC": "0xaddr"}"#);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].token, Token::new("USDC"));
        assert_eq!(entries[0].chain, Some(Chain::Bsc));
        assert_eq!(entries[1].token, Token::new("USDT"));
        assert_eq!(entries[1].chain, Some(Chain::Tron));
    }

    #[test]
    fn test_normalize_pinned_map_legacy_shapes() {
        // Bare token key and nested address object both still read.
        let entries =
            normalize_pinned_map(r#"{"USDT": {"address": "0xlegacy"}, "USDC": "0xbare"}"#);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.chain.is_none()));
        assert!(entries.iter().any(|e| e.address == "0xlegacy"));
    }

    #[test]
    fn test_normalize_pinned_map_garbage() {
        assert!(normalize_pinned_map("not json").is_empty());
        assert!(normalize_pinned_map(r#"{"USDT_MOON": "0x1"}"#).is_empty());
        assert!(normalize_pinned_map(r#"{"USDT": 42}"#).is_empty());
    }

    #[test]
    fn test_resolution_prefers_room_pinned_row() {
        let registry = ContractRegistry::from_contracts(vec![
            contract("USDT", Chain::Bsc, 25, Some(777)),
            contract("USDT", Chain::Bsc, 25, None),
        ]);
        let room = room(777, None);
        let address = registry
            .resolve_address(&Token::new("USDT"), Chain::Bsc, 25, Some(&room))
            .unwrap();
        assert!(registry.contracts[0].address == address);
    }

    #[test]
    fn test_resolution_falls_through_to_room_map() {
        let registry =
            ContractRegistry::from_contracts(vec![contract("USDT", Chain::Bsc, 25, None)]);
        let room = room(777, Some(r#"{"USDT_BSC": "0xfrommap"}"#));
        let address = registry
            .resolve_address(&Token::new("USDT"), Chain::Bsc, 25, Some(&room))
            .unwrap();
        assert_eq!(address, "0xfrommap");
    }

    #[test]
    fn test_resolution_chain_qualified_beats_bare_key() {
        let registry = ContractRegistry::from_contracts(vec![]);
        let room = room(
            777,
            Some(r#"{"USDT": "0xbare", "USDT_BSC": "0xqualified"}"#),
        );
        let address = registry
            .resolve_address(&Token::new("USDT"), Chain::Bsc, 25, Some(&room))
            .unwrap();
        assert_eq!(address, "0xqualified");
    }

    #[test]
    fn test_resolution_tier_fallback() {
        let registry =
            ContractRegistry::from_contracts(vec![contract("USDT", Chain::Tron, 50, None)]);
        let address = registry
            .resolve_address(&Token::new("USDT"), Chain::Tron, 50, None)
            .unwrap();
        assert!(address.contains("vault"));
    }

    #[test]
    fn test_resolution_miss_is_no_vault_for_tier() {
        let registry =
            ContractRegistry::from_contracts(vec![contract("USDT", Chain::Bsc, 25, None)]);
        let err = registry
            .resolve_address(&Token::new("USDT"), Chain::Bsc, 50, None)
            .unwrap_err();
        assert!(matches!(err, CoordError::NotFound(_)));
        assert!(err.to_string().contains("NO_VAULT_FOR_TIER"));
    }

    #[test]
    fn test_supported_tokens_and_chains() {
        let registry = ContractRegistry::from_contracts(vec![
            contract("USDT", Chain::Bsc, 25, None),
            contract("USDC", Chain::Bsc, 25, None),
            contract("USDT", Chain::Tron, 25, None),
            contract("USDT", Chain::Eth, 50, None),
        ]);
        assert_eq!(
            registry.supported_chains(25),
            vec![Chain::Bsc, Chain::Tron]
        );
        assert_eq!(
            registry.supported_tokens(Chain::Bsc, 25),
            vec![Token::new("USDC"), Token::new("USDT")]
        );
        assert!(registry.supported_tokens(Chain::Polygon, 25).is_empty());
    }

    #[test]
    fn test_rooms_pinned_for_tier() {
        let registry = ContractRegistry::from_contracts(vec![
            contract("USDT", Chain::Bsc, 25, Some(1)),
            contract("USDC", Chain::Bsc, 25, Some(1)),
            contract("USDT", Chain::Bsc, 50, Some(2)),
        ]);
        assert_eq!(registry.rooms_pinned_for_tier(25), vec![1]);
        assert_eq!(registry.rooms_pinned_for_tier(50), vec![2]);
        assert!(registry.rooms_pinned_for_tier(75).is_empty());
    }
}
