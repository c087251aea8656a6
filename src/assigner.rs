//! Vault address assignment
//!
//! Picks the vault contract address that will receive an escrow's deposit.
//! Chain aliases from user input collapse to canonical names first, then
//! the registry resolves `(token, chain, fee tier, room)`. The returned
//! address IS the vault contract; deposits land on it directly and there is
//! no per-user derivation.

use crate::db::{EscrowRow, RoomRow};
use crate::error::{CoordError, CoordResult};
use crate::registry::{fee_percent_to_bps, ContractRegistry};
use crate::types::{Chain, Token};

/// Collapse user-facing chain aliases to the canonical chain.
pub fn normalize_chain(raw: &str) -> CoordResult<Chain> {
    let upper = raw.trim().to_uppercase();
    let canonical = match upper.as_str() {
        "BNB" | "BEP-20" | "BEP20" | "BSC" => "BSC",
        "ETHEREUM" | "ERC-20" | "ERC20" | "ETH" => "ETH",
        "MATIC" | "POLYGON" => "POLYGON",
        "TRC-20" | "TRC20" | "TRON" => "TRON",
        other => other,
    };
    canonical.parse()
}

/// Resolve the deposit address for an escrow whose terms are complete.
pub fn assign_deposit_address(
    registry: &ContractRegistry,
    escrow: &EscrowRow,
    room: Option<&RoomRow>,
) -> CoordResult<String> {
    let token = escrow
        .token
        .as_deref()
        .map(Token::new)
        .ok_or_else(|| CoordError::Internal("escrow has no token set".to_string()))?;
    let chain = escrow
        .chain
        .as_deref()
        .ok_or_else(|| CoordError::Internal("escrow has no chain set".to_string()))
        .and_then(normalize_chain)?;
    let fee_percent = escrow
        .fee_percent
        .as_deref()
        .ok_or_else(|| CoordError::Internal("escrow has no fee tier set".to_string()))?;
    let fee_bps = fee_percent_to_bps(fee_percent)?;

    registry.resolve_address(&token, chain, fee_bps, room)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_chain_aliases() {
        assert_eq!(normalize_chain("BNB").unwrap(), Chain::Bsc);
        assert_eq!(normalize_chain("BEP-20").unwrap(), Chain::Bsc);
        assert_eq!(normalize_chain("bep20").unwrap(), Chain::Bsc);
        assert_eq!(normalize_chain("ETHEREUM").unwrap(), Chain::Eth);
        assert_eq!(normalize_chain("MATIC").unwrap(), Chain::Polygon);
        assert_eq!(normalize_chain("trc20").unwrap(), Chain::Tron);
    }

    #[test]
    fn test_normalize_chain_passthrough() {
        assert_eq!(normalize_chain("BSC").unwrap(), Chain::Bsc);
        assert_eq!(normalize_chain(" tron ").unwrap(), Chain::Tron);
    }

    #[test]
    fn test_normalize_chain_unknown() {
        assert!(normalize_chain("SOLANA").is_err());
        assert!(normalize_chain("").is_err());
    }
}
