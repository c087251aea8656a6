//! Deposit accounting
//!
//! Pure arithmetic behind the watcher: which scanned transfers are new,
//! how much has accumulated, and where that lands relative to the agreed
//! quantity. Everything is base units; the dedupe key is (tx hash, log
//! index) so replaying a block range never double-counts.

use alloy::primitives::U256;
use std::collections::HashSet;

use crate::chain::TokenTransfer;
use crate::error::{CoordError, CoordResult};

/// Where the accumulated total stands against the agreed quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositOutcome {
    /// Nothing credited yet.
    None,
    /// Some funds arrived but less than agreed; the seller must choose to
    /// continue with the partial amount or pay the remainder.
    Partial,
    /// The agreed quantity (or more) is in the vault.
    Full,
}

pub fn evaluate(accumulated: U256, expected: U256) -> DepositOutcome {
    if accumulated.is_zero() {
        DepositOutcome::None
    } else if accumulated < expected {
        DepositOutcome::Partial
    } else {
        DepositOutcome::Full
    }
}

/// Filter scanned transfers down to the ones not yet credited.
///
/// `seen` holds the `(tx_hash, log_index)` keys already in the ledger; the
/// same scan replayed twice therefore contributes nothing the second time.
pub fn new_transfers<'a>(
    transfers: &'a [TokenTransfer],
    seen: &HashSet<(String, u32)>,
) -> Vec<&'a TokenTransfer> {
    let mut fresh = Vec::new();
    let mut claimed = HashSet::new();
    for transfer in transfers {
        let key = (transfer.tx_hash.clone(), transfer.log_index);
        if seen.contains(&key) || !claimed.insert(key) {
            continue;
        }
        fresh.push(transfer);
    }
    fresh
}

/// Fold explorer-sourced transfers into an RPC scan batch.
///
/// The explorer token-transfer listing exposes no block-wide log index, so
/// its entries cannot participate in the `(tx_hash, log_index)` key: the
/// same on-chain Transfer would land as `(hash, 0)` from the explorer and
/// `(hash, 47)` from RPC and be credited twice. Explorer entries are
/// therefore deduped by transaction hash alone, against both the current
/// RPC batch and everything already in the ledger, and are dropped beyond
/// `max_block` so the blocks they cover are never rescanned by RPC after
/// the cursor advances.
pub fn merge_explorer_transfers(
    transfers: &mut Vec<TokenTransfer>,
    extras: Vec<TokenTransfer>,
    credited_hashes: &HashSet<String>,
    max_block: u64,
) {
    let mut known: HashSet<String> = transfers.iter().map(|t| t.tx_hash.clone()).collect();
    known.extend(credited_hashes.iter().cloned());

    for extra in extras {
        if extra.block_number > max_block {
            continue;
        }
        if known.insert(extra.tx_hash.clone()) {
            transfers.push(extra);
        }
    }
}

/// Sum transfer values, guarding against overflow of the 256-bit ledger.
pub fn total_of(transfers: &[&TokenTransfer]) -> CoordResult<U256> {
    let mut total = U256::ZERO;
    for transfer in transfers {
        total = total
            .checked_add(transfer.value_base_units)
            .ok_or_else(|| CoordError::Internal("deposit total overflow".to_string()))?;
    }
    Ok(total)
}

/// Remaining base units the seller still owes under the pay-remaining choice.
pub fn remaining(accumulated: U256, expected: U256) -> U256 {
    expected.saturating_sub(accumulated)
}

/// Escrow fee on the amount actually released, in base units.
///
/// Matches the vault's on-chain arithmetic: amount * bps / 10000, floor.
pub fn fee_on(amount: U256, fee_bps: u32) -> U256 {
    amount * U256::from(fee_bps) / U256::from(10_000u64)
}
