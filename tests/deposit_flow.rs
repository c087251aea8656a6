//! Deposit accounting scenarios
//!
//! Drives the base-unit accounting through the full/partial/pay-remaining
//! flows exactly as the watcher would, without touching a chain: scanned
//! transfers in, credited totals and outcomes out.

use std::collections::HashSet;

use alloy::primitives::U256;
use escrow_coordinator::chain::{token_decimals, TokenTransfer};
use escrow_coordinator::escrow::deposit::{
    evaluate, fee_on, merge_explorer_transfers, new_transfers, remaining, total_of,
    DepositOutcome,
};
use escrow_coordinator::types::{base_units_to_human, human_to_base_units, Chain, Token};

fn transfer(tx_hash: &str, log_index: u32, human: &str, block: u64) -> TokenTransfer {
    let value = human_to_base_units(human, 18).unwrap();
    TokenTransfer {
        from: "0x5e11e700000000000000000000000000000000aa".to_string(),
        to: "0xva17000000000000000000000000000000000000".to_string(),
        value_base_units: value,
        value_decimal: human.to_string(),
        tx_hash: tx_hash.to_string(),
        block_number: block,
        log_index,
    }
}

/// A ledger the way the deposit_events table behaves: insert-once per
/// (tx_hash, log_index), sum on demand.
struct Ledger {
    seen: HashSet<(String, u32)>,
    total: U256,
}

impl Ledger {
    fn new() -> Self {
        Ledger {
            seen: HashSet::new(),
            total: U256::ZERO,
        }
    }

    fn credit(&mut self, scanned: &[TokenTransfer]) -> U256 {
        let fresh = new_transfers(scanned, &self.seen);
        let credited = total_of(&fresh).unwrap();
        for t in &fresh {
            self.seen.insert((t.tx_hash.clone(), t.log_index));
        }
        self.total += credited;
        credited
    }
}

#[test]
fn full_deposit_advances_without_partial_prompt() {
    // Seller sends exactly 100 USDT on BSC (base units 100 * 10^18).
    let decimals = token_decimals(&Token::new("USDT"), Chain::Bsc).unwrap();
    assert_eq!(decimals, 18);
    let expected = human_to_base_units("100", decimals).unwrap();

    let mut ledger = Ledger::new();
    let credited = ledger.credit(&[transfer("0xdep1", 0, "100", 1000)]);

    assert_eq!(credited, expected);
    assert_eq!(evaluate(ledger.total, expected), DepositOutcome::Full);
}

#[test]
fn partial_then_continue_releases_what_arrived() {
    let decimals = 18u8;
    let expected = human_to_base_units("100", decimals).unwrap();

    let mut ledger = Ledger::new();
    ledger.credit(&[transfer("0xdep1", 0, "60", 1000)]);
    assert_eq!(evaluate(ledger.total, expected), DepositOutcome::Partial);

    // Seller chooses Continue: the quantity snaps to the received amount
    // and the release override carries the exact base units.
    let snapped = base_units_to_human(ledger.total, decimals);
    assert_eq!(snapped, "60");
    let new_expected = human_to_base_units(&snapped, decimals).unwrap();
    assert_eq!(evaluate(ledger.total, new_expected), DepositOutcome::Full);
    assert_eq!(ledger.total, new_expected);
}

#[test]
fn partial_then_pay_remaining_reaches_full() {
    let decimals = 18u8;
    let expected = human_to_base_units("100", decimals).unwrap();

    let mut ledger = Ledger::new();
    ledger.credit(&[transfer("0xdep1", 0, "60", 1000)]);

    let owed = remaining(ledger.total, expected);
    assert_eq!(base_units_to_human(owed, decimals), "40");

    // Seller sends the remainder; the earlier hash is still in the ledger.
    let credited = ledger.credit(&[
        transfer("0xdep1", 0, "60", 1000),
        transfer("0xdep2", 0, "40", 1010),
    ]);
    assert_eq!(base_units_to_human(credited, decimals), "40");
    assert_eq!(evaluate(ledger.total, expected), DepositOutcome::Full);
}

#[test]
fn rescanning_the_same_range_never_double_counts() {
    let expected = human_to_base_units("100", 18).unwrap();
    let scanned = vec![
        transfer("0xdep1", 0, "60", 1000),
        transfer("0xdep2", 3, "40", 1005),
    ];

    let mut ledger = Ledger::new();
    ledger.credit(&scanned);
    let total_after_first = ledger.total;

    // Replay the identical block range twice more.
    assert_eq!(ledger.credit(&scanned), U256::ZERO);
    assert_eq!(ledger.credit(&scanned), U256::ZERO);

    assert_eq!(ledger.total, total_after_first);
    assert_eq!(evaluate(ledger.total, expected), DepositOutcome::Full);
}

#[test]
fn deposit_one_epsilon_short_stays_partial() {
    let decimals = 18u8;
    let expected = human_to_base_units("100", decimals).unwrap();
    let almost = expected - U256::from(1u64);

    assert_eq!(evaluate(almost, expected), DepositOutcome::Partial);
    assert_eq!(remaining(almost, expected), U256::from(1u64));
}

#[test]
fn accumulation_is_monotonic_across_scans() {
    let mut ledger = Ledger::new();
    let mut previous = U256::ZERO;
    let batches = [
        vec![transfer("0xa", 0, "10", 1)],
        vec![transfer("0xa", 0, "10", 1)], // replay
        vec![transfer("0xb", 0, "5", 2), transfer("0xc", 1, "5", 2)],
        vec![],
    ];
    for batch in &batches {
        ledger.credit(batch);
        assert!(ledger.total >= previous);
        previous = ledger.total;
    }
    assert_eq!(base_units_to_human(ledger.total, 18), "20");
}

#[test]
fn explorer_fallback_never_double_credits() {
    // The fallback window elapses, the explorer reports the deposit with
    // no log index, and the RPC node catches up on the same tick with the
    // real index. The transfer must be credited exactly once, and a later
    // replay of either source must credit nothing.
    let decimals = 18u8;
    let expected = human_to_base_units("100", decimals).unwrap();

    let mut ledger = Ledger::new();

    let rpc_view = transfer("0xdep1", 47, "100", 1000);
    let explorer_view = TokenTransfer {
        log_index: 0,
        ..rpc_view.clone()
    };

    let mut batch = vec![rpc_view.clone()];
    merge_explorer_transfers(&mut batch, vec![explorer_view.clone()], &HashSet::new(), 2000);
    assert_eq!(batch.len(), 1);
    ledger.credit(&batch);
    assert_eq!(evaluate(ledger.total, expected), DepositOutcome::Full);

    // Next tick: the explorer repeats itself against a credited ledger.
    let credited: HashSet<String> = ledger.seen.iter().map(|(hash, _)| hash.clone()).collect();
    let mut batch = Vec::new();
    merge_explorer_transfers(&mut batch, vec![explorer_view], &credited, 2000);
    assert!(batch.is_empty());

    // And an RPC replay of the same range is absorbed by the event key.
    assert_eq!(ledger.credit(&[rpc_view]), U256::ZERO);
    assert_eq!(ledger.total, expected);
}

#[test]
fn fee_applies_to_released_amount_on_partial_trades() {
    // 0.25% tier, 60 of 100 deposited, seller continues: the fee basis is
    // the released 60, not the quoted 100.
    let released = human_to_base_units("60", 18).unwrap();
    let fee = fee_on(released, 25);
    assert_eq!(base_units_to_human(fee, 18), "0.15");
}

#[test]
fn tron_scale_accounting_uses_six_decimals() {
    let decimals = token_decimals(&Token::new("USDT"), Chain::Tron).unwrap();
    assert_eq!(decimals, 6);

    let expected = human_to_base_units("100", decimals).unwrap();
    assert_eq!(expected, U256::from(100_000_000u64));
    assert_eq!(base_units_to_human(expected, decimals), "100");
}
