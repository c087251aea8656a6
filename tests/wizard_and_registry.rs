//! Wizard and vault-resolution scenarios
//!
//! Walks the details wizard the way participants do and checks that the
//! registry hands back the right vault for each tier and room shape.

use escrow_coordinator::assigner::normalize_chain;
use escrow_coordinator::error::CoordError;
use escrow_coordinator::escrow::wizard::{
    validate_address, validate_amount, validate_chain_coin, validate_payment_method,
    validate_rate, TradeBounds,
};
use escrow_coordinator::registry::{ContractRegistry, VaultContract};
use escrow_coordinator::types::{Chain, Token, TradeStep};

fn registry() -> ContractRegistry {
    ContractRegistry::from_contracts(vec![
        VaultContract {
            token: Token::new("USDT"),
            chain: Chain::Bsc,
            address: "0x00000000000000000000000000000000000000v1".to_string(),
            fee_percent: "0.25".to_string(),
            fee_bps: 25,
            group_id: None,
        },
        VaultContract {
            token: Token::new("USDC"),
            chain: Chain::Bsc,
            address: "0x00000000000000000000000000000000000000v2".to_string(),
            fee_percent: "0.25".to_string(),
            fee_bps: 25,
            group_id: None,
        },
        VaultContract {
            token: Token::new("USDT"),
            chain: Chain::Tron,
            address: "TVau1t00000000000000000000000000002".to_string(),
            fee_percent: "0.25".to_string(),
            fee_bps: 25,
            group_id: None,
        },
    ])
}

#[test]
fn happy_path_wizard_inputs_all_validate() {
    let bounds = TradeBounds::new("10", "10000").unwrap();

    // amount=100, rate=85, payment=UPI, chain=BSC, coin=USDT
    assert_eq!(validate_amount("100", &bounds).unwrap(), "100");
    assert_eq!(validate_rate("85").unwrap(), "85");
    assert_eq!(validate_payment_method("UPI").unwrap(), "UPI");

    let (chain, token) = validate_chain_coin("BSC USDT", &registry(), 25).unwrap();
    assert_eq!(chain, Chain::Bsc);
    assert_eq!(token, Token::new("USDT"));

    let buyer = validate_address(chain, "0xBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB").unwrap();
    let seller = validate_address(chain, "0x5555555555555555555555555555555555555555").unwrap();
    assert_ne!(buyer, seller);
}

#[test]
fn wizard_steps_cover_all_six_inputs_in_order() {
    let order = [
        TradeStep::Step1Amount,
        TradeStep::Step2Rate,
        TradeStep::Step3Payment,
        TradeStep::Step4ChainCoin,
        TradeStep::Step5BuyerAddress,
        TradeStep::Step6SellerAddress,
        TradeStep::Completed,
    ];
    let mut step = TradeStep::Step1Amount;
    for expected in order {
        assert_eq!(step, expected);
        step = step.next();
    }
}

#[test]
fn amount_bounds_are_inclusive_min_exclusive_nothing() {
    let bounds = TradeBounds::new("10", "10000").unwrap();
    // Exactly at the minimum is accepted; one unit below is rejected.
    assert!(validate_amount("10", &bounds).is_ok());
    assert!(validate_amount("9.99", &bounds).is_err());
    assert!(validate_amount("10000", &bounds).is_ok());
    assert!(validate_amount("10000.000001", &bounds).is_err());
}

#[test]
fn cross_chain_address_is_a_validation_error() {
    // Chain is BSC; a Tron address must bounce with VALIDATION and the
    // wizard cursor would stay on the address step.
    let err = validate_address(Chain::Bsc, "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t").unwrap_err();
    assert!(matches!(err, CoordError::Validation(_)));

    let err = validate_address(Chain::Tron, "0xBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB")
        .unwrap_err();
    assert!(matches!(err, CoordError::Validation(_)));
}

#[test]
fn chain_aliases_collapse_before_registry_lookup() {
    for alias in ["BNB", "BEP-20", "bep20", "bsc"] {
        assert_eq!(normalize_chain(alias).unwrap(), Chain::Bsc);
    }
    let (chain, _) = validate_chain_coin("BNB usdt", &registry(), 25).unwrap();
    assert_eq!(chain, Chain::Bsc);
}

#[test]
fn unknown_coin_or_tier_fails_step_four() {
    assert!(validate_chain_coin("BSC DOGE", &registry(), 25).is_err());
    assert!(validate_chain_coin("POLYGON USDT", &registry(), 25).is_err());
    assert!(validate_chain_coin("BSC USDT", &registry(), 75).is_err());
}

#[test]
fn tier_resolution_and_miss() {
    let registry = registry();
    let vault = registry
        .resolve_address(&Token::new("USDT"), Chain::Tron, 25, None)
        .unwrap();
    assert!(vault.starts_with('T'));

    let err = registry
        .resolve_address(&Token::new("USDT"), Chain::Tron, 50, None)
        .unwrap_err();
    assert!(err.to_string().contains("NO_VAULT_FOR_TIER"));
}

#[test]
fn assign_cancel_reassign_is_stable() {
    // Assigning a room, cancelling the trade, and reassigning resolves the
    // same vault again: resolution is a pure function of the tier tuple.
    let registry = registry();
    let first = registry
        .resolve_address(&Token::new("USDT"), Chain::Bsc, 25, None)
        .unwrap();
    let second = registry
        .resolve_address(&Token::new("USDT"), Chain::Bsc, 25, None)
        .unwrap();
    assert_eq!(first, second);
}
