//! Trade-details wizard guards
//!
//! Each step has a fixed prompt and exactly one acceptance rule. Inputs
//! that fail the rule leave the cursor where it is.

use bigdecimal::BigDecimal;
use std::str::FromStr;

use crate::assigner::normalize_chain;
use crate::chain::{token_decimals, tron};
use crate::error::{CoordError, CoordResult};
use crate::registry::ContractRegistry;
use crate::types::{Chain, ChainFamily, Token, TradeStep};

/// Trade amount bounds, parsed once from configuration.
#[derive(Debug, Clone)]
pub struct TradeBounds {
    pub min: BigDecimal,
    pub max: BigDecimal,
}

impl TradeBounds {
    pub fn new(min: &str, max: &str) -> CoordResult<Self> {
        let min = BigDecimal::from_str(min)
            .map_err(|_| CoordError::Internal(format!("bad min trade amount: {}", min)))?;
        let max = BigDecimal::from_str(max)
            .map_err(|_| CoordError::Internal(format!("bad max trade amount: {}", max)))?;
        Ok(TradeBounds { min, max })
    }
}

/// Fixed prompt text per wizard step.
pub fn prompt_for(step: TradeStep) -> &'static str {
    match step {
        TradeStep::Step1Amount => "Step 1/6 — How much crypto is being traded? Enter the amount:",
        TradeStep::Step2Rate => "Step 2/6 — What is the agreed rate per unit? Enter the rate:",
        TradeStep::Step3Payment => {
            "Step 3/6 — How will the fiat be paid? Enter the payment method:"
        }
        TradeStep::Step4ChainCoin => {
            "Step 4/6 — Which network and coin? Reply like `BSC USDT` or `TRON USDT`:"
        }
        TradeStep::Step5BuyerAddress => {
            "Step 5/6 — Buyer, enter the wallet address that will receive the crypto:"
        }
        TradeStep::Step6SellerAddress => {
            "Step 6/6 — Seller, enter your wallet address (used for refunds):"
        }
        TradeStep::Completed => "All trade details are in. Review the summary below.",
    }
}

/// step1: positive number within the configured bounds.
pub fn validate_amount(input: &str, bounds: &TradeBounds) -> CoordResult<String> {
    let amount = BigDecimal::from_str(input.trim())
        .map_err(|_| CoordError::Validation("Enter the amount as a plain number.".to_string()))?;

    if amount <= BigDecimal::from(0) {
        return Err(CoordError::Validation(
            "The amount must be positive.".to_string(),
        ));
    }
    if amount < bounds.min {
        return Err(CoordError::Validation(format!(
            "The minimum trade amount is {}.",
            bounds.min
        )));
    }
    if amount > bounds.max {
        return Err(CoordError::Validation(format!(
            "The maximum trade amount is {}.",
            bounds.max
        )));
    }

    Ok(amount.normalized().to_string())
}

/// step2: any positive number.
pub fn validate_rate(input: &str) -> CoordResult<String> {
    let rate = BigDecimal::from_str(input.trim())
        .map_err(|_| CoordError::Validation("Enter the rate as a plain number.".to_string()))?;
    if rate <= BigDecimal::from(0) {
        return Err(CoordError::Validation(
            "The rate must be positive.".to_string(),
        ));
    }
    Ok(rate.normalized().to_string())
}

/// step3: non-empty free text.
pub fn validate_payment_method(input: &str) -> CoordResult<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CoordError::Validation(
            "Enter a payment method, e.g. UPI or bank transfer.".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

/// step4: `<chain> <coin>` where the chain is supported at this fee tier and
/// the coin has a deployed vault on that chain + tier. The decimals table
/// must also know the pair, or amounts could never be converted.
pub fn validate_chain_coin(
    input: &str,
    registry: &ContractRegistry,
    fee_bps: u32,
) -> CoordResult<(Chain, Token)> {
    let mut parts = input.split_whitespace();
    let (Some(chain_raw), Some(coin_raw)) = (parts.next(), parts.next()) else {
        return Err(CoordError::Validation(
            "Reply with network and coin, e.g. `BSC USDT`.".to_string(),
        ));
    };

    let chain = normalize_chain(chain_raw)?;

    let supported_chains = registry.supported_chains(fee_bps);
    if !supported_chains.contains(&chain) {
        return Err(CoordError::Validation(format!(
            "{} is not available at this fee tier. Supported: {}",
            chain,
            supported_chains
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    let token = Token::new(coin_raw);
    let supported_tokens = registry.supported_tokens(chain, fee_bps);
    if !supported_tokens.contains(&token) {
        return Err(CoordError::Validation(format!(
            "{} is not available on {}. Supported: {}",
            token,
            chain,
            supported_tokens
                .iter()
                .map(|t| t.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    token_decimals(&token, chain)?;

    Ok((chain, token))
}

/// step5/step6: chain-specific syntactic validation.
pub fn validate_address(chain: Chain, input: &str) -> CoordResult<String> {
    let trimmed = input.trim();
    match chain.family() {
        ChainFamily::Evm => {
            let body = trimmed
                .strip_prefix("0x")
                .ok_or_else(|| evm_address_error(chain))?;
            if body.len() != 40 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(evm_address_error(chain));
            }
            Ok(trimmed.to_string())
        }
        ChainFamily::Tron => {
            if !tron::is_valid_address(trimmed) {
                return Err(CoordError::Validation(
                    "That does not look like a TRON address (T… base58).".to_string(),
                ));
            }
            Ok(trimmed.to_string())
        }
    }
}

fn evm_address_error(chain: Chain) -> CoordError {
    CoordError::Validation(format!(
        "That does not look like a {} address (0x + 40 hex chars).",
        chain
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::VaultContract;

    fn bounds() -> TradeBounds {
        TradeBounds::new("10", "10000").unwrap()
    }

    fn registry() -> ContractRegistry {
        ContractRegistry::from_contracts(vec![
            VaultContract {
                token: Token::new("USDT"),
                chain: Chain::Bsc,
                address: "0xvault1".to_string(),
                fee_percent: "0.25".to_string(),
                fee_bps: 25,
                group_id: None,
            },
            VaultContract {
                token: Token::new("USDT"),
                chain: Chain::Tron,
                address: "Tvault2".to_string(),
                fee_percent: "0.25".to_string(),
                fee_bps: 25,
                group_id: None,
            },
        ])
    }

    #[test]
    fn test_amount_within_bounds() {
        assert_eq!(validate_amount("100", &bounds()).unwrap(), "100");
        assert_eq!(validate_amount(" 99.5 ", &bounds()).unwrap(), "99.5");
    }

    #[test]
    fn test_amount_at_exact_minimum_accepted() {
        assert!(validate_amount("10", &bounds()).is_ok());
    }

    #[test]
    fn test_amount_one_unit_below_minimum_rejected() {
        assert!(validate_amount("9.999999", &bounds()).is_err());
        assert!(validate_amount("9", &bounds()).is_err());
    }

    #[test]
    fn test_amount_above_maximum_rejected() {
        assert!(validate_amount("10000", &bounds()).is_ok());
        assert!(validate_amount("10000.01", &bounds()).is_err());
    }

    #[test]
    fn test_amount_garbage_rejected() {
        assert!(validate_amount("lots", &bounds()).is_err());
        assert!(validate_amount("-5", &bounds()).is_err());
        assert!(validate_amount("0", &bounds()).is_err());
    }

    #[test]
    fn test_rate_positive_only() {
        assert_eq!(validate_rate("85").unwrap(), "85");
        assert!(validate_rate("0").is_err());
        assert!(validate_rate("-1").is_err());
        assert!(validate_rate("eighty").is_err());
    }

    #[test]
    fn test_payment_method_non_empty() {
        assert_eq!(validate_payment_method(" UPI ").unwrap(), "UPI");
        assert!(validate_payment_method("   ").is_err());
    }

    #[test]
    fn test_chain_coin_happy_path() {
        let (chain, token) = validate_chain_coin("BSC USDT", &registry(), 25).unwrap();
        assert_eq!(chain, Chain::Bsc);
        assert_eq!(token, Token::new("USDT"));
    }

    #[test]
    fn test_chain_coin_accepts_aliases() {
        let (chain, _) = validate_chain_coin("BEP-20 usdt", &registry(), 25).unwrap();
        assert_eq!(chain, Chain::Bsc);
    }

    #[test]
    fn test_chain_coin_rejects_unsupported_tier() {
        assert!(validate_chain_coin("BSC USDT", &registry(), 50).is_err());
    }

    #[test]
    fn test_chain_coin_rejects_unknown_coin() {
        assert!(validate_chain_coin("BSC DOGE", &registry(), 25).is_err());
        assert!(validate_chain_coin("USDT", &registry(), 25).is_err());
    }

    #[test]
    fn test_evm_address_validation() {
        let good = "0x000000000000000000000000000000000000dEaD";
        assert_eq!(validate_address(Chain::Bsc, good).unwrap(), good);
        assert!(validate_address(Chain::Bsc, "0x1234").is_err());
        assert!(validate_address(Chain::Bsc, "000000000000000000000000000000000000dEaD").is_err());
    }

    #[test]
    fn test_tron_address_on_bsc_rejected() {
        // Chain says BSC, address says Tron: the wizard stays on this step.
        let err =
            validate_address(Chain::Bsc, "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t").unwrap_err();
        assert!(matches!(err, CoordError::Validation(_)));
    }

    #[test]
    fn test_evm_address_on_tron_rejected() {
        let err = validate_address(
            Chain::Tron,
            "0x000000000000000000000000000000000000dEaD",
        )
        .unwrap_err();
        assert!(matches!(err, CoordError::Validation(_)));
    }

    #[test]
    fn test_tron_address_accepted() {
        let addr = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";
        assert_eq!(validate_address(Chain::Tron, addr).unwrap(), addr);
    }

    #[test]
    fn test_every_step_has_a_prompt() {
        let mut step = TradeStep::Step1Amount;
        loop {
            assert!(!prompt_for(step).is_empty());
            if step == TradeStep::Completed {
                break;
            }
            step = step.next();
        }
    }
}
