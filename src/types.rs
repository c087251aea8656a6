//! Core domain types
//!
//! Chains, tokens, escrow/room statuses, wizard steps, escrow identifiers,
//! and the exact human-decimal <-> base-unit conversions. Base units
//! (`U256`) are the source of truth for every amount; human decimals exist
//! only at the rendering and input edges.

use alloy::primitives::U256;
use bigdecimal::num_bigint::{BigInt, Sign};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoordError, CoordResult};

/// Chain family determines which driver handles a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainFamily {
    Evm,
    Tron,
}

/// Supported chains. Aliases like `BNB` or `BEP-20` are collapsed before
/// parsing; this enum only knows canonical names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chain {
    Bsc,
    Eth,
    Polygon,
    Tron,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Bsc => "BSC",
            Chain::Eth => "ETH",
            Chain::Polygon => "POLYGON",
            Chain::Tron => "TRON",
        }
    }

    pub fn family(&self) -> ChainFamily {
        match self {
            Chain::Tron => ChainFamily::Tron,
            _ => ChainFamily::Evm,
        }
    }

    pub fn all() -> &'static [Chain] {
        &[Chain::Bsc, Chain::Eth, Chain::Polygon, Chain::Tron]
    }
}

impl FromStr for Chain {
    type Err = CoordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BSC" => Ok(Chain::Bsc),
            "ETH" => Ok(Chain::Eth),
            "POLYGON" => Ok(Chain::Polygon),
            "TRON" => Ok(Chain::Tron),
            other => Err(CoordError::Validation(format!(
                "unsupported chain: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Token symbol, normalized to uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token(String);

impl Token {
    pub fn new(symbol: &str) -> Self {
        Token(symbol.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Observable escrow lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Draft,
    AwaitingDetails,
    AwaitingDeposit,
    Deposited,
    InFiatTransfer,
    ReadyToRelease,
    Completed,
    Refunded,
    Cancelled,
}

impl EscrowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::Draft => "draft",
            EscrowStatus::AwaitingDetails => "awaiting_details",
            EscrowStatus::AwaitingDeposit => "awaiting_deposit",
            EscrowStatus::Deposited => "deposited",
            EscrowStatus::InFiatTransfer => "in_fiat_transfer",
            EscrowStatus::ReadyToRelease => "ready_to_release",
            EscrowStatus::Completed => "completed",
            EscrowStatus::Refunded => "refunded",
            EscrowStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EscrowStatus::Completed | EscrowStatus::Refunded | EscrowStatus::Cancelled
        )
    }

    /// Statuses under which deposit accumulation is still live.
    pub fn accepts_deposits(&self) -> bool {
        matches!(
            self,
            EscrowStatus::AwaitingDeposit | EscrowStatus::Deposited
        )
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cursor through the trade-details wizard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TradeStep {
    Step1Amount,
    Step2Rate,
    Step3Payment,
    Step4ChainCoin,
    Step5BuyerAddress,
    Step6SellerAddress,
    Completed,
}

impl TradeStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStep::Step1Amount => "step1_amount",
            TradeStep::Step2Rate => "step2_rate",
            TradeStep::Step3Payment => "step3_payment",
            TradeStep::Step4ChainCoin => "step4_chain_coin",
            TradeStep::Step5BuyerAddress => "step5_buyer_address",
            TradeStep::Step6SellerAddress => "step6_seller_address",
            TradeStep::Completed => "completed",
        }
    }

    pub fn next(&self) -> TradeStep {
        match self {
            TradeStep::Step1Amount => TradeStep::Step2Rate,
            TradeStep::Step2Rate => TradeStep::Step3Payment,
            TradeStep::Step3Payment => TradeStep::Step4ChainCoin,
            TradeStep::Step4ChainCoin => TradeStep::Step5BuyerAddress,
            TradeStep::Step5BuyerAddress => TradeStep::Step6SellerAddress,
            TradeStep::Step6SellerAddress | TradeStep::Completed => TradeStep::Completed,
        }
    }
}

impl fmt::Display for TradeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Room pool status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Available,
    Assigned,
    Completed,
    Archived,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Available => "available",
            RoomStatus::Assigned => "assigned",
            RoomStatus::Completed => "completed",
            RoomStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Timer kinds owned by the scheduler, keyed together with an escrow id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Both parties must join the leased room within this window.
    JoinTimeout,
    /// Wizard prompts and cancellation notes are deleted after this TTL.
    MessageTtl,
    /// Auto-release of the room when a trade stalls after deposit issuance.
    InactivityTimeout,
    /// Grace delay between completion and room recycling.
    RecycleGrace,
}

impl TimerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerKind::JoinTimeout => "join_timeout",
            TimerKind::MessageTtl => "message_ttl",
            TimerKind::InactivityTimeout => "inactivity_timeout",
            TimerKind::RecycleGrace => "recycle_grace",
        }
    }
}

/// Stable escrow identifier, e.g. `P2PMMX10000001`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EscrowId(String);

impl EscrowId {
    pub const PREFIX: &'static str = "P2PMMX";

    pub fn from_seq(seq: i64) -> Self {
        EscrowId(format!("{}{}", Self::PREFIX, seq))
    }

    pub fn parse(raw: &str) -> CoordResult<Self> {
        if !raw.starts_with(Self::PREFIX) || raw.len() <= Self::PREFIX.len() {
            return Err(CoordError::Validation(format!("bad escrow id: {}", raw)));
        }
        if raw[Self::PREFIX.len()..].parse::<i64>().is_err() {
            return Err(CoordError::Validation(format!("bad escrow id: {}", raw)));
        }
        Ok(EscrowId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EscrowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Amount conversion
// ============================================================================

/// Convert a human decimal string into exact base units.
///
/// `"100.5"` with 18 decimals becomes `100500000000000000000`. Rejects
/// negatives, zero-length input, and values with more fractional digits
/// than the token carries. Integer math only.
pub fn human_to_base_units(human: &str, decimals: u8) -> CoordResult<U256> {
    let value: BigDecimal = human
        .trim()
        .parse()
        .map_err(|_| CoordError::Validation(format!("not a number: {}", human)))?;

    let (mantissa, exponent) = value.normalized().as_bigint_and_exponent();

    if mantissa.sign() == Sign::Minus {
        return Err(CoordError::Validation("amount must be positive".to_string()));
    }

    // value = mantissa * 10^(-exponent); base = mantissa * 10^(decimals - exponent)
    let shift = decimals as i64 - exponent;
    if shift < 0 {
        return Err(CoordError::Validation(format!(
            "amount has more than {} decimal places",
            decimals
        )));
    }

    let base = mantissa * BigInt::from(10u32).pow(shift as u32);
    U256::from_str_radix(&base.to_string(), 10)
        .map_err(|_| CoordError::Validation(format!("amount out of range: {}", human)))
}

/// Render base units as a human decimal string, trailing zeros trimmed.
pub fn base_units_to_human(base: U256, decimals: u8) -> String {
    let raw = base.to_string();
    if decimals == 0 {
        return raw;
    }

    let decimals = decimals as usize;
    let padded = if raw.len() <= decimals {
        format!("{}{}", "0".repeat(decimals - raw.len() + 1), raw)
    } else {
        raw
    };

    let split = padded.len() - decimals;
    let (int_part, frac_part) = padded.split_at(split);
    let frac_trimmed = frac_part.trim_end_matches('0');

    if frac_trimmed.is_empty() {
        int_part.to_string()
    } else {
        format!("{}.{}", int_part, frac_trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_parse_canonical() {
        assert_eq!("BSC".parse::<Chain>().unwrap(), Chain::Bsc);
        assert_eq!("tron".parse::<Chain>().unwrap(), Chain::Tron);
        assert!("BNB".parse::<Chain>().is_err());
    }

    #[test]
    fn test_chain_family() {
        assert_eq!(Chain::Bsc.family(), ChainFamily::Evm);
        assert_eq!(Chain::Polygon.family(), ChainFamily::Evm);
        assert_eq!(Chain::Tron.family(), ChainFamily::Tron);
    }

    #[test]
    fn test_token_normalization() {
        assert_eq!(Token::new(" usdt ").as_str(), "USDT");
        assert_eq!(Token::new("USDC"), Token::new("usdc"));
    }

    #[test]
    fn test_status_terminal() {
        assert!(EscrowStatus::Completed.is_terminal());
        assert!(EscrowStatus::Refunded.is_terminal());
        assert!(EscrowStatus::Cancelled.is_terminal());
        assert!(!EscrowStatus::ReadyToRelease.is_terminal());
    }

    #[test]
    fn test_status_accepts_deposits() {
        assert!(EscrowStatus::AwaitingDeposit.accepts_deposits());
        assert!(EscrowStatus::Deposited.accepts_deposits());
        assert!(!EscrowStatus::Completed.accepts_deposits());
    }

    #[test]
    fn test_trade_step_progression() {
        let mut step = TradeStep::Step1Amount;
        let mut seen = vec![step];
        while step != TradeStep::Completed {
            step = step.next();
            seen.push(step);
        }
        assert_eq!(seen.len(), 7);
        assert_eq!(TradeStep::Completed.next(), TradeStep::Completed);
    }

    #[test]
    fn test_escrow_id_format() {
        let id = EscrowId::from_seq(10000001);
        assert_eq!(id.as_str(), "P2PMMX10000001");
    }

    #[test]
    fn test_escrow_id_parse() {
        assert!(EscrowId::parse("P2PMMX10000001").is_ok());
        assert!(EscrowId::parse("P2PMMX").is_err());
        assert!(EscrowId::parse("XYZ10000001").is_err());
        assert!(EscrowId::parse("P2PMMXnotanumber").is_err());
    }

    #[test]
    fn test_human_to_base_units_integer() {
        let base = human_to_base_units("100", 18).unwrap();
        assert_eq!(base.to_string(), "100000000000000000000");
    }

    #[test]
    fn test_human_to_base_units_fractional() {
        let base = human_to_base_units("100.5", 18).unwrap();
        assert_eq!(base.to_string(), "100500000000000000000");
    }

    #[test]
    fn test_human_to_base_units_tron_scale() {
        let base = human_to_base_units("12.25", 6).unwrap();
        assert_eq!(base.to_string(), "12250000");
    }

    #[test]
    fn test_human_to_base_units_rejects_excess_precision() {
        assert!(human_to_base_units("1.0000001", 6).is_err());
    }

    #[test]
    fn test_human_to_base_units_rejects_negative() {
        assert!(human_to_base_units("-5", 18).is_err());
    }

    #[test]
    fn test_human_to_base_units_rejects_garbage() {
        assert!(human_to_base_units("abc", 18).is_err());
        assert!(human_to_base_units("", 18).is_err());
    }

    #[test]
    fn test_base_units_to_human() {
        let v = U256::from_str_radix("100500000000000000000", 10).unwrap();
        assert_eq!(base_units_to_human(v, 18), "100.5");
    }

    #[test]
    fn test_base_units_to_human_small_value() {
        let v = U256::from(1500u64);
        assert_eq!(base_units_to_human(v, 6), "0.0015");
    }

    #[test]
    fn test_base_units_to_human_zero_decimals() {
        assert_eq!(base_units_to_human(U256::from(42u64), 0), "42");
    }

    #[test]
    fn test_amount_roundtrip() {
        // Any value the wizard accepts round-trips through the conversion.
        for (human, decimals) in [
            ("100", 18u8),
            ("0.25", 18),
            ("12.5", 6),
            ("9999.999999", 6),
            ("1", 6),
        ] {
            let base = human_to_base_units(human, decimals).unwrap();
            assert_eq!(base_units_to_human(base, decimals), human);
        }
    }
}
