#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{EscrowStatus, RoomStatus, TradeStep};

// Note: We use String for amount fields to avoid BigDecimal/sqlx version
// conflicts. The database stores base units as NUMERIC(78,0). When inserting,
// we cast text to NUMERIC in the SQL query (e.g., $1::NUMERIC). When reading,
// the query casts NUMERIC back to TEXT.

/// Escrow aggregate root, one row per trade.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EscrowRow {
    pub id: i64,
    pub escrow_id: String,
    pub status: EscrowStatus,

    pub creator_id: i64,
    pub buyer_id: Option<i64>,
    pub seller_id: Option<i64>,
    pub buyer_username: Option<String>,
    pub seller_username: Option<String>,
    pub allowed_user_ids: Vec<i64>,
    pub allowed_usernames: Vec<String>,
    pub approved_user_ids: Vec<i64>,

    pub group_id: Option<i64>,
    pub origin_chat_id: i64,
    pub assigned_from_pool: bool,
    pub summary_message_id: Option<i64>,
    pub pinned_message_id: Option<i64>,

    pub quantity: Option<String>,
    pub rate: Option<String>,
    pub payment_method: Option<String>,
    pub token: Option<String>,
    pub chain: Option<String>,
    pub fee_percent: Option<String>,
    pub network_fee: Option<String>,
    pub buyer_address: Option<String>,
    pub seller_address: Option<String>,
    pub trade_step: TradeStep,

    pub buyer_approved: bool,
    pub seller_approved: bool,
    pub buyer_confirmed_release: bool,
    pub seller_confirmed_release: bool,
    pub buyer_sent_fiat: bool,
    pub seller_received_fiat: bool,
    pub buyer_closed_trade: bool,
    pub seller_closed_trade: bool,

    pub deposit_address: Option<String>,
    pub deposit_from_address: Option<String>,
    /// Human decimal, derived from the wei column for rendering.
    pub accumulated_deposit: String,
    /// Canonical base units, NUMERIC(78,0) read back as text.
    pub accumulated_deposit_wei: String,
    pub last_checked_block: i64,
    pub deposit_issued_at: Option<DateTime<Utc>>,

    pub release_tx_hash: Option<String>,
    pub refund_tx_hash: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EscrowRow {
    /// Role of a user within this escrow, if any.
    pub fn role_of(&self, user_id: i64) -> Option<Role> {
        if self.buyer_id == Some(user_id) {
            Some(Role::Buyer)
        } else if self.seller_id == Some(user_id) {
            Some(Role::Seller)
        } else {
            None
        }
    }

    pub fn is_participant(&self, user_id: i64) -> bool {
        self.allowed_user_ids.contains(&user_id)
    }
}

/// Buyer/seller role within one escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Buyer,
    Seller,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Buyer => "buyer",
            Role::Seller => "seller",
        }
    }
}

/// Boolean handshake flags on the escrow row, set exactly once each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalFlag {
    BuyerApproved,
    SellerApproved,
    BuyerConfirmedRelease,
    SellerConfirmedRelease,
    BuyerSentFiat,
    SellerReceivedFiat,
    BuyerClosedTrade,
    SellerClosedTrade,
}

impl ApprovalFlag {
    pub fn column(&self) -> &'static str {
        match self {
            ApprovalFlag::BuyerApproved => "buyer_approved",
            ApprovalFlag::SellerApproved => "seller_approved",
            ApprovalFlag::BuyerConfirmedRelease => "buyer_confirmed_release",
            ApprovalFlag::SellerConfirmedRelease => "seller_confirmed_release",
            ApprovalFlag::BuyerSentFiat => "buyer_sent_fiat",
            ApprovalFlag::SellerReceivedFiat => "seller_received_fiat",
            ApprovalFlag::BuyerClosedTrade => "buyer_closed_trade",
            ApprovalFlag::SellerClosedTrade => "seller_closed_trade",
        }
    }
}

/// One credited Transfer log. `(escrow_id, tx_hash, log_index)` is unique,
/// which is what makes watcher re-scans idempotent.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DepositEventRow {
    pub id: i64,
    pub escrow_id: String,
    pub tx_hash: String,
    pub log_index: i32,
    pub from_address: String,
    pub amount_wei: String,
    pub block_number: i64,
    pub created_at: DateTime<Utc>,
}

/// For inserting new deposit events
#[derive(Debug, Clone)]
pub struct NewDepositEvent {
    pub escrow_id: String,
    pub tx_hash: String,
    pub log_index: i32,
    pub from_address: String,
    pub amount_wei: String,
    pub block_number: i64,
}

/// Pre-provisioned chat room leased to at most one escrow at a time.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RoomRow {
    pub group_id: i64,
    pub status: RoomStatus,
    pub assigned_escrow_id: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub invite_link: Option<String>,
    pub pinned_contracts: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Deployed vault contract row; written by operator tooling, read-only here.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ContractRow {
    pub id: i64,
    pub name: String,
    pub token: String,
    pub chain: String,
    pub address: String,
    pub fee_percent: String,
    pub fee_bps: i32,
    pub status: String,
    pub group_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate row for /stats and /leaderboard.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TraderStanding {
    pub username: String,
    pub completed_trades: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_escrow() -> EscrowRow {
        EscrowRow {
            id: 1,
            escrow_id: "P2PMMX10000001".to_string(),
            status: EscrowStatus::Draft,
            creator_id: 100,
            buyer_id: Some(100),
            seller_id: Some(200),
            buyer_username: Some("alice".to_string()),
            seller_username: Some("bob".to_string()),
            allowed_user_ids: vec![100, 200],
            allowed_usernames: vec!["alice".to_string(), "bob".to_string()],
            approved_user_ids: vec![],
            group_id: None,
            origin_chat_id: -1,
            assigned_from_pool: false,
            summary_message_id: None,
            pinned_message_id: None,
            quantity: None,
            rate: None,
            payment_method: None,
            token: None,
            chain: None,
            fee_percent: None,
            network_fee: None,
            buyer_address: None,
            seller_address: None,
            trade_step: TradeStep::Step1Amount,
            buyer_approved: false,
            seller_approved: false,
            buyer_confirmed_release: false,
            seller_confirmed_release: false,
            buyer_sent_fiat: false,
            seller_received_fiat: false,
            buyer_closed_trade: false,
            seller_closed_trade: false,
            deposit_address: None,
            deposit_from_address: None,
            accumulated_deposit: "0".to_string(),
            accumulated_deposit_wei: "0".to_string(),
            last_checked_block: 0,
            deposit_issued_at: None,
            release_tx_hash: None,
            refund_tx_hash: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_role_of() {
        let escrow = sample_escrow();
        assert_eq!(escrow.role_of(100), Some(Role::Buyer));
        assert_eq!(escrow.role_of(200), Some(Role::Seller));
        assert_eq!(escrow.role_of(300), None);
    }

    #[test]
    fn test_is_participant() {
        let escrow = sample_escrow();
        assert!(escrow.is_participant(100));
        assert!(!escrow.is_participant(999));
    }

    #[test]
    fn test_approval_flag_columns_are_distinct() {
        let flags = [
            ApprovalFlag::BuyerApproved,
            ApprovalFlag::SellerApproved,
            ApprovalFlag::BuyerConfirmedRelease,
            ApprovalFlag::SellerConfirmedRelease,
            ApprovalFlag::BuyerSentFiat,
            ApprovalFlag::SellerReceivedFiat,
            ApprovalFlag::BuyerClosedTrade,
            ApprovalFlag::SellerClosedTrade,
        ];
        let mut columns: Vec<&str> = flags.iter().map(|f| f.column()).collect();
        columns.sort();
        columns.dedup();
        assert_eq!(columns.len(), flags.len());
    }
}
