//! Participant-facing message rendering
//!
//! Every message is a pure function of escrow fields. The deal summary in
//! particular is re-rendered and edited in place whenever an approval flag
//! flips, so both parties always read the same copy.

use crate::db::EscrowRow;
use crate::types::EscrowStatus;

fn flag(on: bool) -> &'static str {
    if on {
        "✅"
    } else {
        "⏳"
    }
}

fn field(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("—")
}

/// The deal summary shown for approval and kept updated afterwards.
pub fn deal_summary(escrow: &EscrowRow) -> String {
    let mut out = String::new();
    out.push_str(&format!("📋 Escrow {}\n\n", escrow.escrow_id));
    out.push_str(&format!(
        "Buyer: @{}\n",
        escrow.buyer_username.as_deref().unwrap_or("?")
    ));
    out.push_str(&format!(
        "Seller: @{}\n\n",
        escrow.seller_username.as_deref().unwrap_or("?")
    ));
    out.push_str(&format!("Amount: {}\n", field(&escrow.quantity)));
    out.push_str(&format!("Rate: {}\n", field(&escrow.rate)));
    out.push_str(&format!("Payment: {}\n", field(&escrow.payment_method)));
    out.push_str(&format!(
        "Network / Coin: {} / {}\n",
        field(&escrow.chain),
        field(&escrow.token)
    ));
    out.push_str(&format!("Escrow fee: {}%\n", field(&escrow.fee_percent)));
    out.push_str(&format!("Buyer address: {}\n", field(&escrow.buyer_address)));
    out.push_str(&format!(
        "Seller address: {}\n\n",
        field(&escrow.seller_address)
    ));
    out.push_str(&format!("{} Buyer approved\n", flag(escrow.buyer_approved)));
    out.push_str(&format!(
        "{} Seller approved",
        flag(escrow.seller_approved)
    ));
    out
}

/// Prompt sent once the vault address is assigned.
pub fn deposit_instructions(escrow: &EscrowRow, vault_address: &str, ttl_minutes: u64) -> String {
    format!(
        "🔐 Escrow {} is ready for the deposit.\n\n\
         Seller, send exactly {} {} ({}) to the vault address below within {} minutes:\n\n\
         `{}`\n\n\
         The deposit is detected automatically. You can also reply with the \
         transaction hash to trigger a check.",
        escrow.escrow_id,
        field(&escrow.quantity),
        field(&escrow.token),
        field(&escrow.chain),
        ttl_minutes,
        vault_address,
    )
}

/// Announcement when the vault holds the full agreed quantity.
pub fn deposit_confirmed(escrow: &EscrowRow) -> String {
    format!(
        "✅ Deposit confirmed: {} {} is secured in escrow.\n\n\
         Buyer, send the fiat payment ({}) and press the button once done.",
        escrow.accumulated_deposit,
        field(&escrow.token),
        field(&escrow.payment_method),
    )
}

/// Choice presented to the seller on a partial deposit.
pub fn partial_deposit_prompt(escrow: &EscrowRow, remaining_human: &str) -> String {
    format!(
        "⚠️ Partial deposit detected.\n\n\
         Received so far: {} {}\n\
         Agreed quantity: {} {}\n\
         Remaining: {} {}\n\n\
         Seller, continue the trade with the received amount, or send the rest.",
        escrow.accumulated_deposit,
        field(&escrow.token),
        field(&escrow.quantity),
        field(&escrow.token),
        remaining_human,
        field(&escrow.token),
    )
}

pub fn fiat_sent_notice(escrow: &EscrowRow) -> String {
    format!(
        "💸 Buyer reports the fiat payment ({}) is on its way.\n\
         Seller, confirm once it arrives.",
        field(&escrow.payment_method),
    )
}

pub fn release_confirmation_prompt() -> String {
    "🤝 Fiat receipt confirmed. Both parties, press Confirm Release to \
     release the crypto to the buyer."
        .to_string()
}

pub fn release_success(escrow: &EscrowRow, tx_hash: &str, fee_human: &str) -> String {
    format!(
        "🎉 Released {} {} to the buyer.\n\
         Escrow fee ({}%): {} {}, taken by the vault on-chain.\n\
         Transaction: `{}`\n\n\
         Press Close Trade to finish and free this room.",
        escrow.accumulated_deposit,
        field(&escrow.token),
        field(&escrow.fee_percent),
        fee_human,
        field(&escrow.token),
        tx_hash,
    )
}

pub fn refund_success(escrow: &EscrowRow, tx_hash: &str) -> String {
    format!(
        "↩️ Refunded {} {} to the seller.\nTransaction: `{}`",
        escrow.accumulated_deposit,
        field(&escrow.token),
        tx_hash,
    )
}

pub fn release_failed_notice() -> String {
    "❌ Release failed — contact the admin. The escrow stays locked until \
     this is resolved."
        .to_string()
}

pub fn cancelled_notice(escrow_id: &str, reason: &str) -> String {
    format!("🚫 Escrow {} cancelled: {}", escrow_id, reason)
}

pub fn dispute_notice(escrow_id: &str, username: &str, reason: &str, admin: &str) -> String {
    format!(
        "⚖️ @{} opened a dispute on escrow {}: {}\n@{} will step in.",
        username, escrow_id, reason, admin,
    )
}

/// /stats output.
pub fn stats_text(escrow_counts: &[(String, i64)], room_counts: &[(String, i64)]) -> String {
    let mut out = String::from("📊 Coordinator stats\n\nEscrows:\n");
    if escrow_counts.is_empty() {
        out.push_str("  none yet\n");
    }
    for (status, count) in escrow_counts {
        out.push_str(&format!("  {}: {}\n", status, count));
    }
    out.push_str("\nRooms:\n");
    if room_counts.is_empty() {
        out.push_str("  none provisioned\n");
    }
    for (status, count) in room_counts {
        out.push_str(&format!("  {}: {}\n", status, count));
    }
    out
}

/// /leaderboard output.
pub fn leaderboard_text(standings: &[crate::db::TraderStanding]) -> String {
    if standings.is_empty() {
        return "🏆 No completed trades yet.".to_string();
    }
    let mut out = String::from("🏆 Top traders\n\n");
    for (rank, standing) in standings.iter().enumerate() {
        out.push_str(&format!(
            "{}. @{} — {} trades\n",
            rank + 1,
            standing.username,
            standing.completed_trades
        ));
    }
    out
}

/// Status line for /balance and admin checks.
pub fn status_line(escrow: &EscrowRow) -> String {
    let phase = match escrow.status {
        EscrowStatus::Draft => "waiting for both parties to join",
        EscrowStatus::AwaitingDetails => "collecting trade details",
        EscrowStatus::AwaitingDeposit => "waiting for the seller's deposit",
        EscrowStatus::Deposited => "deposit secured, fiat leg pending",
        EscrowStatus::InFiatTransfer => "fiat payment in flight",
        EscrowStatus::ReadyToRelease => "both confirmed, release pending",
        EscrowStatus::Completed => "completed",
        EscrowStatus::Refunded => "refunded",
        EscrowStatus::Cancelled => "cancelled",
    };
    format!("Escrow {} — {}", escrow.escrow_id, phase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradeStep;
    use chrono::Utc;

    fn escrow() -> EscrowRow {
        EscrowRow {
            id: 1,
            escrow_id: "P2PMMX10000001".to_string(),
            status: EscrowStatus::AwaitingDetails,
            creator_id: 100,
            buyer_id: Some(100),
            seller_id: Some(200),
            buyer_username: Some("alice".to_string()),
            seller_username: Some("bob".to_string()),
            allowed_user_ids: vec![100, 200],
            allowed_usernames: vec!["alice".to_string(), "bob".to_string()],
            approved_user_ids: vec![],
            group_id: Some(-555),
            origin_chat_id: -1,
            assigned_from_pool: true,
            summary_message_id: None,
            pinned_message_id: None,
            quantity: Some("100".to_string()),
            rate: Some("85".to_string()),
            payment_method: Some("UPI".to_string()),
            token: Some("USDT".to_string()),
            chain: Some("BSC".to_string()),
            fee_percent: Some("0.25".to_string()),
            network_fee: None,
            buyer_address: Some("0xbbbb".to_string()),
            seller_address: Some("0xssss".to_string()),
            trade_step: TradeStep::Completed,
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
    fn test_summary_contains_all_terms() {
        let text = deal_summary(&escrow());
        for needle in ["P2PMMX10000001", "alice", "bob", "100", "85", "UPI", "BSC", "USDT", "0.25"]
        {
            assert!(text.contains(needle), "summary missing {}", needle);
        }
    }

    #[test]
    fn test_summary_is_append_only_under_approval() {
        // Flipping an approval flag only flips its marker; every other line
        // stays byte-identical.
        let before = deal_summary(&escrow());
        let mut approved = escrow();
        approved.buyer_approved = true;
        let after = deal_summary(&approved);

        let changed: Vec<(&str, &str)> = before
            .lines()
            .zip(after.lines())
            .filter(|(b, a)| b != a)
            .collect();
        assert_eq!(changed.len(), 1);
        assert!(changed[0].1.contains("Buyer approved"));
    }

    #[test]
    fn test_summary_shows_both_approvals() {
        let mut both = escrow();
        both.buyer_approved = true;
        both.seller_approved = true;
        let text = deal_summary(&both);
        assert_eq!(text.matches('✅').count(), 2);
        assert_eq!(text.matches('⏳').count(), 0);
    }

    #[test]
    fn test_deposit_instructions_mention_vault_and_ttl() {
        let text = deposit_instructions(&escrow(), "0xvault", 60);
        assert!(text.contains("0xvault"));
        assert!(text.contains("60 minutes"));
        assert!(text.contains("100"));
    }

    #[test]
    fn test_partial_prompt_shows_remaining() {
        let mut partial = escrow();
        partial.accumulated_deposit = "60".to_string();
        let text = partial_deposit_prompt(&partial, "40");
        assert!(text.contains("60"));
        assert!(text.contains("40"));
        assert!(text.contains("100"));
    }

    #[test]
    fn test_release_failed_notice_points_to_admin() {
        assert!(release_failed_notice().contains("contact the admin"));
    }

    #[test]
    fn test_release_success_shows_fee_on_released_amount() {
        // Partial trade: 60 of the quoted 100 was deposited and released;
        // the fee shown is computed on the released 60.
        let mut released = escrow();
        released.accumulated_deposit = "60".to_string();
        let text = release_success(&released, "0xREL", "0.15");
        assert!(text.contains("Released 60 USDT"));
        assert!(text.contains("Escrow fee (0.25%): 0.15 USDT"));
        assert!(text.contains("0xREL"));
    }

    #[test]
    fn test_leaderboard_empty_and_ranked() {
        assert!(leaderboard_text(&[]).contains("No completed trades"));
        let standings = vec![
            crate::db::TraderStanding {
                username: "bob".to_string(),
                completed_trades: 5,
            },
            crate::db::TraderStanding {
                username: "carol".to_string(),
                completed_trades: 2,
            },
        ];
        let text = leaderboard_text(&standings);
        assert!(text.contains("1. @bob — 5"));
        assert!(text.contains("2. @carol — 2"));
    }
}
