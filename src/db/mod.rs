#![allow(dead_code)]

use eyre::{Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use crate::types::EscrowStatus;

pub mod models;

pub use models::*;

/// Escrow select list; the NUMERIC wei column travels as text.
const ESCROW_COLUMNS: &str = "id, escrow_id, status, creator_id, buyer_id, seller_id, \
     buyer_username, seller_username, allowed_user_ids, allowed_usernames, approved_user_ids, \
     group_id, origin_chat_id, assigned_from_pool, summary_message_id, pinned_message_id, \
     quantity, rate, payment_method, token, chain, fee_percent, network_fee, \
     buyer_address, seller_address, trade_step, \
     buyer_approved, seller_approved, buyer_confirmed_release, seller_confirmed_release, \
     buyer_sent_fiat, seller_received_fiat, buyer_closed_trade, seller_closed_trade, \
     deposit_address, deposit_from_address, accumulated_deposit, \
     accumulated_deposit_wei::TEXT AS accumulated_deposit_wei, last_checked_block, \
     deposit_issued_at, release_tx_hash, refund_tx_hash, created_at, updated_at";

const ROOM_COLUMNS: &str = "group_id, status, assigned_escrow_id, assigned_at, completed_at, \
     invite_link, pinned_contracts, created_at, updated_at";

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

// ============================================================================
// Counters
// ============================================================================

/// Allocate the next escrow sequence number. The first allocation yields
/// 10000001 so ids read as P2PMMX10000001 onward.
pub async fn next_escrow_seq(pool: &PgPool) -> Result<i64> {
    let row = sqlx::query(
        r#"
        INSERT INTO counters (name, seq) VALUES ('escrow_id', 10000001)
        ON CONFLICT (name) DO UPDATE SET seq = counters.seq + 1
        RETURNING seq
        "#,
    )
    .fetch_one(pool)
    .await
    .wrap_err("Failed to allocate escrow sequence")?;

    Ok(row.get("seq"))
}

// ============================================================================
// Escrows
// ============================================================================

/// Insert a fresh draft escrow.
pub async fn insert_escrow(
    pool: &PgPool,
    escrow_id: &str,
    creator_id: i64,
    origin_chat_id: i64,
) -> Result<EscrowRow> {
    let query = format!(
        "INSERT INTO escrows (escrow_id, creator_id, origin_chat_id) \
         VALUES ($1, $2, $3) RETURNING {}",
        ESCROW_COLUMNS
    );
    sqlx::query_as::<_, EscrowRow>(&query)
        .bind(escrow_id)
        .bind(creator_id)
        .bind(origin_chat_id)
        .fetch_one(pool)
        .await
        .wrap_err("Failed to insert escrow")
}

pub async fn get_escrow(pool: &PgPool, escrow_id: &str) -> Result<Option<EscrowRow>> {
    let query = format!("SELECT {} FROM escrows WHERE escrow_id = $1", ESCROW_COLUMNS);
    sqlx::query_as::<_, EscrowRow>(&query)
        .bind(escrow_id)
        .fetch_optional(pool)
        .await
        .wrap_err("Failed to get escrow")
}

/// The non-terminal escrow currently occupying a room, if any.
pub async fn get_active_escrow_by_group(pool: &PgPool, group_id: i64) -> Result<Option<EscrowRow>> {
    let query = format!(
        "SELECT {} FROM escrows WHERE group_id = $1 \
         AND status NOT IN ('completed', 'refunded', 'cancelled') \
         ORDER BY id DESC LIMIT 1",
        ESCROW_COLUMNS
    );
    sqlx::query_as::<_, EscrowRow>(&query)
        .bind(group_id)
        .fetch_optional(pool)
        .await
        .wrap_err("Failed to get escrow by group")
}

/// Latest escrow in a room regardless of status (close/stats flows).
pub async fn get_latest_escrow_by_group(pool: &PgPool, group_id: i64) -> Result<Option<EscrowRow>> {
    let query = format!(
        "SELECT {} FROM escrows WHERE group_id = $1 ORDER BY id DESC LIMIT 1",
        ESCROW_COLUMNS
    );
    sqlx::query_as::<_, EscrowRow>(&query)
        .bind(group_id)
        .fetch_optional(pool)
        .await
        .wrap_err("Failed to get latest escrow by group")
}

pub async fn get_escrows_by_status(pool: &PgPool, status: EscrowStatus) -> Result<Vec<EscrowRow>> {
    let query = format!("SELECT {} FROM escrows WHERE status = $1", ESCROW_COLUMNS);
    sqlx::query_as::<_, EscrowRow>(&query)
        .bind(status)
        .fetch_all(pool)
        .await
        .wrap_err("Failed to get escrows by status")
}

pub async fn update_escrow_status(
    pool: &PgPool,
    escrow_id: &str,
    status: EscrowStatus,
) -> Result<()> {
    sqlx::query("UPDATE escrows SET status = $1, updated_at = NOW() WHERE escrow_id = $2")
        .bind(status)
        .bind(escrow_id)
        .execute(pool)
        .await
        .wrap_err("Failed to update escrow status")?;
    Ok(())
}

/// Claim a role atomically. Returns false when the column was already set,
/// so a racing second click observes the conflict instead of overwriting.
pub async fn claim_buyer(
    pool: &PgPool,
    escrow_id: &str,
    user_id: i64,
    username: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE escrows SET buyer_id = $1, buyer_username = $2, updated_at = NOW() \
         WHERE escrow_id = $3 AND buyer_id IS NULL",
    )
    .bind(user_id)
    .bind(username)
    .bind(escrow_id)
    .execute(pool)
    .await
    .wrap_err("Failed to claim buyer role")?;
    Ok(result.rows_affected() == 1)
}

pub async fn claim_seller(
    pool: &PgPool,
    escrow_id: &str,
    user_id: i64,
    username: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE escrows SET seller_id = $1, seller_username = $2, updated_at = NOW() \
         WHERE escrow_id = $3 AND seller_id IS NULL",
    )
    .bind(user_id)
    .bind(username)
    .bind(escrow_id)
    .execute(pool)
    .await
    .wrap_err("Failed to claim seller role")?;
    Ok(result.rows_affected() == 1)
}

/// Add a user to the allowlist; the two-entry cap is enforced in SQL.
pub async fn add_allowed_user(
    pool: &PgPool,
    escrow_id: &str,
    user_id: i64,
    username: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE escrows SET \
            allowed_user_ids = array_append(allowed_user_ids, $1), \
            allowed_usernames = array_append(allowed_usernames, $2), \
            updated_at = NOW() \
         WHERE escrow_id = $3 \
           AND NOT (allowed_user_ids @> ARRAY[$1]::BIGINT[]) \
           AND cardinality(allowed_user_ids) < 2",
    )
    .bind(user_id)
    .bind(username)
    .bind(escrow_id)
    .execute(pool)
    .await
    .wrap_err("Failed to add allowed user")?;
    Ok(result.rows_affected() == 1)
}

/// Allowlist a counterparty known only by username (until they join).
pub async fn add_allowed_username(pool: &PgPool, escrow_id: &str, username: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE escrows SET \
            allowed_usernames = array_append(allowed_usernames, $1), \
            updated_at = NOW() \
         WHERE escrow_id = $2 \
           AND NOT (allowed_usernames @> ARRAY[$1]::VARCHAR[]) \
           AND cardinality(allowed_usernames) < 2",
    )
    .bind(username)
    .bind(escrow_id)
    .execute(pool)
    .await
    .wrap_err("Failed to add allowed username")?;
    Ok(result.rows_affected() == 1)
}

/// Wipe the wizard back to step one (/restart before any deposit).
pub async fn reset_trade_details(pool: &PgPool, escrow_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE escrows SET \
            quantity = NULL, rate = NULL, payment_method = NULL, \
            token = NULL, chain = NULL, fee_percent = NULL, \
            buyer_address = NULL, seller_address = NULL, \
            trade_step = 'step1_amount', \
            buyer_approved = FALSE, seller_approved = FALSE, \
            approved_user_ids = '{}', \
            summary_message_id = NULL, \
            updated_at = NOW() \
         WHERE escrow_id = $1",
    )
    .bind(escrow_id)
    .execute(pool)
    .await
    .wrap_err("Failed to reset trade details")?;
    Ok(())
}

/// Record a summary approval; only allowlisted users can land here.
pub async fn add_approved_user(pool: &PgPool, escrow_id: &str, user_id: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE escrows SET \
            approved_user_ids = array_append(approved_user_ids, $1), \
            updated_at = NOW() \
         WHERE escrow_id = $2 \
           AND allowed_user_ids @> ARRAY[$1]::BIGINT[] \
           AND NOT (approved_user_ids @> ARRAY[$1]::BIGINT[])",
    )
    .bind(user_id)
    .bind(escrow_id)
    .execute(pool)
    .await
    .wrap_err("Failed to add approved user")?;
    Ok(result.rows_affected() == 1)
}

pub async fn set_escrow_room(
    pool: &PgPool,
    escrow_id: &str,
    group_id: i64,
    assigned_from_pool: bool,
) -> Result<()> {
    sqlx::query(
        "UPDATE escrows SET group_id = $1, assigned_from_pool = $2, updated_at = NOW() \
         WHERE escrow_id = $3",
    )
    .bind(group_id)
    .bind(assigned_from_pool)
    .bind(escrow_id)
    .execute(pool)
    .await
    .wrap_err("Failed to set escrow room")?;
    Ok(())
}

pub async fn set_summary_message(pool: &PgPool, escrow_id: &str, message_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE escrows SET summary_message_id = $1, updated_at = NOW() WHERE escrow_id = $2",
    )
    .bind(message_id)
    .bind(escrow_id)
    .execute(pool)
    .await
    .wrap_err("Failed to set summary message")?;
    Ok(())
}

pub async fn set_pinned_message(pool: &PgPool, escrow_id: &str, message_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE escrows SET pinned_message_id = $1, updated_at = NOW() WHERE escrow_id = $2",
    )
    .bind(message_id)
    .bind(escrow_id)
    .execute(pool)
    .await
    .wrap_err("Failed to set pinned message")?;
    Ok(())
}

pub async fn set_trade_step(
    pool: &PgPool,
    escrow_id: &str,
    step: crate::types::TradeStep,
) -> Result<()> {
    sqlx::query("UPDATE escrows SET trade_step = $1, updated_at = NOW() WHERE escrow_id = $2")
        .bind(step)
        .bind(escrow_id)
        .execute(pool)
        .await
        .wrap_err("Failed to set trade step")?;
    Ok(())
}

pub async fn set_quantity(pool: &PgPool, escrow_id: &str, quantity: &str) -> Result<()> {
    sqlx::query("UPDATE escrows SET quantity = $1, updated_at = NOW() WHERE escrow_id = $2")
        .bind(quantity)
        .bind(escrow_id)
        .execute(pool)
        .await
        .wrap_err("Failed to set quantity")?;
    Ok(())
}

pub async fn set_rate(pool: &PgPool, escrow_id: &str, rate: &str) -> Result<()> {
    sqlx::query("UPDATE escrows SET rate = $1, updated_at = NOW() WHERE escrow_id = $2")
        .bind(rate)
        .bind(escrow_id)
        .execute(pool)
        .await
        .wrap_err("Failed to set rate")?;
    Ok(())
}

pub async fn set_payment_method(pool: &PgPool, escrow_id: &str, method: &str) -> Result<()> {
    sqlx::query("UPDATE escrows SET payment_method = $1, updated_at = NOW() WHERE escrow_id = $2")
        .bind(method)
        .bind(escrow_id)
        .execute(pool)
        .await
        .wrap_err("Failed to set payment method")?;
    Ok(())
}

pub async fn set_chain_coin(
    pool: &PgPool,
    escrow_id: &str,
    token: &str,
    chain: &str,
    fee_percent: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE escrows SET token = $1, chain = $2, fee_percent = $3, updated_at = NOW() \
         WHERE escrow_id = $4",
    )
    .bind(token)
    .bind(chain)
    .bind(fee_percent)
    .bind(escrow_id)
    .execute(pool)
    .await
    .wrap_err("Failed to set chain/coin")?;
    Ok(())
}

pub async fn set_buyer_address(pool: &PgPool, escrow_id: &str, address: &str) -> Result<()> {
    sqlx::query("UPDATE escrows SET buyer_address = $1, updated_at = NOW() WHERE escrow_id = $2")
        .bind(address)
        .bind(escrow_id)
        .execute(pool)
        .await
        .wrap_err("Failed to set buyer address")?;
    Ok(())
}

pub async fn set_seller_address(pool: &PgPool, escrow_id: &str, address: &str) -> Result<()> {
    sqlx::query("UPDATE escrows SET seller_address = $1, updated_at = NOW() WHERE escrow_id = $2")
        .bind(address)
        .bind(escrow_id)
        .execute(pool)
        .await
        .wrap_err("Failed to set seller address")?;
    Ok(())
}

/// Flip one handshake flag. Returns false when the flag was already set.
pub async fn set_approval_flag(pool: &PgPool, escrow_id: &str, flag: ApprovalFlag) -> Result<bool> {
    let query = format!(
        "UPDATE escrows SET {col} = TRUE, updated_at = NOW() \
         WHERE escrow_id = $1 AND {col} = FALSE",
        col = flag.column()
    );
    let result = sqlx::query(&query)
        .bind(escrow_id)
        .execute(pool)
        .await
        .wrap_err("Failed to set approval flag")?;
    Ok(result.rows_affected() == 1)
}

pub async fn set_deposit_address(pool: &PgPool, escrow_id: &str, address: &str) -> Result<()> {
    sqlx::query(
        "UPDATE escrows SET deposit_address = $1, deposit_issued_at = NOW(), updated_at = NOW() \
         WHERE escrow_id = $2",
    )
    .bind(address)
    .bind(escrow_id)
    .execute(pool)
    .await
    .wrap_err("Failed to set deposit address")?;
    Ok(())
}

pub async fn set_deposit_from_address(pool: &PgPool, escrow_id: &str, from: &str) -> Result<()> {
    sqlx::query(
        "UPDATE escrows SET deposit_from_address = $1, updated_at = NOW() WHERE escrow_id = $2",
    )
    .bind(from)
    .bind(escrow_id)
    .execute(pool)
    .await
    .wrap_err("Failed to set deposit sender")?;
    Ok(())
}

/// Persist the recomputed deposit totals and scan cursor.
pub async fn record_deposit_totals(
    pool: &PgPool,
    escrow_id: &str,
    wei: &str,
    human: &str,
    last_checked_block: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE escrows SET accumulated_deposit_wei = $1::NUMERIC, accumulated_deposit = $2, \
            last_checked_block = $3, updated_at = NOW() \
         WHERE escrow_id = $4",
    )
    .bind(wei)
    .bind(human)
    .bind(last_checked_block)
    .bind(escrow_id)
    .execute(pool)
    .await
    .wrap_err("Failed to record deposit totals")?;
    Ok(())
}

/// Snap quantity to what actually arrived (partial-continue choice).
pub async fn snap_quantity_to_deposit(pool: &PgPool, escrow_id: &str, human: &str) -> Result<()> {
    sqlx::query("UPDATE escrows SET quantity = $1, updated_at = NOW() WHERE escrow_id = $2")
        .bind(human)
        .bind(escrow_id)
        .execute(pool)
        .await
        .wrap_err("Failed to snap quantity")?;
    Ok(())
}

pub async fn set_release_tx_hash(pool: &PgPool, escrow_id: &str, tx_hash: &str) -> Result<()> {
    sqlx::query("UPDATE escrows SET release_tx_hash = $1, updated_at = NOW() WHERE escrow_id = $2")
        .bind(tx_hash)
        .bind(escrow_id)
        .execute(pool)
        .await
        .wrap_err("Failed to set release tx hash")?;
    Ok(())
}

pub async fn set_refund_tx_hash(pool: &PgPool, escrow_id: &str, tx_hash: &str) -> Result<()> {
    sqlx::query("UPDATE escrows SET refund_tx_hash = $1, updated_at = NOW() WHERE escrow_id = $2")
        .bind(tx_hash)
        .bind(escrow_id)
        .execute(pool)
        .await
        .wrap_err("Failed to set refund tx hash")?;
    Ok(())
}

/// Join-timeout cleanup removes the draft entirely.
pub async fn delete_escrow(pool: &PgPool, escrow_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM escrows WHERE escrow_id = $1")
        .bind(escrow_id)
        .execute(pool)
        .await
        .wrap_err("Failed to delete escrow")?;
    Ok(())
}

// ============================================================================
// Deposit events
// ============================================================================

/// Insert a Transfer log into the dedupe ledger. Returns false when the
/// `(escrow_id, tx_hash, log_index)` key was already credited.
pub async fn insert_deposit_event(pool: &PgPool, event: &NewDepositEvent) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO deposit_events (escrow_id, tx_hash, log_index, from_address, amount_wei, block_number)
        VALUES ($1, $2, $3, $4, $5::NUMERIC, $6)
        ON CONFLICT (escrow_id, tx_hash, log_index) DO NOTHING
        "#,
    )
    .bind(&event.escrow_id)
    .bind(&event.tx_hash)
    .bind(event.log_index)
    .bind(&event.from_address)
    .bind(&event.amount_wei)
    .bind(event.block_number)
    .execute(pool)
    .await
    .wrap_err("Failed to insert deposit event")?;

    Ok(result.rows_affected() == 1)
}

/// Sum of all credited events for an escrow, in base units as text.
pub async fn sum_deposit_events(pool: &PgPool, escrow_id: &str) -> Result<String> {
    let row = sqlx::query(
        "SELECT COALESCE(SUM(amount_wei), 0)::TEXT AS total FROM deposit_events \
         WHERE escrow_id = $1",
    )
    .bind(escrow_id)
    .fetch_one(pool)
    .await
    .wrap_err("Failed to sum deposit events")?;
    Ok(row.get("total"))
}

pub async fn list_deposit_events(pool: &PgPool, escrow_id: &str) -> Result<Vec<DepositEventRow>> {
    sqlx::query_as::<_, DepositEventRow>(
        "SELECT id, escrow_id, tx_hash, log_index, from_address, \
                amount_wei::TEXT AS amount_wei, block_number, created_at \
         FROM deposit_events WHERE escrow_id = $1 \
         ORDER BY block_number, tx_hash, log_index",
    )
    .bind(escrow_id)
    .fetch_all(pool)
    .await
    .wrap_err("Failed to list deposit events")
}

// ============================================================================
// Rooms
// ============================================================================

/// Atomically claim one available room, preferring the given group ids.
/// The CAS (`status='available'` in the WHERE) is the only cross-escrow
/// synchronization point in the system.
pub async fn claim_available_room(
    pool: &PgPool,
    escrow_id: &str,
    preferred_group_ids: &[i64],
) -> Result<Option<RoomRow>> {
    if !preferred_group_ids.is_empty() {
        let query = format!(
            "UPDATE rooms SET status = 'assigned', assigned_escrow_id = $1, \
                assigned_at = NOW(), updated_at = NOW() \
             WHERE group_id = ( \
                SELECT group_id FROM rooms \
                WHERE status = 'available' AND group_id = ANY($2) \
                ORDER BY group_id LIMIT 1 \
                FOR UPDATE SKIP LOCKED) \
             RETURNING {}",
            ROOM_COLUMNS
        );
        let preferred = sqlx::query_as::<_, RoomRow>(&query)
            .bind(escrow_id)
            .bind(preferred_group_ids)
            .fetch_optional(pool)
            .await
            .wrap_err("Failed to claim preferred room")?;
        if preferred.is_some() {
            return Ok(preferred);
        }
    }

    let query = format!(
        "UPDATE rooms SET status = 'assigned', assigned_escrow_id = $1, \
            assigned_at = NOW(), updated_at = NOW() \
         WHERE group_id = ( \
            SELECT group_id FROM rooms WHERE status = 'available' \
            ORDER BY group_id LIMIT 1 \
            FOR UPDATE SKIP LOCKED) \
         RETURNING {}",
        ROOM_COLUMNS
    );
    sqlx::query_as::<_, RoomRow>(&query)
        .bind(escrow_id)
        .fetch_optional(pool)
        .await
        .wrap_err("Failed to claim room")
}

pub async fn get_room(pool: &PgPool, group_id: i64) -> Result<Option<RoomRow>> {
    let query = format!("SELECT {} FROM rooms WHERE group_id = $1", ROOM_COLUMNS);
    sqlx::query_as::<_, RoomRow>(&query)
        .bind(group_id)
        .fetch_optional(pool)
        .await
        .wrap_err("Failed to get room")
}

pub async fn set_room_invite_link(pool: &PgPool, group_id: i64, link: &str) -> Result<()> {
    sqlx::query("UPDATE rooms SET invite_link = $1, updated_at = NOW() WHERE group_id = $2")
        .bind(link)
        .bind(group_id)
        .execute(pool)
        .await
        .wrap_err("Failed to set room invite link")?;
    Ok(())
}

/// Return a recycled room to the pool.
pub async fn release_room(pool: &PgPool, group_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE rooms SET status = 'available', assigned_escrow_id = NULL, \
            assigned_at = NULL, completed_at = NOW(), updated_at = NOW() \
         WHERE group_id = $1",
    )
    .bind(group_id)
    .execute(pool)
    .await
    .wrap_err("Failed to release room")?;
    Ok(())
}

/// Quarantine a room that could not be cleaned for manual intervention.
pub async fn quarantine_room(pool: &PgPool, group_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE rooms SET status = 'completed', completed_at = NOW(), updated_at = NOW() \
         WHERE group_id = $1",
    )
    .bind(group_id)
    .execute(pool)
    .await
    .wrap_err("Failed to quarantine room")?;
    Ok(())
}

pub async fn count_rooms_by_status(pool: &PgPool) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT status, COUNT(*) FROM rooms GROUP BY status",
    )
    .fetch_all(pool)
    .await
    .wrap_err("Failed to count rooms")?;
    Ok(rows)
}

// ============================================================================
// Contracts (read-only at runtime)
// ============================================================================

pub async fn load_deployed_contracts(pool: &PgPool) -> Result<Vec<ContractRow>> {
    sqlx::query_as::<_, ContractRow>(
        "SELECT id, name, token, chain, address, fee_percent, fee_bps, status, group_id, \
                created_at \
         FROM contracts WHERE status = 'deployed' ORDER BY id",
    )
    .fetch_all(pool)
    .await
    .wrap_err("Failed to load contracts")
}

// ============================================================================
// Aggregates
// ============================================================================

pub async fn count_escrows_by_status(pool: &PgPool) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT status, COUNT(*) FROM escrows GROUP BY status",
    )
    .fetch_all(pool)
    .await
    .wrap_err("Failed to count escrows")?;
    Ok(rows)
}

/// Completed-trade leaderboard by seller username.
pub async fn leaderboard(pool: &PgPool, limit: i64) -> Result<Vec<TraderStanding>> {
    sqlx::query_as::<_, TraderStanding>(
        "SELECT seller_username AS username, COUNT(*) AS completed_trades \
         FROM escrows WHERE status = 'completed' AND seller_username IS NOT NULL \
         GROUP BY seller_username ORDER BY completed_trades DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .wrap_err("Failed to load leaderboard")
}
