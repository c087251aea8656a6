//! Trade state machine
//!
//! One service owns every escrow mutation. Each escrow's transitions
//! serialize behind a per-escrow async lock so racing callbacks (both
//! parties pressing buttons at once) interleave deterministically; the
//! database CAS updates are the second line of defense. Every chain side
//! effect is preceded by a persisted transition or is idempotent against
//! its stored receipt hash.

#![allow(dead_code)]

pub mod deposit;
pub mod render;
pub mod wizard;

use alloy::primitives::U256;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use crate::assigner::{assign_deposit_address, normalize_chain};
use crate::chain::explorer::ExplorerClient;
use crate::chain::{token_decimals, ChainGateway, TokenTransfer};
use crate::chat::{Button, ChatApi, ChatUser, Keyboard};
use crate::config::Config;
use crate::db::{self, ApprovalFlag, EscrowRow, NewDepositEvent, Role};
use crate::error::{CoordError, CoordResult};
use crate::metrics;
use crate::registry::{fee_percent_to_bps, ContractRegistry};
use crate::rooms::RoomPool;
use crate::scheduler::{Scheduler, TimerFired};
use crate::types::{
    base_units_to_human, human_to_base_units, Chain, EscrowId, EscrowStatus, TimerKind, Token,
    TradeStep,
};

use deposit::DepositOutcome;
use wizard::TradeBounds;

/// Callback-data values carried on inline buttons.
pub mod cb {
    pub const ROLE_BUYER: &str = "role:buyer";
    pub const ROLE_SELLER: &str = "role:seller";
    pub const APPROVE: &str = "approve";
    pub const FIAT_SENT: &str = "fiat:sent";
    pub const FIAT_RECEIVED: &str = "fiat:received";
    pub const CONFIRM_RELEASE: &str = "release:confirm";
    pub const PARTIAL_CONTINUE: &str = "partial:continue";
    pub const PARTIAL_REMAINING: &str = "partial:remaining";
    pub const CLOSE: &str = "close";
}

/// When the scan cursor was never initialized, look this far back instead
/// of walking the chain from genesis.
const FRESH_SCAN_LOOKBACK_BLOCKS: u64 = 1_000;

pub struct EscrowService {
    db: PgPool,
    gateway: Arc<ChainGateway>,
    registry: Arc<ContractRegistry>,
    rooms: Arc<RoomPool>,
    chat: Arc<dyn ChatApi>,
    scheduler: Arc<Scheduler>,
    config: Arc<Config>,
    explorer: ExplorerClient,
    bounds: TradeBounds,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl EscrowService {
    pub fn new(
        db: PgPool,
        gateway: Arc<ChainGateway>,
        registry: Arc<ContractRegistry>,
        rooms: Arc<RoomPool>,
        chat: Arc<dyn ChatApi>,
        scheduler: Arc<Scheduler>,
        config: Arc<Config>,
    ) -> CoordResult<Self> {
        let bounds = TradeBounds::new(
            &config.trade.min_trade_amount,
            &config.trade.max_trade_amount,
        )?;
        let explorer = ExplorerClient::new(config.evm.explorer_api_key.clone());
        Ok(EscrowService {
            db,
            gateway,
            registry,
            rooms,
            chat,
            scheduler,
            config,
            explorer,
            bounds,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Per-escrow mutation lock.
    fn lock_for(&self, escrow_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock map poisoned");
        Arc::clone(
            locks
                .entry(escrow_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    fn is_admin(&self, user: &ChatUser) -> bool {
        user.id == self.config.telegram.admin_user_id
            || user
                .username
                .eq_ignore_ascii_case(&self.config.telegram.admin_username)
    }

    async fn active_escrow(&self, group_id: i64) -> CoordResult<EscrowRow> {
        db::get_active_escrow_by_group(&self.db, group_id)
            .await?
            .ok_or_else(|| CoordError::NotFound("No active escrow in this room.".to_string()))
    }

    async fn reload(&self, escrow_id: &str) -> CoordResult<EscrowRow> {
        db::get_escrow(&self.db, escrow_id)
            .await?
            .ok_or_else(|| CoordError::NotFound(format!("escrow {} vanished", escrow_id)))
    }

    fn escrow_token(escrow: &EscrowRow) -> CoordResult<Token> {
        escrow
            .token
            .as_deref()
            .map(Token::new)
            .ok_or_else(|| CoordError::Internal("escrow token not set".to_string()))
    }

    fn escrow_chain(escrow: &EscrowRow) -> CoordResult<Chain> {
        escrow
            .chain
            .as_deref()
            .ok_or_else(|| CoordError::Internal("escrow chain not set".to_string()))
            .and_then(normalize_chain)
    }

    fn accumulated_wei(escrow: &EscrowRow) -> CoordResult<U256> {
        U256::from_str_radix(&escrow.accumulated_deposit_wei, 10)
            .map_err(|_| CoordError::Internal("corrupt accumulated deposit".to_string()))
    }

    async fn send_ephemeral(&self, escrow_id: &str, chat_id: i64, text: &str) -> CoordResult<()> {
        let message_id = self.chat.send_text(chat_id, text, None).await?;
        self.scheduler
            .schedule_message_ttl(escrow_id, chat_id, message_id);
        Ok(())
    }

    // ========================================================================
    // Deal creation and joining
    // ========================================================================

    /// `/deal @user` in the main group: allocate an id, lease a room, post
    /// the invite link, and arm the join timeout.
    pub async fn create_deal(
        &self,
        creator: &ChatUser,
        counterparty: &str,
        origin_chat: i64,
    ) -> CoordResult<()> {
        if origin_chat != self.config.telegram.main_group_id {
            return Err(CoordError::Validation(
                "Use /deal in the main group.".to_string(),
            ));
        }

        let counterparty = counterparty.trim_start_matches('@').trim();
        if counterparty.is_empty() {
            return Err(CoordError::Validation(
                "Usage: /deal @counterparty".to_string(),
            ));
        }
        if counterparty.eq_ignore_ascii_case(&creator.username) {
            return Err(CoordError::Validation(
                "You cannot open a deal with yourself.".to_string(),
            ));
        }

        let seq = db::next_escrow_seq(&self.db).await?;
        let escrow_id = EscrowId::from_seq(seq);

        db::insert_escrow(&self.db, escrow_id.as_str(), creator.id, origin_chat).await?;
        db::add_allowed_user(&self.db, escrow_id.as_str(), creator.id, &creator.username).await?;
        db::add_allowed_username(&self.db, escrow_id.as_str(), counterparty).await?;

        let room = match self
            .rooms
            .assign_room(&self.registry, escrow_id.as_str(), self.config.trade.fee_bps)
            .await
        {
            Ok(room) => room,
            Err(e) => {
                db::delete_escrow(&self.db, escrow_id.as_str()).await?;
                return Err(e);
            }
        };

        db::set_escrow_room(&self.db, escrow_id.as_str(), room.group_id, true).await?;

        let link = room.invite_link.as_deref().unwrap_or("<link unavailable>");
        let announce = format!(
            "🤝 Escrow {} opened by @{} with @{}.\n\
             Both parties, join the private room within 5 minutes:\n{}",
            escrow_id, creator.username, counterparty, link
        );
        self.send_ephemeral(escrow_id.as_str(), origin_chat, &announce)
            .await?;

        self.scheduler
            .schedule(escrow_id.as_str(), TimerKind::JoinTimeout);
        metrics::ESCROWS_OPENED.inc();

        info!(escrow_id = %escrow_id, creator = creator.id, counterparty, "Deal created");
        Ok(())
    }

    /// Join requests against a leased room: approve allowlisted users,
    /// decline everyone else, and start role selection once both are in.
    pub async fn handle_join_request(&self, group_id: i64, user: &ChatUser) -> CoordResult<()> {
        let escrow = match db::get_active_escrow_by_group(&self.db, group_id).await? {
            Some(escrow) => escrow,
            None => {
                // Rooms with no live trade admit nobody.
                self.chat.decline_join(group_id, user.id).await?;
                return Ok(());
            }
        };

        let _guard = self.lock_for(&escrow.escrow_id).lock_owned().await;
        let escrow = self.reload(&escrow.escrow_id).await?;

        let approved = self
            .rooms
            .handle_join_request(Some(&escrow), group_id, user.id, &user.username)
            .await?;
        if !approved {
            return Ok(());
        }

        if !escrow.allowed_user_ids.contains(&user.id) {
            db::add_allowed_user(&self.db, &escrow.escrow_id, user.id, &user.username).await?;
        }

        let escrow = self.reload(&escrow.escrow_id).await?;
        if escrow.allowed_user_ids.len() == 2 && escrow.status == EscrowStatus::Draft {
            self.scheduler
                .cancel(&escrow.escrow_id, TimerKind::JoinTimeout);

            let keyboard: Keyboard = vec![vec![
                Button::new("I'm the buyer", cb::ROLE_BUYER),
                Button::new("I'm the seller", cb::ROLE_SELLER),
            ]];
            self.chat
                .send_text(
                    group_id,
                    &format!(
                        "Welcome to escrow {}. Who is buying the crypto?",
                        escrow.escrow_id
                    ),
                    Some(keyboard),
                )
                .await?;
        }
        Ok(())
    }

    // ========================================================================
    // Role selection
    // ========================================================================

    pub async fn handle_role_claim(
        &self,
        group_id: i64,
        user: &ChatUser,
        role: Role,
    ) -> CoordResult<()> {
        let escrow = self.active_escrow(group_id).await?;
        let _guard = self.lock_for(&escrow.escrow_id).lock_owned().await;
        let escrow = self.reload(&escrow.escrow_id).await?;

        if !escrow.is_participant(user.id) {
            return Err(CoordError::Unauthorized);
        }
        if escrow.status != EscrowStatus::Draft {
            return Err(CoordError::Conflict("Roles are already set.".to_string()));
        }
        if let Some(existing) = escrow.role_of(user.id) {
            if existing != role {
                return Err(CoordError::Validation(
                    "You cannot take both roles.".to_string(),
                ));
            }
            return Err(CoordError::Conflict("You already picked that.".to_string()));
        }

        let claimed = match role {
            Role::Buyer => {
                db::claim_buyer(&self.db, &escrow.escrow_id, user.id, &user.username).await?
            }
            Role::Seller => {
                db::claim_seller(&self.db, &escrow.escrow_id, user.id, &user.username).await?
            }
        };

        if !claimed {
            return Err(CoordError::Conflict(
                "That role is already taken.".to_string(),
            ));
        }

        let escrow = self.reload(&escrow.escrow_id).await?;
        if escrow.buyer_id.is_some() && escrow.seller_id.is_some() {
            db::update_escrow_status(&self.db, &escrow.escrow_id, EscrowStatus::AwaitingDetails)
                .await?;
            info!(escrow_id = %escrow.escrow_id, "Both roles chosen, starting wizard");

            let prompt = wizard::prompt_for(TradeStep::Step1Amount);
            self.send_ephemeral(&escrow.escrow_id, group_id, prompt).await?;
        } else {
            self.chat
                .send_text(
                    group_id,
                    &format!("@{} locked in as {}.", user.username, role.as_str()),
                    None,
                )
                .await?;
        }
        Ok(())
    }

    // ========================================================================
    // Wizard
    // ========================================================================

    /// Free text in a trade room: wizard input while details are being
    /// collected, or a transaction hash nudging the deposit watcher.
    pub async fn handle_text(&self, group_id: i64, user: &ChatUser, text: &str) -> CoordResult<()> {
        let escrow = self.active_escrow(group_id).await?;

        match escrow.status {
            EscrowStatus::AwaitingDetails => self.wizard_input(&escrow, group_id, user, text).await,
            EscrowStatus::AwaitingDeposit | EscrowStatus::Deposited
                if looks_like_tx_hash(text) =>
            {
                self.send_ephemeral(
                    &escrow.escrow_id,
                    group_id,
                    "Checking the chain for your deposit…",
                )
                .await?;
                self.check_deposits(&escrow.escrow_id, false).await?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn wizard_input(
        &self,
        escrow: &EscrowRow,
        group_id: i64,
        user: &ChatUser,
        text: &str,
    ) -> CoordResult<()> {
        let _guard = self.lock_for(&escrow.escrow_id).lock_owned().await;
        let escrow = self.reload(&escrow.escrow_id).await?;

        if !escrow.is_participant(user.id) {
            return Err(CoordError::Unauthorized);
        }

        let step = escrow.trade_step;
        match step {
            TradeStep::Step1Amount => {
                let amount = wizard::validate_amount(text, &self.bounds)?;
                db::set_quantity(&self.db, &escrow.escrow_id, &amount).await?;
            }
            TradeStep::Step2Rate => {
                let rate = wizard::validate_rate(text)?;
                db::set_rate(&self.db, &escrow.escrow_id, &rate).await?;
            }
            TradeStep::Step3Payment => {
                let method = wizard::validate_payment_method(text)?;
                db::set_payment_method(&self.db, &escrow.escrow_id, &method).await?;
            }
            TradeStep::Step4ChainCoin => {
                let (chain, token) =
                    wizard::validate_chain_coin(text, &self.registry, self.config.trade.fee_bps)?;
                db::set_chain_coin(
                    &self.db,
                    &escrow.escrow_id,
                    token.as_str(),
                    chain.as_str(),
                    &self.config.trade.fee_percent,
                )
                .await?;
            }
            TradeStep::Step5BuyerAddress => {
                if escrow.role_of(user.id) != Some(Role::Buyer) {
                    return Err(CoordError::Validation(
                        "The buyer enters this address.".to_string(),
                    ));
                }
                let chain = Self::escrow_chain(&escrow)?;
                let address = wizard::validate_address(chain, text)?;
                db::set_buyer_address(&self.db, &escrow.escrow_id, &address).await?;
            }
            TradeStep::Step6SellerAddress => {
                if escrow.role_of(user.id) != Some(Role::Seller) {
                    return Err(CoordError::Validation(
                        "The seller enters this address.".to_string(),
                    ));
                }
                let chain = Self::escrow_chain(&escrow)?;
                let address = wizard::validate_address(chain, text)?;
                db::set_seller_address(&self.db, &escrow.escrow_id, &address).await?;
            }
            TradeStep::Completed => return Ok(()),
        }

        let next = step.next();
        db::set_trade_step(&self.db, &escrow.escrow_id, next).await?;

        if next == TradeStep::Completed {
            let escrow = self.reload(&escrow.escrow_id).await?;
            let summary = render::deal_summary(&escrow);
            let keyboard: Keyboard = vec![vec![Button::new("✅ Approve", cb::APPROVE)]];
            let message_id = self
                .chat
                .send_text(group_id, &summary, Some(keyboard))
                .await?;
            db::set_summary_message(&self.db, &escrow.escrow_id, message_id).await?;
        } else {
            self.send_ephemeral(&escrow.escrow_id, group_id, wizard::prompt_for(next))
                .await?;
        }
        Ok(())
    }

    // ========================================================================
    // Summary approval
    // ========================================================================

    pub async fn handle_approve(&self, group_id: i64, user: &ChatUser) -> CoordResult<()> {
        let escrow = self.active_escrow(group_id).await?;
        let _guard = self.lock_for(&escrow.escrow_id).lock_owned().await;
        let escrow = self.reload(&escrow.escrow_id).await?;

        if escrow.status != EscrowStatus::AwaitingDetails
            || escrow.trade_step != TradeStep::Completed
        {
            return Err(CoordError::Validation(
                "There is no summary awaiting approval.".to_string(),
            ));
        }
        let role = escrow.role_of(user.id).ok_or(CoordError::Unauthorized)?;

        if !db::add_approved_user(&self.db, &escrow.escrow_id, user.id).await? {
            return Err(CoordError::Conflict("Already approved.".to_string()));
        }
        let flag = match role {
            Role::Buyer => ApprovalFlag::BuyerApproved,
            Role::Seller => ApprovalFlag::SellerApproved,
        };
        db::set_approval_flag(&self.db, &escrow.escrow_id, flag).await?;

        let escrow = self.reload(&escrow.escrow_id).await?;

        // Re-render the summary in place so both parties read the same copy.
        if let Some(message_id) = escrow.summary_message_id {
            let keyboard: Keyboard = vec![vec![Button::new("✅ Approve", cb::APPROVE)]];
            let summary = render::deal_summary(&escrow);
            if let Err(e) = self
                .chat
                .edit_text(group_id, message_id, &summary, Some(keyboard))
                .await
            {
                warn!(escrow_id = %escrow.escrow_id, error = %e, "Summary edit failed");
            }
        }

        if escrow.buyer_approved && escrow.seller_approved {
            self.begin_deposit_phase(&escrow, group_id).await?;
        }
        Ok(())
    }

    /// Dual approval reached: resolve the vault, persist the deposit
    /// address, and hand over to the watcher.
    async fn begin_deposit_phase(&self, escrow: &EscrowRow, group_id: i64) -> CoordResult<()> {
        let room = match escrow.group_id {
            Some(room_group) => db::get_room(&self.db, room_group).await?,
            None => None,
        };
        let vault = assign_deposit_address(&self.registry, escrow, room.as_ref())?;

        db::set_deposit_address(&self.db, &escrow.escrow_id, &vault).await?;
        db::update_escrow_status(&self.db, &escrow.escrow_id, EscrowStatus::AwaitingDeposit)
            .await?;

        // Start the scan cursor at the current tip so the watcher never
        // walks history that predates this trade.
        let chain = Self::escrow_chain(escrow)?;
        match self.gateway.latest_block_number(chain).await {
            Ok(latest) => {
                db::record_deposit_totals(&self.db, &escrow.escrow_id, "0", "0", latest as i64)
                    .await?;
            }
            Err(e) => warn!(escrow_id = %escrow.escrow_id, error = %e, "Could not seed scan cursor"),
        }

        let escrow = self.reload(&escrow.escrow_id).await?;
        let instructions = render::deposit_instructions(
            &escrow,
            &vault,
            self.config.trade.deposit_address_ttl_minutes,
        );
        let message_id = self.chat.send_text(group_id, &instructions, None).await?;
        db::set_pinned_message(&self.db, &escrow.escrow_id, message_id).await?;
        if let Err(e) = self.chat.pin_message(group_id, message_id).await {
            warn!(escrow_id = %escrow.escrow_id, error = %e, "Pin failed");
        }

        self.scheduler
            .schedule(&escrow.escrow_id, TimerKind::InactivityTimeout);
        info!(escrow_id = %escrow.escrow_id, vault = %vault, "Awaiting deposit");
        Ok(())
    }

    // ========================================================================
    // Deposit accounting
    // ========================================================================

    /// Scan for vault inflows and credit them. Safe to call from the poll
    /// loop and on demand; the (tx, log index) ledger absorbs replays.
    pub async fn check_deposits(
        &self,
        escrow_id: &str,
        use_explorer: bool,
    ) -> CoordResult<DepositOutcome> {
        let _guard = self.lock_for(escrow_id).lock_owned().await;
        let escrow = self.reload(escrow_id).await?;

        if !escrow.status.accepts_deposits() {
            return Ok(DepositOutcome::None);
        }

        let token = Self::escrow_token(&escrow)?;
        let chain = Self::escrow_chain(&escrow)?;
        let decimals = token_decimals(&token, chain)?;
        let vault = escrow
            .deposit_address
            .clone()
            .ok_or_else(|| CoordError::Internal("no deposit address assigned".to_string()))?;
        let quantity = escrow
            .quantity
            .clone()
            .ok_or_else(|| CoordError::Internal("no quantity agreed".to_string()))?;

        let latest = self.gateway.latest_block_number(chain).await?;
        let from_block = if escrow.last_checked_block > 0 {
            escrow.last_checked_block as u64 + 1
        } else {
            latest.saturating_sub(FRESH_SCAN_LOOKBACK_BLOCKS)
        };

        let ledger = db::list_deposit_events(&self.db, escrow_id).await?;
        let seen: HashSet<(String, u32)> = ledger
            .iter()
            .map(|e| (e.tx_hash.clone(), e.log_index as u32))
            .collect();
        let credited_hashes: HashSet<String> = ledger.into_iter().map(|e| e.tx_hash).collect();

        let mut transfers = self
            .gateway
            .token_transfers_via_rpc(&token, chain, &vault, from_block)
            .await?;

        if use_explorer && chain != Chain::Tron {
            let token_contract = self.gateway.token_directory().address_of(&token, chain)?;
            match self
                .explorer
                .token_transfers(chain, token_contract, &vault, from_block, decimals)
                .await
            {
                // Explorer entries carry no usable log index; they merge by
                // bare transaction hash and never alongside an RPC or
                // ledger observation of the same transfer.
                Ok(extra) => {
                    deposit::merge_explorer_transfers(
                        &mut transfers,
                        extra,
                        &credited_hashes,
                        latest,
                    );
                }
                Err(e) => warn!(escrow_id, error = %e, "Explorer fallback failed"),
            }
        }

        let fresh: Vec<&TokenTransfer> = deposit::new_transfers(&transfers, &seen);
        let newly_credited = deposit::total_of(&fresh)?;

        for transfer in &fresh {
            db::insert_deposit_event(
                &self.db,
                &NewDepositEvent {
                    escrow_id: escrow_id.to_string(),
                    tx_hash: transfer.tx_hash.clone(),
                    log_index: transfer.log_index as i32,
                    from_address: transfer.from.clone(),
                    amount_wei: transfer.value_base_units.to_string(),
                    block_number: transfer.block_number as i64,
                },
            )
            .await?;
            metrics::DEPOSITS_DETECTED
                .with_label_values(&[chain.as_str()])
                .inc();
        }

        if escrow.deposit_from_address.is_none() {
            if let Some(first) = fresh.first() {
                db::set_deposit_from_address(&self.db, escrow_id, &first.from).await?;
            }
        }

        let total_text = db::sum_deposit_events(&self.db, escrow_id).await?;
        let accumulated = U256::from_str_radix(&total_text, 10)
            .map_err(|_| CoordError::Internal("corrupt deposit sum".to_string()))?;
        db::record_deposit_totals(
            &self.db,
            escrow_id,
            &accumulated.to_string(),
            &base_units_to_human(accumulated, decimals),
            latest as i64,
        )
        .await?;

        let expected = human_to_base_units(&quantity, decimals)?;
        let outcome = deposit::evaluate(accumulated, expected);

        let group_id = escrow.group_id.unwrap_or(escrow.origin_chat_id);
        match outcome {
            DepositOutcome::Full if escrow.status == EscrowStatus::AwaitingDeposit => {
                db::update_escrow_status(&self.db, escrow_id, EscrowStatus::Deposited).await?;
                self.scheduler.cancel(escrow_id, TimerKind::InactivityTimeout);

                let escrow = self.reload(escrow_id).await?;
                let keyboard: Keyboard =
                    vec![vec![Button::new("💸 I've sent the fiat", cb::FIAT_SENT)]];
                self.chat
                    .send_text(group_id, &render::deposit_confirmed(&escrow), Some(keyboard))
                    .await?;
                info!(escrow_id, total = %accumulated, "Deposit complete");
            }
            DepositOutcome::Partial
                if !newly_credited.is_zero() && escrow.status == EscrowStatus::AwaitingDeposit =>
            {
                let escrow = self.reload(escrow_id).await?;
                let remaining = deposit::remaining(accumulated, expected);
                let keyboard: Keyboard = vec![vec![
                    Button::new("Continue with received", cb::PARTIAL_CONTINUE),
                    Button::new("I'll pay the rest", cb::PARTIAL_REMAINING),
                ]];
                self.chat
                    .send_text(
                        group_id,
                        &render::partial_deposit_prompt(
                            &escrow,
                            &base_units_to_human(remaining, decimals),
                        ),
                        Some(keyboard),
                    )
                    .await?;
                info!(escrow_id, total = %accumulated, "Partial deposit");
            }
            _ => {}
        }

        Ok(outcome)
    }

    /// Seller resolves a partial deposit: continue with what arrived, or
    /// keep waiting for the remainder.
    pub async fn handle_partial_choice(
        &self,
        group_id: i64,
        user: &ChatUser,
        continue_with_partial: bool,
    ) -> CoordResult<()> {
        let escrow = self.active_escrow(group_id).await?;
        let _guard = self.lock_for(&escrow.escrow_id).lock_owned().await;
        let escrow = self.reload(&escrow.escrow_id).await?;

        if escrow.role_of(user.id) != Some(Role::Seller) {
            return Err(CoordError::Unauthorized);
        }
        if escrow.status != EscrowStatus::AwaitingDeposit {
            return Err(CoordError::Validation(
                "There is no partial deposit to resolve.".to_string(),
            ));
        }
        let accumulated = Self::accumulated_wei(&escrow)?;
        if accumulated.is_zero() {
            return Err(CoordError::Validation(
                "Nothing has arrived yet.".to_string(),
            ));
        }

        if continue_with_partial {
            // The received amount becomes the trade quantity.
            db::snap_quantity_to_deposit(&self.db, &escrow.escrow_id, &escrow.accumulated_deposit)
                .await?;
            db::update_escrow_status(&self.db, &escrow.escrow_id, EscrowStatus::Deposited).await?;
            self.scheduler
                .cancel(&escrow.escrow_id, TimerKind::InactivityTimeout);

            let escrow = self.reload(&escrow.escrow_id).await?;
            let keyboard: Keyboard =
                vec![vec![Button::new("💸 I've sent the fiat", cb::FIAT_SENT)]];
            self.chat
                .send_text(group_id, &render::deposit_confirmed(&escrow), Some(keyboard))
                .await?;
            info!(escrow_id = %escrow.escrow_id, "Continuing with partial deposit");
        } else {
            let token = Self::escrow_token(&escrow)?;
            let chain = Self::escrow_chain(&escrow)?;
            let decimals = token_decimals(&token, chain)?;
            let quantity = escrow.quantity.as_deref().unwrap_or("0");
            let expected = human_to_base_units(quantity, decimals)?;
            let remaining = deposit::remaining(accumulated, expected);
            self.chat
                .send_text(
                    group_id,
                    &format!(
                        "👍 Waiting for the remaining {} {}. Send it to the same vault address.",
                        base_units_to_human(remaining, decimals),
                        token,
                    ),
                    None,
                )
                .await?;
        }
        Ok(())
    }

    // ========================================================================
    // Fiat handshake and release
    // ========================================================================

    pub async fn handle_fiat_sent(&self, group_id: i64, user: &ChatUser) -> CoordResult<()> {
        let escrow = self.active_escrow(group_id).await?;
        let _guard = self.lock_for(&escrow.escrow_id).lock_owned().await;
        let escrow = self.reload(&escrow.escrow_id).await?;

        if escrow.role_of(user.id) != Some(Role::Buyer) {
            return Err(CoordError::Unauthorized);
        }
        if escrow.status != EscrowStatus::Deposited {
            return Err(CoordError::Validation(
                "The deposit is not confirmed yet.".to_string(),
            ));
        }
        if !db::set_approval_flag(&self.db, &escrow.escrow_id, ApprovalFlag::BuyerSentFiat).await? {
            return Err(CoordError::Conflict("Already marked as sent.".to_string()));
        }
        db::update_escrow_status(&self.db, &escrow.escrow_id, EscrowStatus::InFiatTransfer)
            .await?;

        let escrow = self.reload(&escrow.escrow_id).await?;
        let keyboard: Keyboard = vec![vec![Button::new(
            "✅ Fiat received",
            cb::FIAT_RECEIVED,
        )]];
        self.chat
            .send_text(group_id, &render::fiat_sent_notice(&escrow), Some(keyboard))
            .await?;
        Ok(())
    }

    pub async fn handle_fiat_received(&self, group_id: i64, user: &ChatUser) -> CoordResult<()> {
        let escrow = self.active_escrow(group_id).await?;
        let _guard = self.lock_for(&escrow.escrow_id).lock_owned().await;
        let escrow = self.reload(&escrow.escrow_id).await?;

        if escrow.role_of(user.id) != Some(Role::Seller) {
            return Err(CoordError::Unauthorized);
        }
        if escrow.status != EscrowStatus::InFiatTransfer {
            return Err(CoordError::Validation(
                "The buyer has not sent the fiat yet.".to_string(),
            ));
        }
        if !db::set_approval_flag(&self.db, &escrow.escrow_id, ApprovalFlag::SellerReceivedFiat)
            .await?
        {
            return Err(CoordError::Conflict(
                "Already marked as received.".to_string(),
            ));
        }

        let keyboard: Keyboard = vec![vec![Button::new(
            "🔓 Confirm release",
            cb::CONFIRM_RELEASE,
        )]];
        self.chat
            .send_text(group_id, &render::release_confirmation_prompt(), Some(keyboard))
            .await?;
        Ok(())
    }

    pub async fn handle_confirm_release(&self, group_id: i64, user: &ChatUser) -> CoordResult<()> {
        let escrow = self.active_escrow(group_id).await?;
        let _guard = self.lock_for(&escrow.escrow_id).lock_owned().await;
        let escrow = self.reload(&escrow.escrow_id).await?;

        if escrow.status != EscrowStatus::InFiatTransfer || !escrow.seller_received_fiat {
            return Err(CoordError::Validation(
                "Release confirmation is not open yet.".to_string(),
            ));
        }
        let role = escrow.role_of(user.id).ok_or(CoordError::Unauthorized)?;
        let flag = match role {
            Role::Buyer => ApprovalFlag::BuyerConfirmedRelease,
            Role::Seller => ApprovalFlag::SellerConfirmedRelease,
        };
        if !db::set_approval_flag(&self.db, &escrow.escrow_id, flag).await? {
            return Err(CoordError::Conflict("Already confirmed.".to_string()));
        }

        let escrow = self.reload(&escrow.escrow_id).await?;
        if escrow.buyer_confirmed_release && escrow.seller_confirmed_release {
            // Persist the transition before touching the chain so a crash
            // replays the release instead of re-running the handshake.
            db::update_escrow_status(&self.db, &escrow.escrow_id, EscrowStatus::ReadyToRelease)
                .await?;
            let escrow = self.reload(&escrow.escrow_id).await?;
            self.perform_release(&escrow, group_id).await?;
        } else {
            self.chat
                .send_text(
                    group_id,
                    &format!("@{} confirmed. Waiting for the other party…", user.username),
                    None,
                )
                .await?;
        }
        Ok(())
    }

    /// Submit the release. The accumulated base units override the human
    /// amount so partial trades release exactly what was deposited.
    async fn perform_release(&self, escrow: &EscrowRow, group_id: i64) -> CoordResult<()> {
        let token = Self::escrow_token(escrow)?;
        let chain = Self::escrow_chain(escrow)?;
        let vault = escrow
            .deposit_address
            .clone()
            .ok_or_else(|| CoordError::Internal("no vault assigned".to_string()))?;
        let buyer_address = escrow
            .buyer_address
            .clone()
            .ok_or_else(|| CoordError::Internal("no buyer address".to_string()))?;
        let accumulated = Self::accumulated_wei(escrow)?;
        let quantity = escrow.quantity.clone().unwrap_or_default();

        // Replay path: a stored hash means the call already went out once.
        if let Some(prior_hash) = &escrow.release_tx_hash {
            match self.gateway.transaction_succeeded(chain, prior_hash).await? {
                Some(true) => {
                    self.finish_release(escrow, group_id, prior_hash).await?;
                    return Ok(());
                }
                Some(false) => {
                    warn!(escrow_id = %escrow.escrow_id, tx = %prior_hash, "Stored release reverted, resubmitting");
                }
                None => {
                    info!(escrow_id = %escrow.escrow_id, tx = %prior_hash, "Release still pending on-chain");
                    return Ok(());
                }
            }
        }

        match self
            .gateway
            .release_funds(&token, chain, &vault, &buyer_address, &quantity, Some(accumulated))
            .await
        {
            Ok(receipt) => {
                db::set_release_tx_hash(&self.db, &escrow.escrow_id, &receipt.transaction_hash)
                    .await?;
                self.finish_release(escrow, group_id, &receipt.transaction_hash)
                    .await?;
                Ok(())
            }
            Err(e) => {
                // Completed is never written without a receipt; the escrow
                // stays ready_to_release for a retry or the admin.
                metrics::RELEASES_SUBMITTED
                    .with_label_values(&[chain.as_str(), "failed"])
                    .inc();
                error!(escrow_id = %escrow.escrow_id, error = %e, "Release failed");
                self.chat
                    .send_text(group_id, &render::release_failed_notice(), None)
                    .await?;
                Ok(())
            }
        }
    }

    async fn finish_release(
        &self,
        escrow: &EscrowRow,
        group_id: i64,
        tx_hash: &str,
    ) -> CoordResult<()> {
        db::update_escrow_status(&self.db, &escrow.escrow_id, EscrowStatus::Completed).await?;
        let chain = Self::escrow_chain(escrow)?;
        metrics::RELEASES_SUBMITTED
            .with_label_values(&[chain.as_str(), "confirmed"])
            .inc();
        metrics::ESCROWS_COMPLETED.inc();

        let escrow = self.reload(&escrow.escrow_id).await?;

        // The vault deducts its fee on-chain from the released amount; the
        // receipt shows the same arithmetic so nobody has to read the chain.
        let token = Self::escrow_token(&escrow)?;
        let decimals = token_decimals(&token, chain)?;
        let accumulated = Self::accumulated_wei(&escrow)?;
        let fee_bps = match escrow.fee_percent.as_deref() {
            Some(percent) => fee_percent_to_bps(percent)?,
            None => 0,
        };
        let fee_human = base_units_to_human(deposit::fee_on(accumulated, fee_bps), decimals);

        let keyboard: Keyboard = vec![vec![Button::new("🏁 Close trade", cb::CLOSE)]];
        self.chat
            .send_text(
                group_id,
                &render::release_success(&escrow, tx_hash, &fee_human),
                Some(keyboard),
            )
            .await?;
        info!(escrow_id = %escrow.escrow_id, tx_hash, "Escrow completed");
        Ok(())
    }

    // ========================================================================
    // Close, cancel, restart
    // ========================================================================

    /// One close click from buyer, seller, or the admin arms the recycle
    /// grace timer. Completed trades never roll back.
    pub async fn handle_close(&self, group_id: i64, user: &ChatUser) -> CoordResult<()> {
        let escrow = db::get_latest_escrow_by_group(&self.db, group_id)
            .await?
            .ok_or_else(|| CoordError::NotFound("No escrow in this room.".to_string()))?;
        let _guard = self.lock_for(&escrow.escrow_id).lock_owned().await;
        let escrow = self.reload(&escrow.escrow_id).await?;

        if !matches!(
            escrow.status,
            EscrowStatus::Completed | EscrowStatus::Refunded
        ) {
            return Err(CoordError::Validation(
                "The trade is not finished yet.".to_string(),
            ));
        }

        let is_party = escrow.role_of(user.id).is_some();
        if !is_party && !self.is_admin(user) {
            return Err(CoordError::Unauthorized);
        }

        if let Some(role) = escrow.role_of(user.id) {
            let flag = match role {
                Role::Buyer => ApprovalFlag::BuyerClosedTrade,
                Role::Seller => ApprovalFlag::SellerClosedTrade,
            };
            let _ = db::set_approval_flag(&self.db, &escrow.escrow_id, flag).await?;
        }

        self.scheduler
            .schedule(&escrow.escrow_id, TimerKind::RecycleGrace);
        self.chat
            .send_text(
                group_id,
                "🧹 Thanks! This room will be recycled shortly — save your receipts now.",
                None,
            )
            .await?;
        Ok(())
    }

    pub async fn handle_cancel(&self, group_id: i64, user: &ChatUser) -> CoordResult<()> {
        let escrow = self.active_escrow(group_id).await?;
        let _guard = self.lock_for(&escrow.escrow_id).lock_owned().await;
        let escrow = self.reload(&escrow.escrow_id).await?;

        if !escrow.is_participant(user.id) && !self.is_admin(user) {
            return Err(CoordError::Unauthorized);
        }
        if !matches!(
            escrow.status,
            EscrowStatus::Draft | EscrowStatus::AwaitingDetails
        ) {
            return Err(CoordError::Validation(
                "A funded trade cannot be cancelled — open a /dispute.".to_string(),
            ));
        }

        self.cancel_escrow(&escrow, "cancelled by a participant").await
    }

    async fn cancel_escrow(&self, escrow: &EscrowRow, reason: &str) -> CoordResult<()> {
        db::update_escrow_status(&self.db, &escrow.escrow_id, EscrowStatus::Cancelled).await?;
        self.scheduler.cancel_all(&escrow.escrow_id);
        metrics::ESCROWS_CANCELLED.inc();

        let note = render::cancelled_notice(&escrow.escrow_id, reason);
        if let Some(group_id) = escrow.group_id {
            self.send_ephemeral(&escrow.escrow_id, group_id, &note).await?;
        }
        self.send_ephemeral(&escrow.escrow_id, escrow.origin_chat_id, &note)
            .await?;

        // The room goes back through the normal recycle path.
        self.scheduler
            .schedule(&escrow.escrow_id, TimerKind::RecycleGrace);
        info!(escrow_id = %escrow.escrow_id, reason, "Escrow cancelled");
        Ok(())
    }

    /// Reset the wizard before any deposit: terms and approvals are wiped,
    /// the cursor returns to step one.
    pub async fn handle_restart(&self, group_id: i64, user: &ChatUser) -> CoordResult<()> {
        let escrow = self.active_escrow(group_id).await?;
        let _guard = self.lock_for(&escrow.escrow_id).lock_owned().await;
        let escrow = self.reload(&escrow.escrow_id).await?;

        if !escrow.is_participant(user.id) {
            return Err(CoordError::Unauthorized);
        }
        if escrow.status != EscrowStatus::AwaitingDetails {
            return Err(CoordError::Validation(
                "Details can only be restarted before the deposit.".to_string(),
            ));
        }

        db::reset_trade_details(&self.db, &escrow.escrow_id).await?;
        self.send_ephemeral(
            &escrow.escrow_id,
            group_id,
            wizard::prompt_for(TradeStep::Step1Amount),
        )
        .await?;
        info!(escrow_id = %escrow.escrow_id, "Wizard restarted");
        Ok(())
    }

    // ========================================================================
    // Admin operations
    // ========================================================================

    /// Admin refund of whatever accumulated, back to the seller address.
    pub async fn handle_refund(&self, group_id: i64, user: &ChatUser) -> CoordResult<()> {
        if !self.is_admin(user) {
            return Err(CoordError::Unauthorized);
        }
        let escrow = self.active_escrow(group_id).await?;
        let _guard = self.lock_for(&escrow.escrow_id).lock_owned().await;
        let escrow = self.reload(&escrow.escrow_id).await?;

        let accumulated = Self::accumulated_wei(&escrow)?;
        if accumulated.is_zero() {
            return Err(CoordError::Validation(
                "Nothing is deposited, use /cancel instead.".to_string(),
            ));
        }
        let seller_address = escrow.seller_address.clone().ok_or_else(|| {
            CoordError::Validation("No seller address on record to refund to.".to_string())
        })?;

        let token = Self::escrow_token(&escrow)?;
        let chain = Self::escrow_chain(&escrow)?;
        let vault = escrow
            .deposit_address
            .clone()
            .ok_or_else(|| CoordError::Internal("no vault assigned".to_string()))?;
        let quantity = escrow.quantity.clone().unwrap_or_default();

        match self
            .gateway
            .refund_funds(&token, chain, &vault, &seller_address, &quantity, Some(accumulated))
            .await
        {
            Ok(receipt) => {
                db::set_refund_tx_hash(&self.db, &escrow.escrow_id, &receipt.transaction_hash)
                    .await?;
                db::update_escrow_status(&self.db, &escrow.escrow_id, EscrowStatus::Refunded)
                    .await?;
                self.scheduler.cancel_all(&escrow.escrow_id);
                metrics::REFUNDS_SUBMITTED
                    .with_label_values(&[chain.as_str(), "confirmed"])
                    .inc();

                let escrow = self.reload(&escrow.escrow_id).await?;
                let keyboard: Keyboard = vec![vec![Button::new("🏁 Close trade", cb::CLOSE)]];
                self.chat
                    .send_text(
                        group_id,
                        &render::refund_success(&escrow, &receipt.transaction_hash),
                        Some(keyboard),
                    )
                    .await?;
                info!(escrow_id = %escrow.escrow_id, "Escrow refunded");
                Ok(())
            }
            Err(e) => {
                metrics::REFUNDS_SUBMITTED
                    .with_label_values(&[chain.as_str(), "failed"])
                    .inc();
                error!(escrow_id = %escrow.escrow_id, error = %e, "Refund failed");
                Err(e)
            }
        }
    }

    /// Admin `/release [amount|all]`: force the release path, bypassing the
    /// confirmation buttons. A specific amount sweeps part of the vault
    /// without closing the trade.
    pub async fn handle_release_command(
        &self,
        group_id: i64,
        user: &ChatUser,
        arg: Option<&str>,
    ) -> CoordResult<()> {
        if !self.is_admin(user) {
            return Err(CoordError::Unauthorized);
        }
        let escrow = self.active_escrow(group_id).await?;
        let _guard = self.lock_for(&escrow.escrow_id).lock_owned().await;
        let escrow = self.reload(&escrow.escrow_id).await?;

        let accumulated = Self::accumulated_wei(&escrow)?;
        if accumulated.is_zero() {
            return Err(CoordError::Validation("The vault is empty.".to_string()));
        }

        match arg {
            None | Some("all") => {
                db::update_escrow_status(&self.db, &escrow.escrow_id, EscrowStatus::ReadyToRelease)
                    .await?;
                let escrow = self.reload(&escrow.escrow_id).await?;
                self.perform_release(&escrow, group_id).await
            }
            Some(amount) => {
                let token = Self::escrow_token(&escrow)?;
                let chain = Self::escrow_chain(&escrow)?;
                let decimals = token_decimals(&token, chain)?;
                let base = human_to_base_units(amount, decimals)?;
                if base > accumulated {
                    return Err(CoordError::Validation(format!(
                        "Only {} is held in escrow.",
                        escrow.accumulated_deposit
                    )));
                }
                let vault = escrow
                    .deposit_address
                    .clone()
                    .ok_or_else(|| CoordError::Internal("no vault assigned".to_string()))?;
                let buyer_address = escrow
                    .buyer_address
                    .clone()
                    .ok_or_else(|| CoordError::Internal("no buyer address".to_string()))?;

                let receipt = self
                    .gateway
                    .release_funds(&token, chain, &vault, &buyer_address, amount, Some(base))
                    .await?;
                self.chat
                    .send_text(
                        group_id,
                        &format!(
                            "🔓 Released {} {} to the buyer.\nTransaction: `{}`",
                            amount, token, receipt.transaction_hash
                        ),
                        None,
                    )
                    .await?;
                Ok(())
            }
        }
    }

    // ========================================================================
    // Informational commands
    // ========================================================================

    pub async fn handle_balance(&self, group_id: i64) -> CoordResult<String> {
        let escrow = self.active_escrow(group_id).await?;
        let token = Self::escrow_token(&escrow)?;
        let chain = Self::escrow_chain(&escrow)?;
        let vault = escrow
            .deposit_address
            .as_deref()
            .ok_or_else(|| CoordError::Validation("No vault assigned yet.".to_string()))?;

        let balance = self.gateway.token_balance(&token, chain, vault).await?;
        Ok(format!(
            "{}\nVault balance: {} {}",
            render::status_line(&escrow),
            balance,
            token
        ))
    }

    pub async fn handle_verify(&self, address: &str) -> String {
        match self.registry.find_by_address(address.trim()) {
            Some(contract) => format!(
                "✅ {} is a deployed escrow vault: {} on {} at {}% fee.",
                contract.address, contract.token, contract.chain, contract.fee_percent
            ),
            None => "❌ That address is not one of our escrow vaults.".to_string(),
        }
    }

    pub async fn handle_dispute(
        &self,
        group_id: i64,
        user: &ChatUser,
        reason: &str,
    ) -> CoordResult<()> {
        let escrow = self.active_escrow(group_id).await?;
        if !escrow.is_participant(user.id) {
            return Err(CoordError::Unauthorized);
        }
        let reason = if reason.trim().is_empty() {
            "no reason given"
        } else {
            reason.trim()
        };

        let note = render::dispute_notice(
            &escrow.escrow_id,
            &user.username,
            reason,
            &self.config.telegram.admin_username,
        );
        self.chat.send_text(group_id, &note, None).await?;
        self.chat
            .send_text(self.config.telegram.main_group_id, &note, None)
            .await?;
        metrics::DISPUTES_OPENED.inc();
        warn!(escrow_id = %escrow.escrow_id, user = user.id, reason, "Dispute opened");
        Ok(())
    }

    pub async fn handle_stats(&self) -> CoordResult<String> {
        let escrows = db::count_escrows_by_status(&self.db).await?;
        let rooms = db::count_rooms_by_status(&self.db).await?;
        Ok(render::stats_text(&escrows, &rooms))
    }

    pub async fn handle_leaderboard(&self) -> CoordResult<String> {
        let standings = db::leaderboard(&self.db, 10).await?;
        Ok(render::leaderboard_text(&standings))
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Timer dispatch. Never propagates: a timer callback that fails logs
    /// and exits.
    pub async fn handle_timer(&self, fired: TimerFired) {
        let result = match fired.kind {
            TimerKind::JoinTimeout => self.on_join_timeout(&fired.escrow_id).await,
            TimerKind::MessageTtl => self.on_message_ttl(&fired).await,
            TimerKind::InactivityTimeout => self.on_inactivity_timeout(&fired.escrow_id).await,
            TimerKind::RecycleGrace => self.on_recycle_grace(&fired.escrow_id).await,
        };
        if let Err(e) = result {
            error!(
                escrow_id = %fired.escrow_id,
                kind = fired.kind.as_str(),
                error = %e,
                "Timer handler failed"
            );
        }
    }

    async fn on_join_timeout(&self, escrow_id: &str) -> CoordResult<()> {
        let _guard = self.lock_for(escrow_id).lock_owned().await;
        let Some(escrow) = db::get_escrow(&self.db, escrow_id).await? else {
            return Ok(());
        };
        if escrow.status != EscrowStatus::Draft || escrow.allowed_user_ids.len() == 2 {
            return Ok(());
        }

        info!(escrow_id, "Join window elapsed, cancelling deal");
        self.send_ephemeral(
            escrow_id,
            escrow.origin_chat_id,
            &render::cancelled_notice(escrow_id, "both parties did not join in time"),
        )
        .await?;

        if let Some(group_id) = escrow.group_id {
            if let Some(room) = db::get_room(&self.db, group_id).await? {
                self.rooms.recycle(&room, &escrow).await?;
            }
        }
        self.scheduler.cancel_all(escrow_id);
        db::delete_escrow(&self.db, escrow_id).await?;
        metrics::ESCROWS_CANCELLED.inc();
        Ok(())
    }

    async fn on_message_ttl(&self, fired: &TimerFired) -> CoordResult<()> {
        if let (Some(chat_id), Some(message_id)) = (fired.chat_id, fired.message_id) {
            // Already-deleted messages are fine.
            if let Err(e) = self.chat.delete_message(chat_id, message_id).await {
                warn!(chat_id, message_id, error = %e, "TTL delete failed");
            }
        }
        Ok(())
    }

    async fn on_inactivity_timeout(&self, escrow_id: &str) -> CoordResult<()> {
        let _guard = self.lock_for(escrow_id).lock_owned().await;
        let Some(escrow) = db::get_escrow(&self.db, escrow_id).await? else {
            return Ok(());
        };
        if escrow.status != EscrowStatus::AwaitingDeposit {
            return Ok(());
        }

        let accumulated = Self::accumulated_wei(&escrow)?;
        if accumulated.is_zero() {
            info!(escrow_id, "No deposit within the window, releasing the room");
            self.cancel_escrow(&escrow, "no deposit arrived within the window")
                .await
        } else {
            // Funds are in the vault; never auto-cancel past that point.
            if let Some(group_id) = escrow.group_id {
                self.chat
                    .send_text(
                        group_id,
                        &format!(
                            "⏰ Escrow {} has been idle for a while. @{} can step in if needed.",
                            escrow.escrow_id, self.config.telegram.admin_username
                        ),
                        None,
                    )
                    .await?;
            }
            Ok(())
        }
    }

    async fn on_recycle_grace(&self, escrow_id: &str) -> CoordResult<()> {
        let Some(escrow) = db::get_escrow(&self.db, escrow_id).await? else {
            return Ok(());
        };
        let Some(group_id) = escrow.group_id else {
            return Ok(());
        };
        let Some(room) = db::get_room(&self.db, group_id).await? else {
            return Ok(());
        };
        self.rooms.recycle(&room, &escrow).await
    }

    // ========================================================================
    // Restart recovery
    // ========================================================================

    /// Rebuild timers from persisted escrow state after a restart.
    pub async fn reconstruct_timers(&self) -> CoordResult<()> {
        for escrow in db::get_escrows_by_status(&self.db, EscrowStatus::Draft).await? {
            self.scheduler
                .schedule(&escrow.escrow_id, TimerKind::JoinTimeout);
        }
        for escrow in db::get_escrows_by_status(&self.db, EscrowStatus::AwaitingDeposit).await? {
            self.scheduler
                .schedule(&escrow.escrow_id, TimerKind::InactivityTimeout);
        }
        for status in [EscrowStatus::Completed, EscrowStatus::Refunded] {
            for escrow in db::get_escrows_by_status(&self.db, status).await? {
                if let Some(group_id) = escrow.group_id {
                    if let Some(room) = db::get_room(&self.db, group_id).await? {
                        if room.assigned_escrow_id.as_deref() == Some(escrow.escrow_id.as_str()) {
                            self.scheduler
                                .schedule(&escrow.escrow_id, TimerKind::RecycleGrace);
                        }
                    }
                }
            }
        }
        info!("Timers reconstructed from escrow state");
        Ok(())
    }

    /// Re-drive releases that were submitted but not yet observed mined
    /// when the process stopped.
    pub async fn resume_pending_releases(&self) -> CoordResult<()> {
        for escrow in db::get_escrows_by_status(&self.db, EscrowStatus::ReadyToRelease).await? {
            let group_id = escrow.group_id.unwrap_or(escrow.origin_chat_id);
            info!(escrow_id = %escrow.escrow_id, "Resuming pending release");
            let _guard = self.lock_for(&escrow.escrow_id).lock_owned().await;
            if let Err(e) = self.perform_release(&escrow, group_id).await {
                error!(escrow_id = %escrow.escrow_id, error = %e, "Release resume failed");
            }
        }
        Ok(())
    }
}

/// A 64-hex-char string, with or without the 0x prefix.
fn looks_like_tx_hash(text: &str) -> bool {
    let body = text.trim().trim_start_matches("0x");
    body.len() == 64 && body.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looks_like_tx_hash() {
        let evm = format!("0x{}", "ab".repeat(32));
        let tron = "cd".repeat(32);
        assert!(looks_like_tx_hash(&evm));
        assert!(looks_like_tx_hash(&tron));
        assert!(!looks_like_tx_hash("0x1234"));
        assert!(!looks_like_tx_hash("hello"));
        assert!(!looks_like_tx_hash(&"zz".repeat(32)));
    }

    #[test]
    fn test_callback_values_are_distinct() {
        let values = [
            cb::ROLE_BUYER,
            cb::ROLE_SELLER,
            cb::APPROVE,
            cb::FIAT_SENT,
            cb::FIAT_RECEIVED,
            cb::CONFIRM_RELEASE,
            cb::PARTIAL_CONTINUE,
            cb::PARTIAL_REMAINING,
            cb::CLOSE,
        ];
        let unique: std::collections::HashSet<_> = values.iter().collect();
        assert_eq!(unique.len(), values.len());
    }
}
