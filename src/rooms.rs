//! Room pool manager
//!
//! Leases pre-provisioned private rooms to trades and takes them back.
//! Assignment is an atomic compare-and-swap on the room row (the only
//! cross-escrow synchronization point); invite links are ephemeral and
//! always minted with join approval required. A room that cannot be
//! cleaned after a trade is quarantined instead of returned to the pool.

#![allow(dead_code)]

use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::chat::ChatApi;
use crate::db::{self, EscrowRow, RoomRow};
use crate::error::{CoordError, CoordResult};
use crate::registry::ContractRegistry;

pub struct RoomPool {
    db: PgPool,
    chat: Arc<dyn ChatApi>,
}

impl RoomPool {
    pub fn new(db: PgPool, chat: Arc<dyn ChatApi>) -> Self {
        RoomPool { db, chat }
    }

    /// Lease one available room to an escrow, preferring rooms whose pinned
    /// vaults match the required fee tier. Mints a fresh invite link before
    /// handing the room out.
    pub async fn assign_room(
        &self,
        registry: &ContractRegistry,
        escrow_id: &str,
        required_fee_bps: u32,
    ) -> CoordResult<RoomRow> {
        let preferred = registry.rooms_pinned_for_tier(required_fee_bps);

        let Some(mut room) = db::claim_available_room(&self.db, escrow_id, &preferred).await?
        else {
            return Err(CoordError::ResourceExhausted(
                "ROOMS_EXHAUSTED: no private room is free right now, try again later".to_string(),
            ));
        };

        info!(
            group_id = room.group_id,
            escrow_id,
            fee_bps = required_fee_bps,
            "Room leased"
        );

        // If no link can be minted the lease is useless; undo the claim.
        match self.refresh_invite_link(&room).await {
            Ok(link) => {
                room.invite_link = Some(link);
                Ok(room)
            }
            Err(e) => {
                db::release_room(&self.db, room.group_id).await?;
                Err(e)
            }
        }
    }

    /// Revoke the previous invite link and mint a new one requiring join
    /// approval. The room's identity is permanent; only the link rotates.
    pub async fn refresh_invite_link(&self, room: &RoomRow) -> CoordResult<String> {
        if let Some(old_link) = &room.invite_link {
            if let Err(e) = self.chat.revoke_invite_link(room.group_id, old_link).await {
                // A link already revoked upstream is not worth failing over.
                warn!(group_id = room.group_id, error = %e, "Failed to revoke old invite link");
            }
        }

        let link = self.chat.create_invite_link(room.group_id).await?;
        db::set_room_invite_link(&self.db, room.group_id, &link).await?;
        Ok(link)
    }

    /// Approve a join request when the user is on the escrow's allowlist,
    /// decline otherwise. Declining unknown joiners is the default.
    pub async fn handle_join_request(
        &self,
        escrow: Option<&EscrowRow>,
        group_id: i64,
        user_id: i64,
        username: &str,
    ) -> CoordResult<bool> {
        let allowed = escrow
            .map(|e| {
                e.allowed_user_ids.contains(&user_id)
                    || e.allowed_usernames
                        .iter()
                        .any(|u| u.eq_ignore_ascii_case(username))
            })
            .unwrap_or(false);

        if allowed {
            self.chat.approve_join(group_id, user_id).await?;
            info!(group_id, user_id, "Join request approved");
        } else {
            self.chat.decline_join(group_id, user_id).await?;
            warn!(group_id, user_id, username, "Join request declined");
        }
        Ok(allowed)
    }

    /// Kick both participants out of the room. Returns whether everyone was
    /// removed cleanly.
    pub async fn remove_all_users(&self, room: &RoomRow, escrow: &EscrowRow) -> bool {
        let mut all_removed = true;
        for user_id in &escrow.allowed_user_ids {
            if let Err(e) = self.chat.kick(room.group_id, *user_id).await {
                warn!(
                    group_id = room.group_id,
                    user_id, error = %e,
                    "Failed to remove user from room"
                );
                all_removed = false;
            }
        }
        all_removed
    }

    /// Return a room to the pool after its trade ended. Called after the
    /// post-trade grace delay. If eviction fails the room is quarantined
    /// for manual intervention instead of going back into rotation.
    pub async fn recycle(&self, room: &RoomRow, escrow: &EscrowRow) -> CoordResult<()> {
        let clean = self.remove_all_users(room, escrow).await;

        if !clean {
            db::quarantine_room(&self.db, room.group_id).await?;
            warn!(group_id = room.group_id, "Room quarantined after failed eviction");
            return Ok(());
        }

        db::release_room(&self.db, room.group_id).await?;

        // Rotate the link so evicted members cannot re-enter with the old one.
        match db::get_room(&self.db, room.group_id).await? {
            Some(fresh) => {
                self.refresh_invite_link(&fresh).await?;
            }
            None => {
                return Err(CoordError::Internal(format!(
                    "room {} vanished during recycle",
                    room.group_id
                )))
            }
        }

        info!(group_id = room.group_id, escrow_id = %escrow.escrow_id, "Room recycled");
        Ok(())
    }

    pub async fn get_room(&self, group_id: i64) -> CoordResult<Option<RoomRow>> {
        Ok(db::get_room(&self.db, group_id).await?)
    }
}
