//! Inbound event routing
//!
//! Maps commands, callbacks, join requests, and free text onto the state
//! machine, and applies the reply policy per error kind: validation-style
//! failures get a short reply, unauthorized callbacks get a silent
//! acknowledgment, internal failures get a generic note and a log line.

use std::sync::Arc;
use tracing::{debug, error};

use crate::chat::{ChatApi, ChatEvent, ChatUser};
use crate::db::Role;
use crate::error::{CoordError, CoordResult};
use crate::escrow::{cb, EscrowService};

pub struct EventRouter {
    service: Arc<EscrowService>,
    chat: Arc<dyn ChatApi>,
}

impl EventRouter {
    pub fn new(service: Arc<EscrowService>, chat: Arc<dyn ChatApi>) -> Self {
        EventRouter { service, chat }
    }

    pub async fn handle(&self, event: ChatEvent) {
        match event {
            ChatEvent::CommandReceived {
                command,
                args,
                user,
                room,
            } => {
                let result = self.dispatch_command(&command, &args, &user, room).await;
                self.reply_on_error(room, result).await;
            }
            ChatEvent::CallbackReceived {
                data,
                user,
                room,
                callback_id,
                ..
            } => {
                let result = self.dispatch_callback(&data, &user, room).await;
                self.answer_callback(&callback_id, result).await;
            }
            ChatEvent::JoinRequest { user, room } => {
                if let Err(e) = self.service.handle_join_request(room, &user).await {
                    error!(room, user_id = user.id, error = %e, "Join request handling failed");
                }
            }
            ChatEvent::MessageReceived {
                text, user, room, ..
            } => {
                match self.service.handle_text(room, &user, &text).await {
                    Ok(()) => {}
                    // Free text in rooms without a live trade is just chatter.
                    Err(CoordError::NotFound(_)) => {}
                    Err(e) => self.reply_on_error(room, Err(e)).await,
                }
            }
        }
    }

    async fn dispatch_command(
        &self,
        command: &str,
        args: &[String],
        user: &ChatUser,
        room: i64,
    ) -> CoordResult<()> {
        debug!(command, user_id = user.id, room, "Command received");
        match command {
            "deal" => {
                let counterparty = args.first().map(String::as_str).unwrap_or("");
                self.service.create_deal(user, counterparty, room).await
            }
            "release" => {
                let arg = args.first().map(String::as_str);
                self.service.handle_release_command(room, user, arg).await
            }
            "refund" => self.service.handle_refund(room, user).await,
            "cancel" => self.service.handle_cancel(room, user).await,
            "restart" => self.service.handle_restart(room, user).await,
            "dispute" => {
                let reason = args.join(" ");
                self.service.handle_dispute(room, user, &reason).await
            }
            "balance" => {
                let text = self.service.handle_balance(room).await?;
                self.chat.send_text(room, &text, None).await?;
                Ok(())
            }
            "verify" => {
                let address = args.first().map(String::as_str).unwrap_or("");
                if address.is_empty() {
                    return Err(CoordError::Validation(
                        "Usage: /verify <vault address>".to_string(),
                    ));
                }
                let text = self.service.handle_verify(address).await;
                self.chat.send_text(room, &text, None).await?;
                Ok(())
            }
            "stats" => {
                let text = self.service.handle_stats().await?;
                self.chat.send_text(room, &text, None).await?;
                Ok(())
            }
            "leaderboard" => {
                let text = self.service.handle_leaderboard().await?;
                self.chat.send_text(room, &text, None).await?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn dispatch_callback(&self, data: &str, user: &ChatUser, room: i64) -> CoordResult<()> {
        debug!(data, user_id = user.id, room, "Callback received");
        match data {
            cb::ROLE_BUYER => self.service.handle_role_claim(room, user, Role::Buyer).await,
            cb::ROLE_SELLER => {
                self.service
                    .handle_role_claim(room, user, Role::Seller)
                    .await
            }
            cb::APPROVE => self.service.handle_approve(room, user).await,
            cb::FIAT_SENT => self.service.handle_fiat_sent(room, user).await,
            cb::FIAT_RECEIVED => self.service.handle_fiat_received(room, user).await,
            cb::CONFIRM_RELEASE => self.service.handle_confirm_release(room, user).await,
            cb::PARTIAL_CONTINUE => self.service.handle_partial_choice(room, user, true).await,
            cb::PARTIAL_REMAINING => self.service.handle_partial_choice(room, user, false).await,
            cb::CLOSE => self.service.handle_close(room, user).await,
            _ => Ok(()),
        }
    }

    /// Command/message error policy: reply with the short user message when
    /// there is one, stay silent otherwise. State was not mutated.
    async fn reply_on_error(&self, room: i64, result: CoordResult<()>) {
        let Err(e) = result else { return };

        if matches!(e, CoordError::Internal(_) | CoordError::TransientChain(_)) {
            error!(room, error = %e, "Command failed");
        }

        let message = e.user_message();
        if !message.is_empty() {
            if let Err(send_err) = self.chat.send_text(room, &message, None).await {
                error!(room, error = %send_err, "Could not deliver error reply");
            }
        }
    }

    /// Callback error policy: always acknowledge the callback; unauthorized
    /// presses get an empty (silent) acknowledgment.
    async fn answer_callback(&self, callback_id: &str, result: CoordResult<()>) {
        let text = match &result {
            Ok(()) => None,
            Err(CoordError::Unauthorized) => None,
            Err(e) => {
                if matches!(e, CoordError::Internal(_) | CoordError::TransientChain(_)) {
                    error!(error = %e, "Callback failed");
                }
                let message = e.user_message();
                if message.is_empty() {
                    None
                } else {
                    Some(message)
                }
            }
        };

        if let Err(e) = self.chat.answer_callback(callback_id, text.as_deref()).await {
            error!(error = %e, "Could not answer callback");
        }
    }
}
