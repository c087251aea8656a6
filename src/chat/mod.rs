//! Chat platform boundary
//!
//! The adapter is deliberately dumb: it sends, edits, deletes, and manages
//! membership, and it surfaces inbound events. It never touches escrow
//! state; all decisions live behind this trait.

#![allow(dead_code)]

pub mod telegram;

use async_trait::async_trait;

use crate::error::CoordResult;

/// One inline keyboard button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub callback_data: String,
}

impl Button {
    pub fn new(text: &str, callback_data: &str) -> Self {
        Button {
            text: text.to_string(),
            callback_data: callback_data.to_string(),
        }
    }
}

/// Rows of inline buttons attached to a message.
pub type Keyboard = Vec<Vec<Button>>;

/// The user behind an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatUser {
    pub id: i64,
    pub username: String,
}

/// Inbound events from the platform, already shaped for routing.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    CommandReceived {
        command: String,
        args: Vec<String>,
        user: ChatUser,
        room: i64,
    },
    CallbackReceived {
        data: String,
        user: ChatUser,
        room: i64,
        message_id: i64,
        callback_id: String,
    },
    JoinRequest {
        user: ChatUser,
        room: i64,
    },
    MessageReceived {
        text: String,
        user: ChatUser,
        room: i64,
        reply_to: Option<i64>,
    },
}

/// Narrow outbound surface consumed by the coordinator.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Send a text message; returns the new message id.
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        buttons: Option<Keyboard>,
    ) -> CoordResult<i64>;

    /// Send a photo with caption; returns the new message id.
    async fn send_photo(
        &self,
        chat_id: i64,
        image_ref: &str,
        caption: &str,
        buttons: Option<Keyboard>,
    ) -> CoordResult<i64>;

    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        buttons: Option<Keyboard>,
    ) -> CoordResult<()>;

    async fn edit_caption(
        &self,
        chat_id: i64,
        message_id: i64,
        caption: &str,
        buttons: Option<Keyboard>,
    ) -> CoordResult<()>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> CoordResult<()>;

    async fn pin_message(&self, chat_id: i64, message_id: i64) -> CoordResult<()>;

    async fn unpin_message(&self, chat_id: i64, message_id: i64) -> CoordResult<()>;

    /// Acknowledge a callback query (optionally with a toast).
    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> CoordResult<()>;

    async fn approve_join(&self, chat_id: i64, user_id: i64) -> CoordResult<()>;

    async fn decline_join(&self, chat_id: i64, user_id: i64) -> CoordResult<()>;

    /// Remove a member so they can rejoin via a future invite link.
    async fn kick(&self, chat_id: i64, user_id: i64) -> CoordResult<()>;

    /// Mint an invite link that requires join approval.
    async fn create_invite_link(&self, chat_id: i64) -> CoordResult<String>;

    async fn revoke_invite_link(&self, chat_id: i64, link: &str) -> CoordResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_construction() {
        let button = Button::new("Approve", "approve:buyer");
        assert_eq!(button.text, "Approve");
        assert_eq!(button.callback_data, "approve:buyer");
    }
}
