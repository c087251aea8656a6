//! Telegram Bot API client
//!
//! Thin reqwest wrapper over the Bot HTTP API. Outbound calls implement the
//! `ChatApi` trait; inbound updates arrive through the long-poll loop in
//! `UpdatePoller` and are shaped into `ChatEvent`s. No escrow logic here.

#![allow(dead_code)]

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::chat::{ChatApi, ChatEvent, ChatUser, Keyboard};
use crate::error::{CoordError, CoordResult};

const LONG_POLL_TIMEOUT_SECS: u64 = 30;

pub struct TelegramApi {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramApi {
    pub fn new(bot_token: &str) -> Self {
        TelegramApi {
            client: reqwest::Client::new(),
            base_url: format!("https://api.telegram.org/bot{}", bot_token),
        }
    }

    async fn call(&self, method: &str, payload: Value) -> CoordResult<Value> {
        let url = format!("{}/{}", self.base_url, method);
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .timeout(Duration::from_secs(LONG_POLL_TIMEOUT_SECS + 10))
            .send()
            .await
            .map_err(|e| CoordError::Internal(format!("telegram {}: {}", method, e)))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| CoordError::Internal(format!("telegram {} decode: {}", method, e)))?;

        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            let description = body
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(CoordError::Internal(format!(
                "telegram {} failed: {}",
                method, description
            )));
        }

        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    fn keyboard_markup(buttons: Option<Keyboard>) -> Value {
        match buttons {
            Some(rows) => json!({
                "inline_keyboard": rows
                    .iter()
                    .map(|row| {
                        row.iter()
                            .map(|b| json!({"text": b.text, "callback_data": b.callback_data}))
                            .collect::<Vec<_>>()
                    })
                    .collect::<Vec<_>>()
            }),
            None => Value::Null,
        }
    }

    fn message_id_of(result: &Value) -> CoordResult<i64> {
        result
            .get("message_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| CoordError::Internal("telegram reply missing message_id".to_string()))
    }
}

#[async_trait]
impl ChatApi for TelegramApi {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        buttons: Option<Keyboard>,
    ) -> CoordResult<i64> {
        let mut payload = json!({"chat_id": chat_id, "text": text});
        let markup = Self::keyboard_markup(buttons);
        if !markup.is_null() {
            payload["reply_markup"] = markup;
        }
        let result = self.call("sendMessage", payload).await?;
        Self::message_id_of(&result)
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        image_ref: &str,
        caption: &str,
        buttons: Option<Keyboard>,
    ) -> CoordResult<i64> {
        let mut payload = json!({"chat_id": chat_id, "photo": image_ref, "caption": caption});
        let markup = Self::keyboard_markup(buttons);
        if !markup.is_null() {
            payload["reply_markup"] = markup;
        }
        let result = self.call("sendPhoto", payload).await?;
        Self::message_id_of(&result)
    }

    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        buttons: Option<Keyboard>,
    ) -> CoordResult<()> {
        let mut payload = json!({"chat_id": chat_id, "message_id": message_id, "text": text});
        let markup = Self::keyboard_markup(buttons);
        if !markup.is_null() {
            payload["reply_markup"] = markup;
        }
        self.call("editMessageText", payload).await?;
        Ok(())
    }

    async fn edit_caption(
        &self,
        chat_id: i64,
        message_id: i64,
        caption: &str,
        buttons: Option<Keyboard>,
    ) -> CoordResult<()> {
        let mut payload =
            json!({"chat_id": chat_id, "message_id": message_id, "caption": caption});
        let markup = Self::keyboard_markup(buttons);
        if !markup.is_null() {
            payload["reply_markup"] = markup;
        }
        self.call("editMessageCaption", payload).await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> CoordResult<()> {
        self.call(
            "deleteMessage",
            json!({"chat_id": chat_id, "message_id": message_id}),
        )
        .await?;
        Ok(())
    }

    async fn pin_message(&self, chat_id: i64, message_id: i64) -> CoordResult<()> {
        self.call(
            "pinChatMessage",
            json!({"chat_id": chat_id, "message_id": message_id, "disable_notification": true}),
        )
        .await?;
        Ok(())
    }

    async fn unpin_message(&self, chat_id: i64, message_id: i64) -> CoordResult<()> {
        self.call(
            "unpinChatMessage",
            json!({"chat_id": chat_id, "message_id": message_id}),
        )
        .await?;
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> CoordResult<()> {
        let mut payload = json!({"callback_query_id": callback_id});
        if let Some(text) = text {
            payload["text"] = json!(text);
        }
        self.call("answerCallbackQuery", payload).await?;
        Ok(())
    }

    async fn approve_join(&self, chat_id: i64, user_id: i64) -> CoordResult<()> {
        self.call(
            "approveChatJoinRequest",
            json!({"chat_id": chat_id, "user_id": user_id}),
        )
        .await?;
        Ok(())
    }

    async fn decline_join(&self, chat_id: i64, user_id: i64) -> CoordResult<()> {
        self.call(
            "declineChatJoinRequest",
            json!({"chat_id": chat_id, "user_id": user_id}),
        )
        .await?;
        Ok(())
    }

    async fn kick(&self, chat_id: i64, user_id: i64) -> CoordResult<()> {
        // Ban then unban: the member is out but can return through a fresh
        // invite link later.
        self.call(
            "banChatMember",
            json!({"chat_id": chat_id, "user_id": user_id}),
        )
        .await?;
        self.call(
            "unbanChatMember",
            json!({"chat_id": chat_id, "user_id": user_id, "only_if_banned": true}),
        )
        .await?;
        Ok(())
    }

    async fn create_invite_link(&self, chat_id: i64) -> CoordResult<String> {
        let result = self
            .call(
                "createChatInviteLink",
                json!({"chat_id": chat_id, "creates_join_request": true}),
            )
            .await?;
        result
            .get("invite_link")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .ok_or_else(|| CoordError::Internal("no invite_link in reply".to_string()))
    }

    async fn revoke_invite_link(&self, chat_id: i64, link: &str) -> CoordResult<()> {
        self.call(
            "revokeChatInviteLink",
            json!({"chat_id": chat_id, "invite_link": link}),
        )
        .await?;
        Ok(())
    }
}

// ============================================================================
// Inbound long-poll
// ============================================================================

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    callback_query: Option<CallbackQuery>,
    #[serde(default)]
    chat_join_request: Option<ChatJoinRequest>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    #[serde(default)]
    from: Option<User>,
    chat: TgChat,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    reply_to_message: Option<Box<Message>>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    from: User,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatJoinRequest {
    chat: TgChat,
    from: User,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
}

impl User {
    fn to_chat_user(&self) -> ChatUser {
        ChatUser {
            id: self.id,
            username: self
                .username
                .clone()
                .or_else(|| self.first_name.clone())
                .unwrap_or_else(|| self.id.to_string()),
        }
    }
}

/// Long-polls getUpdates and feeds shaped events into the dispatch loop.
pub struct UpdatePoller {
    client: reqwest::Client,
    base_url: String,
}

impl UpdatePoller {
    pub fn new(bot_token: &str) -> Self {
        UpdatePoller {
            client: reqwest::Client::new(),
            base_url: format!("https://api.telegram.org/bot{}", bot_token),
        }
    }

    pub async fn run(
        &self,
        tx: mpsc::Sender<ChatEvent>,
        mut shutdown: mpsc::Receiver<()>,
    ) -> eyre::Result<()> {
        info!("Telegram update poller started");
        let mut offset: i64 = 0;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Update poller shutting down");
                    return Ok(());
                }
                batch = self.fetch_updates(offset) => {
                    match batch {
                        Ok(updates) => {
                            for update in updates {
                                offset = offset.max(update.update_id + 1);
                                for event in shape_update(update) {
                                    if tx.send(event).await.is_err() {
                                        return Ok(());
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "getUpdates failed, backing off");
                            tokio::time::sleep(Duration::from_secs(3)).await;
                        }
                    }
                }
            }
        }
    }

    async fn fetch_updates(&self, offset: i64) -> CoordResult<Vec<Update>> {
        let url = format!("{}/getUpdates", self.base_url);
        let payload = json!({
            "offset": offset,
            "timeout": LONG_POLL_TIMEOUT_SECS,
            "allowed_updates": ["message", "callback_query", "chat_join_request"],
        });

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .timeout(Duration::from_secs(LONG_POLL_TIMEOUT_SECS + 10))
            .send()
            .await
            .map_err(|e| CoordError::Internal(format!("getUpdates: {}", e)))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| CoordError::Internal(format!("getUpdates decode: {}", e)))?;

        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            return Err(CoordError::Internal("getUpdates returned not-ok".to_string()));
        }

        serde_json::from_value(
            body.get("result")
                .cloned()
                .unwrap_or_else(|| Value::Array(Vec::new())),
        )
        .map_err(|e| CoordError::Internal(format!("getUpdates parse: {}", e)))
    }
}

/// Turn one raw update into zero or more events.
fn shape_update(update: Update) -> Vec<ChatEvent> {
    let mut events = Vec::new();

    if let Some(message) = update.message {
        if let (Some(from), Some(text)) = (&message.from, &message.text) {
            let user = from.to_chat_user();
            if let Some(stripped) = text.strip_prefix('/') {
                let mut parts = stripped.split_whitespace();
                if let Some(head) = parts.next() {
                    // "/deal@MyBot" addresses this bot specifically.
                    let command = head.split('@').next().unwrap_or(head).to_lowercase();
                    events.push(ChatEvent::CommandReceived {
                        command,
                        args: parts.map(|s| s.to_string()).collect(),
                        user,
                        room: message.chat.id,
                    });
                }
            } else {
                events.push(ChatEvent::MessageReceived {
                    text: text.clone(),
                    user,
                    room: message.chat.id,
                    reply_to: message.reply_to_message.as_ref().map(|m| m.message_id),
                });
            }
        }
    }

    if let Some(callback) = update.callback_query {
        if let (Some(message), Some(data)) = (&callback.message, &callback.data) {
            events.push(ChatEvent::CallbackReceived {
                data: data.clone(),
                user: callback.from.to_chat_user(),
                room: message.chat.id,
                message_id: message.message_id,
                callback_id: callback.id.clone(),
            });
        }
    }

    if let Some(join) = update.chat_join_request {
        events.push(ChatEvent::JoinRequest {
            user: join.from.to_chat_user(),
            room: join.chat.id,
        });
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_command_with_bot_suffix() {
        let update: Update = serde_json::from_value(json!({
            "update_id": 7,
            "message": {
                "message_id": 1,
                "from": {"id": 100, "username": "alice"},
                "chat": {"id": -500},
                "text": "/deal@EscrowBot @bob"
            }
        }))
        .unwrap();

        let events = shape_update(update);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ChatEvent::CommandReceived {
                command,
                args,
                user,
                room,
            } => {
                assert_eq!(command, "deal");
                assert_eq!(args, &vec!["@bob".to_string()]);
                assert_eq!(user.id, 100);
                assert_eq!(*room, -500);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_shape_plain_message() {
        let update: Update = serde_json::from_value(json!({
            "update_id": 8,
            "message": {
                "message_id": 2,
                "from": {"id": 200, "first_name": "Bob"},
                "chat": {"id": -500},
                "text": "100.5"
            }
        }))
        .unwrap();

        let events = shape_update(update);
        match &events[0] {
            ChatEvent::MessageReceived { text, user, .. } => {
                assert_eq!(text, "100.5");
                // Falls back to first name when no username exists.
                assert_eq!(user.username, "Bob");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_shape_callback_and_join() {
        let update: Update = serde_json::from_value(json!({
            "update_id": 9,
            "callback_query": {
                "id": "cbq1",
                "from": {"id": 300, "username": "carol"},
                "message": {"message_id": 3, "chat": {"id": -600}},
                "data": "role:buyer"
            },
            "chat_join_request": {
                "chat": {"id": -600},
                "from": {"id": 400, "username": "dave"}
            }
        }))
        .unwrap();

        let events = shape_update(update);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ChatEvent::CallbackReceived { .. }));
        assert!(matches!(events[1], ChatEvent::JoinRequest { .. }));
    }

    #[test]
    fn test_shape_ignores_empty_update() {
        let update: Update = serde_json::from_value(json!({"update_id": 10})).unwrap();
        assert!(shape_update(update).is_empty());
    }
}
