use std::time::Duration;

use async_trait::async_trait;
use erratum_contracts::{
    BotCommand, ButtonPress, ChatId, ChatInfo, ChatKind, InboundEvent, InboundMessage,
    InlineButton, Keyboard, MessageRef, OutboundMessage, ParseMode, Sender, UserId,
};
use erratum_kernel::parse_command;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::transport::{Transport, TransportError};

/// Extra head room on top of the long-poll timeout before the HTTP client
/// gives up on a `getUpdates` call.
const POLL_GRACE_SECS: u64 = 10;

/// Telegram Bot API client. Every method is a JSON POST to
/// `{api_base}/bot{token}/{method}` answered with an `ok`/`result` envelope.
#[derive(Clone)]
pub struct TelegramClient {
    http: Client,
    endpoint: String,
}

/// One `getUpdates` response. Updates that fail to decode are skipped but
/// still move `next_offset` past them.
#[derive(Debug)]
pub struct UpdateBatch {
    pub next_offset: i64,
    pub updates: Vec<Update>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramClient {
    pub fn new(api_base: &str, token: &str, poll_timeout_secs: u64) -> Result<Self, TransportError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(poll_timeout_secs + POLL_GRACE_SECS))
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T, TransportError> {
        let response = self
            .http
            .post(format!("{}/{method}", self.endpoint))
            .json(&body)
            .send()
            .await
            // reqwest errors carry the URL, which carries the token.
            .map_err(|e| TransportError::Http(e.without_url().to_string()))?;
        let status = response.status();
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(format!("{method}: {}", e.without_url())))?;
        if !envelope.ok {
            return Err(TransportError::Api {
                code: envelope
                    .error_code
                    .unwrap_or_else(|| i64::from(status.as_u16())),
                description: envelope.description.unwrap_or_default(),
            });
        }
        envelope
            .result
            .ok_or_else(|| TransportError::Decode(format!("{method}: missing result")))
    }

    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<UpdateBatch, TransportError> {
        let raw: Vec<Value> = self
            .call(
                "getUpdates",
                json!({
                    "offset": offset,
                    "timeout": timeout_secs,
                    "allowed_updates": ["message", "callback_query"],
                }),
            )
            .await?;
        Ok(decode_updates(offset, raw))
    }

    /// The bot's own username, used to tell its commands apart in groups.
    pub async fn get_me(&self) -> Result<String, TransportError> {
        let me: TgUser = self.call("getMe", json!({})).await?;
        me.username
            .ok_or_else(|| TransportError::Decode("getMe: bot has no username".to_string()))
    }

    pub async fn set_webhook(&self, url: &str, secret: &str) -> Result<(), TransportError> {
        let _: bool = self
            .call(
                "setWebhook",
                json!({
                    "url": url,
                    "secret_token": secret,
                    "allowed_updates": ["message", "callback_query"],
                }),
            )
            .await?;
        Ok(())
    }

    /// Long polling is refused by the API while a webhook is registered.
    pub async fn delete_webhook(&self) -> Result<(), TransportError> {
        let _: bool = self.call("deleteWebhook", json!({})).await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for TelegramClient {
    async fn send_message(&self, message: &OutboundMessage) -> Result<MessageRef, TransportError> {
        let sent: TgMessage = self.call("sendMessage", send_message_body(message)).await?;
        Ok(sent.reference())
    }

    async fn forward_message(
        &self,
        source: MessageRef,
        to: ChatId,
        thread_id: Option<i64>,
    ) -> Result<(), TransportError> {
        let mut body = json!({
            "chat_id": to.0,
            "from_chat_id": source.chat_id.0,
            "message_id": source.message_id,
        });
        if let Some(thread_id) = thread_id {
            body["message_thread_id"] = json!(thread_id);
        }
        let _: TgMessage = self.call("forwardMessage", body).await?;
        Ok(())
    }

    async fn delete_message(&self, target: MessageRef) -> Result<(), TransportError> {
        let _: bool = self
            .call(
                "deleteMessage",
                json!({"chat_id": target.chat_id.0, "message_id": target.message_id}),
            )
            .await?;
        Ok(())
    }

    async fn edit_message_text(
        &self,
        target: MessageRef,
        text: &str,
    ) -> Result<(), TransportError> {
        // Result is the edited message, or `true` for inline messages.
        let _: Value = self
            .call(
                "editMessageText",
                json!({
                    "chat_id": target.chat_id.0,
                    "message_id": target.message_id,
                    "text": text,
                }),
            )
            .await?;
        Ok(())
    }

    async fn answer_callback(&self, query_id: &str) -> Result<(), TransportError> {
        let _: bool = self
            .call("answerCallbackQuery", json!({"callback_query_id": query_id}))
            .await?;
        Ok(())
    }

    async fn get_chat(&self, chat_id: ChatId) -> Result<ChatInfo, TransportError> {
        let chat: TgChat = self.call("getChat", json!({"chat_id": chat_id.0})).await?;
        Ok(chat.into_info())
    }

    async fn set_commands(&self, commands: &[BotCommand]) -> Result<(), TransportError> {
        let _: bool = self
            .call("setMyCommands", json!({"commands": commands}))
            .await?;
        Ok(())
    }
}

fn decode_updates(offset: i64, raw: Vec<Value>) -> UpdateBatch {
    let mut batch = UpdateBatch {
        next_offset: offset,
        updates: Vec::with_capacity(raw.len()),
    };
    for value in raw {
        let update_id = value.get("update_id").and_then(Value::as_i64);
        if let Some(id) = update_id {
            batch.next_offset = batch.next_offset.max(id + 1);
        }
        match serde_json::from_value::<Update>(value) {
            Ok(update) => batch.updates.push(update),
            Err(e) => warn!(?update_id, error = %e, "skipping undecodable update"),
        }
    }
    batch
}

fn send_message_body(message: &OutboundMessage) -> Value {
    let mut body = Map::new();
    body.insert("chat_id".into(), json!(message.chat_id.0));
    body.insert("text".into(), json!(message.text));
    if message.parse_mode == ParseMode::Html {
        body.insert("parse_mode".into(), json!("HTML"));
    }
    if let Some(thread_id) = message.thread_id {
        body.insert("message_thread_id".into(), json!(thread_id));
    }
    if let Some(reply_to) = message.reply_to {
        body.insert(
            "reply_parameters".into(),
            json!({"message_id": reply_to, "allow_sending_without_reply": true}),
        );
    }
    if message.silent {
        body.insert("disable_notification".into(), json!(true));
    }
    if message.disable_link_preview {
        body.insert("link_preview_options".into(), json!({"is_disabled": true}));
    }
    if let Some(keyboard) = &message.keyboard {
        body.insert("reply_markup".into(), reply_markup(keyboard));
    }
    Value::Object(body)
}

fn reply_markup(keyboard: &Keyboard) -> Value {
    match keyboard {
        Keyboard::Inline { rows } => {
            let rows: Vec<Vec<Value>> = rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|button| match button {
                            InlineButton::Callback { label, data } => {
                                json!({"text": label, "callback_data": data})
                            }
                            InlineButton::Url { label, url } => json!({"text": label, "url": url}),
                        })
                        .collect()
                })
                .collect();
            json!({ "inline_keyboard": rows })
        }
        Keyboard::Menu { rows } => {
            let rows: Vec<Vec<Value>> = rows
                .iter()
                .map(|row| row.iter().map(|label| json!({ "text": label })).collect())
                .collect();
            json!({
                "keyboard": rows,
                "resize_keyboard": true,
                "is_persistent": true,
            })
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    message: Option<TgMessage>,
    #[serde(default)]
    callback_query: Option<TgCallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
struct TgMessage {
    message_id: i64,
    #[serde(default)]
    from: Option<TgUser>,
    chat: TgChat,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    caption: Option<String>,
}

impl TgMessage {
    fn reference(&self) -> MessageRef {
        MessageRef {
            chat_id: ChatId(self.chat.id),
            message_id: self.message_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TgUser {
    id: i64,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    username: Option<String>,
}

impl From<TgUser> for Sender {
    fn from(user: TgUser) -> Self {
        Sender {
            id: UserId(user.id),
            first_name: user.first_name,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TgChat {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

impl TgChat {
    fn chat_kind(&self) -> ChatKind {
        match self.kind.as_str() {
            "group" => ChatKind::Group,
            "supergroup" => ChatKind::Supergroup,
            "channel" => ChatKind::Channel,
            _ => ChatKind::Private,
        }
    }

    fn into_info(self) -> ChatInfo {
        let full_name = match (self.first_name.as_deref(), self.last_name.as_deref()) {
            (Some(first), Some(last)) => Some(format!("{first} {last}")),
            (Some(first), None) => Some(first.to_string()),
            (None, Some(last)) => Some(last.to_string()),
            (None, None) => None,
        };
        ChatInfo {
            id: ChatId(self.id),
            kind: self.chat_kind(),
            title: self.title,
            full_name,
            username: self.username,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TgCallbackQuery {
    id: String,
    from: TgUser,
    #[serde(default)]
    data: Option<String>,
    /// May be an inaccessible message; only `chat` and `message_id` are used.
    #[serde(default)]
    message: Option<TgMessage>,
}

impl Update {
    /// Converts the update into a routed event. Updates of other kinds, and
    /// messages without a sender, yield `None`.
    pub fn into_event(self) -> Option<InboundEvent> {
        if let Some(query) = self.callback_query {
            return Some(InboundEvent::Button(ButtonPress {
                query_id: query.id,
                sender: query.from.into(),
                data: query.data.unwrap_or_default(),
                message: query.message.as_ref().map(TgMessage::reference),
            }));
        }
        let message = self.message?;
        let Some(from) = message.from.clone() else {
            debug!(update_id = self.update_id, "dropping message without sender");
            return None;
        };
        let inbound = InboundMessage {
            reference: message.reference(),
            sender: from.into(),
            chat_kind: message.chat.chat_kind(),
            text: message.text,
            caption: message.caption,
        };
        match inbound.text.as_deref().and_then(parse_command) {
            Some(command) => Some(InboundEvent::Command {
                command,
                message: inbound,
            }),
            None => Some(InboundEvent::Message(inbound)),
        }
    }
}
