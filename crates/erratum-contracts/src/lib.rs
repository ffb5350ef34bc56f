use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of the person sending an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

/// A conversation the bot can read from or deliver into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Report destination of an entity. `0` is the "none configured" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Destination(pub i64);

impl Destination {
    pub fn chat(self) -> Option<ChatId> {
        if self.0 == 0 {
            None
        } else {
            Some(ChatId(self.0))
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub code: String,
    pub label: String,
    pub destination: Destination,
}

/// Points at a message that already exists on the transport side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: UserId,
    pub first_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
            ChatKind::Supergroup => "supergroup",
            ChatKind::Channel => "channel",
        }
    }
}

/// A user message as received. Never mutated, only read and forwarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub reference: MessageRef,
    pub sender: Sender,
    pub chat_kind: ChatKind,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

impl InboundMessage {
    pub fn chat_id(&self) -> ChatId {
        self.reference.chat_id
    }

    /// Text if present, otherwise the media caption, otherwise empty.
    pub fn body(&self) -> &str {
        self.text
            .as_deref()
            .or(self.caption.as_deref())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInvocation {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Bot named after `@` in group chats, as typed.
    #[serde(default)]
    pub addressee: Option<String>,
}

impl CommandInvocation {
    /// True when the command names a bot other than `own_username`. An
    /// addressed command is foreign while the own username is unknown.
    pub fn is_for_another_bot(&self, own_username: Option<&str>) -> bool {
        match (self.addressee.as_deref(), own_username) {
            (None, _) => false,
            (Some(addressee), Some(own)) => !addressee.eq_ignore_ascii_case(own),
            (Some(_), None) => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonPress {
    pub query_id: String,
    pub sender: Sender,
    pub data: String,
    /// Message carrying the pressed keyboard, when the transport still has it.
    #[serde(default)]
    pub message: Option<MessageRef>,
}

impl ButtonPress {
    pub fn origin(&self) -> ChatId {
        self.message
            .map(|m| m.chat_id)
            .unwrap_or(ChatId(self.sender.id.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundEvent {
    Command {
        command: CommandInvocation,
        message: InboundMessage,
    },
    Button(ButtonPress),
    Message(InboundMessage),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InlineButton {
    Callback { label: String, data: String },
    Url { label: String, url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Keyboard {
    Inline { rows: Vec<Vec<InlineButton>> },
    Menu { rows: Vec<Vec<String>> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    Plain,
    Html,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub chat_id: ChatId,
    pub text: String,
    #[serde(default)]
    pub thread_id: Option<i64>,
    #[serde(default)]
    pub reply_to: Option<i64>,
    pub parse_mode: ParseMode,
    #[serde(default)]
    pub silent: bool,
    #[serde(default)]
    pub disable_link_preview: bool,
    #[serde(default)]
    pub keyboard: Option<Keyboard>,
}

impl OutboundMessage {
    pub fn plain(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            thread_id: None,
            reply_to: None,
            parse_mode: ParseMode::Plain,
            silent: false,
            disable_link_preview: false,
            keyboard: None,
        }
    }

    pub fn html(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            parse_mode: ParseMode::Html,
            disable_link_preview: true,
            ..Self::plain(chat_id, text)
        }
    }

    pub fn in_thread(mut self, thread_id: Option<i64>) -> Self {
        self.thread_id = thread_id;
        self
    }

    pub fn replying_to(mut self, message_id: i64) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}

/// Display metadata of a destination, as resolved by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInfo {
    pub id: ChatId,
    pub kind: ChatKind,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl ChatInfo {
    pub fn display_name(&self) -> Option<&str> {
        self.title
            .as_deref()
            .or(self.full_name.as_deref())
            .or(self.username.as_deref())
            .filter(|v| !v.trim().is_empty())
    }

    /// Shareable link: public username first, then a user deep link for private chats.
    pub fn link(&self) -> Option<String> {
        if let Some(username) = self.username.as_deref().filter(|v| !v.is_empty()) {
            return Some(format!("https://t.me/{username}"));
        }
        if self.kind == ChatKind::Private && self.id.0 > 0 {
            return Some(format!("tg://user?id={}", self.id.0));
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BotCommand {
    pub command: &'static str,
    pub description: &'static str,
}

/// Outcome of delivering one report into one sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SinkOutcome {
    /// No destination configured for this sink.
    Skipped,
    Delivered { forwarded: usize },
    Partial { forwarded: usize, failed: usize },
}

impl SinkOutcome {
    pub fn failed(&self) -> bool {
        matches!(self, SinkOutcome::Partial { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub primary: SinkOutcome,
    pub monitoring: SinkOutcome,
}

impl DispatchResult {
    /// The aggregate signal shown to the reporting user. Monitoring
    /// failures never count here.
    pub fn any_failed(&self) -> bool {
        self.primary.failed()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastOutcome {
    pub sent: usize,
    pub failed: usize,
}
