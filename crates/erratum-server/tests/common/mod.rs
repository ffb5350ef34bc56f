#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use erratum_config::{
    Config, Limits, Monitoring, Notices, RegistryEntry, Server, Telegram, Webhook,
};
use erratum_contracts::{
    BotCommand, ButtonPress, ChatId, ChatInfo, ChatKind, InboundEvent, InboundMessage, MessageRef,
    OutboundMessage, Sender, UserId,
};
use erratum_kernel::parse_command;
use erratum_server::notices::EphemeralNotices;
use erratum_server::router::ReportRouter;
use erratum_server::transport::{Transport, TransportError};

pub const ADMIN: i64 = 1001;
pub const READER: i64 = 2002;
pub const FEED: i64 = -1009000;
pub const FEED_TOPIC: i64 = 7;
pub const TRANSLATOR_A: i64 = -1001111;
pub const TRANSLATOR_B: i64 = -1002222;
pub const WEBHOOK_SECRET: &str = "hook-secret_1";
pub const BOT_USERNAME: &str = "erratum_bot";

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Send(OutboundMessage),
    Forward {
        source: MessageRef,
        to: ChatId,
        thread_id: Option<i64>,
    },
    Delete(MessageRef),
    Edit {
        target: MessageRef,
        text: String,
    },
    Answer(String),
    GetChat(ChatId),
    SetCommands(usize),
}

/// What one chat received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Text(String),
    Forwarded(i64),
}

pub struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<ChatId>>,
    chats: Mutex<HashMap<ChatId, ChatInfo>>,
    next_message_id: AtomicI64,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            chats: Mutex::new(HashMap::new()),
            next_message_id: AtomicI64::new(5000),
        })
    }

    pub fn fail_chat(&self, chat_id: i64) {
        self.failing.lock().unwrap().insert(ChatId(chat_id));
    }

    pub fn add_chat(&self, info: ChatInfo) {
        self.chats.lock().unwrap().insert(info.id, info);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sent_to(&self, chat_id: i64) -> Vec<OutboundMessage> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Send(message) if message.chat_id == ChatId(chat_id) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn texts_to(&self, chat_id: i64) -> Vec<String> {
        self.sent_to(chat_id).into_iter().map(|m| m.text).collect()
    }

    pub fn deliveries_to(&self, chat_id: i64) -> Vec<Delivery> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Send(message) if message.chat_id == ChatId(chat_id) => {
                    Some(Delivery::Text(message.text))
                }
                Call::Forward { source, to, .. } if to == ChatId(chat_id) => {
                    Some(Delivery::Forwarded(source.message_id))
                }
                _ => None,
            })
            .collect()
    }

    pub fn forward_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Forward { .. }))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, chat_id: ChatId) -> Result<(), TransportError> {
        if self.failing.lock().unwrap().contains(&chat_id) {
            return Err(TransportError::Api {
                code: 403,
                description: "Forbidden: bot was kicked".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_message(&self, message: &OutboundMessage) -> Result<MessageRef, TransportError> {
        self.record(Call::Send(message.clone()));
        self.check(message.chat_id)?;
        Ok(MessageRef {
            chat_id: message.chat_id,
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
        })
    }

    async fn forward_message(
        &self,
        source: MessageRef,
        to: ChatId,
        thread_id: Option<i64>,
    ) -> Result<(), TransportError> {
        self.record(Call::Forward {
            source,
            to,
            thread_id,
        });
        self.check(to)
    }

    async fn delete_message(&self, target: MessageRef) -> Result<(), TransportError> {
        self.record(Call::Delete(target));
        Ok(())
    }

    async fn edit_message_text(
        &self,
        target: MessageRef,
        text: &str,
    ) -> Result<(), TransportError> {
        self.record(Call::Edit {
            target,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn answer_callback(&self, query_id: &str) -> Result<(), TransportError> {
        self.record(Call::Answer(query_id.to_string()));
        Ok(())
    }

    async fn get_chat(&self, chat_id: ChatId) -> Result<ChatInfo, TransportError> {
        self.record(Call::GetChat(chat_id));
        self.chats
            .lock()
            .unwrap()
            .get(&chat_id)
            .cloned()
            .ok_or_else(|| TransportError::Api {
                code: 400,
                description: "Bad Request: chat not found".to_string(),
            })
    }

    async fn set_commands(&self, commands: &[BotCommand]) -> Result<(), TransportError> {
        self.record(Call::SetCommands(commands.len()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotices {
    scheduled: Mutex<Vec<(MessageRef, Duration)>>,
}

impl RecordingNotices {
    pub fn scheduled(&self) -> Vec<(MessageRef, Duration)> {
        self.scheduled.lock().unwrap().clone()
    }
}

impl EphemeralNotices for RecordingNotices {
    fn schedule_deletion(&self, target: MessageRef, after: Duration) {
        self.scheduled.lock().unwrap().push((target, after));
    }
}

fn entry(code: &str, label: &str, destination: i64) -> RegistryEntry {
    RegistryEntry {
        code: code.to_string(),
        label: label.to_string(),
        destination,
    }
}

/// Cooldown 0 so flows are never throttled; long TTLs so nothing is deleted
/// while a test runs.
pub fn test_config() -> Config {
    Config {
        server: Server {
            listen_addr: "127.0.0.1:0".to_string(),
        },
        telegram: Telegram {
            api_base: "http://127.0.0.1:9".to_string(),
            token_env: "ERRATUM_TEST_TOKEN".to_string(),
            mode: "polling".to_string(),
            poll_timeout_secs: 1,
            webhook: None,
        },
        admins: vec![ADMIN],
        monitoring: Some(Monitoring {
            chat_id: FEED,
            topic_id: FEED_TOPIC,
        }),
        limits: Limits { cooldown_secs: 0 },
        notices: Notices {
            ack_ttl_secs: 15,
            done_ttl_secs: 10,
            cancel_ttl_secs: 7,
        },
        registry: vec![
            entry("aptch", "A Place to Call Home", TRANSLATOR_A),
            entry("dbw", "Dragon Bone Warrior", TRANSLATOR_A),
            entry("ssr", "Silver Sword Road", TRANSLATOR_B),
            entry("repeat", "Repeat", 0),
        ],
    }
}

pub fn webhook_config() -> Config {
    let mut cfg = test_config();
    cfg.telegram.mode = "webhook".to_string();
    cfg.telegram.webhook = Some(Webhook {
        public_url: "https://bot.example.org".to_string(),
        secret: WEBHOOK_SECRET.to_string(),
    });
    cfg
}

pub struct Harness {
    pub transport: Arc<RecordingTransport>,
    pub notices: Arc<RecordingNotices>,
    pub router: ReportRouter,
}

pub fn harness(cfg: Config) -> Harness {
    let transport = RecordingTransport::new();
    let notices = Arc::new(RecordingNotices::default());
    let router = ReportRouter::from_config(&cfg, transport.clone())
        .expect("router")
        .with_notices(notices.clone())
        .with_bot_username(BOT_USERNAME);
    Harness {
        transport,
        notices,
        router,
    }
}

fn sender(user: i64) -> Sender {
    Sender {
        id: UserId(user),
        first_name: format!("user{user}"),
    }
}

pub fn inbound(user: i64, chat: i64, message_id: i64, text: &str) -> InboundMessage {
    InboundMessage {
        reference: MessageRef {
            chat_id: ChatId(chat),
            message_id,
        },
        sender: sender(user),
        chat_kind: if chat > 0 {
            ChatKind::Private
        } else {
            ChatKind::Supergroup
        },
        text: Some(text.to_string()),
        caption: None,
    }
}

pub fn command(user: i64, chat: i64, message_id: i64, text: &str) -> InboundEvent {
    InboundEvent::Command {
        command: parse_command(text).expect("command text"),
        message: inbound(user, chat, message_id, text),
    }
}

pub fn text(user: i64, chat: i64, message_id: i64, text: &str) -> InboundEvent {
    InboundEvent::Message(inbound(user, chat, message_id, text))
}

pub fn button(user: i64, chat: i64, menu_id: i64, data: &str) -> InboundEvent {
    InboundEvent::Button(ButtonPress {
        query_id: format!("q-{user}-{menu_id}"),
        sender: sender(user),
        data: data.to_string(),
        message: Some(MessageRef {
            chat_id: ChatId(chat),
            message_id: menu_id,
        }),
    })
}
