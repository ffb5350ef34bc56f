use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use erratum_config::Config;
use erratum_contracts::{
    ChatId, ChatInfo, Destination, Entity, InboundEvent, InboundMessage, MessageRef,
    OutboundMessage, Sender, UserId,
};
use erratum_kernel::{
    extract_tag, parse_button, BroadcastArgsError, ButtonAction, ConversationEvent, Effect,
    Notice, PendingReport, Registry, SessionKey,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::broadcast::{Admins, BroadcastError, Broadcaster};
use crate::dispatch::{MonitoringFeed, ReportDispatcher};
use crate::notices::{DetachedDeletion, EphemeralNotices};
use crate::store::{RateLimiter, SessionStore};
use crate::texts;
use crate::transport::Transport;

/// How long transient notices stay visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoticeTtls {
    pub ack: Duration,
    pub done: Duration,
    pub cancel: Duration,
}

/// Where replies to one inbound event go.
#[derive(Debug, Clone, Copy)]
struct Reply {
    chat_id: ChatId,
    reply_to: Option<i64>,
    /// The inline menu a button press came from, edited in place.
    menu: Option<MessageRef>,
}

impl Reply {
    fn to(message: &InboundMessage) -> Self {
        Self {
            chat_id: message.chat_id(),
            reply_to: Some(message.reference.message_id),
            menu: None,
        }
    }
}

/// Binds inbound events to the conversation engine, the dispatcher, the
/// broadcast fan-out and the admin commands.
pub struct ReportRouter {
    transport: Arc<dyn Transport>,
    registry: Arc<Registry>,
    admins: Arc<Admins>,
    sessions: SessionStore,
    limiter: RateLimiter,
    dispatcher: ReportDispatcher,
    broadcaster: Broadcaster,
    notices: Arc<dyn EphemeralNotices>,
    ttls: NoticeTtls,
    /// From `getMe`; commands addressed to other bots are ignored.
    bot_username: Option<String>,
}

impl ReportRouter {
    pub fn from_config(cfg: &Config, transport: Arc<dyn Transport>) -> Result<Self, String> {
        let registry = Registry::new(cfg.registry.iter().map(|entry| Entity {
            code: entry.code.clone(),
            label: entry.label.clone(),
            destination: Destination(entry.destination),
        }))
        .map_err(|e| format!("invalid registry: {e}"))?;
        let registry = Arc::new(registry);
        let admins = Arc::new(Admins::new(cfg.admins.iter().copied()));
        let monitoring = cfg
            .monitoring_feed()
            .map(|(chat_id, topic_id)| MonitoringFeed {
                chat_id: ChatId(chat_id),
                topic_id,
            });

        Ok(Self {
            dispatcher: ReportDispatcher::new(
                Arc::clone(&transport),
                Arc::clone(&registry),
                monitoring,
            ),
            broadcaster: Broadcaster::new(
                Arc::clone(&transport),
                Arc::clone(&registry),
                Arc::clone(&admins),
            ),
            notices: Arc::new(DetachedDeletion::new(Arc::clone(&transport))),
            sessions: SessionStore::default(),
            limiter: RateLimiter::new(cfg.limits.cooldown_secs),
            ttls: NoticeTtls {
                ack: Duration::from_secs(cfg.notices.ack_ttl_secs),
                done: Duration::from_secs(cfg.notices.done_ttl_secs),
                cancel: Duration::from_secs(cfg.notices.cancel_ttl_secs),
            },
            bot_username: None,
            transport,
            registry,
            admins,
        })
    }

    pub fn with_notices(mut self, notices: Arc<dyn EphemeralNotices>) -> Self {
        self.notices = notices;
        self
    }

    pub fn with_bot_username(mut self, username: impl Into<String>) -> Self {
        self.bot_username = Some(username.into());
        self
    }

    pub async fn handle(&self, event: InboundEvent) {
        match event {
            InboundEvent::Command { command, message } => {
                if command.is_for_another_bot(self.bot_username.as_deref()) {
                    debug!(command = %command.name, "ignoring command for another bot");
                    return;
                }
                self.on_command(&command.name, &command.args, &message)
                    .await
            }
            InboundEvent::Button(press) => {
                if let Err(e) = self.transport.answer_callback(&press.query_id).await {
                    debug!(error = %e, "answering button press failed");
                }
                let event = match parse_button(&press.data) {
                    ButtonAction::Pick(code) => ConversationEvent::SelectEntity(code),
                    ButtonAction::Cancel => ConversationEvent::Cancel,
                    ButtonAction::Unknown => {
                        debug!(data = %press.data, "ignoring unknown button payload");
                        return;
                    }
                };
                let origin = press.origin();
                let reply = Reply {
                    chat_id: origin,
                    reply_to: None,
                    menu: press.message,
                };
                self.step(SessionKey::new(press.sender.id, origin), &press.sender, reply, event)
                    .await;
            }
            InboundEvent::Message(message) => match texts::menu_command(message.body()) {
                Some(command) => self.on_command(command, &[], &message).await,
                None => self.on_message(&message).await,
            },
        }
    }

    async fn on_command(&self, name: &str, args: &[String], message: &InboundMessage) {
        let sender = &message.sender;
        let key = SessionKey::new(sender.id, message.chat_id());
        let reply = Reply::to(message);
        match name {
            "report" => {
                if !self.limiter.allow(sender.id).await {
                    debug!(user_id = %sender.id, "report start throttled");
                    return;
                }
                self.step(key, sender, reply, ConversationEvent::StartReport)
                    .await;
            }
            "send" => self.step(key, sender, reply, ConversationEvent::Send).await,
            "cancel" => self.step(key, sender, reply, ConversationEvent::Cancel).await,
            other => {
                self.step(key, sender, reply, ConversationEvent::OtherCommand)
                    .await;
                match other {
                    "start" => {
                        let welcome = OutboundMessage::plain(reply.chat_id, texts::WELCOME)
                            .with_keyboard(texts::main_menu());
                        self.send(welcome).await;
                    }
                    "whoami" => {
                        let text = texts::whoami(
                            message.chat_id(),
                            sender.id,
                            message.chat_kind.as_str(),
                        );
                        self.send(OutboundMessage::html(reply.chat_id, text)).await;
                    }
                    "broadcast" => self.broadcast(sender.id, args, reply).await,
                    "listentities" => self.list_entities(sender.id, reply).await,
                    "contact" => self.contact(sender.id, args, reply).await,
                    _ => debug!(command = other, "ignoring unknown command"),
                }
            }
        }
    }

    async fn on_message(&self, message: &InboundMessage) {
        let sender = &message.sender;
        let key = SessionKey::new(sender.id, message.chat_id());
        let reply = Reply::to(message);

        if self.sessions.get(key).await.claims_messages() {
            if !self.limiter.allow(sender.id).await {
                debug!(user_id = %sender.id, "report message throttled");
                self.send_ephemeral(self.reply(reply, texts::SLOW_DOWN), self.ttls.ack)
                    .await;
                return;
            }
            self.step(key, sender, reply, ConversationEvent::Message(message.reference))
                .await;
            return;
        }

        let Some(code) = extract_tag(message.body(), &self.registry) else {
            return;
        };
        if !self.limiter.allow(sender.id).await {
            debug!(user_id = %sender.id, code = %code, "tagged report throttled");
            return;
        }
        let result = self
            .dispatcher
            .dispatch(Uuid::new_v4(), &code, sender, &[message.reference])
            .await;
        let label = self.registry.label(&code);
        let text = if result.any_failed() {
            texts::tagged_partial(label)
        } else {
            texts::tagged_ack(label)
        };
        self.send_ephemeral(self.reply(reply, text), self.ttls.ack)
            .await;
    }

    /// One state-machine step for `key`, then its side effects.
    async fn step(&self, key: SessionKey, sender: &Sender, reply: Reply, event: ConversationEvent) {
        let effects = self.sessions.apply(key, event, &self.registry).await;
        for effect in effects {
            match effect {
                Effect::Notify(notice) => self.notify(reply, notice).await,
                Effect::Dispatch(report) => self.dispatch_report(key, sender, reply, report).await,
            }
        }
    }

    async fn dispatch_report(
        &self,
        key: SessionKey,
        sender: &Sender,
        reply: Reply,
        report: PendingReport,
    ) {
        let result = self
            .dispatcher
            .dispatch(report.report_id, &report.code, sender, &report.messages)
            .await;
        self.sessions
            .settle(key, report.report_id, report.messages.len())
            .await;
        if result.any_failed() {
            self.send(self.reply(reply, texts::PARTIALLY_DELIVERED))
                .await;
        } else {
            self.send_ephemeral(self.reply(reply, texts::DELIVERED), self.ttls.done)
                .await;
        }
    }

    async fn notify(&self, reply: Reply, notice: Notice) {
        match notice {
            Notice::EntityMenu => {
                let entities = self.registry.all();
                let menu = self
                    .reply(reply, texts::CHOOSE_ENTITY)
                    .with_keyboard(texts::entity_keyboard(&entities));
                self.send(menu).await;
            }
            Notice::EntitySelected { code } => {
                let text = texts::entity_selected(self.registry.label(&code));
                self.show_on_menu(reply, text).await;
            }
            Notice::UnknownEntity { code } => {
                self.show_on_menu(reply, texts::unknown_entity(&code))
                    .await;
            }
            Notice::MessageAccepted => {
                self.send_ephemeral(self.reply(reply, texts::MESSAGE_ACCEPTED), self.ttls.ack)
                    .await;
            }
            Notice::NothingToSend => {
                self.send(self.reply(reply, texts::NOTHING_TO_SEND)).await;
            }
            Notice::AlreadySending => {
                self.send_ephemeral(self.reply(reply, texts::ALREADY_SENDING), self.ttls.ack)
                    .await;
            }
            Notice::Cancelled => {
                if let Some(menu) = reply.menu {
                    if self.edit(menu, texts::CANCELLED).await {
                        self.notices.schedule_deletion(menu, self.ttls.cancel);
                        return;
                    }
                }
                self.send_ephemeral(self.reply(reply, texts::CANCELLED), self.ttls.cancel)
                    .await;
            }
        }
    }

    async fn broadcast(&self, caller: UserId, args: &[String], reply: Reply) {
        match self.broadcaster.broadcast(caller, args).await {
            Ok(report) => {
                let summary = texts::broadcast_summary(&report.outcome, &report.unknown_codes);
                self.send_ephemeral(self.reply(reply, summary), self.ttls.ack)
                    .await;
            }
            Err(BroadcastError::Unauthorized) => {
                self.send(self.reply(reply, texts::ACCESS_DENIED)).await;
            }
            Err(BroadcastError::Args(BroadcastArgsError::Missing)) => {
                self.send(self.reply(reply, texts::BROADCAST_USAGE)).await;
            }
            Err(BroadcastError::Args(BroadcastArgsError::EmptyText)) => {
                self.send(self.reply(reply, texts::BROADCAST_EMPTY)).await;
            }
        }
    }

    async fn list_entities(&self, caller: UserId, reply: Reply) {
        if !self.authorize(caller, reply).await {
            return;
        }
        if self.registry.is_empty() {
            self.send(self.reply(reply, texts::REGISTRY_EMPTY)).await;
            return;
        }

        // Several entities usually share one destination.
        let mut resolved: HashMap<ChatId, Option<ChatInfo>> = HashMap::new();
        let mut lines = Vec::with_capacity(self.registry.len());
        for entity in self.registry.all() {
            let info = match entity.destination.chat() {
                Some(chat_id) => match resolved.get(&chat_id) {
                    Some(info) => info.clone(),
                    None => {
                        let info = self.chat_info(chat_id).await;
                        resolved.insert(chat_id, info.clone());
                        info
                    }
                },
                None => None,
            };
            let link = info.as_ref().and_then(ChatInfo::link);
            let chat = info.as_ref().map(|info| {
                (
                    info.display_name().unwrap_or(texts::UNKNOWN_CHAT),
                    link.as_deref(),
                )
            });
            lines.push(texts::listing_line(entity, chat));
        }

        for chunk in texts::chunk_lines(&lines, texts::LIST_CHUNK_CHARS) {
            self.send(OutboundMessage::html(reply.chat_id, chunk)).await;
        }
    }

    async fn contact(&self, caller: UserId, args: &[String], reply: Reply) {
        if !self.authorize(caller, reply).await {
            return;
        }
        let Some(code) = args
            .first()
            .map(|arg| arg.trim_start_matches('#').to_lowercase())
        else {
            let usage = texts::contact_usage(&self.registry.codes());
            self.send(self.reply(reply, usage)).await;
            return;
        };
        let Some(entity) = self.registry.lookup(&code) else {
            self.send(OutboundMessage::html(reply.chat_id, texts::contact_unknown(&code)))
                .await;
            return;
        };
        let Some(chat_id) = entity.destination.chat() else {
            let text = texts::contact_no_destination(&entity.label);
            self.send(OutboundMessage::html(reply.chat_id, text)).await;
            return;
        };

        let info = self.chat_info(chat_id).await;
        let name = info
            .as_ref()
            .and_then(ChatInfo::display_name)
            .unwrap_or(texts::UNKNOWN_CHAT);
        let link = info.as_ref().and_then(ChatInfo::link);
        let mut card = OutboundMessage::html(
            reply.chat_id,
            texts::contact_card(&entity.label, chat_id, name, link.as_deref()),
        );
        if let Some(url) = link.as_deref() {
            card = card.with_keyboard(texts::open_chat_keyboard(url));
        }
        self.send(card).await;
    }

    async fn authorize(&self, caller: UserId, reply: Reply) -> bool {
        if self.admins.contains(caller) {
            return true;
        }
        warn!(user_id = %caller, "admin command rejected");
        self.send(self.reply(reply, texts::ACCESS_DENIED)).await;
        false
    }

    async fn chat_info(&self, chat_id: ChatId) -> Option<ChatInfo> {
        match self.transport.get_chat(chat_id).await {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(chat_id = %chat_id, error = %e, "chat lookup failed");
                None
            }
        }
    }

    fn reply(&self, reply: Reply, text: impl Into<String>) -> OutboundMessage {
        let message = OutboundMessage::plain(reply.chat_id, text);
        match reply.reply_to {
            Some(message_id) => message.replying_to(message_id),
            None => message,
        }
    }

    /// Replaces the menu a button came from; falls back to a new message.
    async fn show_on_menu(&self, reply: Reply, text: String) {
        if let Some(menu) = reply.menu {
            if self.edit(menu, &text).await {
                return;
            }
        }
        self.send(self.reply(reply, text)).await;
    }

    async fn edit(&self, target: MessageRef, text: &str) -> bool {
        match self.transport.edit_message_text(target, text).await {
            Ok(()) => true,
            Err(e) => {
                warn!(chat_id = %target.chat_id, error = %e, "menu edit failed");
                false
            }
        }
    }

    async fn send(&self, message: OutboundMessage) -> Option<MessageRef> {
        match self.transport.send_message(&message).await {
            Ok(sent) => Some(sent),
            Err(e) => {
                warn!(chat_id = %message.chat_id, error = %e, "reply failed");
                None
            }
        }
    }

    async fn send_ephemeral(&self, message: OutboundMessage, ttl: Duration) {
        if let Some(sent) = self.send(message).await {
            self.notices.schedule_deletion(sent, ttl);
        }
    }
}
