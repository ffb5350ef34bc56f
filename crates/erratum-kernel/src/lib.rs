use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use erratum_contracts::{ChatId, CommandInvocation, Destination, Entity, MessageRef, UserId};
use thiserror::Error;
use uuid::Uuid;

pub const TAG_MARKER: char = '#';
pub const PICK_PREFIX: &str = "pick:";
pub const CANCEL_PAYLOAD: &str = "cancel";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate entity code: {0}")]
    DuplicateCode(String),
    #[error("invalid entity code {0:?}: must be lower-case without whitespace or '#'")]
    InvalidCode(String),
    #[error("entity {0} has an empty label")]
    EmptyLabel(String),
}

/// Read-only lookup of entities by code. Built once at startup.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    by_code: HashMap<String, Entity>,
    by_label: Vec<String>,
}

impl Registry {
    pub fn new(entities: impl IntoIterator<Item = Entity>) -> Result<Self, RegistryError> {
        let mut by_code = HashMap::new();
        for entity in entities {
            if !is_valid_code(&entity.code) {
                return Err(RegistryError::InvalidCode(entity.code));
            }
            if entity.label.trim().is_empty() {
                return Err(RegistryError::EmptyLabel(entity.code));
            }
            if by_code.contains_key(&entity.code) {
                return Err(RegistryError::DuplicateCode(entity.code));
            }
            by_code.insert(entity.code.clone(), entity);
        }

        let mut by_label: Vec<String> = by_code.keys().cloned().collect();
        by_label.sort_by(|a, b| {
            let la = by_code[a].label.to_lowercase();
            let lb = by_code[b].label.to_lowercase();
            la.cmp(&lb).then_with(|| a.cmp(b))
        });
        Ok(Self { by_code, by_label })
    }

    pub fn lookup(&self, code: &str) -> Option<&Entity> {
        self.by_code.get(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.by_code.contains_key(code)
    }

    /// All entities ordered by label, case-insensitive.
    pub fn all(&self) -> Vec<&Entity> {
        self.by_label.iter().map(|code| &self.by_code[code]).collect()
    }

    pub fn codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.by_code.keys().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }

    /// Display label, falling back to the code itself.
    pub fn label<'a>(&'a self, code: &'a str) -> &'a str {
        self.by_code
            .get(code)
            .map(|e| e.label.as_str())
            .unwrap_or(code)
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }

    /// Destination -> codes sharing it. Includes the "none" sentinel.
    pub fn group_by_destination(&self) -> BTreeMap<Destination, BTreeSet<String>> {
        let mut groups: BTreeMap<Destination, BTreeSet<String>> = BTreeMap::new();
        for entity in self.by_code.values() {
            groups
                .entry(entity.destination)
                .or_default()
                .insert(entity.code.clone());
        }
        groups
    }
}

pub fn is_valid_code(code: &str) -> bool {
    !code.is_empty()
        && !code.contains(TAG_MARKER)
        && !code.chars().any(char::is_whitespace)
        && code.to_lowercase() == code
}

/// Last allowed action per user. Entries are never evicted.
#[derive(Debug, Default)]
pub struct CooldownTable {
    last_allowed: HashMap<UserId, DateTime<Utc>>,
}

impl CooldownTable {
    pub fn allow_at(&mut self, user: UserId, cooldown: Duration, now: DateTime<Utc>) -> bool {
        if let Some(prev) = self.last_allowed.get(&user) {
            if now.signed_duration_since(*prev) < cooldown {
                return false;
            }
        }
        self.last_allowed.insert(user, now);
        true
    }

    pub fn last_allowed(&self, user: UserId) -> Option<DateTime<Utc>> {
        self.last_allowed.get(&user).copied()
    }
}

/// First `#code` token (left to right) naming a registered entity.
pub fn extract_tag(text: &str, registry: &Registry) -> Option<String> {
    text.split_whitespace()
        .filter_map(|token| token.strip_prefix(TAG_MARKER))
        .map(str::to_lowercase)
        .find(|code| registry.contains(code))
}

/// Parses `/name@bot arg1 arg2`. Returns `None` for anything that is not a command.
pub fn parse_command(text: &str) -> Option<CommandInvocation> {
    let mut tokens = text.split_whitespace();
    let head = tokens.next()?.strip_prefix('/')?;
    let (name, addressee) = match head.split_once('@') {
        Some((name, bot)) => (name, Some(bot).filter(|b| !b.is_empty())),
        None => (head, None),
    };
    let name = name.to_lowercase();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some(CommandInvocation {
        name,
        args: tokens.map(str::to_string).collect(),
        addressee: addressee.map(str::to_string),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    Pick(String),
    Cancel,
    Unknown,
}

pub fn parse_button(data: &str) -> ButtonAction {
    if data == CANCEL_PAYLOAD {
        return ButtonAction::Cancel;
    }
    match data.strip_prefix(PICK_PREFIX) {
        Some(code) if !code.is_empty() => ButtonAction::Pick(code.to_string()),
        _ => ButtonAction::Unknown,
    }
}

pub fn pick_payload(code: &str) -> String {
    format!("{PICK_PREFIX}{code}")
}

/// Conversations are keyed per user and per originating chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub user: UserId,
    pub origin: ChatId,
}

impl SessionKey {
    pub fn new(user: UserId, origin: ChatId) -> Self {
        Self { user, origin }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReport {
    pub report_id: Uuid,
    pub code: String,
    /// Replay order at dispatch time.
    pub messages: Vec<MessageRef>,
    /// Set while a dispatch of this report is outstanding.
    pub in_flight: bool,
}

impl PendingReport {
    fn new(code: String) -> Self {
        Self {
            report_id: Uuid::new_v4(),
            code,
            messages: Vec::new(),
            in_flight: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Conversation {
    #[default]
    Idle,
    ChoosingEntity,
    Collecting(PendingReport),
}

impl Conversation {
    pub fn is_active(&self) -> bool {
        !matches!(self, Conversation::Idle)
    }

    /// Only a collecting conversation claims plain messages; otherwise they
    /// fall through to the tag path.
    pub fn claims_messages(&self) -> bool {
        matches!(self, Conversation::Collecting(_))
    }

    pub fn pending(&self) -> Option<&PendingReport> {
        match self {
            Conversation::Collecting(report) => Some(report),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    StartReport,
    SelectEntity(String),
    Message(MessageRef),
    Send,
    Cancel,
    /// Any command outside the reporting flow.
    OtherCommand,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    EntityMenu,
    EntitySelected { code: String },
    UnknownEntity { code: String },
    MessageAccepted,
    NothingToSend,
    AlreadySending,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Notify(Notice),
    Dispatch(PendingReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: Conversation,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: Conversation, effects: Vec<Effect>) -> Self {
        Self { next, effects }
    }

    fn stay(state: &Conversation, effects: Vec<Effect>) -> Self {
        Self {
            next: state.clone(),
            effects,
        }
    }
}

pub fn transition(
    state: &Conversation,
    event: ConversationEvent,
    registry: &Registry,
) -> Transition {
    use Conversation::*;
    use ConversationEvent as Ev;

    match (state, event) {
        (_, Ev::StartReport) => {
            Transition::to(ChoosingEntity, vec![Effect::Notify(Notice::EntityMenu)])
        }
        (Idle | ChoosingEntity, Ev::SelectEntity(code)) if !registry.contains(&code) => {
            Transition::to(Idle, vec![Effect::Notify(Notice::UnknownEntity { code })])
        }
        // Collected messages survive a stale pick of a retired code.
        (Collecting(_), Ev::SelectEntity(code)) if !registry.contains(&code) => {
            Transition::stay(state, vec![Effect::Notify(Notice::UnknownEntity { code })])
        }
        (Collecting(report), Ev::SelectEntity(code)) => {
            let mut report = report.clone();
            report.code = code.clone();
            Transition::to(
                Collecting(report),
                vec![Effect::Notify(Notice::EntitySelected { code })],
            )
        }
        (Idle | ChoosingEntity, Ev::SelectEntity(code)) => Transition::to(
            Collecting(PendingReport::new(code.clone())),
            vec![Effect::Notify(Notice::EntitySelected { code })],
        ),
        (Collecting(report), Ev::Message(message)) => {
            let mut report = report.clone();
            report.messages.push(message);
            Transition::to(
                Collecting(report),
                vec![Effect::Notify(Notice::MessageAccepted)],
            )
        }
        (Idle | ChoosingEntity, Ev::Message(_)) => Transition::stay(state, vec![]),
        (Collecting(report), Ev::Send) if report.in_flight => {
            Transition::stay(state, vec![Effect::Notify(Notice::AlreadySending)])
        }
        (Collecting(report), Ev::Send) if !report.messages.is_empty() => {
            let mut report = report.clone();
            report.in_flight = true;
            let snapshot = report.clone();
            Transition::to(Collecting(report), vec![Effect::Dispatch(snapshot)])
        }
        (_, Ev::Send) => Transition::stay(state, vec![Effect::Notify(Notice::NothingToSend)]),
        (_, Ev::Cancel) => Transition::to(Idle, vec![Effect::Notify(Notice::Cancelled)]),
        (Idle, Ev::OtherCommand) => Transition::stay(state, vec![]),
        (ChoosingEntity | Collecting(_), Ev::OtherCommand) => {
            Transition::to(Idle, vec![Effect::Notify(Notice::Cancelled)])
        }
    }
}

/// Applied once a dispatch returns. Drops the dispatched prefix of the
/// report; messages appended meanwhile keep the conversation collecting.
/// A conversation that was cancelled or restarted in between is left alone.
pub fn settle(state: &Conversation, report_id: Uuid, dispatched: usize) -> Conversation {
    match state {
        Conversation::Collecting(report) if report.report_id == report_id && report.in_flight => {
            let remaining: Vec<MessageRef> =
                report.messages.iter().skip(dispatched).copied().collect();
            if remaining.is_empty() {
                Conversation::Idle
            } else {
                Conversation::Collecting(PendingReport {
                    report_id: Uuid::new_v4(),
                    code: report.code.clone(),
                    messages: remaining,
                    in_flight: false,
                })
            }
        }
        other => other.clone(),
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BroadcastArgsError {
    #[error("broadcast needs arguments")]
    Missing,
    #[error("broadcast text is empty")]
    EmptyText,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastRequest {
    pub codes: Option<BTreeSet<String>>,
    pub silent: bool,
    pub text: String,
}

/// Flags may appear anywhere: `-codes a,b` and `-silent`. The rest is text.
pub fn parse_broadcast_args(args: &[String]) -> Result<BroadcastRequest, BroadcastArgsError> {
    if args.is_empty() {
        return Err(BroadcastArgsError::Missing);
    }
    let mut codes = None;
    let mut silent = false;
    let mut words: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-codes" if i + 1 < args.len() => {
                codes = Some(
                    args[i + 1]
                        .split(',')
                        .map(|c| c.trim().to_lowercase())
                        .filter(|c| !c.is_empty())
                        .collect(),
                );
                i += 2;
            }
            "-silent" => {
                silent = true;
                i += 1;
            }
            word => {
                words.push(word);
                i += 1;
            }
        }
    }
    let text = words.join(" ").trim().to_string();
    if text.is_empty() {
        return Err(BroadcastArgsError::EmptyText);
    }
    Ok(BroadcastRequest {
        codes,
        silent,
        text,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastTarget {
    pub chat_id: ChatId,
    /// Sorted by code.
    pub codes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastPlan {
    pub targets: Vec<BroadcastTarget>,
    /// Filter codes that name no registered entity.
    pub unknown_codes: Vec<String>,
}

/// One target per distinct configured destination.
pub fn plan_broadcast(registry: &Registry, filter: Option<&BTreeSet<String>>) -> BroadcastPlan {
    let targets = registry
        .group_by_destination()
        .into_iter()
        .filter_map(|(destination, codes)| {
            let chat_id = destination.chat()?;
            let codes: Vec<String> = match filter {
                Some(filter) => codes.intersection(filter).cloned().collect(),
                None => codes.into_iter().collect(),
            };
            if codes.is_empty() {
                None
            } else {
                Some(BroadcastTarget { chat_id, codes })
            }
        })
        .collect();
    let unknown_codes = filter
        .map(|f| {
            f.iter()
                .filter(|c| !registry.contains(c))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    BroadcastPlan {
        targets,
        unknown_codes,
    }
}
