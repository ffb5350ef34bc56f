use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use erratum_contracts::UserId;
use erratum_kernel::{
    settle, transition, Conversation, ConversationEvent, CooldownTable, Effect, Registry,
    SessionKey,
};
use tokio::sync::Mutex;
use uuid::Uuid;

/// In-memory conversations, one per (user, origin chat). Idle conversations
/// are not stored. Every read-modify-write happens under one lock, so two
/// updates of the same user can interleave but never tear a conversation.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionKey, Conversation>>,
}

impl SessionStore {
    pub async fn get(&self, key: SessionKey) -> Conversation {
        self.sessions
            .lock()
            .await
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }

    /// Runs one state-machine step and stores its result.
    pub async fn apply(
        &self,
        key: SessionKey,
        event: ConversationEvent,
        registry: &Registry,
    ) -> Vec<Effect> {
        let mut sessions = self.sessions.lock().await;
        let current = sessions.get(&key).cloned().unwrap_or_default();
        let step = transition(&current, event, registry);
        store(&mut sessions, key, step.next);
        step.effects
    }

    /// Releases an in-flight report once its dispatch returned.
    pub async fn settle(&self, key: SessionKey, report_id: Uuid, dispatched: usize) {
        let mut sessions = self.sessions.lock().await;
        let current = sessions.get(&key).cloned().unwrap_or_default();
        let next = settle(&current, report_id, dispatched);
        store(&mut sessions, key, next);
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

fn store(sessions: &mut HashMap<SessionKey, Conversation>, key: SessionKey, next: Conversation) {
    if next.is_active() {
        sessions.insert(key, next);
    } else {
        sessions.remove(&key);
    }
}

/// Per-user cooldown shared by the reporting entry point and both message
/// paths.
pub struct RateLimiter {
    table: Mutex<CooldownTable>,
    cooldown: Duration,
}

impl RateLimiter {
    pub fn new(cooldown_secs: u64) -> Self {
        Self {
            table: Mutex::new(CooldownTable::default()),
            cooldown: i64::try_from(cooldown_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX),
        }
    }

    pub async fn allow(&self, user: UserId) -> bool {
        self.allow_at(user, Utc::now()).await
    }

    pub async fn allow_at(&self, user: UserId, now: DateTime<Utc>) -> bool {
        self.table.lock().await.allow_at(user, self.cooldown, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use erratum_contracts::{ChatId, Destination, Entity, MessageRef};

    fn registry() -> Registry {
        Registry::new(vec![Entity {
            code: "aptch".to_string(),
            label: "A Place to Call Home".to_string(),
            destination: Destination(100),
        }])
        .expect("registry")
    }

    fn key() -> SessionKey {
        SessionKey::new(UserId(1), ChatId(1))
    }

    fn msg(id: i64) -> ConversationEvent {
        ConversationEvent::Message(MessageRef {
            chat_id: ChatId(1),
            message_id: id,
        })
    }

    #[tokio::test]
    async fn idle_conversations_are_not_retained() {
        let store = SessionStore::default();
        let registry = registry();
        store
            .apply(key(), ConversationEvent::StartReport, &registry)
            .await;
        assert_eq!(store.active_count().await, 1);
        store
            .apply(key(), ConversationEvent::Cancel, &registry)
            .await;
        assert_eq!(store.active_count().await, 0);
        assert_eq!(store.get(key()).await, Conversation::Idle);
    }

    #[tokio::test]
    async fn settle_keeps_messages_appended_during_dispatch() {
        let store = SessionStore::default();
        let registry = registry();
        store
            .apply(key(), ConversationEvent::SelectEntity("aptch".into()), &registry)
            .await;
        store.apply(key(), msg(1), &registry).await;
        let effects = store.apply(key(), ConversationEvent::Send, &registry).await;
        let Some(Effect::Dispatch(report)) = effects.into_iter().next() else {
            panic!("expected dispatch");
        };
        store.apply(key(), msg(2), &registry).await;
        store
            .settle(key(), report.report_id, report.messages.len())
            .await;

        let left = store.get(key()).await;
        let pending = left.pending().expect("still collecting");
        assert_eq!(pending.messages.len(), 1);
        assert_eq!(pending.messages[0].message_id, 2);
        assert!(!pending.in_flight);
    }

    #[tokio::test]
    async fn settle_clears_fully_dispatched_report() {
        let store = SessionStore::default();
        let registry = registry();
        store
            .apply(key(), ConversationEvent::SelectEntity("aptch".into()), &registry)
            .await;
        store.apply(key(), msg(1), &registry).await;
        let effects = store.apply(key(), ConversationEvent::Send, &registry).await;
        let Some(Effect::Dispatch(report)) = effects.into_iter().next() else {
            panic!("expected dispatch");
        };
        store.settle(key(), report.report_id, 1).await;
        assert_eq!(store.active_count().await, 0);
    }

    #[tokio::test]
    async fn limiter_throttles_within_cooldown_per_user() {
        let limiter = RateLimiter::new(3);
        let t0 = Utc::now();
        assert!(limiter.allow_at(UserId(1), t0).await);
        assert!(!limiter.allow_at(UserId(1), t0 + Duration::seconds(2)).await);
        assert!(limiter.allow_at(UserId(2), t0 + Duration::seconds(2)).await);
        assert!(limiter.allow_at(UserId(1), t0 + Duration::seconds(3)).await);
    }
}
