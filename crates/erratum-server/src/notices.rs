use std::sync::Arc;
use std::time::Duration;

use erratum_contracts::MessageRef;
use tracing::debug;

use crate::transport::Transport;

/// Deferred removal of transient bot messages.
pub trait EphemeralNotices: Send + Sync {
    fn schedule_deletion(&self, target: MessageRef, after: Duration);
}

/// Spawns one detached timer task per scheduled deletion. Pending deletions
/// cannot be cancelled and die with the process.
pub struct DetachedDeletion {
    transport: Arc<dyn Transport>,
}

impl DetachedDeletion {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

impl EphemeralNotices for DetachedDeletion {
    fn schedule_deletion(&self, target: MessageRef, after: Duration) {
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Err(e) = transport.delete_message(target).await {
                debug!(
                    chat_id = %target.chat_id,
                    message_id = target.message_id,
                    error = %e,
                    "ephemeral notice deletion failed"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use erratum_contracts::{BotCommand, ChatId, ChatInfo, OutboundMessage};

    use crate::transport::TransportError;

    /// Records deletions; every other call is unreachable from the scheduler.
    #[derive(Default)]
    struct DeletionLog {
        deleted: Mutex<Vec<MessageRef>>,
        fail: bool,
    }

    impl DeletionLog {
        fn deleted(&self) -> Vec<MessageRef> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for DeletionLog {
        async fn send_message(&self, _: &OutboundMessage) -> Result<MessageRef, TransportError> {
            unimplemented!()
        }

        async fn forward_message(
            &self,
            _: MessageRef,
            _: ChatId,
            _: Option<i64>,
        ) -> Result<(), TransportError> {
            unimplemented!()
        }

        async fn delete_message(&self, target: MessageRef) -> Result<(), TransportError> {
            self.deleted.lock().unwrap().push(target);
            if self.fail {
                return Err(TransportError::Api {
                    code: 400,
                    description: "Bad Request: message to delete not found".to_string(),
                });
            }
            Ok(())
        }

        async fn edit_message_text(&self, _: MessageRef, _: &str) -> Result<(), TransportError> {
            unimplemented!()
        }

        async fn answer_callback(&self, _: &str) -> Result<(), TransportError> {
            unimplemented!()
        }

        async fn get_chat(&self, _: ChatId) -> Result<ChatInfo, TransportError> {
            unimplemented!()
        }

        async fn set_commands(&self, _: &[BotCommand]) -> Result<(), TransportError> {
            unimplemented!()
        }
    }

    fn notice(id: i64) -> MessageRef {
        MessageRef {
            chat_id: ChatId(77),
            message_id: id,
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn deletes_only_after_the_delay() {
        let log = Arc::new(DeletionLog::default());
        let notices = DetachedDeletion::new(log.clone());
        notices.schedule_deletion(notice(1), Duration::from_secs(10));
        notices.schedule_deletion(notice(2), Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(log.deleted().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(log.deleted(), vec![notice(1)]);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(log.deleted(), vec![notice(1), notice(2)]);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn failed_deletion_is_swallowed() {
        let log = Arc::new(DeletionLog {
            fail: true,
            ..DeletionLog::default()
        });
        let notices = DetachedDeletion::new(log.clone());
        notices.schedule_deletion(notice(3), Duration::from_secs(5));
        notices.schedule_deletion(notice(4), Duration::from_secs(6));

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(log.deleted(), vec![notice(3), notice(4)]);
    }
}
