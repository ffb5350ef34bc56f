use async_trait::async_trait;
use erratum_contracts::{BotCommand, ChatId, ChatInfo, MessageRef, OutboundMessage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport request failed: {0}")]
    Http(String),
    #[error("api error {code}: {description}")]
    Api { code: i64, description: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Outbound side of the chat platform. Every call is independent; callers
/// decide whether a failure matters.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(&self, message: &OutboundMessage) -> Result<MessageRef, TransportError>;

    /// Forwards `source` unchanged into `to`, optionally into a topic thread.
    async fn forward_message(
        &self,
        source: MessageRef,
        to: ChatId,
        thread_id: Option<i64>,
    ) -> Result<(), TransportError>;

    async fn delete_message(&self, target: MessageRef) -> Result<(), TransportError>;

    async fn edit_message_text(&self, target: MessageRef, text: &str)
        -> Result<(), TransportError>;

    async fn answer_callback(&self, query_id: &str) -> Result<(), TransportError>;

    async fn get_chat(&self, chat_id: ChatId) -> Result<ChatInfo, TransportError>;

    async fn set_commands(&self, commands: &[BotCommand]) -> Result<(), TransportError>;
}
