use std::sync::Arc;

use erratum_contracts::{ChatId, DispatchResult, MessageRef, OutboundMessage, Sender, SinkOutcome};
use erratum_kernel::Registry;
use tracing::{info, warn};
use uuid::Uuid;

use crate::texts;
use crate::transport::Transport;

/// Secondary sink that receives a copy of every report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitoringFeed {
    pub chat_id: ChatId,
    pub topic_id: Option<i64>,
}

/// Delivers a report (header, then every message forwarded in order) to the
/// entity's destination and to the monitoring feed. The two sinks run
/// independently; neither failure affects the other.
pub struct ReportDispatcher {
    transport: Arc<dyn Transport>,
    registry: Arc<Registry>,
    monitoring: Option<MonitoringFeed>,
}

impl ReportDispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<Registry>,
        monitoring: Option<MonitoringFeed>,
    ) -> Self {
        Self {
            transport,
            registry,
            monitoring,
        }
    }

    pub async fn dispatch(
        &self,
        report_id: Uuid,
        code: &str,
        sender: &Sender,
        messages: &[MessageRef],
    ) -> DispatchResult {
        let header = texts::report_header(self.registry.label(code), sender);
        let destination = self
            .registry
            .lookup(code)
            .and_then(|entity| entity.destination.chat());

        let primary = async {
            match destination {
                Some(chat_id) => {
                    self.deliver(report_id, "primary", chat_id, None, &header, messages)
                        .await
                }
                None => SinkOutcome::Skipped,
            }
        };
        let monitoring = async {
            match self.monitoring {
                Some(feed) => {
                    self.deliver(
                        report_id,
                        "monitoring",
                        feed.chat_id,
                        feed.topic_id,
                        &header,
                        messages,
                    )
                    .await
                }
                None => SinkOutcome::Skipped,
            }
        };
        let (primary, monitoring) = tokio::join!(primary, monitoring);

        let result = DispatchResult {
            primary,
            monitoring,
        };
        info!(
            report_id = %report_id,
            code,
            user_id = %sender.id,
            messages = messages.len(),
            primary = ?result.primary,
            monitoring = ?result.monitoring,
            "report dispatched"
        );
        result
    }

    async fn deliver(
        &self,
        report_id: Uuid,
        sink: &'static str,
        chat_id: ChatId,
        thread_id: Option<i64>,
        header: &str,
        messages: &[MessageRef],
    ) -> SinkOutcome {
        let mut failed = 0;
        let announcement = OutboundMessage::html(chat_id, header).in_thread(thread_id);
        if let Err(e) = self.transport.send_message(&announcement).await {
            // Messages are still forwarded without their header.
            warn!(report_id = %report_id, sink, chat_id = %chat_id, error = %e, "report header failed");
            failed += 1;
        }

        let mut forwarded = 0;
        for message in messages {
            match self
                .transport
                .forward_message(*message, chat_id, thread_id)
                .await
            {
                Ok(()) => forwarded += 1,
                Err(e) => {
                    warn!(
                        report_id = %report_id,
                        sink,
                        chat_id = %chat_id,
                        message_id = message.message_id,
                        error = %e,
                        "report forward failed"
                    );
                    failed += 1;
                }
            }
        }

        if failed == 0 {
            SinkOutcome::Delivered { forwarded }
        } else {
            SinkOutcome::Partial { forwarded, failed }
        }
    }
}
