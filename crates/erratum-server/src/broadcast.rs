use std::collections::HashSet;
use std::sync::Arc;

use erratum_contracts::{BroadcastOutcome, OutboundMessage, UserId};
use erratum_kernel::{parse_broadcast_args, plan_broadcast, BroadcastArgsError, Registry};
use thiserror::Error;
use tracing::{info, warn};

use crate::texts;
use crate::transport::Transport;

/// The fixed administrator set from configuration.
#[derive(Debug, Clone, Default)]
pub struct Admins(HashSet<UserId>);

impl Admins {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self(ids.into_iter().map(UserId).collect())
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.0.contains(&user)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("caller is not an administrator")]
    Unauthorized,
    #[error(transparent)]
    Args(#[from] BroadcastArgsError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub outcome: BroadcastOutcome,
    pub unknown_codes: Vec<String>,
}

/// Sends an announcement once per distinct destination, listing the labels
/// of every selected entity sharing it.
pub struct Broadcaster {
    transport: Arc<dyn Transport>,
    registry: Arc<Registry>,
    admins: Arc<Admins>,
}

impl Broadcaster {
    pub fn new(transport: Arc<dyn Transport>, registry: Arc<Registry>, admins: Arc<Admins>) -> Self {
        Self {
            transport,
            registry,
            admins,
        }
    }

    /// Authorizes the caller before looking at the arguments.
    pub async fn broadcast(
        &self,
        caller: UserId,
        args: &[String],
    ) -> Result<BroadcastReport, BroadcastError> {
        if !self.admins.contains(caller) {
            warn!(user_id = %caller, "broadcast rejected: not an admin");
            return Err(BroadcastError::Unauthorized);
        }
        let request = parse_broadcast_args(args)?;
        let plan = plan_broadcast(&self.registry, request.codes.as_ref());

        let mut outcome = BroadcastOutcome::default();
        for target in &plan.targets {
            let labels: Vec<&str> = target
                .codes
                .iter()
                .map(|code| self.registry.label(code))
                .collect();
            let message = OutboundMessage::plain(
                target.chat_id,
                texts::broadcast_text(&labels, &request.text),
            )
            .silent(request.silent);
            match self.transport.send_message(&message).await {
                Ok(_) => outcome.sent += 1,
                Err(e) => {
                    warn!(chat_id = %target.chat_id, error = %e, "broadcast send failed");
                    outcome.failed += 1;
                }
            }
        }

        info!(
            user_id = %caller,
            sent = outcome.sent,
            failed = outcome.failed,
            silent = request.silent,
            unknown_codes = plan.unknown_codes.len(),
            "broadcast finished"
        );
        Ok(BroadcastReport {
            outcome,
            unknown_codes: plan.unknown_codes,
        })
    }
}
