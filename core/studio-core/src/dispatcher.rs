//! Renders messages, hands them to the transport and records the outcome.
//!
//! No retries here: a failed send is recorded as failed and the next
//! trigger cycle picks it up again because only delivered rows dedup.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::Environment;
use crate::error::{EngineError, Result};
use crate::ledger::Ledger;
use crate::messages::{render, MessageKind, OutboundMessage};
use crate::transport::Transport;
use crate::types::{DeliveryResult, ReminderKind};

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    ledger: Arc<Ledger>,
    environment: Environment,
    language_code: String,
    /// Where staging confirmations go; unset disables them.
    admin_phone: Option<String>,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        ledger: Arc<Ledger>,
        environment: Environment,
        language_code: impl Into<String>,
        admin_phone: Option<String>,
    ) -> Self {
        Self {
            transport,
            ledger,
            environment,
            language_code: language_code.into(),
            admin_phone,
        }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Send one message. Never fails; transport errors come back as
    /// `DeliveryResult::Failed`.
    pub fn send(&self, recipient: &str, kind: MessageKind, params: &[String]) -> DeliveryResult {
        let outcome = match render(kind, params) {
            OutboundMessage::Template { name, params } => {
                self.transport
                    .send_template(recipient, name, &self.language_code, &params)
            }
            OutboundMessage::Text { body } => self.transport.send_text(recipient, &body),
        };

        match outcome {
            Ok(()) => {
                debug!(recipient = %recipient, kind = kind.label(), "Message delivered");
                if kind.is_client_facing() {
                    self.confirm_to_admin(recipient, kind);
                }
                DeliveryResult::Delivered
            }
            Err(detail) => {
                warn!(
                    recipient = %recipient,
                    kind = kind.label(),
                    error = %detail,
                    "Message delivery failed"
                );
                DeliveryResult::Failed { detail }
            }
        }
    }

    /// Send a reminder and append the attempt to the ledger under `key`.
    ///
    /// A ledger write that fails after the send comes back as
    /// `EngineError::Storage`: the message may already be out, but nothing
    /// will stop the next run from sending it again.
    pub fn dispatch(
        &self,
        key: &str,
        kind: ReminderKind,
        recipient: &str,
        params: &[String],
        now: DateTime<Utc>,
    ) -> Result<DeliveryResult> {
        let result = self.send(recipient, MessageKind::Reminder(kind), params);
        let detail = match &result {
            DeliveryResult::Delivered => None,
            DeliveryResult::Failed { detail } => Some(detail.as_str()),
        };
        let written = self
            .ledger
            .record(key, kind, recipient, result.status(), detail, now)
            .map_err(|err| {
                error!(
                    key = %key,
                    kind = kind.as_str(),
                    status = result.status().as_str(),
                    error = %err,
                    "Failed to record reminder attempt"
                );
                EngineError::Storage(err)
            })?;
        if !written {
            info!(
                key = %key,
                kind = kind.as_str(),
                "Reminder already recorded by a concurrent run"
            );
        }
        Ok(result)
    }

    fn confirm_to_admin(&self, recipient: &str, kind: MessageKind) {
        if self.environment != Environment::Staging {
            return;
        }
        let Some(admin) = self.admin_phone.as_deref() else {
            return;
        };
        if admin == recipient {
            return;
        }
        let body = format!("[staging] sent {} to {}", kind.label(), recipient);
        if let Err(err) = self.transport.send_text(admin, &body) {
            warn!(error = %err, "Staging confirmation failed");
        }
    }
}
