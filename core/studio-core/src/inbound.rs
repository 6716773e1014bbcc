//! Inbound client messages: fixed keywords that ask to move a session.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::directory::ClientDirectory;
use crate::error::{EngineError, Result};
use crate::ledger::Ledger;
use crate::phone::{normalize_name, normalize_phone};
use crate::source::SessionSource;
use crate::state_machine::StateMachine;
use crate::types::{Actor, SessionEvent, SessionState};

const KEYWORDS: [&str; 5] = [
    "RESCHEDULE",
    "CANCEL",
    "CANCEL NEXT",
    "CAN'T MAKE IT",
    "CANT MAKE IT",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InboundOutcome {
    Transitioned { session_id: String },
    Ignored { reason: String },
    NoActiveSession { client_name: String },
}

impl InboundOutcome {
    pub fn acted(&self) -> bool {
        matches!(self, InboundOutcome::Transitioned { .. })
    }

    fn ignored(reason: impl Into<String>) -> Self {
        InboundOutcome::Ignored {
            reason: reason.into(),
        }
    }
}

/// Uppercased, trimmed, single-spaced, with typographic apostrophes folded.
pub fn match_keyword(text: &str) -> Option<&'static str> {
    let normalized = text
        .replace('\u{2019}', "'")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase();
    KEYWORDS.iter().copied().find(|keyword| *keyword == normalized)
}

pub struct InboundHandler {
    source: Arc<dyn SessionSource>,
    directory: Arc<dyn ClientDirectory>,
    ledger: Arc<Ledger>,
    state_machine: Arc<StateMachine>,
    lookahead: Duration,
}

impl InboundHandler {
    pub fn new(
        source: Arc<dyn SessionSource>,
        directory: Arc<dyn ClientDirectory>,
        ledger: Arc<Ledger>,
        state_machine: Arc<StateMachine>,
        lookahead_days: i64,
    ) -> Self {
        Self {
            source,
            directory,
            ledger,
            state_machine,
            lookahead: Duration::days(lookahead_days.max(1)),
        }
    }

    /// Handle one webhook payload `{from, text}`. Unknown extra fields are
    /// fine; missing or empty `from`/`text` is `MalformedInboundPayload`.
    pub fn handle(&self, payload: &Value, now: DateTime<Utc>) -> Result<InboundOutcome> {
        let params = studio_protocol::parse_inbound(payload.clone())
            .map_err(|err| EngineError::MalformedInboundPayload(err.message))?;
        let from = params.from.unwrap_or_default();
        let text = params.text.unwrap_or_default();

        let Some(keyword) = match_keyword(&text) else {
            return Ok(InboundOutcome::ignored("no keyword"));
        };
        let Some(phone) = normalize_phone(&from) else {
            warn!(from = %from, "Inbound sender is not a phone number");
            return Ok(InboundOutcome::ignored("unrecognised sender"));
        };

        self.directory.refresh()?;
        let Some(client_name) = self.directory.lookup_name(&phone)? else {
            warn!(phone = %phone, "Inbound keyword from unknown sender");
            return Ok(InboundOutcome::ignored("unknown sender"));
        };

        let client_key = normalize_name(&client_name);
        let mut sessions: Vec<_> = self
            .source
            .list_sessions(now, now + self.lookahead)?
            .into_iter()
            .filter(|session| normalize_name(&session.client_name) == client_key)
            .collect();
        let states = self
            .ledger
            .sync_sessions(&sessions, now)
            .map_err(EngineError::Storage)?;
        sessions.sort_by_key(|session| session.start_time);

        // Webhooks may be redelivered; an open request already covers this client.
        if let Some(pending) = sessions.iter().find(|session| {
            states.get(&session.id).copied() == Some(SessionState::RescheduleRequested)
        }) {
            info!(
                client = %client_name,
                session_id = %pending.id,
                "Duplicate reschedule keyword ignored"
            );
            return Ok(InboundOutcome::ignored("reschedule already requested"));
        }


        let target = sessions.into_iter().find(|session| {
            states.get(&session.id).copied().unwrap_or(SessionState::Active)
                == SessionState::Active
        });
        let Some(target) = target else {
            info!(client = %client_name, "No active session to reschedule");
            return Ok(InboundOutcome::NoActiveSession { client_name });
        };

        let reason = format!("client replied {}", keyword);
        self.state_machine.apply(
            &target.id,
            SessionEvent::ClientRescheduleRequest,
            Actor::Client,
            Some(&reason),
            now,
        )?;
        Ok(InboundOutcome::Transitioned {
            session_id: target.id,
        })
    }
}
