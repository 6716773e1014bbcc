//! Trigger runs: work out which reminders are due and dispatch them.
//!
//! Source and directory failures abort the run. A missing recipient or a
//! failed send only affects that one item; the run carries on and the
//! report carries the counts.

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::directory::ClientDirectory;
use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, Result};
use crate::ledger::Ledger;
use crate::messages::{
    digest_key, digest_params, session_reminder_params, weekly_key, weekly_params,
};
use crate::phone::normalize_name;
use crate::source::SessionSource;
use crate::types::{DeliveryResult, ReminderKind, Session, SessionState};
use crate::window::{local_date, upcoming_monday, window_for, TimeWindow};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub kind: ReminderKind,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub sent: usize,
    pub failed: usize,
    /// Items dropped before sending: no recipient, or session not active.
    pub skipped: usize,
    pub already_sent: usize,
    /// Sends whose ledger write failed; these will go out again next run.
    pub unrecorded: usize,
}

impl DispatchReport {
    fn new(kind: ReminderKind, window: TimeWindow) -> Self {
        Self {
            kind,
            window_start: window.start,
            window_end: window.end,
            sent: 0,
            failed: 0,
            skipped: 0,
            already_sent: 0,
            unrecorded: 0,
        }
    }

    fn tally(&mut self, outcome: Result<DeliveryResult>) {
        match outcome {
            Ok(DeliveryResult::Delivered) => self.sent += 1,
            Ok(DeliveryResult::Failed { .. }) => self.failed += 1,
            Err(_) => self.unrecorded += 1,
        }
    }
}

pub struct Scheduler {
    source: Arc<dyn SessionSource>,
    directory: Arc<dyn ClientDirectory>,
    ledger: Arc<Ledger>,
    dispatcher: Arc<Dispatcher>,
    admin_phone: Option<String>,
    offset: FixedOffset,
}

impl Scheduler {
    pub fn new(
        source: Arc<dyn SessionSource>,
        directory: Arc<dyn ClientDirectory>,
        ledger: Arc<Ledger>,
        dispatcher: Arc<Dispatcher>,
        admin_phone: Option<String>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            source,
            directory,
            ledger,
            dispatcher,
            admin_phone,
            offset,
        }
    }

    pub fn run_trigger(&self, kind: ReminderKind, now: DateTime<Utc>) -> Result<DispatchReport> {
        let window = window_for(kind, now, self.offset);
        info!(
            kind = kind.as_str(),
            window_start = %window.start,
            window_end = %window.end,
            "Trigger run started"
        );

        self.directory.refresh()?;
        let sessions = self.source.list_sessions(window.start, window.end)?;
        let states = self
            .ledger
            .sync_sessions(&sessions, now)
            .map_err(EngineError::Storage)?;

        let mut report = DispatchReport::new(kind, window);
        match kind {
            ReminderKind::Tomorrow | ReminderKind::NextHour => {
                self.run_session_reminders(kind, now, &sessions, &states, &mut report)?
            }
            ReminderKind::Weekly => {
                self.run_weekly(now, &sessions, &states, &mut report)?
            }
            ReminderKind::MorningDigest | ReminderKind::EveningDigest => {
                self.run_digest(kind, now, window, &sessions, &states, &mut report)?
            }
        }

        info!(
            kind = kind.as_str(),
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
            already_sent = report.already_sent,
            unrecorded = report.unrecorded,
            "Trigger run finished"
        );
        Ok(report)
    }

    fn run_session_reminders(
        &self,
        kind: ReminderKind,
        now: DateTime<Utc>,
        sessions: &[Session],
        states: &HashMap<String, SessionState>,
        report: &mut DispatchReport,
    ) -> Result<()> {
        for session in sessions {
            // A session starting exactly now belongs to no next-hour run.
            if kind == ReminderKind::NextHour && session.start_time <= now {
                continue;
            }
            if state_of(states, session) != SessionState::Active {
                debug!(session_id = %session.id, "Session not active; no reminder");
                report.skipped += 1;
                continue;
            }
            if self.already_sent(&session.id, kind)? {
                report.already_sent += 1;
                continue;
            }
            let Some(phone) = self.resolve(&session.client_name)? else {
                report.skipped += 1;
                continue;
            };
            let params = session_reminder_params(session, self.offset);
            let outcome = self
                .dispatcher
                .dispatch(&session.id, kind, &phone, &params, now);
            report.tally(outcome);
        }
        Ok(())
    }

    /// One message per directory client, including clients with nothing
    /// booked.
    fn run_weekly(
        &self,
        now: DateTime<Utc>,
        sessions: &[Session],
        states: &HashMap<String, SessionState>,
        report: &mut DispatchReport,
    ) -> Result<()> {
        let monday = upcoming_monday(now, self.offset);

        let mut by_client: HashMap<String, Vec<&Session>> = HashMap::new();
        for session in sessions {
            if state_of(states, session) == SessionState::Active {
                by_client
                    .entry(normalize_name(&session.client_name))
                    .or_default()
                    .push(session);
            }
        }

        for client in self.directory.list_clients()? {
            let mut booked = by_client
                .remove(&normalize_name(&client.name))
                .unwrap_or_default();
            booked.sort_by_key(|session| session.start_time);

            let key = weekly_key(&client.name, monday);
            if self.already_sent(&key, ReminderKind::Weekly)? {
                report.already_sent += 1;
                continue;
            }
            if client.phone.is_empty() {
                warn!(client = %client.name, "No phone number for client; weekly schedule skipped");
                report.skipped += 1;
                continue;
            }
            let params = weekly_params(&client.name, &booked, self.offset);
            let outcome =
                self.dispatcher
                    .dispatch(&key, ReminderKind::Weekly, &client.phone, &params, now);
            report.tally(outcome);
        }

        for (client, orphaned) in by_client {
            warn!(
                client = %client,
                sessions = orphaned.len(),
                "Booked client is not in the directory; weekly schedule skipped"
            );
            report.skipped += 1;
        }
        Ok(())
    }

    fn run_digest(
        &self,
        kind: ReminderKind,
        now: DateTime<Utc>,
        window: TimeWindow,
        sessions: &[Session],
        states: &HashMap<String, SessionState>,
        report: &mut DispatchReport,
    ) -> Result<()> {
        let admin = self
            .admin_phone
            .as_deref()
            .ok_or_else(|| EngineError::configuration("admin_phone", "not configured"))?;

        let key = digest_key(kind, local_date(window.start, self.offset));
        if self.already_sent(&key, kind)? {
            report.already_sent += 1;
            return Ok(());
        }

        let entries: Vec<(Session, SessionState)> = sessions
            .iter()
            .map(|session| (session.clone(), state_of(states, session)))
            .collect();
        let params = digest_params(&entries, self.offset);
        let outcome = self.dispatcher.dispatch(&key, kind, admin, &params, now);
        report.tally(outcome);
        Ok(())
    }

    fn already_sent(&self, key: &str, kind: ReminderKind) -> Result<bool> {
        self.ledger.has_sent(key, kind).map_err(EngineError::Storage)
    }

    /// Phone for `client_name`, or `None` (logged) when the directory has no
    /// usable number.
    fn resolve(&self, client_name: &str) -> Result<Option<String>> {
        let phone = self.directory.lookup_phone(client_name)?;
        if phone.is_none() {
            let err = EngineError::RecipientNotFound {
                client_name: client_name.to_string(),
            };
            warn!(error = %err, "Reminder skipped");
        }
        Ok(phone)
    }
}

fn state_of(states: &HashMap<String, SessionState>, session: &Session) -> SessionState {
    states
        .get(&session.id)
        .copied()
        .unwrap_or(SessionState::Active)
}
