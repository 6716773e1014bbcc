//! Applies session lifecycle transitions and notifies the admin.
//!
//! State lives in the ledger's `sessions` table. Writes are conditional on
//! the state read at the start of the call, so two overlapping requests for
//! the same session cannot both succeed.

use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, Result, TransitionRequest};
use crate::ledger::{Ledger, TransitionWrite};
use crate::messages::{reschedule_alert_params, status_update_body, MessageKind};
use crate::transition::{can_reactivate, next_state};
use crate::types::{Actor, SessionEvent, SessionRecord, SessionState};

pub struct StateMachine {
    ledger: Arc<Ledger>,
    dispatcher: Arc<Dispatcher>,
    admin_phone: Option<String>,
    offset: FixedOffset,
}

impl StateMachine {
    pub fn new(
        ledger: Arc<Ledger>,
        dispatcher: Arc<Dispatcher>,
        admin_phone: Option<String>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            ledger,
            dispatcher,
            admin_phone,
            offset,
        }
    }

    /// Apply `event` on behalf of `actor`. Anything outside the transition
    /// table is rejected with `InvalidTransition` and nothing is written.
    pub fn apply(
        &self,
        session_id: &str,
        event: SessionEvent,
        actor: Actor,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord> {
        let record = self.load(session_id)?;
        let request = TransitionRequest::Event(event);
        let to = next_state(record.state, event, actor).ok_or_else(|| {
            EngineError::InvalidTransition {
                session_id: session_id.to_string(),
                from: record.state,
                event: request,
                actor,
            }
        })?;
        self.commit(record, to, request, actor, reason, now)
    }

    /// Admin-only return of a closed session to `Active`.
    pub fn reactivate(
        &self,
        session_id: &str,
        actor: Actor,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord> {
        let record = self.load(session_id)?;
        if !can_reactivate(record.state, actor) {
            return Err(EngineError::InvalidTransition {
                session_id: session_id.to_string(),
                from: record.state,
                event: TransitionRequest::Reactivate,
                actor,
            });
        }
        self.commit(
            record,
            SessionState::Active,
            TransitionRequest::Reactivate,
            actor,
            reason,
            now,
        )
    }

    fn load(&self, session_id: &str) -> Result<SessionRecord> {
        self.ledger
            .get_session(session_id)
            .map_err(EngineError::Storage)?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))
    }

    fn commit(
        &self,
        record: SessionRecord,
        to: SessionState,
        request: TransitionRequest,
        actor: Actor,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord> {
        let session_id = record.session.id.clone();
        let from = record.state;

        match self
            .ledger
            .apply_transition(&session_id, from, to, actor, reason, now)
            .map_err(EngineError::Storage)?
        {
            TransitionWrite::Applied => {}
            TransitionWrite::Conflict { current: Some(current) } => {
                warn!(
                    session_id = %session_id,
                    expected = from.as_str(),
                    current = current.as_str(),
                    "Session state changed underneath transition"
                );
                return Err(EngineError::InvalidTransition {
                    session_id,
                    from: current,
                    event: request,
                    actor,
                });
            }
            TransitionWrite::Conflict { current: None } => {
                return Err(EngineError::SessionNotFound(session_id));
            }
        }

        info!(
            session_id = %session_id,
            from = from.as_str(),
            to = to.as_str(),
            actor = actor.as_str(),
            "Session transitioned"
        );

        self.notify_admin(&record, from, to, reason);
        self.load(&session_id)
    }

    /// Exactly one admin message per transition, never a client message.
    /// The transition stands even if the notice cannot be delivered.
    fn notify_admin(
        &self,
        record: &SessionRecord,
        from: SessionState,
        to: SessionState,
        reason: Option<&str>,
    ) {
        let Some(admin) = self.admin_phone.as_deref() else {
            error!(
                session_id = %record.session.id,
                "No admin recipient configured; transition notice dropped"
            );
            return;
        };

        let result = if to == SessionState::RescheduleRequested {
            self.dispatcher.send(
                admin,
                MessageKind::RescheduleAlert,
                &reschedule_alert_params(&record.session, self.offset),
            )
        } else {
            let body = status_update_body(&record.session, from, to, reason, self.offset);
            self.dispatcher.send(admin, MessageKind::StatusUpdate, &[body])
        };

        if !result.is_delivered() {
            warn!(session_id = %record.session.id, "Admin transition notice not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::transport::RecordingTransport;
    use crate::types::Session;

    const ADMIN: &str = "27825550000";

    fn utc(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        transport: Arc<RecordingTransport>,
        ledger: Arc<Ledger>,
        machine: StateMachine,
    }

    fn fixture() -> Fixture {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let ledger = Arc::new(Ledger::new(temp_dir.path().join("state.db")).expect("ledger"));
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = Arc::new(Dispatcher::new(
            transport.clone(),
            ledger.clone(),
            Environment::Production,
            "en",
            Some(ADMIN.to_string()),
        ));
        let offset = FixedOffset::east_opt(7200).expect("offset");
        let machine = StateMachine::new(
            ledger.clone(),
            dispatcher,
            Some(ADMIN.to_string()),
            offset,
        );

        let start = utc("2026-03-11T06:00:00Z");
        ledger
            .sync_sessions(
                &[Session {
                    id: "s-1".to_string(),
                    client_name: "Anna".to_string(),
                    start_time: start,
                    end_time: start + chrono::Duration::hours(1),
                    session_type: "Single".to_string(),
                }],
                utc("2026-03-10T08:00:00Z"),
            )
            .expect("sync");

        Fixture {
            _dir: temp_dir,
            transport,
            ledger,
            machine,
        }
    }

    #[test]
    fn client_request_alerts_admin_only() {
        let fx = fixture();
        let record = fx
            .machine
            .apply(
                "s-1",
                SessionEvent::ClientRescheduleRequest,
                Actor::Client,
                None,
                utc("2026-03-10T09:00:00Z"),
            )
            .expect("transition");
        assert_eq!(record.state, SessionState::RescheduleRequested);
        assert_eq!(record.history.len(), 1);

        let sent = fx.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].phone(), ADMIN);
        assert_eq!(sent[0].template(), Some("reschedule-admin-alert"));
    }

    #[test]
    fn invalid_transition_leaves_state_untouched() {
        let fx = fixture();
        let err = fx
            .machine
            .apply(
                "s-1",
                SessionEvent::AdminConfirmReschedule,
                Actor::Admin,
                None,
                utc("2026-03-10T09:00:00Z"),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: SessionState::Active,
                ..
            }
        ));
        let record = fx.ledger.get_session("s-1").expect("get").expect("row");
        assert_eq!(record.state, SessionState::Active);
        assert!(record.history.is_empty());
        assert!(fx.transport.sent().is_empty());
    }

    #[test]
    fn unknown_session_is_not_found() {
        let fx = fixture();
        let err = fx
            .machine
            .apply(
                "nope",
                SessionEvent::AdminCancel,
                Actor::Admin,
                None,
                utc("2026-03-10T09:00:00Z"),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::SessionNotFound(_)));
    }

    #[test]
    fn reactivation_requires_admin() {
        let fx = fixture();
        let now = utc("2026-03-10T09:00:00Z");
        fx.machine
            .apply("s-1", SessionEvent::AdminCancel, Actor::Admin, Some("studio closed"), now)
            .expect("cancel");

        let err = fx.machine.reactivate("s-1", Actor::Client, None, now).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                event: TransitionRequest::Reactivate,
                ..
            }
        ));

        let record = fx
            .machine
            .reactivate("s-1", Actor::Admin, Some("reopened"), now)
            .expect("reactivate");
        assert_eq!(record.state, SessionState::Active);
        assert_eq!(record.history.len(), 2);
        assert_eq!(fx.transport.sent_to(ADMIN).len(), 2);
    }

    #[test]
    fn active_session_cannot_be_reactivated() {
        let fx = fixture();
        let err = fx
            .machine
            .reactivate("s-1", Actor::Admin, None, utc("2026-03-10T09:00:00Z"))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[test]
    fn failed_admin_notice_keeps_transition() {
        let fx = fixture();
        fx.transport.fail_for(ADMIN);
        let record = fx
            .machine
            .apply(
                "s-1",
                SessionEvent::AdminNoShow,
                Actor::Admin,
                Some("sick"),
                utc("2026-03-10T09:00:00Z"),
            )
            .expect("transition");
        assert_eq!(record.state, SessionState::NoShow);
    }
}
