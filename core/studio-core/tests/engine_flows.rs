use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

use studio_core::messages::NO_SESSIONS_WEEKLY;
use studio_core::{
    Actor, Client, ClientIndex, DeliveryStatus, EngineError, FileSessionSource,
    InMemorySessionSource, InboundOutcome, RecordingTransport, ReminderKind, SentMessage, Session,
    SessionEvent, SessionState, StudioConfig, StudioEngine,
};

const ADMIN: &str = "27825550000";
const ANNA: &str = "27820000001";
const BEN: &str = "27820000002";

fn utc(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .expect("timestamp")
        .with_timezone(&Utc)
}

fn session(id: &str, client: &str, start: DateTime<Utc>) -> Session {
    Session {
        id: id.to_string(),
        client_name: client.to_string(),
        start_time: start,
        end_time: start + Duration::hours(1),
        session_type: "Single".to_string(),
    }
}

fn clients() -> Vec<Client> {
    vec![
        Client {
            name: "Anna".to_string(),
            phone: "082 000 0001".to_string(),
        },
        Client {
            name: "Ben".to_string(),
            phone: "+27 82 000 0002".to_string(),
        },
    ]
}

fn config(dir: &TempDir) -> StudioConfig {
    StudioConfig {
        admin_phone: "082 555 0000".to_string(),
        db_path: Some(dir.path().join("state.db")),
        ..StudioConfig::default()
    }
}

struct Harness {
    _dir: TempDir,
    transport: Arc<RecordingTransport>,
    engine: Arc<StudioEngine>,
}

fn harness(sessions: Vec<Session>) -> Harness {
    let dir = tempfile::tempdir().expect("temp dir");
    let transport = Arc::new(RecordingTransport::new());
    let engine = StudioEngine::with_adapters(
        &config(&dir),
        Arc::new(InMemorySessionSource::new(sessions)),
        Arc::new(ClientIndex::new(clients())),
        transport.clone(),
    )
    .expect("engine");
    Harness {
        _dir: dir,
        transport,
        engine: Arc::new(engine),
    }
}

fn delivered(h: &Harness, key: &str, kind: ReminderKind) -> usize {
    h.engine
        .reminders(key)
        .expect("reminders")
        .iter()
        .filter(|record| record.kind == kind && record.delivery_status == DeliveryStatus::Delivered)
        .count()
}

#[test]
fn repeated_tomorrow_runs_send_each_reminder_once() {
    let h = harness(vec![
        session("s-1", "Anna", utc("2026-03-11T06:00:00Z")),
        session("s-2", "Ben", utc("2026-03-11T08:00:00Z")),
    ]);
    let first = h
        .engine
        .run_trigger(ReminderKind::Tomorrow, utc("2026-03-10T16:00:00Z"))
        .expect("first run");
    let second = h
        .engine
        .run_trigger(ReminderKind::Tomorrow, utc("2026-03-10T16:05:00Z"))
        .expect("second run");

    assert_eq!(first.sent, 2);
    assert_eq!(second.sent, 0);
    assert_eq!(second.already_sent, 2);
    assert_eq!(h.transport.sent().len(), 2);
    assert_eq!(delivered(&h, "s-1", ReminderKind::Tomorrow), 1);
}

#[test]
fn overlapping_runs_record_at_most_one_success() {
    let h = harness(vec![session("s-1", "Anna", utc("2026-03-10T08:30:00Z"))]);
    let now = utc("2026-03-10T08:00:00Z");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&h.engine);
            thread::spawn(move || engine.run_trigger(ReminderKind::NextHour, now))
        })
        .collect();
    for handle in handles {
        handle.join().expect("join").expect("run");
    }

    assert_eq!(delivered(&h, "s-1", ReminderKind::NextHour), 1);
}

#[test]
fn next_hour_window_excludes_start_at_now_and_beyond_an_hour() {
    let now = utc("2026-03-10T08:00:00Z");
    let h = harness(vec![
        session("at-now", "Anna", now),
        session("in-30", "Ben", now + Duration::minutes(30)),
        session("in-90", "Anna", now + Duration::minutes(90)),
    ]);

    let report = h
        .engine
        .run_trigger(ReminderKind::NextHour, now)
        .expect("run");

    assert_eq!(report.sent, 1);
    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].phone(), BEN);
    assert_eq!(sent[0].template(), Some("next-hour-reminder"));
    assert_eq!(delivered(&h, "at-now", ReminderKind::NextHour), 0);
    assert_eq!(delivered(&h, "in-90", ReminderKind::NextHour), 0);
}

#[test]
fn weekly_sends_one_message_per_client() {
    // Sunday evening local time; next week starts Monday 16 March.
    let now = utc("2026-03-15T16:00:00Z");
    let h = harness(vec![
        session("a-1", "Anna", utc("2026-03-16T06:00:00Z")),
        session("a-2", "anna ", utc("2026-03-18T07:00:00Z")),
        session("late", "Anna", utc("2026-03-24T07:00:00Z")),
    ]);

    let report = h.engine.run_trigger(ReminderKind::Weekly, now).expect("run");
    assert_eq!(report.sent, 2);

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 2);

    let anna = h.transport.sent_to(ANNA);
    assert_eq!(anna.len(), 1);
    match &anna[0] {
        SentMessage::Template { template, params, .. } => {
            assert_eq!(template, "weekly-schedule");
            assert_eq!(params[1], "Mon 16 Mar 08:00 (Single) • Wed 18 Mar 09:00 (Single)");
        }
        other => panic!("unexpected message {:?}", other),
    }

    let ben = h.transport.sent_to(BEN);
    assert_eq!(ben.len(), 1);
    match &ben[0] {
        SentMessage::Template { params, .. } => assert_eq!(params[1], NO_SESSIONS_WEEKLY),
        other => panic!("unexpected message {:?}", other),
    }

    let again = h.engine.run_trigger(ReminderKind::Weekly, now).expect("rerun");
    assert_eq!(again.sent, 0);
    assert_eq!(again.already_sent, 2);
}

#[test]
fn failed_delivery_is_retried_next_run() {
    let h = harness(vec![session("s-1", "Anna", utc("2026-03-11T06:00:00Z"))]);
    h.transport.fail_for(ANNA);

    let first = h
        .engine
        .run_trigger(ReminderKind::Tomorrow, utc("2026-03-10T16:00:00Z"))
        .expect("first run");
    assert_eq!(first.failed, 1);
    assert_eq!(delivered(&h, "s-1", ReminderKind::Tomorrow), 0);

    h.transport.recover(ANNA);
    let second = h
        .engine
        .run_trigger(ReminderKind::Tomorrow, utc("2026-03-10T18:00:00Z"))
        .expect("second run");
    assert_eq!(second.sent, 1);
    assert_eq!(delivered(&h, "s-1", ReminderKind::Tomorrow), 1);

    let statuses: Vec<_> = h
        .engine
        .reminders("s-1")
        .expect("reminders")
        .into_iter()
        .map(|record| record.delivery_status)
        .collect();
    assert_eq!(statuses, vec![DeliveryStatus::Failed, DeliveryStatus::Delivered]);
}

#[test]
fn morning_digest_lists_sessions_in_start_order() {
    let h = harness(vec![
        session("s-2", "Ben", utc("2026-03-10T08:00:00Z")),
        session("s-1", "Anna", utc("2026-03-10T06:00:00Z")),
    ]);
    let now = utc("2026-03-10T04:00:00Z");

    let report = h
        .engine
        .run_trigger(ReminderKind::MorningDigest, now)
        .expect("digest");
    assert_eq!(report.sent, 1);

    let admin_messages = h.transport.sent_to(ADMIN);
    assert_eq!(admin_messages.len(), 1);
    match &admin_messages[0] {
        SentMessage::Template { template, params, .. } => {
            assert_eq!(template, "morning-digest");
            assert_eq!(params[0], "2");
            assert_eq!(params[1], "08:00 Anna (Single) • 10:00 Ben (Single)");
        }
        other => panic!("unexpected message {:?}", other),
    }
    assert_eq!(delivered(&h, "digest:morning:2026-03-10", ReminderKind::MorningDigest), 1);
}

#[test]
fn evening_digest_marks_closed_sessions() {
    let h = harness(vec![
        session("s-2", "Ben", utc("2026-03-11T08:00:00Z")),
        session("s-1", "Anna", utc("2026-03-11T06:00:00Z")),
    ]);
    h.engine
        .run_trigger(ReminderKind::Tomorrow, utc("2026-03-10T16:00:00Z"))
        .expect("materialize");
    h.engine
        .transition(
            "s-1",
            SessionEvent::AdminCancel,
            Actor::Admin,
            None,
            utc("2026-03-10T17:00:00Z"),
        )
        .expect("cancel");
    h.engine
        .run_trigger(ReminderKind::EveningDigest, utc("2026-03-10T18:00:00Z"))
        .expect("evening digest");

    let digest = h
        .transport
        .sent_to(ADMIN)
        .into_iter()
        .find(|message| message.template() == Some("evening-digest"))
        .expect("evening digest sent");
    match digest {
        SentMessage::Template { params, .. } => {
            assert_eq!(params[0], "2");
            assert_eq!(params[1], "08:00 Anna (Single) [cancelled] • 10:00 Ben (Single)");
        }
        other => panic!("unexpected message {:?}", other),
    }
}

#[test]
fn closed_sessions_get_no_client_reminders() {
    let h = harness(vec![session("s-1", "Anna", utc("2026-03-11T06:00:00Z"))]);
    let now = utc("2026-03-10T16:00:00Z");
    h.engine
        .run_trigger(ReminderKind::MorningDigest, utc("2026-03-11T03:00:00Z"))
        .expect("materialize via digest");
    h.engine
        .transition("s-1", SessionEvent::AdminNoShow, Actor::Admin, Some("sick"), now)
        .expect("no-show");

    let report = h
        .engine
        .run_trigger(ReminderKind::Tomorrow, now)
        .expect("run");
    assert_eq!(report.sent, 0);
    assert_eq!(report.skipped, 1);
    assert!(h.transport.sent_to(ANNA).is_empty());
}

#[test]
fn client_keyword_requests_reschedule_and_admin_confirms() {
    let now = utc("2026-03-10T08:00:00Z");
    let h = harness(vec![
        session("later", "Anna", utc("2026-03-13T06:00:00Z")),
        session("next", "Anna", utc("2026-03-11T06:00:00Z")),
        session("ben", "Ben", utc("2026-03-11T07:00:00Z")),
    ]);

    let outcome = h
        .engine
        .handle_inbound(&json!({"from": "+27 82 000 0001", "text": " reschedule "}), now)
        .expect("inbound");
    assert_eq!(
        outcome,
        InboundOutcome::Transitioned {
            session_id: "next".to_string()
        }
    );

    let admin = h.transport.sent_to(ADMIN);
    assert_eq!(admin.len(), 1);
    assert_eq!(admin[0].template(), Some("reschedule-admin-alert"));
    assert!(h.transport.sent_to(ANNA).is_empty());

    let record = h
        .engine
        .transition("next", SessionEvent::AdminConfirmReschedule, Actor::Admin, None, now)
        .expect("confirm");
    assert_eq!(record.state, SessionState::Rescheduled);
    assert_eq!(record.history.len(), 2);
    assert_eq!(record.history[0].actor, Actor::Client);
    assert_eq!(record.history[1].actor, Actor::Admin);
}

#[test]
fn redelivered_keyword_leaves_later_sessions_alone() {
    let now = utc("2026-03-10T08:00:00Z");
    let h = harness(vec![
        session("later", "Anna", utc("2026-03-13T06:00:00Z")),
        session("next", "Anna", utc("2026-03-11T06:00:00Z")),
    ]);
    let payload = json!({"from": ANNA, "text": "reschedule"});

    let first = h.engine.handle_inbound(&payload, now).expect("first");
    assert_eq!(
        first,
        InboundOutcome::Transitioned {
            session_id: "next".to_string()
        }
    );

    let second = h.engine.handle_inbound(&payload, now).expect("second");
    assert_eq!(
        second,
        InboundOutcome::Ignored {
            reason: "reschedule already requested".to_string()
        }
    );

    // A different keyword from the same client is also a repeat.
    let third = h
        .engine
        .handle_inbound(&json!({"from": "0820000001", "text": "CANCEL"}), now)
        .expect("third");
    assert!(!third.acted());

    let later = h.engine.session("later").expect("query").expect("later");
    assert_eq!(later.state, SessionState::Active);
    assert!(later.history.is_empty());
    assert_eq!(h.transport.sent_to(ADMIN).len(), 1);

    // Once the admin resolves the request, a new keyword is acted on.
    h.engine
        .transition("next", SessionEvent::AdminConfirmReschedule, Actor::Admin, None, now)
        .expect("confirm");
    let fourth = h.engine.handle_inbound(&payload, now).expect("fourth");
    assert_eq!(
        fourth,
        InboundOutcome::Transitioned {
            session_id: "later".to_string()
        }
    );
}

#[test]
fn unrecognised_inbound_text_is_ignored() {
    let now = utc("2026-03-10T08:00:00Z");
    let h = harness(vec![session("s-1", "Anna", utc("2026-03-11T06:00:00Z"))]);

    let outcome = h
        .engine
        .handle_inbound(&json!({"from": ANNA, "text": "see you tomorrow"}), now)
        .expect("inbound");
    assert!(matches!(outcome, InboundOutcome::Ignored { .. }));

    let outcome = h
        .engine
        .handle_inbound(&json!({"from": "27829999999", "text": "CANCEL"}), now)
        .expect("inbound");
    assert!(matches!(outcome, InboundOutcome::Ignored { .. }));
    assert!(h.transport.sent().is_empty());
}

#[test]
fn keyword_without_upcoming_session_reports_none() {
    let now = utc("2026-03-10T08:00:00Z");
    let h = harness(vec![session("old", "Anna", utc("2026-03-09T06:00:00Z"))]);
    let outcome = h
        .engine
        .handle_inbound(&json!({"from": ANNA, "text": "Can’t make it"}), now)
        .expect("inbound");
    assert_eq!(
        outcome,
        InboundOutcome::NoActiveSession {
            client_name: "Anna".to_string()
        }
    );
}

#[test]
fn malformed_inbound_payload_is_rejected_without_action() {
    let h = harness(Vec::new());
    let err = h
        .engine
        .handle_inbound(&json!({"text": "CANCEL"}), utc("2026-03-10T08:00:00Z"))
        .unwrap_err();
    assert!(matches!(err, EngineError::MalformedInboundPayload(_)));
    assert!(h.transport.sent().is_empty());
}

#[test]
fn only_admin_reactivates_closed_sessions() {
    let now = utc("2026-03-10T08:00:00Z");
    let h = harness(vec![session("s-1", "Anna", utc("2026-03-11T06:00:00Z"))]);
    h.engine
        .run_trigger(ReminderKind::Tomorrow, now)
        .expect("materialize");

    for (event, closed) in [
        (SessionEvent::AdminCancel, SessionState::Cancelled),
        (SessionEvent::AdminNoShow, SessionState::NoShow),
        (SessionEvent::AdminReschedule, SessionState::Rescheduled),
    ] {
        let record = h
            .engine
            .transition("s-1", event, Actor::Admin, None, now)
            .expect("close");
        assert_eq!(record.state, closed);

        let err = h
            .engine
            .transition("s-1", SessionEvent::ClientRescheduleRequest, Actor::Client, None, now)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));

        let err = h.engine.reactivate("s-1", Actor::Client, None, now).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert_eq!(
            h.engine.session("s-1").expect("query").expect("row").state,
            closed
        );

        let record = h
            .engine
            .reactivate("s-1", Actor::Admin, Some("rebooked"), now)
            .expect("reactivate");
        assert_eq!(record.state, SessionState::Active);
    }

    let history = h.engine.session("s-1").expect("query").expect("row").history;
    assert_eq!(history.len(), 6);
}

#[test]
fn unreachable_roster_aborts_run_and_alerts_admin() {
    let dir = tempfile::tempdir().expect("temp dir");
    let transport = Arc::new(RecordingTransport::new());
    let engine = StudioEngine::with_adapters(
        &config(&dir),
        Arc::new(FileSessionSource::new(dir.path().join("missing-roster.json"))),
        Arc::new(ClientIndex::new(clients())),
        transport.clone(),
    )
    .expect("engine");

    let err = engine
        .run_trigger(ReminderKind::Tomorrow, utc("2026-03-10T16:00:00Z"))
        .unwrap_err();
    assert!(matches!(err, EngineError::Configuration { .. }));

    let alerts = transport.sent_to(ADMIN);
    assert_eq!(alerts.len(), 1);
    match &alerts[0] {
        SentMessage::Text { body, .. } => assert!(body.contains("tomorrow run failed")),
        other => panic!("unexpected message {:?}", other),
    }
}
