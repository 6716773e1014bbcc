//! SQLite persistence for the reminder engine.
//!
//! Three tables: `sessions` (materialized calendar entries plus lifecycle
//! state), `session_history` (append-only transition audit) and
//! `reminder_log` (append-only send attempts). A partial unique index on
//! delivered `(session_id, kind)` rows makes recording a success idempotent
//! under overlapping or repeated trigger runs.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::types::{
    Actor, DeliveryStatus, HistoryEntry, ReminderKind, ReminderRecord, Session, SessionRecord,
    SessionState,
};

pub struct Ledger {
    path: PathBuf,
}

/// Outcome of a conditional state write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionWrite {
    Applied,
    /// The row was not in the expected state (or is gone); nothing written.
    Conflict { current: Option<SessionState> },
}

impl Ledger {
    pub fn new(path: PathBuf) -> Result<Self, String> {
        let ledger = Self { path };
        ledger.init_schema()?;
        Ok(ledger)
    }

    pub fn has_sent(&self, session_id: &str, kind: ReminderKind) -> Result<bool, String> {
        let count = self.with_connection(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM reminder_log \
                 WHERE session_id = ?1 AND kind = ?2 AND status = 'delivered'",
                params![session_id, kind.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .map_err(|err| format!("Failed to query reminder log: {}", err))
        })?;
        Ok(count > 0)
    }

    /// Append one send attempt. Recording a second success for the same
    /// `(session_id, kind)` is a no-op; returns whether a row was written.
    pub fn record(
        &self,
        session_id: &str,
        kind: ReminderKind,
        recipient: &str,
        status: DeliveryStatus,
        detail: Option<&str>,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, String> {
        self.with_connection(|conn| {
            let changed = conn
                .execute(
                    "INSERT OR IGNORE INTO reminder_log \
                        (session_id, kind, sent_at, recipient, status, detail) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        session_id,
                        kind.as_str(),
                        sent_at.to_rfc3339(),
                        recipient,
                        status.as_str(),
                        detail
                    ],
                )
                .map_err(|err| format!("Failed to insert reminder record: {}", err))?;
            Ok(changed > 0)
        })
    }

    pub fn records_for(&self, session_id: &str) -> Result<Vec<ReminderRecord>, String> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT session_id, kind, sent_at, recipient, status, detail \
                     FROM reminder_log WHERE session_id = ?1 ORDER BY id ASC",
                )
                .map_err(|err| format!("Failed to prepare reminder query: {}", err))?;

            let rows = stmt
                .query_map(params![session_id], |row| {
                    Ok(ReminderRecord {
                        session_id: row.get(0)?,
                        kind: decode_kind(row, 1)?,
                        sent_at: decode_time(row, 2)?,
                        recipient_phone: row.get(3)?,
                        delivery_status: decode_status(row, 4)?,
                        detail: row.get(5)?,
                    })
                })
                .map_err(|err| format!("Failed to query reminder records: {}", err))?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row.map_err(|err| format!("Failed to decode reminder row: {}", err))?);
            }
            Ok(records)
        })
    }

    /// Materialize calendar sessions. New rows start `Active`; existing rows
    /// get fresh calendar fields but keep their state. Returns the stored
    /// state of every session passed in.
    pub fn sync_sessions(
        &self,
        sessions: &[Session],
        seen_at: DateTime<Utc>,
    ) -> Result<HashMap<String, SessionState>, String> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| format!("Failed to begin session sync: {}", err))?;
            let mut states = HashMap::new();
            {
                let mut upsert = tx
                    .prepare(
                        "INSERT INTO sessions \
                            (session_id, client_name, session_type, start_time, end_time, \
                             state, first_seen_at, state_changed_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7) \
                         ON CONFLICT(session_id) DO UPDATE SET \
                            client_name = excluded.client_name, \
                            session_type = excluded.session_type, \
                            start_time = excluded.start_time, \
                            end_time = excluded.end_time",
                    )
                    .map_err(|err| format!("Failed to prepare session upsert: {}", err))?;
                let mut select = tx
                    .prepare("SELECT state FROM sessions WHERE session_id = ?1")
                    .map_err(|err| format!("Failed to prepare state query: {}", err))?;

                for session in sessions {
                    upsert
                        .execute(params![
                            session.id,
                            session.client_name,
                            session.session_type,
                            session.start_time.to_rfc3339(),
                            session.end_time.to_rfc3339(),
                            SessionState::Active.as_str(),
                            seen_at.to_rfc3339()
                        ])
                        .map_err(|err| format!("Failed to upsert session: {}", err))?;
                    let state = select
                        .query_row(params![session.id], |row| decode_state(row, 0))
                        .map_err(|err| format!("Failed to read session state: {}", err))?;
                    states.insert(session.id.clone(), state);
                }
            }
            tx.commit()
                .map_err(|err| format!("Failed to commit session sync: {}", err))?;
            Ok(states)
        })
    }

    pub fn session_state(&self, session_id: &str) -> Result<Option<SessionState>, String> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT state FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| decode_state(row, 0),
            )
            .optional()
            .map_err(|err| format!("Failed to query session state: {}", err))
        })
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, String> {
        let record = self.with_connection(|conn| {
            conn.query_row(
                "SELECT session_id, client_name, session_type, start_time, end_time, state, state_changed_at \
                 FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok(SessionRecord {
                        session: Session {
                            id: row.get(0)?,
                            client_name: row.get(1)?,
                            session_type: row.get(2)?,
                            start_time: decode_time(row, 3)?,
                            end_time: decode_time(row, 4)?,
                        },
                        state: decode_state(row, 5)?,
                        state_changed_at: decode_time(row, 6)?,
                        history: Vec::new(),
                    })
                },
            )
            .optional()
            .map_err(|err| format!("Failed to query session: {}", err))
        })?;

        match record {
            Some(mut record) => {
                record.history = self.history(session_id)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub fn history(&self, session_id: &str) -> Result<Vec<HistoryEntry>, String> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT recorded_at, from_state, to_state, actor, reason \
                     FROM session_history WHERE session_id = ?1 ORDER BY id ASC",
                )
                .map_err(|err| format!("Failed to prepare history query: {}", err))?;

            let rows = stmt
                .query_map(params![session_id], |row| {
                    Ok(HistoryEntry {
                        timestamp: decode_time(row, 0)?,
                        from_state: decode_state(row, 1)?,
                        to_state: decode_state(row, 2)?,
                        actor: decode_actor(row, 3)?,
                        reason: row.get(4)?,
                    })
                })
                .map_err(|err| format!("Failed to query history: {}", err))?;

            let mut entries = Vec::new();
            for row in rows {
                entries.push(row.map_err(|err| format!("Failed to decode history row: {}", err))?);
            }
            Ok(entries)
        })
    }

    /// Move a session from `from` to `to` and append the history entry in one
    /// transaction. The update is conditional on the current state, so a
    /// concurrent writer that got there first turns this into a `Conflict`.
    pub fn apply_transition(
        &self,
        session_id: &str,
        from: SessionState,
        to: SessionState,
        actor: Actor,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<TransitionWrite, String> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| format!("Failed to begin transition: {}", err))?;

            let changed = tx
                .execute(
                    "UPDATE sessions SET state = ?1, state_changed_at = ?2 \
                     WHERE session_id = ?3 AND state = ?4",
                    params![to.as_str(), at.to_rfc3339(), session_id, from.as_str()],
                )
                .map_err(|err| format!("Failed to update session state: {}", err))?;

            if changed == 0 {
                let current = tx
                    .query_row(
                        "SELECT state FROM sessions WHERE session_id = ?1",
                        params![session_id],
                        |row| decode_state(row, 0),
                    )
                    .optional()
                    .map_err(|err| format!("Failed to re-read session state: {}", err))?;
                return Ok(TransitionWrite::Conflict { current });
            }

            tx.execute(
                "INSERT INTO session_history (session_id, recorded_at, from_state, to_state, actor, reason) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session_id,
                    at.to_rfc3339(),
                    from.as_str(),
                    to.as_str(),
                    actor.as_str(),
                    reason
                ],
            )
            .map_err(|err| format!("Failed to append history: {}", err))?;

            tx.commit()
                .map_err(|err| format!("Failed to commit transition: {}", err))?;
            Ok(TransitionWrite::Applied)
        })
    }

    fn init_schema(&self) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS sessions (
                    session_id TEXT PRIMARY KEY,
                    client_name TEXT NOT NULL,
                    session_type TEXT NOT NULL DEFAULT '',
                    start_time TEXT NOT NULL,
                    end_time TEXT NOT NULL,
                    state TEXT NOT NULL,
                    first_seen_at TEXT NOT NULL,
                    state_changed_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS session_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id TEXT NOT NULL,
                    recorded_at TEXT NOT NULL,
                    from_state TEXT NOT NULL,
                    to_state TEXT NOT NULL,
                    actor TEXT NOT NULL,
                    reason TEXT
                 );
                 CREATE INDEX IF NOT EXISTS session_history_by_session
                    ON session_history (session_id, id);
                 CREATE TABLE IF NOT EXISTS reminder_log (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    sent_at TEXT NOT NULL,
                    recipient TEXT NOT NULL,
                    status TEXT NOT NULL,
                    detail TEXT
                 );
                 CREATE UNIQUE INDEX IF NOT EXISTS reminder_log_delivered_once
                    ON reminder_log (session_id, kind) WHERE status = 'delivered';
                 COMMIT;",
            )
            .map_err(|err| format!("Failed to initialize schema: {}", err))?;
            Ok(())
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, String>,
    ) -> Result<T, String> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection, String> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| format!("Failed to create ledger data dir: {}", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| format!("Failed to open sqlite db: {}", err))?;

        // busy_timeout first: overlapping trigger runs open connections concurrently.
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| format!("Failed to set busy_timeout: {}", err))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| format!("Failed to enable WAL: {}", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| format!("Failed to set synchronous: {}", err))?;

        Ok(conn)
    }
}

fn conversion_error(index: usize, raw: &str, what: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Unknown {}: {}", what, raw),
        )),
    )
}

fn decode_state(row: &Row<'_>, index: usize) -> rusqlite::Result<SessionState> {
    let raw: String = row.get(index)?;
    SessionState::from_str(&raw).ok_or_else(|| conversion_error(index, &raw, "session state"))
}

fn decode_kind(row: &Row<'_>, index: usize) -> rusqlite::Result<ReminderKind> {
    let raw: String = row.get(index)?;
    ReminderKind::from_str(&raw).ok_or_else(|| conversion_error(index, &raw, "reminder kind"))
}

fn decode_status(row: &Row<'_>, index: usize) -> rusqlite::Result<DeliveryStatus> {
    let raw: String = row.get(index)?;
    DeliveryStatus::from_str(&raw).ok_or_else(|| conversion_error(index, &raw, "delivery status"))
}

fn decode_actor(row: &Row<'_>, index: usize) -> rusqlite::Result<Actor> {
    let raw: String = row.get(index)?;
    Actor::from_str(&raw).ok_or_else(|| conversion_error(index, &raw, "actor"))
}

fn decode_time(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(index)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| conversion_error(index, &raw, "timestamp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    fn ledger() -> (tempfile::TempDir, Ledger) {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let ledger = Ledger::new(temp_dir.path().join("state.db")).expect("ledger init");
        (temp_dir, ledger)
    }

    fn session(id: &str, client: &str, start: &str) -> Session {
        let start = utc(start);
        Session {
            id: id.to_string(),
            client_name: client.to_string(),
            start_time: start,
            end_time: start + chrono::Duration::hours(1),
            session_type: "Duo".to_string(),
        }
    }

    #[test]
    fn schema_includes_ledger_tables() {
        let (_dir, ledger) = ledger();
        let tables: Vec<String> = ledger
            .with_connection(|conn| {
                let mut stmt = conn
                    .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                    .map_err(|err| err.to_string())?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))
                    .map_err(|err| err.to_string())?;
                rows.collect::<Result<Vec<_>, _>>()
                    .map_err(|err| err.to_string())
            })
            .expect("list tables");
        for table in ["reminder_log", "session_history", "sessions"] {
            assert!(tables.iter().any(|name| name == table), "missing {}", table);
        }
    }

    #[test]
    fn failed_attempts_do_not_count_as_sent() {
        let (_dir, ledger) = ledger();
        let at = utc("2026-03-10T18:00:00Z");
        ledger
            .record(
                "s-1",
                ReminderKind::Tomorrow,
                "27820000001",
                DeliveryStatus::Failed,
                Some("timeout"),
                at,
            )
            .expect("record failure");
        assert!(!ledger.has_sent("s-1", ReminderKind::Tomorrow).expect("has_sent"));

        ledger
            .record(
                "s-1",
                ReminderKind::Tomorrow,
                "27820000001",
                DeliveryStatus::Delivered,
                None,
                at,
            )
            .expect("record success");
        assert!(ledger.has_sent("s-1", ReminderKind::Tomorrow).expect("has_sent"));
        assert!(!ledger.has_sent("s-1", ReminderKind::NextHour).expect("has_sent"));
    }

    #[test]
    fn second_success_for_same_key_is_a_no_op() {
        let (_dir, ledger) = ledger();
        let at = utc("2026-03-10T18:00:00Z");
        let first = ledger
            .record(
                "s-1",
                ReminderKind::NextHour,
                "27820000001",
                DeliveryStatus::Delivered,
                None,
                at,
            )
            .expect("first record");
        let second = ledger
            .record(
                "s-1",
                ReminderKind::NextHour,
                "27820000001",
                DeliveryStatus::Delivered,
                None,
                at,
            )
            .expect("second record");
        assert!(first);
        assert!(!second);

        let records = ledger.records_for("s-1").expect("records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].delivery_status, DeliveryStatus::Delivered);
    }

    #[test]
    fn every_failed_attempt_is_kept() {
        let (_dir, ledger) = ledger();
        let at = utc("2026-03-10T18:00:00Z");
        for _ in 0..3 {
            ledger
                .record(
                    "s-1",
                    ReminderKind::Tomorrow,
                    "27820000001",
                    DeliveryStatus::Failed,
                    Some("500"),
                    at,
                )
                .expect("record failure");
        }
        assert_eq!(ledger.records_for("s-1").expect("records").len(), 3);
    }

    #[test]
    fn sync_creates_active_rows_and_preserves_state() {
        let (_dir, ledger) = ledger();
        let seen = utc("2026-03-10T18:00:00Z");
        let s1 = session("s-1", "Anna", "2026-03-11T08:00:00Z");

        let states = ledger.sync_sessions(&[s1.clone()], seen).expect("sync");
        assert_eq!(states.get("s-1"), Some(&SessionState::Active));

        ledger
            .apply_transition(
                "s-1",
                SessionState::Active,
                SessionState::Cancelled,
                Actor::Admin,
                None,
                seen,
            )
            .expect("transition");

        let mut moved = s1.clone();
        moved.start_time = utc("2026-03-11T09:00:00Z");
        let states = ledger.sync_sessions(&[moved], seen).expect("resync");
        assert_eq!(states.get("s-1"), Some(&SessionState::Cancelled));

        let record = ledger.get_session("s-1").expect("get").expect("row");
        assert_eq!(record.session.start_time, utc("2026-03-11T09:00:00Z"));
    }

    #[test]
    fn transition_appends_history() {
        let (_dir, ledger) = ledger();
        let at = utc("2026-03-10T18:00:00Z");
        ledger
            .sync_sessions(&[session("s-1", "Anna", "2026-03-11T08:00:00Z")], at)
            .expect("sync");

        let write = ledger
            .apply_transition(
                "s-1",
                SessionState::Active,
                SessionState::NoShow,
                Actor::Admin,
                Some("sick"),
                at,
            )
            .expect("transition");
        assert_eq!(write, TransitionWrite::Applied);

        let record = ledger.get_session("s-1").expect("get").expect("row");
        assert_eq!(record.state, SessionState::NoShow);
        assert_eq!(record.history.len(), 1);
        assert_eq!(record.history[0].from_state, SessionState::Active);
        assert_eq!(record.history[0].reason.as_deref(), Some("sick"));
    }

    #[test]
    fn stale_expected_state_is_a_conflict() {
        let (_dir, ledger) = ledger();
        let at = utc("2026-03-10T18:00:00Z");
        ledger
            .sync_sessions(&[session("s-1", "Anna", "2026-03-11T08:00:00Z")], at)
            .expect("sync");
        ledger
            .apply_transition(
                "s-1",
                SessionState::Active,
                SessionState::Cancelled,
                Actor::Admin,
                None,
                at,
            )
            .expect("first");

        let write = ledger
            .apply_transition(
                "s-1",
                SessionState::Active,
                SessionState::NoShow,
                Actor::Admin,
                None,
                at,
            )
            .expect("second");
        assert_eq!(
            write,
            TransitionWrite::Conflict {
                current: Some(SessionState::Cancelled)
            }
        );
        assert_eq!(ledger.history("s-1").expect("history").len(), 1);
    }

    #[test]
    fn transition_on_unknown_session_is_a_conflict() {
        let (_dir, ledger) = ledger();
        let write = ledger
            .apply_transition(
                "missing",
                SessionState::Active,
                SessionState::Cancelled,
                Actor::Admin,
                None,
                utc("2026-03-10T18:00:00Z"),
            )
            .expect("transition");
        assert_eq!(write, TransitionWrite::Conflict { current: None });
    }
}
