//! Session Source adapters: a read-only view of booked sessions by time range.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::phone::normalize_name;
use crate::title::parse_title;
use crate::types::Session;

pub trait SessionSource: Send + Sync {
    /// Sessions starting in `[start, end)`, in source order.
    fn list_sessions(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Session>>;
}

/// A calendar entry as exported by the roster.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCalendarEntry {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl RawCalendarEntry {
    pub fn into_session(self) -> Session {
        let parsed = parse_title(&self.title);
        if !parsed.ok {
            debug!(title = %self.title, "Calendar title has no session type");
        }
        let id = match self.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => composite_session_id(&parsed.client_name, self.start),
        };
        Session {
            id,
            client_name: parsed.client_name,
            start_time: self.start,
            end_time: self.end,
            session_type: parsed.session_type,
        }
    }
}

/// Fallback identity for entries without a native id.
pub fn composite_session_id(client_name: &str, start: DateTime<Utc>) -> String {
    format!("{}@{}", normalize_name(client_name), start.to_rfc3339())
}

/// Reads a JSON array of [`RawCalendarEntry`] on every call, so edits to the
/// roster file are picked up by the next trigger.
pub struct FileSessionSource {
    path: PathBuf,
}

impl FileSessionSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn load(&self) -> Result<Vec<RawCalendarEntry>> {
        let content = fs_err::read_to_string(&self.path).map_err(|err| {
            EngineError::configuration("session source unavailable", err.to_string())
        })?;
        serde_json::from_str(&content).map_err(|err| {
            EngineError::configuration(
                format!("session source {} is malformed", self.path.display()),
                err.to_string(),
            )
        })
    }
}

impl SessionSource for FileSessionSource {
    fn list_sessions(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Session>> {
        let entries = self.load()?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.start >= start && entry.start < end)
            .map(RawCalendarEntry::into_session)
            .collect())
    }
}

/// In-process source, used by tests and embedding callers.
#[derive(Default)]
pub struct InMemorySessionSource {
    sessions: Mutex<Vec<Session>>,
}

impl InMemorySessionSource {
    pub fn new(sessions: Vec<Session>) -> Self {
        Self {
            sessions: Mutex::new(sessions),
        }
    }

    pub fn push(&self, session: Session) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.push(session);
        }
    }
}

impl SessionSource for InMemorySessionSource {
    fn list_sessions(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Session>> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|_| EngineError::configuration("session source", "lock poisoned"))?;
        Ok(sessions
            .iter()
            .filter(|session| session.start_time >= start && session.start_time < end)
            .cloned()
            .collect())
    }
}
