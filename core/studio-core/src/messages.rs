//! Message rendering: maps each outbound kind to a template (with its
//! positional parameters) or a free-text body.
//!
//! Template parameters must stay on one line; the messaging platform rejects
//! newlines and tabs inside body parameters.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

use crate::types::{ReminderKind, Session, SessionState};

pub const NO_SESSIONS_DIGEST: &str = "No sessions booked";
pub const NO_SESSIONS_WEEKLY: &str = "No sessions booked for next week. Reply to book a slot.";

const ITEM_SEPARATOR: &str = " • ";

/// Everything the Dispatcher knows how to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Reminder(ReminderKind),
    RescheduleAlert,
    /// Admin notice for any other lifecycle change.
    StatusUpdate,
    /// Operational free text (run failures, staging confirmations).
    Notice,
}

impl MessageKind {
    pub fn template_name(&self) -> Option<&'static str> {
        match self {
            MessageKind::Reminder(ReminderKind::Tomorrow) => Some("tomorrow-reminder"),
            MessageKind::Reminder(ReminderKind::NextHour) => Some("next-hour-reminder"),
            MessageKind::Reminder(ReminderKind::Weekly) => Some("weekly-schedule"),
            MessageKind::Reminder(ReminderKind::MorningDigest) => Some("morning-digest"),
            MessageKind::Reminder(ReminderKind::EveningDigest) => Some("evening-digest"),
            MessageKind::RescheduleAlert => Some("reschedule-admin-alert"),
            MessageKind::StatusUpdate | MessageKind::Notice => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MessageKind::Reminder(kind) => kind.as_str(),
            MessageKind::RescheduleAlert => "reschedule_alert",
            MessageKind::StatusUpdate => "status_update",
            MessageKind::Notice => "notice",
        }
    }

    pub fn is_client_facing(&self) -> bool {
        matches!(
            self,
            MessageKind::Reminder(ReminderKind::Tomorrow)
                | MessageKind::Reminder(ReminderKind::NextHour)
                | MessageKind::Reminder(ReminderKind::Weekly)
        )
    }
}

/// A rendered message, ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Template {
        name: &'static str,
        params: Vec<String>,
    },
    Text {
        body: String,
    },
}

/// Render `kind` with `params`. Template kinds pass params through
/// positionally; free-text kinds join them into one body.
pub fn render(kind: MessageKind, params: &[String]) -> OutboundMessage {
    match kind.template_name() {
        Some(name) => OutboundMessage::Template {
            name,
            params: params.iter().map(|param| template_safe(param)).collect(),
        },
        None => OutboundMessage::Text {
            body: params.join("\n"),
        },
    }
}

/// Collapse newlines, tabs and runs of spaces.
pub fn template_safe(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn local_time(instant: DateTime<Utc>, offset: FixedOffset) -> String {
    instant.with_timezone(&offset).format("%H:%M").to_string()
}

/// `tomorrow` / `next_hour`: `[start time]`.
pub fn session_reminder_params(session: &Session, offset: FixedOffset) -> Vec<String> {
    vec![local_time(session.start_time, offset)]
}

/// `weekly`: `[client name, schedule]`. `sessions` are expected in start
/// order; an empty slice renders the no-sessions copy.
pub fn weekly_params(client_name: &str, sessions: &[&Session], offset: FixedOffset) -> Vec<String> {
    let schedule = if sessions.is_empty() {
        NO_SESSIONS_WEEKLY.to_string()
    } else {
        sessions
            .iter()
            .map(|session| {
                let local = session.start_time.with_timezone(&offset);
                let mut line = local.format("%a %d %b %H:%M").to_string();
                if !session.session_type.is_empty() {
                    line.push_str(&format!(" ({})", session.session_type));
                }
                line
            })
            .collect::<Vec<_>>()
            .join(ITEM_SEPARATOR)
    };
    vec![client_name.trim().to_string(), schedule]
}

/// Morning/evening digest: `[count, schedule]`. Entries are sorted by start
/// time (stable, so equal starts keep source order) and non-active sessions
/// carry their state.
pub fn digest_params(
    entries: &[(Session, SessionState)],
    offset: FixedOffset,
) -> Vec<String> {
    let mut ordered: Vec<&(Session, SessionState)> = entries.iter().collect();
    ordered.sort_by_key(|(session, _)| session.start_time);

    let body = if ordered.is_empty() {
        NO_SESSIONS_DIGEST.to_string()
    } else {
        ordered
            .iter()
            .map(|(session, state)| {
                let mut line = format!(
                    "{} {}",
                    local_time(session.start_time, offset),
                    session.client_name
                );
                if !session.session_type.is_empty() {
                    line.push_str(&format!(" ({})", session.session_type));
                }
                if *state != SessionState::Active {
                    line.push_str(&format!(" [{}]", state.label()));
                }
                line
            })
            .collect::<Vec<_>>()
            .join(ITEM_SEPARATOR)
    };
    vec![ordered.len().to_string(), body]
}

/// `reschedule-admin-alert`: `[client name, when]`.
pub fn reschedule_alert_params(session: &Session, offset: FixedOffset) -> Vec<String> {
    let when = session
        .start_time
        .with_timezone(&offset)
        .format("%a %d %b %H:%M")
        .to_string();
    vec![session.client_name.clone(), when]
}

pub fn status_update_body(
    session: &Session,
    from: SessionState,
    to: SessionState,
    reason: Option<&str>,
    offset: FixedOffset,
) -> String {
    let when = session
        .start_time
        .with_timezone(&offset)
        .format("%a %d %b %H:%M");
    let mut body = format!(
        "{} on {}: {} → {}",
        session.client_name,
        when,
        from.label(),
        to.label()
    );
    if let Some(reason) = reason.filter(|reason| !reason.trim().is_empty()) {
        body.push_str(&format!(" ({})", reason.trim()));
    }
    body
}

/// Dedup key for a client's weekly schedule.
pub fn weekly_key(client_name: &str, monday: NaiveDate) -> String {
    format!(
        "weekly:{}:{}",
        crate::phone::normalize_name(client_name),
        monday.format("%Y-%m-%d")
    )
}

/// Dedup key for an admin digest covering `day`.
pub fn digest_key(kind: ReminderKind, day: NaiveDate) -> String {
    let slot = match kind {
        ReminderKind::EveningDigest => "evening",
        _ => "morning",
    };
    format!("digest:{}:{}", slot, day.format("%Y-%m-%d"))
}
