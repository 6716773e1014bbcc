//! Core domain types shared across the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use studio_protocol::{Actor, ReminderKind, SessionEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    RescheduleRequested,
    Rescheduled,
    Cancelled,
    NoShow,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::RescheduleRequested => "reschedule_requested",
            SessionState::Rescheduled => "rescheduled",
            SessionState::Cancelled => "cancelled",
            SessionState::NoShow => "no_show",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "active" => Some(SessionState::Active),
            "reschedule_requested" => Some(SessionState::RescheduleRequested),
            "rescheduled" => Some(SessionState::Rescheduled),
            "cancelled" => Some(SessionState::Cancelled),
            "no_show" => Some(SessionState::NoShow),
            _ => None,
        }
    }

    /// States only an admin reactivation can leave.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Rescheduled | SessionState::Cancelled | SessionState::NoShow
        )
    }

    /// Human label used in admin-facing copy.
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::RescheduleRequested => "reschedule requested",
            SessionState::Rescheduled => "rescheduled",
            SessionState::Cancelled => "cancelled",
            SessionState::NoShow => "no-show",
        }
    }
}

/// One booked class instance as the calendar sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub client_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub session_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub from_state: SessionState,
    pub to_state: SessionState,
    pub actor: Actor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A session plus its lifecycle, as held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    pub session: Session,
    pub state: SessionState,
    pub state_changed_at: DateTime<Utc>,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "delivered" => Some(DeliveryStatus::Delivered),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

/// One send attempt. Append-only; a `Delivered` row for a dedup key is the
/// only signal that suppresses later sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderRecord {
    pub session_id: String,
    pub kind: ReminderKind,
    pub sent_at: DateTime<Utc>,
    pub recipient_phone: String,
    pub delivery_status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DeliveryResult {
    Delivered,
    Failed { detail: String },
}

impl DeliveryResult {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryResult::Delivered)
    }

    pub fn status(&self) -> DeliveryStatus {
        match self {
            DeliveryResult::Delivered => DeliveryStatus::Delivered,
            DeliveryResult::Failed { .. } => DeliveryStatus::Failed,
        }
    }
}
