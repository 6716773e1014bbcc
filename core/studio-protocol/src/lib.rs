//! IPC protocol types and validation for studio-daemon.
//!
//! Shared by the daemon and `studio-ctl` so the wire schema cannot drift.
//! The daemon remains the authority on validation; clients reuse the same
//! types to build valid requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB

const MAX_SESSION_ID_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    GetHealth,
    RunTrigger,
    InboundMessage,
    Transition,
    Reactivate,
    GetSession,
    GetReminders,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Periodic job kinds. Each kind is also the ledger key for the reminders it
/// produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    Tomorrow,
    NextHour,
    Weekly,
    MorningDigest,
    EveningDigest,
}

impl ReminderKind {
    pub const ALL: [ReminderKind; 5] = [
        ReminderKind::Tomorrow,
        ReminderKind::NextHour,
        ReminderKind::Weekly,
        ReminderKind::MorningDigest,
        ReminderKind::EveningDigest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderKind::Tomorrow => "tomorrow",
            ReminderKind::NextHour => "next_hour",
            ReminderKind::Weekly => "weekly",
            ReminderKind::MorningDigest => "morning_digest",
            ReminderKind::EveningDigest => "evening_digest",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "tomorrow" => Some(ReminderKind::Tomorrow),
            "next_hour" => Some(ReminderKind::NextHour),
            "weekly" => Some(ReminderKind::Weekly),
            "morning_digest" => Some(ReminderKind::MorningDigest),
            "evening_digest" => Some(ReminderKind::EveningDigest),
            _ => None,
        }
    }
}

/// Who asked for a session state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Client,
    Admin,
}

impl Actor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Actor::Client => "client",
            Actor::Admin => "admin",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "client" => Some(Actor::Client),
            "admin" => Some(Actor::Admin),
            _ => None,
        }
    }
}

/// Requested lifecycle events. Reactivation is deliberately absent; it has
/// its own method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    ClientRescheduleRequest,
    AdminReschedule,
    AdminNoShow,
    AdminCancel,
    AdminConfirmReschedule,
}

impl SessionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEvent::ClientRescheduleRequest => "client_reschedule_request",
            SessionEvent::AdminReschedule => "admin_reschedule",
            SessionEvent::AdminNoShow => "admin_no_show",
            SessionEvent::AdminCancel => "admin_cancel",
            SessionEvent::AdminConfirmReschedule => "admin_confirm_reschedule",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerParams {
    pub kind: ReminderKind,
    /// Logical invocation time; the daemon uses its own clock when absent.
    #[serde(default)]
    pub now: Option<String>,
}

impl TriggerParams {
    pub fn invoked_at(&self) -> Option<DateTime<Utc>> {
        self.now.as_deref().and_then(parse_rfc3339)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InboundParams {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionParams {
    pub session_id: String,
    pub event: SessionEvent,
    pub actor: Actor,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReactivateParams {
    pub session_id: String,
    pub actor: Actor,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionQueryParams {
    pub session_id: String,
}

pub fn parse_trigger(params: Value) -> Result<TriggerParams, ErrorInfo> {
    let parsed: TriggerParams = parse_params(params, "trigger")?;
    if let Some(now) = parsed.now.as_deref() {
        if parse_rfc3339(now).is_none() {
            return Err(ErrorInfo::new("invalid_timestamp", "now must be RFC3339"));
        }
    }
    Ok(parsed)
}

/// Inbound payloads come from an external platform; unknown fields are
/// tolerated and only `from`/`text` are required.
pub fn parse_inbound(params: Value) -> Result<InboundParams, ErrorInfo> {
    if !params.is_object() {
        return Err(ErrorInfo::new("invalid_params", "params must be an object"));
    }
    let parsed: InboundParams = parse_params(params, "inbound message")?;
    require_string(&parsed.from, "from")?;
    require_string(&parsed.text, "text")?;
    Ok(parsed)
}

pub fn parse_transition(params: Value) -> Result<TransitionParams, ErrorInfo> {
    let parsed: TransitionParams = parse_params(params, "transition")?;
    validate_session_id(&parsed.session_id)?;
    Ok(parsed)
}

pub fn parse_reactivate(params: Value) -> Result<ReactivateParams, ErrorInfo> {
    let parsed: ReactivateParams = parse_params(params, "reactivate")?;
    validate_session_id(&parsed.session_id)?;
    Ok(parsed)
}

pub fn parse_session_query(params: Value) -> Result<SessionQueryParams, ErrorInfo> {
    let parsed: SessionQueryParams = parse_params(params, "session query")?;
    validate_session_id(&parsed.session_id)?;
    Ok(parsed)
}

fn parse_params<T: serde::de::DeserializeOwned>(
    params: Value,
    label: &str,
) -> Result<T, ErrorInfo> {
    serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("{} payload is invalid: {}", label, err),
        )
    })
}

fn validate_session_id(session_id: &str) -> Result<(), ErrorInfo> {
    if session_id.trim().is_empty() {
        return Err(ErrorInfo::new("invalid_session_id", "session_id is required"));
    }
    if session_id.len() > MAX_SESSION_ID_LEN {
        return Err(ErrorInfo::new(
            "invalid_session_id",
            "session_id must be 256 characters or fewer",
        ));
    }
    Ok(())
}

fn require_string(value: &Option<String>, field: &str) -> Result<(), ErrorInfo> {
    if let Some(candidate) = value {
        if !candidate.trim().is_empty() {
            return Ok(());
        }
    }
    Err(ErrorInfo::new(
        "missing_field",
        format!("{} is required", field),
    ))
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
