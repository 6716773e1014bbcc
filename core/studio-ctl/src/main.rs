//! studio-ctl: command-line client for the studio reminder daemon.
//!
//! Cron calls `trigger` for each periodic job; the webhook relay calls
//! `inbound`; admins use `transition`, `reactivate` and the query commands.
//! Prints the daemon's JSON answer and exits 1 when the daemon reports an
//! error.

mod daemon_client;
mod logging;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use studio_protocol::{Actor, Method, ReminderKind, SessionEvent};

#[derive(Parser)]
#[command(name = "studio-ctl")]
#[command(about = "Studio reminder daemon client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fire a trigger entry point
    Trigger {
        #[arg(value_enum)]
        kind: TriggerKind,

        /// Logical invocation time (RFC3339); defaults to the daemon's clock
        #[arg(long)]
        now: Option<String>,
    },

    /// Forward an inbound client message
    Inbound {
        #[arg(long)]
        from: String,

        #[arg(long)]
        text: String,
    },

    /// Apply a resolved session transition
    Transition {
        session_id: String,

        #[arg(value_enum)]
        event: TransitionEvent,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Return a closed session to active (admin)
    Reactivate {
        session_id: String,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Show a session with its history
    Session { session_id: String },

    /// Show every reminder attempt recorded for a session or slot key
    Reminders { session_id: String },

    /// Check the daemon is up
    Health,
}

#[derive(Clone, Copy, ValueEnum)]
enum TriggerKind {
    Tomorrow,
    NextHour,
    Weekly,
    MorningDigest,
    EveningDigest,
}

impl From<TriggerKind> for ReminderKind {
    fn from(kind: TriggerKind) -> Self {
        match kind {
            TriggerKind::Tomorrow => ReminderKind::Tomorrow,
            TriggerKind::NextHour => ReminderKind::NextHour,
            TriggerKind::Weekly => ReminderKind::Weekly,
            TriggerKind::MorningDigest => ReminderKind::MorningDigest,
            TriggerKind::EveningDigest => ReminderKind::EveningDigest,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TransitionEvent {
    ClientRescheduleRequest,
    AdminReschedule,
    AdminNoShow,
    AdminCancel,
    AdminConfirmReschedule,
}

impl From<TransitionEvent> for SessionEvent {
    fn from(event: TransitionEvent) -> Self {
        match event {
            TransitionEvent::ClientRescheduleRequest => SessionEvent::ClientRescheduleRequest,
            TransitionEvent::AdminReschedule => SessionEvent::AdminReschedule,
            TransitionEvent::AdminNoShow => SessionEvent::AdminNoShow,
            TransitionEvent::AdminCancel => SessionEvent::AdminCancel,
            TransitionEvent::AdminConfirmReschedule => SessionEvent::AdminConfirmReschedule,
        }
    }
}

impl Commands {
    fn into_request(self) -> (Method, Option<Value>) {
        match self {
            Commands::Trigger { kind, now } => {
                let mut params = json!({ "kind": ReminderKind::from(kind).as_str() });
                if let Some(now) = now {
                    params["now"] = Value::String(now);
                }
                (Method::RunTrigger, Some(params))
            }
            Commands::Inbound { from, text } => (
                Method::InboundMessage,
                Some(json!({ "from": from, "text": text })),
            ),
            Commands::Transition {
                session_id,
                event,
                reason,
            } => {
                let event = SessionEvent::from(event);
                // The actor follows from the event; only the client request
                // is client-originated.
                let actor = match event {
                    SessionEvent::ClientRescheduleRequest => Actor::Client,
                    _ => Actor::Admin,
                };
                (
                    Method::Transition,
                    Some(json!({
                        "session_id": session_id,
                        "event": event.as_str(),
                        "actor": actor.as_str(),
                        "reason": reason,
                    })),
                )
            }
            Commands::Reactivate { session_id, reason } => (
                Method::Reactivate,
                Some(json!({
                    "session_id": session_id,
                    "actor": Actor::Admin.as_str(),
                    "reason": reason,
                })),
            ),
            Commands::Session { session_id } => (
                Method::GetSession,
                Some(json!({ "session_id": session_id })),
            ),
            Commands::Reminders { session_id } => (
                Method::GetReminders,
                Some(json!({ "session_id": session_id })),
            ),
            Commands::Health => (Method::GetHealth, None),
        }
    }
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let (method, params) = cli.command.into_request();
    match daemon_client::call(method, params) {
        Ok(data) => {
            let rendered = serde_json::to_string_pretty(&data).unwrap_or_else(|_| data.to_string());
            println!("{}", rendered);
        }
        Err(err) => {
            tracing::error!(method = ?method, error = %err, "studio-ctl request failed");
            eprintln!("error: {}", err);
            std::process::exit(1);
        }
    }
}
