//! # studio-core
//!
//! Reminder dispatch engine and session state machine for a small studio:
//! decides which reminders are due on each periodic trigger, makes sure
//! each one goes out at most once, and enforces who may move a session
//! through its lifecycle.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. The daemon runs each request on its own thread.
//! - **Idempotent triggers**: Repeated or overlapping runs are safe; the ledger's
//!   unique index on delivered `(session, kind)` rows is the only dedup signal.
//! - **Injected collaborators**: Session source, client directory and transport
//!   are traits; the config struct is passed in, never read from globals.

pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod inbound;
pub mod ledger;
pub mod messages;
pub mod phone;
pub mod scheduler;
pub mod source;
pub mod state_machine;
pub mod title;
pub mod transition;
pub mod transport;
pub mod types;
pub mod window;

pub use config::{Environment, StudioConfig};
pub use directory::{ClientDirectory, ClientIndex, FileClientDirectory};
pub use dispatcher::Dispatcher;
pub use engine::StudioEngine;
pub use error::{EngineError, Result, TransitionRequest};
pub use inbound::{InboundHandler, InboundOutcome};
pub use ledger::Ledger;
pub use scheduler::{DispatchReport, Scheduler};
pub use source::{FileSessionSource, InMemorySessionSource, SessionSource};
pub use state_machine::StateMachine;
pub use transport::{RecordingTransport, SentMessage, Transport};
pub use types::*;
