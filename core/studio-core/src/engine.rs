//! StudioEngine - wires the adapters, ledger and services together.
//!
//! Built once at startup from a [`StudioConfig`] and shared behind an `Arc`.
//! Every method is synchronous and safe to call from several threads; the
//! ledger is the only shared mutable state.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use studio_core::{StudioConfig, StudioEngine, ReminderKind};
//!
//! let config = StudioConfig::load(None)?;
//! let engine = StudioEngine::from_config(&config, transport)?;
//! let report = engine.run_trigger(ReminderKind::Tomorrow, chrono::Utc::now())?;
//! ```

use chrono::{DateTime, FixedOffset, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, warn};

use crate::config::{Environment, StudioConfig};
use crate::directory::{ClientDirectory, FileClientDirectory};
use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, Result};
use crate::inbound::{InboundHandler, InboundOutcome};
use crate::ledger::Ledger;
use crate::messages::MessageKind;
use crate::scheduler::{DispatchReport, Scheduler};
use crate::source::{FileSessionSource, SessionSource};
use crate::state_machine::StateMachine;
use crate::transport::Transport;
use crate::types::{Actor, ReminderKind, ReminderRecord, SessionEvent, SessionRecord};

pub struct StudioEngine {
    ledger: Arc<Ledger>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Scheduler,
    state_machine: Arc<StateMachine>,
    inbound: InboundHandler,
    admin_phone: Option<String>,
    offset: FixedOffset,
}

impl StudioEngine {
    /// Engine over the file-backed roster and client list named in `config`.
    pub fn from_config(config: &StudioConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let source = Arc::new(FileSessionSource::new(config.resolved_roster_path()?));
        let directory = Arc::new(FileClientDirectory::new(config.resolved_clients_path()?));
        Self::with_adapters(config, source, directory, transport)
    }

    pub fn with_adapters(
        config: &StudioConfig,
        source: Arc<dyn SessionSource>,
        directory: Arc<dyn ClientDirectory>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let offset = config.local_offset()?;
        let ledger =
            Arc::new(Ledger::new(config.resolved_db_path()?).map_err(EngineError::Storage)?);

        let admin_phone = match config.admin_recipient() {
            Ok(phone) => Some(phone),
            Err(err) => {
                warn!(error = %err, "Admin recipient unavailable; digests and notices will fail");
                None
            }
        };

        let dispatcher = Arc::new(Dispatcher::new(
            transport,
            ledger.clone(),
            config.environment,
            config.transport.language_code.clone(),
            admin_phone.clone(),
        ));
        let scheduler = Scheduler::new(
            source.clone(),
            directory.clone(),
            ledger.clone(),
            dispatcher.clone(),
            admin_phone.clone(),
            offset,
        );
        let state_machine = Arc::new(StateMachine::new(
            ledger.clone(),
            dispatcher.clone(),
            admin_phone.clone(),
            offset,
        ));
        let inbound = InboundHandler::new(
            source,
            directory,
            ledger.clone(),
            state_machine.clone(),
            config.schedule.inbound_lookahead_days,
        );

        Ok(Self {
            ledger,
            dispatcher,
            scheduler,
            state_machine,
            inbound,
            admin_phone,
            offset,
        })
    }

    pub fn environment(&self) -> Environment {
        self.dispatcher.environment()
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Run one trigger. A configuration failure is reported to the admin
    /// (best effort) before being returned.
    pub fn run_trigger(&self, kind: ReminderKind, now: DateTime<Utc>) -> Result<DispatchReport> {
        match self.scheduler.run_trigger(kind, now) {
            Ok(report) => Ok(report),
            Err(err @ EngineError::Configuration { .. }) => {
                error!(kind = kind.as_str(), error = %err, "Trigger run aborted");
                self.alert_admin(&format!("⚠️ {} run failed: {}", kind.as_str(), err));
                Err(err)
            }
            Err(err) => {
                error!(kind = kind.as_str(), error = %err, "Trigger run aborted");
                Err(err)
            }
        }
    }

    pub fn handle_inbound(&self, payload: &Value, now: DateTime<Utc>) -> Result<InboundOutcome> {
        self.inbound.handle(payload, now)
    }

    pub fn transition(
        &self,
        session_id: &str,
        event: SessionEvent,
        actor: Actor,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord> {
        self.state_machine.apply(session_id, event, actor, reason, now)
    }

    pub fn reactivate(
        &self,
        session_id: &str,
        actor: Actor,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord> {
        self.state_machine.reactivate(session_id, actor, reason, now)
    }

    pub fn session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        self.ledger
            .get_session(session_id)
            .map_err(EngineError::Storage)
    }

    pub fn reminders(&self, session_id: &str) -> Result<Vec<ReminderRecord>> {
        self.ledger
            .records_for(session_id)
            .map_err(EngineError::Storage)
    }

    /// Free-text message to the admin; returns whether it went out.
    pub fn alert_admin(&self, body: &str) -> bool {
        let Some(admin) = self.admin_phone.as_deref() else {
            warn!("No admin recipient configured; alert dropped");
            return false;
        };
        self.dispatcher
            .send(admin, MessageKind::Notice, &[body.to_string()])
            .is_delivered()
    }
}
