//! Session lifecycle rules.
//! The table is closed: anything not listed is rejected by the caller.

use crate::types::{Actor, SessionEvent, SessionState};

/// Target state for `event` requested by `actor` from `current`, or `None`
/// when the triple is not a legal transition.
pub fn next_state(
    current: SessionState,
    event: SessionEvent,
    actor: Actor,
) -> Option<SessionState> {
    match (current, event, actor) {
        (SessionState::Active, SessionEvent::ClientRescheduleRequest, Actor::Client) => {
            Some(SessionState::RescheduleRequested)
        }
        (SessionState::Active, SessionEvent::AdminReschedule, Actor::Admin) => {
            Some(SessionState::Rescheduled)
        }
        (SessionState::Active, SessionEvent::AdminNoShow, Actor::Admin) => {
            Some(SessionState::NoShow)
        }
        (SessionState::Active, SessionEvent::AdminCancel, Actor::Admin) => {
            Some(SessionState::Cancelled)
        }
        (SessionState::RescheduleRequested, SessionEvent::AdminConfirmReschedule, Actor::Admin) => {
            Some(SessionState::Rescheduled)
        }
        _ => None,
    }
}

/// Only an admin can bring a closed session back to `Active`.
pub fn can_reactivate(current: SessionState, actor: Actor) -> bool {
    actor == Actor::Admin && current.is_terminal()
}
