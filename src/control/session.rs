//! Session and mode tracking

use serde::Serialize;
use uuid::Uuid;

use super::gate::ActionGate;

/// Session-level state machine.
///
/// The phase is derived from the session flags and the gate so there is one
/// source of truth; the controller logs every change between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No game running
    Idle,
    /// Game running, operator in control
    SessionActive,
    /// Game running, policy in control and free to act
    AutonomousActive,
    /// A dispatched command awaits its acknowledgment
    ActionPending,
}

impl SessionPhase {
    pub fn derive(session: &SessionState, gate: &ActionGate) -> Self {
        if !session.active {
            SessionPhase::Idle
        } else if gate.action_in_flight() {
            SessionPhase::ActionPending
        } else if session.autonomous_enabled {
            SessionPhase::AutonomousActive
        } else {
            SessionPhase::SessionActive
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub active: bool,
    pub autonomous_enabled: bool,
    /// Identity of the running game, for logs and status
    pub session_id: Option<Uuid>,
}

impl SessionState {
    /// Mark a game as running. Returns the new session id if this opened a
    /// session, or `None` when one was already active.
    pub fn start(&mut self) -> Option<Uuid> {
        if self.active {
            return None;
        }
        let id = Uuid::new_v4();
        self.active = true;
        self.session_id = Some(id);
        Some(id)
    }

    pub fn set_autonomous(&mut self, enabled: bool) {
        self.autonomous_enabled = enabled;
    }

    /// Game over: back to idle with autonomy disarmed
    pub fn end(&mut self) {
        self.active = false;
        self.autonomous_enabled = false;
        self.session_id = None;
    }
}
