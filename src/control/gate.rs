//! Single-flight action gate
//!
//! At most one dispatched command may be awaiting acknowledgment. The gate is
//! level-triggered: it is evaluated once per tick against the flags as they
//! stand after that tick's events were applied.

use std::time::{Duration, Instant};

use super::dispatch::ActionCommand;
use super::session::SessionState;

#[derive(Debug, Clone, Default)]
pub struct ActionGate {
    new_state_available: bool,
    slot: Slot,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
enum Slot {
    #[default]
    Open,
    /// Acquired while the policy is consulted; nothing published yet
    Deciding,
    Pending(InFlight),
}

/// The one unacknowledged command
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InFlight {
    pub command: ActionCommand,
    pub since: Instant,
}

impl ActionGate {
    pub fn new_state_available(&self) -> bool {
        self.new_state_available
    }

    pub fn action_in_flight(&self) -> bool {
        self.slot != Slot::Open
    }

    pub fn in_flight(&self) -> Option<&InFlight> {
        match &self.slot {
            Slot::Pending(in_flight) => Some(in_flight),
            _ => None,
        }
    }

    pub fn mark_new_state(&mut self) {
        self.new_state_available = true;
    }

    /// Whether a new decision may be made this tick
    pub fn permits(&self, session: &SessionState, policy_ready: bool) -> bool {
        session.autonomous_enabled
            && policy_ready
            && session.active
            && self.new_state_available
            && !self.action_in_flight()
    }

    /// Evaluate the predicate and, if it holds, consume the pending state and
    /// close the gate before the policy is consulted. The caller must follow
    /// up with either [`ActionGate::commit`] or [`ActionGate::release`].
    pub fn try_acquire(&mut self, session: &SessionState, policy_ready: bool) -> bool {
        if !self.permits(session, policy_ready) {
            return false;
        }
        self.new_state_available = false;
        self.slot = Slot::Deciding;
        true
    }

    /// Record the command that was just published
    pub fn commit(&mut self, command: ActionCommand, now: Instant) {
        self.slot = Slot::Pending(InFlight {
            command,
            since: now,
        });
    }

    /// Reopen the gate. Returns the command that was pending, if any.
    pub fn release(&mut self) -> Option<InFlight> {
        match std::mem::take(&mut self.slot) {
            Slot::Pending(in_flight) => Some(in_flight),
            _ => None,
        }
    }

    /// Whether the pending command has outlived `timeout`
    pub fn expired(&self, now: Instant, timeout: Duration) -> bool {
        self.in_flight()
            .map(|f| now.saturating_duration_since(f.since) >= timeout)
            .unwrap_or(false)
    }

    /// Force the gate open and forget any unconsumed state
    pub fn reset(&mut self) {
        self.new_state_available = false;
        self.slot = Slot::Open;
    }
}
