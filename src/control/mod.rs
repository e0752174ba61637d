//! Event-driven coordination core: session tracking, the single-flight
//! action gate and the mapping from policy decisions to actuator commands.

pub mod controller;
pub mod dispatch;
pub mod gate;
pub mod session;
pub mod snapshot;

pub use controller::{Controller, ControllerHandle, ControllerStatus};
pub use dispatch::ActionCommand;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discrete position of the robot base or the arm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Left,
    #[default]
    Mid,
    Right,
}

impl Position {
    #[cfg(test)]
    pub const ALL: [Position; 3] = [Position::Left, Position::Mid, Position::Right];

    /// 0/1/2 encoding used in feature vectors
    pub fn ordinal(self) -> i64 {
        match self {
            Position::Left => 0,
            Position::Mid => 1,
            Position::Right => 2,
        }
    }

    pub fn from_ordinal(value: i64) -> Option<Self> {
        match value {
            0 => Some(Position::Left),
            1 => Some(Position::Mid),
            2 => Some(Position::Right),
            _ => None,
        }
    }

    /// 1/2/3 encoding used on command channels
    pub fn wire(self) -> u8 {
        self.ordinal() as u8 + 1
    }
}

/// Inbound event kinds, already decoded from their channel payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// Zero-indexed slot the arm just struck
    WhackComplete { slot: i64 },
    /// 1-indexed base position just reached
    RobotArrived { pos: i64 },
    StateUpdate { moles: Vec<i32> },
    AutonomousModeSet { enabled: bool },
    GameStarted,
    TimeLeft { seconds: i64 },
}

impl ControlEvent {
    pub fn is_acknowledgment(&self) -> bool {
        matches!(
            self,
            ControlEvent::WhackComplete { .. } | ControlEvent::RobotArrived { .. }
        )
    }

    /// Events that start, end or arm a session
    pub fn is_session_control(&self) -> bool {
        matches!(
            self,
            ControlEvent::GameStarted
                | ControlEvent::TimeLeft { .. }
                | ControlEvent::AutonomousModeSet { .. }
        )
    }

    /// Channel the event arrived on
    pub fn channel(&self) -> &'static str {
        match self {
            ControlEvent::WhackComplete { .. } => "whack_complete",
            ControlEvent::RobotArrived { .. } => "robot_position_arrive",
            ControlEvent::StateUpdate { .. } => "state_data",
            ControlEvent::AutonomousModeSet { .. } => "autonomous_mode",
            ControlEvent::GameStarted => "game_started",
            ControlEvent::TimeLeft { .. } => "time_left",
        }
    }
}

/// Event received from a bridge, queued for the control loop
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub bridge_id: Uuid,
    pub event: ControlEvent,
    pub received_at: u64,
}

/// Recoverable errors raised by ingest and dispatch
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControlError {
    #[error("state update carried {len} mole values, expected {expected}")]
    MalformedStateUpdate { len: usize, expected: usize },

    #[error("policy returned out-of-range action {0}")]
    OutOfRangeAction(f64),

    #[error("{channel} acknowledgment arrived with no action in flight")]
    StaleAcknowledgment { channel: &'static str },

    #[error("{channel} decoded to invalid position ordinal {ordinal}")]
    InvalidPosition { channel: &'static str, ordinal: i64 },

    #[error("no bridge subscribed to receive {0:?}")]
    NoCommandSubscribers(ActionCommand),
}
