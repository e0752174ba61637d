//! Mapping from policy decisions to actuator commands

use tokio::sync::broadcast;
use tracing::info;

use crate::ws::protocol::OutboundMsg;

use super::{ControlError, Position};

/// Number of distinct actions the policy may choose from
pub const ACTION_COUNT: i64 = 6;

/// Discrete actuator target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionCommand {
    ArmPosition(Position),
    RobotPosition(Position),
}

impl ActionCommand {
    /// Actions 0..3 move the arm, 3..6 move the base
    pub fn from_action_id(id: i64) -> Option<Self> {
        match id {
            0..=2 => Position::from_ordinal(id).map(ActionCommand::ArmPosition),
            3..=5 => Position::from_ordinal(id - 3).map(ActionCommand::RobotPosition),
            _ => None,
        }
    }

    /// Truncate a raw policy output toward zero and map it to a command
    pub fn from_policy_output(raw: f64) -> Result<Self, ControlError> {
        if !raw.is_finite() {
            return Err(ControlError::OutOfRangeAction(raw));
        }
        let id = raw.trunc();
        if !(0.0..ACTION_COUNT as f64).contains(&id) {
            return Err(ControlError::OutOfRangeAction(raw));
        }
        Self::from_action_id(id as i64).ok_or(ControlError::OutOfRangeAction(raw))
    }

    pub fn position(self) -> Position {
        match self {
            ActionCommand::ArmPosition(pos) | ActionCommand::RobotPosition(pos) => pos,
        }
    }

    /// Outbound channel name
    pub fn channel(self) -> &'static str {
        match self {
            ActionCommand::ArmPosition(_) => "cmd_arm_pos",
            ActionCommand::RobotPosition(_) => "cmd_robot_pos",
        }
    }
}

/// Publishes commands to every connected bridge
pub struct ActionDispatcher {
    command_tx: broadcast::Sender<OutboundMsg>,
    dispatched: u64,
}

impl ActionDispatcher {
    pub fn new(command_tx: broadcast::Sender<OutboundMsg>) -> Self {
        Self {
            command_tx,
            dispatched: 0,
        }
    }

    /// Map a policy output to a command and publish it. Nothing is published
    /// on error.
    pub fn dispatch(&mut self, raw_action: f64) -> Result<ActionCommand, ControlError> {
        let command = ActionCommand::from_policy_output(raw_action)?;
        self.command_tx
            .send(OutboundMsg::from(command))
            .map_err(|_| ControlError::NoCommandSubscribers(command))?;
        self.dispatched += 1;

        info!(
            channel = command.channel(),
            value = command.position().wire(),
            raw_action,
            "Dispatched command"
        );
        Ok(command)
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }
}
