//! Bridge protocol message definitions
//! These are the wire types exchanged with the robot middleware bridge

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::control::{ActionCommand, ControlEvent};

/// Messages sent from a bridge to the controller, one per inbound channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "data", rename_all = "snake_case")]
pub enum InboundMsg {
    /// Zero-indexed slot struck
    WhackComplete(i64),
    /// 1-indexed base position reached
    RobotPositionArrive(i64),
    /// Mole states, expected to be exactly seven values
    StateData(Vec<i32>),
    /// 0 = disabled, anything else = enabled
    AutonomousMode(i64),
    GameStarted,
    /// Seconds remaining in the game
    TimeLeft(i64),
}

impl From<InboundMsg> for ControlEvent {
    fn from(msg: InboundMsg) -> Self {
        match msg {
            InboundMsg::WhackComplete(slot) => ControlEvent::WhackComplete { slot },
            InboundMsg::RobotPositionArrive(pos) => ControlEvent::RobotArrived { pos },
            InboundMsg::StateData(moles) => ControlEvent::StateUpdate { moles },
            InboundMsg::AutonomousMode(flag) => ControlEvent::AutonomousModeSet {
                enabled: flag != 0,
            },
            InboundMsg::GameStarted => ControlEvent::GameStarted,
            InboundMsg::TimeLeft(seconds) => ControlEvent::TimeLeft { seconds },
        }
    }
}

/// Messages sent from the controller to bridges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "data", rename_all = "snake_case")]
pub enum OutboundMsg {
    /// Greeting after the socket is upgraded
    Welcome { bridge_id: Uuid, server_time: u64 },

    /// Arm target, 1..=3
    CmdArmPos(u8),

    /// Base target, 1..=3
    CmdRobotPos(u8),
}

impl From<ActionCommand> for OutboundMsg {
    fn from(command: ActionCommand) -> Self {
        match command {
            ActionCommand::ArmPosition(pos) => OutboundMsg::CmdArmPos(pos.wire()),
            ActionCommand::RobotPosition(pos) => OutboundMsg::CmdRobotPos(pos.wire()),
        }
    }
}
