//! Latest known mole states and robot/arm positions

use super::{ControlError, Position};

/// Number of mole slots reported by each state update
pub const MOLE_COUNT: usize = 7;

/// Length of the policy feature vector
pub const FEATURE_COUNT: usize = MOLE_COUNT + 2;

/// Index of the robot base position in the feature vector
pub const ROBOT_POS_FEATURE: usize = MOLE_COUNT;

/// Index of the arm position in the feature vector
pub const ARM_POS_FEATURE: usize = MOLE_COUNT + 1;

/// Column names of the feature vector, in order. The trained model expects
/// the robot base ahead of the arm.
pub const FEATURE_LAYOUT: [&str; FEATURE_COUNT] = [
    "mole0", "mole1", "mole2", "mole3", "mole4", "mole5", "mole6", "robot_pos", "arm_pos",
];

/// Policy input vector
pub type Features = [f64; FEATURE_COUNT];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorSnapshot {
    pub mole_states: [i32; MOLE_COUNT],
    pub robot_pos: Position,
    pub arm_pos: Position,
}

impl Default for SensorSnapshot {
    fn default() -> Self {
        Self {
            mole_states: [0; MOLE_COUNT],
            robot_pos: Position::Mid,
            arm_pos: Position::Mid,
        }
    }
}

impl SensorSnapshot {
    /// Replace all mole states. Rejects anything but exactly seven values and
    /// leaves the previous states untouched.
    pub fn replace_moles(&mut self, moles: &[i32]) -> Result<(), ControlError> {
        let states: [i32; MOLE_COUNT] =
            moles
                .try_into()
                .map_err(|_| ControlError::MalformedStateUpdate {
                    len: moles.len(),
                    expected: MOLE_COUNT,
                })?;
        self.mole_states = states;
        Ok(())
    }

    /// Arm position implied by a completed whack. The slot index runs across
    /// the whole board, so the base offset is two slots per base position.
    pub fn record_whack(&mut self, slot: i64) -> Result<Position, ControlError> {
        let ordinal = slot - 2 * self.robot_pos.ordinal();
        let pos = Position::from_ordinal(ordinal).ok_or(ControlError::InvalidPosition {
            channel: "whack_complete",
            ordinal,
        })?;
        self.arm_pos = pos;
        Ok(pos)
    }

    /// Base position from a 1-indexed arrival report
    pub fn record_arrival(&mut self, pos: i64) -> Result<Position, ControlError> {
        let ordinal = pos - 1;
        let pos = Position::from_ordinal(ordinal).ok_or(ControlError::InvalidPosition {
            channel: "robot_position_arrive",
            ordinal,
        })?;
        self.robot_pos = pos;
        Ok(pos)
    }

    pub fn reset_positions(&mut self) {
        self.robot_pos = Position::Mid;
        self.arm_pos = Position::Mid;
    }

    pub fn features(&self) -> Features {
        let mut features = [0.0; FEATURE_COUNT];
        for (slot, state) in features.iter_mut().zip(self.mole_states.iter()) {
            *slot = *state as f64;
        }
        features[ROBOT_POS_FEATURE] = self.robot_pos.ordinal() as f64;
        features[ARM_POS_FEATURE] = self.arm_pos.ordinal() as f64;
        features
    }
}
