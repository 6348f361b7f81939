//! What the operator last asked each motor to do.
//!
//! The link is write-only, so this is never the arm's actual state. It is derived from the
//! commands this client handed over for sending, whether or not they reached the arm.

use serde::{Deserialize, Serialize};

use crate::device::constants::MOTOR_COUNT;
use crate::motor::command::{Direction, MotorCommand};

/// Display names and button mapping of the three joints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Joint {
    pub motor: u8,
    pub name: &'static str,
    /// Direction that raises the joint (opens, for the claw).
    pub raise: Direction,
}

impl Joint {
    pub fn lower(&self) -> Direction {
        match self.raise {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

pub const JOINTS: [Joint; MOTOR_COUNT as usize] = [
    Joint { motor: 0, name: "Small shoulder", raise: Direction::Forward },
    // mounted mirrored: backward lifts the large shoulder
    Joint { motor: 1, name: "Large shoulder", raise: Direction::Backward },
    Joint { motor: 2, name: "Claw", raise: Direction::Forward },
];

pub fn joint(motor: u8) -> Option<&'static Joint> {
    JOINTS.get(usize::from(motor))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandedMotor {
    pub id: u8,
    pub name: String,
    /// Set by the UI only; never derived from commands.
    pub position: u8,
    pub speed: u8,
    pub is_moving: bool,
    pub direction: Option<Direction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandedState {
    pub motors: Vec<CommandedMotor>,
}

impl Default for CommandedState {
    fn default() -> Self {
        let motors = JOINTS.iter()
            .map(|joint| CommandedMotor {
                id: joint.motor,
                name: joint.name.to_string(),
                position: 0,
                speed: 0,
                is_moving: false,
                direction: None,
            })
            .collect();

        CommandedState { motors }
    }
}

impl CommandedState {
    pub fn record(&mut self, command: &MotorCommand) {
        if let Some(motor) = self.motors.get_mut(usize::from(command.motor())) {
            motor.speed = command.speed();
            motor.is_moving = !command.is_stop();
            motor.direction = if command.is_stop() { None } else { Some(command.direction()) };
        }
    }

    pub fn record_stop_all(&mut self) {
        for motor in &mut self.motors {
            motor.speed = 0;
            motor.is_moving = false;
            motor.direction = None;
        }
    }

    pub fn set_position(&mut self, motor: u8, position: u8) {
        if let Some(entry) = self.motors.get_mut(usize::from(motor)) {
            entry.position = position.min(100);
        }
    }

    pub fn motor(&self, motor: u8) -> Option<&CommandedMotor> {
        self.motors.get(usize::from(motor))
    }
}
