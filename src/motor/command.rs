use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::device::constants::MOTOR_COUNT;
use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Direction {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forward" => Ok(Direction::Forward),
            "backward" => Ok(Direction::Backward),
            other => Err(ValidationError::InvalidDirection(other.to_string())),
        }
    }
}

/// A motor command as the operator (or a remote client) typed it. Nothing about it is trusted
/// until [`CommandRequest::validate`] turned it into a [`MotorCommand`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub motor: i64,
    pub direction: String,
    pub speed: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

impl CommandRequest {
    pub fn new(motor: i64, direction: impl Into<String>, speed: i64, duration: Option<i64>) -> Self {
        CommandRequest { motor, direction: direction.into(), speed, duration }
    }

    pub fn validate(&self) -> Result<MotorCommand, ValidationError> {
        let motor = u8::try_from(self.motor)
            .ok()
            .filter(|motor| *motor < MOTOR_COUNT)
            .ok_or(ValidationError::InvalidMotor(self.motor))?;

        let direction = self.direction.parse::<Direction>()?;

        let speed = u8::try_from(self.speed)
            .map_err(|_| ValidationError::InvalidSpeed(self.speed))?;

        let duration = match self.duration {
            None => None,
            Some(duration) => Some(
                u32::try_from(duration)
                    .ok()
                    .filter(|duration| *duration > 0)
                    .ok_or(ValidationError::InvalidDuration(duration))?
            ),
        };

        Ok(MotorCommand { motor, direction, speed, duration })
    }
}

impl From<&MotorCommand> for CommandRequest {
    fn from(command: &MotorCommand) -> Self {
        CommandRequest {
            motor: i64::from(command.motor),
            direction: command.direction.as_str().to_string(),
            speed: i64::from(command.speed),
            duration: command.duration.map(i64::from),
        }
    }
}

/// A validated motor command, ready for the wire.
///
/// No duration means "run until stopped"; speed 0 stops the motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MotorCommand {
    motor: u8,
    direction: Direction,
    speed: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<u32>,
}

impl MotorCommand {
    pub fn new(motor: u8, direction: Direction, speed: u8, duration: Option<u32>) -> Result<Self, ValidationError> {
        if motor >= MOTOR_COUNT {
            return Err(ValidationError::InvalidMotor(i64::from(motor)));
        }
        if duration == Some(0) {
            return Err(ValidationError::InvalidDuration(0));
        }

        Ok(MotorCommand { motor, direction, speed, duration })
    }

    pub fn stop(motor: u8) -> Result<Self, ValidationError> {
        MotorCommand::new(motor, Direction::Forward, 0, None)
    }

    pub fn motor(&self) -> u8 {
        self.motor
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn speed(&self) -> u8 {
        self.speed
    }

    pub fn duration(&self) -> Option<u32> {
        self.duration
    }

    pub fn is_stop(&self) -> bool {
        self.speed == 0
    }

    /// The record written to the control characteristic, e.g.
    /// `{"motor":0,"direction":"forward","speed":150,"duration":2000}`.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("MotorCommand is plain data and always serializes")
    }
}

impl fmt::Display for MotorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{} {} at {}", self.motor + 1, self.direction, self.speed)?;
        if let Some(duration) = self.duration {
            write!(f, " for {}ms", duration)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn accepts_every_valid_combination() {
        for motor in 0..3 {
            for direction in ["forward", "backward"] {
                for speed in 0..=255 {
                    let request = CommandRequest::new(motor, direction, speed, None);
                    assert!(request.validate().is_ok(), "{:?}", request);
                }
            }
        }
    }

    #[test]
    fn rejects_with_matching_kind() {
        let cases = [
            (CommandRequest::new(3, "forward", 10, None), "InvalidMotor"),
            (CommandRequest::new(-1, "forward", 10, None), "InvalidMotor"),
            (CommandRequest::new(0, "sideways", 10, None), "InvalidDirection"),
            (CommandRequest::new(0, "Forward", 10, None), "InvalidDirection"),
            (CommandRequest::new(0, "backward", 256, None), "InvalidSpeed"),
            (CommandRequest::new(0, "backward", -5, None), "InvalidSpeed"),
            (CommandRequest::new(0, "backward", 5, Some(0)), "InvalidDuration"),
            (CommandRequest::new(0, "backward", 5, Some(-100)), "InvalidDuration"),
        ];

        for (request, kind) in cases {
            assert_eq!(request.validate().unwrap_err().kind(), kind, "{:?}", request);
        }
    }

    #[test]
    fn motor_is_checked_first() {
        let request = CommandRequest::new(7, "up", 999, Some(0));
        assert_eq!(request.validate(), Err(ValidationError::InvalidMotor(7)));
    }

    #[test]
    fn encode_omits_absent_duration() {
        let command = CommandRequest::new(1, "backward", 100, None).validate().unwrap();
        let encoded = command.encode();

        let parsed: Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(parsed["motor"], 1);
        assert_eq!(parsed["direction"], "backward");
        assert_eq!(parsed["speed"], 100);
        assert!(parsed.get("duration").is_none());
        assert!(!String::from_utf8(encoded).unwrap().contains("null"));
    }

    #[test]
    fn encode_keeps_duration() {
        let command = CommandRequest::new(2, "forward", 255, Some(1500)).validate().unwrap();

        assert_eq!(
            String::from_utf8(command.encode()).unwrap(),
            r#"{"motor":2,"direction":"forward","speed":255,"duration":1500}"#,
        );
        assert_eq!(CommandRequest::from(&command), CommandRequest::new(2, "forward", 255, Some(1500)));
    }

    #[test]
    fn stop_is_zero_speed_forward() {
        let stop = MotorCommand::stop(2).unwrap();
        assert!(stop.is_stop());
        assert_eq!(stop.direction(), Direction::Forward);
        assert_eq!(stop.duration(), None);
        assert!(MotorCommand::stop(3).is_err());
    }
}
