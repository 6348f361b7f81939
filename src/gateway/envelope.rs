//! JSON messages exchanged between gateway clients and the relay.
//!
//! Requests: `{"command": "move_motor", "motor": 0, "direction": "forward", "speed": 150}`.
//! Responses and unsolicited status broadcasts share one shape:
//! `{"command": "status", "error": false, "message": "...", "robot_connected": true}`.

use std::fmt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::motor::command::CommandRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    GetStatus,
    Connect,
    Disconnect,
    MoveMotor,
    StopMotor,
    StopAll,
}

impl Operation {
    pub fn parse(command: &str) -> Option<Operation> {
        match command {
            "get_status" | "status" => Some(Operation::GetStatus),
            "connect" => Some(Operation::Connect),
            "disconnect" => Some(Operation::Disconnect),
            "move_motor" => Some(Operation::MoveMotor),
            "stop_motor" => Some(Operation::StopMotor),
            "stop_all" => Some(Operation::StopAll),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::GetStatus => "get_status",
            Operation::Connect => "connect",
            Operation::Disconnect => "disconnect",
            Operation::MoveMotor => "move_motor",
            Operation::StopMotor => "stop_motor",
            Operation::StopAll => "stop_all",
        }
    }

    /// The `command` value the relay answers with.
    pub fn response_name(&self) -> &'static str {
        match self {
            Operation::GetStatus => STATUS,
            other => other.as_str(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub const STATUS: &str = "status";
pub const ERROR: &str = "error";
pub const INVALID_REQUEST: &str = "InvalidRequest";
pub const UNKNOWN_COMMAND: &str = "UnknownCommand";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayRequest {
    // older web clients send the operation as "type"
    #[serde(default, alias = "type")]
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motor: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

impl GatewayRequest {
    pub fn new(operation: Operation) -> Self {
        GatewayRequest { command: operation.as_str().to_string(), ..GatewayRequest::default() }
    }

    pub fn move_motor(request: &CommandRequest) -> Self {
        GatewayRequest {
            command: Operation::MoveMotor.as_str().to_string(),
            motor: Some(request.motor),
            direction: Some(request.direction.clone()),
            speed: Some(request.speed),
            duration: request.duration,
        }
    }

    pub fn stop_motor(motor: i64) -> Self {
        GatewayRequest { motor: Some(motor), ..GatewayRequest::new(Operation::StopMotor) }
    }

    pub fn operation(&self) -> Option<Operation> {
        Operation::parse(&self.command)
    }

    /// The operation named by a message that may not decode as a whole request.
    pub fn operation_of(message: &Value) -> Option<Operation> {
        message.get("command")
            .or_else(|| message.get("type"))
            .and_then(Value::as_str)
            .and_then(Operation::parse)
    }

    pub fn motor(&self) -> Result<i64, ValidationError> {
        self.motor.ok_or(ValidationError::MissingField("motor"))
    }

    pub fn command_request(&self) -> Result<CommandRequest, ValidationError> {
        Ok(CommandRequest {
            motor: self.motor()?,
            direction: self.direction.clone().ok_or(ValidationError::MissingField("direction"))?,
            speed: self.speed.ok_or(ValidationError::MissingField("speed"))?,
            duration: self.duration,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub command: String,
    pub error: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub robot_connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_error: Option<String>,
}

impl GatewayResponse {
    pub fn ok(command: &str, message: impl Into<String>, robot_connected: bool) -> Self {
        GatewayResponse {
            command: command.to_string(),
            error: false,
            message: message.into(),
            robot_connected,
            command_error: None,
        }
    }

    pub fn failed(command: &str, kind: &str, message: impl Into<String>, robot_connected: bool) -> Self {
        GatewayResponse {
            command: command.to_string(),
            error: true,
            message: message.into(),
            robot_connected,
            command_error: Some(kind.to_string()),
        }
    }

    pub fn status(robot_connected: bool) -> Self {
        let message = if robot_connected { "Robot connected" } else { "Robot disconnected" };
        GatewayResponse::ok(STATUS, message, robot_connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_browser_request() {
        let request: GatewayRequest = serde_json::from_value(json!({
            "command": "move_motor", "motor": 1, "direction": "backward", "speed": 90
        })).unwrap();

        assert_eq!(request.operation(), Some(Operation::MoveMotor));
        assert_eq!(request.command_request().unwrap(), CommandRequest::new(1, "backward", 90, None));
    }

    #[test]
    fn missing_fields_are_reported_by_name() {
        let request = GatewayRequest { motor: Some(0), ..GatewayRequest::new(Operation::MoveMotor) };
        assert_eq!(request.command_request(), Err(ValidationError::MissingField("direction")));
        assert_eq!(GatewayRequest::new(Operation::StopMotor).motor(), Err(ValidationError::MissingField("motor")));
    }

    #[test]
    fn accepts_type_as_command() {
        let request: GatewayRequest = serde_json::from_str(r#"{"type": "stop_all"}"#).unwrap();
        assert_eq!(request.operation(), Some(Operation::StopAll));
    }

    #[test]
    fn status_aliases() {
        assert_eq!(Operation::parse("status"), Some(Operation::GetStatus));
        assert_eq!(Operation::GetStatus.response_name(), "status");
        assert_eq!(Operation::parse("dance"), None);
    }

    #[test]
    fn request_omits_absent_fields() {
        let encoded = serde_json::to_value(GatewayRequest::stop_motor(2)).unwrap();
        assert_eq!(encoded, json!({"command": "stop_motor", "motor": 2}));
    }

    #[test]
    fn response_shape() {
        let ok = serde_json::to_value(GatewayResponse::status(true)).unwrap();
        assert_eq!(ok, json!({"command": "status", "error": false, "message": "Robot connected", "robot_connected": true}));

        let failed = serde_json::to_value(GatewayResponse::failed("move_motor", "InvalidMotor", "bad", false)).unwrap();
        assert_eq!(failed["command_error"], "InvalidMotor");
        assert_eq!(failed["error"], true);
    }
}
