use std::io;
use std::str::Utf8Error;
use std::time::Duration;
use thiserror::Error;
use btleplug;
use serde_json;
use tokio_tungstenite::tungstenite;

use crate::device::types::SessionState;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file (is another instance driving the arm?): {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },

    #[error("Configured {field} {value:?} is not a valid UUID: {source}")]
    InvalidIdentifier { field: &'static str, value: String, source: uuid::Error },

    #[error("Configured {field} must be greater than zero")]
    ZeroPeriod { field: &'static str },
}

/// Errors reported by a link transport.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("Peripheral {id} is not known to any adapter")]
    UnknownPeripheral { id: String },

    #[error("A required bluetooth service is not available")]
    MissingService,

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,

    #[error("No connection to the peripheral is open")]
    NotConnected,

    #[error("The link to the peripheral was lost")]
    LinkLost,

    #[error("Operation did not complete within {deadline:?}")]
    Deadline { deadline: Duration },

    #[error("Transport rejected the operation: {reason}")]
    Rejected { reason: String },
}

/// Errors produced by the device session state machine.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session is busy ({state}); only one scan or connect may run at a time")]
    Busy { state: SessionState },

    #[error("No peripheral matching {name_filter:?} found within {timeout:?}")]
    DiscoveryTimeout { name_filter: String, timeout: Duration },

    #[error("Failed to connect to {peripheral}: {source}")]
    ConnectFailure { peripheral: String, source: DeviceError },

    #[error("Not connected to the robot arm")]
    NotConnected,

    #[error("Failed to write command: {source}")]
    WriteFailure { source: DeviceError },

    #[error("Transport error: {source}")]
    Transport { source: DeviceError },
}

/// A motor command that can not be sent as requested.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Motor must be 0, 1, or 2 (got {0})")]
    InvalidMotor(i64),

    #[error("Direction must be 'forward' or 'backward' (got {0:?})")]
    InvalidDirection(String),

    #[error("Speed must be 0-255 (got {0})")]
    InvalidSpeed(i64),

    #[error("Duration must be a positive number of milliseconds (got {0})")]
    InvalidDuration(i64),

    #[error("Missing required field '{0}'")]
    MissingField(&'static str),
}

impl ValidationError {
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::InvalidMotor(_) => "InvalidMotor",
            ValidationError::InvalidDirection(_) => "InvalidDirection",
            ValidationError::InvalidSpeed(_) => "InvalidSpeed",
            ValidationError::InvalidDuration(_) => "InvalidDuration",
            ValidationError::MissingField(_) => "MissingField",
        }
    }
}

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("{source}")]
    Validation { #[from] source: ValidationError },

    #[error("{source}")]
    Session { #[from] source: SessionError },
}

impl ControllerError {
    /// Stable name of the failure, reported to gateway clients as `command_error`.
    pub fn kind(&self) -> &'static str {
        match self {
            ControllerError::Validation { source } => source.kind(),
            ControllerError::Session { source } => match source {
                SessionError::Busy { .. } => "Busy",
                SessionError::DiscoveryTimeout { .. } => "DiscoveryTimeout",
                SessionError::ConnectFailure { .. } => "ConnectFailure",
                SessionError::NotConnected => "NotConnected",
                SessionError::WriteFailure { .. } => "WriteFailure",
                SessionError::Transport { .. } => "TransportError",
            },
        }
    }

    pub fn is_not_connected(&self) -> bool {
        matches!(self, ControllerError::Session { source: SessionError::NotConnected })
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Gateway channel is not open")]
    ChannelClosed,

    #[error("Gateway channel is congested, command was not sent")]
    ChannelFull,

    #[error("{source}")]
    Validation { #[from] source: ValidationError },

    #[error("Failed to open gateway channel: {source}")]
    Connect { #[from] source: tungstenite::Error },

    #[error("Failed to encode gateway request: {source}")]
    Json { #[from] source: serde_json::Error },
}

/// A line typed into the interactive shell that can not be understood.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShellError {
    #[error("Unknown command '{0}', type 'help' for a list of commands")]
    UnknownCommand(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("'{0}' is not a number")]
    NotANumber(String),

    #[error("No motor {0}; motors are 0, 1 and 2")]
    NoSuchMotor(i64),
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start (device): {source}")]
    DeviceError { #[from] source: DeviceError },

    #[error("{source}")]
    ControllerError { #[from] source: ControllerError },

    #[error("{source}")]
    ClientError { #[from] source: ClientError },

    #[error("I/O error: {source}")]
    IOError { #[from] source: io::Error },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_error_kinds() {
        let err = ControllerError::from(ValidationError::InvalidMotor(5));
        assert_eq!(err.kind(), "InvalidMotor");

        let err = ControllerError::from(SessionError::NotConnected);
        assert_eq!(err.kind(), "NotConnected");
        assert!(err.is_not_connected());

        let err = ControllerError::from(SessionError::WriteFailure { source: DeviceError::LinkLost });
        assert_eq!(err.kind(), "WriteFailure");
        assert!(!err.is_not_connected());
    }
}
