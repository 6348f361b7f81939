use std::fmt;
use serde::{Deserialize, Serialize};

/// A peripheral found during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeripheralRef {
    pub id: String,
    pub name: String,
    pub address: String,
}

impl fmt::Display for PeripheralRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Scanning,
    Connecting,
    Ready,
    Disconnecting,
}

impl SessionState {
    pub fn is_ready(&self) -> bool {
        *self == SessionState::Ready
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            SessionState::Idle => "idle",
            SessionState::Scanning => "scanning",
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Disconnecting => "disconnecting",
        };

        write!(f, "{}", result)
    }
}

/// The service/characteristic pair commands are written to, as named by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlChannel {
    pub service: String,
    pub characteristic: String,
}
