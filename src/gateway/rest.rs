//! Plain HTTP endpoints for browser clients that do not keep a WebSocket open.
//!
//! Every handler goes through [`Relay::dispatch`], so REST calls queue on the same controller
//! lock as WebSocket requests and trigger the same status broadcasts.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::device::transport::LinkTransport;
use crate::device::types::{PeripheralRef, SessionState};
use crate::gateway::envelope::{GatewayRequest, GatewayResponse, Operation, INVALID_REQUEST};
use crate::gateway::relay::Relay;
use crate::gateway::server::health;

pub const STATUS_PATH: &str = "/api/status";
pub const CONNECT_PATH: &str = "/api/connect";
pub const DISCONNECT_PATH: &str = "/api/disconnect";
pub const MOTOR_PATH: &str = "/api/motor";
pub const STOP_ALL_PATH: &str = "/api/stop-all";
pub const ROBOT_INFO_PATH: &str = "/api/robot-info";

const SUCCESS: &str = "success";
const FAILURE: &str = "error";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotInfo {
    pub connected: bool,
    pub state: SessionState,
    pub device_info: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<PeripheralRef>,
}

impl RobotInfo {
    fn new(state: SessionState, device: Option<PeripheralRef>) -> Self {
        let device_info = match &device {
            Some(device) => format!("Device: {} ({})", device.address, device.name),
            None => "No device connected".to_string(),
        };

        RobotInfo {
            connected: state.is_ready(),
            state,
            device_info,
            device,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    /// "success" or "error".
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Same names as `command_error` on the WebSocket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub robot_connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<RobotInfo>,
}

type Reply = (StatusCode, Json<ApiResponse>);

fn status_code(kind: &str) -> StatusCode {
    match kind {
        "InvalidMotor" | "InvalidDirection" | "InvalidSpeed" | "InvalidDuration" | "MissingField" | INVALID_REQUEST => StatusCode::BAD_REQUEST,
        "NotConnected" | "Busy" => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reply(response: GatewayResponse) -> Reply {
    match response.command_error {
        Some(kind) if response.error => {
            let body = ApiResponse {
                status: FAILURE.to_string(),
                message: None,
                error: Some(response.message),
                code: Some(kind.clone()),
                robot_connected: response.robot_connected,
                data: None,
            };
            (status_code(&kind), Json(body))
        },
        _ => {
            let body = ApiResponse {
                status: SUCCESS.to_string(),
                message: Some(response.message),
                error: None,
                code: None,
                robot_connected: response.robot_connected,
                data: None,
            };
            (StatusCode::OK, Json(body))
        },
    }
}

pub fn routes<T: LinkTransport>() -> Router<Relay<T>> {
    Router::new()
        .route(STATUS_PATH, get(health::<T>))
        .route(CONNECT_PATH, post(connect::<T>))
        .route(DISCONNECT_PATH, post(disconnect::<T>))
        .route(MOTOR_PATH, post(move_motor::<T>))
        .route(STOP_ALL_PATH, post(stop_all::<T>))
        .route(ROBOT_INFO_PATH, get(robot_info::<T>))
}

async fn connect<T: LinkTransport>(State(relay): State<Relay<T>>) -> Reply {
    reply(relay.dispatch(&GatewayRequest::new(Operation::Connect)).await)
}

async fn disconnect<T: LinkTransport>(State(relay): State<Relay<T>>) -> Reply {
    reply(relay.dispatch(&GatewayRequest::new(Operation::Disconnect)).await)
}

async fn stop_all<T: LinkTransport>(State(relay): State<Relay<T>>) -> Reply {
    reply(relay.dispatch(&GatewayRequest::new(Operation::StopAll)).await)
}

/// Body: `{"motor": 0, "direction": "forward", "speed": 150, "duration": 2000}`.
async fn move_motor<T: LinkTransport>(State(relay): State<Relay<T>>, body: String) -> Reply {
    let operation = Operation::MoveMotor;
    let mut request = match serde_json::from_str::<GatewayRequest>(&body) {
        Ok(request) => request,
        Err(err) => {
            let message = format!("Invalid request: {}", err);
            return reply(GatewayResponse::failed(operation.response_name(), INVALID_REQUEST, message, relay.robot_connected()));
        },
    };

    request.command = operation.as_str().to_string();
    reply(relay.dispatch(&request).await)
}

async fn robot_info<T: LinkTransport>(State(relay): State<Relay<T>>) -> Reply {
    let info = RobotInfo::new(relay.session_state(), relay.peripheral().await);

    let body = ApiResponse {
        status: SUCCESS.to_string(),
        message: None,
        error: None,
        code: None,
        robot_connected: info.connected,
        data: Some(info),
    };
    (StatusCode::OK, Json(body))
}
