use std::time::SystemTime;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};

use crate::device::transport::LinkTransport;
use crate::gateway::envelope::GatewayResponse;
use crate::gateway::relay::Relay;
use crate::gateway::rest;

pub const WS_PATH: &str = "/ws";
pub const HEALTH_PATH: &str = "/health";

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    pub robot_connected: bool,
    pub active_connections: usize,
    pub timestamp: String,
}

/// `/ws` for remote sessions, `/health` and the REST endpoints under `/api`. Any origin may
/// call in.
pub fn create_router<T: LinkTransport>(relay: Relay<T>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(WS_PATH, get(websocket_handler::<T>))
        .route(HEALTH_PATH, get(health::<T>))
        .merge(rest::routes::<T>())
        .layer(cors)
        .with_state(relay)
}

pub(crate) async fn health<T: LinkTransport>(State(relay): State<Relay<T>>) -> Json<Health> {
    Json(Health {
        status: "running",
        version: env!("CARGO_PKG_VERSION"),
        robot_connected: relay.robot_connected(),
        active_connections: relay.active_connections(),
        timestamp: humantime::format_rfc3339_seconds(SystemTime::now()).to_string(),
    })
}

async fn websocket_handler<T: LinkTransport>(ws: WebSocketUpgrade, State(relay): State<Relay<T>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, relay))
}

async fn send_response(sender: &mut SplitSink<WebSocket, Message>, response: &GatewayResponse) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(response) {
        Ok(text) => text,
        Err(err) => {
            warn!("Failed to encode response: {}", err);
            return Ok(());
        },
    };
    sender.send(Message::Text(text)).await
}

/// One remote session: answers each request in order and interleaves status broadcasts.
pub async fn handle_socket<T: LinkTransport>(socket: WebSocket, relay: Relay<T>) {
    let _connection = relay.open_connection();
    let mut updates = relay.subscribe();
    let shutdown = relay.shutdown_token();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            },
            message = receiver.next() => {
                let text = match message {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        debug!("Error reading from remote session: {}", err);
                        break;
                    },
                };

                let response = relay.handle_text(&text).await;
                if let Err(err) = send_response(&mut sender, &response).await {
                    debug!("Failed to answer remote session: {}", err);
                    break;
                }
            },
            update = updates.recv() => {
                let update = match update {
                    Ok(update) => update,
                    // only the latest status matters
                    Err(RecvError::Lagged(_)) => GatewayResponse::status(relay.robot_connected()),
                    Err(RecvError::Closed) => break,
                };

                if let Err(err) = send_response(&mut sender, &update).await {
                    debug!("Failed to notify remote session: {}", err);
                    break;
                }
            },
        }
    }

    info!("Remote session closed");
}
