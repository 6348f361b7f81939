use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::device::transport::LinkTransport;
use crate::device::types::{PeripheralRef, SessionState};
use crate::error::ControllerError;
use crate::gateway::envelope::{GatewayRequest, GatewayResponse, Operation, ERROR, INVALID_REQUEST, UNKNOWN_COMMAND};
use crate::motor::command::CommandRequest;
use crate::motor::controller::MotorController;

const BROADCAST_CAPACITY: usize = 16;
const MIN_LINK_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Multiplexes any number of remote sessions onto the one arm.
///
/// Clones share the controller. Device operations take the controller lock and are therefore
/// queued in arrival order; status queries only read the session state and never wait.
pub struct Relay<T: LinkTransport> {
    controller: Arc<Mutex<MotorController<T>>>,
    state: watch::Receiver<SessionState>,
    broadcast: broadcast::Sender<GatewayResponse>,
    scan_timeout: Duration,
    connections: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl<T: LinkTransport> Clone for Relay<T> {
    fn clone(&self) -> Self {
        Relay {
            controller: self.controller.clone(),
            state: self.state.clone(),
            broadcast: self.broadcast.clone(),
            scan_timeout: self.scan_timeout,
            connections: self.connections.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

/// Counts a remote session as active for as long as it is alive.
pub struct ConnectionGuard {
    connections: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.connections.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<T: LinkTransport> Relay<T> {
    pub fn new(controller: MotorController<T>, scan_timeout: Duration) -> Self {
        let state = controller.subscribe();
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);

        Relay {
            controller: Arc::new(Mutex::new(controller)),
            state,
            broadcast,
            scan_timeout,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn robot_connected(&self) -> bool {
        self.state.borrow().is_ready()
    }

    pub fn session_state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// The connected peripheral. Waits behind queued device operations.
    pub async fn peripheral(&self) -> Option<PeripheralRef> {
        self.controller.lock().await.peripheral().cloned()
    }

    /// Unsolicited status messages, sent whenever the arm connects or disconnects.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayResponse> {
        self.broadcast.subscribe()
    }

    pub fn open_connection(&self) -> ConnectionGuard {
        let active = self.connections.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Remote session opened ({} active)", active);
        ConnectionGuard { connections: self.connections.clone() }
    }

    pub fn active_connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Cancelled when the gateway shuts down; remote sessions end when it is.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stops the motors and lets go of the arm.
    pub async fn release(&self) {
        self.shutdown.cancel();

        let mut controller = self.controller.lock().await;
        if controller.is_connected() {
            let report = controller.stop_all_motors().await;
            if !report.is_complete() {
                warn!("Not every motor acknowledged the stop before shutdown");
            }
        }
        controller.disconnect().await;
    }

    /// Parses one text frame and answers it. Never fails: every problem becomes an error response.
    /// A request that names a known operation but does not decode is answered under that name.
    pub async fn handle_text(&self, text: &str) -> GatewayResponse {
        let message = match serde_json::from_str::<Value>(text) {
            Ok(message) => message,
            Err(err) => return self.invalid(ERROR, text, err),
        };

        let command = GatewayRequest::operation_of(&message).map_or(ERROR, |operation| operation.response_name());
        match serde_json::from_value::<GatewayRequest>(message) {
            Ok(request) => self.dispatch(&request).await,
            Err(err) => self.invalid(command, text, err),
        }
    }

    fn invalid(&self, command: &str, text: &str, err: serde_json::Error) -> GatewayResponse {
        warn!("Invalid request {:?}: {}", text, err);
        GatewayResponse::failed(command, INVALID_REQUEST, format!("Invalid request: {}", err), self.robot_connected())
    }

    pub async fn dispatch(&self, request: &GatewayRequest) -> GatewayResponse {
        let operation = match request.operation() {
            Some(operation) => operation,
            None => {
                warn!("Unknown command: {:?}", request.command);
                return GatewayResponse::failed(
                    &request.command,
                    UNKNOWN_COMMAND,
                    format!("Unknown command: {}", request.command),
                    self.robot_connected(),
                );
            },
        };
        debug!("Handling {}", operation);

        match operation {
            Operation::GetStatus => GatewayResponse::status(self.robot_connected()),
            Operation::Connect => self.connect().await,
            Operation::Disconnect => {
                self.controller.lock().await.disconnect().await;
                GatewayResponse::ok(operation.response_name(), "Disconnected from robot", self.robot_connected())
            },
            Operation::MoveMotor => {
                match request.command_request() {
                    Ok(command) => self.move_motor(operation, &command).await,
                    Err(err) => self.rejected(operation, err.into()),
                }
            },
            Operation::StopMotor => {
                match request.motor() {
                    Ok(motor) => self.move_motor(operation, &CommandRequest::new(motor, "forward", 0, None)).await,
                    Err(err) => self.rejected(operation, err.into()),
                }
            },
            Operation::StopAll => self.stop_all().await,
        }
    }

    async fn connect(&self) -> GatewayResponse {
        let operation = Operation::Connect;
        let mut controller = self.controller.lock().await;

        if controller.is_connected() {
            return GatewayResponse::ok(operation.response_name(), "Already connected", true);
        }

        match controller.scan_and_connect(self.scan_timeout).await {
            Ok(peripheral) => GatewayResponse::ok(operation.response_name(), format!("Connected to {}", peripheral), self.robot_connected()),
            Err(err) => self.rejected(operation, err),
        }
    }

    async fn move_motor(&self, operation: Operation, request: &CommandRequest) -> GatewayResponse {
        // validated before queueing for the arm: a bad request never waits and never reaches it
        let command = match request.validate() {
            Ok(command) => command,
            Err(err) => return self.rejected(operation, err.into()),
        };

        let result = self.controller.lock().await.send(&command).await;
        match result {
            Ok(()) if command.is_stop() => GatewayResponse::ok(operation.response_name(), format!("Motor {} stopped", command.motor()), true),
            Ok(()) => GatewayResponse::ok(operation.response_name(), format!("Motor {} moving {} at speed {}", command.motor(), command.direction(), command.speed()), true),
            Err(err) => self.rejected(operation, err),
        }
    }

    async fn stop_all(&self) -> GatewayResponse {
        let operation = Operation::StopAll;
        let report = self.controller.lock().await.stop_all_motors().await;

        let message = match report.failed.first() {
            None => "All motors stopped".to_string(),
            Some((_, err)) => {
                let motors: Vec<String> = report.failed.iter().map(|(motor, _)| motor.to_string()).collect();
                format!("Failed to stop motor(s) {}: {}", motors.join(", "), err)
            },
        };

        GatewayResponse::ok(operation.response_name(), message, self.robot_connected())
    }

    fn rejected(&self, operation: Operation, err: ControllerError) -> GatewayResponse {
        warn!("{} failed: {}", operation, err);
        GatewayResponse::failed(operation.response_name(), err.kind(), err.to_string(), self.robot_connected())
    }

    /// Publishes a `status` message on every change between connected and not connected.
    pub fn spawn_status_broadcast(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let mut state = self.state.clone();
        let broadcast = self.broadcast.clone();
        let mut connected = state.borrow_and_update().is_ready();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = state.changed() => {
                        if changed.is_err() {
                            break;
                        }

                        let now = state.borrow_and_update().is_ready();
                        if now != connected {
                            connected = now;
                            info!("Robot {}", if now { "connected" } else { "disconnected" });
                            if broadcast.send(GatewayResponse::status(now)).is_err() {
                                debug!("No remote sessions to notify");
                            }
                        }
                    },
                }
            }
        })
    }

    /// Periodically verifies the link while the arm is idle, so a peripheral that went out of
    /// range is reported as disconnected without waiting for the next failed write.
    pub fn spawn_link_watchdog(&self, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let controller = self.controller.clone();
        let period = if period.is_zero() {
            warn!("Link check interval of zero, checking every {:?} instead", MIN_LINK_CHECK_INTERVAL);
            MIN_LINK_CHECK_INTERVAL
        } else {
            period
        };

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        // busy means a command is in flight, which checks the link by itself
                        if let Ok(mut controller) = controller.try_lock() {
                            if controller.is_connected() {
                                controller.check_link().await;
                            }
                        }
                    },
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::session::LinkSettings;
    use crate::device::simulated::{SimulatedTransport, TransportCall};
    use crate::gateway::envelope::STATUS;

    fn relay(transport: &SimulatedTransport) -> Relay<SimulatedTransport> {
        let controller = MotorController::new(transport.clone(), LinkSettings::default());
        Relay::new(controller, Duration::from_secs(10))
    }

    async fn connected_relay(transport: &SimulatedTransport) -> Relay<SimulatedTransport> {
        let relay = relay(transport);
        let response = relay.handle_text(r#"{"command":"connect"}"#).await;
        assert!(!response.error, "{:?}", response);
        relay
    }

    #[tokio::test]
    async fn invalid_motor_is_rejected_without_writing() {
        let transport = SimulatedTransport::robot_arm();
        let relay = connected_relay(&transport).await;

        let response = relay.handle_text(r#"{"command":"move_motor","motor":5,"direction":"forward","speed":100}"#).await;

        assert!(response.error);
        assert_eq!(response.command, "move_motor");
        assert_eq!(response.command_error.as_deref(), Some("InvalidMotor"));
        assert!(response.robot_connected);
        assert!(transport.writes().is_empty());
    }

    #[tokio::test]
    async fn move_before_connect_is_not_connected() {
        let transport = SimulatedTransport::robot_arm();
        let relay = relay(&transport);

        let response = relay.handle_text(r#"{"command":"move_motor","motor":0,"direction":"forward","speed":100}"#).await;

        assert_eq!(response.command_error.as_deref(), Some("NotConnected"));
        assert!(!response.robot_connected);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_and_unknown_requests() {
        let transport = SimulatedTransport::robot_arm();
        let relay = relay(&transport);

        let response = relay.handle_text("{not json").await;
        assert_eq!(response.command, "error");
        assert_eq!(response.command_error.as_deref(), Some("InvalidRequest"));

        let response = relay.handle_text(r#"{"command":"dance"}"#).await;
        assert_eq!(response.command, "dance");
        assert_eq!(response.command_error.as_deref(), Some("UnknownCommand"));

        let response = relay.handle_text(r#"{"command":"move_motor","motor":1,"speed":10}"#).await;
        assert_eq!(response.command_error.as_deref(), Some("MissingField"));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn mistyped_field_is_answered_under_its_command() {
        let transport = SimulatedTransport::robot_arm();
        let relay = connected_relay(&transport).await;

        let response = relay.handle_text(r#"{"command":"move_motor","motor":"1","direction":"forward","speed":10}"#).await;
        assert_eq!(response.command, "move_motor");
        assert!(response.error);
        assert_eq!(response.command_error.as_deref(), Some("InvalidRequest"));
        assert!(response.robot_connected);

        let response = relay.handle_text(r#"{"type":"stop_motor","motor":true}"#).await;
        assert_eq!(response.command, "stop_motor");
        assert_eq!(response.command_error.as_deref(), Some("InvalidRequest"));

        let response = relay.handle_text(r#"{"command":"get_status","speed":"fast"}"#).await;
        assert_eq!(response.command, "status");
        assert!(transport.writes().is_empty());
    }

    #[tokio::test]
    async fn connect_move_stop_disconnect() {
        let transport = SimulatedTransport::robot_arm();
        let relay = connected_relay(&transport).await;

        let again = relay.handle_text(r#"{"command":"connect"}"#).await;
        assert_eq!(again.message, "Already connected");
        assert_eq!(transport.count(&TransportCall::Discover), 1);

        let moved = relay.handle_text(r#"{"command":"move_motor","motor":2,"direction":"backward","speed":60,"duration":800}"#).await;
        assert!(!moved.error);
        let stopped = relay.handle_text(r#"{"command":"stop_motor","motor":2}"#).await;
        assert_eq!(stopped.message, "Motor 2 stopped");

        let status = relay.handle_text(r#"{"command":"get_status"}"#).await;
        assert_eq!(status.command, STATUS);
        assert!(status.robot_connected);

        let disconnected = relay.handle_text(r#"{"command":"disconnect"}"#).await;
        assert!(!disconnected.error);
        assert!(!disconnected.robot_connected);

        assert_eq!(
            transport.writes(),
            vec![
                br#"{"motor":2,"direction":"backward","speed":60,"duration":800}"#.to_vec(),
                br#"{"motor":2,"direction":"forward","speed":0}"#.to_vec(),
            ],
        );
    }

    #[tokio::test]
    async fn stop_all_reports_failures_without_error_flag() {
        let transport = SimulatedTransport::robot_arm();
        let relay = connected_relay(&transport).await;
        transport.fail_writes(1);

        let response = relay.handle_text(r#"{"command":"stop_all"}"#).await;

        assert!(!response.error);
        assert!(response.message.starts_with("Failed to stop motor(s) 0"), "{}", response.message);
        assert_eq!(transport.writes().len(), 3);
    }

    #[tokio::test]
    async fn concurrent_sessions_are_serialized() {
        let transport = SimulatedTransport::robot_arm();
        let relay = connected_relay(&transport).await;

        let sessions: Vec<_> = (0..3)
            .map(|motor| {
                let relay = relay.clone();
                tokio::spawn(async move {
                    let request = GatewayRequest::move_motor(&CommandRequest::new(motor, "forward", 10, None));
                    relay.dispatch(&request).await
                })
            })
            .collect();

        for session in sessions {
            assert!(!session.await.unwrap().error);
        }
        assert_eq!(transport.writes().len(), 3);
    }

    #[tokio::test]
    async fn status_is_broadcast_on_change() {
        let transport = SimulatedTransport::robot_arm();
        let relay = relay(&transport);
        let cancel = CancellationToken::new();
        let mut updates = relay.subscribe();
        let task = relay.spawn_status_broadcast(cancel.clone());

        relay.handle_text(r#"{"command":"connect"}"#).await;
        assert_eq!(updates.recv().await.unwrap(), GatewayResponse::status(true));

        relay.handle_text(r#"{"command":"disconnect"}"#).await;
        assert_eq!(updates.recv().await.unwrap(), GatewayResponse::status(false));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_notices_lost_link() {
        let transport = SimulatedTransport::robot_arm();
        let relay = connected_relay(&transport).await;
        let mut state = relay.state.clone();
        let cancel = CancellationToken::new();
        let task = relay.spawn_link_watchdog(Duration::from_secs(1), cancel.clone());

        transport.drop_link();
        tokio::time::timeout(Duration::from_secs(5), state.wait_for(|state| *state == SessionState::Idle))
            .await
            .unwrap()
            .unwrap();

        assert!(!relay.robot_connected());
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_survives_zero_period() {
        let transport = SimulatedTransport::robot_arm();
        let relay = connected_relay(&transport).await;
        let mut state = relay.state.clone();
        let cancel = CancellationToken::new();
        let task = relay.spawn_link_watchdog(Duration::ZERO, cancel.clone());

        transport.drop_link();
        tokio::time::timeout(Duration::from_secs(5), state.wait_for(|state| *state == SessionState::Idle))
            .await
            .unwrap()
            .unwrap();

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn release_stops_and_disconnects() {
        let transport = SimulatedTransport::robot_arm();
        let relay = connected_relay(&transport).await;
        let token = relay.shutdown_token();

        relay.release().await;

        assert!(token.is_cancelled());
        assert!(!relay.robot_connected());
        assert_eq!(transport.writes().len(), 3);
        assert_eq!(transport.count(&TransportCall::Disconnect), 1);
    }

    #[test]
    fn connection_guard_counts_sessions() {
        let relay = relay(&SimulatedTransport::robot_arm());
        let first = relay.open_connection();
        let second = relay.open_connection();
        assert_eq!(relay.active_connections(), 2);

        drop(first);
        drop(second);
        assert_eq!(relay.active_connections(), 0);
    }
}
