//! Remote end of the relay: keeps a channel to the gateway open and turns operator actions into
//! gateway requests.
//!
//! The channel is re-established after an unexpected closure, at a fixed delay and a bounded
//! number of times. After that the client gives up until [`GatewayClient::retry`] is called.
//! Commands are never buffered: while the channel is not open they fail straight away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;
use crate::gateway::envelope::{GatewayRequest, GatewayResponse, Operation};
use crate::motor::command::{CommandRequest, MotorCommand};
use crate::motor::state::CommandedState;

const CHANNEL_CAPACITY: usize = 32;
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            delay: Duration::from_millis(3000),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Reconnecting { attempt: u32 },
    /// Terminal until the operator asks for a retry.
    GaveUp,
    Closed,
}

impl ChannelState {
    pub fn is_open(&self) -> bool {
        *self == ChannelState::Open
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Channel(ChannelState),
    Response(GatewayResponse),
}

/// Both directions of an open channel, as text frames. Closing `incoming` means the channel is gone.
pub struct Channel {
    pub outgoing: mpsc::Sender<String>,
    pub incoming: mpsc::Receiver<String>,
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Channel, ClientError>;
}

/// Opens channels as WebSocket connections to the gateway.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        WsConnector { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Channel, ClientError> {
        debug!("Connecting to {}", self.url);
        let (stream, _) = connect_async(self.url.as_str()).await?;
        let (mut write, mut read) = stream.split();

        let (outgoing, mut outgoing_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let (incoming_tx, incoming) = mpsc::channel::<String>(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(text) = outgoing_rx.recv().await {
                if write.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if incoming_tx.send(text).await.is_err() {
                            break;
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {},
                    Err(err) => {
                        debug!("Gateway read error: {}", err);
                        break;
                    },
                }
            }
        });

        Ok(Channel { outgoing, incoming })
    }
}

struct Shared {
    state: watch::Sender<ChannelState>,
    events: broadcast::Sender<ClientEvent>,
    outgoing: Mutex<Option<mpsc::Sender<String>>>,
    commanded: Mutex<CommandedState>,
    robot_connected: AtomicBool,
}

impl Shared {
    fn set_state(&self, next: ChannelState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });

        if changed {
            info!("Gateway channel: {:?}", next);
            let _ = self.events.send(ClientEvent::Channel(next));
        }
    }

    fn set_outgoing(&self, outgoing: Option<mpsc::Sender<String>>) {
        *self.outgoing.lock().expect("Failed to lock gateway channel") = outgoing;
    }

    fn receive(&self, text: &str) {
        match serde_json::from_str::<GatewayResponse>(text) {
            Ok(response) => {
                self.robot_connected.store(response.robot_connected, Ordering::SeqCst);
                let _ = self.events.send(ClientEvent::Response(response));
            },
            Err(err) => warn!("Ignoring unexpected message from gateway {:?}: {}", text, err),
        }
    }
}

pub struct GatewayClient {
    shared: Arc<Shared>,
    state: watch::Receiver<ChannelState>,
    retry: Arc<Notify>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl GatewayClient {
    /// Starts connecting in the background. Events are delivered from the moment of the call.
    pub fn start<C: Connector>(connector: C, policy: ReconnectPolicy) -> (Self, broadcast::Receiver<ClientEvent>) {
        let (state_tx, state) = watch::channel(ChannelState::Connecting);
        let (events, events_rx) = broadcast::channel(EVENT_CAPACITY);

        let shared = Arc::new(Shared {
            state: state_tx,
            events,
            outgoing: Mutex::new(None),
            commanded: Mutex::new(CommandedState::default()),
            robot_connected: AtomicBool::new(false),
        });
        let retry = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(supervise(connector, policy, shared.clone(), retry.clone(), cancel.clone()));

        let client = GatewayClient {
            shared,
            state,
            retry,
            cancel,
            task: Mutex::new(Some(task)),
        };
        (client, events_rx)
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// As last reported by the gateway.
    pub fn robot_connected(&self) -> bool {
        self.shared.robot_connected.load(Ordering::SeqCst)
    }

    pub fn commanded(&self) -> CommandedState {
        self.shared.commanded.lock().expect("Failed to lock commanded state").clone()
    }

    /// Notes where the operator sees a joint; kept in the mirror only.
    pub fn set_position(&self, motor: u8, position: u8) {
        self.shared.commanded.lock().expect("Failed to lock commanded state").set_position(motor, position);
    }

    /// Queues one request on the open channel, or fails immediately.
    pub fn send(&self, request: &GatewayRequest) -> Result<(), ClientError> {
        let text = serde_json::to_string(request)?;
        let outgoing = self.shared.outgoing.lock().expect("Failed to lock gateway channel");
        let sender = outgoing.as_ref().ok_or(ClientError::ChannelClosed)?;

        sender.try_send(text).map_err(|err| match err {
            TrySendError::Full(_) => ClientError::ChannelFull,
            TrySendError::Closed(_) => ClientError::ChannelClosed,
        })
    }

    pub fn get_status(&self) -> Result<(), ClientError> {
        self.send(&GatewayRequest::new(Operation::GetStatus))
    }

    pub fn connect_robot(&self) -> Result<(), ClientError> {
        self.send(&GatewayRequest::new(Operation::Connect))
    }

    pub fn disconnect_robot(&self) -> Result<(), ClientError> {
        self.send(&GatewayRequest::new(Operation::Disconnect))
    }

    pub fn move_motor(&self, request: &CommandRequest) -> Result<MotorCommand, ClientError> {
        let command = request.validate()?;
        self.send(&GatewayRequest::move_motor(&CommandRequest::from(&command)))?;
        self.shared.commanded.lock().expect("Failed to lock commanded state").record(&command);
        Ok(command)
    }

    pub fn stop_motor(&self, motor: u8) -> Result<MotorCommand, ClientError> {
        let command = MotorCommand::stop(motor)?;
        self.send(&GatewayRequest::stop_motor(i64::from(motor)))?;
        self.shared.commanded.lock().expect("Failed to lock commanded state").record(&command);
        Ok(command)
    }

    pub fn stop_all(&self) -> Result<(), ClientError> {
        self.send(&GatewayRequest::new(Operation::StopAll))?;
        self.shared.commanded.lock().expect("Failed to lock commanded state").record_stop_all();
        Ok(())
    }

    /// Restarts reconnecting after the client gave up. Returns false if it had not given up.
    pub fn retry(&self) -> bool {
        if self.state() != ChannelState::GaveUp {
            return false;
        }
        self.retry.notify_one();
        true
    }

    pub async fn close(&self) {
        self.cancel.cancel();
        let task = self.task.lock().expect("Failed to lock client task").take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!("Gateway client task failed: {}", err);
            }
        }
    }
}

impl Drop for GatewayClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn supervise<C: Connector>(connector: C, policy: ReconnectPolicy, shared: Arc<Shared>, retry: Arc<Notify>, cancel: CancellationToken) {
    let mut attempt: u32 = 0;

    'supervise: loop {
        shared.set_state(if attempt == 0 { ChannelState::Connecting } else { ChannelState::Reconnecting { attempt } });

        let connected = tokio::select! {
            _ = cancel.cancelled() => break 'supervise,
            connected = connector.connect() => connected,
        };

        match connected {
            Ok(Channel { outgoing, mut incoming }) => {
                attempt = 0;
                shared.set_outgoing(Some(outgoing.clone()));
                shared.set_state(ChannelState::Open);

                if let Ok(text) = serde_json::to_string(&GatewayRequest::new(Operation::GetStatus)) {
                    if outgoing.try_send(text).is_err() {
                        warn!("Failed to request status");
                    }
                }
                drop(outgoing);

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break 'supervise,
                        message = incoming.recv() => match message {
                            Some(text) => shared.receive(&text),
                            None => break,
                        },
                    }
                }

                shared.set_outgoing(None);
                shared.robot_connected.store(false, Ordering::SeqCst);
                warn!("Gateway channel closed unexpectedly");
            },
            Err(err) => warn!("Failed to connect to gateway: {}", err),
        }

        attempt += 1;
        if attempt > policy.max_attempts {
            warn!("Giving up on the gateway after {} attempts", policy.max_attempts);
            shared.set_state(ChannelState::GaveUp);

            tokio::select! {
                _ = cancel.cancelled() => break 'supervise,
                _ = retry.notified() => {
                    attempt = 0;
                    continue 'supervise;
                },
            }
        }

        shared.set_state(ChannelState::Reconnecting { attempt });
        tokio::select! {
            _ = cancel.cancelled() => break 'supervise,
            _ = sleep(policy.delay) => {},
        }
    }

    shared.set_outgoing(None);
    shared.set_state(ChannelState::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::Instant;
    use tokio_tungstenite::tungstenite;

    /// The far end of a scripted channel.
    struct Peer {
        requests: mpsc::Receiver<String>,
        responses: mpsc::Sender<String>,
    }

    #[derive(Clone, Default)]
    struct ScriptedConnector {
        channels: Arc<Mutex<VecDeque<Channel>>>,
        attempts: Arc<AtomicUsize>,
    }

    impl ScriptedConnector {
        fn offer(&self) -> Peer {
            let (outgoing, requests) = mpsc::channel(CHANNEL_CAPACITY);
            let (responses, incoming) = mpsc::channel(CHANNEL_CAPACITY);
            self.channels.lock().unwrap().push_back(Channel { outgoing, incoming });
            Peer { requests, responses }
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self) -> Result<Channel, ClientError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.channels.lock().unwrap().pop_front()
                .ok_or(ClientError::Connect { source: tungstenite::Error::ConnectionClosed })
        }
    }

    const POLICY: ReconnectPolicy = ReconnectPolicy { delay: Duration::from_secs(3), max_attempts: 5 };

    async fn wait_for(client: &GatewayClient, expected: ChannelState) {
        let mut state = client.watch_state();
        state.wait_for(|state| *state == expected).await.unwrap();
    }

    #[tokio::test]
    async fn requests_status_on_open_and_relays_responses() {
        let connector = ScriptedConnector::default();
        let mut peer = connector.offer();
        let (client, mut events) = GatewayClient::start(connector.clone(), POLICY);

        wait_for(&client, ChannelState::Open).await;
        let first: GatewayRequest = serde_json::from_str(&peer.requests.recv().await.unwrap()).unwrap();
        assert_eq!(first.operation(), Some(Operation::GetStatus));

        client.move_motor(&CommandRequest::new(1, "backward", 120, Some(900))).unwrap();
        let sent: GatewayRequest = serde_json::from_str(&peer.requests.recv().await.unwrap()).unwrap();
        assert_eq!(sent.command_request().unwrap(), CommandRequest::new(1, "backward", 120, Some(900)));
        assert!(client.commanded().motor(1).unwrap().is_moving);

        peer.responses.send(serde_json::to_string(&GatewayResponse::status(true)).unwrap()).await.unwrap();
        loop {
            if let ClientEvent::Response(response) = events.recv().await.unwrap() {
                assert_eq!(response, GatewayResponse::status(true));
                break;
            }
        }
        assert!(client.robot_connected());

        client.close().await;
        assert_eq!(client.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn invalid_command_is_not_sent() {
        let connector = ScriptedConnector::default();
        let mut peer = connector.offer();
        let (client, _events) = GatewayClient::start(connector.clone(), POLICY);
        wait_for(&client, ChannelState::Open).await;
        peer.requests.recv().await.unwrap();

        let err = client.move_motor(&CommandRequest::new(4, "forward", 10, None)).unwrap_err();

        assert!(matches!(err, ClientError::Validation { .. }));
        assert!(!client.commanded().motor(0).unwrap().is_moving);

        // positions are noted locally and never sent
        client.set_position(0, 60);
        assert_eq!(client.commanded().motor(0).unwrap().position, 60);
        assert!(peer.requests.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_bounded_retries() {
        let connector = ScriptedConnector::default();
        let peer = connector.offer();
        let (client, _events) = GatewayClient::start(connector.clone(), POLICY);
        wait_for(&client, ChannelState::Open).await;

        let lost_at = Instant::now();
        drop(peer);
        wait_for(&client, ChannelState::GaveUp).await;

        // the open attempt plus one per retry
        assert_eq!(connector.attempts(), 1 + POLICY.max_attempts as usize);
        let waited = lost_at.elapsed();
        assert!(waited >= POLICY.delay * (POLICY.max_attempts - 1), "{:?}", waited);
        assert!(waited <= POLICY.delay * POLICY.max_attempts, "{:?}", waited);

        assert!(matches!(client.stop_all(), Err(ClientError::ChannelClosed)));
        assert!(matches!(client.connect_robot(), Err(ClientError::ChannelClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_giving_up() {
        let connector = ScriptedConnector::default();
        let (client, _events) = GatewayClient::start(connector.clone(), POLICY);
        wait_for(&client, ChannelState::GaveUp).await;
        assert_eq!(connector.attempts(), 1 + POLICY.max_attempts as usize);

        let mut peer = connector.offer();
        assert!(client.retry());
        wait_for(&client, ChannelState::Open).await;
        peer.requests.recv().await.unwrap();

        client.stop_motor(2).unwrap();
        let sent: GatewayRequest = serde_json::from_str(&peer.requests.recv().await.unwrap()).unwrap();
        assert_eq!(sent, GatewayRequest::stop_motor(2));
        assert!(!client.retry());
    }
}
