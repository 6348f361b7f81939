use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Duration};

use crate::device::constants::{identifiers_match, DEVICE_NAME, IS_CONNECTED_DEADLINE, ROBOT_ARM_COMMAND_CHARACTERISTIC, ROBOT_ARM_SERVICE, WRITE_DEADLINE};
use crate::device::transport::LinkTransport;
use crate::device::types::{ControlChannel, PeripheralRef, SessionState};
use crate::error::{DeviceError, SessionError};

/// What the session looks for and how long link operations may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    /// Accept the first peripheral whose advertised name contains this.
    pub name_filter: String,
    pub service: String,
    pub characteristic: String,
    pub write_deadline: Duration,
    pub link_check_deadline: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        LinkSettings {
            name_filter: DEVICE_NAME.to_string(),
            service: ROBOT_ARM_SERVICE.to_string(),
            characteristic: ROBOT_ARM_COMMAND_CHARACTERISTIC.to_string(),
            write_deadline: Duration::from_millis(WRITE_DEADLINE),
            link_check_deadline: Duration::from_millis(IS_CONNECTED_DEADLINE),
        }
    }
}

#[derive(Debug)]
struct ActiveLink {
    peripheral: PeripheralRef,
    channel: ControlChannel,
}

/// Connection lifecycle of one peripheral.
///
/// The session owns its transport; nothing else can reach the link. State only changes through
/// the transitions below, and every change is published to [`DeviceSession::subscribe`]rs.
///
/// ```text
/// Idle -> Scanning -> (Connecting) -> Ready -> Disconnecting -> Idle
/// ```
pub struct DeviceSession<T: LinkTransport> {
    transport: T,
    settings: LinkSettings,
    state: watch::Sender<SessionState>,
    // only Some while Ready
    link: Option<ActiveLink>,
}

impl<T: LinkTransport> DeviceSession<T> {
    pub fn new(transport: T, settings: LinkSettings) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        DeviceSession { transport, settings, state, link: None }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn peripheral(&self) -> Option<&PeripheralRef> {
        self.link.as_ref().map(|link| &link.peripheral)
    }

    fn transition(&mut self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!("Session {} -> {}", previous, next);
        }
    }

    // scan and connect attempts are never queued
    fn begin(&mut self, next: SessionState) -> Result<(), SessionError> {
        let current = self.state();
        if current != SessionState::Idle {
            warn!("Rejecting {} request while {}", next, current);
            return Err(SessionError::Busy { state: current });
        }

        self.transition(next);
        Ok(())
    }

    /// Looks for the arm and reports the first match, leaving the session Idle.
    pub async fn scan(&mut self, timeout: Duration) -> Result<PeripheralRef, SessionError> {
        self.begin(SessionState::Scanning)?;
        let found = self.discover(timeout).await;
        self.transition(SessionState::Idle);
        found
    }

    /// Looks for the arm and connects to the first match straight away.
    pub async fn scan_and_connect(&mut self, timeout: Duration) -> Result<PeripheralRef, SessionError> {
        self.begin(SessionState::Scanning)?;

        let peripheral = match self.discover(timeout).await {
            Ok(peripheral) => peripheral,
            Err(err) => {
                self.transition(SessionState::Idle);
                return Err(err);
            },
        };

        self.transition(SessionState::Connecting);
        self.establish(&peripheral).await?;
        Ok(peripheral)
    }

    pub async fn connect(&mut self, peripheral: &PeripheralRef) -> Result<(), SessionError> {
        self.begin(SessionState::Connecting)?;
        self.establish(peripheral).await
    }

    async fn discover(&mut self, scan_timeout: Duration) -> Result<PeripheralRef, SessionError> {
        info!("Scanning for {:?}...", self.settings.name_filter);

        let mut peripherals = self.transport.discover().await
            .map_err(|source| SessionError::Transport { source })?;

        let name_filter = self.settings.name_filter.clone();
        let search = async {
            while let Some(peripheral) = peripherals.next().await {
                if peripheral.name.contains(&name_filter) {
                    return Some(peripheral);
                }
                debug!("Ignoring peripheral {}", peripheral);
            }
            None
        };

        let found = timeout(scan_timeout, search).await.ok().flatten();

        // first match wins: nothing after it is looked at
        drop(peripherals);
        if let Err(err) = self.transport.stop_discovery().await {
            warn!("Failed to stop discovery: {}", err);
        }

        match found {
            Some(peripheral) => {
                info!("Using peripheral {} [{}]", peripheral, peripheral.id);
                Ok(peripheral)
            },
            None => Err(SessionError::DiscoveryTimeout { name_filter, timeout: scan_timeout }),
        }
    }

    async fn establish(&mut self, peripheral: &PeripheralRef) -> Result<(), SessionError> {
        if let Err(source) = self.transport.connect(peripheral).await {
            warn!("Connecting to peripheral failed: {}", source);
            self.transition(SessionState::Idle);
            return Err(SessionError::ConnectFailure { peripheral: peripheral.to_string(), source });
        }

        match self.negotiate().await {
            Ok(channel) => {
                info!("Peripheral ready, writing to {}", channel.characteristic);
                self.link = Some(ActiveLink { peripheral: peripheral.clone(), channel });
                self.transition(SessionState::Ready);
                Ok(())
            },
            Err(source) => {
                warn!("Discovering the command channel failed: {}", source);
                if let Err(err) = self.transport.disconnect().await {
                    warn!("Failed to close half-open connection: {}", err);
                }
                self.transition(SessionState::Idle);
                Err(SessionError::ConnectFailure { peripheral: peripheral.to_string(), source })
            },
        }
    }

    async fn negotiate(&mut self) -> Result<ControlChannel, DeviceError> {
        let service = self.transport.services().await?
            .into_iter()
            .find(|candidate| identifiers_match(candidate, &self.settings.service))
            .ok_or(DeviceError::MissingService)?;

        let characteristic = self.transport.characteristics(&service).await?
            .into_iter()
            .find(|candidate| identifiers_match(candidate, &self.settings.characteristic))
            .ok_or(DeviceError::MissingCharacteristic)?;

        Ok(ControlChannel { service, characteristic })
    }

    /// Writes to the control characteristic. Resolves when the transport acknowledged the
    /// write; the link has no way to report whether the arm acted on it.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), SessionError> {
        let channel = match (&self.link, self.state()) {
            (Some(link), SessionState::Ready) => link.channel.clone(),
            _ => return Err(SessionError::NotConnected),
        };

        let deadline = self.settings.write_deadline;
        let result = tokio::select! {
            _ = sleep(deadline) => Err(DeviceError::Deadline { deadline }),
            result = self.transport.write(&channel, data) => result,
        };

        match result {
            Ok(()) => Ok(()),
            Err(DeviceError::LinkLost) => {
                warn!("Connection lost while writing");
                self.teardown().await;
                Err(SessionError::WriteFailure { source: DeviceError::LinkLost })
            },
            Err(source) => {
                warn!("Failed to send to control characteristic: {}", source);
                Err(SessionError::WriteFailure { source })
            },
        }
    }

    /// Asks the transport whether the peripheral is still there. A negative or late answer
    /// while Ready counts as link loss.
    pub async fn check_link(&mut self) -> SessionState {
        if !self.state().is_ready() {
            return self.state();
        }

        let deadline = self.settings.link_check_deadline;
        let alive = tokio::select! {
            _ = sleep(deadline) => {
                warn!("Checking for connection status took too long");
                false
            }
            result = self.transport.is_connected() => match result {
                Err(err) => {
                    warn!("Error checking for connection state: {}", err);
                    false
                },
                Ok(false) => {
                    warn!("Connection lost");
                    false
                },
                Ok(true) => true,
            }
        };

        if !alive {
            self.teardown().await;
        }
        self.state()
    }

    async fn teardown(&mut self) {
        self.transition(SessionState::Disconnecting);
        self.link = None;

        // the caller wants to be disconnected, and from here on it is
        if let Err(err) = self.transport.disconnect().await {
            warn!("Ignoring error while disconnecting: {}", err);
        }
        self.transition(SessionState::Idle);
    }

    /// Idempotent; never fails.
    pub async fn disconnect(&mut self) {
        match self.state() {
            SessionState::Idle => debug!("Disconnect requested while idle"),
            _ => self.teardown().await,
        }
    }
}
