//! An in-memory robot arm.
//!
//! [`SimulatedTransport`] behaves like the arm's controller board as seen through the link: it
//! advertises peripherals, exposes the command service, accepts writes and can be told to fail.
//! Every call is recorded so callers can check what reached the "radio".

use std::collections::VecDeque;
use std::future;
use std::sync::{Arc, Mutex, MutexGuard};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, info};

use crate::device::constants::{identifiers_match, DEVICE_NAME, ROBOT_ARM_COMMAND_CHARACTERISTIC, ROBOT_ARM_SERVICE};
use crate::device::transport::LinkTransport;
use crate::device::types::{ControlChannel, PeripheralRef};
use crate::error::DeviceError;

const CALL_HISTORY: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Discover,
    StopDiscovery,
    Connect(String),
    Services,
    Characteristics(String),
    Write(Vec<u8>),
    IsConnected,
    Disconnect,
}

#[derive(Debug, Clone)]
pub struct SimulatedService {
    pub id: String,
    pub characteristics: Vec<String>,
}

impl SimulatedService {
    pub fn robot_arm() -> Self {
        SimulatedService {
            id: ROBOT_ARM_SERVICE.to_string(),
            characteristics: vec![ROBOT_ARM_COMMAND_CHARACTERISTIC.to_string()],
        }
    }
}

struct SimulatedLink {
    advertised: Vec<PeripheralRef>,
    services: Vec<SimulatedService>,
    reachable: bool,
    connected: bool,
    link_lost: bool,
    failing_writes: usize,
    failing_disconnect: bool,
    stalled_writes: bool,
    stalled_link_checks: bool,
    discovered: usize,
    calls: VecDeque<TransportCall>,
}

impl SimulatedLink {
    fn record(&mut self, call: TransportCall) {
        if self.calls.len() == CALL_HISTORY {
            self.calls.pop_front();
        }
        self.calls.push_back(call);
    }
}

#[derive(Clone)]
pub struct SimulatedTransport {
    link: Arc<Mutex<SimulatedLink>>,
}

pub fn advertised(id: &str, name: &str) -> PeripheralRef {
    PeripheralRef {
        id: id.to_string(),
        name: name.to_string(),
        address: format!("SIM:{}", id),
    }
}

impl SimulatedTransport {
    pub fn new(advertised: Vec<PeripheralRef>, services: Vec<SimulatedService>) -> Self {
        let link = SimulatedLink {
            advertised,
            services,
            reachable: true,
            connected: false,
            link_lost: false,
            failing_writes: 0,
            failing_disconnect: false,
            stalled_writes: false,
            stalled_link_checks: false,
            discovered: 0,
            calls: VecDeque::new(),
        };
        SimulatedTransport { link: Arc::new(Mutex::new(link)) }
    }

    /// A single arm advertising under its factory name.
    pub fn robot_arm() -> Self {
        SimulatedTransport::new(
            vec![advertised("sim-arm-0", DEVICE_NAME)],
            vec![SimulatedService::robot_arm()],
        )
    }

    fn lock(&self) -> MutexGuard<'_, SimulatedLink> {
        self.link.lock().expect("Failed to lock simulated link")
    }

    /// Connection attempts are refused.
    pub fn unreachable(self) -> Self {
        self.lock().reachable = false;
        self
    }

    pub fn failing_disconnect(self) -> Self {
        self.lock().failing_disconnect = true;
        self
    }

    /// The next `count` writes are rejected.
    pub fn fail_writes(&self, count: usize) {
        self.lock().failing_writes = count;
    }

    /// Writes are recorded but never answered, until [`SimulatedTransport::resume`].
    pub fn stall_writes(&self) {
        self.lock().stalled_writes = true;
    }

    /// Link checks are never answered, until [`SimulatedTransport::resume`].
    pub fn stall_link_checks(&self) {
        self.lock().stalled_link_checks = true;
    }

    pub fn resume(&self) {
        let mut link = self.lock();
        link.stalled_writes = false;
        link.stalled_link_checks = false;
    }

    /// The peripheral goes out of range; the next operation notices.
    pub fn drop_link(&self) {
        self.lock().link_lost = true;
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().calls.iter().cloned().collect()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().calls.iter()
            .filter_map(|call| match call {
                TransportCall::Write(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, expected: &TransportCall) -> usize {
        self.lock().calls.iter().filter(|call| *call == expected).count()
    }

    /// How many advertisements the consumer of the discovery stream actually pulled.
    pub fn discovered(&self) -> usize {
        self.lock().discovered
    }
}

#[async_trait]
impl LinkTransport for SimulatedTransport {
    async fn discover(&mut self) -> Result<BoxStream<'static, PeripheralRef>, DeviceError> {
        let advertised = {
            let mut link = self.lock();
            link.record(TransportCall::Discover);
            link.advertised.clone()
        };

        let counter = self.link.clone();
        let peripherals = stream::iter(advertised)
            .inspect(move |_| counter.lock().expect("Failed to lock simulated link").discovered += 1)
            // a real radio keeps listening until it is told to stop
            .chain(stream::pending());

        Ok(peripherals.boxed())
    }

    async fn stop_discovery(&mut self) -> Result<(), DeviceError> {
        self.lock().record(TransportCall::StopDiscovery);
        Ok(())
    }

    async fn connect(&mut self, peripheral: &PeripheralRef) -> Result<(), DeviceError> {
        let mut link = self.lock();
        link.record(TransportCall::Connect(peripheral.id.clone()));

        if !link.advertised.iter().any(|candidate| candidate.id == peripheral.id) {
            return Err(DeviceError::UnknownPeripheral { id: peripheral.id.clone() });
        }
        if !link.reachable {
            return Err(DeviceError::Rejected { reason: "peripheral did not respond".to_string() });
        }

        info!("Simulated arm connected: {}", peripheral);
        link.connected = true;
        link.link_lost = false;
        Ok(())
    }

    async fn services(&mut self) -> Result<Vec<String>, DeviceError> {
        let mut link = self.lock();
        link.record(TransportCall::Services);

        if !link.connected {
            return Err(DeviceError::NotConnected);
        }
        Ok(link.services.iter().map(|service| service.id.clone()).collect())
    }

    async fn characteristics(&mut self, service: &str) -> Result<Vec<String>, DeviceError> {
        let mut link = self.lock();
        link.record(TransportCall::Characteristics(service.to_string()));

        if !link.connected {
            return Err(DeviceError::NotConnected);
        }
        link.services.iter()
            .find(|candidate| identifiers_match(&candidate.id, service))
            .map(|found| found.characteristics.clone())
            .ok_or(DeviceError::MissingService)
    }

    async fn write(&mut self, channel: &ControlChannel, data: &[u8]) -> Result<(), DeviceError> {
        let stalled = {
            let mut link = self.lock();
            link.record(TransportCall::Write(data.to_vec()));
            link.stalled_writes
        };
        if stalled {
            future::pending::<()>().await;
        }

        let mut link = self.lock();

        if link.link_lost {
            link.connected = false;
            return Err(DeviceError::LinkLost);
        }
        if !link.connected {
            return Err(DeviceError::NotConnected);
        }
        if link.failing_writes > 0 {
            link.failing_writes -= 1;
            return Err(DeviceError::Rejected { reason: "write was not acknowledged".to_string() });
        }

        debug!("Simulated write to {}: {}", channel.characteristic, String::from_utf8_lossy(data));
        Ok(())
    }

    async fn is_connected(&mut self) -> Result<bool, DeviceError> {
        let stalled = {
            let mut link = self.lock();
            link.record(TransportCall::IsConnected);
            link.stalled_link_checks
        };
        if stalled {
            future::pending::<()>().await;
        }

        let link = self.lock();
        Ok(link.connected && !link.link_lost)
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        let mut link = self.lock();
        link.record(TransportCall::Disconnect);
        link.connected = false;

        if link.failing_disconnect {
            return Err(DeviceError::Rejected { reason: "disconnect was not acknowledged".to_string() });
        }
        Ok(())
    }
}
