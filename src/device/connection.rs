use std::collections::{HashSet, VecDeque};
use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, info, warn};
use tokio::time::{sleep, Duration};

use crate::device::constants::{identifiers_match, POLL_DELAY};
use crate::device::transport::LinkTransport;
use crate::device::types::{ControlChannel, PeripheralRef};
use crate::error::DeviceError;

/// [`LinkTransport`] backed by the host's bluetooth adapters (btleplug).
pub struct BtleTransport {
    manager: Manager,
    adapters: Option<Vec<Adapter>>,
    peripheral: Option<Peripheral>,
}

impl BtleTransport {
    pub async fn new() -> Result<Self, DeviceError> {
        let manager = Manager::new().await?;
        Ok(BtleTransport { manager, adapters: None, peripheral: None })
    }

    async fn adapters(&mut self) -> Result<Vec<Adapter>, DeviceError> {
        if let Some(adapters) = &self.adapters {
            return Ok(adapters.clone());
        }

        let adapters = self.manager.adapters().await?;
        if adapters.is_empty() {
            return Err(DeviceError::NoAdapter);
        }

        self.adapters = Some(adapters.clone());
        Ok(adapters)
    }

    fn connected_peripheral(&self) -> Result<&Peripheral, DeviceError> {
        self.peripheral.as_ref().ok_or(DeviceError::NotConnected)
    }

    async fn find_by_id(&mut self, id: &str) -> Result<Peripheral, DeviceError> {
        for adapter in self.adapters().await? {
            let peripherals = match adapter.peripherals().await {
                Ok(v) => v,
                Err(err) => {
                    warn!("Failed to query BLE adapter for peripherals: {}", err);
                    continue;
                },
            };

            if let Some(peripheral) = peripherals.into_iter().find(|p| peripheral_id(p) == id) {
                return Ok(peripheral);
            }
        }

        Err(DeviceError::UnknownPeripheral { id: id.to_string() })
    }

    fn find_characteristic(&self, channel: &ControlChannel) -> Result<Characteristic, DeviceError> {
        let peripheral = self.connected_peripheral()?;

        let service = peripheral.services()
            .into_iter()
            .find(|service| identifiers_match(&service.uuid.to_string(), &channel.service))
            .ok_or(DeviceError::MissingService)?;

        service.characteristics
            .into_iter()
            .find(|characteristic| identifiers_match(&characteristic.uuid.to_string(), &channel.characteristic))
            .ok_or(DeviceError::MissingCharacteristic)
    }
}

fn peripheral_id(peripheral: &Peripheral) -> String {
    format!("{:?}", peripheral.id())
}

// btleplug reports a dropped link as NotConnected on the next operation
fn link_error(err: btleplug::Error) -> DeviceError {
    match err {
        btleplug::Error::NotConnected => DeviceError::LinkLost,
        source => DeviceError::Btle { source },
    }
}

async fn describe(peripheral: &Peripheral) -> Option<PeripheralRef> {
    match peripheral.properties().await {
        Err(err) => {
            warn!("Could not query peripheral for properties: {:?}", err);
            None
        },
        Ok(None) => {
            warn!("Peripheral has no properties");
            None
        },
        Ok(Some(properties)) => Some(PeripheralRef {
            id: peripheral_id(peripheral),
            name: properties.local_name.unwrap_or_default(),
            address: properties.address.to_string(),
        }),
    }
}

struct Discovery {
    adapters: Vec<Adapter>,
    seen: HashSet<String>,
    pending: VecDeque<PeripheralRef>,
}

impl Discovery {
    async fn poll(&mut self) {
        for adapter in &self.adapters {
            let peripherals = match adapter.peripherals().await {
                Ok(v) => v,
                Err(err) => {
                    warn!("Failed to query BLE adapter for peripherals: {}", err);
                    continue;
                },
            };

            for peripheral in peripherals {
                let Some(found) = describe(&peripheral).await else { continue };

                // names often arrive in a later advertisement; keep re-checking unnamed peripherals
                if found.name.is_empty() || self.seen.contains(&found.id) {
                    continue;
                }

                debug!("Discovered peripheral {} {}", found.address, found.name);
                self.seen.insert(found.id.clone());
                self.pending.push_back(found);
            }
        }
    }
}

#[async_trait]
impl LinkTransport for BtleTransport {
    async fn discover(&mut self) -> Result<BoxStream<'static, PeripheralRef>, DeviceError> {
        let adapters = self.adapters().await?;

        for adapter in &adapters {
            info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
            adapter.start_scan(ScanFilter::default()).await?;
        }

        let discovery = Discovery { adapters, seen: HashSet::new(), pending: VecDeque::new() };

        let peripherals = stream::unfold(discovery, |mut discovery| async move {
            loop {
                if let Some(found) = discovery.pending.pop_front() {
                    return Some((found, discovery));
                }

                discovery.poll().await;

                if discovery.pending.is_empty() {
                    sleep(Duration::from_millis(POLL_DELAY)).await;
                }
            }
        });

        Ok(peripherals.boxed())
    }

    async fn stop_discovery(&mut self) -> Result<(), DeviceError> {
        for adapter in self.adapters().await? {
            if let Err(err) = adapter.stop_scan().await {
                warn!("Failed to stop scanning: {}", err);
            }
        }
        Ok(())
    }

    async fn connect(&mut self, peripheral: &PeripheralRef) -> Result<(), DeviceError> {
        let found = self.find_by_id(&peripheral.id).await?;

        info!("Connecting to peripheral {}...", peripheral);
        found.connect().await?;

        self.peripheral = Some(found);
        Ok(())
    }

    async fn services(&mut self) -> Result<Vec<String>, DeviceError> {
        let peripheral = self.connected_peripheral()?;

        info!("Connected; Discovering services...");
        peripheral.discover_services().await.map_err(link_error)?;

        Ok(peripheral.services().iter().map(|service| service.uuid.to_string()).collect())
    }

    async fn characteristics(&mut self, service: &str) -> Result<Vec<String>, DeviceError> {
        let peripheral = self.connected_peripheral()?;

        peripheral.services()
            .into_iter()
            .find(|candidate| identifiers_match(&candidate.uuid.to_string(), service))
            .map(|found| found.characteristics.iter().map(|c| c.uuid.to_string()).collect())
            .ok_or(DeviceError::MissingService)
    }

    async fn write(&mut self, channel: &ControlChannel, data: &[u8]) -> Result<(), DeviceError> {
        let characteristic = self.find_characteristic(channel)?;
        let peripheral = self.connected_peripheral()?;

        peripheral.write(&characteristic, data, WriteType::WithResponse).await.map_err(link_error)
    }

    async fn is_connected(&mut self) -> Result<bool, DeviceError> {
        match &self.peripheral {
            None => Ok(false),
            Some(peripheral) => Ok(peripheral.is_connected().await?),
        }
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        if let Some(peripheral) = self.peripheral.take() {
            info!("Disconnecting from peripheral...");
            peripheral.disconnect().await?;
        }
        Ok(())
    }
}
