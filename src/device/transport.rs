use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::device::types::{ControlChannel, PeripheralRef};
use crate::error::DeviceError;

/// A point-to-point wireless link to a single peripheral.
///
/// A transport holds at most one open connection. It is owned exclusively by one
/// [`DeviceSession`](crate::device::session::DeviceSession), which is the only caller and
/// decides when each primitive may be used.
#[async_trait]
pub trait LinkTransport: Send + 'static {
    /// Starts discovery. The returned stream yields peripherals as they are found; dropping it
    /// stops consuming discovery results, `stop_discovery` stops the radio side.
    async fn discover(&mut self) -> Result<BoxStream<'static, PeripheralRef>, DeviceError>;

    async fn stop_discovery(&mut self) -> Result<(), DeviceError>;

    async fn connect(&mut self, peripheral: &PeripheralRef) -> Result<(), DeviceError>;

    /// Identifiers of the services exposed by the connected peripheral.
    async fn services(&mut self) -> Result<Vec<String>, DeviceError>;

    /// Identifiers of the characteristics of one service of the connected peripheral.
    async fn characteristics(&mut self, service: &str) -> Result<Vec<String>, DeviceError>;

    /// Writes `data` and resolves once the transport acknowledged the write.
    async fn write(&mut self, channel: &ControlChannel, data: &[u8]) -> Result<(), DeviceError>;

    async fn is_connected(&mut self) -> Result<bool, DeviceError>;

    async fn disconnect(&mut self) -> Result<(), DeviceError>;
}
