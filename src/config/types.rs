use std::net::SocketAddr;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::constants::{DEVICE_NAME, IS_CONNECTED_DEADLINE, ROBOT_ARM_COMMAND_CHARACTERISTIC, ROBOT_ARM_SERVICE, SCAN_TIMEOUT, WRITE_DEADLINE};
use crate::device::session::LinkSettings;
use crate::error::ConfigError;
use crate::gateway::client::ReconnectPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceConfig {
    pub name_filter: String,
    pub service: String,
    pub characteristic: String,
    pub scan_timeout_ms: u64,
    pub write_deadline_ms: u64,
    pub link_check_deadline_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            name_filter: DEVICE_NAME.to_string(),
            service: ROBOT_ARM_SERVICE.to_string(),
            characteristic: ROBOT_ARM_COMMAND_CHARACTERISTIC.to_string(),
            scan_timeout_ms: SCAN_TIMEOUT,
            write_deadline_ms: WRITE_DEADLINE,
            link_check_deadline_ms: IS_CONNECTED_DEADLINE,
        }
    }
}

impl DeviceConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            name_filter: self.name_filter.clone(),
            service: self.service.clone(),
            characteristic: self.characteristic.clone(),
            write_deadline: Duration::from_millis(self.write_deadline_ms),
            link_check_deadline: Duration::from_millis(self.link_check_deadline_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub listen: SocketAddr,
    pub link_check_interval_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            link_check_interval_ms: 5000,
        }
    }
}

impl GatewayConfig {
    pub fn link_check_interval(&self) -> Duration {
        Duration::from_millis(self.link_check_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    pub url: String,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        ClientConfig {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            reconnect_delay_ms: policy.delay.as_millis() as u64,
            max_reconnect_attempts: policy.max_attempts,
        }
    }
}

impl ClientConfig {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            delay: Duration::from_millis(self.reconnect_delay_ms),
            max_attempts: self.max_reconnect_attempts,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub device: DeviceConfig,
    pub gateway: GatewayConfig,
    pub client: ClientConfig,
}

impl Config {
    /// Rejects service/characteristic ids that are not UUIDs; a typo there would otherwise only
    /// show up as a MissingService after a full scan and connect. Zero periods are rejected too.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let identifiers = [
            ("device.service", &self.device.service),
            ("device.characteristic", &self.device.characteristic),
        ];

        for (field, value) in identifiers {
            if let Err(source) = Uuid::parse_str(value) {
                return Err(ConfigError::InvalidIdentifier { field, value: value.clone(), source });
            }
        }

        let periods = [
            ("gateway.linkCheckIntervalMs", self.gateway.link_check_interval_ms),
            ("device.writeDeadlineMs", self.device.write_deadline_ms),
            ("device.linkCheckDeadlineMs", self.device.link_check_deadline_ms),
        ];

        for (field, value) in periods {
            if value == 0 {
                return Err(ConfigError::ZeroPeriod { field });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: Config = serde_json::from_str(r#"{"device": {"nameFilter": "Arm-2"}, "client": {"maxReconnectAttempts": 2}}"#).unwrap();

        assert_eq!(config.device.name_filter, "Arm-2");
        assert_eq!(config.device.service, ROBOT_ARM_SERVICE);
        assert_eq!(config.client.reconnect_policy().max_attempts, 2);
        assert_eq!(config.client.reconnect_policy().delay, Duration::from_millis(3000));
        assert_eq!(config.gateway, GatewayConfig::default());
    }

    #[test]
    fn link_settings_follow_device_section() {
        let mut device = DeviceConfig::default();
        device.write_deadline_ms = 750;

        let settings = device.link_settings();
        assert_eq!(settings.write_deadline, Duration::from_millis(750));
        assert_eq!(settings.characteristic, ROBOT_ARM_COMMAND_CHARACTERISTIC);
        assert_eq!(device.scan_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn validate_rejects_malformed_identifier() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.device.characteristic = "not-a-uuid".to_string();
        match config.validate() {
            Err(ConfigError::InvalidIdentifier { field, .. }) => assert_eq!(field, "device.characteristic"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn validate_rejects_zero_link_check_interval() {
        let config: Config = serde_json::from_str(r#"{"gateway": {"linkCheckIntervalMs": 0}}"#).unwrap();
        match config.validate() {
            Err(ConfigError::ZeroPeriod { field }) => assert_eq!(field, "gateway.linkCheckIntervalMs"),
            other => panic!("unexpected {:?}", other),
        }

        let mut config = Config::default();
        config.device.write_deadline_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroPeriod { field: "device.writeDeadlineMs" })));
    }
}
