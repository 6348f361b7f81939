/**
 * Advertised name (substring) of the robot arm's controller board.
 */
pub const DEVICE_NAME: &str = "ESP32-RobotArm";

/**
 * The UUID of the Bluetooth BLE service exposed by the robot arm.
 */
pub const ROBOT_ARM_SERVICE: &str = "12345678-1234-1234-1234-123456789abc";

/**
 * The UUID of the Bluetooth BLE remote GATT characteristic to write motor commands to.
 */
pub const ROBOT_ARM_COMMAND_CHARACTERISTIC: &str = "87654321-4321-4321-4321-cba987654321";

/**
 * How long (milliseconds) a scan may take before it resolves to "not found".
 */
pub const SCAN_TIMEOUT: u64 = 10_000;

/**
 * How often (milliseconds) to poll the adapters for newly discovered peripherals.
 */
pub const POLL_DELAY: u64 = 100;

/**
 * How long (milliseconds) a write to a characteristic may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) checking if the peripheral is still connected may take
 */
pub const IS_CONNECTED_DEADLINE: u64 = 2000;

/**
 * Number of motors on the arm; motors are addressed 0..MOTOR_COUNT.
 */
pub const MOTOR_COUNT: u8 = 3;

/// Reduces a service/characteristic identifier to its lowercase alphanumeric characters, so that
/// `12345678-1234-...` and `{12345678 1234 ...}` compare equal.
pub fn normalize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

pub fn identifiers_match(a: &str, b: &str) -> bool {
    normalize_identifier(a) == normalize_identifier(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_ignore_case_and_punctuation() {
        assert!(identifiers_match(ROBOT_ARM_SERVICE, "12345678123412341234123456789ABC"));
        assert!(identifiers_match("{87654321-4321-4321-4321-CBA987654321}", ROBOT_ARM_COMMAND_CHARACTERISTIC));
        assert!(!identifiers_match(ROBOT_ARM_SERVICE, ROBOT_ARM_COMMAND_CHARACTERISTIC));
    }
}
