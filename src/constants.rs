// MIT License - Copyright (c) 2026 Peter Wright
// Wire constants for encrypted-panel spa controllers

/// Frame delimiter, present at both ends of every frame.
pub const SENTINEL: u8 = 0x7E;

/// Smallest legal length byte: length + 3 type bytes + checksum.
pub const MIN_LENGTH: u8 = 5;

/// Offset of the first type byte (after sentinel and length).
pub const TYPE_OFFSET: usize = 2;
/// Offset of the first payload byte.
pub const PAYLOAD_OFFSET: usize = 5;
/// Offset of the embedded cipher key byte in enciphered frames.
pub const KEY_OFFSET: usize = 5;

/// Default controller TCP port.
pub const DEFAULT_PORT: u16 = 4257;

/// Temperature byte value meaning "not measured yet".
pub const UNKNOWN_TEMPERATURE: u8 = 255;

// Message type signatures (3 bytes each).

/// Encrypted status update, roughly once per second.
pub const STATUS_UPDATE: [u8; 3] = [0xFF, 0xAF, 0xC4];
/// Encrypted light status.
pub const LIGHT_STATUS: [u8; 3] = [0xFF, 0xAF, 0xCA];
/// Encrypted button press (outbound).
pub const BUTTON_COMMAND: [u8; 3] = [0x0A, 0xBF, 0x17];
/// Fault log entry response.
pub const FAULT_LOG: [u8; 3] = [0x0A, 0xBF, 0x28];
/// Control types (pumps/lights fitted) response.
pub const CONTROL_TYPES: [u8; 3] = [0x0A, 0xBF, 0x2E];
/// Configuration response.
pub const CONFIGURATION: [u8; 3] = [0x0A, 0xBF, 0x94];
/// Panel information (software id, model) response.
pub const INFORMATION: [u8; 3] = [0x0A, 0xBF, 0x24];
/// Module identification response.
pub const MODULE_IDENTIFICATION: [u8; 3] = [0x0A, 0xBF, 0x25];
/// Filter cycle schedule response.
pub const FILTER_CYCLES: [u8; 3] = [0x0A, 0xBF, 0x23];
/// Preferences response.
pub const PREFERENCES: [u8; 3] = [0x0A, 0xBF, 0x26];

/// Configuration request (no payload).
pub const CONFIG_REQUEST: [u8; 3] = [0x0A, 0xBF, 0x04];
/// Settings/panel request; the payload selects what is asked for.
pub const PANEL_REQUEST: [u8; 3] = [0x0A, 0xBF, 0x22];

/// Frames seen on the bus that carry nothing we act on.
pub const IGNORED_TYPES: [[u8; 3]; 3] = [
    [0xFE, 0xBF, 0x00], // clear to send
    [0xFF, 0xAF, 0x13], // plain status from unencrypted panels
    [0x10, 0xBF, 0x06], // ready
];

/// Enciphered message types and their first-key constants.
pub const CIPHER_KEYS: [([u8; 3], u8); 3] = [
    (STATUS_UPDATE, 0x19),
    (LIGHT_STATUS, 0x59),
    (BUTTON_COMMAND, 0xDF),
];

// Status frame offsets (absolute, sentinel at 0).

pub const STATUS_PUMP3: usize = 8;
pub const STATUS_FLAGS: usize = 10;
pub const STATUS_CURRENT_TEMP: usize = 15;
pub const STATUS_HEAT_MODE: usize = 18;
pub const STATUS_TARGET_TEMP: usize = 21;
pub const STATUS_FILTER: usize = 26;
/// Bytes whose change makes a status frame worth reporting.
pub const STATUS_MONITORED: [usize; 4] = [STATUS_PUMP3, STATUS_FLAGS, STATUS_CURRENT_TEMP, STATUS_TARGET_TEMP];

// Light status offsets.

pub const LIGHT_BRIGHTNESS: usize = 6;
pub const LIGHT_MODE: usize = 7;
pub const LIGHT_RGB: usize = 8;
pub const LIGHT_CYCLE_TIME: usize = 11;
pub const LIGHT_MONITORED: [usize; 2] = [LIGHT_MODE, LIGHT_CYCLE_TIME];

// Fault log offsets.

pub const FAULT_ENTRY_COUNT: usize = 5;
pub const FAULT_ENTRY_NUMBER: usize = 6;
pub const FAULT_CODE: usize = 7;
pub const FAULT_DAYS_AGO: usize = 8;
pub const FAULT_HOUR: usize = 9;
pub const FAULT_MINUTE: usize = 10;

/// Number of pump slots the controller reports (1-indexed on the API).
pub const PUMP_SLOTS: usize = 3;
/// Number of light slots (1-indexed on the API).
pub const LIGHT_SLOTS: usize = 2;

/// Fault codes reported by the controller and their descriptions.
pub const FAULT_DESCRIPTIONS: [(u8, &str); 19] = [
    (15, "Sensors are out of sync"),
    (16, "The water flow is low"),
    (17, "The water flow has failed"),
    (18, "The settings have been reset"),
    (19, "Priming mode"),
    (20, "The clock has failed"),
    (21, "The settings have been reset"),
    (22, "Program memory failure"),
    (26, "Sensors are out of sync -- call for service"),
    (27, "The heater is dry"),
    (28, "The heater may be dry"),
    (29, "The water is too hot"),
    (30, "The heater is too hot"),
    (31, "Sensor A fault"),
    (32, "Sensor B fault"),
    (34, "A pump may be stuck on"),
    (35, "Hot fault"),
    (36, "The GFCI test failed"),
    (37, "Standby mode (hold mode)"),
];

/// Look up the description of a fault code.
pub fn fault_description(code: u8) -> Option<&'static str> {
    FAULT_DESCRIPTIONS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, desc)| *desc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_description_known() {
        assert_eq!(fault_description(16), Some("The water flow is low"));
        assert_eq!(fault_description(30), Some("The heater is too hot"));
    }

    #[test]
    fn test_fault_description_unknown() {
        assert_eq!(fault_description(0), None);
        assert_eq!(fault_description(33), None);
    }

    #[test]
    fn test_cipher_keys_cover_encrypted_types() {
        let types: Vec<[u8; 3]> = CIPHER_KEYS.iter().map(|(t, _)| *t).collect();
        assert!(types.contains(&STATUS_UPDATE));
        assert!(types.contains(&LIGHT_STATUS));
        assert!(types.contains(&BUTTON_COMMAND));
        assert!(!types.contains(&FAULT_LOG));
    }
}
