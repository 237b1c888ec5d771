// MIT License - Copyright (c) 2026 Peter Wright
// Frames, message types and outbound requests

use std::fmt;

use crate::constants::*;
use crate::crypto::checksum;
use crate::devices::fault::FaultEntry;
use crate::devices::heater::{HeatMode, StatusFlags};
use crate::devices::light::LightMode;
use crate::error::FrameError;

/// One complete frame as it appears on the wire:
///
/// ```text
/// [0x7E][length][type0 type1 type2][payload...][checksum][0x7E]
/// ```
///
/// `length` counts every byte between the two sentinels, so the whole frame
/// is `length + 2` bytes long. A `Frame` always satisfies that invariant and
/// always carries both sentinels; the checksum is only guaranteed valid for
/// frames produced by [`Frame::new`] or [`Frame::from_bytes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Build a frame around a payload and compute its checksum.
    ///
    /// Payloads are at most a few dozen bytes in this protocol; anything
    /// longer than 250 bytes cannot be expressed in the length byte.
    pub fn new(kind: [u8; 3], payload: &[u8]) -> Self {
        debug_assert!(payload.len() <= 250, "payload does not fit in length byte");
        let length = (payload.len() + MIN_LENGTH as usize) as u8;
        let mut bytes = Vec::with_capacity(payload.len() + 7);
        bytes.push(SENTINEL);
        bytes.push(length);
        bytes.extend_from_slice(&kind);
        bytes.extend_from_slice(payload);
        bytes.push(0);
        bytes.push(SENTINEL);
        let mut frame = Self { bytes };
        frame.refresh_checksum();
        frame
    }

    /// Validate a complete frame: sentinels, length and checksum.
    pub fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < MIN_LENGTH as usize + 2 {
            return Err(FrameError::TooShort { kind: "frame", len: data.len() });
        }
        if data[0] != SENTINEL {
            return Err(FrameError::BadSentinel { skipped: 0 });
        }
        let length = data[1];
        if length < MIN_LENGTH {
            return Err(FrameError::LengthTooSmall { length });
        }
        if data.len() != length as usize + 2 || data[data.len() - 1] != SENTINEL {
            return Err(FrameError::Malformed { length });
        }
        let frame = Self { bytes: data.to_vec() };
        let expected = frame.computed_checksum();
        let actual = frame.checksum();
        if expected != actual {
            return Err(FrameError::BadChecksum { expected, actual });
        }
        Ok(frame)
    }

    /// The length byte.
    pub fn length(&self) -> u8 {
        self.bytes[1]
    }

    /// The 3-byte type signature.
    pub fn kind(&self) -> [u8; 3] {
        [
            self.bytes[TYPE_OFFSET],
            self.bytes[TYPE_OFFSET + 1],
            self.bytes[TYPE_OFFSET + 2],
        ]
    }

    pub fn message_type(&self) -> MessageType {
        MessageType::from_bytes(self.kind())
    }

    /// Payload bytes (after the type, before the checksum).
    pub fn payload(&self) -> &[u8] {
        &self.bytes[PAYLOAD_OFFSET..self.checksum_index()]
    }

    pub fn checksum(&self) -> u8 {
        self.bytes[self.checksum_index()]
    }

    /// Checksum recomputed over the current contents.
    pub fn computed_checksum(&self) -> u8 {
        checksum(&self.bytes[1..self.checksum_index()])
    }

    pub fn is_checksum_valid(&self) -> bool {
        self.computed_checksum() == self.checksum()
    }

    /// Absolute byte access (index 0 is the leading sentinel).
    pub fn byte(&self, index: usize) -> Option<u8> {
        self.bytes.get(index).copied()
    }

    /// Total number of bytes on the wire.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub(crate) fn checksum_index(&self) -> usize {
        self.bytes.len() - 2
    }

    pub(crate) fn refresh_checksum(&mut self) {
        let idx = self.checksum_index();
        self.bytes[idx] = self.computed_checksum();
    }

    /// Mutable view of the bytes between the key slot and the checksum.
    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Insert a byte at the start of the payload, keeping the length byte
    /// in step. The checksum is left stale.
    pub(crate) fn insert_payload_byte(&mut self, value: u8) {
        self.bytes.insert(PAYLOAD_OFFSET, value);
        self.bytes[1] = self.bytes[1].wrapping_add(1);
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.bytes.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

/// Known message types, keyed by their 3-byte signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    StatusUpdate,
    LightStatus,
    ButtonCommand,
    FaultLog,
    ControlTypes,
    Configuration,
    Information,
    ModuleIdentification,
    FilterCycles,
    Preferences,
    ConfigRequest,
    PanelRequest,
    /// Seen on the bus, deliberately ignored.
    Ignored([u8; 3]),
    Unknown([u8; 3]),
}

impl MessageType {
    pub fn from_bytes(kind: [u8; 3]) -> Self {
        match kind {
            STATUS_UPDATE => Self::StatusUpdate,
            LIGHT_STATUS => Self::LightStatus,
            BUTTON_COMMAND => Self::ButtonCommand,
            FAULT_LOG => Self::FaultLog,
            CONTROL_TYPES => Self::ControlTypes,
            CONFIGURATION => Self::Configuration,
            INFORMATION => Self::Information,
            MODULE_IDENTIFICATION => Self::ModuleIdentification,
            FILTER_CYCLES => Self::FilterCycles,
            PREFERENCES => Self::Preferences,
            CONFIG_REQUEST => Self::ConfigRequest,
            PANEL_REQUEST => Self::PanelRequest,
            other if IGNORED_TYPES.contains(&other) => Self::Ignored(other),
            other => Self::Unknown(other),
        }
    }
}

/// Decoded status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// `None` while the controller reports 255 (not measured yet).
    pub current_temperature: Option<u8>,
    /// Setpoint of the active range.
    pub target_temperature: u8,
    pub flags: StatusFlags,
    pub heat_mode: HeatMode,
    /// Raw speeds of pumps 2 and 3 (pump 1 is not reported).
    pub pump_speeds: [(u8, u8); 2],
    /// Bytes 8, 10, 15 and 21 for change detection.
    pub monitored: [u8; 4],
}

/// Decoded light status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightStatus {
    pub brightness: u8,
    pub mode: LightMode,
    pub rgb: [u8; 3],
    pub cycle_time: u8,
    /// Mode and cycle-time bytes for change detection.
    pub monitored: [u8; 2],
}

/// Panel information: software id and motherboard model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelInformation {
    pub software_id: String,
    pub model: String,
}

/// Configuration response, logged only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationInfo {
    pub motherboard_id: String,
}

/// One filter cycle of the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterCycle {
    pub enabled: bool,
    pub start_hour: u8,
    pub start_minute: u8,
    pub duration_hours: u8,
    pub duration_minutes: u8,
}

impl fmt::Display for FilterCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.enabled {
            return write!(f, "disabled");
        }
        write!(
            f,
            "{:02}:{:02} for {}h{:02}m",
            self.start_hour, self.start_minute, self.duration_hours, self.duration_minutes
        )
    }
}

/// Two-cycle filter schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSchedule {
    pub cycles: [FilterCycle; 2],
}

/// User preferences stored on the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preferences {
    pub celsius: bool,
    pub clock_24h: bool,
}

/// A decoded frame. Every known type has a variant; anything else lands in
/// [`Message::Unrecognized`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Status(StatusUpdate),
    Light(LightStatus),
    Fault(FaultEntry),
    ControlTypes,
    Configuration(ConfigurationInfo),
    Information(PanelInformation),
    ModuleIdentification(Vec<u8>),
    FilterCycles(FilterSchedule),
    Preferences(Preferences),
    /// Known and deliberately not acted upon.
    Ignored([u8; 3]),
    Unrecognized { kind: [u8; 3], raw: Vec<u8> },
}

const STATUS_MIN_FRAME: usize = STATUS_FILTER + 3;
const LIGHT_MIN_FRAME: usize = LIGHT_CYCLE_TIME + 3;
const FAULT_MIN_FRAME: usize = FAULT_MINUTE + 3;
const INFO_MIN_FRAME: usize = 17 + 2;
const FILTER_MIN_FRAME: usize = 12 + 3;
const PREFS_MIN_FRAME: usize = 8 + 3;

fn require(frame: &Frame, min: usize, kind: &'static str) -> Result<(), FrameError> {
    if frame.len() < min {
        return Err(FrameError::TooShort { kind, len: frame.len() });
    }
    Ok(())
}

fn ascii_field(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { ' ' })
        .collect::<String>()
        .trim()
        .to_string()
}

impl Message {
    /// Decode a (decrypted) frame by its type signature.
    pub fn decode(frame: &Frame) -> Result<Message, FrameError> {
        // Offsets below are absolute; `require` guarantees they are in range.
        let b = frame.as_bytes();
        match frame.message_type() {
            MessageType::StatusUpdate => {
                require(frame, STATUS_MIN_FRAME, "status update")?;
                let raw_temp = b[STATUS_CURRENT_TEMP];
                let current_temperature = (raw_temp != UNKNOWN_TEMPERATURE).then_some(raw_temp);
                Ok(Message::Status(StatusUpdate {
                    current_temperature,
                    target_temperature: b[STATUS_TARGET_TEMP],
                    flags: StatusFlags::from_status_bytes(
                        b[STATUS_FLAGS],
                        b[STATUS_HEAT_MODE],
                        b[STATUS_FILTER],
                    ),
                    heat_mode: HeatMode::from_bits(b[STATUS_HEAT_MODE]),
                    pump_speeds: [
                        (2, b[STATUS_FLAGS] & 0x03),
                        (3, (b[STATUS_PUMP3] >> 2) & 0x03),
                    ],
                    monitored: STATUS_MONITORED.map(|i| b[i]),
                }))
            }
            MessageType::LightStatus => {
                require(frame, LIGHT_MIN_FRAME, "light status")?;
                Ok(Message::Light(LightStatus {
                    brightness: b[LIGHT_BRIGHTNESS],
                    mode: LightMode::from_byte(b[LIGHT_MODE]),
                    rgb: [b[LIGHT_RGB], b[LIGHT_RGB + 1], b[LIGHT_RGB + 2]],
                    cycle_time: b[LIGHT_CYCLE_TIME],
                    monitored: LIGHT_MONITORED.map(|i| b[i]),
                }))
            }
            MessageType::FaultLog => {
                require(frame, FAULT_MIN_FRAME, "fault log")?;
                Ok(Message::Fault(FaultEntry {
                    entry_count: b[FAULT_ENTRY_COUNT],
                    entry_number: b[FAULT_ENTRY_NUMBER],
                    code: b[FAULT_CODE],
                    days_ago: b[FAULT_DAYS_AGO],
                    hour: b[FAULT_HOUR],
                    minute: b[FAULT_MINUTE],
                    raw: frame.payload().to_vec(),
                }))
            }
            MessageType::ControlTypes => Ok(Message::ControlTypes),
            MessageType::Configuration => Ok(Message::Configuration(ConfigurationInfo {
                motherboard_id: ascii_field(frame.payload()),
            })),
            MessageType::Information => {
                require(frame, INFO_MIN_FRAME, "information")?;
                Ok(Message::Information(PanelInformation {
                    software_id: format!("M{}_{} V{}.{}", b[5], b[6], b[7], b[8]),
                    model: ascii_field(&b[9..17]),
                }))
            }
            MessageType::ModuleIdentification => {
                Ok(Message::ModuleIdentification(frame.payload().to_vec()))
            }
            MessageType::FilterCycles => {
                require(frame, FILTER_MIN_FRAME, "filter cycles")?;
                Ok(Message::FilterCycles(FilterSchedule {
                    cycles: [
                        FilterCycle {
                            enabled: true,
                            start_hour: b[5],
                            start_minute: b[6],
                            duration_hours: b[7],
                            duration_minutes: b[8],
                        },
                        FilterCycle {
                            enabled: b[9] & 0x80 != 0,
                            start_hour: b[9] & 0x7F,
                            start_minute: b[10],
                            duration_hours: b[11],
                            duration_minutes: b[12],
                        },
                    ],
                }))
            }
            MessageType::Preferences => {
                require(frame, PREFS_MIN_FRAME, "preferences")?;
                Ok(Message::Preferences(Preferences {
                    celsius: b[7] == 0x01,
                    clock_24h: b[8] == 0x01,
                }))
            }
            // Our own outbound types echoed back by other clients on the bus.
            MessageType::ButtonCommand | MessageType::ConfigRequest | MessageType::PanelRequest => {
                Ok(Message::Ignored(frame.kind()))
            }
            MessageType::Ignored(kind) => Ok(Message::Ignored(kind)),
            MessageType::Unknown(kind) => Ok(Message::Unrecognized {
                kind,
                raw: frame.as_bytes().to_vec(),
            }),
        }
    }
}

/// A physical panel button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    TemperatureUp,
    TemperatureDown,
    /// Pump slot 1..=3
    Pump(u8),
    /// Light slot 1..=2
    Light(u8),
}

impl Button {
    pub fn code(&self) -> u8 {
        match self {
            Self::TemperatureUp => 0x01,
            Self::TemperatureDown => 0x02,
            Self::Pump(n) => 0x03 + n,
            Self::Light(n) => 0x10 + n,
        }
    }
}

/// Outbound requests. All are plain templates; button presses are
/// enciphered by [`crate::crypto::encrypt`] before they hit the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Request {
    /// Control types (which pumps and lights are fitted)
    ControlTypes,
    FilterCycles,
    Information,
    ModuleIdentification,
    Preferences,
    Configuration,
    /// Most recent fault log entry
    FaultLog,
    Press(Button),
}

impl Request {
    /// The panel requests sent during discovery, in order.
    pub const PANEL_QUERIES: [Request; 4] = [
        Request::Information,
        Request::FilterCycles,
        Request::Preferences,
        Request::ModuleIdentification,
    ];

    pub fn to_frame(&self) -> Frame {
        match self {
            Self::ControlTypes => Frame::new(PANEL_REQUEST, &[0x00, 0x00, 0x01]),
            Self::FilterCycles => Frame::new(PANEL_REQUEST, &[0x01, 0x00, 0x00]),
            Self::Information => Frame::new(PANEL_REQUEST, &[0x02, 0x00, 0x00]),
            Self::ModuleIdentification => Frame::new(PANEL_REQUEST, &[0x04, 0x00, 0x00]),
            Self::Preferences => Frame::new(PANEL_REQUEST, &[0x08, 0x00, 0x00]),
            Self::FaultLog => Frame::new(PANEL_REQUEST, &[0x20, 0xFF, 0x00]),
            Self::Configuration => Frame::new(CONFIG_REQUEST, &[]),
            Self::Press(button) => Frame::new(BUTTON_COMMAND, &[button.code(), 0x00]),
        }
    }
}
