// MIT License - Copyright (c) 2026 Peter Wright
// Lights

use std::fmt;

/// Light mode byte from the light status frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightMode {
    Off,
    FastBlend,
    SlowBlend,
    Freeze,
    Blue,
    Violet,
    Red,
    Amber,
    Green,
    Aqua,
    White,
    /// A mode byte outside the known table.
    Unknown(u8),
}

/// Exact-value lookup table for the mode byte.
const LIGHT_MODES: [(u8, LightMode); 11] = [
    (0x00, LightMode::Off),
    (0x01, LightMode::FastBlend),
    (0x02, LightMode::SlowBlend),
    (0x03, LightMode::Freeze),
    (0x04, LightMode::Blue),
    (0x05, LightMode::Violet),
    (0x06, LightMode::Red),
    (0x07, LightMode::Amber),
    (0x08, LightMode::Green),
    (0x09, LightMode::Aqua),
    (0x0A, LightMode::White),
];

impl LightMode {
    pub fn from_byte(byte: u8) -> Self {
        LIGHT_MODES
            .iter()
            .find(|(b, _)| *b == byte)
            .map(|(_, mode)| *mode)
            .unwrap_or(Self::Unknown(byte))
    }

    pub fn is_on(&self) -> bool {
        !matches!(self, Self::Off)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Off => "Off",
            Self::FastBlend => "Fast blend",
            Self::SlowBlend => "Slow blend",
            Self::Freeze => "Freeze",
            Self::Blue => "Blue",
            Self::Violet => "Violet",
            Self::Red => "Red",
            Self::Amber => "Amber",
            Self::Green => "Green",
            Self::Aqua => "Aqua",
            Self::White => "White",
            Self::Unknown(_) => "Unknown",
        }
    }
}

impl fmt::Display for LightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(b) => write!(f, "Unknown ({b:#04x})"),
            other => f.write_str(other.description()),
        }
    }
}

/// A single light slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Light {
    pub id: u8,
    /// `None` until the control types are known.
    pub present: Option<bool>,
    pub mode: Option<LightMode>,
    pub brightness: u8,
    pub rgb: [u8; 3],
    pub cycle_time: u8,
    on: Option<bool>,
    override_on: Option<bool>,
}

impl Light {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            present: None,
            mode: None,
            brightness: 0,
            rgb: [0; 3],
            cycle_time: 0,
            on: None,
            override_on: None,
        }
    }

    pub fn is_present(&self) -> bool {
        self.present == Some(true)
    }

    /// On/off as observers should see it (override first).
    pub fn is_on(&self) -> Option<bool> {
        self.override_on.or(self.on)
    }

    pub fn reported_on(&self) -> Option<bool> {
        self.on
    }

    pub(crate) fn set_mode(&mut self, mode: LightMode) {
        self.mode = Some(mode);
        self.on = Some(mode.is_on());
    }

    pub(crate) fn set_predicted_on(&mut self, on: bool) {
        self.on = Some(on);
    }

    pub(crate) fn set_override(&mut self, on: Option<bool>) {
        self.override_on = on;
    }
}
