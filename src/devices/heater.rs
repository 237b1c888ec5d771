// MIT License - Copyright (c) 2026 Peter Wright
// Heater and filter status carried by the status update frame

use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Heater/filter flags gathered from the status frame.
    ///
    /// The controller spreads these over three bytes (10, 18 and 26); they
    /// are folded into one set here so callers never deal with offsets.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusFlags: u16 {
        /// Byte 10 bit 2 - high temperature range selected
        const RANGE_HIGH          = 1 << 0;
        /// Byte 10 bit 4 - heater running
        const HEATING             = 1 << 1;
        /// Byte 10 bit 5 - heater waiting for flow
        const HEAT_WAITING        = 1 << 2;
        /// Byte 18 bit 4 - setpoint change accepted but not yet shown
        const TEMP_CHANGE_PENDING = 1 << 3;
        /// Byte 26 bit 2 - filter cycle 1 running
        const FILTER_1            = 1 << 4;
        /// Byte 26 bit 3 - filter cycle 2 running
        const FILTER_2            = 1 << 5;
    }
}

/// (status byte offset, bit mask, flag)
const STATUS_FLAG_BITS: [(usize, u8, StatusFlags); 6] = [
    (0, 0x04, StatusFlags::RANGE_HIGH),
    (0, 0x10, StatusFlags::HEATING),
    (0, 0x20, StatusFlags::HEAT_WAITING),
    (1, 0x10, StatusFlags::TEMP_CHANGE_PENDING),
    (2, 0x04, StatusFlags::FILTER_1),
    (2, 0x08, StatusFlags::FILTER_2),
];

impl StatusFlags {
    /// Parse the flag set from status bytes 10, 18 and 26.
    pub fn from_status_bytes(flags: u8, heat_mode: u8, filter: u8) -> Self {
        let bytes = [flags, heat_mode, filter];
        let mut out = Self::empty();
        for (idx, mask, flag) in &STATUS_FLAG_BITS {
            if bytes[*idx] & mask != 0 {
                out |= *flag;
            }
        }
        out
    }

    pub fn is_heating(&self) -> bool {
        self.intersects(Self::HEATING | Self::HEAT_WAITING)
    }

    pub fn is_filter_mode(&self) -> bool {
        self.intersects(Self::FILTER_1 | Self::FILTER_2)
    }

    pub fn range(&self) -> TemperatureRange {
        if self.contains(Self::RANGE_HIGH) {
            TemperatureRange::High
        } else {
            TemperatureRange::Low
        }
    }
}

/// Which of the two stored setpoints is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemperatureRange {
    Low,
    High,
}

impl fmt::Display for TemperatureRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Heating mode, from bits 0-1 of status byte 18.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeatMode {
    Ready,
    Rest,
    ReadyInRest,
}

impl HeatMode {
    pub fn from_bits(byte: u8) -> Self {
        match byte & 0x03 {
            0 => Self::Ready,
            1 => Self::Rest,
            _ => Self::ReadyInRest,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::Rest => "Rest",
            Self::ReadyInRest => "Ready in Rest",
        }
    }
}

impl fmt::Display for HeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}
