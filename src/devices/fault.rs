// MIT License - Copyright (c) 2026 Peter Wright
// Fault log entries and the flow health derived from them

use std::fmt;

use crate::constants::fault_description;

/// Water flow health, derived from the most recent fault code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlowHealth {
    #[default]
    Good,
    Low,
    Failed,
}

impl FlowHealth {
    pub fn from_fault_code(code: u8) -> Self {
        match code {
            16 | 28 => Self::Low,
            17 | 27 | 30 => Self::Failed,
            _ => Self::Good,
        }
    }
}

impl fmt::Display for FlowHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Good => write!(f, "good"),
            Self::Low => write!(f, "low"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One entry of the controller's fault log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultEntry {
    pub entry_count: u8,
    pub entry_number: u8,
    pub code: u8,
    pub days_ago: u8,
    pub hour: u8,
    pub minute: u8,
    /// Payload bytes as received, used to recognise repeats.
    pub raw: Vec<u8>,
}

impl FaultEntry {
    pub fn flow_health(&self) -> FlowHealth {
        FlowHealth::from_fault_code(self.code)
    }

    pub fn description(&self) -> &'static str {
        fault_description(self.code).unwrap_or("Unknown fault")
    }
}

impl fmt::Display for FaultEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fault {} ({}) {} day(s) ago at {:02}:{:02} [entry {}/{}]",
            self.code,
            self.description(),
            self.days_ago,
            self.hour,
            self.minute,
            self.entry_number + 1,
            self.entry_count
        )
    }
}
