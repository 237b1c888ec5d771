// MIT License - Copyright (c) 2026 Peter Wright
// Jet pumps

/// A single pump slot.
///
/// `capability` is `None` until the control types have been discovered;
/// `Some(0)` means the slot is not fitted. Speeds run `0..=capability`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pump {
    pub id: u8,
    capability: Option<u8>,
    speed: Option<u8>,
    override_speed: Option<u8>,
    /// Cannot be cycled through Off while a filter cycle runs.
    pub locked_in_filter: bool,
}

impl Pump {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            capability: None,
            speed: None,
            override_speed: None,
            locked_in_filter: false,
        }
    }

    pub fn capability(&self) -> Option<u8> {
        self.capability
    }

    /// Whether the pump is known to be fitted.
    pub fn is_present(&self) -> bool {
        self.capability.is_some_and(|c| c > 0)
    }

    /// Speed as observers should see it: the override while a press
    /// sequence is in flight, the reported speed otherwise.
    pub fn speed(&self) -> Option<u8> {
        self.override_speed.or(self.speed)
    }

    /// Last speed reported by the controller (or predicted after a press sequence).
    pub fn reported_speed(&self) -> Option<u8> {
        self.speed
    }

    pub(crate) fn set_capability(&mut self, capability: u8) {
        self.capability = Some(capability);
        if let Some(speed) = self.speed {
            self.speed = Some(speed.min(capability));
        }
    }

    /// Record a raw speed from the status frame, clamped to the capability.
    /// Returns true if the stored speed changed.
    pub(crate) fn set_reported_speed(&mut self, raw: u8) -> bool {
        let clamped = match self.capability {
            Some(cap) => raw.min(cap),
            None => raw,
        };
        let changed = self.speed != Some(clamped);
        self.speed = Some(clamped);
        changed
    }

    pub(crate) fn set_override(&mut self, speed: Option<u8>) {
        self.override_speed = speed;
    }

    pub fn has_override(&self) -> bool {
        self.override_speed.is_some()
    }
}

/// Human-readable name of a speed for the given capability.
pub fn speed_name(capability: u8, speed: u8) -> &'static str {
    match (capability, speed) {
        (_, 0) => "off",
        (1, _) => "on",
        (_, 1) => "low",
        _ => "high",
    }
}
