// MIT License - Copyright (c) 2026 Peter Wright
// In-memory model of the spa, rebuilt from the controller after every connect

use std::fmt;

use crate::constants::{LIGHT_SLOTS, PUMP_SLOTS};
use crate::devices::fault::{FaultEntry, FlowHealth};
use crate::devices::heater::{HeatMode, StatusFlags, TemperatureRange};
use crate::devices::light::Light;
use crate::devices::pump::{Pump, speed_name};
use crate::protocol::{LightStatus, StatusUpdate};

/// Snapshot of everything known about the spa.
///
/// Only the session task mutates this; hosts get clones through
/// [`crate::SpaClient::state`]. Fields the controller has not reported yet
/// read as `None`, which is distinct from off/zero.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    current_temperature: Option<u8>,
    target_low: Option<u8>,
    target_high: Option<u8>,
    flags: Option<StatusFlags>,
    heat_mode: Option<HeatMode>,
    pumps: [Pump; PUMP_SLOTS],
    lights: [Light; LIGHT_SLOTS],
    flow: FlowHealth,
    last_fault: Option<FaultEntry>,
    configuration_known: bool,
    target_override: Option<u8>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceState {
    pub fn new() -> Self {
        Self {
            current_temperature: None,
            target_low: None,
            target_high: None,
            flags: None,
            heat_mode: None,
            pumps: [Pump::new(1), Pump::new(2), Pump::new(3)],
            lights: [Light::new(1), Light::new(2)],
            flow: FlowHealth::Good,
            last_fault: None,
            configuration_known: false,
            target_override: None,
        }
    }

    // ---- Queries ----

    /// Measured water temperature, `None` while the controller reports 255.
    pub fn current_temperature(&self) -> Option<u8> {
        self.current_temperature
    }

    /// Setpoint as observers should see it: the in-flight target while a
    /// temperature change converges, the device setpoint otherwise.
    pub fn target_temperature(&self) -> Option<u8> {
        self.target_override.or_else(|| self.device_target_temperature())
    }

    /// Setpoint of the active range as last reported by the controller.
    pub fn device_target_temperature(&self) -> Option<u8> {
        match self.range()? {
            TemperatureRange::Low => self.target_low,
            TemperatureRange::High => self.target_high,
        }
    }

    /// Last known setpoint of a particular range.
    pub fn target_for(&self, range: TemperatureRange) -> Option<u8> {
        match range {
            TemperatureRange::Low => self.target_low,
            TemperatureRange::High => self.target_high,
        }
    }

    pub fn range(&self) -> Option<TemperatureRange> {
        self.flags.map(|f| f.range())
    }

    pub fn flags(&self) -> StatusFlags {
        self.flags.unwrap_or_default()
    }

    pub fn is_heating(&self) -> bool {
        self.flags().is_heating()
    }

    pub fn is_filter_mode(&self) -> bool {
        self.flags().is_filter_mode()
    }

    pub fn heat_mode(&self) -> Option<HeatMode> {
        self.heat_mode
    }

    pub fn temperature_change_pending(&self) -> bool {
        self.flags().contains(StatusFlags::TEMP_CHANGE_PENDING)
    }

    pub fn flow_health(&self) -> FlowHealth {
        self.flow
    }

    pub fn last_fault(&self) -> Option<&FaultEntry> {
        self.last_fault.as_ref()
    }

    /// Pump by 1-based id.
    pub fn pump(&self, id: u8) -> Option<&Pump> {
        slot(id, PUMP_SLOTS).map(|i| &self.pumps[i])
    }

    pub fn pumps(&self) -> impl Iterator<Item = &Pump> {
        self.pumps.iter()
    }

    pub fn pump_speed(&self, id: u8) -> Option<u8> {
        self.pump(id)?.speed()
    }

    pub fn pump_capability(&self, id: u8) -> Option<u8> {
        self.pump(id)?.capability()
    }

    /// Light by 1-based id.
    pub fn light(&self, id: u8) -> Option<&Light> {
        slot(id, LIGHT_SLOTS).map(|i| &self.lights[i])
    }

    pub fn lights(&self) -> impl Iterator<Item = &Light> {
        self.lights.iter()
    }

    pub fn light_on(&self, id: u8) -> Option<bool> {
        self.light(id)?.is_on()
    }

    /// Whether the control types have been discovered.
    pub fn is_configuration_known(&self) -> bool {
        self.configuration_known
    }

    pub fn has_target_override(&self) -> bool {
        self.target_override.is_some()
    }

    /// One-line human-readable state, for logs and diagnostics.
    pub fn summary(&self) -> String {
        self.to_string()
    }

    /// One line per fitted pump, e.g. `pump 2: high (cap 2)`.
    pub fn pump_summaries(&self) -> Vec<String> {
        self.pumps
            .iter()
            .filter(|p| p.is_present())
            .map(|p| {
                let cap = p.capability().unwrap_or(0);
                match p.speed() {
                    Some(speed) => format!("pump {}: {} (cap {cap})", p.id, speed_name(cap, speed)),
                    None => format!("pump {}: unknown (cap {cap})", p.id),
                }
            })
            .collect()
    }

    /// One line per fitted light.
    pub fn light_summaries(&self) -> Vec<String> {
        self.lights
            .iter()
            .filter(|l| l.is_present())
            .map(|l| match (l.is_on(), l.mode) {
                (Some(on), Some(mode)) => {
                    format!("light {}: {} ({mode})", l.id, if on { "on" } else { "off" })
                }
                (Some(on), None) => format!("light {}: {}", l.id, if on { "on" } else { "off" }),
                _ => format!("light {}: unknown", l.id),
            })
            .collect()
    }

    // ---- Mutators (session task only) ----

    pub(crate) fn apply_status(&mut self, status: &StatusUpdate) {
        self.current_temperature = status.current_temperature;
        self.flags = Some(status.flags);
        self.heat_mode = Some(status.heat_mode);
        match status.flags.range() {
            TemperatureRange::Low => self.target_low = Some(status.target_temperature),
            TemperatureRange::High => self.target_high = Some(status.target_temperature),
        }
        for (id, raw) in status.pump_speeds {
            if let Some(pump) = self.pump_mut(id) {
                pump.set_reported_speed(raw);
            }
        }
    }

    /// The controller reports a single light status; it belongs to light 1.
    pub(crate) fn apply_light(&mut self, status: &LightStatus) {
        let light = &mut self.lights[0];
        light.set_mode(status.mode);
        light.brightness = status.brightness;
        light.rgb = status.rgb;
        light.cycle_time = status.cycle_time;
    }

    /// Returns true when the flow health changed.
    pub(crate) fn apply_fault(&mut self, fault: &FaultEntry) -> bool {
        let flow = fault.flow_health();
        let changed = flow != self.flow;
        self.flow = flow;
        self.last_fault = Some(fault.clone());
        changed
    }

    /// Conservative defaults installed when the control types arrive.
    pub(crate) fn install_default_controls(&mut self) {
        self.pumps[0].set_capability(0);
        self.pumps[1].set_capability(2);
        self.pumps[1].locked_in_filter = true;
        self.pumps[2].set_capability(1);
        self.lights[0].present = Some(true);
        self.lights[1].present = Some(false);
        self.configuration_known = true;
    }

    pub(crate) fn set_target_override(&mut self, target: Option<u8>) {
        self.target_override = target;
    }

    pub(crate) fn pump_mut(&mut self, id: u8) -> Option<&mut Pump> {
        slot(id, PUMP_SLOTS).map(|i| &mut self.pumps[i])
    }

    pub(crate) fn light_mut(&mut self, id: u8) -> Option<&mut Light> {
        slot(id, LIGHT_SLOTS).map(|i| &mut self.lights[i])
    }
}

fn slot(id: u8, slots: usize) -> Option<usize> {
    let idx = (id as usize).checked_sub(1)?;
    (idx < slots).then_some(idx)
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.current_temperature {
            Some(t) => write!(f, "temp {t}")?,
            None => write!(f, "temp unknown")?,
        }
        match self.target_temperature() {
            Some(t) => write!(f, ", target {t}")?,
            None => write!(f, ", target unknown")?,
        }
        if let Some(range) = self.range() {
            write!(f, " ({range} range)")?;
        }
        if let Some(mode) = self.heat_mode {
            write!(f, ", {mode}")?;
        }
        if self.is_heating() {
            write!(f, ", heating")?;
        }
        if self.is_filter_mode() {
            write!(f, ", filtering")?;
        }
        write!(f, ", flow {}", self.flow)?;
        for line in self.pump_summaries().iter().chain(self.light_summaries().iter()) {
            write!(f, ", {line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::light::LightMode;

    fn status(temp: Option<u8>, target: u8, flags: StatusFlags, speeds: [(u8, u8); 2]) -> StatusUpdate {
        StatusUpdate {
            current_temperature: temp,
            target_temperature: target,
            flags,
            heat_mode: HeatMode::Ready,
            pump_speeds: speeds,
            monitored: [0; 4],
        }
    }

    #[test]
    fn test_unknown_until_reported() {
        let state = DeviceState::new();
        assert_eq!(state.current_temperature(), None);
        assert_eq!(state.target_temperature(), None);
        assert_eq!(state.range(), None);
        assert_eq!(state.pump_speed(2), None);
        assert_eq!(state.light_on(1), None);
        assert!(!state.is_configuration_known());
    }

    #[test]
    fn test_status_fills_active_range() {
        let mut state = DeviceState::new();
        state.apply_status(&status(Some(99), 102, StatusFlags::RANGE_HIGH, [(2, 0), (3, 0)]));
        assert_eq!(state.range(), Some(TemperatureRange::High));
        assert_eq!(state.target_temperature(), Some(102));
        assert_eq!(state.target_for(TemperatureRange::Low), None);

        state.apply_status(&status(Some(99), 80, StatusFlags::empty(), [(2, 0), (3, 0)]));
        assert_eq!(state.target_temperature(), Some(80));
        assert_eq!(state.target_for(TemperatureRange::High), Some(102));
    }

    #[test]
    fn test_override_shadows_target() {
        let mut state = DeviceState::new();
        state.apply_status(&status(Some(99), 100, StatusFlags::empty(), [(2, 0), (3, 0)]));
        state.set_target_override(Some(104));
        assert_eq!(state.target_temperature(), Some(104));
        assert_eq!(state.device_target_temperature(), Some(100));
        state.set_target_override(None);
        assert_eq!(state.target_temperature(), Some(100));
    }

    #[test]
    fn test_default_controls() {
        let mut state = DeviceState::new();
        state.install_default_controls();
        assert!(state.is_configuration_known());
        assert_eq!(state.pump_capability(1), Some(0));
        assert_eq!(state.pump_capability(2), Some(2));
        assert_eq!(state.pump_capability(3), Some(1));
        assert!(state.pump(2).unwrap().locked_in_filter);
        assert!(state.light(1).unwrap().is_present());
        assert!(!state.light(2).unwrap().is_present());
    }

    #[test]
    fn test_pump_speed_clamped_after_discovery() {
        let mut state = DeviceState::new();
        state.install_default_controls();
        state.apply_status(&status(None, 100, StatusFlags::empty(), [(2, 2), (3, 3)]));
        assert_eq!(state.pump_speed(2), Some(2));
        assert_eq!(state.pump_speed(3), Some(1));
    }

    #[test]
    fn test_fault_flow_transition() {
        let mut state = DeviceState::new();
        let fault = FaultEntry {
            entry_count: 1,
            entry_number: 0,
            code: 16,
            days_ago: 0,
            hour: 1,
            minute: 2,
            raw: vec![1, 0, 16, 0, 1, 2],
        };
        assert!(state.apply_fault(&fault));
        assert_eq!(state.flow_health(), FlowHealth::Low);
        assert!(!state.apply_fault(&fault));
        assert_eq!(state.last_fault().map(|f| f.code), Some(16));
    }

    #[test]
    fn test_out_of_range_ids() {
        let state = DeviceState::new();
        assert!(state.pump(0).is_none());
        assert!(state.pump(4).is_none());
        assert!(state.light(3).is_none());
    }

    #[test]
    fn test_summary() {
        let mut state = DeviceState::new();
        state.install_default_controls();
        state.apply_status(&status(Some(98), 100, StatusFlags::HEATING, [(2, 1), (3, 0)]));
        state.apply_light(&LightStatus {
            brightness: 100,
            mode: LightMode::Aqua,
            rgb: [0, 0, 0],
            cycle_time: 0,
            monitored: [0x09, 0],
        });
        let text = state.summary();
        assert_eq!(
            text,
            "temp 98, target 100 (low range), Ready, heating, flow good, \
             pump 2: low (cap 2), pump 3: off (cap 1), light 1: on (Aqua)"
        );
    }
}
