// MIT License - Copyright (c) 2026 Peter Wright
// Applies decoded messages to the device state and decides what is worth reporting

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::devices::fault::FlowHealth;
use crate::protocol::Message;
use crate::state::DeviceState;

/// Default interval after which an unchanged status is reported anyway.
pub const DEFAULT_KEEP_FRESH: Duration = Duration::from_secs(60);

/// What a message did to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Nothing observable.
    None,
    /// Observable state changed (or is due a keep-fresh report).
    State,
    /// Control types were discovered for the first time.
    Configuration,
}

/// Last reported bytes of a periodic frame and when they were reported.
#[derive(Debug, Clone)]
struct Observed<const N: usize> {
    bytes: [u8; N],
    reported_at: Instant,
}

fn observe<const N: usize>(
    slot: &mut Option<Observed<N>>,
    bytes: [u8; N],
    now: Instant,
    keep_fresh: Duration,
) -> bool {
    let changed = match slot {
        Some(prev) => {
            prev.bytes != bytes || now.saturating_duration_since(prev.reported_at) > keep_fresh
        }
        None => true,
    };
    if changed {
        *slot = Some(Observed { bytes, reported_at: now });
    }
    changed
}

/// Message interpreter.
///
/// Keeps the "recently observed" snapshots used for change detection; they
/// are cleared on every (re)connect so the first frames after a connect are
/// always reported.
#[derive(Debug)]
pub struct Interpreter {
    keep_fresh: Duration,
    status: Option<Observed<4>>,
    light: Option<Observed<2>>,
    fault: Option<Vec<u8>>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(DEFAULT_KEEP_FRESH)
    }
}

impl Interpreter {
    pub fn new(keep_fresh: Duration) -> Self {
        Self {
            keep_fresh,
            status: None,
            light: None,
            fault: None,
        }
    }

    pub fn reset_observed(&mut self) {
        self.status = None;
        self.light = None;
        self.fault = None;
    }

    /// Apply one decoded message to the state.
    pub fn interpret(&mut self, state: &mut DeviceState, message: Message, now: Instant) -> Change {
        match message {
            Message::Status(status) => {
                state.apply_status(&status);
                if observe(&mut self.status, status.monitored, now, self.keep_fresh) {
                    debug!("Status: {}", state.summary());
                    Change::State
                } else {
                    Change::None
                }
            }
            Message::Light(light) => {
                state.apply_light(&light);
                if observe(&mut self.light, light.monitored, now, self.keep_fresh) {
                    debug!(
                        "Light: {} brightness {} cycle {}",
                        light.mode, light.brightness, light.cycle_time
                    );
                    Change::State
                } else {
                    Change::None
                }
            }
            Message::Fault(fault) => {
                let first_since_connect = self.fault.is_none();
                if self.fault.as_deref() != Some(fault.raw.as_slice()) {
                    if fault.flow_health() == FlowHealth::Good {
                        info!("Fault log: {fault}");
                    } else {
                        warn!("Fault log: {fault}, flow {}", fault.flow_health());
                    }
                    self.fault = Some(fault.raw.clone());
                }
                let flow_changed = state.apply_fault(&fault);
                if flow_changed || first_since_connect {
                    Change::State
                } else {
                    Change::None
                }
            }
            Message::ControlTypes => {
                if state.is_configuration_known() {
                    return Change::None;
                }
                state.install_default_controls();
                info!("Control types discovered: {}", state.pump_summaries().join(", "));
                Change::Configuration
            }
            Message::Configuration(config) => {
                info!("Configuration: motherboard {}", config.motherboard_id);
                Change::None
            }
            Message::Information(panel) => {
                info!("Panel information: software {} model {}", panel.software_id, panel.model);
                Change::None
            }
            Message::ModuleIdentification(raw) => {
                debug!("Module identification: {raw:02X?}");
                Change::None
            }
            Message::FilterCycles(schedule) => {
                info!(
                    "Filter cycles: 1) {} 2) {}",
                    schedule.cycles[0], schedule.cycles[1]
                );
                Change::None
            }
            Message::Preferences(prefs) => {
                info!(
                    "Preferences: {} scale, {} clock",
                    if prefs.celsius { "Celsius" } else { "Fahrenheit" },
                    if prefs.clock_24h { "24h" } else { "12h" }
                );
                Change::None
            }
            Message::Ignored(kind) => {
                debug!("Ignoring message type {kind:02X?}");
                Change::None
            }
            Message::Unrecognized { kind, raw } => {
                info!("Unrecognised message type {kind:02X?}: {raw:02X?}");
                Change::None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::fault::FaultEntry;
    use crate::devices::heater::{HeatMode, StatusFlags};
    use crate::devices::light::LightMode;
    use crate::protocol::{LightStatus, StatusUpdate};

    fn status(temp: u8) -> Message {
        Message::Status(StatusUpdate {
            current_temperature: (temp != 255).then_some(temp),
            target_temperature: 100,
            flags: StatusFlags::empty(),
            heat_mode: HeatMode::Ready,
            pump_speeds: [(2, 0), (3, 0)],
            monitored: [0, 0, temp, 100],
        })
    }

    fn fault(code: u8, days: u8) -> Message {
        Message::Fault(FaultEntry {
            entry_count: 1,
            entry_number: 0,
            code,
            days_ago: days,
            hour: 0,
            minute: 0,
            raw: vec![1, 0, code, days, 0, 0],
        })
    }

    #[test]
    fn test_unknown_then_known_temperature() {
        let mut interp = Interpreter::default();
        let mut state = DeviceState::new();
        let now = Instant::now();
        interp.interpret(&mut state, status(255), now);
        assert_eq!(state.current_temperature(), None);
        interp.interpret(&mut state, status(70), now);
        assert_eq!(state.current_temperature(), Some(70));
    }

    #[test]
    fn test_status_change_detection() {
        let mut interp = Interpreter::default();
        let mut state = DeviceState::new();
        let now = Instant::now();
        assert_eq!(interp.interpret(&mut state, status(70), now), Change::State);
        assert_eq!(interp.interpret(&mut state, status(70), now), Change::None);
        assert_eq!(interp.interpret(&mut state, status(71), now), Change::State);
    }

    #[test]
    fn test_status_keep_fresh() {
        let mut interp = Interpreter::default();
        let mut state = DeviceState::new();
        let start = Instant::now();
        interp.interpret(&mut state, status(70), start);
        let later = start + Duration::from_secs(59);
        assert_eq!(interp.interpret(&mut state, status(70), later), Change::None);
        let stale = start + Duration::from_secs(61);
        assert_eq!(interp.interpret(&mut state, status(70), stale), Change::State);
        // Keep-fresh restarts from the forced report.
        let soon = stale + Duration::from_secs(10);
        assert_eq!(interp.interpret(&mut state, status(70), soon), Change::None);
    }

    #[test]
    fn test_light_keep_fresh() {
        let light = Message::Light(LightStatus {
            brightness: 80,
            mode: LightMode::from_byte(6),
            rgb: [0; 3],
            cycle_time: 2,
            monitored: [6, 2],
        });
        let mut interp = Interpreter::default();
        let mut state = DeviceState::new();
        let start = Instant::now();
        assert_eq!(interp.interpret(&mut state, light.clone(), start), Change::State);
        let later = start + Duration::from_secs(60);
        assert_eq!(interp.interpret(&mut state, light.clone(), later), Change::None);
        let stale = start + Duration::from_secs(61);
        assert_eq!(interp.interpret(&mut state, light.clone(), stale), Change::State);
        let soon = stale + Duration::from_secs(30);
        assert_eq!(interp.interpret(&mut state, light, soon), Change::None);
    }

    #[test]
    fn test_fault_entry_recorded_once_per_snapshot() {
        let mut interp = Interpreter::default();
        let mut state = DeviceState::new();
        let now = Instant::now();
        interp.interpret(&mut state, fault(19, 1), now);
        assert_eq!(interp.fault.as_deref(), Some(&[1, 0, 19, 1, 0, 0][..]));
        // A repeat is neither recorded again nor reported.
        assert_eq!(interp.interpret(&mut state, fault(19, 1), now), Change::None);
        assert_eq!(interp.fault.as_deref(), Some(&[1, 0, 19, 1, 0, 0][..]));

        interp.interpret(&mut state, fault(19, 2), now);
        assert_eq!(interp.fault.as_deref(), Some(&[1, 0, 19, 2, 0, 0][..]));
    }

    #[test]
    fn test_reset_observed_reports_again() {
        let mut interp = Interpreter::default();
        let mut state = DeviceState::new();
        let now = Instant::now();
        interp.interpret(&mut state, status(70), now);
        interp.reset_observed();
        assert_eq!(interp.interpret(&mut state, status(70), now), Change::State);
    }

    #[test]
    fn test_light_change_detection() {
        let light = |mode: u8, cycle: u8, brightness: u8| {
            Message::Light(LightStatus {
                brightness,
                mode: LightMode::from_byte(mode),
                rgb: [0; 3],
                cycle_time: cycle,
                monitored: [mode, cycle],
            })
        };
        let mut interp = Interpreter::default();
        let mut state = DeviceState::new();
        let now = Instant::now();
        assert_eq!(interp.interpret(&mut state, light(0, 0, 0), now), Change::State);
        // Brightness is not monitored.
        assert_eq!(interp.interpret(&mut state, light(0, 0, 50), now), Change::None);
        assert_eq!(interp.interpret(&mut state, light(6, 0, 50), now), Change::State);
        assert_eq!(state.light_on(1), Some(true));
    }

    #[test]
    fn test_fault_changes_only_on_flow_transition() {
        let mut interp = Interpreter::default();
        let mut state = DeviceState::new();
        let now = Instant::now();
        // First fault after connect is always reported.
        assert_eq!(interp.interpret(&mut state, fault(19, 1), now), Change::State);
        assert_eq!(interp.interpret(&mut state, fault(20, 1), now), Change::None);
        assert_eq!(interp.interpret(&mut state, fault(16, 0), now), Change::State);
        assert_eq!(state.flow_health(), FlowHealth::Low);
        assert_eq!(interp.interpret(&mut state, fault(28, 0), now), Change::None);
        assert_eq!(interp.interpret(&mut state, fault(17, 0), now), Change::State);
        assert_eq!(state.flow_health(), FlowHealth::Failed);
        assert_eq!(interp.interpret(&mut state, fault(21, 0), now), Change::State);
        assert_eq!(state.flow_health(), FlowHealth::Good);
    }

    #[test]
    fn test_control_types_only_once() {
        let mut interp = Interpreter::default();
        let mut state = DeviceState::new();
        let now = Instant::now();
        assert_eq!(
            interp.interpret(&mut state, Message::ControlTypes, now),
            Change::Configuration
        );
        assert!(state.is_configuration_known());
        assert_eq!(interp.interpret(&mut state, Message::ControlTypes, now), Change::None);
    }

    #[test]
    fn test_logging_only_messages_never_change() {
        let mut interp = Interpreter::default();
        let mut state = DeviceState::new();
        let before = state.clone();
        let now = Instant::now();
        let messages = [
            Message::Ignored([0xFE, 0xBF, 0x00]),
            Message::Unrecognized { kind: [1, 2, 3], raw: vec![0x7E] },
            Message::ModuleIdentification(vec![1, 2]),
        ];
        for message in messages {
            assert_eq!(interp.interpret(&mut state, message, now), Change::None);
        }
        assert_eq!(state, before);
    }
}
