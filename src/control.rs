// MIT License - Copyright (c) 2026 Peter Wright
// Turns absolute commands into sequences of button presses

use std::fmt;

use tracing::{debug, info};

use crate::constants::PUMP_SLOTS;
use crate::error::{Result, SpaError};
use crate::protocol::Button;
use crate::state::DeviceState;

/// Default upper bound on temperature presses per command.
pub const DEFAULT_TEMPERATURE_STEPS: u32 = 60;

/// An absolute command from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpaCommand {
    /// Setpoint of the active range, in device units.
    SetTargetTemperature(u8),
    SetPumpSpeed { pump: u8, speed: u8 },
    SetLight { light: u8, on: bool },
}

/// What a command controls. A newer command for the same target replaces
/// the one in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlTarget {
    Temperature,
    Pump(u8),
    Light(u8),
}

impl SpaCommand {
    pub fn target(&self) -> ControlTarget {
        match self {
            Self::SetTargetTemperature(_) => ControlTarget::Temperature,
            Self::SetPumpSpeed { pump, .. } => ControlTarget::Pump(*pump),
            Self::SetLight { light, .. } => ControlTarget::Light(*light),
        }
    }

    /// Whether the state holds enough to plan this command.
    pub(crate) fn is_ready(&self, state: &DeviceState) -> bool {
        match self {
            Self::SetTargetTemperature(_) => state.device_target_temperature().is_some(),
            Self::SetPumpSpeed { .. } | Self::SetLight { .. } => state.is_configuration_known(),
        }
    }
}

impl fmt::Display for SpaCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetTargetTemperature(t) => write!(f, "set target temperature {t}"),
            Self::SetPumpSpeed { pump, speed } => write!(f, "set pump {pump} speed {speed}"),
            Self::SetLight { light, on } => {
                write!(f, "turn light {light} {}", if *on { "on" } else { "off" })
            }
        }
    }
}

/// Check a command against the known controls.
///
/// Index range is always checked; presence and capability only once the
/// control types have been discovered.
pub fn validate(command: &SpaCommand, state: &DeviceState) -> Result<()> {
    match *command {
        SpaCommand::SetTargetTemperature(_) => Ok(()),
        SpaCommand::SetPumpSpeed { pump, speed } => {
            let slot = state
                .pump(pump)
                .ok_or(SpaError::InvalidPump { id: pump, max: PUMP_SLOTS as u8 })?;
            if !state.is_configuration_known() {
                return Ok(());
            }
            match slot.capability() {
                Some(0) | None => Err(SpaError::InvalidPump { id: pump, max: PUMP_SLOTS as u8 }),
                Some(capability) if speed > capability => Err(SpaError::InvalidSpeed {
                    id: pump,
                    speed,
                    capability,
                }),
                Some(_) => Ok(()),
            }
        }
        SpaCommand::SetLight { light, .. } => {
            let slot = state.light(light).ok_or(SpaError::InvalidLight { id: light })?;
            if state.is_configuration_known() && !slot.is_present() {
                return Err(SpaError::InvalidLight { id: light });
            }
            Ok(())
        }
    }
}

/// Number of presses to get a cyclic control from `current` to `desired`.
///
/// The control steps `0 -> 1 -> .. -> capability -> 0`. With `skip_off`
/// the controller refuses to enter 0, so the cycle is `1..=capability` and
/// the desired speed is raised to 1. A pump still reported at 0 takes one
/// press to join that cycle.
pub fn press_count(current: u8, desired: u8, capability: u8, skip_off: bool) -> u8 {
    if capability == 0 {
        return 0;
    }
    let cap = capability as u16;
    let (current, desired) = (current.min(capability) as u16, desired.min(capability) as u16);
    let presses = if skip_off {
        let lead = u16::from(current == 0);
        let (current, desired) = (current.max(1), desired.max(1));
        lead + (desired + cap - current) % cap
    } else {
        (desired + cap + 1 - current) % (cap + 1)
    };
    presses as u8
}

/// Result of advancing a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Send this press, then advance again after the press interval.
    Press(Button),
    /// The job is finished and its override has been cleared.
    Done,
}

#[derive(Debug, Clone)]
enum JobKind {
    /// Fixed number of presses, then substitute the predicted value.
    Discrete {
        button: Button,
        remaining: u8,
        predicted: Prediction,
    },
    /// Press up/down and watch the setpoint until it matches.
    Converge {
        desired: u8,
        original: Option<u8>,
        last_seen: Option<u8>,
        pressed: bool,
        iterations: u32,
        max_iterations: u32,
    },
}

#[derive(Debug, Clone, Copy)]
enum Prediction {
    Pump { id: u8, speed: u8 },
    Light { id: u8, on: bool },
}

/// An in-flight command.
#[derive(Debug, Clone)]
pub struct ControlJob {
    command: SpaCommand,
    kind: JobKind,
}

impl ControlJob {
    /// Validate the command, install its override and work out the presses.
    pub fn plan(command: SpaCommand, state: &mut DeviceState, max_iterations: u32) -> Result<Self> {
        validate(&command, state)?;
        let kind = match command {
            SpaCommand::SetTargetTemperature(desired) => {
                let original = state.device_target_temperature();
                state.set_target_override(Some(desired));
                JobKind::Converge {
                    desired,
                    original,
                    last_seen: original,
                    pressed: false,
                    iterations: 0,
                    max_iterations,
                }
            }
            SpaCommand::SetPumpSpeed { pump, speed } => {
                let skip_off =
                    state.pump(pump).is_some_and(|p| p.locked_in_filter) && state.is_filter_mode();
                let Some(slot) = state.pump_mut(pump) else {
                    return Err(SpaError::InvalidPump { id: pump, max: PUMP_SLOTS as u8 });
                };
                let capability = slot.capability().unwrap_or(0);
                let current = slot.reported_speed().unwrap_or(0);
                let desired = if skip_off { speed.max(1) } else { speed };
                let remaining = press_count(current, desired, capability, skip_off);
                debug!(
                    "Pump {pump}: {current} -> {desired} in {remaining} press(es){}",
                    if skip_off { " (filter cycle, off skipped)" } else { "" }
                );
                slot.set_override(Some(desired));
                JobKind::Discrete {
                    button: Button::Pump(pump),
                    remaining,
                    predicted: Prediction::Pump { id: pump, speed: desired },
                }
            }
            SpaCommand::SetLight { light, on } => {
                let Some(slot) = state.light_mut(light) else {
                    return Err(SpaError::InvalidLight { id: light });
                };
                let remaining = u8::from(slot.reported_on().unwrap_or(false) != on);
                slot.set_override(Some(on));
                JobKind::Discrete {
                    button: Button::Light(light),
                    remaining,
                    predicted: Prediction::Light { id: light, on },
                }
            }
        };
        Ok(Self { command, kind })
    }

    pub fn command(&self) -> SpaCommand {
        self.command
    }

    pub fn target(&self) -> ControlTarget {
        self.command.target()
    }

    /// Decide the next action from the current state.
    pub fn step(&mut self, state: &mut DeviceState) -> Step {
        match &mut self.kind {
            JobKind::Discrete { button, remaining, predicted } => {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Step::Press(*button);
                }
                match *predicted {
                    Prediction::Pump { id, speed } => {
                        if let Some(pump) = state.pump_mut(id) {
                            pump.set_override(None);
                            pump.set_reported_speed(speed);
                        }
                    }
                    Prediction::Light { id, on } => {
                        if let Some(light) = state.light_mut(id) {
                            light.set_override(None);
                            light.set_predicted_on(on);
                        }
                    }
                }
                Step::Done
            }
            JobKind::Converge {
                desired,
                original,
                last_seen,
                pressed,
                iterations,
                max_iterations,
            } => {
                let current = state.device_target_temperature();
                if *pressed {
                    let moved = current != *last_seen;
                    let pending = state.temperature_change_pending() && current == *original;
                    if !moved && !pending {
                        info!("Temperature not responding at {current:?}, giving up on {desired}");
                        state.set_target_override(None);
                        return Step::Done;
                    }
                }
                if *iterations >= *max_iterations {
                    info!("Temperature did not reach {desired} in {max_iterations} steps");
                    state.set_target_override(None);
                    return Step::Done;
                }
                match current {
                    Some(now) if now != *desired => {
                        *iterations += 1;
                        *last_seen = current;
                        *pressed = true;
                        Step::Press(if *desired > now {
                            Button::TemperatureUp
                        } else {
                            Button::TemperatureDown
                        })
                    }
                    _ => {
                        state.set_target_override(None);
                        Step::Done
                    }
                }
            }
        }
    }

    /// Drop the job without finishing it; observers see the device value again.
    pub fn abandon(&self, state: &mut DeviceState) {
        match self.command.target() {
            ControlTarget::Temperature => state.set_target_override(None),
            ControlTarget::Pump(id) => {
                if let Some(pump) = state.pump_mut(id) {
                    pump.set_override(None);
                }
            }
            ControlTarget::Light(id) => {
                if let Some(light) = state.light_mut(id) {
                    light.set_override(None);
                }
            }
        }
    }
}
