// MIT License - Copyright (c) 2026 Peter Wright
// Device models: heater, pumps, lights, fault log

pub mod fault;
pub mod heater;
pub mod light;
pub mod pump;
