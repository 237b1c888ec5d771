// MIT License - Copyright (c) 2026 Peter Wright
// spa-lan-bridge
//
//! # spa-lan-bridge
//!
//! Direct TCP/IP communication with hot-tub controllers that speak the
//! encrypted-panel protocol (sentinel-framed, CRC-8 checked, with XOR
//! enciphered status, light and button frames).
//!
//! The library keeps a live model of the spa (temperatures, pumps, lights,
//! flow health) and turns absolute commands ("set 102", "pump 2 high") into
//! the relative button presses the controller understands.
//!
//! ## Quick Start
//!
//! ```no_run
//! use spa_lan_bridge::{SpaClient, SpaConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SpaConfig::builder().host("192.168.1.40").build();
//!     let mut client = SpaClient::start(config);
//!
//!     let mut events = client.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     client.set_pump_speed(2, 1).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod constants;
pub mod control;
pub mod crypto;
pub mod devices;
pub mod error;
pub mod event;
pub mod interpreter;
pub mod protocol;
pub mod schedule;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use client::SpaClient;
pub use config::{SpaConfig, SpaConfigBuilder};
pub use control::{ControlTarget, SpaCommand};
pub use devices::fault::{FaultEntry, FlowHealth};
pub use devices::heater::{HeatMode, StatusFlags, TemperatureRange};
pub use devices::light::{Light, LightMode};
pub use devices::pump::Pump;
pub use error::{FrameError, Result, SpaError};
pub use event::{EventReceiver, EventSender, SpaEvent, event_channel};
pub use protocol::{Button, Frame, Message, MessageType, Request};
pub use session::{ConnectionState, Session};
pub use state::DeviceState;
