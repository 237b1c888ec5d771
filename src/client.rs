// MIT License - Copyright (c) 2026 Peter Wright
// Public handle to a running spa session

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info};

use crate::config::SpaConfig;
use crate::control::{SpaCommand, validate};
use crate::devices::fault::FlowHealth;
use crate::devices::heater::TemperatureRange;
use crate::error::{Result, SpaError};
use crate::event::{EventReceiver, EventSender, event_channel};
use crate::session::{ConnectionState, Session};
use crate::state::DeviceState;
use crate::transport::direct::{CommandRequest, Publishers, run_session};

const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// The main public API for talking to a spa controller.
///
/// # Example
///
/// ```no_run
/// use spa_lan_bridge::{SpaClient, SpaConfig, SpaEvent};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = SpaConfig::builder().host("192.168.1.40").build();
///     let client = SpaClient::start(config);
///
///     let mut events = client.subscribe();
///     client.set_target_temperature(102).await?;
///
///     while let Ok(event) = events.recv().await {
///         if event == SpaEvent::StateChanged {
///             println!("{}", client.state().summary());
///         }
///     }
///     Ok(())
/// }
/// ```
pub struct SpaClient {
    commands: mpsc::Sender<CommandRequest>,
    state_rx: watch::Receiver<DeviceState>,
    connection_rx: watch::Receiver<ConnectionState>,
    event_tx: EventSender,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl SpaClient {
    /// Spawn the session task. Connecting (and reconnecting) happens in the
    /// background; commands issued before the connection is up are queued.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: SpaConfig) -> Self {
        let (event_tx, _event_rx) = event_channel(config.event_capacity);
        let (commands, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(DeviceState::new());
        let (connection_tx, connection_rx) = watch::channel(ConnectionState::Disconnected);

        info!("Starting spa client for {}", config.address());
        let session = Session::new(config, event_tx.clone());
        let publishers = Publishers {
            state: state_tx,
            connection: connection_tx,
        };
        let handle = tokio::spawn(run_session(session, command_rx, shutdown_rx, publishers));

        Self {
            commands,
            state_rx,
            connection_rx,
            event_tx,
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> EventReceiver {
        self.event_tx.subscribe()
    }

    /// Latest device state snapshot.
    pub fn state(&self) -> DeviceState {
        self.state_rx.borrow().clone()
    }

    /// Watch channel of state snapshots, for hosts that prefer polling.
    pub fn watch_state(&self) -> watch::Receiver<DeviceState> {
        self.state_rx.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection_rx.borrow()
    }

    /// Wait until the session reports Connected, or give up after `limit`.
    pub async fn wait_connected(&self, limit: Duration) -> Result<()> {
        let mut rx = self.connection_rx.clone();
        let wait = rx.wait_for(|c| *c == ConnectionState::Connected);
        match tokio::time::timeout(limit, wait).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(SpaError::ChannelClosed),
            Err(_) => Err(SpaError::ConnectionTimeout),
        }
    }

    // ---- Queries ----

    pub fn current_temperature(&self) -> Option<u8> {
        self.state_rx.borrow().current_temperature()
    }

    pub fn target_temperature(&self) -> Option<u8> {
        self.state_rx.borrow().target_temperature()
    }

    pub fn range(&self) -> Option<TemperatureRange> {
        self.state_rx.borrow().range()
    }

    pub fn is_heating(&self) -> bool {
        self.state_rx.borrow().is_heating()
    }

    pub fn flow_health(&self) -> FlowHealth {
        self.state_rx.borrow().flow_health()
    }

    pub fn pump_speed(&self, pump: u8) -> Option<u8> {
        self.state_rx.borrow().pump_speed(pump)
    }

    pub fn pump_capability(&self, pump: u8) -> Option<u8> {
        self.state_rx.borrow().pump_capability(pump)
    }

    pub fn light_on(&self, light: u8) -> Option<bool> {
        self.state_rx.borrow().light_on(light)
    }

    pub fn is_configuration_known(&self) -> bool {
        self.state_rx.borrow().is_configuration_known()
    }

    // ---- Commands ----

    /// Change the setpoint of the active range. Presses are sent over the
    /// following seconds; watch for `StateChanged` to see the result.
    pub async fn set_target_temperature(&self, temperature: u8) -> Result<()> {
        self.send_command(SpaCommand::SetTargetTemperature(temperature)).await
    }

    /// Set a pump to `0..=capability`.
    pub async fn set_pump_speed(&self, pump: u8, speed: u8) -> Result<()> {
        self.send_command(SpaCommand::SetPumpSpeed { pump, speed }).await
    }

    pub async fn set_light(&self, light: u8, on: bool) -> Result<()> {
        self.send_command(SpaCommand::SetLight { light, on }).await
    }

    /// Hand a command to the session. Returns once it has been accepted
    /// (started or queued), not once it has taken effect.
    pub async fn send_command(&self, command: SpaCommand) -> Result<()> {
        if let Err(e) = validate(&command, &self.state_rx.borrow()) {
            error!("Rejected command '{}': {}", command, e);
            return Err(e);
        }
        let (reply, verdict) = oneshot::channel();
        self.commands
            .send(CommandRequest { command, reply })
            .await
            .map_err(|_| SpaError::ChannelClosed)?;
        verdict.await.map_err(|_| SpaError::ChannelClosed)?
    }

    /// Stop the session and close the socket.
    pub async fn disconnect(&mut self) -> Result<()> {
        info!("Disconnecting from spa");
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            handle.await.map_err(|_| SpaError::ChannelClosed)?;
        }
        Ok(())
    }
}

impl Drop for SpaClient {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
