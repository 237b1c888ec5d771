// MIT License - Copyright (c) 2026 Peter Wright
// Connection lifecycle, timers and command dispatch for one controller

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use tracing::{debug, error, info, trace, warn};

use crate::config::SpaConfig;
use crate::control::{ControlJob, ControlTarget, SpaCommand, Step, validate};
use crate::crypto;
use crate::error::{Result, SpaError};
use crate::event::{EventSender, SpaEvent};
use crate::interpreter::{Change, Interpreter};
use crate::protocol::{Frame, Message, MessageType, Request};
use crate::schedule::{Scheduler, Task};
use crate::state::DeviceState;
use crate::transport::framer::Framer;

/// Socket state as far as the session is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// The protocol engine for one controller.
///
/// Does no I/O itself: the driver feeds it socket data, errors and the
/// current instant, and writes out whatever lands in the outbox. This keeps
/// every timing decision testable without a socket or a runtime.
pub struct Session {
    config: SpaConfig,
    state: DeviceState,
    connection: ConnectionState,
    framer: Framer,
    interpreter: Interpreter,
    scheduler: Scheduler,
    jobs: Vec<ControlJob>,
    queue: VecDeque<SpaCommand>,
    outbox: Vec<Frame>,
    event_tx: EventSender,
    connect_requested: bool,
    ever_connected: bool,
    status_seen: bool,
    shut_down: bool,
}

impl Session {
    pub fn new(config: SpaConfig, event_tx: EventSender) -> Self {
        Self {
            framer: Framer::new(config.fragment_timeout()),
            interpreter: Interpreter::new(config.keep_fresh()),
            config,
            state: DeviceState::new(),
            connection: ConnectionState::Disconnected,
            scheduler: Scheduler::new(),
            jobs: Vec::new(),
            queue: VecDeque::new(),
            outbox: Vec::new(),
            event_tx,
            connect_requested: true,
            ever_connected: false,
            status_seen: false,
            shut_down: false,
        }
    }

    pub fn config(&self) -> &SpaConfig {
        &self.config
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Commands waiting for a connection (or for enough state to plan).
    pub fn queued(&self) -> impl Iterator<Item = &SpaCommand> {
        self.queue.iter()
    }

    /// Targets with a press sequence in flight.
    pub fn active_targets(&self) -> impl Iterator<Item = ControlTarget> + '_ {
        self.jobs.iter().map(|j| j.target())
    }

    /// Number of reconnect attempts currently scheduled (0 or 1).
    pub fn pending_reconnects(&self) -> usize {
        self.scheduler.count(|t| *t == Task::Reconnect)
    }

    /// Earliest instant at which [`Session::on_timer`] has work.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Frames ready for the socket, in send order.
    pub fn take_outbox(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.outbox)
    }

    /// True once when the driver should open a new connection.
    pub fn take_connect_request(&mut self) -> bool {
        let requested = self.connect_requested && !self.shut_down;
        self.connect_requested = false;
        requested
    }

    // ---- Lifecycle ----

    pub fn begin_connect(&mut self) {
        info!("Connecting to spa at {}", self.config.address());
        self.connection = ConnectionState::Connecting;
    }

    pub fn on_connected(&mut self, now: Instant) {
        info!("Connected to spa at {}", self.config.address());
        self.connection = ConnectionState::Connected;
        self.framer.reset();
        self.interpreter.reset_observed();
        self.status_seen = false;

        self.emit(SpaEvent::Connected);
        if self.ever_connected {
            self.emit(SpaEvent::Reconnected);
        }
        self.ever_connected = true;

        if !self.state.is_configuration_known() {
            debug!("Configuration unknown, querying controller");
            self.send(Request::ControlTypes);
            let stagger = self.config.panel_request_stagger();
            for (i, request) in Request::PANEL_QUERIES.into_iter().enumerate() {
                self.scheduler
                    .schedule_in(now, stagger * (i as u32 + 1), Task::Send(request));
            }
            self.scheduler.schedule_in(
                now,
                self.config.config_request_delay(),
                Task::Send(Request::Configuration),
            );
        }
        self.scheduler
            .schedule_in(now, self.config.fault_check_delay(), Task::FaultCheck);
        self.scheduler
            .schedule_in(now, self.config.liveness_interval(), Task::LivenessCheck);

        self.drain_queue(now);
    }

    /// Transport failure: socket error, end of stream, failed connect or a
    /// missed liveness check. Exactly one reconnect is ever scheduled.
    /// Anything that is not retryable shuts the session down instead.
    pub fn on_transport_error(&mut self, err: &SpaError, now: Instant) {
        if self.shut_down {
            return;
        }
        if !err.is_retryable() {
            error!("Unrecoverable spa session error: {err}");
            self.shutdown();
            return;
        }
        if self.connection == ConnectionState::Disconnected && self.pending_reconnects() > 0 {
            debug!("Ignoring transport error while a reconnect is pending: {err}");
            return;
        }

        let was_connected = self.connection == ConnectionState::Connected;
        warn!(
            "Connection to spa lost ({err}), reconnecting in {}s",
            self.config.reconnect_delay().as_secs_f32()
        );
        self.teardown(true);
        if was_connected {
            self.emit(SpaEvent::Disconnected);
        }
        self.scheduler
            .schedule_in(now, self.config.reconnect_delay(), Task::Reconnect);
    }

    /// Stop for good. No reconnect is scheduled.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        info!("Shutting down spa session");
        let was_connected = self.connection == ConnectionState::Connected;
        self.teardown(false);
        self.queue.clear();
        self.shut_down = true;
        self.connect_requested = false;
        if was_connected {
            self.emit(SpaEvent::Disconnected);
        }
    }

    fn teardown(&mut self, requeue: bool) {
        self.connection = ConnectionState::Disconnected;
        self.scheduler.cancel_all();
        self.framer.reset();
        self.outbox.clear();

        let jobs = std::mem::take(&mut self.jobs);
        let abandoned = !jobs.is_empty();
        for job in jobs.iter().rev() {
            job.abandon(&mut self.state);
            if requeue {
                debug!("Re-queueing interrupted command: {}", job.command());
                self.queue.push_front(job.command());
            }
        }
        if abandoned {
            self.emit(SpaEvent::StateChanged);
        }
    }

    // ---- Inbound ----

    /// Bytes read from the socket.
    pub fn on_data(&mut self, chunk: &[u8], now: Instant) {
        let output = self.framer.feed(chunk, now);
        let mut changed = false;

        for frame in output.frames {
            trace!("RX {frame}");
            if frame.message_type() == MessageType::StatusUpdate {
                self.status_seen = true;
            }
            let frame = crypto::decrypt(frame);
            let message = match Message::decode(&frame) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Could not decode frame {frame}: {e}");
                    continue;
                }
            };
            match self.interpreter.interpret(&mut self.state, message, now) {
                Change::None => {}
                Change::State => {
                    changed = true;
                    self.emit(SpaEvent::StateChanged);
                }
                Change::Configuration => {
                    changed = true;
                    info!("Spa configuration known: {}", self.state.summary());
                    self.emit(SpaEvent::ConfigurationKnown);
                }
            }
        }

        if changed {
            self.drain_queue(now);
        }
    }

    // ---- Commands ----

    /// Accept a command from the host.
    ///
    /// Rejected commands are logged and returned as errors; nothing is sent.
    /// Commands that cannot run yet are queued and replayed in order.
    pub fn submit(&mut self, command: SpaCommand, now: Instant) -> Result<()> {
        if self.shut_down {
            return Err(SpaError::ChannelClosed);
        }
        if let Err(e) = validate(&command, &self.state) {
            error!("Rejected command '{command}': {e}");
            return Err(e);
        }
        if self.connection != ConnectionState::Connected || !command.is_ready(&self.state) {
            debug!("Queueing command '{command}' ({})", self.connection);
            self.queue.push_back(command);
            return Ok(());
        }
        self.start_job(command, now)
    }

    /// Start queued commands in order. Stops at the first one that is not
    /// ready or whose target still has a job in flight.
    fn drain_queue(&mut self, now: Instant) {
        while self.connection == ConnectionState::Connected {
            let Some(command) = self.queue.front().copied() else {
                break;
            };
            let busy = self.jobs.iter().any(|j| j.target() == command.target());
            if busy || !command.is_ready(&self.state) {
                break;
            }
            self.queue.pop_front();
            info!("Replaying queued command '{command}'");
            // Errors are already logged.
            let _ = self.start_job(command, now);
        }
    }

    fn start_job(&mut self, command: SpaCommand, now: Instant) -> Result<()> {
        let target = command.target();
        if let Some(idx) = self.jobs.iter().position(|j| j.target() == target) {
            let old = self.jobs.remove(idx);
            debug!("Replacing in-flight command '{}'", old.command());
            old.abandon(&mut self.state);
            self.scheduler.cancel(|t| *t == Task::AdvanceJob(target));
        }

        let job = match ControlJob::plan(command, &mut self.state, self.config.max_temperature_steps) {
            Ok(job) => job,
            Err(e) => {
                error!("Rejected command '{command}': {e}");
                return Err(e);
            }
        };
        info!("Starting command '{command}'");
        self.jobs.push(job);
        self.emit(SpaEvent::StateChanged);
        self.advance_job(target, now);
        Ok(())
    }

    fn advance_job(&mut self, target: ControlTarget, now: Instant) {
        let Some(idx) = self.jobs.iter().position(|j| j.target() == target) else {
            return;
        };
        match self.jobs[idx].step(&mut self.state) {
            Step::Press(button) => {
                debug!("Pressing {button:?} for '{}'", self.jobs[idx].command());
                self.send(Request::Press(button));
                self.scheduler.schedule_in(
                    now,
                    self.config.press_interval(),
                    Task::AdvanceJob(target),
                );
            }
            Step::Done => {
                let job = self.jobs.remove(idx);
                debug!("Finished command '{}'", job.command());
                self.emit(SpaEvent::StateChanged);
                self.drain_queue(now);
            }
        }
    }

    // ---- Timers ----

    /// Run every task that is due.
    pub fn on_timer(&mut self, now: Instant) {
        while let Some(task) = self.scheduler.pop_due(now) {
            match task {
                Task::Send(request) => self.send(request),
                Task::FaultCheck => {
                    self.send(Request::FaultLog);
                    self.scheduler.schedule_in(
                        now,
                        self.config.fault_check_interval(),
                        Task::FaultCheck,
                    );
                }
                Task::LivenessCheck => {
                    if self.status_seen {
                        self.status_seen = false;
                        self.scheduler.schedule_in(
                            now,
                            self.config.liveness_interval(),
                            Task::LivenessCheck,
                        );
                    } else {
                        let secs = self.config.liveness_interval().as_secs();
                        self.on_transport_error(&SpaError::StatusTimeout { secs }, now);
                    }
                }
                Task::Reconnect => {
                    debug!("Reconnect delay elapsed");
                    self.connect_requested = true;
                }
                Task::AdvanceJob(target) => self.advance_job(target, now),
            }
        }
    }

    // ---- Internals ----

    fn send(&mut self, request: Request) {
        if self.connection != ConnectionState::Connected {
            debug!("Not connected, dropping {request:?}");
            return;
        }
        let frame = crypto::encrypt(&request.to_frame());
        trace!("TX {frame}");
        self.outbox.push(frame);
    }

    fn emit(&self, event: SpaEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{BUTTON_COMMAND, CONTROL_TYPES, PANEL_REQUEST, STATUS_UPDATE};
    use crate::event::{EventReceiver, event_channel};
    use std::time::Duration;

    fn session() -> (Session, EventReceiver) {
        let (tx, rx) = event_channel(64);
        (Session::new(SpaConfig::default(), tx), rx)
    }

    fn events(rx: &mut EventReceiver) -> Vec<SpaEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    /// Wire bytes of a status frame with the given temperature and setpoint.
    fn status_wire(temp: u8, target: u8) -> Vec<u8> {
        let mut payload = vec![0u8; 22];
        payload[10] = temp; // offset 15
        payload[16] = target; // offset 21
        let mut frame = Frame::new(STATUS_UPDATE, &payload);
        crypto::transform(&mut frame);
        frame.into_bytes()
    }

    fn connect(s: &mut Session, now: Instant) {
        assert!(s.take_connect_request());
        s.begin_connect();
        s.on_connected(now);
    }

    #[test]
    fn test_first_connect_queries_configuration() {
        let (mut s, mut rx) = session();
        let now = Instant::now();
        connect(&mut s, now);
        assert_eq!(events(&mut rx), vec![SpaEvent::Connected]);

        let out = s.take_outbox();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind(), PANEL_REQUEST);
        assert_eq!(out[0].payload(), &[0x00, 0x00, 0x01]);

        s.on_timer(now + Duration::from_secs(4));
        assert_eq!(s.take_outbox().len(), 4);
        s.on_timer(now + Duration::from_secs(5));
        let fault = s.take_outbox();
        assert_eq!(fault[0].payload(), &[0x20, 0xFF, 0x00]);
        s.on_timer(now + Duration::from_secs(15));
        assert_eq!(s.take_outbox()[0].payload().len(), 0);
    }

    #[test]
    fn test_control_types_reported_once() {
        let (mut s, mut rx) = session();
        let now = Instant::now();
        connect(&mut s, now);
        events(&mut rx);
        let frame = Frame::new(CONTROL_TYPES, &[0; 4]);
        s.on_data(frame.as_bytes(), now);
        s.on_data(frame.as_bytes(), now);
        assert_eq!(events(&mut rx), vec![SpaEvent::ConfigurationKnown]);
        assert!(s.state().is_configuration_known());
    }

    #[test]
    fn test_status_reported_once_until_change() {
        let (mut s, mut rx) = session();
        let now = Instant::now();
        connect(&mut s, now);
        events(&mut rx);
        s.on_data(&status_wire(68, 100), now);
        s.on_data(&status_wire(68, 100), now);
        assert_eq!(events(&mut rx), vec![SpaEvent::StateChanged]);
        assert_eq!(s.state().current_temperature(), Some(68));
    }

    #[test]
    fn test_error_reentrancy_guard() {
        let (mut s, _rx) = session();
        let now = Instant::now();
        connect(&mut s, now);
        for i in 0..3 {
            s.on_transport_error(&SpaError::Disconnected, now + Duration::from_secs(i));
        }
        assert_eq!(s.pending_reconnects(), 1);
        assert_eq!(s.connection_state(), ConnectionState::Disconnected);
        assert!(!s.take_connect_request());

        s.on_timer(now + Duration::from_secs(20));
        assert!(s.take_connect_request());
    }

    #[test]
    fn test_failed_connect_schedules_reconnect() {
        let (mut s, _rx) = session();
        let now = Instant::now();
        assert!(s.take_connect_request());
        s.begin_connect();
        s.on_transport_error(&SpaError::ConnectionTimeout, now);
        assert_eq!(s.pending_reconnects(), 1);
    }

    #[test]
    fn test_liveness_forces_reconnect() {
        let (mut s, mut rx) = session();
        let now = Instant::now();
        connect(&mut s, now);
        s.on_data(&status_wire(70, 100), now);
        s.on_timer(now + Duration::from_secs(60));
        assert_eq!(s.connection_state(), ConnectionState::Connected);
        events(&mut rx);

        s.on_timer(now + Duration::from_secs(120));
        assert_eq!(s.connection_state(), ConnectionState::Disconnected);
        assert_eq!(s.pending_reconnects(), 1);
        assert_eq!(events(&mut rx), vec![SpaEvent::Disconnected]);
    }

    #[test]
    fn test_reconnect_emits_reconnected() {
        let (mut s, mut rx) = session();
        let now = Instant::now();
        connect(&mut s, now);
        s.on_transport_error(&SpaError::Disconnected, now);
        s.on_timer(now + Duration::from_secs(20));
        connect(&mut s, now + Duration::from_secs(21));
        assert_eq!(
            events(&mut rx),
            vec![
                SpaEvent::Connected,
                SpaEvent::Disconnected,
                SpaEvent::Connected,
                SpaEvent::Reconnected
            ]
        );
    }

    #[test]
    fn test_commands_queued_while_disconnected() {
        let (mut s, _rx) = session();
        let now = Instant::now();
        s.submit(SpaCommand::SetPumpSpeed { pump: 2, speed: 1 }, now).unwrap();
        s.submit(SpaCommand::SetLight { light: 1, on: true }, now).unwrap();
        s.submit(SpaCommand::SetPumpSpeed { pump: 2, speed: 2 }, now).unwrap();
        let queued: Vec<_> = s.queued().copied().collect();
        assert_eq!(
            queued,
            vec![
                SpaCommand::SetPumpSpeed { pump: 2, speed: 1 },
                SpaCommand::SetLight { light: 1, on: true },
                SpaCommand::SetPumpSpeed { pump: 2, speed: 2 },
            ]
        );
        assert!(s.take_outbox().is_empty());
    }

    #[test]
    fn test_queued_same_target_waits_for_previous_job() {
        let (mut s, _rx) = session();
        let now = Instant::now();
        s.submit(SpaCommand::SetPumpSpeed { pump: 2, speed: 1 }, now).unwrap();
        s.submit(SpaCommand::SetLight { light: 1, on: true }, now).unwrap();
        s.submit(SpaCommand::SetPumpSpeed { pump: 2, speed: 2 }, now).unwrap();
        connect(&mut s, now);
        s.on_data(Frame::new(CONTROL_TYPES, &[0; 4]).as_bytes(), now);

        let presses = |s: &mut Session| -> Vec<u8> {
            s.take_outbox()
                .into_iter()
                .filter(|f| f.kind() == BUTTON_COMMAND)
                .map(|f| crypto::decrypt(f).payload()[1])
                .collect()
        };
        // Pump 2 to low and the light start; pump 2 to high waits its turn.
        assert_eq!(presses(&mut s), vec![0x05, 0x11]);
        assert_eq!(s.queued().count(), 1);

        s.on_timer(now + Duration::from_secs(1));
        assert_eq!(presses(&mut s), vec![0x05]);
        assert_eq!(s.queued().count(), 0);
        s.on_timer(now + Duration::from_secs(2));
        assert_eq!(s.active_targets().count(), 0);
        assert_eq!(s.state().pump_speed(2), Some(2));
    }

    #[test]
    fn test_unrecoverable_error_shuts_down() {
        let (mut s, mut rx) = session();
        let now = Instant::now();
        connect(&mut s, now);
        events(&mut rx);
        s.on_transport_error(&SpaError::ChannelClosed, now);
        assert!(s.is_shut_down());
        assert_eq!(s.pending_reconnects(), 0);
        assert_eq!(events(&mut rx), vec![SpaEvent::Disconnected]);
    }

    #[test]
    fn test_invalid_command_rejected() {
        let (mut s, _rx) = session();
        let err = s.submit(SpaCommand::SetPumpSpeed { pump: 7, speed: 1 }, Instant::now());
        assert!(matches!(err, Err(SpaError::InvalidPump { id: 7, .. })));
        assert_eq!(s.queued().count(), 0);
    }

    #[test]
    fn test_pump_presses_one_per_interval() {
        let (mut s, _rx) = session();
        let now = Instant::now();
        connect(&mut s, now);
        s.on_data(Frame::new(CONTROL_TYPES, &[0; 4]).as_bytes(), now);
        s.take_outbox();

        s.submit(SpaCommand::SetPumpSpeed { pump: 2, speed: 2 }, now).unwrap();
        let first = s.take_outbox();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind(), BUTTON_COMMAND);
        let plain = crypto::decrypt(first[0].clone());
        assert_eq!(&plain.payload()[1..], &[0x05, 0x00]);

        // Discovery requests share the timeline; count presses only.
        let presses_at = |s: &mut Session, at: Duration| {
            s.on_timer(now + at);
            s.take_outbox().iter().filter(|f| f.kind() == BUTTON_COMMAND).count()
        };
        assert_eq!(presses_at(&mut s, Duration::from_millis(999)), 0);
        assert_eq!(presses_at(&mut s, Duration::from_secs(1)), 1);
        assert_eq!(presses_at(&mut s, Duration::from_secs(2)), 0);
        assert_eq!(s.active_targets().count(), 0);
        assert_eq!(s.state().pump_speed(2), Some(2));
    }

    #[test]
    fn test_interrupted_job_requeued() {
        let (mut s, _rx) = session();
        let now = Instant::now();
        connect(&mut s, now);
        s.on_data(Frame::new(CONTROL_TYPES, &[0; 4]).as_bytes(), now);
        let cmd = SpaCommand::SetPumpSpeed { pump: 2, speed: 2 };
        s.submit(cmd, now).unwrap();
        assert_eq!(s.state().pump_speed(2), Some(2));

        s.on_transport_error(&SpaError::Disconnected, now);
        assert_eq!(s.active_targets().count(), 0);
        assert_eq!(s.queued().copied().collect::<Vec<_>>(), vec![cmd]);
        assert!(!s.state().pump(2).unwrap().has_override());
    }

    #[test]
    fn test_shutdown_stops_everything() {
        let (mut s, mut rx) = session();
        let now = Instant::now();
        connect(&mut s, now);
        events(&mut rx);
        s.shutdown();
        assert_eq!(events(&mut rx), vec![SpaEvent::Disconnected]);
        assert_eq!(s.next_deadline(), None);
        s.on_transport_error(&SpaError::Disconnected, now);
        assert_eq!(s.pending_reconnects(), 0);
        assert!(!s.take_connect_request());
    }
}
