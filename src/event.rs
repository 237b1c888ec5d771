// MIT License - Copyright (c) 2026 Peter Wright
// Events published to the host

/// All events emitted by the session.
///
/// Hosts subscribe via `client.subscribe()` to receive a
/// `tokio::sync::broadcast::Receiver<SpaEvent>`. Events carry no state;
/// read the latest snapshot from `client.state()` when one arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaEvent {
    /// TCP connection to the controller established
    Connected,
    /// TCP connection lost or closed
    Disconnected,
    /// Control types discovered; fired once per client
    ConfigurationKnown,
    /// Observable state changed, or the periodic keep-fresh report is due
    StateChanged,
    /// Connected again after a previous connection was lost
    Reconnected,
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<SpaEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<SpaEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}
