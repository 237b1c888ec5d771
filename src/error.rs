// MIT License - Copyright (c) 2026 Peter Wright
// Error types

/// Problems found while cutting the inbound byte stream into frames.
///
/// None of these are fatal: the framer logs them, discards the offending
/// bytes and carries on with the rest of the stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Bad sentinel: skipped {skipped} byte(s) before next frame start")]
    BadSentinel { skipped: usize },

    #[error("Bad checksum: expected {expected:#04x}, got {actual:#04x}")]
    BadChecksum { expected: u8, actual: u8 },

    #[error("Malformed frame: declared length {length} not followed by end sentinel")]
    Malformed { length: u8 },

    #[error("Frame length byte {length} is below the minimum")]
    LengthTooSmall { length: u8 },

    #[error("Discarded stale fragment of {bytes} byte(s)")]
    StaleFragment { bytes: usize },

    #[error("Frame too short for {kind}: {len} byte(s)")]
    TooShort { kind: &'static str, len: usize },
}

/// All errors that can occur in the spa-lan-bridge library.
#[derive(Debug, thiserror::Error)]
pub enum SpaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Socket disconnected")]
    Disconnected,

    #[error("No status update received within {secs}s")]
    StatusTimeout { secs: u64 },

    #[error("Invalid pump: {id} (max: {max})")]
    InvalidPump { id: u8, max: u8 },

    #[error("Invalid pump speed {speed} for pump {id} (capability: {capability})")]
    InvalidSpeed { id: u8, speed: u8, capability: u8 },

    #[error("Invalid light: {id}")]
    InvalidLight { id: u8 },

    #[error("Channel closed")]
    ChannelClosed,
}

impl SpaError {
    /// Whether this error is transient and the connection should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SpaError::Io(_)
                | SpaError::ConnectionTimeout
                | SpaError::Disconnected
                | SpaError::StatusTimeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SpaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_retryable() {
        assert!(SpaError::Disconnected.is_retryable());
        assert!(SpaError::ConnectionTimeout.is_retryable());
        assert!(SpaError::StatusTimeout { secs: 60 }.is_retryable());
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(SpaError::from(io).is_retryable());
    }

    #[test]
    fn test_caller_errors_are_not_retryable() {
        assert!(!SpaError::InvalidPump { id: 4, max: 3 }.is_retryable());
        assert!(!SpaError::InvalidLight { id: 0 }.is_retryable());
        assert!(!SpaError::ChannelClosed.is_retryable());
    }

    #[test]
    fn test_frame_error_display() {
        let e = FrameError::BadChecksum { expected: 0x1a, actual: 0x02 };
        assert_eq!(e.to_string(), "Bad checksum: expected 0x1a, got 0x02");
    }
}
