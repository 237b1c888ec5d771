// MIT License - Copyright (c) 2026 Peter Wright
// Reassembles the inbound TCP byte stream into frames

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::constants::{MIN_LENGTH, SENTINEL};
use crate::error::FrameError;
use crate::protocol::Frame;

/// Default lifetime of a buffered partial frame.
pub const DEFAULT_FRAGMENT_TIMEOUT: Duration = Duration::from_secs(1);

/// Everything one chunk produced: complete frames in arrival order, and
/// the problems that were skipped over to get them.
#[derive(Debug, Default)]
pub struct FramerOutput {
    pub frames: Vec<Frame>,
    pub errors: Vec<FrameError>,
}

/// Stream framer.
///
/// Holds at most one pending fragment. A fragment that is not completed
/// within the timeout is thrown away when the next chunk arrives.
#[derive(Debug)]
pub struct Framer {
    pending: Option<(Vec<u8>, Instant)>,
    timeout: Duration,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(DEFAULT_FRAGMENT_TIMEOUT)
    }
}

impl Framer {
    pub fn new(timeout: Duration) -> Self {
        Self { pending: None, timeout }
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn pending_len(&self) -> usize {
        self.pending.as_ref().map_or(0, |(buf, _)| buf.len())
    }

    /// Drop any pending fragment (used when the connection is replaced).
    pub fn reset(&mut self) {
        self.pending = None;
    }

    /// Feed one chunk read from the socket.
    pub fn feed(&mut self, chunk: &[u8], now: Instant) -> FramerOutput {
        let mut out = FramerOutput::default();

        let buf = match self.pending.take() {
            Some((mut buf, since)) if now.saturating_duration_since(since) <= self.timeout => {
                buf.extend_from_slice(chunk);
                buf
            }
            Some((stale, since)) => {
                warn!(
                    "Discarding stale partial frame of {} byte(s) after {}ms",
                    stale.len(),
                    now.saturating_duration_since(since).as_millis()
                );
                out.errors.push(FrameError::StaleFragment { bytes: stale.len() });
                chunk.to_vec()
            }
            None => chunk.to_vec(),
        };

        let mut pos = 0;
        while pos < buf.len() {
            if buf[pos] != SENTINEL {
                let next = next_sentinel(&buf, pos).unwrap_or(buf.len());
                let err = FrameError::BadSentinel { skipped: next - pos };
                warn!("Skipping bytes outside a frame: {err}");
                out.errors.push(err);
                pos = next;
                continue;
            }

            let Some(&length) = buf.get(pos + 1) else {
                self.hold(&buf[pos..], now);
                break;
            };

            // Back-to-back sentinels: the first one closed something we never saw.
            if length == SENTINEL {
                pos += 1;
                continue;
            }

            if length < MIN_LENGTH {
                let err = FrameError::LengthTooSmall { length };
                warn!("Dropping frame: {err}");
                out.errors.push(err);
                pos = next_sentinel(&buf, pos + 1).unwrap_or(buf.len());
                continue;
            }

            let total = length as usize + 2;
            if pos + total > buf.len() {
                self.hold(&buf[pos..], now);
                break;
            }

            let span = &buf[pos..pos + total];
            match Frame::from_bytes(span) {
                Ok(frame) => out.frames.push(frame),
                Err(err) => {
                    warn!("Dropping frame: {err}");
                    out.errors.push(err);
                }
            }
            pos += total;
        }

        out
    }

    fn hold(&mut self, bytes: &[u8], now: Instant) {
        debug!("Buffering partial frame of {} byte(s)", bytes.len());
        self.pending = Some((bytes.to_vec(), now));
    }
}

fn next_sentinel(buf: &[u8], from: usize) -> Option<usize> {
    buf[from..]
        .iter()
        .position(|&b| b == SENTINEL)
        .map(|offset| from + offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{FAULT_LOG, PANEL_REQUEST};
    use crate::protocol::Request;

    fn sample() -> Frame {
        Frame::new(FAULT_LOG, &[3, 0, 16, 2, 14, 5])
    }

    #[test]
    fn test_single_frame() {
        let mut framer = Framer::default();
        let out = framer.feed(sample().as_bytes(), Instant::now());
        assert_eq!(out.frames, vec![sample()]);
        assert!(out.errors.is_empty());
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn test_back_to_back_frames() {
        let a = sample();
        let b = Request::ControlTypes.to_frame();
        let mut bytes = a.as_bytes().to_vec();
        bytes.extend_from_slice(b.as_bytes());
        let out = Framer::default().feed(&bytes, Instant::now());
        assert_eq!(out.frames, vec![a, b]);
    }

    #[test]
    fn test_split_within_window_matches_whole() {
        let bytes = sample().into_bytes();
        let start = Instant::now();
        let mut framer = Framer::default();

        let first = framer.feed(&bytes[..5], start);
        assert!(first.frames.is_empty());
        assert_eq!(framer.pending_len(), 5);

        let second = framer.feed(&bytes[5..], start + Duration::from_millis(400));
        assert_eq!(second.frames, vec![sample()]);
        assert!(second.errors.is_empty());
    }

    #[test]
    fn test_split_after_window_is_discarded() {
        let bytes = sample().into_bytes();
        let start = Instant::now();
        let mut framer = Framer::default();

        framer.feed(&bytes[..5], start);
        let out = framer.feed(&bytes[5..], start + Duration::from_millis(1500));
        assert!(out.frames.is_empty());
        assert_eq!(out.errors[0], FrameError::StaleFragment { bytes: 5 });
    }

    #[test]
    fn test_garbage_before_frame_is_skipped() {
        let mut bytes = vec![0x01, 0x02, 0x03];
        bytes.extend_from_slice(sample().as_bytes());
        let out = Framer::default().feed(&bytes, Instant::now());
        assert_eq!(out.frames, vec![sample()]);
        assert_eq!(out.errors, vec![FrameError::BadSentinel { skipped: 3 }]);
    }

    #[test]
    fn test_bad_checksum_dropped_and_parsing_continues() {
        let mut bad = sample().into_bytes();
        bad[6] ^= 0x40;
        bad.extend_from_slice(Request::Information.to_frame().as_bytes());
        let out = Framer::default().feed(&bad, Instant::now());
        assert_eq!(out.frames.len(), 1);
        assert_eq!(out.frames[0].kind(), PANEL_REQUEST);
        assert!(matches!(out.errors[0], FrameError::BadChecksum { .. }));
    }

    #[test]
    fn test_missing_end_sentinel_is_malformed() {
        let mut bytes = sample().into_bytes();
        let last = bytes.len() - 1;
        bytes[last] = 0x00;
        let out = Framer::default().feed(&bytes, Instant::now());
        assert!(out.frames.is_empty());
        assert_eq!(out.errors, vec![FrameError::Malformed { length: 11 }]);
    }

    #[test]
    fn test_consecutive_sentinels() {
        let mut bytes = vec![SENTINEL];
        bytes.extend_from_slice(sample().as_bytes());
        let out = Framer::default().feed(&bytes, Instant::now());
        assert_eq!(out.frames, vec![sample()]);
        assert!(out.errors.is_empty());
    }

    #[test]
    fn test_reset_drops_pending() {
        let bytes = sample().into_bytes();
        let mut framer = Framer::default();
        framer.feed(&bytes[..4], Instant::now());
        framer.reset();
        assert_eq!(framer.pending_len(), 0);
    }
}
