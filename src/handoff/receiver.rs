//! Receiving side of the handoff.
//!
//! A receiver connects to the rendezvous path, takes exactly one handoff
//! message, adopts the segment handle and maps it read-only. The frame is
//! located by walking its own message prefixes within the mapped capacity
//! before anything is decoded.

use super::fd::recv_handle;
use crate::config::{HandoffConfig, defaults};
use crate::error::{Error, Result};
use crate::frame::{DecodedFrame, FrameExtent, frame_extent, read_frame};
use crate::memory::{SegmentMapping, SharedSegment};
use std::io;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Connection to a sender's rendezvous socket.
#[derive(Debug)]
pub struct Receiver {
    stream: UnixStream,
    marker: u8,
}

impl Receiver {
    /// Connect once.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|e| {
            Error::Io(io::Error::new(
                e.kind(),
                format!("failed to connect to {}: {e}", path.display()),
            ))
        })?;
        debug!(path = %path.display(), "connected to sender");
        Ok(Self {
            stream,
            marker: defaults::HANDOFF_MARKER,
        })
    }

    /// Keep connecting until the sender is listening or `timeout` elapses.
    ///
    /// Only "not there yet" failures (`NotFound`, `ConnectionRefused`) are
    /// retried.
    pub fn connect_with_retry(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        let deadline = Instant::now() + timeout;
        loop {
            match Self::connect(path) {
                Ok(receiver) => return Ok(receiver),
                Err(Error::Io(e))
                    if matches!(
                        e.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                    ) && Instant::now() < deadline =>
                {
                    std::thread::sleep(defaults::POLL_INTERVAL);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Connect using the path and retry window from `config`.
    pub fn from_config(config: &HandoffConfig) -> Result<Self> {
        Self::connect_with_retry(&config.socket_path, config.connect_timeout)
    }

    /// Expect a different marker byte.
    pub fn with_marker(mut self, marker: u8) -> Self {
        self.marker = marker;
        self
    }

    /// Take the single handoff message and adopt its segment.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] for a wrong marker byte or a message without
    /// exactly one handle.
    pub fn receive(self) -> Result<ReceivedSegment> {
        let (marker, fd) = recv_handle(&self.stream)?;
        if marker != self.marker {
            return Err(Error::Protocol(format!(
                "unexpected marker byte {marker:#04x}, expected {:#04x}",
                self.marker
            )));
        }
        let segment = SharedSegment::from_fd(fd)?;
        info!(
            fd = segment.raw_fd(),
            capacity = segment.len(),
            "received segment handle"
        );
        Ok(ReceivedSegment { segment })
    }
}

/// A segment adopted from a sender.
#[derive(Debug)]
pub struct ReceivedSegment {
    segment: SharedSegment,
}

impl ReceivedSegment {
    /// Announced capacity in bytes. Not the frame length.
    pub fn capacity(&self) -> usize {
        self.segment.len()
    }

    /// Whether the sender sealed the segment before handing it off.
    pub fn is_sealed(&self) -> Result<bool> {
        self.segment.is_sealed()
    }

    /// Map the whole capacity read-only.
    pub fn map(&self) -> Result<SegmentMapping> {
        self.segment.map_read_only()
    }

    /// Locate the frame without decoding it.
    pub fn frame_extent(&self) -> Result<FrameExtent> {
        let mapping = self.map()?;
        frame_extent(mapping.as_slice())
    }

    /// Map, bound the frame by the capacity, then decode it.
    pub fn read_frame(&self) -> Result<DecodedFrame> {
        let mapping = self.map()?;
        read_frame(mapping.as_slice())
    }

    /// The underlying segment.
    pub fn segment(&self) -> &SharedSegment {
        &self.segment
    }

    /// Give up the wrapper and keep the segment.
    pub fn into_segment(self) -> SharedSegment {
        self.segment
    }
}
