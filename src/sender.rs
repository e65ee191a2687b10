//! The sending pipeline: allocate, write, seal, hand off, release.

use crate::config::HandoffConfig;
use crate::error::{Error, Result};
use crate::frame::{ColumnBatch, FrameSchema, FrameWriter};
use crate::handoff::{CancelToken, HandoffChannel};
use crate::memory::{SegmentAllocator, SharedSegment};
use tracing::{debug, info};

/// Outcome of one successful handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    /// Bytes of valid frame data at the start of the segment.
    pub frame_len: usize,
    /// Segment capacity.
    pub capacity: usize,
    /// Whether the segment was sealed before transfer.
    pub sealed: bool,
}

/// A segment holding a complete frame, ready to be handed off.
#[derive(Debug)]
pub struct PreparedSegment {
    segment: SharedSegment,
    frame_len: usize,
    sealed: bool,
}

impl PreparedSegment {
    /// The segment.
    pub fn segment(&self) -> &SharedSegment {
        &self.segment
    }

    /// Frame length in bytes.
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Whether the segment is sealed.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}

/// Writes one frame per call into a fresh segment and hands it to the
/// next receiver that connects.
///
/// # Example
///
/// ```rust,ignore
/// let sender = Sender::new(HandoffConfig::default())?;
/// let report = sender.send(&schema, &[batch])?;
/// ```
#[derive(Debug)]
pub struct Sender {
    config: HandoffConfig,
    allocator: SegmentAllocator,
    writer: FrameWriter,
    cancel: Option<CancelToken>,
}

impl Sender {
    /// Validate `config` and build a sender.
    pub fn new(config: HandoffConfig) -> Result<Self> {
        config.validate()?;
        let allocator = SegmentAllocator::new(config.segment_name.clone()).with_sealing(config.seal);
        Ok(Self {
            config,
            allocator,
            writer: FrameWriter::new(),
            cancel: None,
        })
    }

    /// Let `token` abort a handoff that is waiting for its receiver.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Use a custom frame writer.
    pub fn with_writer(mut self, writer: FrameWriter) -> Self {
        self.writer = writer;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &HandoffConfig {
        &self.config
    }

    /// Allocate a segment and write the frame into it.
    ///
    /// The writable mapping is released before sealing. On error every
    /// acquired resource has already been released.
    pub fn prepare(&self, schema: &FrameSchema, batches: &[ColumnBatch]) -> Result<PreparedSegment> {
        let segment = self.allocator.allocate(self.config.segment_size)?;

        let frame_len = {
            let mut mapping = segment.map_mut()?;
            let dst = mapping
                .as_mut_slice()
                .ok_or_else(|| Error::Mapping("segment mapped without write access".into()))?;
            self.writer.write_frame(dst, schema, batches)?
        };

        if self.config.seal {
            segment.seal()?;
        }
        debug!(frame_len, capacity = segment.len(), sealed = self.config.seal, "segment prepared");

        Ok(PreparedSegment {
            segment,
            frame_len,
            sealed: self.config.seal,
        })
    }

    /// Hand a prepared segment to one receiver, then close the sender's
    /// handle.
    pub fn hand_off(&self, prepared: PreparedSegment) -> Result<SendReport> {
        let mut channel = HandoffChannel::from_config(&self.config);
        if let Some(token) = &self.cancel {
            channel = channel.with_cancel_token(token.clone());
        }
        channel.handoff(&prepared.segment)?;

        let report = SendReport {
            frame_len: prepared.frame_len,
            capacity: prepared.segment.len(),
            sealed: prepared.sealed,
        };
        drop(prepared);
        info!(
            frame_len = report.frame_len,
            capacity = report.capacity,
            "handoff complete, sender handle closed"
        );
        Ok(report)
    }

    /// [`prepare`](Self::prepare) then [`hand_off`](Self::hand_off).
    pub fn send(&self, schema: &FrameSchema, batches: &[ColumnBatch]) -> Result<SendReport> {
        let prepared = self.prepare(schema, batches)?;
        self.hand_off(prepared)
    }
}
