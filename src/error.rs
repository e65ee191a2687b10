//! Error types for arrow-memfd.

use arrow::error::ArrowError;
use thiserror::Error;

/// Result type alias using arrow-memfd's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for segment, frame and handoff operations.
///
/// Every variant is fatal at its call site. Nothing in the pipeline retries.
#[derive(Error, Debug)]
pub enum Error {
    /// Creating or sizing the anonymous segment failed.
    #[error("segment allocation failed: {0}")]
    Allocation(String),

    /// Mapping the segment into the address space failed.
    #[error("segment mapping failed: {0}")]
    Mapping(String),

    /// Rendezvous bind/accept/send or other I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Building or parsing a frame failed.
    #[error("serialization failed: {0}")]
    Serialization(#[from] SerializationError),

    /// The peer sent something other than a single handoff message.
    #[error("handoff protocol violation: {0}")]
    Protocol(String),

    /// A handoff channel transition was requested out of order.
    #[error("invalid channel state: expected {expected}, found {actual}")]
    InvalidState {
        /// State the transition requires.
        expected: &'static str,
        /// State the channel was actually in.
        actual: &'static str,
    },
}

/// Failures while constructing, writing or validating a frame.
#[derive(Error, Debug)]
pub enum SerializationError {
    /// The frame does not fit in the destination region.
    #[error("frame needs {required} bytes but segment capacity is {capacity}")]
    CapacityExceeded {
        /// Bytes the complete frame occupies.
        required: usize,
        /// Bytes available in the destination.
        capacity: usize,
    },

    /// Columns do not match the schema (count, type, nullability).
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A length that must agree with another one does not.
    #[error("length mismatch for {what}: expected {expected}, got {actual}")]
    LengthMismatch {
        /// What was being measured.
        what: String,
        /// Expected length.
        expected: usize,
        /// Observed length.
        actual: usize,
    },

    /// A raw buffer cannot be viewed as the requested element type.
    #[error("buffer at {address:#x} is not aligned to {align} bytes")]
    Misaligned {
        /// Start address of the buffer.
        address: usize,
        /// Required alignment.
        align: usize,
    },

    /// The bytes do not form a well-terminated frame.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// A population strategy name that is neither `accumulate` nor `direct`.
    #[error("unknown population strategy {0:?}, expected \"accumulate\" or \"direct\"")]
    UnknownStrategy(String),

    /// Error reported by the Arrow IPC encoder/decoder.
    #[error("arrow: {0}")]
    Arrow(#[from] ArrowError),
}

impl From<ArrowError> for Error {
    fn from(err: ArrowError) -> Self {
        Error::Serialization(SerializationError::Arrow(err))
    }
}
