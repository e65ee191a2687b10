//! Transferring a segment handle to exactly one peer over a Unix socket.
//!
//! The sender drives a [`HandoffChannel`] through bind, listen, accept,
//! send and close. The receiver connects with a [`Receiver`] and gets a
//! [`ReceivedSegment`]. Only the fd crosses the socket; the frame bytes
//! stay in the segment.

mod channel;
pub mod fd;
mod receiver;

pub use channel::{CancelToken, ChannelState, HandoffChannel};
pub use receiver::{ReceivedSegment, Receiver};
