//! Passing a segment fd over a Unix socket with `SCM_RIGHTS`.
//!
//! A handoff message is one in-band marker byte with exactly one fd
//! attached as ancillary data on the same `sendmsg`.

use crate::error::{Error, Result};
use rustix::fd::{AsFd, OwnedFd};
use rustix::net::{
    RecvAncillaryBuffer, RecvAncillaryMessage, RecvFlags, ReturnFlags, SendAncillaryBuffer,
    SendAncillaryMessage, SendFlags, recvmsg, sendmsg,
};
use std::io::{IoSlice, IoSliceMut};
use std::mem::MaybeUninit;
use std::os::unix::net::UnixStream;

/// Ancillary space; comfortably holds one `SCM_RIGHTS` header plus fds.
const ANCILLARY_SPACE: usize = 64;

/// Send `fd` with the in-band `marker` byte.
pub fn send_handle<Fd: AsFd>(socket: &UnixStream, fd: Fd, marker: u8) -> Result<()> {
    let fds = [fd.as_fd()];

    let mut ancillary_space: [MaybeUninit<u8>; ANCILLARY_SPACE] =
        [const { MaybeUninit::uninit() }; ANCILLARY_SPACE];
    let mut ancillary = SendAncillaryBuffer::new(&mut ancillary_space);
    if !ancillary.push(SendAncillaryMessage::ScmRights(&fds)) {
        return Err(Error::Io(std::io::Error::other(
            "failed to add fd to ancillary buffer",
        )));
    }

    let data = [marker];
    let iov = [IoSlice::new(&data)];
    let sent = sendmsg(socket, &iov, &mut ancillary, SendFlags::NOSIGNAL)
        .map_err(|e| Error::Io(e.into()))?;
    if sent != data.len() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            "handoff message was not sent",
        )));
    }
    Ok(())
}

/// Receive one handoff message: the marker byte and the single fd.
///
/// # Errors
///
/// [`Error::Protocol`] if the peer closed without sending, if the control
/// data was truncated, or if the message carried zero or several fds.
/// Any fds that did arrive are closed.
pub fn recv_handle(socket: &UnixStream) -> Result<(u8, OwnedFd)> {
    let mut ancillary_space: [MaybeUninit<u8>; ANCILLARY_SPACE] =
        [const { MaybeUninit::uninit() }; ANCILLARY_SPACE];
    let mut ancillary = RecvAncillaryBuffer::new(&mut ancillary_space);

    let mut data = [0u8; 1];
    let mut iov = [IoSliceMut::new(&mut data)];
    let msg = recvmsg(socket, &mut iov, &mut ancillary, RecvFlags::CMSG_CLOEXEC)
        .map_err(|e| Error::Io(e.into()))?;

    let mut fds: Vec<OwnedFd> = Vec::new();
    for message in ancillary.drain() {
        if let RecvAncillaryMessage::ScmRights(rights) = message {
            fds.extend(rights);
        }
    }

    if msg.bytes == 0 {
        return Err(Error::Protocol(
            "peer closed the connection without sending a handle".into(),
        ));
    }
    if msg.flags.contains(ReturnFlags::CTRUNC) {
        return Err(Error::Protocol("ancillary data was truncated".into()));
    }
    if fds.len() != 1 {
        return Err(Error::Protocol(format!(
            "expected exactly 1 handle, got {}",
            fds.len()
        )));
    }

    let fd = fds.pop().ok_or_else(|| Error::Protocol("no handle".into()))?;
    Ok((data[0], fd))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{SegmentAllocator, SharedSegment};
    use rustix::fd::BorrowedFd;
    use std::io::Write;

    #[test]
    fn test_send_recv_handle() {
        let (sender, receiver) = UnixStream::pair().unwrap();

        let segment = SegmentAllocator::new("test-fd").allocate(8192).unwrap();
        segment.map_mut().unwrap().as_mut_slice().unwrap()[1000] = 123;

        send_handle(&sender, segment.fd(), b'F').unwrap();
        let (marker, fd) = recv_handle(&receiver).unwrap();
        assert_eq!(marker, b'F');

        let received = SharedSegment::from_fd(fd).unwrap();
        assert_eq!(received.len(), 8192);
        assert_eq!(received.map_read_only().unwrap().as_slice()[1000], 123);
    }

    #[test]
    fn test_sender_can_close_after_send() {
        let (sender, receiver) = UnixStream::pair().unwrap();
        let segment = SegmentAllocator::new("test-fd").allocate(4096).unwrap();
        segment.map_mut().unwrap().as_mut_slice().unwrap()[0] = 55;

        send_handle(&sender, segment.fd(), b'F').unwrap();
        drop(segment);

        let (_, fd) = recv_handle(&receiver).unwrap();
        let received = SharedSegment::from_fd(fd).unwrap();
        assert_eq!(received.map_read_only().unwrap().as_slice()[0], 55);
    }

    #[test]
    fn test_message_without_fd_is_protocol_error() {
        let (mut sender, receiver) = UnixStream::pair().unwrap();
        sender.write_all(b"F").unwrap();
        assert!(matches!(recv_handle(&receiver), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_closed_peer_is_protocol_error() {
        let (sender, receiver) = UnixStream::pair().unwrap();
        drop(sender);
        assert!(matches!(recv_handle(&receiver), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_two_fds_rejected() {
        let (sender, receiver) = UnixStream::pair().unwrap();
        let a = SegmentAllocator::new("a").allocate(64).unwrap();
        let b = SegmentAllocator::new("b").allocate(64).unwrap();
        let fds: [BorrowedFd<'_>; 2] = [a.fd(), b.fd()];

        let mut space: [MaybeUninit<u8>; ANCILLARY_SPACE] =
            [const { MaybeUninit::uninit() }; ANCILLARY_SPACE];
        let mut ancillary = SendAncillaryBuffer::new(&mut space);
        assert!(ancillary.push(SendAncillaryMessage::ScmRights(&fds)));
        sendmsg(&sender, &[IoSlice::new(b"F")], &mut ancillary, SendFlags::empty()).unwrap();

        assert!(matches!(recv_handle(&receiver), Err(Error::Protocol(_))));
    }
}
