//! One-shot rendezvous channel that hands a segment fd to a single peer.
//!
//! ```text
//! Unbound ──bind──▶ Bound ──listen──▶ Listening ──accept──▶ Connected
//!                                                              │
//!                          Closed ◀──close── Transferred ◀──send
//! ```
//!
//! Every step is blocking. Any failure closes the channel for good; a new
//! handoff needs a new channel.

use super::fd::send_handle;
use crate::config::{HandoffConfig, defaults};
use crate::error::{Error, Result};
use crate::memory::SharedSegment;
use rustix::net::{AddressFamily, SocketAddrUnix, SocketFlags, SocketType};
use std::fmt;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Pending connections the listening socket accepts.
const LISTEN_BACKLOG: i32 = 1;

/// Lifecycle of a [`HandoffChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Nothing acquired yet.
    Unbound,
    /// Socket bound to the rendezvous path.
    Bound,
    /// Accepting one pending connection.
    Listening,
    /// Peer connected.
    Connected,
    /// Handle sent.
    Transferred,
    /// Everything released. Terminal.
    Closed,
}

impl ChannelState {
    /// Lowercase state name.
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelState::Unbound => "unbound",
            ChannelState::Bound => "bound",
            ChannelState::Listening => "listening",
            ChannelState::Connected => "connected",
            ChannelState::Transferred => "transferred",
            ChannelState::Closed => "closed",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared flag that aborts a pending [`HandoffChannel::accept`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// New, not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Observed within one poll interval.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Rendezvous endpoint serving exactly one peer.
///
/// # Example
///
/// ```rust,ignore
/// let mut channel = HandoffChannel::new("/tmp/memfd_socket");
/// channel.bind()?;
/// channel.listen()?;
/// channel.accept()?;          // blocks until the receiver connects
/// channel.send(&segment)?;
/// channel.close()?;
/// ```
pub struct HandoffChannel {
    path: PathBuf,
    state: ChannelState,
    socket: Option<rustix::fd::OwnedFd>,
    listener: Option<UnixListener>,
    peer: Option<UnixStream>,
    accept_timeout: Option<Duration>,
    poll_interval: Duration,
    cancel: Option<CancelToken>,
    marker: u8,
    owns_path: bool,
}

impl HandoffChannel {
    /// Channel for the given rendezvous path, blocking without bound.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: ChannelState::Unbound,
            socket: None,
            listener: None,
            peer: None,
            accept_timeout: None,
            poll_interval: defaults::POLL_INTERVAL,
            cancel: None,
            marker: defaults::HANDOFF_MARKER,
            owns_path: false,
        }
    }

    /// Channel configured from `config`.
    pub fn from_config(config: &HandoffConfig) -> Self {
        let mut channel = Self::new(&config.socket_path).with_poll_interval(config.poll_interval);
        channel.accept_timeout = config.accept_timeout;
        channel
    }

    /// Fail `accept` with `TimedOut` after `timeout`.
    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = Some(timeout);
        self
    }

    /// Polling interval while waiting with a timeout or cancel token.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Let `token` abort a pending `accept`.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Use a different in-band marker byte.
    pub fn with_marker(mut self, marker: u8) -> Self {
        self.marker = marker;
        self
    }

    /// Current state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Rendezvous path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Unbound → Bound`: remove a stale socket left by an earlier run,
    /// then bind the rendezvous path.
    pub fn bind(&mut self) -> Result<()> {
        self.require(ChannelState::Unbound)?;
        match self.bind_socket() {
            Ok(socket) => {
                self.socket = Some(socket);
                self.owns_path = true;
                self.state = ChannelState::Bound;
                info!(path = %self.path.display(), "rendezvous socket bound");
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// `Bound → Listening`: start accepting a single pending connection.
    pub fn listen(&mut self) -> Result<()> {
        self.require(ChannelState::Bound)?;
        let socket = self.socket.take().ok_or(Error::InvalidState {
            expected: "bound socket",
            actual: self.state.as_str(),
        })?;
        match rustix::net::listen(&socket, LISTEN_BACKLOG) {
            Ok(()) => {
                self.listener = Some(UnixListener::from(socket));
                self.state = ChannelState::Listening;
                debug!(path = %self.path.display(), backlog = LISTEN_BACKLOG, "listening");
                Ok(())
            }
            Err(e) => {
                drop(socket);
                Err(self.fail(Error::Io(e.into())))
            }
        }
    }

    /// `Listening → Connected`: wait for the peer.
    ///
    /// Blocks indefinitely unless an accept timeout or a cancel token is
    /// configured, in which case it fails with `TimedOut` or `Interrupted`.
    pub fn accept(&mut self) -> Result<()> {
        self.require(ChannelState::Listening)?;
        match self.wait_for_peer() {
            Ok(stream) => {
                self.peer = Some(stream);
                self.state = ChannelState::Connected;
                info!(path = %self.path.display(), "receiver connected");
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// `Connected → Transferred`: send the segment handle.
    pub fn send(&mut self, segment: &SharedSegment) -> Result<()> {
        self.require(ChannelState::Connected)?;
        let result = match self.peer.as_ref() {
            Some(peer) => send_handle(peer, segment.fd(), self.marker),
            None => Err(Error::InvalidState {
                expected: "connected peer",
                actual: self.state.as_str(),
            }),
        };
        match result {
            Ok(()) => {
                self.state = ChannelState::Transferred;
                info!(
                    fd = segment.raw_fd(),
                    capacity = segment.len(),
                    "segment handle transferred"
                );
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// `→ Closed`: drop the peer connection and listener and unlink the
    /// rendezvous path. Closing an already closed channel is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.state == ChannelState::Closed {
            return Ok(());
        }
        if self.state != ChannelState::Transferred {
            debug!(state = %self.state, "closing channel before transfer");
        }
        self.state = ChannelState::Closed;
        self.teardown()?;
        Ok(())
    }

    /// Run the whole state machine once for `segment`.
    pub fn handoff(&mut self, segment: &SharedSegment) -> Result<()> {
        self.bind()?;
        self.listen()?;
        self.accept()?;
        self.send(segment)?;
        self.close()
    }

    fn require(&self, expected: ChannelState) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidState {
                expected: expected.as_str(),
                actual: self.state.as_str(),
            });
        }
        Ok(())
    }

    /// Release everything and park in `Closed`, returning `err`.
    fn fail(&mut self, err: Error) -> Error {
        self.state = ChannelState::Closed;
        if let Err(e) = self.teardown() {
            warn!(path = %self.path.display(), error = %e, "cleanup after failure failed");
        }
        err
    }

    fn bind_socket(&self) -> Result<rustix::fd::OwnedFd> {
        remove_stale_socket(&self.path)?;
        let addr = SocketAddrUnix::new(&self.path).map_err(|e| Error::Io(e.into()))?;
        let socket = rustix::net::socket_with(
            AddressFamily::UNIX,
            SocketType::STREAM,
            SocketFlags::CLOEXEC,
            None,
        )
        .map_err(|e| Error::Io(e.into()))?;
        rustix::net::bind(&socket, &addr).map_err(|e| {
            Error::Io(io::Error::new(
                io::Error::from(e).kind(),
                format!("failed to bind {}: {e}", self.path.display()),
            ))
        })?;
        Ok(socket)
    }

    fn wait_for_peer(&self) -> Result<UnixStream> {
        let listener = self.listener.as_ref().ok_or(Error::InvalidState {
            expected: "listening socket",
            actual: self.state.as_str(),
        })?;

        if self.accept_timeout.is_none() && self.cancel.is_none() {
            let (stream, _) = listener.accept()?;
            return Ok(stream);
        }

        listener.set_nonblocking(true)?;
        let deadline = self.accept_timeout.map(|t| Instant::now() + t);
        loop {
            match listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false)?;
                    return Ok(stream);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }

            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "accept cancelled",
                )));
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!(
                        "no receiver connected to {} within {:?}",
                        self.path.display(),
                        self.accept_timeout.unwrap_or_default()
                    ),
                )));
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    fn teardown(&mut self) -> io::Result<()> {
        self.peer.take();
        self.listener.take();
        self.socket.take();
        if self.owns_path {
            self.owns_path = false;
            match std::fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl Drop for HandoffChannel {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!(path = %self.path.display(), error = %e, "failed to remove rendezvous socket");
        }
    }
}

impl fmt::Debug for HandoffChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandoffChannel")
            .field("path", &self.path)
            .field("state", &self.state)
            .field("accept_timeout", &self.accept_timeout)
            .finish_non_exhaustive()
    }
}

/// Remove a socket left at `path` by an earlier run. Anything other than a
/// socket is left alone and reported.
fn remove_stale_socket(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            warn!(path = %path.display(), "removing stale rendezvous socket");
            std::fs::remove_file(path)?;
            Ok(())
        }
        Ok(_) => Err(Error::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a socket", path.display()),
        ))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::fd::recv_handle;
    use crate::memory::SegmentAllocator;
    use std::thread;
    use tempfile::tempdir;

    fn segment() -> SharedSegment {
        SegmentAllocator::new("test-channel").allocate(4096).unwrap()
    }

    #[test]
    fn test_transitions_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("order.sock");
        let segment = segment();
        segment.map_mut().unwrap().as_mut_slice().unwrap()[0] = 17;

        let mut channel = HandoffChannel::new(&path);
        assert_eq!(channel.state(), ChannelState::Unbound);
        channel.bind().unwrap();
        assert_eq!(channel.state(), ChannelState::Bound);
        assert!(path.exists());
        channel.listen().unwrap();
        assert_eq!(channel.state(), ChannelState::Listening);

        let client_path = path.clone();
        let client = thread::spawn(move || {
            let stream = UnixStream::connect(&client_path).unwrap();
            let (marker, fd) = recv_handle(&stream).unwrap();
            let received = SharedSegment::from_fd(fd).unwrap();
            (marker, received.map_read_only().unwrap().as_slice()[0])
        });

        channel.accept().unwrap();
        assert_eq!(channel.state(), ChannelState::Connected);
        channel.send(&segment).unwrap();
        assert_eq!(channel.state(), ChannelState::Transferred);
        channel.close().unwrap();
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(!path.exists());

        assert_eq!(client.join().unwrap(), (b'F', 17));
    }

    #[test]
    fn test_out_of_order_is_rejected() {
        let dir = tempdir().unwrap();
        let mut channel = HandoffChannel::new(dir.path().join("x.sock"));

        assert!(matches!(
            channel.listen(),
            Err(Error::InvalidState {
                expected: "bound",
                actual: "unbound"
            })
        ));
        assert!(channel.send(&segment()).is_err());

        channel.bind().unwrap();
        assert!(matches!(channel.bind(), Err(Error::InvalidState { .. })));
        assert!(matches!(channel.accept(), Err(Error::InvalidState { .. })));
    }

    #[test]
    fn test_stale_socket_is_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        drop(UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let mut channel = HandoffChannel::new(&path);
        channel.bind().unwrap();
        channel.listen().unwrap();
        assert!(UnixStream::connect(&path).is_ok());
    }

    #[test]
    fn test_regular_file_is_not_removed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("precious.txt");
        std::fs::write(&path, b"keep me").unwrap();

        let mut channel = HandoffChannel::new(&path);
        let err = channel.bind().unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::AlreadyExists));
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }

    #[test]
    fn test_accept_timeout_is_terminal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("timeout.sock");
        let mut channel = HandoffChannel::new(&path)
            .with_accept_timeout(Duration::from_millis(50))
            .with_poll_interval(Duration::from_millis(5));
        channel.bind().unwrap();
        channel.listen().unwrap();

        let started = Instant::now();
        let err = channel.accept().unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::TimedOut));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(!path.exists());

        // No retry on the same channel.
        assert!(matches!(channel.bind(), Err(Error::InvalidState { .. })));
    }

    #[test]
    fn test_cancel_aborts_accept() {
        let dir = tempdir().unwrap();
        let token = CancelToken::new();
        let mut channel = HandoffChannel::new(dir.path().join("cancel.sock"))
            .with_cancel_token(token.clone())
            .with_poll_interval(Duration::from_millis(5));
        channel.bind().unwrap();
        channel.listen().unwrap();

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            token.cancel();
        });

        let err = channel.accept().unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::Interrupted));
        canceller.join().unwrap();
    }

    #[test]
    fn test_timeout_still_accepts_early_peer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("early.sock");
        let mut channel = HandoffChannel::new(&path).with_accept_timeout(Duration::from_secs(5));
        channel.bind().unwrap();
        channel.listen().unwrap();

        let _client = UnixStream::connect(&path).unwrap();
        channel.accept().unwrap();
        assert_eq!(channel.state(), ChannelState::Connected);
    }

    #[test]
    fn test_drop_unlinks_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("drop.sock");
        {
            let mut channel = HandoffChannel::new(&path);
            channel.bind().unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut channel = HandoffChannel::new(dir.path().join("idem.sock"));
        channel.bind().unwrap();
        channel.close().unwrap();
        channel.close().unwrap();
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[test]
    fn test_from_config() {
        let config = HandoffConfig::new("/tmp/cfg.sock").with_accept_timeout(Duration::from_secs(1));
        let channel = HandoffChannel::from_config(&config);
        assert_eq!(channel.path(), Path::new("/tmp/cfg.sock"));
        assert_eq!(channel.accept_timeout, Some(Duration::from_secs(1)));
    }
}
