//! Handoff configuration.
//!
//! All values the sender and receiver used to share as global constants
//! (rendezvous path, segment size) are carried by [`HandoffConfig`] and
//! passed explicitly into the allocator, the channel and the receiver.
//!
//! ```rust,ignore
//! use arrow_memfd::HandoffConfig;
//! use std::time::Duration;
//!
//! let config = HandoffConfig::new("/run/user/1000/frames.sock")
//!     .with_segment_size(1 << 20)
//!     .with_accept_timeout(Duration::from_secs(30));
//! config.validate()?;
//! ```

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default values.
pub mod defaults {
    use std::time::Duration;

    /// Well-known rendezvous socket path.
    pub const SOCKET_PATH: &str = "/tmp/memfd_socket";

    /// Segment capacity in bytes (ten 4 KiB pages).
    pub const SEGMENT_SIZE: usize = 4096 * 10;

    /// Debug name of the memfd (visible in `/proc/<pid>/fd/`).
    pub const SEGMENT_NAME: &str = "arrow_mem";

    /// In-band marker byte carried alongside the handle.
    pub const HANDOFF_MARKER: u8 = b'F';

    /// Sleep between non-blocking accept attempts when a timeout or
    /// cancellation token is in effect.
    pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

    /// How long a receiver keeps retrying `connect` while the sender is
    /// still writing its frame.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Configuration shared by the sender pipeline and the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffConfig {
    /// Rendezvous socket path. Recreated on every sender run.
    pub socket_path: PathBuf,
    /// Fixed segment capacity in bytes.
    pub segment_size: usize,
    /// Debug name given to the memfd.
    pub segment_name: String,
    /// Seal the segment against resizing and writes before handing it off.
    pub seal: bool,
    /// Upper bound on waiting for the peer. `None` blocks forever.
    pub accept_timeout: Option<Duration>,
    /// Accept polling interval (only used with a timeout or cancel token).
    pub poll_interval: Duration,
    /// Receiver-side retry window for `connect`.
    pub connect_timeout: Duration,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(defaults::SOCKET_PATH),
            segment_size: defaults::SEGMENT_SIZE,
            segment_name: defaults::SEGMENT_NAME.to_string(),
            seal: true,
            accept_timeout: None,
            poll_interval: defaults::POLL_INTERVAL,
            connect_timeout: defaults::CONNECT_TIMEOUT,
        }
    }
}

impl HandoffConfig {
    /// Create a configuration for the given rendezvous path, other values
    /// at their defaults.
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Set the segment capacity.
    pub fn with_segment_size(mut self, size: usize) -> Self {
        self.segment_size = size;
        self
    }

    /// Set the memfd debug name.
    pub fn with_segment_name(mut self, name: impl Into<String>) -> Self {
        self.segment_name = name.into();
        self
    }

    /// Enable or disable sealing.
    pub fn with_seal(mut self, seal: bool) -> Self {
        self.seal = seal;
        self
    }

    /// Bound how long `accept` may block.
    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = Some(timeout);
        self
    }

    /// Set the accept polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the receiver's connect retry window.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Check the configuration before any resource is acquired.
    pub fn validate(&self) -> Result<()> {
        if self.segment_size == 0 {
            return Err(Error::Allocation(
                "segment size must be greater than 0".into(),
            ));
        }
        if self.socket_path.as_os_str().is_empty() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "rendezvous socket path is empty",
            )));
        }
        if self.segment_name.contains('\0') {
            return Err(Error::Allocation(
                "segment name contains a NUL byte".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HandoffConfig::default();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/memfd_socket"));
        assert_eq!(config.segment_size, 40960);
        assert_eq!(config.segment_name, "arrow_mem");
        assert!(config.seal);
        assert!(config.accept_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = HandoffConfig::new("/tmp/x.sock")
            .with_segment_size(8192)
            .with_segment_name("frames")
            .with_seal(false)
            .with_accept_timeout(Duration::from_millis(250));
        assert_eq!(config.socket_path, PathBuf::from("/tmp/x.sock"));
        assert_eq!(config.segment_size, 8192);
        assert_eq!(config.segment_name, "frames");
        assert!(!config.seal);
        assert_eq!(config.accept_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_zero_size_rejected() {
        let config = HandoffConfig::default().with_segment_size(0);
        assert!(matches!(config.validate(), Err(Error::Allocation(_))));
    }

    #[test]
    fn test_empty_path_rejected() {
        let config = HandoffConfig::new("");
        assert!(matches!(config.validate(), Err(Error::Io(_))));
    }
}
