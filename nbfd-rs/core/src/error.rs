//! Error taxonomy of the non-blocking descriptor handles.

use crate::capability::Capability;
use nix::errno::Errno;
use std::{io, os::fd::RawFd};
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
/// All failures reported by this crate.
pub enum Error {
    #[error("file descriptor {0} does not refer to an open resource of this process")]
    /// The raw descriptor is not open or not owned by the calling process.
    BadDescriptor(RawFd),

    #[error("file descriptor {0} is set to blocking")]
    /// The descriptor lacks `O_NONBLOCK` and is not a write-only descriptor.
    NotNonBlocking(RawFd),

    #[error("file descriptor {fd} is not {missing}")]
    /// A requested readable, writable or close-on-exec capability is missing.
    CapabilityMismatch { fd: RawFd, missing: Capability },

    #[error("operation would block")]
    /// The read or write cannot proceed right now. Not a hard failure.
    WouldBlock,

    #[error("readiness wait failed")]
    /// The `poll(2)` call itself failed, which is different from timing out.
    ReadinessWaitFailed(#[source] Errno),

    #[error(transparent)]
    /// Any other OS reported failure, passed through unmodified.
    Os(#[from] Errno),

    #[error(transparent)]
    /// A failure raised through `std::io`, for example while creating a
    /// temporary directory or opening a path.
    Io(#[from] io::Error),
}

impl Error {
    /// Returns `true` for the steady-state would-block outcome.
    pub fn is_would_block(&self) -> bool {
        matches!(self, Self::WouldBlock)
    }

    /// Normalizes an errno from a single read or write attempt.
    pub(crate) fn from_io_errno(errno: Errno) -> Self {
        // EWOULDBLOCK aliases EAGAIN on every supported platform.
        if errno == Errno::EAGAIN {
            Self::WouldBlock
        } else {
            Self::Os(errno)
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::WouldBlock => io::Error::from(io::ErrorKind::WouldBlock),
            Error::Os(errno) => io::Error::from(errno),
            Error::Io(e) => e,
            other => io::Error::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_maps_to_io_kind() {
        let err = io::Error::from(Error::from_io_errno(Errno::EAGAIN));
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn errno_passes_through() {
        let err = Error::from_io_errno(Errno::EPIPE);
        assert!(matches!(err, Error::Os(Errno::EPIPE)));
        assert!(!err.is_would_block());

        let err = io::Error::from(err);
        assert_eq!(err.raw_os_error(), Some(libc::EPIPE));
    }

    #[test]
    fn capability_mismatch_names_capability() {
        let err = Error::CapabilityMismatch {
            fd: 7,
            missing: Capability::Writable,
        };
        assert_eq!(err.to_string(), "file descriptor 7 is not writable");
    }

    #[test]
    fn validation_errors_stay_distinct_from_io() {
        let err = io::Error::from(Error::NotNonBlocking(3));
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert_eq!(err.to_string(), "file descriptor 3 is set to blocking");
    }
}
