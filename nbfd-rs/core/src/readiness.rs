//! Bounded readiness waits followed by exactly one I/O attempt.

use crate::{
    error::{Error, Result},
    handle::NonBlockingFd,
};
use nix::{
    errno::Errno,
    poll::{PollFd, PollFlags, PollTimeout, poll},
};
use std::{
    os::fd::{AsFd, AsRawFd, OwnedFd},
    time::{Duration, Instant},
};
use strum::{AsRefStr, Display, IntoStaticStr};
use tracing::trace;

#[cfg(test)]
use mockall::{automock, predicate::*};

#[derive(AsRefStr, Clone, Copy, Debug, Display, Eq, Hash, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "lowercase")]
/// The direction a readiness wait is registered for.
pub enum Interest {
    /// Data is available, `POLLIN`.
    Readable,

    /// Buffer space is available, `POLLOUT`.
    Writable,
}

impl Interest {
    fn poll_flags(self) -> PollFlags {
        match self {
            Self::Readable => PollFlags::POLLIN,
            Self::Writable => PollFlags::POLLOUT,
        }
    }
}

#[derive(Debug, Default)]
/// Waits for a handle to become ready and then performs one read or write.
pub struct ReadinessWait<T> {
    imp: T,
}

impl<T> ReadinessWait<T>
where
    T: ReadinessImpl,
{
    /// Wait up to `timeout` for `handle` to become readable, then read once.
    ///
    /// The read is attempted even when the timeout elapsed, in which case it
    /// usually reports [`Error::WouldBlock`].
    pub fn read(
        &self,
        handle: &mut NonBlockingFd,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        self.wait(handle, Interest::Readable, timeout)?;
        handle.read(buf)
    }

    /// Wait up to `timeout` for `handle` to become writable, then write once.
    ///
    /// The write is attempted even when the timeout elapsed.
    pub fn write(&self, handle: &mut NonBlockingFd, buf: &[u8], timeout: Duration) -> Result<usize> {
        self.wait(handle, Interest::Writable, timeout)?;
        handle.write(buf)
    }

    /// Wait up to `timeout` for `handle` to become ready for `interest`.
    ///
    /// Returns `false` if the timeout elapsed first.
    pub fn wait(&self, handle: &NonBlockingFd, interest: Interest, timeout: Duration) -> Result<bool> {
        let fd = handle.owned_fd();
        let deadline = Instant::now().checked_add(timeout);
        let mut remaining = timeout;

        loop {
            match self.imp.poll_one(fd, interest, remaining) {
                Ok(ready) => {
                    trace!(
                        "Fd {} {} for {}",
                        fd.as_raw_fd(),
                        if ready { "ready" } else { "timed out" },
                        interest
                    );
                    return Ok(ready);
                }
                Err(Errno::EINTR) => {
                    if let Some(deadline) = deadline {
                        remaining = deadline.saturating_duration_since(Instant::now());
                    }
                    trace!("Readiness wait interrupted, {:?} remaining", remaining);
                }
                Err(e) => return Err(Error::ReadinessWaitFailed(e)),
            }
        }
    }
}

#[cfg_attr(test, automock)]
pub trait ReadinessImpl {
    /// Wait for a single descriptor and a single direction.
    fn poll_one(&self, fd: &OwnedFd, interest: Interest, timeout: Duration) -> nix::Result<bool>;
}

#[derive(Debug, Default)]
/// `poll(2)` based readiness wait.
pub struct DefaultReadiness;

impl ReadinessImpl for DefaultReadiness {
    fn poll_one(&self, fd: &OwnedFd, interest: Interest, timeout: Duration) -> nix::Result<bool> {
        let mut fds = [PollFd::new(fd.as_fd(), interest.poll_flags())];
        Ok(poll(&mut fds, poll_timeout(timeout))? > 0)
    }
}

/// Round up to whole milliseconds, so that the wait never ends early.
fn poll_timeout(timeout: Duration) -> PollTimeout {
    let millis = timeout.as_nanos().div_ceil(1_000_000);
    PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX)
}

impl NonBlockingFd {
    /// Wait up to `timeout` for data, then attempt exactly one read.
    pub fn wait_then_read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        ReadinessWait::<DefaultReadiness>::default().read(self, buf, timeout)
    }

    /// Wait up to `timeout` for buffer space, then attempt exactly one write.
    pub fn wait_then_write(&mut self, buf: &[u8], timeout: Duration) -> Result<usize> {
        ReadinessWait::<DefaultReadiness>::default().write(self, buf, timeout)
    }

    /// Check whether the handle becomes ready for `interest` within `timeout`,
    /// without performing any I/O.
    pub fn ready(&self, interest: Interest, timeout: Duration) -> Result<bool> {
        ReadinessWait::<DefaultReadiness>::default().wait(self, interest, timeout)
    }
}
