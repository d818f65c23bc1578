//! The non-blocking file descriptor handle.

use crate::{
    capability::{self, Capabilities},
    error::{Error, Result},
    flags::{self, AccessMode, DescriptorFlags},
};
use getset::CopyGetters;
use nix::errno::Errno;
use std::{
    cell::Cell,
    fs::OpenOptions,
    io::{self, Read, Write},
    marker::PhantomData,
    os::{
        fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd},
        unix::fs::OpenOptionsExt,
    },
    path::Path,
    process::Stdio,
};
use tracing::{debug, trace};

#[derive(CopyGetters, Debug)]
/// An owned descriptor which has been validated as non-blocking.
///
/// Every [`read`](Self::read) and [`write`](Self::write) is exactly one
/// syscall and returns immediately, either with data, with
/// [`Error::WouldBlock`] or with the OS error.
///
/// The handle is `Send` but not `Sync`. Callers that need to use one handle
/// from several threads have to wrap it, for example in a `Mutex`.
pub struct NonBlockingFd {
    fd: OwnedFd,

    #[getset(get_copy = "pub")]
    /// The capabilities the descriptor was validated against on construction.
    capabilities: Capabilities,

    not_sync: PhantomData<Cell<()>>,
}

impl NonBlockingFd {
    /// Take ownership of `fd` if it satisfies the `required` capabilities.
    ///
    /// The descriptor gets closed if the validation fails.
    pub fn new(fd: OwnedFd, required: Capabilities) -> Result<Self> {
        let raw = fd.as_raw_fd();
        Self::check(raw, required)?;
        Ok(Self::wrap(fd, required))
    }

    /// Take ownership of the raw descriptor `fd` if it satisfies the `required`
    /// capabilities.
    ///
    /// Ownership is only taken on success. A rejected descriptor stays open
    /// and remains the responsibility of the caller.
    ///
    /// # Safety
    ///
    /// `fd` must be an open descriptor which is not owned by anything else,
    /// see [`FromRawFd::from_raw_fd`].
    pub unsafe fn from_raw_fd(fd: RawFd, required: Capabilities) -> Result<Self> {
        Self::check(fd, required)?;
        // SAFETY: upheld by the caller, the descriptor is open as checked above.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self::wrap(fd, required))
    }

    /// A non-blocking reader.
    pub fn reader(fd: OwnedFd) -> Result<Self> {
        Self::new(fd, Capabilities::READER)
    }

    /// A non-blocking writer. Write-only descriptors do not need `O_NONBLOCK`.
    pub fn writer(fd: OwnedFd) -> Result<Self> {
        Self::new(fd, Capabilities::WRITER)
    }

    /// A non-blocking reader and writer.
    pub fn read_writer(fd: OwnedFd) -> Result<Self> {
        Self::new(fd, Capabilities::READ_WRITE)
    }

    /// A non-blocking reader and writer with `FD_CLOEXEC` set.
    pub fn read_write_closer(fd: OwnedFd) -> Result<Self> {
        Self::new(fd, Capabilities::READ_WRITE_CLOSE)
    }

    /// Open `path` as a non-blocking handle.
    ///
    /// The descriptor is always opened read-write, non-blocking and
    /// close-on-exec, no matter which `mode` is requested. Owned descriptors
    /// can therefore serve both directions. A non-zero `permissions` value
    /// creates the file if it does not exist yet.
    pub fn open<P: AsRef<Path>>(path: P, mode: AccessMode, permissions: u32) -> Result<Self> {
        let path = path.as_ref();
        debug!(
            "Opening {} read-write (requested {}) with permissions {:o}",
            path.display(),
            mode,
            permissions
        );

        let mut options = OpenOptions::new();
        options
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .mode(permissions);
        if permissions != 0 {
            options.create(true);
        }

        let file = options.open(path)?;
        Self::new(file.into(), Capabilities::READ_WRITE_CLOSE)
    }

    fn check(fd: RawFd, required: Capabilities) -> Result<()> {
        let flags = flags::query_flags(fd)?;
        capability::validate(fd, &flags, required)
    }

    fn wrap(fd: OwnedFd, capabilities: Capabilities) -> Self {
        debug!(
            "Wrapping fd {} with capabilities {}",
            fd.as_raw_fd(),
            capabilities
        );
        Self {
            fd,
            capabilities,
            not_sync: PhantomData,
        }
    }

    /// Attempt a single read into `buf`.
    ///
    /// Returns the number of bytes read, `0` at end of input and
    /// [`Error::WouldBlock`] if no data is available right now.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        // SAFETY: the descriptor is owned and the buffer is valid for `buf.len()` bytes.
        let res = unsafe { libc::read(self.fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
        let n = Errno::result(res).map_err(Error::from_io_errno)?;
        trace!("Read {} bytes from fd {}", n, self.fd.as_raw_fd());
        Ok(n as usize)
    }

    /// Attempt a single write of `buf`.
    ///
    /// Partial writes are returned as they are and never retried. A full OS
    /// buffer results in [`Error::WouldBlock`].
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        // SAFETY: the descriptor is owned and the buffer is valid for `buf.len()` bytes.
        let res = unsafe { libc::write(self.fd.as_raw_fd(), buf.as_ptr().cast(), buf.len()) };
        let n = Errno::result(res).map_err(Error::from_io_errno)?;
        trace!("Wrote {} bytes to fd {}", n, self.fd.as_raw_fd());
        Ok(n as usize)
    }

    /// Close the descriptor and report the result of `close(2)`.
    ///
    /// Dropping the handle closes the descriptor as well, but ignores errors.
    pub fn close(self) -> Result<()> {
        let fd = self.fd.into_raw_fd();
        debug!("Closing fd {}", fd);
        // SAFETY: the descriptor was owned by the handle which is consumed here.
        Errno::result(unsafe { libc::close(fd) })?;
        Ok(())
    }

    /// Duplicate the handle into a new descriptor sharing the same open file
    /// description, including its non-blocking mode.
    pub fn try_clone(&self) -> Result<Self> {
        let fd = self.fd.try_clone()?;
        trace!("Duplicated fd {} to {}", self.fd.as_raw_fd(), fd.as_raw_fd());
        Ok(Self::wrap(fd, self.capabilities))
    }

    /// Duplicate the descriptor for use as the standard stream of a child process.
    ///
    /// The handle stays usable, which lets the parent read what a child writes
    /// to a FIFO handle, or write what the child reads from it.
    pub fn as_stdio(&self) -> Result<Stdio> {
        Ok(self.fd.try_clone()?.into())
    }

    pub(crate) fn owned_fd(&self) -> &OwnedFd {
        &self.fd
    }

    /// Query the current flags of the owned descriptor.
    pub fn flags(&self) -> Result<DescriptorFlags> {
        flags::query_flags(self.fd.as_raw_fd())
    }
}

impl TryFrom<OwnedFd> for NonBlockingFd {
    type Error = Error;

    /// Wrap an externally obtained descriptor, which has to be non-blocking,
    /// readable and writable.
    fn try_from(fd: OwnedFd) -> Result<Self> {
        Self::read_writer(fd)
    }
}

impl Read for NonBlockingFd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        NonBlockingFd::read(self, buf).map_err(Into::into)
    }
}

impl Write for NonBlockingFd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        NonBlockingFd::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsFd for NonBlockingFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for NonBlockingFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl IntoRawFd for NonBlockingFd {
    fn into_raw_fd(self) -> RawFd {
        self.fd.into_raw_fd()
    }
}

impl From<NonBlockingFd> for OwnedFd {
    fn from(handle: NonBlockingFd) -> Self {
        handle.fd
    }
}

impl From<NonBlockingFd> for Stdio {
    fn from(handle: NonBlockingFd) -> Self {
        handle.fd.into()
    }
}
