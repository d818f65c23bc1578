//! Open-mode flag inspection of raw file descriptors.

use crate::error::{Error, Result};
use getset::CopyGetters;
use nix::{
    errno::Errno,
    fcntl::{FcntlArg, FdFlag, OFlag, fcntl},
};
use serde::{Deserialize, Serialize};
use std::os::fd::{AsFd, AsRawFd, RawFd};
use strum::{AsRefStr, Display, EnumIter, IntoStaticStr};
use tracing::trace;

#[derive(
    AsRefStr,
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    EnumIter,
    Eq,
    Hash,
    IntoStaticStr,
    PartialEq,
    Serialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
/// The access mode a descriptor was opened with.
pub enum AccessMode {
    /// `O_RDONLY`
    ReadOnly,

    /// `O_WRONLY`
    WriteOnly,

    /// `O_RDWR`
    ReadWrite,
}

impl AccessMode {
    fn from_status(status: OFlag) -> Self {
        match status & OFlag::O_ACCMODE {
            m if m == OFlag::O_WRONLY => Self::WriteOnly,
            m if m == OFlag::O_RDWR => Self::ReadWrite,
            _ => Self::ReadOnly,
        }
    }
}

#[derive(Clone, Copy, CopyGetters, Debug, Eq, PartialEq)]
#[getset(get_copy = "pub")]
/// A snapshot of the flags the OS reports for a descriptor.
///
/// The snapshot is not kept in sync with the descriptor: another process
/// sharing the open file description may change the status flags at any time.
pub struct DescriptorFlags {
    /// Access mode decoded from `O_ACCMODE`.
    access_mode: AccessMode,

    /// Whether `O_NONBLOCK` is set on the open file description.
    non_blocking: bool,

    /// Whether `FD_CLOEXEC` is set on the descriptor.
    close_on_exec: bool,

    /// The raw file status flags as returned by `F_GETFL`.
    status: OFlag,
}

impl DescriptorFlags {
    pub(crate) fn new(status: OFlag, fd_flags: FdFlag) -> Self {
        Self {
            access_mode: AccessMode::from_status(status),
            non_blocking: status.contains(OFlag::O_NONBLOCK),
            close_on_exec: fd_flags.contains(FdFlag::FD_CLOEXEC),
            status,
        }
    }

    /// Whether the descriptor may be read from.
    pub fn is_readable(&self) -> bool {
        matches!(
            self.access_mode,
            AccessMode::ReadOnly | AccessMode::ReadWrite
        )
    }

    /// Whether the descriptor may be written to.
    pub fn is_writable(&self) -> bool {
        matches!(
            self.access_mode,
            AccessMode::WriteOnly | AccessMode::ReadWrite
        )
    }

    /// Whether the descriptor was opened write-only.
    pub fn is_write_only(&self) -> bool {
        self.access_mode == AccessMode::WriteOnly
    }

    /// Write-only descriptors count as non-blocking even without `O_NONBLOCK`.
    ///
    /// Write-only FIFO ends never block on open in practice. The exemption is
    /// limited to that access mode and must not be extended to other kinds of
    /// descriptors without re-checking the platform behavior.
    pub fn is_write_only_exempt(&self) -> bool {
        !self.non_blocking && self.is_write_only()
    }
}

/// Query the open-mode flags of any raw descriptor value.
///
/// Invalid or foreign descriptors result in [`Error::BadDescriptor`].
pub fn query_flags(fd: RawFd) -> Result<DescriptorFlags> {
    if fd < 0 {
        return Err(Error::BadDescriptor(fd));
    }

    // The descriptor may be closed or belong to nobody, so it cannot be
    // borrowed as a `BorrowedFd` here.
    let status = Errno::result(unsafe { libc::fcntl(fd, libc::F_GETFL) })
        .map_err(|e| map_query_errno(fd, e))?;
    let fd_flags = Errno::result(unsafe { libc::fcntl(fd, libc::F_GETFD) })
        .map_err(|e| map_query_errno(fd, e))?;

    let flags = DescriptorFlags::new(
        OFlag::from_bits_retain(status),
        FdFlag::from_bits_retain(fd_flags),
    );
    trace!("Queried flags of fd {}: {:?}", fd, flags);
    Ok(flags)
}

fn map_query_errno(fd: RawFd, errno: Errno) -> Error {
    match errno {
        Errno::EBADF => Error::BadDescriptor(fd),
        e => Error::Os(e),
    }
}

/// Set `O_NONBLOCK` on an existing descriptor.
///
/// Used to retrofit descriptors not opened by this crate, like the standard
/// streams of the current process. Setting the flag twice is harmless.
pub fn set_non_blocking<Fd: AsFd>(fd: Fd) -> Result<()> {
    let fd = fd.as_fd();
    let status = OFlag::from_bits_retain(fcntl(fd, FcntlArg::F_GETFL)?);
    if status.contains(OFlag::O_NONBLOCK) {
        trace!("Fd {} is already non-blocking", fd.as_raw_fd());
        return Ok(());
    }

    fcntl(fd, FcntlArg::F_SETFL(status | OFlag::O_NONBLOCK))?;
    trace!("Set fd {} to non-blocking", fd.as_raw_fd());
    Ok(())
}

/// Set `O_NONBLOCK` on a raw descriptor value that is not owned by a Rust type.
///
/// Invalid descriptors result in [`Error::BadDescriptor`].
pub fn set_non_blocking_raw(fd: RawFd) -> Result<()> {
    let flags = query_flags(fd)?;
    if flags.non_blocking() {
        return Ok(());
    }

    let status = flags.status() | OFlag::O_NONBLOCK;
    Errno::result(unsafe { libc::fcntl(fd, libc::F_SETFL, status.bits()) })
        .map_err(|e| map_query_errno(fd, e))?;
    trace!("Set raw fd {} to non-blocking", fd);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use nix::unistd;
    use std::{
        fs::OpenOptions,
        os::{
            fd::{FromRawFd, IntoRawFd, OwnedFd},
            unix::fs::OpenOptionsExt,
        },
    };
    use tempfile::NamedTempFile;

    #[test]
    fn query_invalid_fd() {
        assert!(matches!(query_flags(-1), Err(Error::BadDescriptor(-1))));
        assert!(matches!(
            query_flags(999_999),
            Err(Error::BadDescriptor(999_999))
        ));
    }

    #[test]
    fn query_pipe_ends() -> Result<()> {
        let (read, write) = unistd::pipe()?;

        let flags = query_flags(read.as_raw_fd())?;
        assert_eq!(flags.access_mode(), AccessMode::ReadOnly);
        assert!(flags.is_readable());
        assert!(!flags.is_writable());
        assert!(!flags.non_blocking());

        let flags = query_flags(write.as_raw_fd())?;
        assert_eq!(flags.access_mode(), AccessMode::WriteOnly);
        assert!(flags.is_write_only());
        assert!(flags.is_write_only_exempt());
        Ok(())
    }

    #[test]
    fn query_reports_close_on_exec() -> Result<()> {
        let (read, _write) = unistd::pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK)?;

        let flags = query_flags(read.as_raw_fd())?;
        assert!(flags.close_on_exec());
        assert!(flags.non_blocking());
        assert!(!flags.is_write_only_exempt());
        Ok(())
    }

    #[test]
    fn query_read_write_file() -> Result<()> {
        let tmp = NamedTempFile::new()?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(tmp.path())?;

        let flags = query_flags(file.as_raw_fd())?;
        assert_eq!(flags.access_mode(), AccessMode::ReadWrite);
        assert!(flags.is_readable());
        assert!(flags.is_writable());
        assert!(flags.non_blocking());
        Ok(())
    }

    #[test]
    fn set_non_blocking_is_idempotent() -> Result<()> {
        let (read, _write) = unistd::pipe()?;
        assert!(!query_flags(read.as_raw_fd())?.non_blocking());

        set_non_blocking(&read)?;
        assert!(query_flags(read.as_raw_fd())?.non_blocking());

        set_non_blocking(&read)?;
        let flags = query_flags(read.as_raw_fd())?;
        assert!(flags.non_blocking());
        assert_eq!(flags.access_mode(), AccessMode::ReadOnly);
        Ok(())
    }

    #[test]
    fn set_non_blocking_raw_fd() -> Result<()> {
        let (read, write) = unistd::pipe()?;
        let raw = read.into_raw_fd();

        set_non_blocking_raw(raw)?;
        assert!(query_flags(raw)?.non_blocking());

        drop(unsafe { OwnedFd::from_raw_fd(raw) });
        drop(write);
        Ok(())
    }

    #[test]
    fn set_non_blocking_raw_invalid_fd() {
        assert!(matches!(
            set_non_blocking_raw(-5),
            Err(Error::BadDescriptor(-5))
        ));
    }
}
