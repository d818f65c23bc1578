//! Self-duplexed anonymous FIFOs.

use crate::{error::Result, flags::AccessMode, handle::NonBlockingFd};
use nix::{sys::stat::Mode, unistd};
use std::{env, path::Path};
use tempfile::Builder;
use tracing::debug;

const TEMP_DIR_PREFIX: &str = "nbfd-fifo-";
const FIFO_NAME: &str = "fifo";

#[derive(Debug)]
/// Factory for FIFO backed handles.
pub struct Fifo;

impl Fifo {
    /// Create an anonymous FIFO and open it once, read-write and non-blocking.
    ///
    /// Opening a FIFO read-write from a single process does not wait for a
    /// peer, and the resulting descriptor is a read end and a write end at the
    /// same time. A child process can therefore use a duplicate of the handle
    /// as its stdout while the parent reads from the handle, or as its stdin
    /// while the parent writes. Never split this into separate read-only and
    /// write-only opens: those block until the other side shows up.
    ///
    /// The FIFO node and its private temporary directory are removed before
    /// returning, on success and on failure. The open descriptor keeps the
    /// pipe alive.
    pub fn create() -> Result<NonBlockingFd> {
        Self::create_in(env::temp_dir())
    }

    pub(crate) fn create_in<P: AsRef<Path>>(parent: P) -> Result<NonBlockingFd> {
        let dir = Builder::new().prefix(TEMP_DIR_PREFIX).tempdir_in(parent)?;
        let path = dir.path().join(FIFO_NAME);

        unistd::mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR)?;
        debug!("Created FIFO node {}", path.display());

        let handle = NonBlockingFd::open(&path, AccessMode::ReadWrite, 0)?;
        dir.close()?;
        Ok(handle)
    }
}

/// Create a self-duplexed FIFO handle, see [`Fifo::create`].
pub fn create_fifo() -> Result<NonBlockingFd> {
    Fifo::create()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{capability::Capabilities, error::Error};
    use anyhow::Result;
    use std::{
        fs,
        time::{Duration, Instant},
    };
    use tempfile::tempdir;

    #[test]
    fn create_success() -> Result<()> {
        let fifo = Fifo::create()?;
        assert_eq!(fifo.capabilities(), Capabilities::READ_WRITE_CLOSE);

        let flags = fifo.flags()?;
        assert_eq!(flags.access_mode(), AccessMode::ReadWrite);
        assert!(flags.non_blocking());
        assert!(flags.close_on_exec());
        Ok(())
    }

    #[test]
    fn create_does_not_block_and_is_empty() -> Result<()> {
        let start = Instant::now();
        let mut fifo = create_fifo()?;
        assert!(start.elapsed() < Duration::from_secs(1));

        let mut buf = [0; 4];
        assert!(matches!(fifo.read(&mut buf), Err(Error::WouldBlock)));
        Ok(())
    }

    #[test]
    fn self_duplexed_round_trip() -> Result<()> {
        let mut fifo = Fifo::create()?;
        assert_eq!(fifo.write(b"foo")?, 3);
        assert_eq!(fifo.write(b"bar\n")?, 4);

        let mut buf = [0; 16];
        let n = fifo.read(&mut buf)?;
        assert_eq!(&buf[..n], b"foobar\n");
        assert!(matches!(fifo.read(&mut buf), Err(Error::WouldBlock)));
        fifo.close()?;
        Ok(())
    }

    #[test]
    fn handle_reads_what_the_duplicate_writes() -> Result<()> {
        let mut fifo = Fifo::create()?;
        let mut dup = fifo.try_clone()?;

        dup.write(b"from the duplicate")?;
        let mut buf = [0; 32];
        let n = fifo.read(&mut buf)?;
        assert_eq!(&buf[..n], b"from the duplicate");
        Ok(())
    }

    #[test]
    fn full_fifo_would_block() -> Result<()> {
        let mut fifo = Fifo::create()?;
        let data = [b"foo".repeat(100_000), b"\n".to_vec()].concat();

        let n = fifo.write(&data)?;
        assert!(n > 0 && n < data.len());
        assert!(matches!(fifo.write(&data), Err(Error::WouldBlock)));
        Ok(())
    }

    #[test]
    fn temporary_directory_removed() -> Result<()> {
        let parent = tempdir()?;
        let mut fifo = Fifo::create_in(parent.path())?;
        assert_eq!(fs::read_dir(parent.path())?.count(), 0);

        // The pipe outlives its filesystem name.
        fifo.write(b"still alive")?;
        let mut buf = [0; 16];
        let n = fifo.read(&mut buf)?;
        assert_eq!(&buf[..n], b"still alive");
        Ok(())
    }

    #[test]
    fn create_in_missing_parent_fails() -> Result<()> {
        let parent = tempdir()?;
        let res = Fifo::create_in(parent.path().join("missing"));
        assert!(matches!(res, Err(Error::Io(_))));
        Ok(())
    }
}
