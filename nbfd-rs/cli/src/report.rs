use getset::{CopyGetters, Getters};
use nbfd::{AccessMode, Capabilities, Capability, Result, query_flags};
use serde::Serialize;
use std::{fmt, os::fd::RawFd};

#[derive(CopyGetters, Debug, Getters, Serialize)]
#[serde(rename_all = "kebab-case")]
/// Flags and satisfied capabilities of a single descriptor.
pub struct Report {
    #[getset(get_copy = "pub")]
    fd: RawFd,

    #[getset(get_copy = "pub")]
    access_mode: AccessMode,

    #[getset(get_copy = "pub")]
    non_blocking: bool,

    #[getset(get_copy = "pub")]
    close_on_exec: bool,

    #[getset(get = "pub")]
    capabilities: Vec<Capability>,
}

impl Report {
    /// Query the descriptor and build the report.
    pub fn new(fd: RawFd) -> Result<Self> {
        let flags = query_flags(fd)?;
        Ok(Self {
            fd,
            access_mode: flags.access_mode(),
            non_blocking: flags.non_blocking(),
            close_on_exec: flags.close_on_exec(),
            capabilities: Capabilities::satisfied_by(&flags).iter().collect(),
        })
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "fd:            {}", self.fd)?;
        writeln!(f, "access mode:   {}", self.access_mode)?;
        writeln!(f, "non-blocking:  {}", self.non_blocking)?;
        writeln!(f, "close-on-exec: {}", self.close_on_exec)?;
        let names: Vec<&str> = self.capabilities.iter().map(AsRef::as_ref).collect();
        writeln!(f, "capabilities:  {}", names.join(", "))
    }
}
